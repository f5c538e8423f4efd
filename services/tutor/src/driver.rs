//! Interactive lesson driver.
//!
//! Feeds a [`LessonSession`] from a line-based input (one transcribed
//! utterance per line), polls the lesson clock on a fixed interval and fires
//! scheduled follow-ups. Events are handled strictly one at a time.

use anyhow::{Context, Result};
use async_trait::async_trait;
use lingua_core::Command;
use lingua_core::clock::Clock;
use lingua_core::feedback::FeedbackReport;
use lingua_core::session::{LessonSession, Stage};
use std::time::Duration;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;
use tracing::{info, warn};

/// Where the lesson's spoken output goes.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Speaker: Send + Sync {
    async fn speak(&self, text: &str) -> Result<()>;
    async fn report(&self, report: &FeedbackReport) -> Result<()>;
}

/// Writes spoken lines and the final report to stdout.
pub struct ConsoleSpeaker;

#[async_trait]
impl Speaker for ConsoleSpeaker {
    async fn speak(&self, text: &str) -> Result<()> {
        let mut stdout = tokio::io::stdout();
        stdout.write_all(format!("tutor> {text}\n").as_bytes()).await?;
        stdout.flush().await?;
        Ok(())
    }

    async fn report(&self, report: &FeedbackReport) -> Result<()> {
        let json = serde_json::to_string_pretty(report)?;
        let mut stdout = tokio::io::stdout();
        stdout.write_all(format!("{json}\n").as_bytes()).await?;
        stdout.flush().await?;
        Ok(())
    }
}

pub struct LessonDriver<S: Speaker> {
    session: LessonSession,
    speaker: S,
    clock: Clock,
    tick_interval: Duration,
}

impl<S: Speaker> LessonDriver<S> {
    pub fn new(session: LessonSession, speaker: S, clock: Clock, tick_interval: Duration) -> Self {
        Self {
            session,
            speaker,
            clock,
            tick_interval,
        }
    }

    /// Runs the lesson until it concludes or the input ends, and returns the
    /// final report. Ending the input early concludes the lesson.
    pub async fn run<R>(mut self, input: R) -> Result<FeedbackReport>
    where
        R: AsyncBufRead + Unpin,
    {
        let mut lines = input.lines();
        let mut ticker = tokio::time::interval(self.tick_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let (follow_up_tx, mut follow_up_rx) = mpsc::channel::<usize>(8);

        let greeting = self.session.start(self.clock.now());
        self.apply(greeting, &follow_up_tx).await?;

        while self.session.stage() != Stage::Concluded {
            let commands = tokio::select! {
                line = lines.next_line() => {
                    match line.context("Failed to read student input")? {
                        Some(text) if text.trim().is_empty() => continue,
                        Some(text) => self.session.handle_utterance(text.trim()),
                        None => {
                            info!("Input closed, concluding the lesson");
                            break;
                        }
                    }
                }
                _ = ticker.tick() => self.session.check_time_remaining(self.clock.now()).commands,
                Some(from_index) = follow_up_rx.recv() => self.session.on_scheduled_advance(from_index),
            };
            self.apply(commands, &follow_up_tx).await?;
        }

        if let Some(report) = self.session.report() {
            return Ok(report.clone());
        }
        let report = self.session.conclude();
        self.speaker.speak(&report.feedback_text).await?;
        self.speaker.report(&report).await?;
        Ok(report)
    }

    async fn apply(&self, commands: Vec<Command>, follow_up_tx: &mpsc::Sender<usize>) -> Result<()> {
        for command in commands {
            match command {
                Command::SpeakText(text) => self.speaker.speak(&text).await?,
                Command::ScheduleAdvance { after, from_index } => {
                    let tx = follow_up_tx.clone();
                    tokio::spawn(async move {
                        tokio::time::sleep(after).await;
                        if tx.send(from_index).await.is_err() {
                            warn!(from_index, "Lesson ended before scheduled advance fired");
                        }
                    });
                }
                Command::SessionComplete(report) => self.speaker.report(&report).await?,
                Command::LessonCompleted => {
                    self.speaker
                        .speak("The lesson has already been completed.")
                        .await?
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use lingua_core::catalog::LessonCatalog;
    use mockall::predicate::always;

    fn t0() -> chrono::DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000, 0).unwrap()
    }

    #[tokio::test]
    async fn closing_input_concludes_with_report() {
        let mut speaker = MockSpeaker::new();
        speaker.expect_speak().returning(|_| Ok(()));
        speaker
            .expect_report()
            .with(always())
            .times(1)
            .returning(|_| Ok(()));

        let session = LessonSession::new(LessonCatalog::default_lesson())
            .with_advance_delay(Duration::from_secs(60));
        let driver =
            LessonDriver::new(session, speaker, Clock::fixed(t0()), Duration::from_secs(60));

        let report = driver.run(&b"hallo\n\nHallo\n"[..]).await.unwrap();
        assert_eq!(report.phrases_learned, 1);
        assert_eq!(report.pronunciation_accuracy, 100.0);
        assert_eq!(
            report.review_list,
            [
                "Wie geht es dir?",
                "Mir geht es gut, danke",
                "Ich heiße Anna",
                "Bitte schön"
            ]
        );
    }

    #[tokio::test]
    async fn deadline_tick_concludes_while_waiting_for_input() {
        let mut speaker = MockSpeaker::new();
        speaker.expect_speak().returning(|_| Ok(()));
        speaker.expect_report().times(1).returning(|_| Ok(()));

        let mut session = LessonSession::new(LessonCatalog::default_lesson());
        session.start(t0());
        let clock = Clock::fixed(t0() + chrono::Duration::seconds(700));
        let driver = LessonDriver::new(session, speaker, clock, Duration::from_secs(1));

        // Keep the writer alive so input never ends.
        let (_writer, reader) = tokio::io::duplex(64);
        let report = driver
            .run(tokio::io::BufReader::new(reader))
            .await
            .unwrap();
        assert!(!report.passed);
        assert_eq!(report.phrases_learned, 0);
    }
}
