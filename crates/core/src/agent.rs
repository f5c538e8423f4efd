//! Lesson Tool Service
//!
//! Exposes a [`LessonSession`] to the external conversational model as a set
//! of Model Context Protocol (MCP) tools. The model talks to the student; it
//! moves the lesson forward only by calling these tools, and speaks the text
//! they return.

use crate::clock::Clock;
use crate::session::LessonSession;
use crate::{Command, coaching};
use rmcp::{
    ServerHandler,
    handler::server::{router::tool::ToolRouter, tool::Parameters},
    model::{ServerCapabilities, ServerInfo},
    tool, tool_handler, tool_router,
};
use schemars::JsonSchema;
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, mpsc};
use tracing::{info, warn};

// --- Data Structures for Tools ---

/// Arguments for passing a student utterance to the lesson.
///
/// Used by `submit_attempt`. The stage machine decides whether the text is an
/// attempt at the current phrase, a dialogue reply, or the cue to begin.
#[derive(Deserialize, JsonSchema, Debug)]
pub struct SubmitAttemptArgs {
    /// What the student said, as transcribed.
    #[schemars(description = "The student's transcribed utterance")]
    pub text: String,
}

/// Arguments for recording a skill score.
///
/// Used by `record_progress`. An unknown skill area is rejected without
/// touching the tracker.
#[derive(Deserialize, JsonSchema, Debug)]
pub struct RecordProgressArgs {
    /// The skill area being scored.
    #[schemars(
        description = "The skill being assessed: 'vocabulary', 'grammar', 'pronunciation' or 'participation'"
    )]
    pub skill_area: String,
    /// The score, from 0 to 10 inclusive.
    #[schemars(description = "Score from 0 to 10")]
    pub score: f32,
}

/// Arguments for rating the student's engagement.
#[derive(Deserialize, JsonSchema, Debug)]
pub struct SetEngagementArgs {
    /// Engagement rating, from 1 to 10.
    #[schemars(description = "How actively the student participated, from 1 to 10")]
    pub score: u8,
}

/// Arguments for a pronunciation hint.
#[derive(Deserialize, JsonSchema, Debug)]
pub struct WordArgs {
    /// The word, in the target language; matched case-insensitively.
    #[schemars(description = "The word to check pronunciation for")]
    pub word: String,
}

/// Arguments for a translation lookup.
#[derive(Deserialize, JsonSchema, Debug)]
pub struct TranslationArgs {
    /// A lesson phrase or vocabulary word.
    #[schemars(description = "Text in the target language that needs translation")]
    pub text: String,
}

/// Arguments for a grammar explanation.
#[derive(Deserialize, JsonSchema, Debug)]
pub struct GrammarArgs {
    /// One of the lesson's grammar points.
    #[schemars(description = "The grammar topic to explain")]
    pub topic: String,
}

// --- Service and Handler Implementation ---

/// MCP server wrapping one lesson session.
pub struct LessonService {
    /// The session; one per room, never shared between services.
    pub session: Arc<Mutex<LessonSession>>,
    /// Optional channel receiving every command the session emits, including
    /// those produced by scheduled follow-ups.
    pub commands_tx: Option<mpsc::Sender<Command>>,
    clock: Clock,
    tool_router: ToolRouter<Self>,
}

#[tool_handler]
impl ServerHandler for LessonService {
    fn get_info(&self) -> ServerInfo {
        ServerInfo {
            capabilities: ServerCapabilities::builder().enable_tools().build(),
            ..Default::default()
        }
    }
}

#[tool_router]
impl LessonService {
    /// Creates a new lesson service.
    ///
    /// # Arguments
    ///
    /// * `session` - The lesson session, shared with scheduled follow-ups.
    /// * `commands_tx` - Optional channel receiving every emitted command.
    /// * `clock` - Time source for `check_time` and the session start.
    pub fn new(
        session: Arc<Mutex<LessonSession>>,
        commands_tx: Option<mpsc::Sender<Command>>,
        clock: Clock,
    ) -> Self {
        Self {
            session,
            commands_tx,
            clock,
            tool_router: Self::tool_router(),
        }
    }

    /// Retrieves a snapshot of the lesson: stage, cursor, current unit,
    /// tracker and, once concluded, the report.
    #[tool(
        description = "Get the current status of the lesson: stage, current phrase, progress and, once concluded, the report."
    )]
    pub async fn get_lesson_status(&self) -> Result<String, String> {
        info!("Executing tool 'get_lesson_status'");
        let session = self.session.lock().await;
        serde_json::to_string(&session.snapshot())
            .map_err(|e| format!("Failed to serialize lesson state: {}", e))
    }

    /// Ends the introduction and presents the first phrase. Starts the
    /// lesson clock if the driver has not already done so.
    #[tool(description = "Finish the introduction and present the first phrase of the lesson.")]
    pub async fn start_teaching(&self) -> Result<String, String> {
        info!("Executing tool 'start_teaching'");
        let commands = {
            let mut session = self.session.lock().await;
            if session.state().started_at().is_none() {
                session.start(self.clock.now());
            }
            session.begin_teaching()
        };
        Ok(self.dispatch(commands).await)
    }

    /// Routes a student utterance through the stage machine.
    ///
    /// This is the main tool during a lesson. A match or a give-up schedules
    /// a follow-up that presents the next phrase after the advance delay;
    /// its output reaches the driver through `commands_tx`.
    #[tool(
        description = "Pass what the student just said to the lesson. Returns what to say next."
    )]
    pub async fn submit_attempt(
        &self,
        args: Parameters<SubmitAttemptArgs>,
    ) -> Result<String, String> {
        info!(args = ?args.0, "Executing tool 'submit_attempt'");
        let commands = self.session.lock().await.handle_utterance(&args.0.text);
        Ok(self.dispatch(commands).await)
    }

    /// Moves to the next phrase, or the next dialogue line once teaching is over.
    #[tool(
        description = "Move on to the next phrase of the lesson, or to the next line of the practice conversation."
    )]
    pub async fn advance_lesson(&self) -> Result<String, String> {
        info!("Executing tool 'advance_lesson'");
        let commands = self.session.lock().await.advance();
        Ok(self.dispatch(commands).await)
    }

    /// Applies the time budget: near the deadline the lesson moves to
    /// conversation practice, at the deadline it concludes.
    #[tool(
        description = "Check the remaining lesson time. Moves to conversation practice or ends the lesson when time runs out."
    )]
    pub async fn check_time(&self) -> Result<String, String> {
        info!("Executing tool 'check_time'");
        let check = self
            .session
            .lock()
            .await
            .check_time_remaining(self.clock.now());
        let spoken = self.dispatch(check.commands).await;
        let mut reply = format!("{} seconds remaining.", check.remaining_seconds);
        if !spoken.is_empty() {
            reply.push('\n');
            reply.push_str(&spoken);
        }
        Ok(reply)
    }

    /// Records a 0-10 score for one skill area.
    #[tool(
        description = "Record the student's score (0-10) in a skill area: vocabulary, grammar, pronunciation or participation."
    )]
    pub async fn record_progress(
        &self,
        args: Parameters<RecordProgressArgs>,
    ) -> Result<String, String> {
        info!(args = ?args.0, "Executing tool 'record_progress'");
        let mut session = self.session.lock().await;
        let category = session
            .record_progress(&args.0.skill_area, args.0.score)
            .map_err(|e| e.to_string())?;
        Ok(format!("Great work! I've noted your progress in {}.", category))
    }

    #[tool(description = "Rate the student's engagement in the lesson from 1 to 10.")]
    pub async fn set_engagement(
        &self,
        args: Parameters<SetEngagementArgs>,
    ) -> Result<String, String> {
        info!(args = ?args.0, "Executing tool 'set_engagement'");
        self.session
            .lock()
            .await
            .set_engagement(args.0.score)
            .map_err(|e| e.to_string())?;
        Ok(format!("OK. Engagement recorded as {}.", args.0.score))
    }

    #[tool(description = "Provide pronunciation feedback for a specific word.")]
    pub async fn check_pronunciation(&self, args: Parameters<WordArgs>) -> Result<String, String> {
        info!(args = ?args.0, "Executing tool 'check_pronunciation'");
        let session = self.session.lock().await;
        Ok(coaching::pronunciation_hint(session.catalog(), &args.0.word))
    }

    #[tool(
        description = "Provide the translation of a lesson word or phrase into the student's native language."
    )]
    pub async fn provide_translation(
        &self,
        args: Parameters<TranslationArgs>,
    ) -> Result<String, String> {
        info!(args = ?args.0, "Executing tool 'provide_translation'");
        let session = self.session.lock().await;
        Ok(coaching::translation(session.catalog(), &args.0.text))
    }

    #[tool(description = "Explain a grammar point of the lesson with example phrases.")]
    pub async fn explain_grammar(&self, args: Parameters<GrammarArgs>) -> Result<String, String> {
        info!(args = ?args.0, "Executing tool 'explain_grammar'");
        let session = self.session.lock().await;
        Ok(coaching::grammar_note(session.catalog(), &args.0.topic))
    }

    #[tool(description = "Suggest a practice activity based on the current lesson progress.")]
    pub async fn suggest_practice_activity(&self) -> Result<String, String> {
        info!("Executing tool 'suggest_practice_activity'");
        let session = self.session.lock().await;
        Ok(format!(
            "Here's a good activity for you: {}",
            coaching::suggest_activity(session.stage(), session.tracker())
        ))
    }

    /// Concludes the lesson. Idempotent: later calls return the same report.
    #[tool(description = "End the lesson and return the feedback report as JSON.")]
    pub async fn conclude_lesson(&self) -> Result<String, String> {
        info!("Executing tool 'conclude_lesson'");
        let report = self.session.lock().await.conclude();
        let json = serde_json::to_string(&report)
            .map_err(|e| format!("Failed to serialize feedback report: {}", e))?;
        self.forward(Command::SessionComplete(Box::new(report))).await;
        Ok(json)
    }
}

impl LessonService {
    /// Carries out session commands and renders the text the model should say.
    async fn dispatch(&self, commands: Vec<Command>) -> String {
        let mut lines = Vec::new();
        for command in commands {
            match &command {
                Command::SpeakText(text) => lines.push(text.clone()),
                Command::ScheduleAdvance { after, from_index } => {
                    self.schedule_follow_up(*after, *from_index);
                }
                Command::SessionComplete(report) => match serde_json::to_string(report) {
                    Ok(json) => lines.push(format!("Lesson report: {json}")),
                    Err(e) => warn!(error = %e, "Failed to serialize feedback report"),
                },
                Command::LessonCompleted => {
                    lines.push("The lesson has already been completed.".to_string());
                }
            }
            self.forward(command).await;
        }
        lines.join("\n")
    }

    async fn forward(&self, command: Command) {
        if let Some(tx) = &self.commands_tx {
            if tx.send(command).await.is_err() {
                warn!("Failed to forward lesson command: receiver dropped.");
            }
        }
    }

    fn schedule_follow_up(&self, after: Duration, from_index: usize) {
        let session = self.session.clone();
        let commands_tx = self.commands_tx.clone();
        tokio::spawn(async move {
            tokio::time::sleep(after).await;
            let commands = session.lock().await.on_scheduled_advance(from_index);
            if let Some(tx) = commands_tx {
                for command in commands {
                    if tx.send(command).await.is_err() {
                        warn!("Failed to forward scheduled lesson command: receiver dropped.");
                        break;
                    }
                }
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::LessonCatalog;
    use crate::session::Stage;
    use chrono::{TimeZone, Utc};

    fn service(commands_tx: Option<mpsc::Sender<Command>>) -> LessonService {
        let session = LessonSession::new(LessonCatalog::default_lesson())
            .with_advance_delay(Duration::from_millis(10));
        let clock = Clock::fixed(Utc.timestamp_opt(1_700_000_000, 0).unwrap());
        LessonService::new(Arc::new(Mutex::new(session)), commands_tx, clock)
    }

    #[tokio::test]
    async fn start_teaching_presents_first_phrase() {
        let service = service(None);
        let reply = service.start_teaching().await.unwrap();
        assert!(reply.starts_with("Phrase 1 of 6"));
        assert_eq!(service.session.lock().await.stage(), Stage::Teaching);
    }

    #[tokio::test]
    async fn scheduled_follow_up_is_forwarded() {
        let (tx, mut rx) = mpsc::channel(16);
        let service = service(Some(tx));
        service.start_teaching().await.unwrap();
        while rx.try_recv().is_ok() {}

        let reply = service
            .submit_attempt(Parameters(SubmitAttemptArgs {
                text: "hallo".into(),
            }))
            .await
            .unwrap();
        assert!(reply.starts_with("Great job!"));

        // Reply and schedule are forwarded first, then the follow-up output.
        assert!(matches!(rx.recv().await, Some(Command::SpeakText(_))));
        assert!(matches!(rx.recv().await, Some(Command::ScheduleAdvance { .. })));
        let next = rx.recv().await.unwrap();
        assert!(next.speech().unwrap().starts_with("Phrase 2 of 6"));
        assert_eq!(service.session.lock().await.current_index(), 1);
    }

    #[tokio::test]
    async fn invalid_category_is_reported() {
        let service = service(None);
        let err = service
            .record_progress(Parameters(RecordProgressArgs {
                skill_area: "listening".into(),
                score: 5.0,
            }))
            .await
            .unwrap_err();
        assert_eq!(err, "Invalid category: 'listening'");
        assert!(service.session.lock().await.tracker().category_scores().is_empty());
    }

    #[tokio::test]
    async fn conclude_is_idempotent() {
        let service = service(None);
        let first = service.conclude_lesson().await.unwrap();
        let second = service.conclude_lesson().await.unwrap();
        assert_eq!(first, second);

        let reply = service
            .submit_attempt(Parameters(SubmitAttemptArgs {
                text: "hallo".into(),
            }))
            .await
            .unwrap();
        assert_eq!(reply, "The lesson has already been completed.");
    }

    #[tokio::test]
    async fn advance_lesson_walks_phrases_then_dialogue() {
        let service = service(None);
        service.start_teaching().await.unwrap();
        for n in 2..=6 {
            let reply = service.advance_lesson().await.unwrap();
            assert!(reply.starts_with(&format!("Phrase {n} of 6")));
        }
        let reply = service.advance_lesson().await.unwrap();
        assert!(reply.contains("I'll start: \"Hallo\""));
        let reply = service.advance_lesson().await.unwrap();
        assert_eq!(reply, "Let's move on. Next: \"Wie geht es dir?\" Your turn.");
    }

    #[tokio::test]
    async fn status_reports_stage() {
        let service = service(None);
        let status = service.get_lesson_status().await.unwrap();
        let json: serde_json::Value = serde_json::from_str(&status).unwrap();
        assert_eq!(json["state"]["stage"], "INTRO");
        assert_eq!(json["title"], "Greetings and Introductions");
    }

    #[tokio::test]
    async fn check_time_before_start_reports_full_budget() {
        let service = service(None);
        assert_eq!(service.check_time().await.unwrap(), "600 seconds remaining.");
    }
}
