//! Stage Machine
//!
//! A [`LessonSession`] owns everything about one lesson: the catalog, the
//! progress tracker and the [`SessionState`]. An external driver feeds it one
//! event at a time (a student utterance, a timer tick or a scheduled
//! follow-up) and carries out the [`Command`]s it returns.
//!
//! Stages only move forward:
//! `Intro → Teaching(0) → … → Teaching(last) → Dialogue → Concluded`.
//! The wall-clock budget overrides curriculum progress: close to the deadline
//! the session jumps to dialogue practice, and at the deadline it concludes.

use crate::Command;
use crate::catalog::{LessonCatalog, TeachingUnit};
use crate::dialogue::{DialogueCoordinator, DialogueStep, Turn};
use crate::evaluator::{Assessor, AttemptVerdict};
use crate::feedback::{self, FeedbackReport};
use crate::progress::{ProgressError, ProgressTracker, ScoreCategory};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Seconds before the deadline at which teaching is cut short.
pub const DEADLINE_GRACE_SECS: u64 = 120;

/// Default pause between finishing an item and presenting the next one.
pub const DEFAULT_ADVANCE_DELAY: Duration = Duration::from_millis(1500);

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Stage {
    Intro,
    Teaching,
    Dialogue,
    Concluded,
}

/// Mutable position of a lesson.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionState {
    stage: Stage,
    current_index: usize,
    started_at: Option<DateTime<Utc>>,
    awaiting_advance: bool,
    dialogue: DialogueCoordinator,
}

impl Default for SessionState {
    fn default() -> Self {
        Self {
            stage: Stage::Intro,
            current_index: 0,
            started_at: None,
            awaiting_advance: false,
            dialogue: DialogueCoordinator::default(),
        }
    }
}

impl SessionState {
    /// Moves to `next`, refusing any move backwards.
    fn transition(&mut self, next: Stage) -> bool {
        if next < self.stage {
            warn!(from = ?self.stage, to = ?next, "Refused backward stage transition");
            return false;
        }
        if next != self.stage {
            info!(from = ?self.stage, to = ?next, "Stage transition");
            self.stage = next;
        }
        true
    }

    pub fn stage(&self) -> Stage {
        self.stage
    }

    pub fn current_index(&self) -> usize {
        self.current_index
    }

    pub fn started_at(&self) -> Option<DateTime<Utc>> {
        self.started_at
    }

    pub fn dialogue(&self) -> &DialogueCoordinator {
        &self.dialogue
    }
}

/// Result of a timer check.
#[derive(Debug, Clone, PartialEq)]
pub struct TimeCheck {
    pub remaining_seconds: u64,
    pub commands: Vec<Command>,
}

/// Serializable view of a session for status reporting.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSnapshot<'a> {
    pub title: &'a str,
    pub target_language: &'a str,
    pub state: &'a SessionState,
    pub current_unit: Option<TeachingUnit>,
    pub progress: &'a ProgressTracker,
    pub report: Option<&'a FeedbackReport>,
}

pub struct LessonSession {
    catalog: LessonCatalog,
    tracker: ProgressTracker,
    state: SessionState,
    assessor: Assessor,
    advance_delay: Duration,
    report: Option<FeedbackReport>,
}

impl LessonSession {
    pub fn new(catalog: LessonCatalog) -> Self {
        Self::with_assessor(catalog, Assessor::default())
    }

    pub fn with_assessor(catalog: LessonCatalog, assessor: Assessor) -> Self {
        Self {
            catalog,
            tracker: ProgressTracker::default(),
            state: SessionState::default(),
            assessor,
            advance_delay: DEFAULT_ADVANCE_DELAY,
            report: None,
        }
    }

    /// Builds a session from raw metadata, falling back to the default lesson.
    pub fn from_metadata(raw: Option<&str>) -> Self {
        Self::new(LessonCatalog::from_metadata(raw))
    }

    #[must_use]
    pub fn with_advance_delay(mut self, delay: Duration) -> Self {
        self.advance_delay = delay;
        self
    }

    // --- Queries ---

    pub fn stage(&self) -> Stage {
        self.state.stage
    }

    pub fn current_index(&self) -> usize {
        self.state.current_index
    }

    pub fn state(&self) -> &SessionState {
        &self.state
    }

    pub fn catalog(&self) -> &LessonCatalog {
        &self.catalog
    }

    pub fn tracker(&self) -> &ProgressTracker {
        &self.tracker
    }

    pub fn report(&self) -> Option<&FeedbackReport> {
        self.report.as_ref()
    }

    /// The unit being taught, while in the teaching stage.
    pub fn current_unit(&self) -> Option<TeachingUnit> {
        if self.state.stage != Stage::Teaching {
            return None;
        }
        self.catalog.teaching_unit(self.state.current_index)
    }

    pub fn snapshot(&self) -> SessionSnapshot<'_> {
        SessionSnapshot {
            title: self.catalog.title(),
            target_language: self.catalog.target_language(),
            state: &self.state,
            current_unit: self.current_unit(),
            progress: &self.tracker,
            report: self.report.as_ref(),
        }
    }

    // --- Events ---

    /// Records the session start time and greets the student.
    pub fn start(&mut self, now: DateTime<Utc>) -> Vec<Command> {
        if self.state.started_at.is_none() {
            self.state.started_at = Some(now);
            info!(title = %self.catalog.title(), "Lesson started");
        }
        match self.state.stage {
            Stage::Intro => vec![Command::SpeakText(self.welcome())],
            _ => self.reprompt(),
        }
    }

    /// Moves from the introduction to the first phrase.
    pub fn begin_teaching(&mut self) -> Vec<Command> {
        match self.state.stage {
            Stage::Intro => {
                self.state.transition(Stage::Teaching);
                self.state.current_index = 0;
                self.present_current()
            }
            Stage::Concluded => vec![Command::LessonCompleted],
            _ => self.reprompt(),
        }
    }

    /// Routes a transcribed student utterance to the current stage.
    pub fn handle_utterance(&mut self, text: &str) -> Vec<Command> {
        match self.state.stage {
            Stage::Intro => self.begin_teaching(),
            Stage::Teaching => self.submit_attempt(text),
            Stage::Dialogue => self.continue_dialogue(text),
            Stage::Concluded => vec![Command::LessonCompleted],
        }
    }

    /// Evaluates an attempt at the current phrase.
    ///
    /// Returns an immediate reply and, once the item is finished, a scheduled
    /// follow-up that presents the next phrase.
    pub fn submit_attempt(&mut self, candidate: &str) -> Vec<Command> {
        match self.state.stage {
            Stage::Teaching => {}
            Stage::Concluded => return vec![Command::LessonCompleted],
            _ => {
                return vec![Command::SpeakText(
                    "There is no phrase to practice right now.".into(),
                )];
            }
        }
        if self.state.awaiting_advance {
            // The student is ready before the scheduled follow-up fired.
            return self.advance();
        }

        let index = self.state.current_index;
        let Some(phrase) = self.catalog.phrase(index).cloned() else {
            return self.enter_dialogue(None);
        };

        let result = self
            .assessor
            .record_attempt(&mut self.tracker, &phrase, candidate);
        match result.verdict {
            AttemptVerdict::Matched => {
                self.state.awaiting_advance = true;
                vec![
                    Command::SpeakText(format!("Great job! \"{}\" was spot on.", phrase.text)),
                    self.schedule_advance(index),
                ]
            }
            AttemptVerdict::Retry => vec![Command::SpeakText(format!(
                "Not quite. Let's try again ({} attempts left): {}",
                result.attempts_left(),
                phrase.text
            ))],
            AttemptVerdict::Advance => {
                self.state.awaiting_advance = true;
                vec![
                    Command::SpeakText(format!(
                        "Let's keep going. We'll review \"{}\" at the end.",
                        phrase.text
                    )),
                    self.schedule_advance(index),
                ]
            }
        }
    }

    /// Moves to the next teachable unit, or to dialogue practice once the
    /// last phrase is done. In dialogue, moves the exchange on to the agent's
    /// next line.
    pub fn advance(&mut self) -> Vec<Command> {
        match self.state.stage {
            Stage::Intro => vec![Command::SpeakText(
                "The lesson hasn't started yet. Say hello when you're ready to begin.".into(),
            )],
            Stage::Teaching => {
                self.state.awaiting_advance = false;
                let next = self.state.current_index + 1;
                if next < self.catalog.phrases().len() {
                    self.state.current_index = next;
                    self.present_current()
                } else {
                    self.enter_dialogue(None)
                }
            }
            Stage::Dialogue => match self.state.dialogue.skip() {
                DialogueStep::AgentLine { prompt, .. } => vec![Command::SpeakText(prompt)],
                DialogueStep::Exhausted => self.finish(None),
            },
            Stage::Concluded => vec![Command::LessonCompleted],
        }
    }

    /// Handles a follow-up scheduled by [`Command::ScheduleAdvance`].
    ///
    /// Stale follow-ups, whose item is no longer current, are dropped.
    pub fn on_scheduled_advance(&mut self, from_index: usize) -> Vec<Command> {
        if self.state.stage == Stage::Teaching
            && self.state.awaiting_advance
            && self.state.current_index == from_index
        {
            self.advance()
        } else {
            debug!(from_index, stage = ?self.state.stage, "Dropped stale scheduled advance");
            Vec::new()
        }
    }

    /// Takes the student's side of a dialogue exchange.
    pub fn continue_dialogue(&mut self, student_response: &str) -> Vec<Command> {
        match self.state.stage {
            Stage::Dialogue => {}
            Stage::Concluded => return vec![Command::LessonCompleted],
            _ => {
                return vec![Command::SpeakText(
                    "We'll practice a conversation after the phrases.".into(),
                )];
            }
        }
        match self.state.dialogue.respond(student_response) {
            DialogueStep::AgentLine { prompt, .. } => vec![Command::SpeakText(prompt)],
            DialogueStep::Exhausted => self.finish(None),
        }
    }

    /// Applies the wall-clock budget.
    ///
    /// At the deadline the lesson concludes; within the grace window it jumps
    /// to dialogue practice regardless of teaching progress.
    pub fn check_time_remaining(&mut self, now: DateTime<Utc>) -> TimeCheck {
        let duration = self.catalog.duration_seconds();
        let Some(started_at) = self.state.started_at else {
            return TimeCheck {
                remaining_seconds: duration,
                commands: Vec::new(),
            };
        };

        let elapsed = u64::try_from((now - started_at).num_seconds()).unwrap_or(0);
        let remaining_seconds = duration.saturating_sub(elapsed);

        let commands = if self.state.stage == Stage::Concluded {
            Vec::new()
        } else if remaining_seconds == 0 {
            info!("Lesson time is up");
            self.finish(Some("Our time is up for today."))
        } else if remaining_seconds <= DEADLINE_GRACE_SECS && self.state.stage < Stage::Dialogue {
            info!(remaining_seconds, "Deadline close, forcing dialogue practice");
            self.enter_dialogue(Some(
                "We're almost out of time, so let's move on to conversation practice.",
            ))
        } else {
            Vec::new()
        };

        TimeCheck {
            remaining_seconds,
            commands,
        }
    }

    /// Ends the lesson and returns the report.
    ///
    /// Idempotent: the report is computed once and every later call returns
    /// the same one.
    pub fn conclude(&mut self) -> FeedbackReport {
        if let Some(report) = &self.report {
            return report.clone();
        }

        let report = feedback::generate(&self.catalog, &self.tracker);
        self.state.awaiting_advance = false;
        self.state.transition(Stage::Concluded);
        match serde_json::to_string(&report) {
            Ok(json) => info!(report = %json, passed = report.passed, "Lesson concluded"),
            Err(e) => warn!(error = %e, "Failed to serialize feedback report"),
        }
        self.report = Some(report.clone());
        report
    }

    // --- Progress updates ---

    /// Records a category score reported by the conversational model.
    pub fn record_progress(&mut self, category: &str, score: f32) -> Result<ScoreCategory, ProgressError> {
        self.tracker.update_score(category, score)
    }

    pub fn set_engagement(&mut self, score: u8) -> Result<(), ProgressError> {
        self.tracker.set_engagement(score)
    }

    // --- Internals ---

    fn welcome(&self) -> String {
        let mut text = format!("Welcome! Today's lesson is \"{}\"", self.catalog.title());
        if !self.catalog.description().is_empty() {
            text.push_str(&format!(": {}", self.catalog.description()));
        }
        text.push_str(&format!(
            ". We'll practice {} {} phrases, then have a short conversation. Say hello when you're ready to begin.",
            self.catalog.phrases().len(),
            self.catalog.target_language()
        ));
        text
    }

    fn present_current(&mut self) -> Vec<Command> {
        match self.catalog.teaching_unit(self.state.current_index) {
            Some(unit) => {
                info!(index = unit.index, phrase = %unit.phrase.text, "Teaching phrase");
                vec![Command::SpeakText(unit.explanation)]
            }
            None => self.enter_dialogue(None),
        }
    }

    fn schedule_advance(&self, from_index: usize) -> Command {
        Command::ScheduleAdvance {
            after: self.advance_delay,
            from_index,
        }
    }

    fn enter_dialogue(&mut self, lead_in: Option<&str>) -> Vec<Command> {
        if self.state.stage >= Stage::Dialogue {
            return self.reprompt();
        }
        self.state.awaiting_advance = false;
        self.state.transition(Stage::Dialogue);

        let mut commands: Vec<Command> = lead_in
            .map(|text| Command::SpeakText(text.to_string()))
            .into_iter()
            .collect();
        match self.state.dialogue.open(&self.catalog, &self.tracker) {
            DialogueStep::AgentLine { prompt, .. } => commands.push(Command::SpeakText(prompt)),
            DialogueStep::Exhausted => commands.extend(self.finish(None)),
        }
        commands
    }

    fn finish(&mut self, lead_in: Option<&str>) -> Vec<Command> {
        let mut commands: Vec<Command> = lead_in
            .map(|text| Command::SpeakText(text.to_string()))
            .into_iter()
            .collect();
        let report = self.conclude();
        commands.push(Command::SpeakText(report.feedback_text.clone()));
        commands.push(Command::SessionComplete(Box::new(report)));
        commands
    }

    fn reprompt(&self) -> Vec<Command> {
        match self.state.stage {
            Stage::Intro => vec![Command::SpeakText(self.welcome())],
            Stage::Teaching => self
                .current_unit()
                .map(|unit| vec![Command::SpeakText(unit.explanation)])
                .unwrap_or_default(),
            Stage::Dialogue => {
                debug_assert_eq!(self.state.dialogue.turn(), Turn::Student);
                self.state
                    .dialogue
                    .last_line()
                    .map(|line| vec![Command::SpeakText(line.to_string())])
                    .unwrap_or_default()
            }
            Stage::Concluded => vec![Command::LessonCompleted],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration as ChronoDuration, TimeZone};

    fn t0() -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000, 0).unwrap()
    }

    fn started() -> LessonSession {
        let mut session = LessonSession::new(LessonCatalog::default_lesson());
        session.start(t0());
        session
    }

    fn speech(commands: &[Command]) -> Vec<&str> {
        commands.iter().filter_map(Command::speech).collect()
    }

    #[test]
    fn starts_in_intro_and_greets() {
        let mut session = LessonSession::new(LessonCatalog::default_lesson());
        let commands = session.start(t0());
        assert_eq!(session.stage(), Stage::Intro);
        assert!(speech(&commands)[0].starts_with("Welcome!"));
        assert_eq!(session.state().started_at(), Some(t0()));
    }

    #[test]
    fn advance_in_intro_is_a_fixed_message() {
        let mut session = started();
        let commands = session.advance();
        assert_eq!(session.stage(), Stage::Intro);
        assert!(speech(&commands)[0].contains("hasn't started"));
    }

    #[test]
    fn first_utterance_begins_teaching() {
        let mut session = started();
        let commands = session.handle_utterance("hallo");
        assert_eq!(session.stage(), Stage::Teaching);
        assert_eq!(session.current_index(), 0);
        assert!(speech(&commands)[0].starts_with("Phrase 1 of 6"));
    }

    #[test]
    fn match_replies_then_schedules_follow_up() {
        let mut session = started();
        session.begin_teaching();

        let commands = session.submit_attempt("Hallo");
        assert!(speech(&commands)[0].starts_with("Great job!"));
        assert_eq!(
            commands[1],
            Command::ScheduleAdvance {
                after: DEFAULT_ADVANCE_DELAY,
                from_index: 0
            }
        );
        assert_eq!(session.current_index(), 0);

        let commands = session.on_scheduled_advance(0);
        assert_eq!(session.current_index(), 1);
        assert!(speech(&commands)[0].starts_with("Phrase 2 of 6"));
    }

    #[test]
    fn stale_follow_up_is_dropped() {
        let mut session = started();
        session.begin_teaching();
        session.submit_attempt("Hallo");
        // The student speaks again before the follow-up fires.
        session.submit_attempt("weiter");
        assert_eq!(session.current_index(), 1);

        assert!(session.on_scheduled_advance(0).is_empty());
        assert_eq!(session.current_index(), 1);
    }

    #[test]
    fn third_miss_gives_up_and_schedules_advance() {
        let mut session = started();
        session.begin_teaching();

        for left in [2, 1] {
            let commands = session.submit_attempt("nein");
            assert!(speech(&commands)[0].contains(&format!("({left} attempts left)")));
            assert_eq!(commands.len(), 1);
        }
        let commands = session.submit_attempt("nein");
        assert!(matches!(commands[1], Command::ScheduleAdvance { from_index: 0, .. }));
        assert_eq!(session.tracker().mistakes().len(), 1);
    }

    #[test]
    fn advancing_past_last_phrase_enters_dialogue() {
        let mut session = started();
        session.begin_teaching();
        for _ in 0..session.catalog().phrases().len() - 1 {
            session.advance();
        }
        assert_eq!(session.current_index(), 5);
        assert_eq!(session.stage(), Stage::Teaching);

        let commands = session.advance();
        assert_eq!(session.stage(), Stage::Dialogue);
        assert!(speech(&commands)[0].contains("I'll start"));
        assert!(session.current_unit().is_none());
    }

    #[test]
    fn advance_in_dialogue_moves_exchange_forward() {
        let mut session = started();
        session.begin_teaching();
        for _ in 0..session.catalog().phrases().len() {
            session.advance();
        }
        assert_eq!(session.stage(), Stage::Dialogue);
        assert_eq!(session.state().dialogue().used_phrases(), ["Hallo"]);

        // Nothing learned: the pool is the first two catalog phrases.
        let commands = session.advance();
        assert_eq!(speech(&commands), ["Let's move on. Next: \"Wie geht es dir?\" Your turn."]);
        assert_eq!(session.stage(), Stage::Dialogue);

        let commands = session.advance();
        assert_eq!(session.stage(), Stage::Concluded);
        assert!(matches!(commands.last(), Some(Command::SessionComplete(_))));
    }

    #[test]
    fn deadline_grace_forces_dialogue() {
        let mut session = started();
        session.begin_teaching();

        let check = session.check_time_remaining(t0() + ChronoDuration::seconds(100));
        assert_eq!(check.remaining_seconds, 500);
        assert!(check.commands.is_empty());
        assert_eq!(session.stage(), Stage::Teaching);

        let check = session.check_time_remaining(t0() + ChronoDuration::seconds(490));
        assert_eq!(check.remaining_seconds, 110);
        assert_eq!(session.stage(), Stage::Dialogue);
        assert!(speech(&check.commands)[0].contains("almost out of time"));
    }

    #[test]
    fn deadline_concludes() {
        let mut session = started();
        let check = session.check_time_remaining(t0() + ChronoDuration::seconds(601));
        assert_eq!(check.remaining_seconds, 0);
        assert_eq!(session.stage(), Stage::Concluded);
        assert!(matches!(check.commands.last(), Some(Command::SessionComplete(_))));

        let again = session.check_time_remaining(t0() + ChronoDuration::seconds(700));
        assert!(again.commands.is_empty());
    }

    #[test]
    fn time_check_before_start_reports_full_budget() {
        let mut session = LessonSession::new(LessonCatalog::default_lesson());
        let check = session.check_time_remaining(t0());
        assert_eq!(check.remaining_seconds, 600);
        assert!(check.commands.is_empty());
    }

    #[test]
    fn concluded_session_ignores_teaching_operations() {
        let mut session = started();
        session.begin_teaching();
        session.conclude();

        assert_eq!(session.submit_attempt("Hallo"), vec![Command::LessonCompleted]);
        assert_eq!(session.advance(), vec![Command::LessonCompleted]);
        assert_eq!(session.handle_utterance("hi"), vec![Command::LessonCompleted]);
        assert_eq!(session.begin_teaching(), vec![Command::LessonCompleted]);
        assert_eq!(session.tracker().total_attempts(), 0);
    }

    #[test]
    fn backward_transition_is_refused() {
        let mut state = SessionState::default();
        assert!(state.transition(Stage::Dialogue));
        assert!(!state.transition(Stage::Teaching));
        assert_eq!(state.stage(), Stage::Dialogue);
    }

    #[test]
    fn snapshot_serializes() {
        let mut session = started();
        session.begin_teaching();
        let json = serde_json::to_value(session.snapshot()).unwrap();
        assert_eq!(json["state"]["stage"], "TEACHING");
        assert_eq!(json["currentUnit"]["phrase"]["text"], "Hallo");
        assert!(json["report"].is_null());
    }
}
