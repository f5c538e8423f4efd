pub mod agent;
pub mod catalog;
pub mod clock;
pub mod coaching;
pub mod dialogue;
pub mod evaluator;
pub mod feedback;
pub mod instructions;
pub mod progress;
pub mod session;

use feedback::FeedbackReport;
use std::time::Duration;

/// Represents commands that the lesson core issues to an external runtime.
///
/// This enum is the only output of the state machine. The runtime speaks
/// text, schedules follow-up events and reports the end of the lesson; the
/// core itself never performs I/O or sleeps.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    /// Command the runtime to speak the given text to the student.
    SpeakText(String),
    /// Ask the runtime to call `LessonSession::on_scheduled_advance(from_index)`
    /// once `after` has elapsed.
    ScheduleAdvance { after: Duration, from_index: usize },
    /// The lesson concluded with this report.
    SessionComplete(Box<FeedbackReport>),
    /// The lesson was already over; nothing changed.
    LessonCompleted,
}

impl Command {
    /// The spoken text, if this command speaks.
    pub fn speech(&self) -> Option<&str> {
        match self {
            Command::SpeakText(text) => Some(text),
            _ => None,
        }
    }
}
