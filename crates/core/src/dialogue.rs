//! Dialogue Coordinator
//!
//! Runs the practice conversation at the end of a lesson. The agent and the
//! student strictly alternate: every agent line immediately hands the turn
//! back to the student, and the agent only ever uses each phrase once.

use crate::catalog::LessonCatalog;
use crate::progress::ProgressTracker;
use serde::Serialize;
use tracing::info;

/// Number of catalog phrases used when the student learned none.
const FALLBACK_PHRASES: usize = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Turn {
    Agent,
    Student,
}

/// The agent's contribution to one exchange.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DialogueStep {
    /// The agent spoke `phrase`; `prompt` is the full line to say.
    AgentLine { phrase: String, prompt: String },
    /// No unused phrases remain.
    Exhausted,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DialogueCoordinator {
    turn: Turn,
    pool: Vec<String>,
    used_phrases: Vec<String>,
    last_line: Option<String>,
}

impl Default for DialogueCoordinator {
    fn default() -> Self {
        Self {
            turn: Turn::Agent,
            pool: Vec::new(),
            used_phrases: Vec::new(),
            last_line: None,
        }
    }
}

impl DialogueCoordinator {
    /// Seeds the exchange and speaks the opening line.
    ///
    /// The agent draws on learned phrases in catalog order, or on the first
    /// catalog phrases when nothing was learned.
    pub fn open(&mut self, catalog: &LessonCatalog, tracker: &ProgressTracker) -> DialogueStep {
        self.pool = catalog
            .phrases()
            .iter()
            .filter(|p| tracker.is_learned(&p.text))
            .map(|p| p.text.clone())
            .collect();
        if self.pool.is_empty() {
            self.pool = catalog
                .phrases()
                .iter()
                .take(FALLBACK_PHRASES)
                .map(|p| p.text.clone())
                .collect();
        }
        self.used_phrases.clear();
        info!(pool = self.pool.len(), "Dialogue practice opened");

        match self.next_unused() {
            Some(phrase) => {
                let prompt = format!(
                    "Let's practice a short conversation with what you learned. I'll start: \"{phrase}\" Now it's your turn to answer."
                );
                self.speak(phrase, prompt)
            }
            None => DialogueStep::Exhausted,
        }
    }

    /// Acknowledges the student's reply and speaks the agent's next line.
    ///
    /// The reply is not assessed; it is only echoed back.
    pub fn respond(&mut self, student_response: &str) -> DialogueStep {
        match self.next_unused() {
            Some(phrase) => {
                let prompt = format!(
                    "You said: \"{}\". Well done! Next: \"{phrase}\" Your turn.",
                    student_response.trim()
                );
                self.speak(phrase, prompt)
            }
            None => {
                info!("Dialogue phrases exhausted");
                DialogueStep::Exhausted
            }
        }
    }

    /// Moves the exchange on without a student reply: the agent speaks its
    /// next line, or the pool is exhausted.
    pub fn skip(&mut self) -> DialogueStep {
        match self.next_unused() {
            Some(phrase) => {
                let prompt = format!("Let's move on. Next: \"{phrase}\" Your turn.");
                self.speak(phrase, prompt)
            }
            None => {
                info!("Dialogue phrases exhausted");
                DialogueStep::Exhausted
            }
        }
    }

    fn next_unused(&self) -> Option<String> {
        self.pool
            .iter()
            .find(|p| !self.used_phrases.contains(p))
            .cloned()
    }

    fn speak(&mut self, phrase: String, prompt: String) -> DialogueStep {
        self.used_phrases.push(phrase.clone());
        self.last_line = Some(prompt.clone());
        // The agent yields as soon as it has spoken.
        self.turn = Turn::Student;
        DialogueStep::AgentLine { phrase, prompt }
    }

    pub fn turn(&self) -> Turn {
        self.turn
    }

    pub fn used_phrases(&self) -> &[String] {
        &self.used_phrases
    }

    /// The most recent agent line, for re-prompting.
    pub fn last_line(&self) -> Option<&str> {
        self.last_line.as_deref()
    }
}
