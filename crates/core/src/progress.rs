//! Progress Tracker
//!
//! Mutable per-session counters: attempts and successes per item, what the
//! student has learned, category scores, engagement and mistakes. A tracker
//! is owned by exactly one lesson session and dropped with it.

use crate::catalog::Phrase;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use tracing::{info, warn};

/// Upper bound of a category score.
pub const MAX_CATEGORY_SCORE: f32 = 10.0;

/// Rejected tracker updates. A rejected update never mutates the tracker.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ProgressError {
    #[error("Invalid category: '{0}'")]
    InvalidCategory(String),
    #[error("Score {0} is outside the range 0-10")]
    ScoreOutOfRange(f32),
    #[error("Engagement score {0} is outside the range 1-10")]
    EngagementOutOfRange(u8),
}

/// Skill areas that receive a score.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, JsonSchema,
)]
#[serde(rename_all = "lowercase")]
pub enum ScoreCategory {
    Vocabulary,
    Grammar,
    Pronunciation,
    Participation,
}

impl ScoreCategory {
    pub const ALL: [ScoreCategory; 4] = [
        ScoreCategory::Vocabulary,
        ScoreCategory::Grammar,
        ScoreCategory::Pronunciation,
        ScoreCategory::Participation,
    ];
}

impl fmt::Display for ScoreCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScoreCategory::Vocabulary => write!(f, "vocabulary"),
            ScoreCategory::Grammar => write!(f, "grammar"),
            ScoreCategory::Pronunciation => write!(f, "pronunciation"),
            ScoreCategory::Participation => write!(f, "participation"),
        }
    }
}

impl FromStr for ScoreCategory {
    type Err = ProgressError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "vocabulary" => Ok(ScoreCategory::Vocabulary),
            "grammar" => Ok(ScoreCategory::Grammar),
            "pronunciation" => Ok(ScoreCategory::Pronunciation),
            "participation" => Ok(ScoreCategory::Participation),
            _ => Err(ProgressError::InvalidCategory(s.to_string())),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressTracker {
    attempts_by_item: BTreeMap<String, u32>,
    successes_by_item: BTreeMap<String, bool>,
    total_attempts: u32,
    successful_attempts: u32,
    phrases_learned: Vec<String>,
    vocabulary_learned: Vec<String>,
    grammar_learned: Vec<String>,
    category_scores: BTreeMap<ScoreCategory, f32>,
    engagement_score: Option<u8>,
    mistakes: Vec<String>,
    /// Phrases behind `phrases_learned`, for rebuilding the vocabulary and
    /// grammar sets when one is un-learned.
    #[serde(skip)]
    learned_content: BTreeMap<String, Phrase>,
}

impl ProgressTracker {
    /// Counts one evaluated attempt on `item` and returns the attempts made
    /// on it so far.
    ///
    /// A failed attempt on a previously learned item un-learns it, together
    /// with any vocabulary and grammar only that item contributed, so the
    /// learned sets always reflect each item's latest result.
    pub fn register_attempt(&mut self, item: &str, matched: bool) -> u32 {
        let count = self.attempts_by_item.entry(item.to_string()).or_insert(0);
        *count += 1;
        let count = *count;

        self.total_attempts += 1;
        self.successes_by_item.insert(item.to_string(), matched);
        if matched {
            self.successful_attempts += 1;
        } else if self.is_learned(item) {
            self.phrases_learned.retain(|p| p != item);
            self.learned_content.remove(item);
            self.rebuild_learned_content();
        }
        count
    }

    /// Adds a phrase and its associated vocabulary and grammar to the
    /// learned sets, skipping entries already present.
    pub fn mark_learned(&mut self, phrase: &Phrase) {
        push_unique(&mut self.phrases_learned, &phrase.text);
        self.learned_content
            .entry(phrase.text.clone())
            .or_insert_with(|| phrase.clone());
        for word in &phrase.vocabulary {
            push_unique(&mut self.vocabulary_learned, word);
        }
        for point in &phrase.grammar_points {
            push_unique(&mut self.grammar_learned, point);
        }
    }

    fn rebuild_learned_content(&mut self) {
        let mut vocabulary = Vec::new();
        let mut grammar = Vec::new();
        for phrase in self
            .phrases_learned
            .iter()
            .filter_map(|text| self.learned_content.get(text))
        {
            for word in &phrase.vocabulary {
                push_unique(&mut vocabulary, word);
            }
            for point in &phrase.grammar_points {
                push_unique(&mut grammar, point);
            }
        }
        self.vocabulary_learned = vocabulary;
        self.grammar_learned = grammar;
    }

    pub fn add_mistake(&mut self, mistake: impl Into<String>) {
        self.mistakes.push(mistake.into());
    }

    /// Sets a category score from a free-form category name.
    pub fn update_score(&mut self, category: &str, score: f32) -> Result<ScoreCategory, ProgressError> {
        let category = category.parse::<ScoreCategory>().inspect_err(|e| {
            warn!(error = %e, "Rejected score update");
        })?;
        self.set_score(category, score)?;
        Ok(category)
    }

    pub fn set_score(&mut self, category: ScoreCategory, score: f32) -> Result<(), ProgressError> {
        if !(0.0..=MAX_CATEGORY_SCORE).contains(&score) {
            warn!(%category, score, "Rejected out-of-range score");
            return Err(ProgressError::ScoreOutOfRange(score));
        }
        self.category_scores.insert(category, score);
        info!(%category, score, "Category score updated");
        Ok(())
    }

    pub fn set_engagement(&mut self, score: u8) -> Result<(), ProgressError> {
        if !(1..=10).contains(&score) {
            warn!(score, "Rejected out-of-range engagement score");
            return Err(ProgressError::EngagementOutOfRange(score));
        }
        self.engagement_score = Some(score);
        info!(score, "Engagement score updated");
        Ok(())
    }

    pub fn attempts_for(&self, item: &str) -> u32 {
        self.attempts_by_item.get(item).copied().unwrap_or(0)
    }

    pub fn succeeded(&self, item: &str) -> bool {
        self.successes_by_item.get(item).copied().unwrap_or(false)
    }

    pub fn total_attempts(&self) -> u32 {
        self.total_attempts
    }

    pub fn successful_attempts(&self) -> u32 {
        self.successful_attempts
    }

    pub fn is_learned(&self, phrase: &str) -> bool {
        self.phrases_learned.iter().any(|p| p == phrase)
    }

    /// Learned phrases in the order they were learned.
    pub fn phrases_learned(&self) -> &[String] {
        &self.phrases_learned
    }

    pub fn vocabulary_learned(&self) -> &[String] {
        &self.vocabulary_learned
    }

    pub fn grammar_learned(&self) -> &[String] {
        &self.grammar_learned
    }

    pub fn category_score(&self, category: ScoreCategory) -> Option<f32> {
        self.category_scores.get(&category).copied()
    }

    pub fn category_scores(&self) -> &BTreeMap<ScoreCategory, f32> {
        &self.category_scores
    }

    /// The externally supplied engagement rating; 0 while unset.
    pub fn engagement_score(&self) -> u8 {
        self.engagement_score.unwrap_or(0)
    }

    pub fn mistakes(&self) -> &[String] {
        &self.mistakes
    }
}

fn push_unique(list: &mut Vec<String>, value: &str) {
    if !list.iter().any(|v| v == value) {
        list.push(value.to_string());
    }
}
