//! Attempt Evaluator
//!
//! Decides whether a transcribed student utterance is close enough to the
//! target phrase, and records the outcome against the progress tracker with a
//! fixed cap of three attempts per item.
//!
//! Matching is a text heuristic standing in for real pronunciation scoring.
//! It sits behind the [`AttemptEvaluator`] trait so that a phonetic scorer
//! can replace it without touching the stage machine.

use crate::catalog::Phrase;
use crate::progress::ProgressTracker;
use fuzzy_matcher::FuzzyMatcher;
use fuzzy_matcher::skim::SkimMatcherV2;
use serde::Serialize;
use std::collections::HashSet;
use tracing::{debug, info};

/// Failed attempts allowed on one item before the lesson moves on.
pub const MAX_ATTEMPTS: u32 = 3;

/// Lowercases and trims a string for comparison.
pub fn normalize(s: &str) -> String {
    s.trim().to_lowercase()
}

/// Splits a string into normalized word tokens, dropping punctuation at the
/// edges of each word.
pub fn tokens(s: &str) -> Vec<String> {
    normalize(s)
        .split_whitespace()
        .map(|t| t.trim_matches(|c: char| !c.is_alphanumeric()).to_string())
        .filter(|t| !t.is_empty())
        .collect()
}

/// A policy that decides whether a candidate utterance matches a target.
#[cfg_attr(test, mockall::automock)]
pub trait AttemptEvaluator: Send + Sync {
    fn matches(&self, target: &str, candidate: &str) -> bool;
}

/// Substring and token-overlap heuristic.
///
/// Matches when either normalized string contains the other, or, for
/// multi-word targets, when at least half of the target's tokens (rounded
/// down) appear in the candidate.
#[derive(Debug, Clone, Copy, Default)]
pub struct OverlapEvaluator;

impl AttemptEvaluator for OverlapEvaluator {
    fn matches(&self, target: &str, candidate: &str) -> bool {
        let target_norm = normalize(target);
        let candidate_norm = normalize(candidate);
        if target_norm.is_empty() || candidate_norm.is_empty() {
            return false;
        }
        if candidate_norm.contains(&target_norm) || target_norm.contains(&candidate_norm) {
            return true;
        }

        let target_tokens: HashSet<String> = tokens(target).into_iter().collect();
        if target_tokens.len() < 2 {
            return false;
        }
        let candidate_tokens: HashSet<String> = tokens(candidate).into_iter().collect();
        let overlap = target_tokens.intersection(&candidate_tokens).count();
        overlap >= target_tokens.len() / 2
    }
}

/// Character-subsequence matching using the skim fuzzy matcher.
///
/// More forgiving of transcription typos than [`OverlapEvaluator`]: the
/// shorter string must appear in order inside the longer one and cover at
/// least `min_coverage` of the target's length.
pub struct FuzzyEvaluator {
    matcher: SkimMatcherV2,
    min_coverage: f64,
}

impl FuzzyEvaluator {
    pub fn new(min_coverage: f64) -> Self {
        Self {
            matcher: SkimMatcherV2::default(),
            min_coverage,
        }
    }
}

impl Default for FuzzyEvaluator {
    fn default() -> Self {
        Self::new(0.5)
    }
}

impl AttemptEvaluator for FuzzyEvaluator {
    fn matches(&self, target: &str, candidate: &str) -> bool {
        let target_norm = normalize(target);
        let candidate_norm = normalize(candidate);
        let target_len = target_norm.chars().count();
        let candidate_len = candidate_norm.chars().count();
        if target_len == 0 || candidate_len == 0 {
            return false;
        }

        let (longer, shorter, shorter_len) = if target_len >= candidate_len {
            (&target_norm, &candidate_norm, candidate_len)
        } else {
            (&candidate_norm, &target_norm, target_len)
        };
        let coverage = shorter_len as f64 / target_len as f64;
        coverage >= self.min_coverage && self.matcher.fuzzy_match(longer, shorter).is_some()
    }
}

/// What the caller should do after an attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AttemptVerdict {
    /// The attempt matched; the item is learned.
    Matched,
    /// Re-prompt with the same target.
    Retry,
    /// The attempt cap is reached; give up on the item and advance.
    Advance,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AttemptResult {
    pub matched: bool,
    pub attempts_so_far: u32,
    pub verdict: AttemptVerdict,
}

impl AttemptResult {
    pub fn attempts_left(&self) -> u32 {
        MAX_ATTEMPTS.saturating_sub(self.attempts_so_far)
    }
}

/// Applies an evaluation policy and books the result in a tracker.
pub struct Assessor {
    evaluator: Box<dyn AttemptEvaluator>,
}

impl Default for Assessor {
    fn default() -> Self {
        Self::new(OverlapEvaluator)
    }
}

impl Assessor {
    pub fn new(evaluator: impl AttemptEvaluator + 'static) -> Self {
        Self {
            evaluator: Box::new(evaluator),
        }
    }

    pub fn evaluate(&self, target: &str, candidate: &str) -> bool {
        let matched = self.evaluator.matches(target, candidate);
        debug!(%target, %candidate, matched, "Evaluated attempt");
        matched
    }

    /// Evaluates `candidate` against `phrase` and records the attempt.
    ///
    /// A match marks the phrase (with its vocabulary and grammar) as learned.
    /// A miss asks for a retry until the third attempt, which records a
    /// mistake and tells the caller to move on.
    pub fn record_attempt(
        &self,
        tracker: &mut ProgressTracker,
        phrase: &Phrase,
        candidate: &str,
    ) -> AttemptResult {
        let matched = self.evaluate(&phrase.text, candidate);
        let attempts_so_far = tracker.register_attempt(&phrase.text, matched);

        let verdict = if matched {
            tracker.mark_learned(phrase);
            AttemptVerdict::Matched
        } else if attempts_so_far < MAX_ATTEMPTS {
            AttemptVerdict::Retry
        } else {
            if attempts_so_far == MAX_ATTEMPTS {
                tracker.add_mistake(format!(
                    "Could not produce \"{}\" after {} attempts (last try: \"{}\")",
                    phrase.text,
                    MAX_ATTEMPTS,
                    candidate.trim()
                ));
            }
            AttemptVerdict::Advance
        };

        info!(item = %phrase.text, attempts = attempts_so_far, ?verdict, "Recorded attempt");
        AttemptResult {
            matched,
            attempts_so_far,
            verdict,
        }
    }
}
