//! Feedback Generator
//!
//! Turns the final tracker state into the session-end report: a pass/fail
//! verdict, banded feedback per category and a list of phrases to review.

use crate::catalog::LessonCatalog;
use crate::progress::{ProgressTracker, ScoreCategory};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Minimum pronunciation accuracy, in percent, needed to pass.
pub const PASS_ACCURACY: f64 = 60.0;
/// Minimum number of phrases learned needed to pass.
pub const PASS_PHRASES_LEARNED: usize = 3;
/// Minimum engagement rating needed to pass.
pub const PASS_ENGAGEMENT: u8 = 5;
/// How many leading catalog phrases are considered for the review list.
pub const REVIEW_WINDOW: usize = 5;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeedbackReport {
    pub lesson_title: String,
    pub passed: bool,
    pub feedback_text: String,
    pub pronunciation_accuracy: f64,
    pub phrases_learned: usize,
    pub total_phrases: usize,
    pub vocabulary_learned: usize,
    pub grammar_learned: usize,
    pub engagement_score: u8,
    pub category_feedback: BTreeMap<ScoreCategory, String>,
    pub category_scores: BTreeMap<ScoreCategory, f32>,
    pub review_list: Vec<String>,
    pub mistakes: Vec<String>,
}

/// Percentage of successful attempts; 0 when nothing was attempted.
pub fn pronunciation_accuracy(tracker: &ProgressTracker) -> f64 {
    if tracker.total_attempts() == 0 {
        return 0.0;
    }
    100.0 * f64::from(tracker.successful_attempts()) / f64::from(tracker.total_attempts())
}

pub fn is_passing(accuracy: f64, phrases_learned: usize, engagement: u8) -> bool {
    accuracy >= PASS_ACCURACY
        && phrases_learned >= PASS_PHRASES_LEARNED
        && engagement >= PASS_ENGAGEMENT
}

/// Builds the report. Pure: the same inputs always give the same report.
pub fn generate(catalog: &LessonCatalog, tracker: &ProgressTracker) -> FeedbackReport {
    // The verdict is taken on the figure the report shows.
    let accuracy = (pronunciation_accuracy(tracker) * 10.0).round() / 10.0;
    let phrases_learned = tracker.phrases_learned().len();
    let engagement = tracker.engagement_score();
    let passed = is_passing(accuracy, phrases_learned, engagement);

    let review_list: Vec<String> = catalog
        .phrases()
        .iter()
        .take(REVIEW_WINDOW)
        .filter(|p| !tracker.is_learned(&p.text))
        .map(|p| p.text.clone())
        .collect();

    let mut category_feedback = BTreeMap::new();
    category_feedback.insert(
        ScoreCategory::Pronunciation,
        pronunciation_band(accuracy).to_string(),
    );
    category_feedback.insert(
        ScoreCategory::Vocabulary,
        vocabulary_band(share(
            tracker.vocabulary_learned().len(),
            catalog.vocabulary().len(),
        ))
        .to_string(),
    );
    category_feedback.insert(
        ScoreCategory::Grammar,
        grammar_band(share(
            tracker.grammar_learned().len(),
            catalog.grammar_points().len(),
        ))
        .to_string(),
    );
    category_feedback.insert(
        ScoreCategory::Participation,
        participation_band(engagement).to_string(),
    );

    let mut feedback_text = if passed {
        format!(
            "Congratulations, you passed \"{}\"! You learned {} of {} phrases with {:.0}% pronunciation accuracy.",
            catalog.title(),
            phrases_learned,
            catalog.phrases().len(),
            accuracy
        )
    } else {
        format!(
            "Not quite there yet with \"{}\": you learned {} of {} phrases with {:.0}% pronunciation accuracy. Keep practicing and try again!",
            catalog.title(),
            phrases_learned,
            catalog.phrases().len(),
            accuracy
        )
    };
    if !review_list.is_empty() {
        feedback_text.push_str(&format!(" Review: {}.", review_list.join(", ")));
    }

    FeedbackReport {
        lesson_title: catalog.title().to_string(),
        passed,
        feedback_text,
        pronunciation_accuracy: accuracy,
        phrases_learned,
        total_phrases: catalog.phrases().len(),
        vocabulary_learned: tracker.vocabulary_learned().len(),
        grammar_learned: tracker.grammar_learned().len(),
        engagement_score: engagement,
        category_feedback,
        category_scores: tracker.category_scores().clone(),
        review_list,
        mistakes: tracker.mistakes().to_vec(),
    }
}

fn share(learned: usize, total: usize) -> f64 {
    if total == 0 {
        return 0.0;
    }
    learned as f64 / total as f64
}

fn pronunciation_band(accuracy: f64) -> &'static str {
    if accuracy >= 80.0 {
        "Excellent pronunciation! Your phrases were clear and accurate."
    } else if accuracy >= 60.0 {
        "Good pronunciation, with some room to improve."
    } else {
        "Pronunciation needs more practice. Try repeating the phrases slowly."
    }
}

fn vocabulary_band(share: f64) -> &'static str {
    if share >= 0.8 {
        "You used nearly all of the lesson vocabulary."
    } else if share >= 0.5 {
        "You picked up a good share of the vocabulary."
    } else {
        "Review the vocabulary list before the next lesson."
    }
}

fn grammar_band(share: f64) -> &'static str {
    if share >= 0.8 {
        "You practiced all the key grammar points."
    } else if share >= 0.5 {
        "You met most of the grammar points; keep at the rest."
    } else {
        "Spend some time on the grammar points of this lesson."
    }
}

fn participation_band(engagement: u8) -> &'static str {
    match engagement {
        8.. => "Great participation throughout the lesson.",
        5..=7 => "Good participation; try to speak even more.",
        _ => "Try to speak up more in the next lesson.",
    }
}
