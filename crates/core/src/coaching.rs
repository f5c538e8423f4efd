//! Teaching aids answered from the lesson catalog: pronunciation hints,
//! translations, grammar notes and practice suggestions.

use crate::catalog::LessonCatalog;
use crate::progress::ProgressTracker;
use crate::session::Stage;

pub fn pronunciation_hint(catalog: &LessonCatalog, word: &str) -> String {
    match catalog
        .vocabulary_item(word)
        .and_then(|item| item.pronunciation.as_deref().map(|p| (item, p)))
    {
        Some((item, pronunciation)) => format!(
            "The word '{}' is pronounced: {}. Try saying it again!",
            item.word, pronunciation
        ),
        None => format!(
            "Let's work on '{}'. Try breaking it down syllable by syllable, then say it slowly as one word.",
            word.trim()
        ),
    }
}

pub fn translation(catalog: &LessonCatalog, text: &str) -> String {
    match catalog.translate(text) {
        Some(meaning) => format!(
            "'{}' means '{}' in {}.",
            text.trim(),
            meaning,
            catalog.native_language()
        ),
        None => format!(
            "'{}' isn't part of this lesson, so I don't have a translation ready.",
            text.trim()
        ),
    }
}

pub fn grammar_note(catalog: &LessonCatalog, topic: &str) -> String {
    let examples = catalog.phrases_with_grammar(topic);
    if examples.is_empty() {
        return format!(
            "{} isn't one of today's grammar points. Today we cover: {}.",
            topic.trim(),
            catalog.grammar_points().join(", ")
        );
    }
    let quoted: Vec<String> = examples
        .iter()
        .map(|p| {
            if p.meaning.is_empty() {
                format!("\"{}\"", p.text)
            } else {
                format!("\"{}\" ({})", p.text, p.meaning)
            }
        })
        .collect();
    format!(
        "{} in {}: you can see it in {}.",
        topic.trim(),
        catalog.target_language(),
        quoted.join(" and ")
    )
}

/// Picks a practice activity that fits where the lesson stands.
pub fn suggest_activity(stage: Stage, tracker: &ProgressTracker) -> &'static str {
    match stage {
        Stage::Intro => "Let's warm up by greeting each other in the target language.",
        Stage::Teaching if !tracker.mistakes().is_empty() => {
            "Let's practice pronunciation of the key words you found tricky."
        }
        Stage::Teaching if tracker.phrases_learned().is_empty() => {
            "Let's practice using the new vocabulary in sentences."
        }
        Stage::Teaching => {
            "Would you like to try describing something using today's vocabulary?"
        }
        Stage::Dialogue => "How about we do a role-play conversation?",
        Stage::Concluded => "Let's have a conversation about the lesson topic next time.",
    }
}
