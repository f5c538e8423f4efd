//! Lesson Catalog
//!
//! This module holds the immutable curriculum for a single lesson: vocabulary,
//! phrases and grammar points in teaching order, together with the language
//! pair and the wall-clock budget. A catalog is decoded once from session
//! metadata; anything that fails to decode or validate is replaced by the
//! built-in default lesson so that a session can always start.

use crate::evaluator::{normalize, tokens};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use tracing::{info, warn};

/// Lesson length used when the metadata does not specify one.
pub const DEFAULT_DURATION_SECS: u64 = 600;

/// Reasons a lesson payload cannot be turned into a catalog.
#[derive(Debug, thiserror::Error)]
pub enum CatalogError {
    #[error("Failed to decode lesson metadata: {0}")]
    Decode(#[from] serde_json::Error),
    #[error("Lesson has no {0}")]
    Empty(&'static str),
    #[error("Lesson duration must be greater than zero")]
    InvalidDuration,
}

/// Why the default lesson stood in for the requested one.
#[derive(Debug)]
pub struct Fallback {
    /// Title of the rejected lesson, when the payload named one.
    pub requested: Option<String>,
    /// `None` when no metadata was supplied at all.
    pub reason: Option<CatalogError>,
}

impl fmt::Display for Fallback {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.requested {
            Some(title) => write!(f, "Lesson \"{title}\" replaced by the default lesson")?,
            None => write!(f, "Lesson metadata replaced by the default lesson")?,
        }
        match &self.reason {
            Some(reason) => write!(f, ": {reason}"),
            None => write!(f, ": no metadata provided"),
        }
    }
}

/// A single vocabulary word with optional learner hints.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct VocabularyItem {
    pub word: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub translation: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pronunciation: Option<String>,
}

impl VocabularyItem {
    pub fn new(word: impl Into<String>) -> Self {
        Self {
            word: word.into(),
            translation: None,
            pronunciation: None,
        }
    }
}

/// A teachable phrase and the vocabulary and grammar it exercises.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Phrase {
    pub text: String,
    pub meaning: String,
    pub vocabulary: Vec<String>,
    pub grammar_points: Vec<String>,
}

/// The content presented to the student for one step of the teaching stage.
#[derive(Debug, Clone, PartialEq, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct TeachingUnit {
    pub index: usize,
    pub total: usize,
    pub phrase: Phrase,
    pub vocabulary: Vec<VocabularyItem>,
    pub explanation: String,
}

// --- Lesson input payload ---

/// A vocabulary entry as it arrives in session metadata: either a bare word
/// or an object carrying translation and pronunciation.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum VocabularyEntry {
    Word(String),
    Detailed(VocabularyItem),
}

/// A phrase entry as it arrives in session metadata.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum PhraseEntry {
    Text(String),
    Detailed(PhraseInput),
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PhraseInput {
    pub text: String,
    #[serde(default)]
    pub meaning: Option<String>,
    #[serde(default)]
    pub vocabulary: Vec<String>,
    #[serde(default, alias = "grammar")]
    pub grammar_points: Vec<String>,
}

/// The structured lesson payload carried in session metadata.
///
/// Every field is optional on the wire; validation happens when the payload
/// is converted into a [`LessonCatalog`].
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LessonInput {
    pub title: Option<String>,
    #[serde(alias = "content")]
    pub description: Option<String>,
    pub target_language: Option<String>,
    pub native_language: Option<String>,
    pub language_code: Option<String>,
    pub duration_seconds: Option<u64>,
    pub objectives: Vec<String>,
    pub vocabulary: Vec<VocabularyEntry>,
    pub phrases: Vec<PhraseEntry>,
    pub phrase_meanings: HashMap<String, String>,
    #[serde(alias = "grammar", alias = "grammer")]
    pub grammar_points: Vec<String>,
}

// --- Catalog ---

/// Immutable curriculum for one lesson.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LessonCatalog {
    title: String,
    description: String,
    target_language: String,
    native_language: String,
    language_code: String,
    duration_seconds: u64,
    objectives: Vec<String>,
    vocabulary: Vec<VocabularyItem>,
    phrases: Vec<Phrase>,
    grammar_points: Vec<String>,
}

impl LessonCatalog {
    /// Builds a catalog from raw session metadata.
    ///
    /// Missing, malformed or invalid metadata never fails the session: the
    /// built-in default lesson is used instead, and the substitution is
    /// logged.
    pub fn from_metadata(raw: Option<&str>) -> Self {
        let (catalog, fallback) = Self::load(raw);
        match fallback {
            None => info!(
                title = %catalog.title,
                language = %catalog.target_language,
                phrases = catalog.phrases.len(),
                "Loaded lesson from metadata"
            ),
            Some(Fallback { requested: None, reason: None }) => {
                info!("No lesson metadata provided, using the default lesson")
            }
            Some(fallback) => warn!(
                requested = fallback.requested.as_deref().unwrap_or("untitled"),
                replacement = %catalog.title,
                "{fallback}"
            ),
        }
        catalog
    }

    /// Like [`from_metadata`](Self::from_metadata), but returns the reason
    /// the default lesson was substituted instead of logging it.
    pub fn load(raw: Option<&str>) -> (Self, Option<Fallback>) {
        let Some(raw) = raw.map(str::trim).filter(|r| !r.is_empty()) else {
            return (
                Self::default_lesson(),
                Some(Fallback {
                    requested: None,
                    reason: None,
                }),
            );
        };

        let input: LessonInput = match serde_json::from_str(raw) {
            Ok(input) => input,
            Err(e) => {
                return (
                    Self::default_lesson(),
                    Some(Fallback {
                        requested: None,
                        reason: Some(CatalogError::Decode(e)),
                    }),
                );
            }
        };
        let requested = input.title.clone();
        match Self::try_from_input(input) {
            Ok(catalog) => (catalog, None),
            Err(e) => (
                Self::default_lesson(),
                Some(Fallback {
                    requested,
                    reason: Some(e),
                }),
            ),
        }
    }

    /// Decodes and validates a JSON lesson payload.
    pub fn parse(raw: &str) -> Result<Self, CatalogError> {
        let input: LessonInput = serde_json::from_str(raw)?;
        Self::try_from_input(input)
    }

    /// Validates a decoded payload and resolves phrase associations.
    ///
    /// Phrases given as plain text pick up their meaning from
    /// `phraseMeanings` and their vocabulary from the lesson words they
    /// contain. When no phrases are given at all, each vocabulary word is
    /// taught as a one-word phrase.
    pub fn try_from_input(input: LessonInput) -> Result<Self, CatalogError> {
        let vocabulary: Vec<VocabularyItem> = input
            .vocabulary
            .into_iter()
            .map(|entry| match entry {
                VocabularyEntry::Word(word) => VocabularyItem::new(word),
                VocabularyEntry::Detailed(item) => item,
            })
            .filter(|item| !item.word.trim().is_empty())
            .collect();
        if vocabulary.is_empty() {
            return Err(CatalogError::Empty("vocabulary"));
        }

        let mut phrases: Vec<Phrase> = input
            .phrases
            .into_iter()
            .map(|entry| match entry {
                PhraseEntry::Text(text) => Phrase {
                    meaning: input.phrase_meanings.get(&text).cloned().unwrap_or_default(),
                    vocabulary: words_in(&text, &vocabulary),
                    grammar_points: Vec::new(),
                    text,
                },
                PhraseEntry::Detailed(p) => Phrase {
                    meaning: p
                        .meaning
                        .or_else(|| input.phrase_meanings.get(&p.text).cloned())
                        .unwrap_or_default(),
                    vocabulary: if p.vocabulary.is_empty() {
                        words_in(&p.text, &vocabulary)
                    } else {
                        p.vocabulary
                    },
                    grammar_points: p.grammar_points,
                    text: p.text,
                },
            })
            .filter(|p| !p.text.trim().is_empty())
            .collect();
        if phrases.is_empty() {
            phrases = vocabulary
                .iter()
                .map(|item| Phrase {
                    text: item.word.clone(),
                    meaning: item.translation.clone().unwrap_or_default(),
                    vocabulary: vec![item.word.clone()],
                    grammar_points: Vec::new(),
                })
                .collect();
        }

        if input.grammar_points.is_empty() {
            return Err(CatalogError::Empty("grammar points"));
        }
        let duration_seconds = input.duration_seconds.unwrap_or(DEFAULT_DURATION_SECS);
        if duration_seconds == 0 {
            return Err(CatalogError::InvalidDuration);
        }

        let target_language = input.target_language.unwrap_or_else(|| "German".into());
        Ok(Self {
            title: input
                .title
                .unwrap_or_else(|| format!("{target_language} lesson")),
            description: input.description.unwrap_or_default(),
            language_code: input.language_code.unwrap_or_else(|| "de".into()),
            native_language: input.native_language.unwrap_or_else(|| "English".into()),
            target_language,
            duration_seconds,
            objectives: input.objectives,
            vocabulary,
            phrases,
            grammar_points: input.grammar_points,
        })
    }

    /// The lesson used whenever session metadata is unusable.
    pub fn default_lesson() -> Self {
        let vocab = |word: &str, translation: &str, pronunciation: &str| VocabularyItem {
            word: word.into(),
            translation: Some(translation.into()),
            pronunciation: Some(pronunciation.into()),
        };
        let phrase = |text: &str, meaning: &str, vocabulary: &[&str], grammar: &[&str]| Phrase {
            text: text.into(),
            meaning: meaning.into(),
            vocabulary: vocabulary.iter().map(|w| w.to_string()).collect(),
            grammar_points: grammar.iter().map(|g| g.to_string()).collect(),
        };

        Self {
            title: "Greetings and Introductions".into(),
            description: "Basic greetings, asking how someone is, and introducing yourself".into(),
            target_language: "German".into(),
            native_language: "English".into(),
            language_code: "de".into(),
            duration_seconds: DEFAULT_DURATION_SECS,
            objectives: vec![
                "Greet someone and say goodbye".into(),
                "Ask and answer how someone is".into(),
                "Introduce yourself by name".into(),
            ],
            vocabulary: vec![
                vocab("hallo", "hello", "HAH-loh"),
                vocab("gut", "good", "goot"),
                vocab("danke", "thank you", "DAHN-kuh"),
                vocab("ich", "I", "ikh"),
                vocab("heiße", "am called", "HY-suh"),
                vocab("bitte", "please / you're welcome", "BIT-tuh"),
                vocab("tschüss", "bye", "chuess"),
            ],
            phrases: vec![
                phrase("Hallo", "Hello", &["hallo"], &[]),
                phrase(
                    "Wie geht es dir?",
                    "How are you?",
                    &[],
                    &["Informal address with du/dir", "Question word order"],
                ),
                phrase(
                    "Mir geht es gut, danke",
                    "I'm fine, thanks",
                    &["gut", "danke"],
                    &["Dative pronoun mir"],
                ),
                phrase(
                    "Ich heiße Anna",
                    "My name is Anna",
                    &["ich", "heiße"],
                    &["Verb in second position"],
                ),
                phrase("Bitte schön", "You're welcome", &["bitte"], &[]),
                phrase("Tschüss, bis morgen", "Bye, see you tomorrow", &["tschüss"], &[]),
            ],
            grammar_points: vec![
                "Informal address with du/dir".into(),
                "Question word order".into(),
                "Dative pronoun mir".into(),
                "Verb in second position".into(),
            ],
        }
    }

    pub fn title(&self) -> &str {
        &self.title
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn target_language(&self) -> &str {
        &self.target_language
    }

    pub fn native_language(&self) -> &str {
        &self.native_language
    }

    pub fn language_code(&self) -> &str {
        &self.language_code
    }

    pub fn duration_seconds(&self) -> u64 {
        self.duration_seconds
    }

    pub fn objectives(&self) -> &[String] {
        &self.objectives
    }

    pub fn vocabulary(&self) -> &[VocabularyItem] {
        &self.vocabulary
    }

    pub fn phrases(&self) -> &[Phrase] {
        &self.phrases
    }

    pub fn grammar_points(&self) -> &[String] {
        &self.grammar_points
    }

    /// Bounds-checked phrase lookup; `None` means the content is exhausted.
    pub fn phrase(&self, index: usize) -> Option<&Phrase> {
        self.phrases.get(index)
    }

    /// Finds a vocabulary item by word, ignoring case.
    pub fn vocabulary_item(&self, word: &str) -> Option<&VocabularyItem> {
        let word = normalize(word);
        self.vocabulary.iter().find(|item| normalize(&item.word) == word)
    }

    /// Finds a phrase by its text, ignoring case and surrounding whitespace.
    pub fn find_phrase(&self, text: &str) -> Option<&Phrase> {
        let text = normalize(text);
        self.phrases.iter().find(|p| normalize(&p.text) == text)
    }

    /// Meaning of a known phrase, or translation of a known word.
    pub fn translate(&self, text: &str) -> Option<&str> {
        if let Some(phrase) = self.find_phrase(text).filter(|p| !p.meaning.is_empty()) {
            return Some(&phrase.meaning);
        }
        self.vocabulary_item(text)
            .and_then(|item| item.translation.as_deref())
    }

    /// Phrases exercising the given grammar point, in catalog order.
    pub fn phrases_with_grammar(&self, topic: &str) -> Vec<&Phrase> {
        let topic = normalize(topic);
        self.phrases
            .iter()
            .filter(|p| p.grammar_points.iter().any(|g| normalize(g) == topic))
            .collect()
    }

    /// Builds the teachable unit for the phrase at `index`.
    pub fn teaching_unit(&self, index: usize) -> Option<TeachingUnit> {
        let phrase = self.phrase(index)?;
        let vocabulary: Vec<VocabularyItem> = phrase
            .vocabulary
            .iter()
            .map(|w| {
                self.vocabulary_item(w)
                    .cloned()
                    .unwrap_or_else(|| VocabularyItem::new(w.as_str()))
            })
            .collect();

        let mut explanation = format!(
            "Phrase {} of {}: \"{}\"",
            index + 1,
            self.phrases.len(),
            phrase.text
        );
        if !phrase.meaning.is_empty() {
            explanation.push_str(&format!(" means \"{}\".", phrase.meaning));
        } else {
            explanation.push('.');
        }
        if !vocabulary.is_empty() {
            let words: Vec<String> = vocabulary
                .iter()
                .map(|item| match &item.translation {
                    Some(t) => format!("{} ({})", item.word, t),
                    None => item.word.clone(),
                })
                .collect();
            explanation.push_str(&format!(" Words: {}.", words.join(", ")));
        }
        if !phrase.grammar_points.is_empty() {
            explanation.push_str(&format!(" Grammar: {}.", phrase.grammar_points.join("; ")));
        }
        explanation.push_str(&format!(" Please repeat after me: {}", phrase.text));

        Some(TeachingUnit {
            index,
            total: self.phrases.len(),
            phrase: phrase.clone(),
            vocabulary,
            explanation,
        })
    }
}

/// Lesson words that occur as whole tokens in `text`, in vocabulary order.
fn words_in(text: &str, vocabulary: &[VocabularyItem]) -> Vec<String> {
    let text_tokens = tokens(text);
    vocabulary
        .iter()
        .filter(|item| {
            let word_tokens = tokens(&item.word);
            !word_tokens.is_empty()
                && text_tokens
                    .windows(word_tokens.len())
                    .any(|window| window == word_tokens.as_slice())
        })
        .map(|item| item.word.clone())
        .collect()
}
