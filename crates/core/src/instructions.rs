//! Instructions for the external conversational model.
//!
//! The model speaks with the student; these instructions tell it what the
//! lesson covers and that progress is driven through the lesson tools.

use crate::catalog::LessonCatalog;

fn bullets<I, S>(items: I) -> String
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let lines: Vec<String> = items
        .into_iter()
        .map(|item| format!("- {}", item.as_ref()))
        .collect();
    if lines.is_empty() {
        "- (none)".to_string()
    } else {
        lines.join("\n")
    }
}

/// Renders the teaching instructions for a lesson.
pub fn build(catalog: &LessonCatalog) -> String {
    let target = catalog.target_language();
    let native = catalog.native_language();

    let vocabulary = bullets(catalog.vocabulary().iter().map(|item| {
        match (&item.translation, &item.pronunciation) {
            (Some(t), Some(p)) => format!("{} ({}), pronounced {}", item.word, t, p),
            (Some(t), None) => format!("{} ({})", item.word, t),
            _ => item.word.clone(),
        }
    }));
    let phrases = bullets(catalog.phrases().iter().map(|p| {
        if p.meaning.is_empty() {
            p.text.clone()
        } else {
            format!("{} = {}", p.text, p.meaning)
        }
    }));

    format!(
        r#"You are a friendly language teacher specializing in {target}.

LESSON CONTEXT:
- Lesson: {title}
- Target Language: {target}
- Student's Native Language: {native}
- Lesson Content: {description}
- Duration: {minutes} minutes

LEARNING OBJECTIVES:
{objectives}

VOCABULARY TO COVER:
{vocabulary}

PHRASES TO TEACH, IN ORDER:
{phrases}

GRAMMAR TO COVER:
{grammar}

TEACHING APPROACH:
1. Speak primarily in {target}, but use {native} for explanations when needed
2. Encourage the student to speak in {target}
3. Correct pronunciation and grammar gently
4. Be patient and encouraging, and adapt your speaking speed to the student

LESSON TOOLS:
- Call `start_teaching` once the student has been greeted.
- Pass every attempt the student makes at a phrase to `submit_attempt` and say the reply it returns.
- Call `check_time` regularly; the lesson moves to conversation practice when time runs short.
- Rate participation with `set_engagement` (1-10) and skills with `record_progress` before concluding.
- Call `conclude_lesson` at the end and summarize the returned feedback for the student.
"#,
        title = catalog.title(),
        description = catalog.description(),
        minutes = catalog.duration_seconds().div_ceil(60),
        objectives = bullets(catalog.objectives()),
        grammar = bullets(catalog.grammar_points()),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn instructions_list_lesson_content() {
        let catalog = LessonCatalog::default_lesson();
        let text = build(&catalog);
        assert!(text.contains("specializing in German"));
        assert!(text.contains("- danke (thank you), pronounced DAHN-kuh"));
        assert!(text.contains("- Wie geht es dir? = How are you?"));
        assert!(text.contains("- Dative pronoun mir"));
        assert!(text.contains("Duration: 10 minutes"));
    }
}
