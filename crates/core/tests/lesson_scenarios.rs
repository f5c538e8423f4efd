use chrono::{DateTime, Duration, TimeZone, Utc};
use lingua_core::Command;
use lingua_core::catalog::LessonCatalog;
use lingua_core::evaluator::{AttemptEvaluator, AttemptVerdict, Assessor, OverlapEvaluator};
use lingua_core::progress::ProgressTracker;
use lingua_core::session::{LessonSession, Stage};

fn t0() -> DateTime<Utc> {
    Utc.timestamp_opt(1_700_000_000, 0).unwrap()
}

fn german_lesson() -> LessonCatalog {
    LessonCatalog::parse(
        r#"{
            "title": "Small talk",
            "targetLanguage": "German",
            "vocabulary": ["hallo", "gut", "danke"],
            "phrases": [
                {"text": "Hallo", "meaning": "Hello", "grammarPoints": []},
                {"text": "Wie geht es dir", "meaning": "How are you", "grammarPoints": ["Informal du"]},
                {"text": "Mir geht es gut", "meaning": "I'm fine", "grammarPoints": ["Dative mir"]},
                {"text": "Danke schön", "meaning": "Thank you very much", "grammarPoints": []}
            ],
            "grammarPoints": ["Informal du", "Dative mir"],
            "durationSeconds": 600
        }"#,
    )
    .expect("valid lesson")
}

fn speech(commands: &[Command]) -> Vec<String> {
    commands
        .iter()
        .filter_map(Command::speech)
        .map(str::to_string)
        .collect()
}

#[test]
fn exact_and_partial_matches() {
    assert!(OverlapEvaluator.matches("Hallo", "hallo"));
    assert!(OverlapEvaluator.matches("Wie geht es dir", "geht es"));
}

#[test]
fn attempt_cap_never_allows_a_fourth_retry() {
    let catalog = german_lesson();
    let assessor = Assessor::default();
    for phrase in catalog.phrases() {
        let mut tracker = ProgressTracker::default();
        let verdicts: Vec<AttemptVerdict> = (0..5)
            .map(|_| assessor.record_attempt(&mut tracker, phrase, "xyz").verdict)
            .collect();
        assert_eq!(
            verdicts,
            [
                AttemptVerdict::Retry,
                AttemptVerdict::Retry,
                AttemptVerdict::Advance,
                AttemptVerdict::Advance,
                AttemptVerdict::Advance,
            ]
        );
    }
}

#[test]
fn full_lesson_concludes_after_dialogue_exhaustion() {
    let mut session = LessonSession::new(german_lesson());
    session.start(t0());
    session.handle_utterance("hallo, ich bin bereit");
    assert_eq!(session.stage(), Stage::Teaching);

    // Phrase 1 first try, phrase 2 on the second try, phrase 3 first try,
    // phrase 4 given up.
    session.handle_utterance("Hallo");
    session.advance();
    session.handle_utterance("guten tag");
    session.handle_utterance("wie geht es dir");
    session.advance();
    session.handle_utterance("mir geht es gut");
    session.advance();
    for _ in 0..3 {
        session.handle_utterance("bitte");
    }
    let commands = session.advance();
    assert_eq!(session.stage(), Stage::Dialogue);
    assert!(speech(&commands)[0].contains("\"Hallo\""));

    session.set_engagement(6).unwrap();

    // Three learned phrases: the opener plus two more agent lines.
    let commands = session.continue_dialogue("Hallo!");
    assert!(speech(&commands)[0].contains("Wie geht es dir"));
    let commands = session.continue_dialogue("Gut, danke");
    assert!(speech(&commands)[0].contains("Mir geht es gut"));
    assert_eq!(session.stage(), Stage::Dialogue);

    let commands = session.continue_dialogue("Super");
    assert_eq!(session.stage(), Stage::Concluded);
    let Some(Command::SessionComplete(report)) = commands.last() else {
        panic!("expected a session report, got {commands:?}");
    };

    assert_eq!(report.phrases_learned, 3);
    assert_eq!(report.pronunciation_accuracy, 42.9);
    assert!(!report.passed);
    assert_eq!(report.review_list, ["Danke schön"]);
    assert_eq!(report.mistakes.len(), 1);
}

#[test]
fn two_learned_phrases_exhaust_after_two_agent_lines() {
    let mut session = LessonSession::new(german_lesson());
    session.start(t0());
    session.begin_teaching();
    session.submit_attempt("hallo");
    session.advance();
    session.submit_attempt("wie geht es dir");
    session.advance();
    session.advance();
    session.advance();
    assert_eq!(session.stage(), Stage::Dialogue);
    assert_eq!(session.state().dialogue().used_phrases(), ["Hallo"]);

    session.continue_dialogue("hallo");
    assert_eq!(
        session.state().dialogue().used_phrases(),
        ["Hallo", "Wie geht es dir"]
    );
    assert_eq!(session.stage(), Stage::Dialogue);

    let commands = session.continue_dialogue("gut");
    assert_eq!(session.stage(), Stage::Concluded);
    assert!(matches!(commands.last(), Some(Command::SessionComplete(_))));
}

#[test]
fn conclusion_is_idempotent_and_byte_identical() {
    let mut session = LessonSession::new(german_lesson());
    session.start(t0());
    session.begin_teaching();
    session.submit_attempt("hallo");

    let first = serde_json::to_string(&session.conclude()).unwrap();
    session.set_engagement(9).unwrap();
    let second = serde_json::to_string(&session.conclude()).unwrap();
    assert_eq!(first, second);
}

#[test]
fn deadline_overrides_teaching_progress_at_any_index() {
    for index in 0..4 {
        let mut session = LessonSession::new(german_lesson());
        session.start(t0());
        session.begin_teaching();
        for _ in 0..index {
            session.advance();
        }
        assert_eq!(session.current_index(), index);

        let check = session.check_time_remaining(t0() + Duration::seconds(490));
        assert_eq!(check.remaining_seconds, 110);
        assert_eq!(session.stage(), Stage::Dialogue);
    }
}

#[test]
fn deadline_from_intro_skips_to_dialogue() {
    let mut session = LessonSession::new(german_lesson());
    session.start(t0());
    session.check_time_remaining(t0() + Duration::seconds(490));
    assert_eq!(session.stage(), Stage::Dialogue);
}

#[test]
fn stages_never_regress() {
    let mut session = LessonSession::new(german_lesson());
    session.start(t0());
    let mut last = session.stage();
    let events: Vec<Box<dyn Fn(&mut LessonSession)>> = vec![
        Box::new(|s: &mut LessonSession| {
            s.handle_utterance("hallo");
        }),
        Box::new(|s: &mut LessonSession| {
            s.advance();
        }),
        Box::new(|s: &mut LessonSession| {
            s.submit_attempt("nope");
        }),
        Box::new(|s: &mut LessonSession| {
            s.check_time_remaining(t0() + Duration::seconds(300));
        }),
        Box::new(|s: &mut LessonSession| {
            s.begin_teaching();
        }),
        Box::new(|s: &mut LessonSession| {
            s.continue_dialogue("hm");
        }),
        Box::new(|s: &mut LessonSession| {
            s.check_time_remaining(t0() + Duration::seconds(590));
        }),
        Box::new(|s: &mut LessonSession| {
            s.start(t0());
        }),
        Box::new(|s: &mut LessonSession| {
            s.check_time_remaining(t0() + Duration::seconds(700));
        }),
    ];

    for _ in 0..3 {
        for event in &events {
            event(&mut session);
            assert!(session.stage() >= last);
            last = session.stage();
        }
    }
    assert_eq!(session.stage(), Stage::Concluded);
}

#[test]
fn malformed_metadata_starts_the_default_lesson() {
    let mut session = LessonSession::from_metadata(Some("not json at all"));
    let commands = session.start(t0());
    assert!(speech(&commands)[0].contains("Greetings and Introductions"));
}

#[test]
fn pass_threshold_scenarios() {
    use lingua_core::feedback::is_passing;
    assert!(is_passing(75.0, 3, 6));
    assert!(!is_passing(50.0, 3, 6));
}
