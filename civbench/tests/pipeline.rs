mod common;

use std::collections::{BTreeMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use civbench::analysis::AnalysisSummary;
use civbench::assignments::{Assignment, AssignmentStore};
use civbench::collector::{
    plan_units, CollectionSettings, CollectionStatus, Collector, Response, ResponseStore,
};
use civbench::config::Config;
use civbench::grading::{GradeStore, Grader, GradingConfig, Verdict, NOT_COLLECTED};
use civbench::log::{load_grade_table, GradeLog};
use civbench::providers::{LLMProvider, ProviderError, ProviderRegistry};
use civbench::runner::{BatchSummary, Executor};

use common::{
    fast_executor_config, reply, test_config, write_assignment, ScriptedProvider, GRADER_MODEL,
    TESTED_MODEL,
};

fn load_assignments(config: &Config) -> BTreeMap<u32, Arc<Assignment>> {
    let store = AssignmentStore::new(&config.paths.images_dir, &config.paths.ground_truth_dir);
    config
        .collection
        .assignments
        .iter()
        .map(|&n| (n, Arc::new(store.load(n).unwrap())))
        .collect()
}

async fn collect(
    config: &Config,
    provider: Arc<ScriptedProvider>,
    force: bool,
) -> (Vec<Response>, BatchSummary) {
    let provider: Arc<dyn LLMProvider> = provider;
    let registry = ProviderRegistry::new().with("openrouter", provider);
    let assignments: Vec<Arc<Assignment>> = load_assignments(config).into_values().collect();
    let units = plan_units(&config.collection.models, &assignments, config.collection.trials);

    let settings = CollectionSettings {
        force,
        ..CollectionSettings::from(&config.collection)
    };
    let collector = Arc::new(Collector::new(
        registry,
        ResponseStore::new(&config.paths.responses_dir),
        settings,
    ));
    Executor::new(fast_executor_config())
        .collect_all(collector, units)
        .await
}

async fn grade(
    config: &Config,
    grading: GradingConfig,
    provider: Arc<ScriptedProvider>,
    responses: Vec<Response>,
) -> BatchSummary {
    let provider: Arc<dyn LLMProvider> = provider;
    let grader = Arc::new(
        Grader::new(provider, grading).with_detail_store(GradeStore::new(&config.paths.grades_dir)),
    );
    let log = GradeLog::open(config.paths.grade_log()).await.unwrap();
    let sender = log.sender();
    let summary = Executor::new(fast_executor_config())
        .grade_all(grader, responses, &load_assignments(config), &sender)
        .await;
    drop(sender);
    log.finish().await.unwrap();
    summary
}

#[tokio::test]
async fn correct_answer_scores_full_marks() {
    let dir = tempfile::tempdir().unwrap();
    write_assignment(dir.path(), 1, r#"{"1a": "correct answer"}"#);
    let config = test_config(dir.path(), vec![1]);

    let provider = ScriptedProvider::student_and_grader(
        "the answer is correct answer",
        r#"{"questions": {"1a": "correct"}, "total_correct": 1, "total_questions": 1, "score": 100}"#,
    );

    let (responses, collected) = collect(&config, provider.clone(), false).await;
    assert_eq!(collected.succeeded, 1);
    assert!(responses[0].success);
    assert_eq!(responses[0].answer.as_deref(), Some("the answer is correct answer"));

    let graded = grade(&config, config.grading.clone(), provider.clone(), responses).await;
    assert_eq!(graded.succeeded, 1);

    let table = load_grade_table(config.paths.grade_log()).unwrap();
    assert_eq!(table.records.len(), 1);
    let record = &table.records[0];
    assert!(record.success);
    assert_eq!(record.grader_model, GRADER_MODEL);
    assert_eq!(record.tested_model, TESTED_MODEL);
    assert_eq!(record.questions.len(), 1);
    assert_eq!(record.questions["1a"], Verdict::Correct);
    assert_eq!(record.score, Some(100.0));
    assert!(!record.truncated);

    let grading_request = provider
        .requests()
        .into_iter()
        .find(|r| r.model.as_deref() == Some(GRADER_MODEL))
        .unwrap();
    assert_eq!(grading_request.temperature, Some(0.0));
    assert_eq!(grading_request.images.len(), 1);
    assert!(grading_request.messages[0].content.contains("the answer is correct answer"));
    assert!(grading_request.messages[0].content.contains("1a: correct answer"));
}

#[tokio::test]
async fn each_grade_keeps_a_detail_file() {
    let dir = tempfile::tempdir().unwrap();
    write_assignment(dir.path(), 6, r#"{"1": "14 mm", "2": "passes"}"#);
    let mut config = test_config(dir.path(), vec![6]);
    config.grading.grades_per_response = 2;

    let verdicts = "Here is the grading:\n```json\n{\"questions\": {\"1\": \"correct\", \"2\": \"incorrect\"}}\n```";
    let provider = ScriptedProvider::student_and_grader("Question 1: 14 mm\nQuestion 2: fails", verdicts);

    let (responses, _) = collect(&config, provider.clone(), false).await;
    grade(&config, config.grading.clone(), provider, responses).await;

    let store = GradeStore::new(&config.paths.grades_dir);
    for grade_num in 0..2 {
        let detail = store
            .load(GRADER_MODEL, TESTED_MODEL, 0, 6, grade_num)
            .unwrap()
            .unwrap();
        assert_eq!(detail.grade_response.as_deref(), Some(verdicts));
        assert_eq!(detail.usage.unwrap().input_tokens, 100);
        assert_eq!(detail.finish_reason.as_deref(), Some("stop"));
        assert_eq!(detail.record.score, Some(50.0));
        assert_eq!(detail.record.grade_num, grade_num);
    }

    // the log line matches the detail file's record
    let table = load_grade_table(config.paths.grade_log()).unwrap();
    for record in &table.records {
        let detail = store
            .load(GRADER_MODEL, TESTED_MODEL, 0, 6, record.grade_num)
            .unwrap()
            .unwrap();
        assert_eq!(&detail.record, record);
    }
}

#[tokio::test]
async fn empty_answer_is_not_graded() {
    let dir = tempfile::tempdir().unwrap();
    write_assignment(dir.path(), 1, r#"{"1a": "correct answer"}"#);
    let config = test_config(dir.path(), vec![1]);

    let provider = ScriptedProvider::student_and_grader(
        "",
        r#"{"questions": {"1a": "correct"}, "score": 100}"#,
    );

    let (responses, collected) = collect(&config, provider.clone(), false).await;
    assert_eq!(collected.failed, 1);
    let response = &responses[0];
    assert!(!response.success);
    assert_eq!(response.status, CollectionStatus::Empty);
    assert!(response.answer.is_none());

    let stored = ResponseStore::new(&config.paths.responses_dir)
        .load(TESTED_MODEL, 0, 1)
        .unwrap()
        .unwrap();
    assert!(!stored.success);
    assert!(stored.error.is_some());

    // grading the failed response directly yields an empty, failed grade
    let grader_provider: Arc<dyn LLMProvider> = provider.clone();
    let grader = Grader::new(grader_provider, config.grading.clone());
    let assignments = load_assignments(&config);
    let record = grader
        .grade(&Executor::new(fast_executor_config()), response, &assignments[&1], 0)
        .await;
    assert!(!record.success);
    assert!(record.questions.is_empty());
    assert_eq!(record.error.as_deref(), Some(NOT_COLLECTED));

    let graded = grade(&config, config.grading.clone(), provider.clone(), responses).await;
    assert_eq!(graded.skipped, 1);
    assert_eq!(graded.attempted, 0);
    assert!(load_grade_table(config.paths.grade_log()).unwrap().is_empty());
    assert_eq!(provider.calls(), 1);
}

#[tokio::test]
async fn deterministic_grading_repeats_exactly() {
    let dir = tempfile::tempdir().unwrap();
    write_assignment(dir.path(), 2, r#"{"1a": "12 kN", "1b": "36 kN·m", "2": "W310x39"}"#);
    let mut config = test_config(dir.path(), vec![2]);
    config.grading.grades_per_response = 5;

    let provider = ScriptedProvider::student_and_grader(
        "Question 1a: 12 kN\nQuestion 1b: 30 kN·m\nQuestion 2: W310x39",
        "```json\n{\"questions\": {\"1a\": \"correct\", \"1b\": \"partial\", \"2\": \"correct\"}, \"score\": 83}\n```",
    );

    let (responses, _) = collect(&config, provider.clone(), false).await;
    let graded = grade(&config, config.grading.clone(), provider.clone(), responses).await;
    assert_eq!(graded.succeeded, 5);

    let table = load_grade_table(config.paths.grade_log()).unwrap();
    assert_eq!(table.records.len(), 5);

    let first = &table.records[0];
    let first_questions = serde_json::to_string(&first.questions).unwrap();
    for record in &table.records {
        assert_eq!(serde_json::to_string(&record.questions).unwrap(), first_questions);
        assert_eq!(record.score, first.score);
        assert_eq!(record.temperature, Some(0.0));
    }
    assert!((first.score.unwrap() - 250.0 / 3.0).abs() < 1e-9);

    let mut grade_nums: Vec<u32> = table.records.iter().map(|r| r.grade_num).collect();
    grade_nums.sort();
    assert_eq!(grade_nums, vec![0, 1, 2, 3, 4]);

    let summary = AnalysisSummary::from_table(&table);
    assert_eq!(summary.consistency[0].stats.range, 0.0);
}

#[tokio::test]
async fn truncated_grading_is_flagged() {
    let dir = tempfile::tempdir().unwrap();
    write_assignment(dir.path(), 4, r#"{"1a": "12 kN", "1b": "36 kN·m", "2": "W310x39"}"#);
    let config = test_config(dir.path(), vec![4]);

    let provider = ScriptedProvider::student_and_grader(
        "Question 1a: 12 kN\nQuestion 1b: 36 kN·m\nQuestion 2: the lightest section that sat",
        r#"{"questions": {"1a": "correct", "1b": "correct"}, "total_questions": 2, "score": 100}"#,
    );

    let (responses, _) = collect(&config, provider.clone(), false).await;
    let graded = grade(&config, config.grading.clone(), provider, responses).await;
    assert_eq!(graded.truncated, 1);

    let table = load_grade_table(config.paths.grade_log()).unwrap();
    let record = &table.records[0];
    assert!(record.truncated);
    assert_eq!(record.total_questions, Some(2));
    assert_eq!(record.total_questions_expected, Some(3));
    assert!(record.returned_count() < record.total_questions_expected.unwrap() as usize);
    assert_eq!(record.missing_questions, vec!["2"]);
    assert_eq!(record.score, Some(100.0));
    assert!((record.expected_score.unwrap() - 200.0 / 3.0).abs() < 1e-9);

    let summary = AnalysisSummary::from_table(&table);
    assert_eq!(summary.truncated, 1);
    assert_eq!(summary.complete, 0);
    assert!(summary.by_model.is_empty());
}

#[tokio::test]
async fn stray_label_in_place_of_an_expected_one_is_flagged() {
    let dir = tempfile::tempdir().unwrap();
    write_assignment(dir.path(), 3, r#"{"1a": "12 kN", "1b": "36 kN·m"}"#);
    let config = test_config(dir.path(), vec![3]);

    let provider = ScriptedProvider::student_and_grader(
        "Question 1a: 12 kN\nQuestion 1b: 36 kN·m",
        r#"{"questions": {"1a": "correct", "1c": "correct"}, "score": 100}"#,
    );

    let (responses, _) = collect(&config, provider.clone(), false).await;
    let graded = grade(&config, config.grading.clone(), provider, responses).await;
    assert_eq!(graded.truncated, 1);

    let table = load_grade_table(config.paths.grade_log()).unwrap();
    let record = &table.records[0];
    assert_eq!(record.total_questions, record.total_questions_expected);
    assert!(record.truncated);
    assert_eq!(record.missing_questions, vec!["1b"]);

    let summary = AnalysisSummary::from_table(&table);
    assert_eq!(summary.complete, 0);
    assert_eq!(summary.truncated, 1);
    assert!(summary.overall.is_none());
}

#[tokio::test]
async fn output_cut_at_token_cap_is_a_failed_response() {
    let dir = tempfile::tempdir().unwrap();
    write_assignment(dir.path(), 5, r#"{"1": "14 mm", "2": "passes"}"#);
    let config = test_config(dir.path(), vec![5]);

    let provider = ScriptedProvider::new(|_| reply("Question 1: the deflection is 14 mm\nQuestion 2: checking the", "length"));
    let (responses, collected) = collect(&config, provider, false).await;

    assert_eq!(collected.truncated, 1);
    assert_eq!(collected.failed, 1);
    let response = &responses[0];
    assert_eq!(response.status, CollectionStatus::Truncated);
    assert!(!response.success);
    assert!(response.answer.is_none());
    assert!(response.partial_answer.as_deref().unwrap().ends_with("checking the"));
    assert!(response.gradable_answer().is_none());
}

#[tokio::test]
async fn failures_never_carry_an_answer() {
    let dir = tempfile::tempdir().unwrap();
    for n in [1, 2, 3, 4] {
        write_assignment(dir.path(), n, r#"{"1": "x"}"#);
    }
    let config = test_config(dir.path(), vec![1, 2, 3, 4]);

    let turn = AtomicUsize::new(0);
    let provider = ScriptedProvider::new(move |_| match turn.fetch_add(1, Ordering::SeqCst) {
        0 => Err(ProviderError::Blocked("content filter".into())),
        1 => Err(ProviderError::Timeout { timeout_ms: 5_000 }),
        2 => reply("   ", "stop"),
        _ => reply("Question 1: x is", "length"),
    });
    let (responses, collected) = collect(&config, provider, false).await;
    assert_eq!(collected.failed, 4);
    assert_eq!(responses.len(), 4);

    let statuses: HashSet<CollectionStatus> = responses.iter().map(|r| r.status).collect();
    let expected: HashSet<CollectionStatus> = [
        CollectionStatus::Blocked,
        CollectionStatus::Timeout,
        CollectionStatus::Empty,
        CollectionStatus::Truncated,
    ]
    .into_iter()
    .collect();
    assert_eq!(statuses, expected);

    for response in &responses {
        assert!(!response.success);
        assert!(response.answer.is_none());
        assert!(response.error.is_some());
    }
}

#[tokio::test]
async fn concurrent_gradings_append_one_line_each() {
    let dir = tempfile::tempdir().unwrap();
    for n in [1, 2, 4] {
        write_assignment(dir.path(), n, r#"{"1a": "a", "1b": "b"}"#);
    }
    let mut config = test_config(dir.path(), vec![1, 2, 4]);
    config.grading.grades_per_response = 4;

    let provider = ScriptedProvider::student_and_grader(
        "Question 1a: a\nQuestion 1b: b",
        r#"{"questions": {"1a": "correct", "1b": "incorrect"}}"#,
    );

    let (responses, _) = collect(&config, provider.clone(), false).await;
    assert_eq!(responses.len(), 3);
    let graded = grade(&config, config.grading.clone(), provider, responses).await;
    assert_eq!(graded.succeeded, 12);

    let content = std::fs::read_to_string(config.paths.grade_log()).unwrap();
    assert_eq!(content.lines().count(), 12);
    for line in content.lines() {
        serde_json::from_str::<serde_json::Value>(line).unwrap();
    }

    // reloading an unchanged log gives the same summary
    let first = AnalysisSummary::from_table(&load_grade_table(config.paths.grade_log()).unwrap());
    let second = AnalysisSummary::from_table(&load_grade_table(config.paths.grade_log()).unwrap());
    assert_eq!(first, second);
    assert_eq!(first.complete, 12);
    assert_eq!(first.by_model[TESTED_MODEL].mean, 50.0);
}

#[tokio::test]
async fn collection_resumes_unless_forced() {
    let dir = tempfile::tempdir().unwrap();
    write_assignment(dir.path(), 1, r#"{"1a": "12 kN"}"#);
    let config = test_config(dir.path(), vec![1]);

    let failing = ScriptedProvider::new(|_| Err(ProviderError::Api { status: 500, message: "boom".into() }));
    let (_, first) = collect(&config, failing, false).await;
    assert_eq!(first.failed, 1);

    // a failed record is collected again
    let provider = ScriptedProvider::new(|_| reply("Question 1a: 12 kN", "stop"));
    let (_, second) = collect(&config, provider.clone(), false).await;
    assert_eq!(second.succeeded, 1);
    assert_eq!(provider.calls(), 1);

    // a successful one is reused
    let (responses, third) = collect(&config, provider.clone(), false).await;
    assert_eq!(third.skipped, 1);
    assert_eq!(third.attempted, 0);
    assert_eq!(provider.calls(), 1);
    assert!(responses[0].success);

    let (_, forced) = collect(&config, provider.clone(), true).await;
    assert_eq!(forced.succeeded, 1);
    assert_eq!(provider.calls(), 2);
}

#[tokio::test]
async fn randomized_and_deterministic_graders_coexist() {
    let dir = tempfile::tempdir().unwrap();
    write_assignment(dir.path(), 1, r#"{"1a": "12 kN"}"#);
    let config = test_config(dir.path(), vec![1]);

    let provider = ScriptedProvider::student_and_grader(
        "Question 1a: 12 kN",
        r#"{"questions": {"1a": "correct"}}"#,
    );
    let (responses, _) = collect(&config, provider.clone(), false).await;

    let strict = config.grading.clone();
    let loose = config.grading.clone().randomized(0.7);
    assert!(loose.validate().is_ok());

    grade(&config, strict, provider.clone(), responses.clone()).await;
    grade(&config, loose, provider.clone(), responses).await;

    let temperatures: Vec<Option<f32>> = provider
        .requests()
        .iter()
        .filter(|r| r.model.as_deref() == Some(GRADER_MODEL))
        .map(|r| r.temperature)
        .collect();
    assert_eq!(temperatures, vec![Some(0.0), Some(0.7)]);

    let table = load_grade_table(config.paths.grade_log()).unwrap();
    assert_eq!(table.records[0].temperature, Some(0.0));
    assert_eq!(table.records[1].temperature, Some(0.7));
}
