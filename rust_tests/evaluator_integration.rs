//! End-to-end checks of `check_stdio_cases` (§4.6): real subprocess runs
//! across multiple stdio cases, short-circuiting on first failure unless
//! `run_all_cases` is set.

use std::sync::Arc;

use sandbox_engine::config::EngineConfig;
use sandbox_engine::evaluator::check_stdio_cases;
use sandbox_engine::isolation::netns::SubnetPool;
use sandbox_engine::types::{EvaluatorConfig, FileMap, Language, RunRequest, StdioCase, StdioInput};

fn echo_request() -> RunRequest {
    RunRequest {
        code: "print(input())".to_string(),
        language: Language::Python,
        stdin: None,
        files: FileMap::new(),
        fetch_files: Vec::new(),
        compile_timeout: 10.0,
        run_timeout: 10.0,
    }
}

fn fresh_config() -> EngineConfig {
    let mut config = EngineConfig::default();
    config.tmp_root = std::env::temp_dir().join(format!("sandbox-engine-eval-{}", uuid::Uuid::new_v4()));
    config
}

#[tokio::test]
async fn all_passing_cases_report_pass() {
    let config = fresh_config();
    let pool = Arc::new(SubnetPool::new("172.16.0.0", 12, None));
    let evaluator_config = EvaluatorConfig::default();

    let cases = vec![
        StdioCase { input: StdioInput { stdin: Some("hi\n".to_string()) }, expected_stdout: "hi\n".to_string(), lower_cmp: false },
        StdioCase { input: StdioInput { stdin: Some("there\n".to_string()) }, expected_stdout: "there\n".to_string(), lower_cmp: false },
    ];

    let outcomes = check_stdio_cases(&config, &pool, &evaluator_config, &echo_request(), &cases).await.unwrap();
    assert_eq!(outcomes.len(), 2);
    assert!(outcomes.iter().all(|o| o.passed));
}

#[tokio::test]
async fn short_circuit_stops_after_the_first_failure_at_concurrency_one() {
    let config = fresh_config();
    let pool = Arc::new(SubnetPool::new("172.16.0.0", 12, None));
    let evaluator_config = EvaluatorConfig { max_runner_concurrency: 1, ..EvaluatorConfig::default() };

    let cases = vec![
        StdioCase { input: StdioInput { stdin: Some("hi\n".to_string()) }, expected_stdout: "hi\n".to_string(), lower_cmp: false },
        StdioCase { input: StdioInput { stdin: Some("nope\n".to_string()) }, expected_stdout: "wrong\n".to_string(), lower_cmp: false },
        StdioCase { input: StdioInput { stdin: Some("there\n".to_string()) }, expected_stdout: "there\n".to_string(), lower_cmp: false },
    ];

    let outcomes = check_stdio_cases(&config, &pool, &evaluator_config, &echo_request(), &cases).await.unwrap();
    assert_eq!(outcomes.len(), 2, "the third case must never be launched once the second fails");
    assert!(outcomes[0].passed);
    assert!(!outcomes[1].passed);
}

#[tokio::test]
async fn a_failing_case_is_reported_as_not_passed() {
    let config = fresh_config();
    let pool = Arc::new(SubnetPool::new("172.16.0.0", 12, None));
    let evaluator_config = EvaluatorConfig::default();

    let cases = vec![StdioCase {
        input: StdioInput { stdin: Some("hi\n".to_string()) },
        expected_stdout: "wrong\n".to_string(),
        lower_cmp: false,
    }];

    let outcomes = check_stdio_cases(&config, &pool, &evaluator_config, &echo_request(), &cases).await.unwrap();
    assert_eq!(outcomes.len(), 1);
    assert!(!outcomes[0].passed);
}
