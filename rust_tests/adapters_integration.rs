//! End-to-end check that an adapter's plan actually executes real code
//! when run through `orchestrator::run` in `none` isolation mode (§4.4,
//! §4.3). Only covers languages whose interpreter (`python3`, `bash`) is
//! reliably present without a toolchain image; the full language matrix is
//! covered at the unit level in `adapters.rs`.

use std::sync::Arc;

use sandbox_engine::config::EngineConfig;
use sandbox_engine::isolation::netns::SubnetPool;
use sandbox_engine::orchestrator;
use sandbox_engine::types::{FileMap, Language, RunRequest};

fn base_request(language: Language, code: &str) -> RunRequest {
    RunRequest {
        code: code.to_string(),
        language,
        stdin: None,
        files: FileMap::new(),
        fetch_files: Vec::new(),
        compile_timeout: 10.0,
        run_timeout: 10.0,
    }
}

#[tokio::test]
async fn python_print_succeeds_end_to_end() {
    let mut config = EngineConfig::default();
    config.tmp_root = std::env::temp_dir().join(format!("sandbox-engine-test-{}", uuid::Uuid::new_v4()));
    let pool = Arc::new(SubnetPool::new("172.16.0.0", 12, None));

    let request = base_request(Language::Python, "print(123)");
    let result = orchestrator::run(&config, &pool, request).await.unwrap();

    assert_eq!(result.status, sandbox_engine::types::RunStatus::Success);
    assert_eq!(result.run_result.unwrap().stdout.as_deref(), Some("123\n"));
}

#[tokio::test]
async fn python_nonzero_exit_reports_failed_status() {
    let mut config = EngineConfig::default();
    config.tmp_root = std::env::temp_dir().join(format!("sandbox-engine-test-{}", uuid::Uuid::new_v4()));
    let pool = Arc::new(SubnetPool::new("172.16.0.0", 12, None));

    let request = base_request(Language::Python, "import sys\nsys.exit(1)");
    let result = orchestrator::run(&config, &pool, request).await.unwrap();

    assert_eq!(result.status, sandbox_engine::types::RunStatus::Failed);
}

#[tokio::test]
async fn fetch_files_reads_back_a_file_written_by_the_submission() {
    let mut config = EngineConfig::default();
    config.tmp_root = std::env::temp_dir().join(format!("sandbox-engine-test-{}", uuid::Uuid::new_v4()));
    let pool = Arc::new(SubnetPool::new("172.16.0.0", 12, None));

    let mut request = base_request(Language::Bash, "echo hi > out.txt");
    request.fetch_files = vec!["out.txt".to_string()];
    let result = orchestrator::run(&config, &pool, request).await.unwrap();

    assert_eq!(result.files.get("out.txt").unwrap(), "hi\n");
}

#[tokio::test]
async fn stdin_reaches_the_run_phase() {
    let mut config = EngineConfig::default();
    config.tmp_root = std::env::temp_dir().join(format!("sandbox-engine-test-{}", uuid::Uuid::new_v4()));
    let pool = Arc::new(SubnetPool::new("172.16.0.0", 12, None));

    let mut request = base_request(Language::Python, "print(input())");
    request.stdin = Some("from stdin\n".to_string());
    let result = orchestrator::run(&config, &pool, request).await.unwrap();

    assert_eq!(result.run_result.unwrap().stdout.as_deref(), Some("from stdin\n"));
}
