//! End-to-end checks of the command runner primitive (§4.2): real
//! subprocess spawn, stdin piping, timeout enforcement, and bounded stream
//! capture.

use std::time::Duration;

use sandbox_engine::runner::{run_command, CommandSpec};
use sandbox_engine::types::CommandStatus;

#[tokio::test]
async fn captures_stdout_stderr_and_exit_code_from_a_real_process() {
    let spec = CommandSpec {
        program: "bash".to_string(),
        args: vec!["-c".to_string(), "echo out; echo err 1>&2; exit 5".to_string()],
        timeout: Duration::from_secs(5),
        ..Default::default()
    };
    let outcome = run_command(spec).await;
    assert_eq!(outcome.status, CommandStatus::Finished);
    assert_eq!(outcome.return_code, Some(5));
    assert_eq!(outcome.stdout.as_deref(), Some("out\n"));
    assert_eq!(outcome.stderr.as_deref(), Some("err\n"));
}

#[tokio::test]
async fn a_sleeping_process_is_killed_on_timeout() {
    let spec = CommandSpec {
        program: "bash".to_string(),
        args: vec!["-c".to_string(), "sleep 30".to_string()],
        timeout: Duration::from_millis(150),
        ..Default::default()
    };
    let start = std::time::Instant::now();
    let outcome = run_command(spec).await;
    assert_eq!(outcome.status, CommandStatus::TimeLimitExceeded);
    assert!(start.elapsed() < Duration::from_secs(5), "the sleeping child should have been killed, not waited out");
}

#[tokio::test]
async fn stdin_is_delivered_and_stream_closed() {
    let spec = CommandSpec {
        program: "bash".to_string(),
        args: vec!["-c".to_string(), "cat".to_string()],
        stdin: Some("piped data".to_string()),
        timeout: Duration::from_secs(5),
        ..Default::default()
    };
    let outcome = run_command(spec).await;
    assert_eq!(outcome.stdout.as_deref(), Some("piped data"));
}

#[tokio::test]
async fn cwd_is_honored() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("hello.txt"), "contents").unwrap();
    let spec = CommandSpec {
        program: "cat".to_string(),
        args: vec!["hello.txt".to_string()],
        cwd: Some(dir.path().to_path_buf()),
        timeout: Duration::from_secs(5),
        ..Default::default()
    };
    let outcome = run_command(spec).await;
    assert_eq!(outcome.stdout.as_deref(), Some("contents"));
}
