//! End-to-end checks of `none`-mode isolation (§4.1): the wrapper command
//! `prepare` produces actually executes the inner command when handed to a
//! real shell. `lite` mode requires cgroups/netns/chroot privileges not
//! available in a generic test environment, so it is covered by the unit
//! tests inside `isolation/mod.rs` instead.

use std::sync::Arc;

use sandbox_engine::config::EngineConfig;
use sandbox_engine::isolation::{netns::SubnetPool, prepare};
use sandbox_engine::lifecycle::RequestGuard;

#[test]
fn none_mode_wrapper_runs_inner_command_under_the_given_cwd() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("marker.txt"), "present").unwrap();

    let config = EngineConfig::default();
    let guard = Arc::new(RequestGuard::new());
    let pool = Arc::new(SubnetPool::new("172.16.0.0", 12, None));

    let cmd = prepare(&config, &guard, &pool, dir.path(), "cat marker.txt", true, false).unwrap();

    let output = std::process::Command::new(&cmd.program).args(&cmd.args).output().unwrap();
    assert!(output.status.success());
    assert_eq!(String::from_utf8_lossy(&output.stdout), "present");
}

#[test]
fn none_mode_wrapper_propagates_nonzero_exit() {
    let dir = tempfile::tempdir().unwrap();
    let config = EngineConfig::default();
    let guard = Arc::new(RequestGuard::new());
    let pool = Arc::new(SubnetPool::new("172.16.0.0", 12, None));

    let cmd = prepare(&config, &guard, &pool, dir.path(), "exit 3", true, false).unwrap();
    let status = std::process::Command::new(&cmd.program).args(&cmd.args).status().unwrap();
    assert_eq!(status.code(), Some(3));
}

#[test]
fn guard_drop_removes_tracked_workspace_after_isolation_setup() {
    let dir = tempfile::tempdir().unwrap();
    let workspace = dir.path().join("workspace");
    std::fs::create_dir_all(&workspace).unwrap();

    let config = EngineConfig::default();
    let pool = Arc::new(SubnetPool::new("172.16.0.0", 12, None));
    {
        let guard = Arc::new(RequestGuard::new());
        guard.track_workspace(workspace.clone());
        let _cmd = prepare(&config, &guard, &pool, &workspace, "true", true, false).unwrap();
    }
    assert!(!workspace.exists());
}
