//! The command runner: spawn-with-timeout-and-cleanup primitive (§4.2).
//!
//! New module grounded on the bounded-stream-capture, process-tree-kill
//! pattern in the pack's `codex-rs` core `exec.rs` (`tokio::process::Command`,
//! a byte/line ceiling per stream, `tracing` spans around spawn/timeout/kill)
//! combined with the teacher's `lifecycle.rs` kill-in-a-loop idiom for the
//! process-tree walk and its PID-sweep concept generalized from "kill
//! tracked test workers" to "sweep any orphaned workload process."

use crate::types::{CommandOutcome, MAX_STREAM_BYTES};
use anyhow::{Context, Result};
use std::os::unix::process::{CommandExt, ExitStatusExt};
use std::path::Path;
use std::process::Stdio;
use std::time::{Duration, Instant};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::process::{Child, Command};
use tracing::{debug, warn};

/// Workload binaries the orphan sweep treats as suspicious when found
/// running under a PID past the server's own and outside its known
/// children (§4.2 step 2).
const WORKLOAD_DENYLIST: &[&str] = &[
    "node", "python", "go", "npm", "bash", "dotnet", "g++", "test", "flask", "sleep",
];

#[derive(Debug, Clone, Default)]
pub struct CommandSpec {
    pub program: String,
    pub args: Vec<String>,
    pub cwd: Option<std::path::PathBuf>,
    pub env: Vec<(String, String)>,
    pub stdin: Option<String>,
    pub timeout: Duration,
    /// Sweep orphaned workload processes after this command exits (§4.2.2).
    pub sweep_orphans: bool,
    /// Expected MD5 of `/bin/bash`; when set, checked after the command
    /// exits and restored from backup on mismatch (§4.2.3, §9). `None`
    /// skips the check entirely — there is no built-in hash to fall back
    /// to, the caller must supply the digest for the image it ships.
    pub expected_bash_md5: Option<String>,
}

/// Run one command to completion or timeout, with the full cleanup chain
/// (§4.2) guaranteed regardless of outcome.
pub async fn run_command(spec: CommandSpec) -> CommandOutcome {
    let start = Instant::now();
    let mut command = Command::new(&spec.program);
    command.args(&spec.args).stdin(Stdio::piped()).stdout(Stdio::piped()).stderr(Stdio::piped());
    if let Some(cwd) = &spec.cwd {
        command.current_dir(cwd);
    }
    for (k, v) in &spec.env {
        command.env(k, v);
    }
    // Put the child in its own process group so the whole tree can be
    // killed with one signal even if it forks further descendants.
    unsafe {
        command.pre_exec(|| {
            libc::setsid();
            Ok(())
        });
    }

    let mut child = match command.spawn() {
        Ok(child) => child,
        Err(e) => {
            warn!(error = %e, program = %spec.program, "failed to spawn command");
            return finish(&spec, CommandOutcome::error(format!("spawn failed: {e}")));
        }
    };

    if let Some(stdin_data) = &spec.stdin {
        if let Some(mut stdin) = child.stdin.take() {
            let data = stdin_data.clone().into_bytes();
            let _ = stdin.write_all(&data).await;
            drop(stdin);
        }
    } else {
        drop(child.stdin.take());
    }

    let outcome = match tokio::time::timeout(spec.timeout, drive_to_completion(&mut child)).await {
        Ok(Ok((code, stdout, stderr))) => {
            CommandOutcome::finished(code, stdout, stderr, start.elapsed().as_secs_f64())
        }
        Ok(Err(e)) => {
            warn!(error = %e, "command wait failed");
            CommandOutcome::error(format!("{e:#}"))
        }
        Err(_) => {
            let (stdout, stderr) = drain_best_effort(&mut child).await;
            kill_tree(&child).await;
            CommandOutcome::timed_out(stdout, stderr, start.elapsed().as_secs_f64())
        }
    };

    finish(&spec, outcome)
}

/// Run the §4.2 cleanup chain — kill any survivors, sweep orphans, verify
/// bash — regardless of how the command finished, then return the outcome
/// unchanged.
fn finish(spec: &CommandSpec, outcome: CommandOutcome) -> CommandOutcome {
    if spec.sweep_orphans {
        sweep_orphan_processes();
    }
    if let Some(expected) = &spec.expected_bash_md5 {
        if let Err(e) = verify_and_restore_bash(expected) {
            warn!(error = %e, "bash integrity check failed");
        }
    }
    outcome
}

/// Drain stdout and stderr concurrently. A child that fills one pipe's
/// buffer while holding the other open would otherwise deadlock a
/// sequential read against that buffer until the outer timeout fires.
async fn drive_to_completion(child: &mut Child) -> Result<(i32, String, String)> {
    let mut stdout_buf = Vec::new();
    let mut stderr_buf = Vec::new();

    let mut stdout = child.stdout.take();
    let mut stderr = child.stderr.take();
    let stdout_fut = async {
        if let Some(stdout) = stdout.as_mut() {
            read_bounded(stdout, &mut stdout_buf).await;
        }
    };
    let stderr_fut = async {
        if let Some(stderr) = stderr.as_mut() {
            read_bounded(stderr, &mut stderr_buf).await;
        }
    };
    tokio::join!(stdout_fut, stderr_fut);

    let status = child.wait().await.context("waiting for child")?;
    let code = status.code().unwrap_or_else(|| status.signal().unwrap_or(-1));
    Ok((code, String::from_utf8_lossy(&stdout_buf).to_string(), String::from_utf8_lossy(&stderr_buf).to_string()))
}

/// Read up to `MAX_STREAM_BYTES` from `reader`, then keep draining and
/// discarding so a chatty child never blocks on a full pipe buffer.
async fn read_bounded<R: tokio::io::AsyncRead + Unpin>(reader: &mut R, out: &mut Vec<u8>) {
    let mut chunk = [0u8; 8192];
    loop {
        match reader.read(&mut chunk).await {
            Ok(0) => break,
            Ok(n) => {
                if out.len() < MAX_STREAM_BYTES {
                    let take = n.min(MAX_STREAM_BYTES - out.len());
                    out.extend_from_slice(&chunk[..take]);
                }
            }
            Err(_) => break,
        }
    }
}

/// On timeout, grab whatever is already buffered without waiting further
/// (non-blocking short deadline per §4.2: "cleanup is not blocked by a
/// process that closed but left pipe buffers").
async fn drain_best_effort(child: &mut Child) -> (String, String) {
    let mut stdout_buf = Vec::new();
    let mut stderr_buf = Vec::new();
    if let Some(mut stdout) = child.stdout.take() {
        let _ = tokio::time::timeout(Duration::from_millis(200), read_bounded(&mut stdout, &mut stdout_buf)).await;
    }
    if let Some(mut stderr) = child.stderr.take() {
        let _ = tokio::time::timeout(Duration::from_millis(200), read_bounded(&mut stderr, &mut stderr_buf)).await;
    }
    (String::from_utf8_lossy(&stdout_buf).to_string(), String::from_utf8_lossy(&stderr_buf).to_string())
}

/// Kill the entire process tree rooted at `child`: walk `/proc` for
/// descendants recursively, SIGKILL everyone, then reap the direct child
/// (§4.2 step 1).
async fn kill_tree(child: &Child) {
    if let Some(pid) = child.id() {
        let mut to_kill = vec![pid as i32];
        let mut frontier = vec![pid as i32];
        while let Some(p) = frontier.pop() {
            for child_pid in children_of(p) {
                to_kill.push(child_pid);
                frontier.push(child_pid);
            }
        }
        for pid in to_kill.into_iter().rev() {
            use nix::sys::signal::{kill, Signal};
            use nix::unistd::Pid;
            let _ = kill(Pid::from_raw(pid), Signal::SIGKILL);
        }
    }
}

/// Enumerate direct children of `pid` by scanning `/proc/*/stat` for a
/// matching PPid field. Used both by `kill_tree` and the orphan sweep.
fn children_of(pid: i32) -> Vec<i32> {
    let mut out = Vec::new();
    let Ok(entries) = std::fs::read_dir("/proc") else {
        return out;
    };
    for entry in entries.flatten() {
        let Ok(candidate) = entry.file_name().to_string_lossy().parse::<i32>() else {
            continue;
        };
        if let Ok(status) = std::fs::read_to_string(format!("/proc/{candidate}/status")) {
            for line in status.lines() {
                if let Some(rest) = line.strip_prefix("PPid:") {
                    if rest.trim().parse::<i32>() == Ok(pid) {
                        out.push(candidate);
                    }
                }
            }
        }
    }
    out
}

/// Sweep the host for orphan workload processes (§4.2 step 2): any PID
/// above the server's own, not a terminal, whose `/proc/<pid>/cmdline`
/// matches the denylist, gets SIGKILLed. Best-effort and non-fatal.
fn sweep_orphan_processes() {
    let server_pid = std::process::id() as i32;
    let Ok(entries) = std::fs::read_dir("/proc") else {
        return;
    };
    for entry in entries.flatten() {
        let Ok(pid) = entry.file_name().to_string_lossy().parse::<i32>() else {
            continue;
        };
        if pid <= server_pid {
            continue;
        }
        let Ok(cmdline) = std::fs::read_to_string(format!("/proc/{pid}/cmdline")) else {
            continue;
        };
        let cmdline = cmdline.replace('\0', " ");
        if WORKLOAD_DENYLIST.iter().any(|needle| cmdline.contains(needle)) {
            use nix::sys::signal::{kill, Signal};
            use nix::unistd::Pid;
            debug!(pid, cmdline = %cmdline.trim(), "sweeping orphan workload process");
            let _ = kill(Pid::from_raw(pid), Signal::SIGKILL);
        }
    }
}

const BASH_PATH: &str = "/bin/bash";
const BASH_BACKUP_PATH: &str = "/opt/sandbox-engine/bash.orig";

/// Compare `/bin/bash`'s MD5 against `expected` (supplied by config for the
/// image actually in use), restoring from the bundled backup on mismatch
/// (§4.2 step 3, §9).
fn verify_and_restore_bash(expected: &str) -> Result<()> {
    use md5::{Digest, Md5};
    let bytes = std::fs::read(BASH_PATH).context("reading /bin/bash")?;
    let mut hasher = Md5::new();
    hasher.update(&bytes);
    let digest = hex::encode(hasher.finalize());
    if digest != expected {
        warn!(expected, actual = %digest, "bash integrity mismatch, restoring");
        if Path::new(BASH_BACKUP_PATH).exists() {
            std::fs::copy(BASH_BACKUP_PATH, BASH_PATH).context("restoring /bin/bash from backup")?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn finished_command_captures_stdout_and_exit_code() {
        let spec = CommandSpec {
            program: "bash".into(),
            args: vec!["-c".into(), "echo -n 123".into()],
            timeout: Duration::from_secs(5),
            ..Default::default()
        };
        let outcome = run_command(spec).await;
        assert!(outcome.succeeded());
        assert_eq!(outcome.stdout.as_deref(), Some("123"));
    }

    #[tokio::test]
    async fn stdin_is_piped_through() {
        let spec = CommandSpec {
            program: "bash".into(),
            args: vec!["-c".into(), "read x; echo \"got:$x\"".into()],
            stdin: Some("42\n".into()),
            timeout: Duration::from_secs(5),
            ..Default::default()
        };
        let outcome = run_command(spec).await;
        assert_eq!(outcome.stdout.as_deref(), Some("got:42\n"));
    }

    #[tokio::test]
    async fn exceeding_timeout_reports_time_limit_exceeded() {
        let spec = CommandSpec {
            program: "bash".into(),
            args: vec!["-c".into(), "sleep 5".into()],
            timeout: Duration::from_millis(100),
            ..Default::default()
        };
        let outcome = run_command(spec).await;
        assert_eq!(outcome.status, crate::types::CommandStatus::TimeLimitExceeded);
    }

    #[tokio::test]
    async fn nonzero_exit_is_finished_not_error() {
        let spec = CommandSpec {
            program: "bash".into(),
            args: vec!["-c".into(), "exit 7".into()],
            timeout: Duration::from_secs(5),
            ..Default::default()
        };
        let outcome = run_command(spec).await;
        assert_eq!(outcome.status, crate::types::CommandStatus::Finished);
        assert_eq!(outcome.return_code, Some(7));
    }

    #[tokio::test]
    async fn spawn_failure_is_reported_as_error() {
        let spec = CommandSpec {
            program: "definitely-not-a-real-binary-xyz".into(),
            timeout: Duration::from_secs(5),
            ..Default::default()
        };
        let outcome = run_command(spec).await;
        assert_eq!(outcome.status, crate::types::CommandStatus::Error);
    }
}
