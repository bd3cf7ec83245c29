//! Memory and CPU cgroup creation/teardown (§4.1 "Resource limits").
//!
//! New module — the teacher had no cgroup code (it relied on namespaces
//! and a read-only root for isolation, not resource accounting) — written
//! in the teacher's idiom: plain `nix`/`std::fs` syscalls, `anyhow::Context`
//! on every fallible step, cleanup that kills PIDs in a loop until
//! `/proc/<pid>` is gone (mirroring `lifecycle.rs`'s `kill_workers`).

use anyhow::{Context, Result};
use std::fs;
use std::path::{Path, PathBuf};
use std::thread::sleep;
use std::time::Duration;
use uuid::Uuid;

const CGROUP_ROOT: &str = "/sys/fs/cgroup";

pub fn name_of(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default()
}

/// Create a memory cgroup with `memory.limit_in_bytes` set (§4.1, typical
/// 4 GiB).
pub fn create_memory_cgroup(limit_bytes: u64) -> Result<PathBuf> {
    let path = PathBuf::from(CGROUP_ROOT)
        .join("memory")
        .join(format!("sandbox-{}", Uuid::new_v4()));
    fs::create_dir_all(&path).context("creating memory cgroup")?;
    fs::write(path.join("memory.limit_in_bytes"), limit_bytes.to_string())
        .context("setting memory.limit_in_bytes")?;
    Ok(path)
}

/// Create a cpu cgroup: `cpu.cfs_period_us = 100000`,
/// `cpu.cfs_quota_us = 100000 * cpu_limit` (§4.1).
pub fn create_cpu_cgroup(cpu_limit: f64) -> Result<PathBuf> {
    let path = PathBuf::from(CGROUP_ROOT)
        .join("cpu")
        .join(format!("sandbox-{}", Uuid::new_v4()));
    fs::create_dir_all(&path).context("creating cpu cgroup")?;
    let period_us: u64 = 100_000;
    let quota_us = (period_us as f64 * cpu_limit) as u64;
    fs::write(path.join("cpu.cfs_period_us"), period_us.to_string())
        .context("setting cpu.cfs_period_us")?;
    fs::write(path.join("cpu.cfs_quota_us"), quota_us.to_string())
        .context("setting cpu.cfs_quota_us")?;
    Ok(path)
}

/// Kill every PID listed in `tasks` (SIGKILL in a loop until `/proc/<pid>`
/// is gone) then delete the cgroup directory (§4.1).
pub fn teardown(path: &Path) -> Result<()> {
    let tasks_path = path.join("tasks");
    if let Ok(contents) = fs::read_to_string(&tasks_path) {
        for line in contents.lines() {
            if let Ok(pid) = line.trim().parse::<i32>() {
                kill_until_gone(pid);
            }
        }
    }
    if path.exists() {
        fs::remove_dir(path).with_context(|| format!("removing cgroup dir {}", path.display()))?;
    }
    Ok(())
}

fn kill_until_gone(pid: i32) {
    use nix::sys::signal::{kill, Signal};
    use nix::unistd::Pid;

    for _ in 0..50 {
        if !Path::new(&format!("/proc/{pid}")).exists() {
            return;
        }
        let _ = kill(Pid::from_raw(pid), Signal::SIGKILL);
        sleep(Duration::from_millis(20));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn name_of_extracts_final_component() {
        let path = PathBuf::from("/sys/fs/cgroup/memory/sandbox-abc");
        assert_eq!(name_of(&path), "sandbox-abc");
    }
}
