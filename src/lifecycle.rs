//! Lifecycle management: guaranteed per-request cleanup.
//!
//! Generalizes the teacher's `lifecycle.rs` "Reaper Architecture" —
//! `CleanupGuard` was a process-wide RAII tracker for worker PIDs and debug
//! sockets. Here the equivalent tracker (`RequestGuard`) is scoped to a
//! single `run_code`/`run_jupyter` request: it owns the ephemeral
//! workspace path, the cgroup paths, the netns name + leased subnet, and
//! any child PIDs spawned directly (not through the runner's own cleanup),
//! and releases all of them on `Drop` — covering return, error, and panic
//! unwind alike (§3 invariants, §7 policy: "every cleanup must be guarded
//! and log-only on failure").

use crate::isolation::netns::SubnetPool;
use std::path::PathBuf;
use std::sync::Mutex;
use tracing::warn;

/// Per-request resource tracker. Construct one at request entry; everything
/// registered on it is released exactly once, in reverse registration
/// order, when it is dropped.
pub struct RequestGuard {
    workspace: Mutex<Option<PathBuf>>,
    cgroup_paths: Mutex<Vec<PathBuf>>,
    netns_name: Mutex<Option<String>>,
    leased_subnet: Mutex<Option<(std::sync::Arc<SubnetPool>, u8)>>,
    child_pids: Mutex<Vec<i32>>,
    overlay_id: Mutex<Option<String>>,
}

impl RequestGuard {
    pub fn new() -> Self {
        Self {
            workspace: Mutex::new(None),
            cgroup_paths: Mutex::new(Vec::new()),
            netns_name: Mutex::new(None),
            leased_subnet: Mutex::new(None),
            child_pids: Mutex::new(Vec::new()),
            overlay_id: Mutex::new(None),
        }
    }

    pub fn track_overlay(&self, id: String) {
        let mut guard = self.overlay_id.lock().unwrap_or_else(|e| e.into_inner());
        *guard = Some(id);
    }

    pub fn track_workspace(&self, path: PathBuf) {
        let mut guard = self.workspace.lock().unwrap_or_else(|e| e.into_inner());
        *guard = Some(path);
    }

    pub fn track_cgroup(&self, path: PathBuf) {
        let mut paths = self.cgroup_paths.lock().unwrap_or_else(|e| e.into_inner());
        paths.push(path);
    }

    pub fn track_netns(&self, name: String) {
        let mut guard = self.netns_name.lock().unwrap_or_else(|e| e.into_inner());
        *guard = Some(name);
    }

    pub fn track_subnet(&self, pool: std::sync::Arc<SubnetPool>, octet: u8) {
        let mut guard = self.leased_subnet.lock().unwrap_or_else(|e| e.into_inner());
        *guard = Some((pool, octet));
    }

    pub fn track_pid(&self, pid: i32) {
        let mut pids = self.child_pids.lock().unwrap_or_else(|e| e.into_inner());
        pids.push(pid);
    }

    /// Release every tracked resource now, instead of waiting for `Drop`.
    /// Idempotent: safe to call and then let `Drop` run again on an already
    /// emptied guard.
    pub fn release_all(&self) {
        self.kill_pids();
        self.release_overlay();
        self.release_netns();
        self.release_cgroups();
        self.release_workspace();
    }

    fn release_overlay(&self) {
        let id = self.overlay_id.lock().unwrap_or_else(|e| e.into_inner()).take();
        if let Some(id) = id {
            if let Err(e) = crate::isolation::overlay::teardown(&id) {
                warn!(overlay = %id, error = %e, "overlay teardown failed");
            }
        }
    }

    fn kill_pids(&self) {
        let mut pids = self.child_pids.lock().unwrap_or_else(|e| e.into_inner());
        for pid in pids.drain(..) {
            if pid > 0 {
                use nix::sys::signal::{kill, Signal};
                use nix::unistd::Pid;
                let _ = kill(Pid::from_raw(pid), Signal::SIGKILL);
            }
        }
    }

    fn release_netns(&self) {
        let name = self.netns_name.lock().unwrap_or_else(|e| e.into_inner()).take();
        if let Some(name) = name {
            if let Err(e) = crate::isolation::netns::teardown_namespace(&name) {
                warn!(netns = %name, error = %e, "netns teardown failed");
            }
        }
        let lease = self.leased_subnet.lock().unwrap_or_else(|e| e.into_inner()).take();
        if let Some((pool, octet)) = lease {
            pool.release(octet);
        }
    }

    /// Cgroup teardown walks `tasks` killing PIDs in a loop, which can take
    /// a little while; §4.1 requires it never block the request's return,
    /// so it runs on a detached thread rather than inline.
    fn release_cgroups(&self) {
        let paths = std::mem::take(&mut *self.cgroup_paths.lock().unwrap_or_else(|e| e.into_inner()));
        if paths.is_empty() {
            return;
        }
        std::thread::spawn(move || {
            for path in paths {
                if let Err(e) = crate::isolation::cgroup::teardown(&path) {
                    warn!(cgroup = %path.display(), error = %e, "cgroup teardown failed");
                }
            }
        });
    }

    fn release_workspace(&self) {
        let path = self.workspace.lock().unwrap_or_else(|e| e.into_inner()).take();
        if let Some(path) = path {
            if let Err(e) = std::fs::remove_dir_all(&path) {
                if e.kind() != std::io::ErrorKind::NotFound {
                    warn!(workspace = %path.display(), error = %e, "workspace removal failed");
                }
            }
        }
    }
}

impl Default for RequestGuard {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for RequestGuard {
    fn drop(&mut self) {
        self.release_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn workspace_removed_on_drop() {
        let dir = tempfile::tempdir().unwrap();
        let nested = dir.path().join("workspace");
        std::fs::create_dir_all(&nested).unwrap();
        {
            let guard = RequestGuard::new();
            guard.track_workspace(nested.clone());
        }
        assert!(!nested.exists());
    }

    #[test]
    fn release_all_is_idempotent() {
        let guard = RequestGuard::new();
        guard.track_pid(-1);
        guard.release_all();
        guard.release_all();
    }
}
