//! Isolation primitives (§4.1): ephemeral overlay rootfs, cgroups, and
//! network namespaces, composed into the final command the runner spawns.
//!
//! Two modes selected by static config: `none` (best-effort cleanup only)
//! and `lite` (overlayfs + chroot + cgroups + netns). Generalizes the
//! teacher's `isolation.rs`, which hard-coded a `CLONE_NEWNS|CLONE_NEWNET`
//! unshare + bind-mount-RO + tmpfs-overlay sequence for a single worker
//! process; here the same sequence is parameterized per request and
//! composed with cgroup and netns wrapping rather than assumed to be the
//! whole isolation story.

pub mod cgroup;
pub mod netns;
pub mod overlay;

use crate::config::{EngineConfig, IsolationMode};
use crate::lifecycle::RequestGuard;
use anyhow::Result;
use std::path::Path;
use std::sync::Arc;

/// A fully composed command ready to hand to the runner: either the literal
/// shell command (lite mode wraps it in cgexec/unshare/netns/chroot) or the
/// bare command (none mode).
pub struct IsolatedCommand {
    pub program: String,
    pub args: Vec<String>,
}

/// Set up isolation for one request and produce the wrapper needed to run
/// `inner_cmd` (a `bash -c`-style shell command string) inside it. Tracks
/// everything it creates on `guard` so it is torn down exactly once.
pub fn prepare(
    config: &EngineConfig,
    guard: &Arc<RequestGuard>,
    subnet_pool: &Arc<netns::SubnetPool>,
    workdir: &Path,
    inner_cmd: &str,
    disable_pid_namespace: bool,
    no_bridge: bool,
) -> Result<IsolatedCommand> {
    match config.isolation_mode {
        IsolationMode::None => Ok(IsolatedCommand {
            program: "bash".to_string(),
            args: vec!["-c".to_string(), format!("cd {} && {}", shell_quote(workdir), inner_cmd)],
        }),
        IsolationMode::Lite => {
            let mem_cgroup = cgroup::create_memory_cgroup(config.resource_limits.memory_bytes)?;
            guard.track_cgroup(mem_cgroup.clone());
            let cpu_cgroup = cgroup::create_cpu_cgroup(config.resource_limits.cpu_limit)?;
            guard.track_cgroup(cpu_cgroup.clone());

            let lease = subnet_pool.acquire()?;
            let ns_name = netns::setup_namespace(lease.octet, no_bridge)?;
            guard.track_netns(ns_name.clone());
            guard.track_subnet(subnet_pool.clone(), lease.octet);
            std::mem::forget(lease); // ownership now lives in `guard`

            let root = overlay::setup(&ns_name)?;
            guard.track_overlay(ns_name.clone());
            let mut pieces = vec![
                "cgexec".to_string(),
                "-g".to_string(),
                format!("memory:{}", cgroup::name_of(&mem_cgroup)),
                "-g".to_string(),
                format!("cpu:{}", cgroup::name_of(&cpu_cgroup)),
            ];
            if !disable_pid_namespace {
                pieces.extend(["unshare".to_string(), "--pid".to_string(), "--fork".to_string(), "--mount-proc".to_string()]);
            }
            pieces.extend([
                "ip".to_string(),
                "netns".to_string(),
                "exec".to_string(),
                ns_name,
                "chroot".to_string(),
                root.display().to_string(),
                "bash".to_string(),
                "-c".to_string(),
                format!("cd {} && {}", shell_quote(workdir), inner_cmd),
            ]);

            let program = pieces.remove(0);
            Ok(IsolatedCommand { program, args: pieces })
        }
    }
}

fn shell_quote(path: &Path) -> String {
    format!("'{}'", path.display().to_string().replace('\'', "'\\''"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;

    #[test]
    fn none_mode_produces_bash_c_wrapper() {
        let config = EngineConfig::default();
        let guard = Arc::new(RequestGuard::new());
        let pool = Arc::new(netns::SubnetPool::new("172.16.0.0", 12, None));
        let cmd = prepare(&config, &guard, &pool, Path::new("/tmp/work"), "echo hi", true, false).unwrap();
        assert_eq!(cmd.program, "bash");
        assert!(cmd.args[1].contains("echo hi"));
    }
}
