//! Configuration: CLI surface + YAML config file, merged into one immutable
//! `EngineConfig` passed into the engine at construction (design note §9:
//! "Dynamic config & singletons → explicit config value").
//!
//! Generalizes the teacher's `config.rs`, which read `[tool.pytest_env]`
//! out of `pyproject.toml` with `toml` and parsed CLI flags with `clap`.
//! Here the CLI selects a YAML file (`SANDBOX_CONFIG`, §6) instead of a
//! fixed `pyproject.toml`, loaded with `serde_yaml`.

use clap::Parser;
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};

/// Sandbox Engine CLI.
#[derive(Parser, Debug)]
#[command(name = "sandbox-engine", version, about = "Multi-language code execution sandbox")]
pub struct Cli {
    /// Config name under `config/`, or a path to a YAML file. Also:
    /// SANDBOX_CONFIG env var (§6).
    #[arg(long, env = "SANDBOX_CONFIG", default_value = "local")]
    pub config: String,

    /// TCP port to bind the HTTP API on.
    #[arg(long, default_value_t = 8080)]
    pub port: u16,
}

/// Isolation strategy selected statically at startup (§4.1).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum IsolationMode {
    /// No isolation; best-effort cleanup only.
    #[default]
    None,
    /// overlayfs + chroot + cgroups + netns.
    Lite,
}

/// Resource limits applied per request in `lite` mode (§4.1).
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ResourceLimits {
    pub memory_bytes: u64,
    pub cpu_limit: f64,
}

impl Default for ResourceLimits {
    fn default() -> Self {
        Self {
            memory_bytes: 4 * 1024 * 1024 * 1024,
            cpu_limit: 1.0,
        }
    }
}

/// Everything the engine needs, loaded once and passed by reference/Arc.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub isolation_mode: IsolationMode,
    pub resource_limits: ResourceLimits,
    /// Disable PID-namespace isolation; Lean needs host PID 1 visible
    /// (§9 open question — preserved verbatim, default off).
    pub disable_pid_namespace_for_lean: bool,
    /// §4.3: when isolation is `none`, chmod the workspace 0777 and switch
    /// the child's uid as best-effort hardening on shared hosts.
    pub set_uid: Option<u32>,
    /// Sweep for orphaned workload processes after every run (§4.2 step 2).
    pub sweep_orphans: bool,
    /// Verify /bin/bash integrity against `expected_bash_md5` after every
    /// run (§4.2 step 3, §9 — only meaningful if the sandbox image ships
    /// bash and `expected_bash_md5` is set; otherwise the check is skipped).
    pub verify_bash_integrity: bool,
    /// MD5 of the bundled `/bin/bash` the image is expected to ship.
    /// Required for `verify_bash_integrity` to actually check anything —
    /// there is no built-in digest to fall back to.
    pub expected_bash_md5: Option<String>,
    /// Base private range to slice subnets from (§4.1): 172.16.0.0/12.
    pub subnet_base: String,
    pub subnet_prefix_len: u8,
    /// cuda/python_gpu compile concurrency cap (§4.4, §5).
    pub gpu_compile_concurrency: usize,
    /// cuda/python_gpu run concurrency cap; 1 enforces GPU exclusivity.
    pub gpu_run_concurrency: usize,
    /// Root directory for ephemeral per-request workspaces.
    pub tmp_root: PathBuf,
    /// Root directory holding shared, read-only toolchain caches (node_modules,
    /// Mathlib, JUnit jars) that adapters symlink into workspaces (§4.4).
    pub shared_cache_root: PathBuf,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            isolation_mode: IsolationMode::default(),
            resource_limits: ResourceLimits::default(),
            disable_pid_namespace_for_lean: true,
            set_uid: None,
            sweep_orphans: false,
            verify_bash_integrity: false,
            expected_bash_md5: None,
            subnet_base: "172.16.0.0".to_string(),
            subnet_prefix_len: 12,
            gpu_compile_concurrency: 12,
            gpu_run_concurrency: 1,
            tmp_root: std::env::temp_dir().join("sandbox-engine"),
            shared_cache_root: PathBuf::from("/opt/sandbox-engine/cache"),
        }
    }
}

impl EngineConfig {
    /// Load `config/{name}.yaml` (or a direct path) and fall back to
    /// defaults when the file does not exist — local dev and tests should
    /// not require a config file on disk.
    pub fn load(name_or_path: &str) -> anyhow::Result<Self> {
        let candidate = Self::resolve_path(name_or_path);
        match candidate {
            Some(path) if path.exists() => {
                let contents = fs::read_to_string(&path)?;
                let config: EngineConfig = serde_yaml::from_str(&contents)?;
                Ok(config)
            }
            _ => Ok(EngineConfig::default()),
        }
    }

    fn resolve_path(name_or_path: &str) -> Option<PathBuf> {
        let direct = Path::new(name_or_path);
        if direct.extension().is_some() {
            return Some(direct.to_path_buf());
        }
        Some(PathBuf::from("config").join(format!("{name_or_path}.yaml")))
    }

    /// Worker slice suffix for the subnet pool, derived from
    /// `PYTEST_XDIST_WORKER` so parallel test runs don't collide (§6, §9
    /// open question).
    pub fn worker_slice() -> Option<u8> {
        std::env::var("PYTEST_XDIST_WORKER")
            .ok()
            .and_then(|w| w.trim_start_matches("gw").parse::<u8>().ok())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_has_sane_resource_limits() {
        let config = EngineConfig::default();
        assert_eq!(config.resource_limits.memory_bytes, 4 * 1024 * 1024 * 1024);
        assert_eq!(config.isolation_mode, IsolationMode::None);
    }

    #[test]
    fn missing_config_file_falls_back_to_default() {
        let config = EngineConfig::load("does-not-exist-anywhere").unwrap();
        assert_eq!(config.gpu_run_concurrency, 1);
    }

    #[test]
    fn load_parses_yaml_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("custom.yaml");
        std::fs::write(
            &path,
            "isolation_mode: lite\nresource_limits:\n  memory_bytes: 1073741824\n  cpu_limit: 2.0\n",
        )
        .unwrap();
        let config = EngineConfig::load(path.to_str().unwrap()).unwrap();
        assert_eq!(config.isolation_mode, IsolationMode::Lite);
        assert_eq!(config.resource_limits.memory_bytes, 1024 * 1024 * 1024);
    }

    #[test]
    fn worker_slice_parses_gw_prefixed_ids() {
        std::env::set_var("PYTEST_XDIST_WORKER", "gw3");
        assert_eq!(EngineConfig::worker_slice(), Some(3));
        std::env::remove_var("PYTEST_XDIST_WORKER");
    }
}
