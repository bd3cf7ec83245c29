//! Top-level `run_code` orchestration (§4.3): compose workspace
//! materialization, isolation, the per-language adapter plan, and the
//! command runner into one `RunResult`, with a `RequestGuard` guaranteeing
//! cleanup on every exit path.
//!
//! Grounded on the teacher's top-level `run_tests` entry point in
//! `scheduler.rs` (acquire resources, spawn, always release in a `finally`-
//! shaped guard) generalized from "run a batch of pytest workers" to "run
//! one sandboxed request through up to two phases."

use std::sync::Arc;

use tracing::{info, instrument};
use uuid::Uuid;

use crate::adapters::{self, LanguagePlan};
use crate::config::EngineConfig;
use crate::isolation::{self, netns::SubnetPool};
use crate::lifecycle::RequestGuard;
use crate::runner::{self, CommandSpec};
use crate::types::{CommandOutcome, Language, RunRequest, RunResult};
use crate::workspace;

/// Run one request end to end. Never panics on a sandboxed-program failure
/// — those are reported as a `RunResult` with `status: Failed`. Only an
/// engine-side problem (isolation setup, workspace I/O) surfaces as `Err`.
#[instrument(skip(config, subnet_pool, request), fields(language = request.language.as_str()))]
pub async fn run(config: &EngineConfig, subnet_pool: &Arc<SubnetPool>, request: RunRequest) -> anyhow::Result<RunResult> {
    let request_id = Uuid::new_v4();
    info!(%request_id, "starting run");
    let guard = Arc::new(RequestGuard::new());

    let cwd = workspace::create(&config.tmp_root)?;
    guard.track_workspace(cwd.clone());

    let plan = adapters::plan_for(request.language, &config.shared_cache_root);
    adapters::link_shared_cache(request.language, &config.shared_cache_root, &cwd);

    let mut files = request.files.clone();
    files.insert(plan.source_file.clone(), Some(encode(&request.code)));
    workspace::materialize(&cwd, &files)?;

    if config.isolation_mode == crate::config::IsolationMode::None {
        workspace::harden_for_none_mode(&cwd, config.set_uid)?;
    }

    let disable_pid_namespace = request.language == Language::Lean && config.disable_pid_namespace_for_lean;
    let no_bridge = request.language == Language::Lean;

    let compile_result = match &plan.compile_step {
        Some(step) => {
            let outcome = run_phase(config, &guard, subnet_pool, &cwd, &plan, step, None, request.compile_timeout, disable_pid_namespace, no_bridge).await?;
            let succeeded = outcome.succeeded();
            let result = Some(outcome);
            if !succeeded {
                let files_out = workspace::fetch(&cwd, &request.fetch_files);
                return Ok(RunResult::derive(result, None, files_out));
            }
            result
        }
        None => None,
    };

    let run_outcome = run_phase(config, &guard, subnet_pool, &cwd, &plan, &plan.run_step, request.stdin.as_deref(), request.run_timeout, disable_pid_namespace, no_bridge).await?;
    let files_out = workspace::fetch(&cwd, &request.fetch_files);
    let result = RunResult::derive(compile_result, Some(run_outcome), files_out);

    guard.release_all();
    Ok(result)
}

#[allow(clippy::too_many_arguments)]
async fn run_phase(
    config: &EngineConfig,
    guard: &Arc<RequestGuard>,
    subnet_pool: &Arc<SubnetPool>,
    cwd: &std::path::Path,
    plan: &LanguagePlan,
    step: &adapters::Step,
    stdin: Option<&str>,
    timeout_secs: f64,
    disable_pid_namespace: bool,
    no_bridge: bool,
) -> anyhow::Result<CommandOutcome> {
    let inner_cmd = format!("{} {}", step.program, step.args.iter().map(|a| isolation_quote(a)).collect::<Vec<_>>().join(" "));
    let isolated = isolation::prepare(config, guard, subnet_pool, cwd, &inner_cmd, disable_pid_namespace, no_bridge)?;

    let spec = CommandSpec {
        program: isolated.program,
        args: isolated.args,
        cwd: Some(cwd.to_path_buf()),
        env: plan.env.clone(),
        stdin: stdin.map(|s| s.to_string()),
        timeout: std::time::Duration::from_secs_f64(timeout_secs.max(0.1)),
        sweep_orphans: config.sweep_orphans,
        expected_bash_md5: config.verify_bash_integrity.then(|| config.expected_bash_md5.clone()).flatten(),
    };
    Ok(runner::run_command(spec).await)
}

fn isolation_quote(arg: &str) -> String {
    format!("'{}'", arg.replace('\'', "'\\''"))
}

fn encode(code: &str) -> String {
    use base64::Engine as _;
    base64::engine::general_purpose::STANDARD.encode(code)
}
