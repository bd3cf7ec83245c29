//! Core data model: language tags, run requests/results, command outcomes.
//!
//! Generalizes the teacher's `protocol.rs` (which modeled one `TestPayload`/
//! `TestResult` pair for a single fork-server IPC channel) into the
//! nominally-typed `RunRequest`/`RunResult` pair spec §3 requires, plus the
//! closed `Language` enumeration §3 specifies.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Ceiling on captured stdout/stderr per stream (§3 CommandOutcome).
pub const MAX_STREAM_BYTES: usize = 1024 * 1024;

/// Closed enumeration of supported execution modes (§3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Language {
    Python,
    Cpp,
    Go,
    GoTest,
    Java,
    Junit,
    Nodejs,
    Typescript,
    Jest,
    Pytest,
    Rust,
    Csharp,
    Php,
    Bash,
    Ruby,
    Lua,
    R,
    Perl,
    DUt,
    Scala,
    Julia,
    KotlinScript,
    Verilog,
    Lean,
    Swift,
    Racket,
    Cuda,
    PythonGpu,
}

impl Language {
    /// Two-phase (compile + run) languages, per §3 `compile_languages`.
    pub fn has_compile_phase(self) -> bool {
        matches!(
            self,
            Language::Cpp
                | Language::Go
                | Language::Java
                | Language::Junit
                | Language::Csharp
                | Language::Rust
                | Language::Verilog
                | Language::Cuda
                | Language::PythonGpu
        )
    }

    /// GPU-pool languages vs the default CPU pool (§3).
    pub fn is_gpu(self) -> bool {
        matches!(self, Language::Cuda | Language::PythonGpu)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Language::Python => "python",
            Language::Cpp => "cpp",
            Language::Go => "go",
            Language::GoTest => "go_test",
            Language::Java => "java",
            Language::Junit => "junit",
            Language::Nodejs => "nodejs",
            Language::Typescript => "typescript",
            Language::Jest => "jest",
            Language::Pytest => "pytest",
            Language::Rust => "rust",
            Language::Csharp => "csharp",
            Language::Php => "php",
            Language::Bash => "bash",
            Language::Ruby => "ruby",
            Language::Lua => "lua",
            Language::R => "R",
            Language::Perl => "perl",
            Language::DUt => "D_ut",
            Language::Scala => "scala",
            Language::Julia => "julia",
            Language::KotlinScript => "kotlin_script",
            Language::Verilog => "verilog",
            Language::Lean => "lean",
            Language::Swift => "swift",
            Language::Racket => "racket",
            Language::Cuda => "cuda",
            Language::PythonGpu => "python_gpu",
        }
    }
}

/// A file to materialize into (or fetch back from) the workspace.
/// `None` means "skip" (§3, §6 — idempotent client composition).
pub type FileMap = HashMap<String, Option<String>>;

/// Inputs to the engine (§3 RunRequest).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunRequest {
    #[serde(default)]
    pub code: String,
    pub language: Language,
    #[serde(default)]
    pub stdin: Option<String>,
    #[serde(default)]
    pub files: FileMap,
    #[serde(default)]
    pub fetch_files: Vec<String>,
    #[serde(default = "default_timeout")]
    pub compile_timeout: f64,
    #[serde(default = "default_timeout")]
    pub run_timeout: f64,
}

fn default_timeout() -> f64 {
    10.0
}

/// Phase outcome status (§3 CommandOutcome).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub enum CommandStatus {
    Finished,
    TimeLimitExceeded,
    Error,
}

/// Result of a single compile or run phase (§3 CommandOutcome).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommandOutcome {
    pub status: CommandStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub return_code: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stdout: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stderr: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub execution_time: Option<f64>,
}

impl CommandOutcome {
    pub fn finished(return_code: i32, stdout: String, stderr: String, execution_time: f64) -> Self {
        Self {
            status: CommandStatus::Finished,
            return_code: Some(return_code),
            stdout: Some(truncate(stdout)),
            stderr: Some(truncate(stderr)),
            execution_time: Some(execution_time),
        }
    }

    pub fn timed_out(stdout: String, stderr: String, execution_time: f64) -> Self {
        Self {
            status: CommandStatus::TimeLimitExceeded,
            return_code: None,
            stdout: Some(truncate(stdout)),
            stderr: Some(truncate(stderr)),
            execution_time: Some(execution_time),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            status: CommandStatus::Error,
            return_code: None,
            stdout: None,
            stderr: Some(message.into()),
            execution_time: None,
        }
    }

    pub fn succeeded(&self) -> bool {
        self.status == CommandStatus::Finished && self.return_code == Some(0)
    }
}

fn truncate(mut s: String) -> String {
    if s.len() > MAX_STREAM_BYTES {
        s.truncate(MAX_STREAM_BYTES);
    }
    s
}

/// Overall status derived from the two phase outcomes (§3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub enum RunStatus {
    Success,
    Failed,
    SandboxError,
}

/// Result of a full `run_code` call (§3 RunResult).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunResult {
    pub status: RunStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub compile_result: Option<CommandOutcome>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub run_result: Option<CommandOutcome>,
    #[serde(default)]
    pub files: HashMap<String, String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl RunResult {
    /// Derive the overall status from the two phases, per §3's invariant.
    pub fn derive(
        compile_result: Option<CommandOutcome>,
        run_result: Option<CommandOutcome>,
        files: HashMap<String, String>,
    ) -> Self {
        let status = Self::derive_status(&compile_result, &run_result);
        Self {
            status,
            compile_result,
            run_result,
            files,
            message: None,
        }
    }

    fn derive_status(
        compile_result: &Option<CommandOutcome>,
        run_result: &Option<CommandOutcome>,
    ) -> RunStatus {
        if let Some(c) = compile_result {
            if !c.succeeded() {
                return RunStatus::Failed;
            }
        }
        match run_result {
            Some(r) if r.succeeded() => RunStatus::Success,
            Some(_) => RunStatus::Failed,
            None => {
                // run was skipped entirely only because there was no run phase
                // (e.g. compile-only request); treat as success if compile
                // itself finished cleanly.
                match compile_result {
                    Some(c) if c.succeeded() => RunStatus::Success,
                    _ => RunStatus::Failed,
                }
            }
        }
    }

    pub fn sandbox_error(message: impl Into<String>) -> Self {
        Self {
            status: RunStatus::SandboxError,
            compile_result: None,
            run_result: None,
            files: HashMap::new(),
            message: Some(message.into()),
        }
    }
}

/// A single stdio test case for the §4.6 evaluator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StdioCase {
    pub input: StdioInput,
    pub expected_stdout: String,
    #[serde(default)]
    pub lower_cmp: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StdioInput {
    #[serde(default)]
    pub stdin: Option<String>,
}

/// Outcome of checking one stdio case (§4.6 `check_stdio_cases`).
#[derive(Debug, Clone, Serialize)]
pub struct CaseOutcome {
    pub passed: bool,
    pub exec_info: RunResult,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub test_info: Option<String>,
}

/// Configuration knobs for `check_stdio_cases` (§4.6, §5).
#[derive(Debug, Clone)]
pub struct EvaluatorConfig {
    pub run_timeout: Option<f64>,
    pub max_runner_concurrency: usize,
    pub run_all_cases: bool,
}

impl Default for EvaluatorConfig {
    fn default() -> Self {
        Self {
            run_timeout: None,
            max_runner_concurrency: 0,
            run_all_cases: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn derive_status_success_requires_zero_exit_on_every_present_phase() {
        let compile = CommandOutcome::finished(0, String::new(), String::new(), 0.1);
        let run = CommandOutcome::finished(0, "ok".into(), String::new(), 0.2);
        let result = RunResult::derive(Some(compile), Some(run), HashMap::new());
        assert_eq!(result.status, RunStatus::Success);
    }

    #[test]
    fn derive_status_failed_on_nonzero_run() {
        let run = CommandOutcome::finished(1, String::new(), "boom".into(), 0.1);
        let result = RunResult::derive(None, Some(run), HashMap::new());
        assert_eq!(result.status, RunStatus::Failed);
    }

    #[test]
    fn derive_status_failed_on_compile_timeout_skips_run() {
        let compile = CommandOutcome::timed_out(String::new(), String::new(), 5.0);
        let result = RunResult::derive(Some(compile), None, HashMap::new());
        assert_eq!(result.status, RunStatus::Failed);
        assert!(result.run_result.is_none());
    }

    #[test]
    fn language_round_trips_through_json() {
        let json = serde_json::to_string(&Language::GoTest).unwrap();
        assert_eq!(json, "\"go_test\"");
        let back: Language = serde_json::from_str(&json).unwrap();
        assert_eq!(back.as_str(), "go_test");
    }

    #[test]
    fn stream_truncation_caps_at_ceiling() {
        let huge = "a".repeat(MAX_STREAM_BYTES + 100);
        let outcome = CommandOutcome::finished(0, huge, String::new(), 0.0);
        assert_eq!(outcome.stdout.unwrap().len(), MAX_STREAM_BYTES);
    }
}
