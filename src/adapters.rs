//! Per-language adapters (§4.4): a table of functions from [`Language`] to
//! the concrete compile/run command line, source file name, and extra
//! environment a request needs.
//!
//! Grounded on `original_source`'s per-language runner modules (each
//! language gets its own small "write source, build this argv" function)
//! and written in the teacher's style of one pure function per concern
//! rather than a single giant match arm; toolchain probing uses
//! `once_cell::Lazy` the way the teacher's `loader.rs` cached the Python
//! magic number once per process instead of reprobing on every call.

use crate::types::Language;
use once_cell::sync::Lazy;
use std::path::{Path, PathBuf};

/// Everything an adapter produces for one phase.
#[derive(Debug, Clone)]
pub struct Step {
    pub program: String,
    pub args: Vec<String>,
}

impl Step {
    fn new(program: &str, args: Vec<String>) -> Self {
        Self { program: program.to_string(), args }
    }
}

/// A fully resolved plan for one request: optional compile step, the run
/// step, the source file name to materialize the submitted code under, and
/// any extra environment variables the run step needs.
#[derive(Debug, Clone)]
pub struct LanguagePlan {
    pub source_file: String,
    pub compile_step: Option<Step>,
    pub run_step: Step,
    pub env: Vec<(String, String)>,
}

/// Toolchains that may or may not be present at image-build time; probed
/// once and cached, mirroring the teacher's cached-Python-magic-number
/// pattern in `loader.rs` (spawning a subprocess per request to probe
/// `g++ --version` would be wasteful and, under concurrency, OOM-prone).
static CPP_LINK_FLAGS: Lazy<Vec<&'static str>> = Lazy::new(probe_cpp_link_flags);

/// Probe which of `-lcrypto -lssl -lpthread` the toolchain's linker
/// actually has available, so compile commands don't unconditionally pass
/// flags that fail to link on a minimal image (§4.4 "C++ toolchain capability
/// probing", supplemented from `original_source`).
fn probe_cpp_link_flags() -> Vec<&'static str> {
    let mut flags = Vec::new();
    for (lib, flag) in [("crypto", "-lcrypto"), ("ssl", "-lssl"), ("pthread", "-lpthread")] {
        let probe = std::process::Command::new("sh")
            .arg("-c")
            .arg(format!("echo 'int main(){{return 0;}}' | g++ -x c++ - -l{lib} -o /dev/null"))
            .output();
        if matches!(probe, Ok(o) if o.status.success()) {
            flags.push(flag);
        }
    }
    flags
}

/// Build the compile/run plan for `language`, with `source_file` (or a
/// language's fixed entry-point name) materialized under the request's
/// workspace by `workspace::materialize` before either step runs (§4.4).
pub fn plan_for(language: Language, shared_cache_root: &Path) -> LanguagePlan {
    match language {
        Language::Python => python_plan(shared_cache_root),
        Language::Pytest => pytest_plan(),
        Language::Cpp => cpp_plan(),
        Language::Go => go_plan(false),
        Language::GoTest => go_plan(true),
        Language::Java => java_plan(shared_cache_root),
        Language::Junit => junit_plan(shared_cache_root),
        Language::Nodejs => node_plan("main.js"),
        Language::Typescript => typescript_plan(shared_cache_root),
        Language::Jest => jest_plan(shared_cache_root),
        Language::Csharp => csharp_plan(),
        Language::Rust => rust_plan(),
        Language::Php => script_plan("php", "main.php"),
        Language::Bash => script_plan("bash", "main.sh"),
        Language::Ruby => script_plan("ruby", "main.rb"),
        Language::Lua => script_plan("lua", "main.lua"),
        Language::R => script_plan("Rscript", "main.R"),
        Language::Perl => script_plan("perl", "main.pl"),
        Language::DUt => script_plan("rdmd", "main.d"),
        Language::Scala => scala_plan(),
        Language::Julia => script_plan("julia", "main.jl"),
        Language::KotlinScript => script_plan("kotlinc", "main.kts"),
        Language::Verilog => verilog_plan(),
        Language::Lean => lean_plan(shared_cache_root),
        Language::Swift => script_plan("swift", "main.swift"),
        Language::Racket => script_plan("racket", "main.rkt"),
        Language::Cuda => cuda_plan(),
        Language::PythonGpu => python_plan(shared_cache_root),
    }
}

fn python_plan(shared_cache_root: &Path) -> LanguagePlan {
    LanguagePlan {
        source_file: "main.py".to_string(),
        compile_step: None,
        run_step: Step::new("python3", vec!["main.py".to_string()]),
        env: crate::environment::python_env_vars(shared_cache_root),
    }
}

fn pytest_plan() -> LanguagePlan {
    LanguagePlan {
        source_file: "test_submission.py".to_string(),
        compile_step: None,
        run_step: Step::new("python3", vec!["-m".to_string(), "pytest".to_string(), "-q".to_string(), "test_submission.py".to_string()]),
        env: Vec::new(),
    }
}

fn cpp_plan() -> LanguagePlan {
    let mut args = vec!["-O2".to_string(), "-std=c++17".to_string(), "main.cpp".to_string(), "-o".to_string(), "a.out".to_string()];
    args.extend(CPP_LINK_FLAGS.iter().map(|f| f.to_string()));
    LanguagePlan {
        source_file: "main.cpp".to_string(),
        compile_step: Some(Step::new("g++", args)),
        run_step: Step::new("./a.out", Vec::new()),
        env: Vec::new(),
    }
}

fn go_plan(is_test: bool) -> LanguagePlan {
    if is_test {
        LanguagePlan {
            source_file: "main_test.go".to_string(),
            compile_step: None,
            run_step: Step::new("go", vec!["test".to_string(), "./...".to_string()]),
            env: Vec::new(),
        }
    } else {
        LanguagePlan {
            source_file: "main.go".to_string(),
            compile_step: Some(Step::new("go", vec!["build".to_string(), "-o".to_string(), "app".to_string(), "main.go".to_string()])),
            run_step: Step::new("./app", Vec::new()),
            env: Vec::new(),
        }
    }
}

fn java_plan(shared_cache_root: &Path) -> LanguagePlan {
    LanguagePlan {
        source_file: "Main.java".to_string(),
        compile_step: Some(Step::new("javac", vec!["Main.java".to_string()])),
        run_step: Step::new("java", vec!["Main".to_string()]),
        env: vec![("CLASSPATH".to_string(), shared_cache_root.join("java").display().to_string())],
    }
}

/// JUnit shares the Java adapter's classpath convention but compiles
/// against a pre-fetched junit jar symlinked from the shared cache
/// (§4.4 "toolchain symlinking").
fn junit_plan(shared_cache_root: &Path) -> LanguagePlan {
    let jar = shared_cache_root.join("junit/junit-platform-console-standalone.jar");
    LanguagePlan {
        source_file: "MainTest.java".to_string(),
        compile_step: Some(Step::new(
            "javac",
            vec!["-cp".to_string(), jar.display().to_string(), "MainTest.java".to_string()],
        )),
        run_step: Step::new(
            "java",
            vec!["-jar".to_string(), jar.display().to_string(), "-cp".to_string(), ".".to_string(), "-c".to_string(), "MainTest".to_string()],
        ),
        env: Vec::new(),
    }
}

fn node_plan(file: &str) -> LanguagePlan {
    LanguagePlan {
        source_file: file.to_string(),
        compile_step: None,
        run_step: Step::new("node", vec![file.to_string()]),
        env: Vec::new(),
    }
}

fn typescript_plan(shared_cache_root: &Path) -> LanguagePlan {
    let node_modules = shared_cache_root.join("typescript/node_modules");
    LanguagePlan {
        source_file: "main.ts".to_string(),
        compile_step: Some(Step::new(
            "npx",
            vec!["--prefix".to_string(), node_modules.display().to_string(), "tsc".to_string(), "main.ts".to_string()],
        )),
        run_step: Step::new("node", vec!["main.js".to_string()]),
        env: Vec::new(),
    }
}

fn jest_plan(shared_cache_root: &Path) -> LanguagePlan {
    let node_modules = shared_cache_root.join("jest/node_modules");
    LanguagePlan {
        source_file: "main.test.js".to_string(),
        compile_step: None,
        run_step: Step::new(
            "npx",
            vec!["--prefix".to_string(), node_modules.display().to_string(), "jest".to_string(), "main.test.js".to_string(), "--json".to_string()],
        ),
        env: Vec::new(),
    }
}

fn csharp_plan() -> LanguagePlan {
    LanguagePlan {
        source_file: "Program.cs".to_string(),
        compile_step: Some(Step::new("dotnet", vec!["build".to_string(), "-o".to_string(), "out".to_string()])),
        run_step: Step::new("dotnet", vec!["out/app.dll".to_string()]),
        env: Vec::new(),
    }
}

fn rust_plan() -> LanguagePlan {
    LanguagePlan {
        source_file: "main.rs".to_string(),
        compile_step: Some(Step::new("rustc", vec!["main.rs".to_string(), "-o".to_string(), "main".to_string()])),
        run_step: Step::new("./main", Vec::new()),
        env: Vec::new(),
    }
}

fn script_plan(interpreter: &str, file: &str) -> LanguagePlan {
    LanguagePlan {
        source_file: file.to_string(),
        compile_step: None,
        run_step: Step::new(interpreter, vec![file.to_string()]),
        env: Vec::new(),
    }
}

fn scala_plan() -> LanguagePlan {
    LanguagePlan {
        source_file: "main.scala".to_string(),
        compile_step: Some(Step::new("scalac", vec!["main.scala".to_string()])),
        run_step: Step::new("scala", vec!["Main".to_string()]),
        env: Vec::new(),
    }
}

fn verilog_plan() -> LanguagePlan {
    LanguagePlan {
        source_file: "main.v".to_string(),
        compile_step: Some(Step::new("iverilog", vec!["-o".to_string(), "main.vvp".to_string(), "main.v".to_string()])),
        run_step: Step::new("vvp", vec!["main.vvp".to_string()]),
        env: Vec::new(),
    }
}

/// Lean needs PID 1 of the host namespace visible to its elaborator, so
/// the orchestrator passes `disable_pid_namespace: true` whenever this
/// plan runs (§9 open question, preserved from spec).
fn lean_plan(shared_cache_root: &Path) -> LanguagePlan {
    let mathlib = shared_cache_root.join("lean/mathlib");
    LanguagePlan {
        source_file: "Main.lean".to_string(),
        compile_step: None,
        run_step: Step::new("lean", vec!["--root".to_string(), mathlib.display().to_string(), "Main.lean".to_string()]),
        env: Vec::new(),
    }
}

fn cuda_plan() -> LanguagePlan {
    LanguagePlan {
        source_file: "main.cu".to_string(),
        compile_step: Some(Step::new("nvcc", vec!["main.cu".to_string(), "-o".to_string(), "main".to_string()])),
        run_step: Step::new("./main", Vec::new()),
        env: Vec::new(),
    }
}

/// Whether `language`'s adapter requires a shared toolchain directory to be
/// symlinked into the workspace before its steps run (§4.4).
pub fn shared_cache_subdir(language: Language) -> Option<&'static str> {
    match language {
        Language::Typescript => Some("typescript"),
        Language::Jest => Some("jest"),
        Language::Java | Language::Junit => Some("java"),
        Language::Lean => Some("lean"),
        _ => None,
    }
}

/// Symlink the shared, read-only toolchain cache subdir for `language` into
/// `cwd` if this adapter needs one (§4.4). Best-effort: a missing cache
/// entry is not an engine failure, it just means that dependency resolves
/// from scratch inside the workspace instead.
pub fn link_shared_cache(language: Language, shared_cache_root: &Path, cwd: &Path) {
    let Some(subdir) = shared_cache_subdir(language) else {
        return;
    };
    let source: PathBuf = shared_cache_root.join(subdir);
    if !source.exists() {
        return;
    }
    let target = cwd.join("node_modules");
    if subdir == "typescript" || subdir == "jest" {
        let _ = std::os::unix::fs::symlink(source.join("node_modules"), target);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn python_plan_has_no_compile_step() {
        let plan = plan_for(Language::Python, Path::new("/opt/cache"));
        assert!(plan.compile_step.is_none());
        assert_eq!(plan.run_step.program, "python3");
    }

    #[test]
    fn cpp_plan_has_compile_and_run_steps() {
        let plan = plan_for(Language::Cpp, Path::new("/opt/cache"));
        assert!(plan.compile_step.is_some());
        assert_eq!(plan.run_step.program, "./a.out");
    }

    #[test]
    fn junit_plan_references_shared_jar() {
        let plan = plan_for(Language::Junit, Path::new("/opt/cache"));
        assert!(plan.compile_step.unwrap().args.iter().any(|a| a.contains("junit-platform-console-standalone.jar")));
    }

    #[test]
    fn shared_cache_subdir_is_none_for_python() {
        assert_eq!(shared_cache_subdir(Language::Python), None);
        assert_eq!(shared_cache_subdir(Language::Jest), Some("jest"));
    }

    #[test]
    fn every_compile_language_has_a_compile_step() {
        for lang in [Language::Cpp, Language::Go, Language::Java, Language::Junit, Language::Csharp, Language::Rust, Language::Verilog, Language::Cuda] {
            let plan = plan_for(lang, Path::new("/opt/cache"));
            assert!(plan.compile_step.is_some(), "{lang:?} should have a compile step");
        }
    }
}
