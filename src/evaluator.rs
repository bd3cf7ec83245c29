//! Stdio test-case evaluation (§4.6 `check_stdio_cases`): run one
//! submission against many input/expected-output cases with bounded
//! concurrency, numeric tolerance, and an optional first-failure
//! short-circuit.
//!
//! New module; fan-out/short-circuit pattern grounded on the teacher's
//! `scheduler.rs` worker pool (bounded concurrency via a semaphore-shaped
//! gate, early return once the group's outcome is already decided).

use std::sync::Arc;

use tokio::task::JoinSet;

use crate::config::EngineConfig;
use crate::isolation::netns::SubnetPool;
use crate::orchestrator;
use crate::types::{CaseOutcome, EvaluatorConfig, RunRequest, StdioCase};

/// Run `request` once per case in `cases`, varying only `stdin`, and report
/// pass/fail per case against `expected_stdout`. Honors
/// `evaluator_config.run_all_cases`: when false (the default), once one
/// case finishes with `passed=false` no further cases are launched —
/// only the cases already in flight at that moment (bounded by
/// `max_runner_concurrency`) run to completion (§4.6, §5). Results are
/// returned in completion order, not submission order.
pub async fn check_stdio_cases(
    config: &EngineConfig,
    subnet_pool: &Arc<SubnetPool>,
    evaluator_config: &EvaluatorConfig,
    request: &RunRequest,
    cases: &[StdioCase],
) -> anyhow::Result<Vec<CaseOutcome>> {
    let concurrency = if evaluator_config.max_runner_concurrency == 0 {
        num_cpus::get()
    } else {
        evaluator_config.max_runner_concurrency
    }
    .max(1);
    let run_all_cases = evaluator_config.run_all_cases;

    let mut pending = cases.iter();
    let mut join_set = JoinSet::new();
    let mut outcomes = Vec::with_capacity(cases.len());
    let mut stop_launching = false;

    for case in pending.by_ref().take(concurrency) {
        spawn_case(&mut join_set, config, subnet_pool, evaluator_config, request, case);
    }

    while let Some(joined) = join_set.join_next().await {
        let outcome = joined??;
        let failed = !outcome.passed;
        outcomes.push(outcome);

        if failed && !run_all_cases {
            stop_launching = true;
        }
        if !stop_launching {
            if let Some(case) = pending.next() {
                spawn_case(&mut join_set, config, subnet_pool, evaluator_config, request, case);
            }
        }
    }

    Ok(outcomes)
}

fn spawn_case(
    join_set: &mut JoinSet<anyhow::Result<CaseOutcome>>,
    config: &EngineConfig,
    subnet_pool: &Arc<SubnetPool>,
    evaluator_config: &EvaluatorConfig,
    request: &RunRequest,
    case: &StdioCase,
) {
    let mut case_request = request.clone();
    case_request.stdin = case.input.stdin.clone();
    if let Some(secs) = evaluator_config.run_timeout {
        case_request.run_timeout = secs;
    }
    let expected = case.expected_stdout.clone();
    let lower_cmp = case.lower_cmp;
    let config = config.clone();
    let subnet_pool = subnet_pool.clone();

    join_set.spawn(async move {
        let exec_info = orchestrator::run(&config, &subnet_pool, case_request).await?;
        let actual = exec_info.run_result.as_ref().and_then(|r| r.stdout.clone()).unwrap_or_default();
        let passed = exec_info.status == crate::types::RunStatus::Success && stdout_matches(&actual, &expected, lower_cmp);
        anyhow::Ok(CaseOutcome { passed, exec_info, test_info: None })
    });
}

/// Compare actual vs expected stdout, tolerating a trailing run of empty
/// lines on either side and numeric near-equality per line
/// (`|a-b|/max(|b|,1e-10) < 1e-5`, §4.6).
fn stdout_matches(actual: &str, expected: &str, lower_cmp: bool) -> bool {
    let actual_lines = trim_trailing_blank_lines(actual);
    let expected_lines = trim_trailing_blank_lines(expected);
    if actual_lines.len() != expected_lines.len() {
        return false;
    }
    actual_lines.iter().zip(expected_lines.iter()).all(|(a, e)| line_matches(a, e, lower_cmp))
}

fn trim_trailing_blank_lines(s: &str) -> Vec<&str> {
    let mut lines: Vec<&str> = s.lines().collect();
    while matches!(lines.last(), Some(l) if l.trim().is_empty()) {
        lines.pop();
    }
    lines
}

fn line_matches(a: &str, e: &str, lower_cmp: bool) -> bool {
    let (a, e) = if lower_cmp { (a.to_lowercase(), e.to_lowercase()) } else { (a.to_string(), e.to_string()) };
    if a.trim() == e.trim() {
        return true;
    }
    match (a.trim().parse::<f64>(), e.trim().parse::<f64>()) {
        (Ok(a_val), Ok(e_val)) => {
            let denom = e_val.abs().max(1e-10);
            ((a_val - e_val).abs() / denom) < 1e-5
        }
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exact_match_passes() {
        assert!(stdout_matches("hello\n", "hello\n", false));
    }

    #[test]
    fn trailing_blank_lines_are_tolerated() {
        assert!(stdout_matches("hello\n\n\n", "hello\n", false));
    }

    #[test]
    fn numeric_tolerance_within_bound_passes() {
        assert!(stdout_matches("3.14159\n", "3.1415899999\n", false));
    }

    #[test]
    fn numeric_tolerance_outside_bound_fails() {
        assert!(!stdout_matches("3.2\n", "3.1\n", false));
    }

    #[test]
    fn lower_cmp_ignores_case() {
        assert!(stdout_matches("HELLO\n", "hello\n", true));
        assert!(!stdout_matches("HELLO\n", "hello\n", false));
    }

    #[test]
    fn mismatched_line_count_fails() {
        assert!(!stdout_matches("a\nb\n", "a\n", false));
    }
}
