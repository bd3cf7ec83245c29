//! Reporter module: trait-based output for human (stderr) and machine
//! (NDJSON stdout) observability of the run lifecycle (§A.1 ambient
//! logging surface).
//!
//! Generalizes the teacher's `reporter.rs` (`RunStart`/`TestStart`/
//! `TestFinished`/`RunFinished`/`Error` for a pytest-style test run) to the
//! sandbox's own lifecycle: one request, up to two phases (compile/run),
//! a final status. Stdout purity is preserved exactly as the teacher
//! specified it: only `JsonReporter` ever touches stdout; everything else
//! goes to stderr or `tracing`.

use serde::Serialize;

/// Machine-readable events for JSON output (NDJSON, one object per line).
#[derive(Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum MachineEvent<'a> {
    RequestStart { request_id: &'a str, language: &'a str },
    PhaseFinished { request_id: &'a str, phase: &'a str, status: &'a str, duration_ms: u64 },
    RequestFinished { request_id: &'a str, status: &'a str, duration_ms: u64 },
    Error { request_id: &'a str, message: &'a str },
}

/// Reporter trait for output abstraction.
pub trait Reporter {
    fn on_request_start(&mut self, request_id: &str, language: &str);
    fn on_phase_finished(&mut self, request_id: &str, phase: &str, status: &str, duration_ms: u64);
    fn on_request_finished(&mut self, request_id: &str, status: &str, duration_ms: u64);
    fn on_error(&mut self, request_id: &str, message: &str);
}

/// Outputs NDJSON to stdout. Only this reporter touches stdout.
pub struct JsonReporter;

impl Reporter for JsonReporter {
    fn on_request_start(&mut self, request_id: &str, language: &str) {
        let event = MachineEvent::RequestStart { request_id, language };
        println!("{}", serde_json::to_string(&event).unwrap());
    }

    fn on_phase_finished(&mut self, request_id: &str, phase: &str, status: &str, duration_ms: u64) {
        let event = MachineEvent::PhaseFinished { request_id, phase, status, duration_ms };
        println!("{}", serde_json::to_string(&event).unwrap());
    }

    fn on_request_finished(&mut self, request_id: &str, status: &str, duration_ms: u64) {
        let event = MachineEvent::RequestFinished { request_id, status, duration_ms };
        println!("{}", serde_json::to_string(&event).unwrap());
    }

    fn on_error(&mut self, request_id: &str, message: &str) {
        let event = MachineEvent::Error { request_id, message };
        println!("{}", serde_json::to_string(&event).unwrap());
    }
}

/// Outputs human-readable text to stderr; primarily useful for the CLI
/// smoke-test path rather than the HTTP service, which reports through
/// `tracing` instead.
pub struct HumanReporter;

impl Reporter for HumanReporter {
    fn on_request_start(&mut self, request_id: &str, language: &str) {
        eprintln!("[sandbox-engine] {request_id} starting ({language})");
    }

    fn on_phase_finished(&mut self, request_id: &str, phase: &str, status: &str, duration_ms: u64) {
        eprintln!("[sandbox-engine] {request_id} {phase} -> {status} ({duration_ms}ms)");
    }

    fn on_request_finished(&mut self, request_id: &str, status: &str, duration_ms: u64) {
        eprintln!("[sandbox-engine] {request_id} finished -> {status} ({duration_ms}ms)");
    }

    fn on_error(&mut self, request_id: &str, message: &str) {
        eprintln!("[sandbox-engine] {request_id} FATAL ERROR: {message}");
    }
}

/// Broadcasts events to multiple reporters.
pub struct MultiReporter {
    reporters: Vec<Box<dyn Reporter>>,
}

impl MultiReporter {
    pub fn new(reporters: Vec<Box<dyn Reporter>>) -> Self {
        Self { reporters }
    }
}

impl Reporter for MultiReporter {
    fn on_request_start(&mut self, request_id: &str, language: &str) {
        for r in &mut self.reporters {
            r.on_request_start(request_id, language);
        }
    }

    fn on_phase_finished(&mut self, request_id: &str, phase: &str, status: &str, duration_ms: u64) {
        for r in &mut self.reporters {
            r.on_phase_finished(request_id, phase, status, duration_ms);
        }
    }

    fn on_request_finished(&mut self, request_id: &str, status: &str, duration_ms: u64) {
        for r in &mut self.reporters {
            r.on_request_finished(request_id, status, duration_ms);
        }
    }

    fn on_error(&mut self, request_id: &str, message: &str) {
        for r in &mut self.reporters {
            r.on_error(request_id, message);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn phase_finished_event_serializes_with_tag() {
        let event = MachineEvent::PhaseFinished { request_id: "abc", phase: "compile", status: "Success", duration_ms: 42 };
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("\"event\":\"phase_finished\""));
        assert!(json.contains("\"phase\":\"compile\""));
    }

    #[test]
    fn error_event_serializes() {
        let event = MachineEvent::Error { request_id: "abc", message: "sandbox setup failed" };
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("\"event\":\"error\""));
    }
}
