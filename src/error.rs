//! Typed error boundary for the engine.
//!
//! Internal call chains still thread `anyhow::Result` the way the teacher's
//! `isolation.rs`/`lifecycle.rs` do — ad-hoc `.context(...)` is cheap and the
//! caller rarely needs to match on the failure kind. At the API boundary,
//! §7's error taxonomy needs to become a status code and an envelope, so it
//! is reified here as a `thiserror` enum instead of string-sniffing an
//! `anyhow::Error`.

use thiserror::Error;

/// Engine-level failure kinds, matching the taxonomy in spec §7.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("sandbox engine failure: {0}")]
    Sandbox(#[from] anyhow::Error),

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("unsupported language: {0}")]
    UnsupportedLanguage(String),
}

impl EngineError {
    /// True for failures that should be retried by a submission-level judge
    /// (§5 Retry discipline: retry on `SandboxError` only, never on `Failed`).
    pub fn is_retryable(&self) -> bool {
        matches!(self, EngineError::Sandbox(_))
    }
}

pub type EngineResult<T> = Result<T, EngineError>;
