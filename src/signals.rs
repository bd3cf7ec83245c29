//! Signal handling for graceful shutdown of the HTTP service (§A.3/§6
//! ambient concern: a long-running server needs to stop accepting new
//! requests and let in-flight ones finish before exiting).
//!
//! Generalizes the teacher's `signals.rs` (SIGINT routed away from
//! shutdown while `IS_DEBUGGING` was set, for its interactive TTY-proxy
//! debug mode) — this service has no such mode, so every one of
//! SIGINT/SIGTERM/SIGQUIT always requests shutdown. The daemon-thread
//! signal-handling idiom and the `AtomicBool` flag are kept as-is.

use signal_hook::consts::{SIGINT, SIGQUIT, SIGTERM};
use signal_hook::iterator::Signals;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use tracing::info;

/// Set once a shutdown signal has been received; polled by the HTTP
/// server's graceful-shutdown path and the evaluator's fan-out loop.
pub static SHUTDOWN_REQUESTED: AtomicBool = AtomicBool::new(false);

/// Spawn a daemon thread that listens for SIGINT/SIGTERM/SIGQUIT and flips
/// `SHUTDOWN_REQUESTED`. The thread dies with the process; nothing needs
/// to join it.
pub fn install_signal_handlers() -> Result<(), Box<dyn std::error::Error>> {
    let mut signals = Signals::new([SIGINT, SIGTERM, SIGQUIT])?;

    thread::spawn(move || {
        for sig in signals.forever() {
            info!(signal = sig, "received shutdown signal");
            SHUTDOWN_REQUESTED.store(true, Ordering::SeqCst);
        }
    });

    Ok(())
}

#[inline]
pub fn shutdown_requested() -> bool {
    SHUTDOWN_REQUESTED.load(Ordering::SeqCst)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shutdown_flag_round_trips() {
        assert!(!shutdown_requested());
        SHUTDOWN_REQUESTED.store(true, Ordering::SeqCst);
        assert!(shutdown_requested());
        SHUTDOWN_REQUESTED.store(false, Ordering::SeqCst);
    }
}
