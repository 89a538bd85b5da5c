//! Test infrastructure for destination workers.
//!
//! Provides a scripted transport whose per-payload outcomes, delays and
//! connect failures are set up front, a journal of everything the workers
//! did, fixture builders, and polling helpers for thread-based tests.

#![warn(missing_docs)]
#![forbid(unsafe_code)]

use std::{
    thread,
    time::{Duration, Instant},
};

pub mod fixtures;
pub mod script;

pub use fixtures::{fast_pool_config, fast_worker_config, messages, test_stats};
pub use script::{JournalEntry, Script, ScriptedTransport, Step};

/// Installs a test-writer tracing subscriber once per process.
///
/// Honors `RUST_LOG`; defaults to errors only.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("error")),
        )
        .with_test_writer()
        .try_init();
}

/// Polls `condition` until it holds or `timeout` elapses.
///
/// Returns whether the condition was observed.
pub fn wait_until(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    loop {
        if condition() {
            return true;
        }
        if Instant::now() >= deadline {
            return false;
        }
        thread::sleep(Duration::from_millis(2));
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};

    use super::*;

    #[test]
    fn wait_until_observes_condition() {
        let calls = AtomicU32::new(0);
        assert!(wait_until(Duration::from_secs(1), || calls.fetch_add(1, Ordering::SeqCst) >= 3));
    }

    #[test]
    fn wait_until_gives_up() {
        let start = Instant::now();
        assert!(!wait_until(Duration::from_millis(20), || false));
        assert!(start.elapsed() >= Duration::from_millis(20));
    }
}
