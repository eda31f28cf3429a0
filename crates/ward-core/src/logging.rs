//! Logging initialization.
//!
//! One fmt subscriber with an `EnvFilter`; `RUST_LOG` controls verbosity
//! and defaults to `info`. Safe to call more than once (later calls are
//! no-ops), which keeps tests that share a process from fighting over the
//! global subscriber.

use tracing_subscriber::EnvFilter;

/// Install the global tracing subscriber.
pub fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .try_init();
}
