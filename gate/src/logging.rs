//! Diagnostic tracing for the gate.
//!
//! Tracing is for debugging the gate itself (`RUST_LOG`, stderr). The progress
//! marks and failure report are product output and go through
//! [`crate::report::ConsoleWriter`] regardless of the filter.

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Initialize the tracing subscriber.
///
/// Reads `RUST_LOG`. Defaults to `warn` if unset, which keeps slow-checker
/// warnings visible.
///
/// # Example
/// ```bash
/// RUST_LOG=gate=debug gate check
/// ```
pub fn init() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr).compact())
        .init();
}
