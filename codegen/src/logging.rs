//! Development-time tracing for debugging sessions.
//!
//! Tracing is diagnostics only, written to stderr and filtered by `RUST_LOG`.
//! Product signals go through [`crate::io::sink::TelemetrySink`] and the JSON
//! summary printed by the CLI, neither of which depends on the filter.

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Initialize the tracing subscriber.
///
/// Reads `RUST_LOG`, defaulting to `warn`. Output: stderr, compact format.
///
/// # Example
/// ```bash
/// RUST_LOG=codegen=debug,codegen::telemetry=info codegen turn --root . -m "add tests"
/// ```
pub fn init() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr).compact())
        .init();
}
