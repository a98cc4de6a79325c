//! Logging utilities for cayx
//!
//! Helpers for initializing a tracing subscriber. Executed SQL and its
//! bindings are emitted at `debug` under the [`SQL_TARGET`] target, so
//! `RUST_LOG=cayx::sql=debug` shows only the statements.

#[cfg(feature = "logging")]
use tracing_subscriber::{EnvFilter, fmt};

/// tracing target used for every executed statement
pub const SQL_TARGET: &str = "cayx::sql";

/// Initialize logging with default settings
///
/// # Environment Variables
/// - `RUST_LOG` - Log level filter (default: "info")
#[cfg(feature = "logging")]
pub fn init() {
    init_with_filter("info")
}

/// Initialize logging with a specific level (trace, debug, info, warn, error)
#[cfg(feature = "logging")]
pub fn init_with_level(level: &str) {
    init_with_filter(level)
}

/// Initialize logging with `info` everywhere and SQL statements at `debug`.
#[cfg(feature = "logging")]
pub fn init_sql_trace() {
    init_with_filter(&format!("info,{SQL_TARGET}=debug"))
}

#[cfg(feature = "logging")]
fn init_with_filter(default_filter: &str) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));

    if let Err(e) = fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(true)
        .with_line_number(true)
        .try_init()
    {
        // the subscriber installed first keeps running and receives this
        tracing::debug!(error = %e, "tracing subscriber already installed");
    }
}

/// Initialize logging for tests (verbose, captured by the test harness)
#[cfg(feature = "logging")]
pub fn init_test() {
    let _ = fmt()
        .with_env_filter(EnvFilter::new("debug"))
        .with_test_writer()
        .try_init();
}

// Stub implementations when logging feature is disabled
#[cfg(not(feature = "logging"))]
pub fn init() {}

#[cfg(not(feature = "logging"))]
pub fn init_with_level(_level: &str) {}

#[cfg(not(feature = "logging"))]
pub fn init_sql_trace() {}

#[cfg(not(feature = "logging"))]
pub fn init_test() {}

#[cfg(all(test, feature = "logging"))]
mod tests {
    use super::*;

    #[test]
    fn test_repeated_init_keeps_first_subscriber() {
        init_test();
        init_with_level("warn");
        init_sql_trace();
        tracing::debug!(target: SQL_TARGET, "still logging");
    }
}
