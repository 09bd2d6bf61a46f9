//! Shared logging utilities for consistent tracing across testbed components
//!
//! Diagnostics always go to stderr: stdout belongs to command reports, which
//! callers pipe into other tools.

use chrono::{DateTime, Utc};
use tracing::error;

/// Default filter directive for the testbed crates at the given level
pub fn default_filter(log_level: Option<&str>) -> String {
    let base_level = log_level.unwrap_or("warn");
    format!("testbed={base_level},iptb={base_level},shared={base_level},reqwest=warn,hyper=warn")
}

/// Initialize the tracing subscriber; `RUST_LOG` takes precedence over `log_level`
pub fn init_tracing(log_level: Option<&str>) {
    use tracing_subscriber::{fmt, EnvFilter};

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_filter(log_level)));

    // A second init (tests, embedding) keeps the first subscriber.
    let _ = fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .try_init();
}

/// Get formatted timestamp for consistent logging
pub fn format_timestamp() -> String {
    let now: DateTime<Utc> = Utc::now();
    now.format("%H:%M:%S%.3f").to_string()
}

/// Label used for the `node` field of node-tagged events
pub fn node_label(index: usize) -> String {
    format!("node[{index}]")
}

/// Macro for node-aware info logging
#[macro_export]
macro_rules! node_info {
    ($node:expr, $($arg:tt)*) => {
        tracing::info!(
            node = %$node,
            timestamp = $crate::logging::format_timestamp(),
            $($arg)*
        );
    };
}

/// Macro for node-aware warning logging
#[macro_export]
macro_rules! node_warn {
    ($node:expr, $($arg:tt)*) => {
        tracing::warn!(
            node = %$node,
            timestamp = $crate::logging::format_timestamp(),
            $($arg)*
        );
    };
}

/// Macro for node-aware debug logging
#[macro_export]
macro_rules! node_debug {
    ($node:expr, $($arg:tt)*) => {
        tracing::debug!(
            node = %$node,
            timestamp = $crate::logging::format_timestamp(),
            $($arg)*
        );
    };
}

/// Contextual logging helper for error conditions
pub fn log_error(context: &str, error: &dyn std::fmt::Display) {
    error!(
        timestamp = format_timestamp(),
        error = %error,
        "{} failed",
        context
    );
}
