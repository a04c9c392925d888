//! Logging utilities for probe agent components.

use tracing_subscriber::{EnvFilter, fmt, prelude::*};

fn filter(default_level: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level))
}

/// Initialize tracing with sensible defaults.
///
/// Uses the RUST_LOG environment variable to control log levels,
/// falling back to `default_level` (usually "info").
pub fn init(default_level: &str) {
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(filter(default_level))
        .init();
}

/// Initialize tracing with JSON formatting (useful for structured logging).
pub fn init_json(default_level: &str) {
    tracing_subscriber::registry()
        .with(fmt::layer().json())
        .with(filter(default_level))
        .init();
}

/// Initialize tracing according to a configured format name.
///
/// `"json"` selects [`init_json`]; anything else uses the plain formatter.
pub fn init_with_format(format: Option<&str>, default_level: &str) {
    match format {
        Some(f) if f.eq_ignore_ascii_case("json") => init_json(default_level),
        _ => init(default_level),
    }
}
