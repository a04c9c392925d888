//! Common error types for the probe agent components.

use std::fmt;

/// A specialized Result type for probe agent operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Common error type for probe agent operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Assertion error: {0}")]
    Assertion(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl Error {
    /// Create a new configuration error.
    pub fn config(msg: impl fmt::Display) -> Self {
        Error::Config(msg.to_string())
    }

    /// Create a new assertion error.
    pub fn assertion(msg: impl fmt::Display) -> Self {
        Error::Assertion(msg.to_string())
    }

    /// Whether this error should reject a probe set at load time.
    pub fn is_config(&self) -> bool {
        matches!(self, Error::Config(_) | Error::Assertion(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        assert_eq!(
            Error::config("probe has no targets").to_string(),
            "Configuration error: probe has no targets"
        );
        assert_eq!(
            Error::assertion("unexpected token").to_string(),
            "Assertion error: unexpected token"
        );
    }

    #[test]
    fn test_is_config() {
        assert!(Error::config("x").is_config());
        assert!(Error::assertion("x").is_config());
        let io = Error::from(std::io::Error::other("disk gone"));
        assert!(!io.is_config());
    }
}
