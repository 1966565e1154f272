//! Configuration error types.

use std::path::PathBuf;
use thiserror::Error;

/// Configuration-related errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Configuration file not found.
    #[error("configuration file not found: {0}")]
    NotFound(PathBuf),

    /// Failed to read the configuration file.
    #[error("failed to read configuration file '{path}': {source}")]
    ReadError {
        /// Path to the configuration file.
        path: PathBuf,
        /// Underlying IO error.
        #[source]
        source: std::io::Error,
    },

    /// Failed to parse the JSON content.
    #[error("failed to parse JSON: {0}")]
    ParseError(#[from] serde_json::Error),

    /// A forwarding rule failed validation.
    #[error("invalid forwarding rule {id}: {message}")]
    InvalidRule {
        /// The rule id.
        id: u32,
        /// What is wrong with the rule.
        message: String,
    },
}

/// Result type for configuration operations.
pub type ConfigResult<T> = Result<T, ConfigError>;
