//! Error types for the studio limiter.

use thiserror::Error;

/// Main error type for limiter operations.
///
/// Admission denials are not errors; they are returned as data. These variants
/// cover configuration problems that should be caught before traffic flows.
#[derive(Error, Debug)]
pub enum LimiterError {
    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// A rate-limit class name that is not in the limit table
    #[error("Unknown rate limit class: {0}")]
    UnknownClass(String),

    /// A class whose bucket parameters violate the table invariants
    #[error("Invalid rate limit class '{class}': {reason}")]
    InvalidClass { class: String, reason: String },
}

impl From<config::ConfigError> for LimiterError {
    fn from(err: config::ConfigError) -> Self {
        LimiterError::Config(err.to_string())
    }
}

/// Result type alias for limiter operations.
pub type Result<T> = std::result::Result<T, LimiterError>;
