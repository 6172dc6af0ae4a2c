//! Error types for aggregation, caching and identity operations
//!
//! Backend and cache-tier errors are contained at their component boundary
//! and only ever logged or counted. Validation and configuration errors are
//! the two kinds that reach a caller.

use thiserror::Error;

/// Main error type for the aggregator
#[derive(Error, Debug)]
pub enum AggregatorError {
    /// A knowledge backend returned an error
    #[error("Backend '{backend}' failed: {message}")]
    BackendFailure { backend: String, message: String },

    /// A knowledge backend did not answer within its budget
    #[error("Backend '{backend}' timed out after {timeout_ms}ms")]
    Timeout { backend: String, timeout_ms: u64 },

    /// A cache tier store could not be reached
    #[error("Cache tier '{tier}' failed: {message}")]
    CacheTierFailure { tier: String, message: String },

    /// Token rejected by the validator
    #[error("Authentication failed: {0}")]
    ValidationFailure(String),

    /// Invalid startup configuration
    #[error("Configuration error: {0}")]
    ConfigurationError(String),

    /// Serialization/Deserialization error
    #[error("Serialization error: {0}")]
    SerializationError(String),

    /// Generic error with context
    #[error("Error: {0}")]
    Other(String),
}

impl AggregatorError {
    /// Shorthand for a backend failure
    pub fn backend(backend: impl Into<String>, message: impl Into<String>) -> Self {
        AggregatorError::BackendFailure {
            backend: backend.into(),
            message: message.into(),
        }
    }

    /// Shorthand for a cache tier failure
    pub fn tier(tier: impl Into<String>, message: impl Into<String>) -> Self {
        AggregatorError::CacheTierFailure {
            tier: tier.into(),
            message: message.into(),
        }
    }

    /// Errors that are allowed to reach the caller
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            AggregatorError::ValidationFailure(_) | AggregatorError::ConfigurationError(_)
        )
    }

    /// Errors that are caught at a component boundary and degrade to
    /// "no results" or "cache miss"
    pub fn is_contained(&self) -> bool {
        matches!(
            self,
            AggregatorError::BackendFailure { .. }
                | AggregatorError::Timeout { .. }
                | AggregatorError::CacheTierFailure { .. }
        )
    }
}

/// Result type alias for aggregator operations
pub type Result<T> = std::result::Result<T, AggregatorError>;

impl From<String> for AggregatorError {
    fn from(s: String) -> Self {
        AggregatorError::Other(s)
    }
}

impl From<&str> for AggregatorError {
    fn from(s: &str) -> Self {
        AggregatorError::Other(s.to_string())
    }
}

impl From<serde_json::Error> for AggregatorError {
    fn from(e: serde_json::Error) -> Self {
        AggregatorError::SerializationError(e.to_string())
    }
}
