//! Error types for the mnemo core library.
//!
//! Misses are not errors: looking up an absent id yields `Option::None` or
//! `false`, because misses are routine under concurrent deletes. Errors are
//! reserved for upstream failures, admission rejection, and configuration.

use thiserror::Error;

/// Top-level error type for all mnemo operations.
#[derive(Error, Debug)]
pub enum MnemoError {
    /// The external pipeline backend failed an operation.
    #[error("Pipeline error during {operation}: {message}")]
    Pipeline {
        /// Which operation failed.
        operation: String,
        /// Backend-supplied failure description.
        message: String,
    },

    /// Admission control declined the request before it started.
    #[error("Request rejected by admission control: {operation} (key: {routing_key})")]
    Rejected {
        /// Which operation was rejected.
        operation: String,
        /// The routing key the controller rejected.
        routing_key: String,
    },

    /// A bounded join (batch group, shutdown wait) exceeded its deadline.
    #[error("Timed out after {elapsed_ms}ms waiting for {operation}")]
    Timeout {
        /// What was being waited for.
        operation: String,
        /// Milliseconds elapsed before giving up.
        elapsed_ms: u64,
    },

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(String),

    /// The manager has been shut down; no further operations are accepted.
    #[error("Memory manager is shut down")]
    ShuttingDown,

    /// Generic I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Convenience Result type alias.
pub type Result<T> = std::result::Result<T, MnemoError>;

impl MnemoError {
    /// Build a pipeline failure for `operation`.
    #[must_use]
    pub fn pipeline(operation: &str, message: impl Into<String>) -> Self {
        Self::Pipeline {
            operation: operation.to_string(),
            message: message.into(),
        }
    }
}
