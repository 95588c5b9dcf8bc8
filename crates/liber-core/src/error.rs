//! Error types for the Liber engine.

use std::time::Duration;

use thiserror::Error;

/// Result type alias using Liber's Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Core error type for Liber operations.
#[derive(Error, Debug)]
pub enum Error {
    /// Database operation failed (wraps sqlx::Error)
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Unknown recommendation algorithm selector. Not retried.
    #[error("Invalid algorithm: {0}")]
    InvalidAlgorithm(String),

    /// Malformed input data during scoring (e.g. mismatched vector
    /// dimensions). Not retried.
    #[error("Computation error: {0}")]
    Computation(String),

    /// Task name not present in the scheduler registry. Not retried.
    #[error("Unknown task: {0}")]
    UnknownTask(String),

    /// Task submission exceeded the configured rate for its type.
    /// Transient; the caller should back off and may resubmit.
    #[error("Rate limited: {task} (retry after {retry_after:?})")]
    RateLimited { task: String, retry_after: Duration },

    /// Task exceeded its hard time limit and was terminated.
    #[error("Task timed out: {task} (limit {limit:?})")]
    Timeout { task: String, limit: Duration },

    /// Conflicting operation in progress (e.g. a generation already in
    /// flight for the same user).
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Resource not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// User not found
    #[error("User not found: {0}")]
    UserNotFound(String),

    /// Collaborative-signal backend failed
    #[error("Signal error: {0}")]
    Signal(String),

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Invalid input
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),

    /// File I/O operation failed
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Whether the scheduler may retry a task that failed with this error.
    ///
    /// Validation, routing, and missing-entity failures are deterministic
    /// and never retried; everything else is assumed transient until
    /// retries are exhausted.
    pub fn is_retryable(&self) -> bool {
        !matches!(
            self,
            Error::InvalidAlgorithm(_)
                | Error::Computation(_)
                | Error::UnknownTask(_)
                | Error::InvalidInput(_)
                | Error::Config(_)
                | Error::NotFound(_)
                | Error::UserNotFound(_)
        )
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}
