//! Error types for quill-core

use thiserror::Error;

/// Result type alias using quill-core's Error
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in quill-core operations
#[derive(Error, Debug)]
pub enum Error {
    /// Bad input shape or values; rejected immediately, never retried
    #[error("Validation error: {0}")]
    Validation(String),

    /// Missing note/version/conflict
    #[error("Not found: {0}")]
    NotFound(String),

    /// Operation violates a state-machine invariant
    /// (e.g., promoting a version that is not synced)
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// Store failure; retried only by the sync coordinator's backoff
    #[error("Storage error: {0}")]
    Storage(String),

    /// libSQL error
    #[error("libSQL error: {0}")]
    LibSql(#[from] libsql::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl Error {
    /// Whether the sync coordinator may retry the failed operation.
    ///
    /// Validation and state errors are permanent; only store-level
    /// failures are worth another attempt.
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::Storage(_) | Self::LibSql(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_classification() {
        assert!(Error::Storage("connection reset".into()).is_retryable());
        assert!(!Error::Validation("empty title".into()).is_retryable());
        assert!(!Error::NotFound("note".into()).is_retryable());
        assert!(!Error::InvalidState("not synced".into()).is_retryable());
    }
}
