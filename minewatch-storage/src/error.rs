//! Error types for storage backends.

use thiserror::Error;

/// Errors raised by a [`StorageBackend`](crate::StorageBackend).
#[derive(Debug, Error)]
pub enum StorageError {
    /// The store could not be reached or opened.
    #[error("storage unreachable: {0}")]
    Connection(String),

    /// Creating tables or indexes failed.
    #[error("schema setup failed: {0}")]
    Schema(String),

    /// An append or delete was rejected.
    #[error("write failed: {0}")]
    Write(String),

    /// A query failed or returned rows that could not be decoded.
    #[error("read failed: {0}")]
    Read(String),

    /// The blocking task running a query panicked or was cancelled.
    #[error("storage task failed: {0}")]
    Task(String),
}

impl StorageError {
    /// Whether the operation may succeed if attempted again later.
    pub fn is_retryable(&self) -> bool {
        matches!(self, StorageError::Connection(_) | StorageError::Task(_))
    }

    /// Whether the store as a whole is unavailable, as opposed to a single
    /// statement failing.
    pub fn is_unavailable(&self) -> bool {
        matches!(self, StorageError::Connection(_))
    }
}

/// Result type for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryable_classification() {
        assert!(StorageError::Connection("refused".into()).is_retryable());
        assert!(StorageError::Task("panicked".into()).is_retryable());
        assert!(!StorageError::Schema("bad".into()).is_retryable());
        assert!(!StorageError::Write("constraint".into()).is_retryable());
    }

    #[test]
    fn display_includes_cause() {
        let err = StorageError::Read("no such table: pings".into());
        assert_eq!(err.to_string(), "read failed: no such table: pings");
    }
}
