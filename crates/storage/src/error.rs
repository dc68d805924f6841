//! Storage errors

use thiserror::Error;

/// Result type alias for storage operations
pub type Result<T> = std::result::Result<T, StorageError>;

/// Error types for the storage layer
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StorageError {
    /// Operation on a transaction that already committed or aborted
    #[error("Transaction is not active: {0}")]
    TransactionNotActive(String),

    /// Savepoint does not belong to this transaction or was discarded
    #[error("Unknown savepoint {0}")]
    UnknownSavepoint(usize),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = StorageError::UnknownSavepoint(3);
        assert_eq!(err.to_string(), "Unknown savepoint 3");
    }
}
