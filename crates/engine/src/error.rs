//! Engine errors
//!
//! Expected request outcomes (validation failures, missing records, already
//! existing records) are reported through the per-object status types in
//! [`crate::responses`]. `StoreError` covers what aborts a whole request:
//! structurally disallowed requests, unknown models and substrate failures.

use thiserror::Error;
use vellum_core::CoreError;
use vellum_storage::StorageError;

/// Result type alias for engine operations
pub type Result<T> = std::result::Result<T, StoreError>;

/// Error types for the engine
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    /// Substrate failure
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    /// Codec or schema failure
    #[error(transparent)]
    Core(#[from] CoreError),

    /// The caller asked for a structurally disallowed operation
    #[error("Request error: {0}")]
    Request(String),

    /// No model with this name is registered
    #[error("Unknown model '{0}'")]
    UnknownModel(String),

    /// Configuration could not be read or parsed
    #[error("Config error: {0}")]
    Config(String),
}

impl StoreError {
    /// Create a request error
    pub fn request(message: impl Into<String>) -> Self {
        StoreError::Request(message.into())
    }

    /// Check if this is a request error
    pub fn is_request(&self) -> bool {
        matches!(self, StoreError::Request(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_core_is_transparent() {
        let err: StoreError = CoreError::codec("bad tag").into();
        assert_eq!(err.to_string(), "Codec error: bad tag");
    }

    #[test]
    fn test_request_error() {
        let err = StoreError::request("use ListChange");
        assert!(err.is_request());
        assert!(err.to_string().contains("use ListChange"));
    }
}
