//! Error types for the core layer
//!
//! Codec, reference and schema-definition failures. Validation failures of
//! record data are not errors at this level; see [`crate::validation`].
//! We use `thiserror` for automatic `Display` and `Error` trait implementations.

use thiserror::Error;

/// Result type alias for core operations
pub type Result<T> = std::result::Result<T, CoreError>;

/// Error types for the core layer
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CoreError {
    /// Bytes could not be decoded
    #[error("Codec error: {0}")]
    Codec(String),

    /// A reference does not resolve against the schema
    #[error("Invalid reference: {0}")]
    InvalidReference(String),

    /// A data model definition is malformed
    #[error("Invalid model definition: {0}")]
    InvalidModel(String),

    /// A value has the wrong shape for the operation
    #[error("Type mismatch: expected {expected}, got {actual}")]
    TypeMismatch {
        /// Expected shape
        expected: String,
        /// Shape that was found
        actual: String,
    },
}

impl CoreError {
    /// Create a codec error
    pub fn codec(message: impl Into<String>) -> Self {
        CoreError::Codec(message.into())
    }

    /// Create an invalid reference error
    pub fn invalid_reference(message: impl Into<String>) -> Self {
        CoreError::InvalidReference(message.into())
    }

    /// Create an invalid model error
    pub fn invalid_model(message: impl Into<String>) -> Self {
        CoreError::InvalidModel(message.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display_codec() {
        let err = CoreError::codec("unexpected end of input");
        let msg = err.to_string();
        assert!(msg.contains("Codec error"));
        assert!(msg.contains("unexpected end of input"));
    }

    #[test]
    fn test_error_display_type_mismatch() {
        let err = CoreError::TypeMismatch {
            expected: "String".to_string(),
            actual: "Int".to_string(),
        };
        let msg = err.to_string();
        assert!(msg.contains("String"));
        assert!(msg.contains("Int"));
    }
}
