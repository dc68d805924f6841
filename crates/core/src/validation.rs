//! Validation failures
//!
//! Validation never fails fast: every check appends to a list and the caller
//! decides once whether the whole operation is rejected. A
//! [`ValidationError::Umbrella`] groups per-item failures under the
//! collection they belong to.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::reference::Reference;
use crate::value::Value;
use crate::version::Version;

/// A single schema, uniqueness, size or precondition violation
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
pub enum ValidationError {
    /// Required property has no value
    #[error("Property {reference} is required")]
    Required {
        /// Missing property
        reference: Reference,
    },

    /// Final property already has a value
    #[error("Property {reference} is final and already set")]
    AlreadySet {
        /// Final property
        reference: Reference,
    },

    /// Value has the wrong shape for the property
    #[error("Property {reference} expects {expected}, got {actual}")]
    InvalidType {
        /// Property reference
        reference: Reference,
        /// Expected shape
        expected: String,
        /// Shape that was supplied
        actual: String,
    },

    /// Value falls outside the allowed range
    #[error("Value {value} at {reference} is out of range")]
    OutOfRange {
        /// Property reference
        reference: Reference,
        /// Offending value
        value: Value,
    },

    /// Collection or string size falls outside the allowed bounds
    #[error("Size {size} at {reference} is outside [{min:?}, {max:?}]")]
    InvalidSize {
        /// Property reference
        reference: Reference,
        /// Resulting size
        size: u32,
        /// Minimum size
        min: Option<u32>,
        /// Maximum size
        max: Option<u32>,
    },

    /// Value is otherwise invalid
    #[error("Invalid value at {reference}: {reason}")]
    InvalidValue {
        /// Property reference
        reference: Reference,
        /// Explanation
        reason: String,
    },

    /// Value at a Check reference differs from the expected value
    #[error("Check failed at {reference}: expected {expected:?}, found {actual:?}")]
    CheckMismatch {
        /// Checked reference
        reference: Reference,
        /// Value the caller expected
        expected: Value,
        /// Value currently stored
        actual: Option<Value>,
    },

    /// Unique value is already bound to another record
    #[error("Value at {reference} already exists on key {existing_key:02x?}")]
    AlreadyExists {
        /// Unique property
        reference: Reference,
        /// Key currently holding the value
        existing_key: Vec<u8>,
    },

    /// Optimistic-concurrency guard did not match
    #[error("Record version is {actual}, expected {expected}")]
    VersionMismatch {
        /// Version the caller expected
        expected: Version,
        /// Last version actually stored
        actual: Version,
    },

    /// Grouped failures of the items of one collection
    #[error("{} invalid item(s) at {reference}", errors.len())]
    Umbrella {
        /// Collection reference
        reference: Reference,
        /// Per-item failures
        errors: Vec<ValidationError>,
    },
}

impl ValidationError {
    /// Reference the failure is about, if any
    pub fn reference(&self) -> Option<&Reference> {
        match self {
            ValidationError::Required { reference }
            | ValidationError::AlreadySet { reference }
            | ValidationError::InvalidType { reference, .. }
            | ValidationError::OutOfRange { reference, .. }
            | ValidationError::InvalidSize { reference, .. }
            | ValidationError::InvalidValue { reference, .. }
            | ValidationError::CheckMismatch { reference, .. }
            | ValidationError::AlreadyExists { reference, .. }
            | ValidationError::Umbrella { reference, .. } => Some(reference),
            ValidationError::VersionMismatch { .. } => None,
        }
    }

    /// Shorthand for an invalid value error
    pub fn invalid(reference: &Reference, reason: impl Into<String>) -> Self {
        ValidationError::InvalidValue {
            reference: reference.clone(),
            reason: reason.into(),
        }
    }
}
