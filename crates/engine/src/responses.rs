//! Response and status types
//!
//! Mutations answer with one status per input object, in input order. A
//! status is an outcome, not an error: validation failures and conflicts of
//! one record never affect the others.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use vellum_core::{Change, RecordKey, ValidationError, Value, Values, Version};

use crate::updates::Update;

/// Outcome of adding one record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum AddStatus {
    /// Record committed
    Success {
        /// Assigned key
        key: RecordKey,
        /// Commit version
        version: Version,
        /// Derived changes: `ObjectCreate` and index updates
        changes: Vec<Change>,
    },
    /// A record with the key exists
    AlreadyExists {
        /// Taken key
        key: RecordKey,
    },
    /// Values were rejected
    ValidationFail(Vec<ValidationError>),
    /// Storage failure
    ServerFail(String),
}

/// Outcome of changing one record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ChangeStatus {
    /// Changes committed
    Success {
        /// Commit version
        version: Version,
        /// Caller changes followed by derived changes
        changes: Vec<Change>,
    },
    /// No record has the key
    DoesNotExist {
        /// Missing key
        key: RecordKey,
    },
    /// Changes were rejected, nothing was applied
    ValidationFail(Vec<ValidationError>),
    /// Storage failure
    ServerFail(String),
}

/// Outcome of deleting one record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum DeleteStatus {
    /// Deletion committed
    Success {
        /// Commit version
        version: Version,
    },
    /// No record has the key
    DoesNotExist {
        /// Missing key
        key: RecordKey,
    },
    /// Storage failure
    ServerFail(String),
}

impl AddStatus {
    /// Check if the record was committed
    pub fn is_success(&self) -> bool {
        matches!(self, AddStatus::Success { .. })
    }
}

impl ChangeStatus {
    /// Check if the changes were committed
    pub fn is_success(&self) -> bool {
        matches!(self, ChangeStatus::Success { .. })
    }
}

impl DeleteStatus {
    /// Check if the deletion was committed
    pub fn is_success(&self) -> bool {
        matches!(self, DeleteStatus::Success { .. })
    }
}

/// One record with its version metadata
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValuesWithMetaData {
    /// Record key
    pub key: RecordKey,
    /// Selected values
    pub values: Values,
    /// Creation version
    pub first_version: Version,
    /// Most recent write
    pub last_version: Version,
    /// Soft-delete flag
    pub is_deleted: bool,
}

/// Answer to a get or scan
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValuesResponse {
    /// Model name
    pub model: String,
    /// Matching records, in request or scan order
    pub values: Vec<ValuesWithMetaData>,
    /// Aggregation results by name
    pub aggregations: BTreeMap<String, Option<Value>>,
}

/// Changes committed at one version
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionedChanges {
    /// Commit version
    pub version: Version,
    /// Changes of that commit
    pub changes: Vec<Change>,
}

/// Change history of one record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataObjectVersionedChange {
    /// Record key
    pub key: RecordKey,
    /// Index value when scanned by index
    pub sort_key: Option<Vec<u8>>,
    /// Versions in ascending order
    pub changes: Vec<VersionedChanges>,
}

/// Answer to a change read
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangesResponse {
    /// Model name
    pub model: String,
    /// Records with changes in the window
    pub changes: Vec<DataObjectVersionedChange>,
}

/// Answer to an update read
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UpdatesResponse {
    /// Model name
    pub model: String,
    /// Updates, led by the new ordered key list
    pub updates: Vec<Update>,
}
