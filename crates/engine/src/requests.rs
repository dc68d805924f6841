//! Request types
//!
//! Requests name their model by string; the store resolves it against the
//! registry. Read requests share their selection and filtering fields through
//! [`GetRequest`] and [`ScanRequest`], which the change and update requests
//! embed.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use vellum_core::{Change, Filter, IsIndexable, RecordKey, SelectGraph, Values, Version};

use crate::aggregation::Aggregation;

/// Default scan limit
pub const DEFAULT_SCAN_LIMIT: u32 = 100;

// ============================================================================
// Mutations
// ============================================================================

/// One record to add
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AddObject {
    /// Explicit key, derived or random when absent
    pub key: Option<RecordKey>,
    /// Record values
    pub values: Values,
}

/// Add records to a model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AddRequest {
    /// Model name
    pub model: String,
    /// Records, each committed independently
    pub objects: Vec<AddObject>,
}

impl AddRequest {
    /// Empty request
    pub fn new(model: impl Into<String>) -> Self {
        AddRequest {
            model: model.into(),
            objects: Vec::new(),
        }
    }

    /// Builder-style record with a store-chosen key
    pub fn object(mut self, values: Values) -> Self {
        self.objects.push(AddObject { key: None, values });
        self
    }

    /// Builder-style record with an explicit key
    pub fn object_with_key(mut self, key: RecordKey, values: Values) -> Self {
        self.objects.push(AddObject {
            key: Some(key),
            values,
        });
        self
    }
}

/// Changes to one record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeObject {
    /// Record key
    pub key: RecordKey,
    /// Optimistic guard: the record's expected last version
    pub last_version: Option<Version>,
    /// Ordered changes, applied atomically
    pub changes: Vec<Change>,
}

/// Change records of a model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeRequest {
    /// Model name
    pub model: String,
    /// Records with their changes
    pub objects: Vec<ChangeObject>,
}

impl ChangeRequest {
    /// Empty request
    pub fn new(model: impl Into<String>) -> Self {
        ChangeRequest {
            model: model.into(),
            objects: Vec::new(),
        }
    }

    /// Builder-style unguarded record change
    pub fn object(mut self, key: RecordKey, changes: Vec<Change>) -> Self {
        self.objects.push(ChangeObject {
            key,
            last_version: None,
            changes,
        });
        self
    }

    /// Builder-style record change guarded by the expected last version
    pub fn guarded(mut self, key: RecordKey, last_version: Version, changes: Vec<Change>) -> Self {
        self.objects.push(ChangeObject {
            key,
            last_version: Some(last_version),
            changes,
        });
        self
    }
}

/// Delete records of a model
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeleteRequest {
    /// Model name
    pub model: String,
    /// Record keys
    pub keys: Vec<RecordKey>,
    /// Erase all traces instead of setting the soft-delete flag
    pub hard_delete: bool,
}

impl DeleteRequest {
    /// Soft delete
    pub fn soft(model: impl Into<String>, keys: Vec<RecordKey>) -> Self {
        DeleteRequest {
            model: model.into(),
            keys,
            hard_delete: false,
        }
    }

    /// Hard delete
    pub fn hard(model: impl Into<String>, keys: Vec<RecordKey>) -> Self {
        DeleteRequest {
            model: model.into(),
            keys,
            hard_delete: true,
        }
    }
}

// ============================================================================
// Reads
// ============================================================================

/// Fetch records by key
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GetRequest {
    /// Model name
    pub model: String,
    /// Record keys, answered in this order
    pub keys: Vec<RecordKey>,
    /// Properties to return, all when absent
    pub select: Option<SelectGraph>,
    /// Records must match
    pub filter: Option<Filter>,
    /// Read as of this version
    pub to_version: Option<Version>,
    /// Skip soft-deleted records, store default when absent
    pub filter_soft_deleted: Option<bool>,
    /// Named aggregations over the matching records
    pub aggregations: BTreeMap<String, Aggregation>,
}

impl GetRequest {
    /// Get every property of `keys`
    pub fn new(model: impl Into<String>, keys: Vec<RecordKey>) -> Self {
        GetRequest {
            model: model.into(),
            keys,
            select: None,
            filter: None,
            to_version: None,
            filter_soft_deleted: None,
            aggregations: BTreeMap::new(),
        }
    }

    /// Builder-style selection
    pub fn select(mut self, select: SelectGraph) -> Self {
        self.select = Some(select);
        self
    }

    /// Builder-style filter
    pub fn filter(mut self, filter: Filter) -> Self {
        self.filter = Some(filter);
        self
    }

    /// Builder-style historic read
    pub fn at_version(mut self, version: Version) -> Self {
        self.to_version = Some(version);
        self
    }

    /// Builder-style soft-delete visibility
    pub fn include_soft_deleted(mut self) -> Self {
        self.filter_soft_deleted = Some(false);
        self
    }

    /// Builder-style aggregation
    pub fn aggregate(mut self, name: impl Into<String>, aggregation: Aggregation) -> Self {
        self.aggregations.insert(name.into(), aggregation);
        self
    }
}

/// Scan records in key or index order
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScanRequest {
    /// Model name
    pub model: String,
    /// Continue from this record
    pub start_key: Option<RecordKey>,
    /// Return the start record itself
    pub include_start: bool,
    /// Properties to return, all when absent
    pub select: Option<SelectGraph>,
    /// Records must match
    pub filter: Option<Filter>,
    /// Order by an index descriptor, key order when absent
    pub order: Option<IsIndexable>,
    /// Iterate in reverse
    pub descending: bool,
    /// Read as of this version
    pub to_version: Option<Version>,
    /// Skip soft-deleted records, store default when absent
    pub filter_soft_deleted: Option<bool>,
    /// Maximum records returned, capped by the store's scan limit
    pub limit: u32,
    /// Named aggregations over the matching records
    pub aggregations: BTreeMap<String, Aggregation>,
}

impl ScanRequest {
    /// Scan a model in key order
    pub fn new(model: impl Into<String>) -> Self {
        ScanRequest {
            model: model.into(),
            start_key: None,
            include_start: true,
            select: None,
            filter: None,
            order: None,
            descending: false,
            to_version: None,
            filter_soft_deleted: None,
            limit: DEFAULT_SCAN_LIMIT,
            aggregations: BTreeMap::new(),
        }
    }

    /// Builder-style continuation
    pub fn start_at(mut self, key: RecordKey, include_start: bool) -> Self {
        self.start_key = Some(key);
        self.include_start = include_start;
        self
    }

    /// Builder-style selection
    pub fn select(mut self, select: SelectGraph) -> Self {
        self.select = Some(select);
        self
    }

    /// Builder-style filter
    pub fn filter(mut self, filter: Filter) -> Self {
        self.filter = Some(filter);
        self
    }

    /// Builder-style order
    pub fn order_by(mut self, order: IsIndexable) -> Self {
        self.order = Some(order);
        self
    }

    /// Builder-style reverse iteration
    pub fn descending(mut self) -> Self {
        self.descending = true;
        self
    }

    /// Builder-style historic read
    pub fn at_version(mut self, version: Version) -> Self {
        self.to_version = Some(version);
        self
    }

    /// Builder-style soft-delete visibility
    pub fn include_soft_deleted(mut self) -> Self {
        self.filter_soft_deleted = Some(false);
        self
    }

    /// Builder-style limit
    pub fn limit(mut self, limit: u32) -> Self {
        self.limit = limit;
        self
    }

    /// Builder-style aggregation
    pub fn aggregate(mut self, name: impl Into<String>, aggregation: Aggregation) -> Self {
        self.aggregations.insert(name.into(), aggregation);
        self
    }
}

/// Change history of records by key
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GetChangesRequest {
    /// Records to read
    pub get: GetRequest,
    /// Oldest version of interest, inclusive
    pub from_version: Version,
    /// Versions kept per value
    pub max_versions: u32,
}

impl GetChangesRequest {
    /// Latest changes since `from_version`
    pub fn new(get: GetRequest, from_version: Version) -> Self {
        GetChangesRequest {
            get,
            from_version,
            max_versions: 1,
        }
    }

    /// Builder-style version window
    pub fn max_versions(mut self, max_versions: u32) -> Self {
        self.max_versions = max_versions;
        self
    }
}

/// Change history of scanned records
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScanChangesRequest {
    /// Records to read
    pub scan: ScanRequest,
    /// Oldest version of interest, inclusive
    pub from_version: Version,
    /// Versions kept per value
    pub max_versions: u32,
}

impl ScanChangesRequest {
    /// Latest changes since `from_version`
    pub fn new(scan: ScanRequest, from_version: Version) -> Self {
        ScanChangesRequest {
            scan,
            from_version,
            max_versions: 1,
        }
    }

    /// Builder-style version window
    pub fn max_versions(mut self, max_versions: u32) -> Self {
        self.max_versions = max_versions;
        self
    }
}

/// Updates of records by key since a version
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GetUpdatesRequest {
    /// Records to read
    pub get: GetRequest,
    /// Oldest version of interest, inclusive
    pub from_version: Version,
    /// Versions kept per value
    pub max_versions: u32,
    /// Keys of the previous result, in order
    pub ordered_keys: Option<Vec<RecordKey>>,
}

impl GetUpdatesRequest {
    /// Updates since `from_version`
    pub fn new(get: GetRequest, from_version: Version) -> Self {
        GetUpdatesRequest {
            get,
            from_version,
            max_versions: 1,
            ordered_keys: None,
        }
    }

    /// Builder-style previous result
    pub fn ordered_keys(mut self, keys: Vec<RecordKey>) -> Self {
        self.ordered_keys = Some(keys);
        self
    }
}

/// Updates of scanned records since a version
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScanUpdatesRequest {
    /// Records to read
    pub scan: ScanRequest,
    /// Oldest version of interest, inclusive
    pub from_version: Version,
    /// Versions kept per value
    pub max_versions: u32,
    /// Keys of the previous result, in order
    pub ordered_keys: Option<Vec<RecordKey>>,
}

impl ScanUpdatesRequest {
    /// Updates since `from_version`
    pub fn new(scan: ScanRequest, from_version: Version) -> Self {
        ScanUpdatesRequest {
            scan,
            from_version,
            max_versions: 1,
            ordered_keys: None,
        }
    }

    /// Builder-style previous result
    pub fn ordered_keys(mut self, keys: Vec<RecordKey>) -> Self {
        self.ordered_keys = Some(keys);
        self
    }
}
