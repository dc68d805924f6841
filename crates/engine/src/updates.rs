//! Update reconciliation
//!
//! Live queries poll with the keys of their previous result and the version
//! they last saw. The reconciler compares that against a fresh evaluation and
//! reports, in this order:
//!
//! - one `OrderedKeys` with the full new key order,
//! - a `Removal` per previous key that dropped out, with the reason,
//! - an `Addition` per key that entered, with its values and position,
//! - a `Change` per remaining key with changes since the anchor version.
//!
//! A record that drops out of a filtered or limited query while still live is
//! reported as `NotInRange`. The caller cannot tell that apart from a record
//! that only moved past the limit, so it is logged.

use rustc_hash::FxHashSet;
use serde::{Deserialize, Serialize};
use tracing::warn;

use vellum_core::{RecordKey, SelectGraph, Values, Version};
use vellum_storage::StoreSnapshot;

use crate::database::{DataStore, RegisteredModel};
use crate::error::Result;
use crate::reader::{read_changes, read_meta, read_record, ChangeWindow};
use crate::requests::ScanUpdatesRequest;
use crate::responses::{UpdatesResponse, VersionedChanges};
use crate::scan::ScanMatch;

/// Why a record left a live query
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RemovalReason {
    /// Record was erased
    HardDelete,
    /// Record was soft deleted
    SoftDelete,
    /// Record no longer matches or fell outside the limit
    NotInRange,
}

/// One difference between two evaluations of a query
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Update {
    /// Keys of the new evaluation, in order
    OrderedKeys {
        /// Record keys
        keys: Vec<RecordKey>,
        /// Index values, for index-ordered scans
        sort_keys: Option<Vec<Vec<u8>>>,
        /// Version the evaluation reflects
        version: Version,
    },
    /// Record entered the result
    Addition {
        /// Record key
        key: RecordKey,
        /// Creation version
        version: Version,
        /// Position in the new key order
        insertion_index: usize,
        /// Selected values
        values: Values,
    },
    /// Record left the result
    Removal {
        /// Record key
        key: RecordKey,
        /// Version of the removal
        version: Version,
        /// Cause
        reason: RemovalReason,
    },
    /// Record stayed and changed
    Change {
        /// Record key
        key: RecordKey,
        /// Changes since the anchor version
        changes: Vec<VersionedChanges>,
    },
}

/// Inputs of one reconciliation besides the fresh evaluation
#[derive(Debug, Clone, Copy)]
pub(crate) struct UpdateQuery<'r> {
    pub from_version: Version,
    pub to_version: Option<Version>,
    pub max_versions: u32,
    pub select: Option<&'r SelectGraph>,
    pub previous: Option<&'r [RecordKey]>,
    /// Filter or limit applied
    pub bounded: bool,
    pub keep_history: bool,
    /// Stable version taken before the evaluation's snapshot
    pub now: Version,
}

/// Diff a fresh evaluation against the previous result
pub(crate) fn reconcile(
    snapshot: &StoreSnapshot,
    model: &RegisteredModel,
    current: &[ScanMatch],
    query: &UpdateQuery<'_>,
) -> Result<Vec<Update>> {
    let keys: Vec<RecordKey> = current.iter().map(|m| RecordKey::from(m.key.as_slice())).collect();
    let sort_keys = if current.iter().any(|m| m.sort_key.is_some()) {
        Some(current.iter().map(|m| m.sort_key.clone().unwrap_or_default()).collect())
    } else {
        None
    };
    let mut updates = vec![Update::OrderedKeys {
        keys: keys.clone(),
        sort_keys,
        version: query.now,
    }];

    let present: FxHashSet<&[u8]> = current.iter().map(|m| m.key.as_slice()).collect();
    let previous: Option<FxHashSet<&[u8]>> = query
        .previous
        .map(|keys| keys.iter().map(RecordKey::as_bytes).collect());

    if let Some(previous_keys) = query.previous {
        for key in previous_keys {
            if present.contains(key.as_bytes()) {
                continue;
            }
            updates.push(removal(snapshot, model, key, query)?);
        }
    }

    let window = ChangeWindow {
        from_version: query.from_version,
        to_version: query.to_version,
        max_versions: query.max_versions,
    };
    let mut changes = Vec::new();
    for (position, key) in keys.iter().enumerate() {
        let record = match read_record(snapshot, model, key.as_bytes(), query.to_version, query.select)? {
            Some(record) => record,
            None => continue,
        };
        let is_new = match &previous {
            Some(previous) => !previous.contains(key.as_bytes()),
            None => record.first_version >= query.from_version,
        };
        if is_new {
            updates.push(Update::Addition {
                key: key.clone(),
                version: record.first_version,
                insertion_index: position,
                values: record.values,
            });
            continue;
        }
        let versioned = read_changes(
            snapshot,
            model,
            key.as_bytes(),
            window,
            query.select,
            query.keep_history,
        )?;
        if !versioned.is_empty() {
            changes.push(Update::Change {
                key: key.clone(),
                changes: versioned,
            });
        }
    }
    updates.extend(changes);
    Ok(updates)
}

fn removal(
    snapshot: &StoreSnapshot,
    model: &RegisteredModel,
    key: &RecordKey,
    query: &UpdateQuery<'_>,
) -> Result<Update> {
    let (version, reason) = match read_meta(snapshot, model, key.as_bytes(), query.to_version)? {
        None => (query.now, RemovalReason::HardDelete),
        Some(meta) if meta.is_deleted => (meta.last_version, RemovalReason::SoftDelete),
        Some(meta) => {
            if query.bounded {
                warn!(
                    target: "vellum::updates",
                    model = %model.name(),
                    key = %key,
                    "Record left a filtered or limited query while live"
                );
            }
            (meta.last_version, RemovalReason::NotInRange)
        }
    };
    Ok(Update::Removal {
        key: key.clone(),
        version,
        reason,
    })
}

// ============================================================================
// Listener
// ============================================================================

/// Polling handle of a live scan
///
/// Each poll reports what changed since the previous one and moves the
/// anchor forward.
pub struct UpdateListener<'s> {
    store: &'s DataStore,
    request: ScanUpdatesRequest,
}

impl<'s> UpdateListener<'s> {
    pub(crate) fn new(store: &'s DataStore, request: ScanUpdatesRequest) -> Self {
        UpdateListener { store, request }
    }

    /// Reconcile against the current state
    pub fn poll(&mut self) -> Result<UpdatesResponse> {
        let response = self.store.scan_updates(&self.request)?;
        for update in &response.updates {
            if let Update::OrderedKeys { keys, version, .. } = update {
                self.request.ordered_keys = Some(keys.clone());
                self.request.from_version = version.next();
            }
        }
        Ok(response)
    }

    /// Keys of the last poll
    pub fn ordered_keys(&self) -> Option<&[RecordKey]> {
        self.request.ordered_keys.as_deref()
    }

    /// Version the next poll starts from
    pub fn from_version(&self) -> Version {
        self.request.from_version
    }
}
