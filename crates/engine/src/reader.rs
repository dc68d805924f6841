//! Versioned reader
//!
//! Point reads rebuild a record from the latest table or, as of a version,
//! from the historic mirror. Change reads turn stored qualifier history into
//! per-version change sets:
//!
//! - Without a window the latest table is walked. Each qualifier holds its
//!   newest write with that write's version; tombstones become deletions.
//! - With `to_version` or `max_versions > 1` the historic mirror is walked,
//!   keeping up to `max_versions` entries per qualifier inside the window.
//!
//! Container markers (counters, type tags, embed markers) are not reported;
//! their leaves are.

use rustc_hash::FxHashMap;
use std::collections::BTreeMap;

use vellum_core::layout;
use vellum_core::reference::{LAST_VERSION_QUALIFIER, SOFT_DELETE_QUALIFIER};
use vellum_core::{Change, RecordKey, Reference, SelectGraph, StoredValue, Value, Version};
use vellum_storage::{ColumnFamily, Direction, StoreSnapshot};

use crate::database::RegisteredModel;
use crate::error::{Result, StoreError};
use crate::processors::read_last_version;
use crate::responses::{ValuesWithMetaData, VersionedChanges};
use crate::values_getter::ReadGetter;

/// Version metadata of a record
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct RecordMeta {
    pub first_version: Version,
    pub last_version: Version,
    pub is_deleted: bool,
}

fn is_true(stored: &StoredValue) -> bool {
    matches!(stored, StoredValue::Scalar(Value::Bool(true)))
}

/// Metadata of a record, `None` when it does not exist at `as_of`
pub(crate) fn read_meta(
    snapshot: &StoreSnapshot,
    model: &RegisteredModel,
    key: &[u8],
    as_of: Option<Version>,
) -> Result<Option<RecordMeta>> {
    let first_version = match snapshot.get(model.ns(ColumnFamily::Existence), key) {
        Some(bytes) => Version::from_bytes(bytes)?,
        None => return Ok(None),
    };
    let table = model.ns(ColumnFamily::Table);

    let as_of = match as_of {
        Some(as_of) => as_of,
        None => {
            let last_version =
                read_last_version(snapshot.get(table, &layout::table_key(key, LAST_VERSION_QUALIFIER)))?;
            let is_deleted = match snapshot.get(table, &layout::table_key(key, SOFT_DELETE_QUALIFIER)) {
                Some(bytes) => is_true(&StoredValue::from_versioned_bytes(bytes)?.1),
                None => false,
            };
            return Ok(Some(RecordMeta {
                first_version,
                last_version: last_version.max(first_version),
                is_deleted,
            }));
        }
    };

    if first_version > as_of {
        return Ok(None);
    }
    let mut meta = RecordMeta {
        first_version,
        last_version: first_version,
        is_deleted: false,
    };
    let mut flag_version = None;
    for (k, v) in snapshot.scan_prefix(model.ns(ColumnFamily::HistoricTable), key, Direction::Forward) {
        let (qualifier, version) = layout::split_historic_table_key(key.len(), k)?;
        if version > as_of {
            continue;
        }
        meta.last_version = meta.last_version.max(version);
        if qualifier == SOFT_DELETE_QUALIFIER && flag_version.map_or(true, |seen| version > seen) {
            flag_version = Some(version);
            meta.is_deleted = is_true(&StoredValue::from_bytes(v)?);
        }
    }
    Ok(Some(meta))
}

/// Read one record with its metadata
pub(crate) fn read_record(
    snapshot: &StoreSnapshot,
    model: &RegisteredModel,
    key: &[u8],
    as_of: Option<Version>,
    select: Option<&SelectGraph>,
) -> Result<Option<ValuesWithMetaData>> {
    let meta = match read_meta(snapshot, model, key, as_of)? {
        Some(meta) => meta,
        None => return Ok(None),
    };
    let values = ReadGetter::new(model, snapshot, key, as_of).record_values()?;
    let values = match select {
        Some(select) => select.apply(&values),
        None => values,
    };
    Ok(Some(ValuesWithMetaData {
        key: RecordKey::from(key),
        values,
        first_version: meta.first_version,
        last_version: meta.last_version,
        is_deleted: meta.is_deleted,
    }))
}

// ============================================================================
// Change reads
// ============================================================================

/// Version window of a change read
#[derive(Debug, Clone, Copy)]
pub(crate) struct ChangeWindow {
    pub from_version: Version,
    pub to_version: Option<Version>,
    pub max_versions: u32,
}

impl ChangeWindow {
    fn is_windowed(&self) -> bool {
        self.to_version.is_some() || self.max_versions > 1
    }

    fn contains(&self, version: Version) -> bool {
        version >= self.from_version && version <= self.to_version.unwrap_or(Version::MAX)
    }
}

#[derive(Debug, Default)]
struct VersionGroup {
    created: bool,
    soft_delete: Option<bool>,
    changed: Vec<(Reference, Value)>,
    deleted: Vec<Reference>,
}

impl VersionGroup {
    fn into_changes(self) -> Vec<Change> {
        let mut changes = Vec::new();
        if self.created {
            changes.push(Change::ObjectCreate);
        }
        if let Some(deleted) = self.soft_delete {
            changes.push(Change::SoftDelete(deleted));
        }
        if !self.changed.is_empty() {
            changes.push(Change::Change(self.changed));
        }
        // A removed container implies its removed leaves
        let roots: Vec<Reference> = self
            .deleted
            .iter()
            .filter(|r| !self.deleted.iter().any(|other| other != *r && r.starts_with(other)))
            .cloned()
            .collect();
        if !roots.is_empty() {
            changes.push(Change::Delete(roots));
        }
        changes
    }
}

fn record_entry(
    groups: &mut BTreeMap<Version, VersionGroup>,
    qualifier: &[u8],
    version: Version,
    stored: StoredValue,
    select: Option<&SelectGraph>,
) -> Result<()> {
    // The soft-delete flag is reported whatever the selection
    if qualifier == SOFT_DELETE_QUALIFIER {
        if let StoredValue::Scalar(Value::Bool(deleted)) = stored {
            groups.entry(version).or_default().soft_delete = Some(deleted);
        }
        return Ok(());
    }
    let reference = Reference::from_bytes(qualifier)?;
    if select.map_or(false, |s| !s.contains(&reference)) {
        return Ok(());
    }
    match stored {
        StoredValue::Scalar(value) => groups.entry(version).or_default().changed.push((reference, value)),
        StoredValue::Deleted => groups.entry(version).or_default().deleted.push(reference),
        StoredValue::Counter(_) | StoredValue::TypeTag(_) | StoredValue::Embed => {}
    }
    Ok(())
}

/// Per-version change sets of one record in ascending version order
pub(crate) fn read_changes(
    snapshot: &StoreSnapshot,
    model: &RegisteredModel,
    key: &[u8],
    window: ChangeWindow,
    select: Option<&SelectGraph>,
    keep_history: bool,
) -> Result<Vec<VersionedChanges>> {
    let creation = match snapshot.get(model.ns(ColumnFamily::Existence), key) {
        Some(bytes) => Version::from_bytes(bytes)?,
        None => return Ok(Vec::new()),
    };
    let mut groups: BTreeMap<Version, VersionGroup> = BTreeMap::new();
    if window.contains(creation) {
        groups.entry(creation).or_default().created = true;
    }

    if window.is_windowed() {
        if !keep_history {
            return Err(StoreError::request(
                "reading versions needs keep_all_versions enabled",
            ));
        }
        let max_versions = window.max_versions.max(1);
        let mut kept: FxHashMap<Vec<u8>, u32> = FxHashMap::default();
        for (k, v) in snapshot.scan_prefix(model.ns(ColumnFamily::HistoricTable), key, Direction::Forward) {
            let (qualifier, version) = layout::split_historic_table_key(key.len(), k)?;
            if !window.contains(version) {
                continue;
            }
            // Entries of one qualifier run newest first
            let count = kept.entry(qualifier.to_vec()).or_insert(0);
            if *count >= max_versions {
                continue;
            }
            *count += 1;
            record_entry(&mut groups, qualifier, version, StoredValue::from_bytes(v)?, select)?;
        }
    } else {
        for (k, v) in snapshot.scan_prefix(model.ns(ColumnFamily::Table), key, Direction::Forward) {
            let qualifier = &k[key.len()..];
            if qualifier == LAST_VERSION_QUALIFIER {
                continue;
            }
            let (version, stored) = StoredValue::from_versioned_bytes(v)?;
            if window.contains(version) {
                record_entry(&mut groups, qualifier, version, stored, select)?;
            }
        }
    }

    Ok(groups
        .into_iter()
        .map(|(version, group)| VersionedChanges {
            version,
            changes: group.into_changes(),
        })
        .filter(|v| !v.changes.is_empty())
        .collect())
}
