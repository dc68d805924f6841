//! Mutation processors
//!
//! Add, Change and Delete each run one substrate transaction per record:
//!
//! 1. Lock the record's stripe and take a version from the tracker
//! 2. Stage table, historic, index and unique writes in the transaction
//! 3. Commit with checks that verify unique bindings against live state
//! 4. Publish the mutation event while the stripe is still held
//!
//! The version stays in flight until the processor returns, so readers
//! anchoring on the stable version never skip an uncommitted mutation.
//!
//! [`RecordWriter`] owns the storage form of record values. Structured
//! values are decomposed into one qualifier per leaf plus a marker at the
//! container:
//!
//! | Value | Container qualifier | Below the container |
//! |---|---|---|
//! | scalar | `Scalar(v)` | |
//! | list | `Counter(len)` | `ListItem(i)` → `Scalar` |
//! | set | `Counter(len)` | `SetItem(v)` → `Scalar(v)` |
//! | map | `Counter(len)` | `MapKey(k)` → value, recursively |
//! | typed | `TypeTag(t)` | `TypeTag(t)` → value, recursively |
//! | embed | `Embed` | `Property(i)` → value, recursively |
//!
//! Removal writes `Deleted` tombstones carrying the removal version, so
//! change reads can report deletions from the latest table.

pub mod add;
pub mod change;
pub mod delete;

use thiserror::Error;

use vellum_core::layout;
use vellum_core::reference::{LAST_VERSION_QUALIFIER, SOFT_DELETE_QUALIFIER};
use vellum_core::{Clock, PropertyKind, RecordKey, Reference, StoredValue, ValidationError, Value, Version};
use vellum_storage::{ColumnFamily, Direction, StorageError, Transaction, UnifiedStore};

use crate::database::RegisteredModel;
use crate::error::{Result, StoreError};
use crate::listener::{UpdateEvent, UpdateEventKind, UpdateHub};
use crate::locks::KeyLocks;
use crate::versions::{VersionTicket, VersionTracker};

/// Shared services of the processors
pub(crate) struct ProcessContext<'a> {
    pub storage: &'a UnifiedStore,
    pub clock: &'a dyn Clock,
    pub versions: &'a VersionTracker,
    pub locks: &'a KeyLocks,
    pub hub: &'a UpdateHub,
    pub keep_history: bool,
}

impl ProcessContext<'_> {
    /// Take the version of one mutation
    pub fn allocate(&self) -> VersionTicket<'_> {
        self.versions.allocate(self.clock)
    }

    /// Publish a committed mutation; call with the record's stripe held
    pub fn publish(&self, model: &RegisteredModel, key: &[u8], version: Version, kind: UpdateEventKind) {
        self.hub.publish(UpdateEvent {
            model: model.name().to_string(),
            key: RecordKey::from(key),
            version,
            kind,
        });
    }
}

/// Why a commit did not happen
#[derive(Debug, Error)]
pub(crate) enum CommitFailure {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("{} validation error(s)", .0.len())]
    Validation(Vec<ValidationError>),

    #[error("record already exists")]
    AlreadyExists,
}

impl From<StorageError> for CommitFailure {
    fn from(e: StorageError) -> Self {
        CommitFailure::Store(e.into())
    }
}

/// Read the raw last-version marker of a record
pub(crate) fn read_last_version(bytes: Option<&[u8]>) -> Result<Version> {
    match bytes {
        Some(bytes) => Ok(Version::from_bytes(bytes)?),
        None => Ok(Version::ZERO),
    }
}

/// Writes the qualifiers of one record at one version
pub(crate) struct RecordWriter<'m> {
    model: &'m RegisteredModel,
    key: &'m [u8],
    version: Version,
    keep_history: bool,
}

impl<'m> RecordWriter<'m> {
    pub fn new(model: &'m RegisteredModel, key: &'m [u8], version: Version, keep_history: bool) -> Self {
        RecordWriter {
            model,
            key,
            version,
            keep_history,
        }
    }

    pub fn version(&self) -> Version {
        self.version
    }

    /// Write one qualifier to the latest table and its history
    pub fn put(&self, txn: &mut Transaction<'_>, qualifier: &[u8], stored: StoredValue) -> Result<()> {
        txn.put(
            self.model.ns(ColumnFamily::Table),
            layout::table_key(self.key, qualifier),
            stored.to_versioned_bytes(self.version),
        )?;
        if self.keep_history {
            txn.put(
                self.model.ns(ColumnFamily::HistoricTable),
                layout::historic_table_key(self.key, qualifier, self.version),
                stored.to_bytes(),
            )?;
        }
        Ok(())
    }

    /// Live value of one qualifier
    pub fn current(&self, txn: &Transaction<'_>, qualifier: &[u8]) -> Result<Option<StoredValue>> {
        match txn.get(
            self.model.ns(ColumnFamily::Table),
            &layout::table_key(self.key, qualifier),
        ) {
            Some(bytes) => {
                let (_, stored) = StoredValue::from_versioned_bytes(bytes)?;
                Ok(if stored.is_deleted() { None } else { Some(stored) })
            }
            None => Ok(None),
        }
    }

    /// Check if a qualifier holds a live value
    pub fn exists(&self, txn: &Transaction<'_>, reference: &Reference) -> Result<bool> {
        Ok(self.current(txn, &reference.to_bytes())?.is_some())
    }

    /// Tombstone a qualifier and everything below it
    ///
    /// Returns whether anything was live.
    pub fn delete_tree(&self, txn: &mut Transaction<'_>, qualifier: &[u8]) -> Result<bool> {
        let prefix = layout::table_key(self.key, qualifier);
        let mut live = Vec::new();
        for (k, v) in txn.scan_prefix(self.model.ns(ColumnFamily::Table), &prefix, Direction::Forward) {
            let (_, stored) = StoredValue::from_versioned_bytes(&v)?;
            if !stored.is_deleted() {
                live.push(k[self.key.len()..].to_vec());
            }
        }
        for qualifier in &live {
            self.put(txn, qualifier, StoredValue::Deleted)?;
        }
        Ok(!live.is_empty())
    }

    /// Write a value decomposed into qualifiers
    pub fn write_value(&self, txn: &mut Transaction<'_>, reference: &Reference, value: &Value) -> Result<()> {
        let qualifier = reference.to_bytes();
        match value {
            Value::Bool(_)
            | Value::Int(_)
            | Value::UInt(_)
            | Value::Float(_)
            | Value::String(_)
            | Value::Bytes(_) => self.put(txn, &qualifier, StoredValue::Scalar(value.clone())),
            Value::List(items) => {
                self.put(txn, &qualifier, StoredValue::Counter(items.len() as u32))?;
                for (i, item) in items.iter().enumerate() {
                    self.put(
                        txn,
                        &reference.list_item(i as u32).to_bytes(),
                        StoredValue::Scalar(item.clone()),
                    )?;
                }
                Ok(())
            }
            Value::Set(items) => {
                self.put(txn, &qualifier, StoredValue::Counter(items.len() as u32))?;
                for item in items {
                    self.put(
                        txn,
                        &reference.set_item(item.clone()).to_bytes(),
                        StoredValue::Scalar(item.clone()),
                    )?;
                }
                Ok(())
            }
            Value::Map(entries) => {
                self.put(txn, &qualifier, StoredValue::Counter(entries.len() as u32))?;
                for (k, v) in entries {
                    self.write_value(txn, &reference.map_key(k.clone()), v)?;
                }
                Ok(())
            }
            Value::Typed(typed) => {
                self.put(txn, &qualifier, StoredValue::TypeTag(typed.tag))?;
                self.write_value(txn, &reference.type_tag(typed.tag), &typed.value)
            }
            Value::Embed(values) => {
                self.put(txn, &qualifier, StoredValue::Embed)?;
                for (index, v) in values.iter() {
                    self.write_value(txn, &reference.field(index), v)?;
                }
                Ok(())
            }
        }
    }

    /// Advance the last-version marker if this version is newer
    pub fn advance_last_version(&self, txn: &mut Transaction<'_>) -> Result<()> {
        let ns = self.model.ns(ColumnFamily::Table);
        let marker = layout::table_key(self.key, LAST_VERSION_QUALIFIER);
        let current = read_last_version(txn.get(ns, &marker))?;
        if self.version > current {
            txn.put(ns, marker, self.version.to_bytes().to_vec())?;
        }
        Ok(())
    }

    /// Set or clear the soft-delete flag
    pub fn write_soft_delete(&self, txn: &mut Transaction<'_>, deleted: bool) -> Result<()> {
        self.put(txn, SOFT_DELETE_QUALIFIER, StoredValue::Scalar(Value::Bool(deleted)))
    }

    /// Apply a size delta to a collection counter
    ///
    /// The resulting size is checked against the kind's bounds; on a
    /// violation the error is appended and the counter is left alone.
    pub fn adjust_counter(
        &self,
        txn: &mut Transaction<'_>,
        reference: &Reference,
        kind: &PropertyKind,
        delta: i64,
        errors: &mut Vec<ValidationError>,
    ) -> Result<()> {
        let qualifier = reference.to_bytes();
        let current = self.current(txn, &qualifier)?;
        let old = match current {
            Some(StoredValue::Counter(n)) => n,
            _ => 0,
        };
        let new = (i64::from(old) + delta).max(0);
        let before = errors.len();
        kind.check_size(reference, new as usize, errors);
        if errors.len() > before {
            return Ok(());
        }
        // An absent collection stays absent until something is added
        if new != i64::from(old) {
            self.put(txn, &qualifier, StoredValue::Counter(new as u32))?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::ModelRegistry;
    use crate::values_getter::{TransactionGetter, ValuesGetter};
    use vellum_core::{DataModel, PropertyDefinition};

    fn registered() -> std::sync::Arc<RegisteredModel> {
        ModelRegistry::new()
            .register(DataModel::new(
                "Doc",
                vec![
                    PropertyDefinition::new(1, "tags", PropertyKind::list(PropertyKind::string()).with_size(None, Some(3))),
                    PropertyDefinition::new(2, "title", PropertyKind::string()),
                ],
            ))
            .unwrap()
    }

    const KEY: [u8; 16] = [7; 16];

    #[test]
    fn test_write_then_tombstone_tree() {
        let model = registered();
        let store = UnifiedStore::new();
        let writer = RecordWriter::new(&model, &KEY, Version::new(1), true);
        let tags = Reference::property(1);
        let mut txn = store.begin();
        writer
            .write_value(&mut txn, &tags, &Value::List(vec![Value::from("a"), Value::from("b")]))
            .unwrap();
        assert_eq!(
            TransactionGetter::overlay(&model, &txn, &KEY).value(&tags).unwrap(),
            Some(Value::List(vec![Value::from("a"), Value::from("b")]))
        );

        assert!(writer.delete_tree(&mut txn, &tags.to_bytes()).unwrap());
        assert!(!writer.exists(&txn, &tags).unwrap());
        assert!(!writer.delete_tree(&mut txn, &tags.to_bytes()).unwrap());
        txn.commit().unwrap();

        // Three live entries tombstoned, each mirrored historically
        let ns = model.ns(ColumnFamily::HistoricTable);
        assert_eq!(store.len(ns), 3);
    }

    #[test]
    fn test_counter_respects_bounds() {
        let model = registered();
        let store = UnifiedStore::new();
        let writer = RecordWriter::new(&model, &KEY, Version::new(1), false);
        let tags = Reference::property(1);
        let kind = model.model.definition_at(&tags).unwrap().kind;
        let mut txn = store.begin();
        let mut errors = Vec::new();

        writer.adjust_counter(&mut txn, &tags, kind, 3, &mut errors).unwrap();
        assert!(errors.is_empty());
        writer.adjust_counter(&mut txn, &tags, kind, 1, &mut errors).unwrap();
        assert_eq!(errors.len(), 1);
        assert_eq!(
            writer.current(&txn, &tags.to_bytes()).unwrap(),
            Some(StoredValue::Counter(3))
        );
    }

    #[test]
    fn test_counter_not_created_without_growth() {
        let model = registered();
        let store = UnifiedStore::new();
        let writer = RecordWriter::new(&model, &KEY, Version::new(1), false);
        let tags = Reference::property(1);
        let kind = model.model.definition_at(&tags).unwrap().kind;
        let mut txn = store.begin();
        let mut errors = Vec::new();

        writer.adjust_counter(&mut txn, &tags, kind, 0, &mut errors).unwrap();
        assert!(errors.is_empty());
        assert_eq!(writer.current(&txn, &tags.to_bytes()).unwrap(), None);
        assert_eq!(txn.write_count(), 0);
    }

    #[test]
    fn test_last_version_only_advances() {
        let model = registered();
        let store = UnifiedStore::new();
        let mut txn = store.begin();
        RecordWriter::new(&model, &KEY, Version::new(5), false)
            .advance_last_version(&mut txn)
            .unwrap();
        RecordWriter::new(&model, &KEY, Version::new(3), false)
            .advance_last_version(&mut txn)
            .unwrap();
        let marker = layout::table_key(&KEY, LAST_VERSION_QUALIFIER);
        assert_eq!(
            read_last_version(txn.get(model.ns(ColumnFamily::Table), &marker)).unwrap(),
            Version::new(5)
        );
    }
}
