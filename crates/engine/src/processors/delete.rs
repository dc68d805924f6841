//! Delete processor
//!
//! A soft delete sets the tombstone flag at a new version and leaves every
//! other entry in place, so earlier versions stay readable and the record
//! keeps its unique values. A hard delete erases the record from every
//! column family. Historic index entries are found by replaying each stored
//! version of the record through the index definitions.

use std::collections::BTreeSet;

use rustc_hash::FxHashSet;
use tracing::debug;

use vellum_core::layout;
use vellum_core::{RecordKey, StoredValue, Value, Version};
use vellum_storage::{ColumnFamily, Direction, StoreSnapshot, Transaction};

use super::{ProcessContext, RecordWriter};
use crate::database::{RegisteredModel, UniqueDef};
use crate::error::Result;
use crate::index::{index_value, IndexWriter};
use crate::listener::UpdateEventKind;
use crate::responses::DeleteStatus;
use crate::values_getter::{HistoricGetter, SnapshotGetter, ValuesGetter};

/// Delete one record
pub(crate) fn process_delete(
    ctx: &ProcessContext<'_>,
    model: &RegisteredModel,
    key: &RecordKey,
    hard: bool,
) -> Result<DeleteStatus> {
    let key_bytes = key.as_bytes();
    let _guard = ctx.locks.lock(model.id, key_bytes);
    let mut txn = ctx.storage.begin();

    if txn.get(model.ns(ColumnFamily::Existence), key_bytes).is_none() {
        txn.abort("record does not exist");
        return Ok(DeleteStatus::DoesNotExist { key: key.clone() });
    }

    let ticket = ctx.allocate();
    let version = ticket.version();
    if hard {
        erase(&mut txn, model, key_bytes, version, ctx.keep_history)?;
    } else {
        let writer = RecordWriter::new(model, key_bytes, version, ctx.keep_history);
        writer.write_soft_delete(&mut txn, true)?;
        writer.advance_last_version(&mut txn)?;
    }

    let info = txn.commit()?;
    debug!(
        target: "vellum::delete",
        model = %model.name(),
        key = %key,
        version = %version,
        hard,
        writes = info.writes,
        "Record deleted"
    );
    ctx.publish(model, key_bytes, version, UpdateEventKind::Deletion { hard });
    Ok(DeleteStatus::Success { version })
}

fn erase(
    txn: &mut Transaction<'_>,
    model: &RegisteredModel,
    key: &[u8],
    version: Version,
    keep_history: bool,
) -> Result<()> {
    let snapshot = txn.snapshot().clone();
    let indexer = IndexWriter::new(model, keep_history);

    for def in &model.uniques {
        for value in unique_values_held(&snapshot, model, def, key)? {
            indexer.purge_unique(txn, def, &value, key)?;
        }
    }

    let mut current = SnapshotGetter::latest(model, &snapshot, key);
    for def in &model.indexes {
        if let Some(value) = index_value(def, key, &mut current)? {
            txn.delete(
                model.ns(ColumnFamily::Index),
                layout::index_key(&def.index_ref, &value, key),
            )?;
            indexer.purge_historic_index(txn, def, &value, key)?;
        }
    }

    if !model.indexes.is_empty() {
        let mut purged: Vec<FxHashSet<Vec<u8>>> = vec![FxHashSet::default(); model.indexes.len()];
        for stored_version in historic_versions(&snapshot, model, key)? {
            let mut getter = HistoricGetter::historic(model, &snapshot, key, stored_version);
            for (position, def) in model.indexes.iter().enumerate() {
                if let Some(value) = index_value(def, key, &mut getter)? {
                    if purged[position].insert(value.clone()) {
                        indexer.purge_historic_index(txn, def, &value, key)?;
                    }
                }
            }
        }
    }

    txn.delete_prefix(model.ns(ColumnFamily::Table), key)?;
    txn.delete_prefix(model.ns(ColumnFamily::HistoricTable), key)?;
    txn.delete(model.ns(ColumnFamily::Existence), key.to_vec())?;
    debug!(
        target: "vellum::delete",
        model = %model.name(),
        version = %version,
        "Record erased"
    );
    Ok(())
}

/// Every value a unique property held for `key`, current and historic
fn unique_values_held(
    snapshot: &StoreSnapshot,
    model: &RegisteredModel,
    def: &UniqueDef,
    key: &[u8],
) -> Result<BTreeSet<Value>> {
    let mut values = BTreeSet::new();
    if let Some(value) = SnapshotGetter::latest(model, snapshot, key).value(&def.reference)? {
        values.insert(value);
    }
    let prefix = layout::table_key(key, &def.field_ref);
    for (k, v) in snapshot.scan_prefix(model.ns(ColumnFamily::HistoricTable), &prefix, Direction::Forward) {
        let (qualifier, _) = layout::split_historic_table_key(key.len(), k)?;
        if qualifier != def.field_ref.as_slice() {
            continue;
        }
        if let StoredValue::Scalar(value) = StoredValue::from_bytes(v)? {
            values.insert(value);
        }
    }
    Ok(values)
}

/// Distinct versions at which the record was written
fn historic_versions(snapshot: &StoreSnapshot, model: &RegisteredModel, key: &[u8]) -> Result<BTreeSet<Version>> {
    let mut versions = BTreeSet::new();
    for (k, _) in snapshot.scan_prefix(model.ns(ColumnFamily::HistoricTable), key, Direction::Forward) {
        let (_, version) = layout::split_historic_table_key(key.len(), k)?;
        versions.insert(version);
    }
    Ok(versions)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::ModelRegistry;
    use crate::listener::UpdateHub;
    use crate::locks::KeyLocks;
    use crate::processors::add::process_add;
    use crate::processors::change::process_change;
    use crate::requests::ChangeObject;
    use crate::responses::AddStatus;
    use crate::versions::VersionTracker;
    use vellum_core::{
        Change, DataModel, IsIndexable, LogicalClock, PropertyDefinition, PropertyKind, Reference, Values,
    };
    use vellum_storage::UnifiedStore;

    struct Fixture {
        storage: UnifiedStore,
        clock: LogicalClock,
        versions: VersionTracker,
        locks: KeyLocks,
        hub: UpdateHub,
        model: std::sync::Arc<RegisteredModel>,
    }

    impl Fixture {
        fn new() -> Self {
            let model = ModelRegistry::new()
                .register(
                    DataModel::new(
                        "Account",
                        vec![
                            PropertyDefinition::new(1, "handle", PropertyKind::string()).unique(),
                            PropertyDefinition::new(2, "score", PropertyKind::int()),
                        ],
                    )
                    .with_index(IsIndexable::property(Reference::property(2))),
                )
                .unwrap();
            Fixture {
                storage: UnifiedStore::new(),
                clock: LogicalClock::new(),
                versions: VersionTracker::new(),
                locks: KeyLocks::default(),
                hub: UpdateHub::new(16),
                model,
            }
        }

        fn ctx(&self) -> ProcessContext<'_> {
            ProcessContext {
                storage: &self.storage,
                clock: &self.clock,
                versions: &self.versions,
                locks: &self.locks,
                hub: &self.hub,
                keep_history: true,
            }
        }

        fn count(&self, family: ColumnFamily) -> usize {
            self.storage.len(self.model.ns(family))
        }
    }

    #[test]
    fn test_soft_delete_keeps_entries() {
        let fx = Fixture::new();
        let values = Values::new().with(1, "h").with(2, 5i64);
        let key = match process_add(&fx.ctx(), &fx.model, None, &values).unwrap() {
            AddStatus::Success { key, .. } => key,
            other => panic!("unexpected {:?}", other),
        };
        assert!(process_delete(&fx.ctx(), &fx.model, &key, false).unwrap().is_success());
        assert_eq!(fx.count(ColumnFamily::Existence), 1);
        assert_eq!(fx.count(ColumnFamily::Index), 1);
        assert_eq!(fx.count(ColumnFamily::Unique), 1);
    }

    #[test]
    fn test_hard_delete_erases_everything() {
        let fx = Fixture::new();
        let values = Values::new().with(1, "h1").with(2, 5i64);
        let key = match process_add(&fx.ctx(), &fx.model, None, &values).unwrap() {
            AddStatus::Success { key, .. } => key,
            other => panic!("unexpected {:?}", other),
        };
        let object = ChangeObject {
            key: key.clone(),
            last_version: None,
            changes: vec![Change::Change(vec![
                (Reference::property(1), Value::from("h2")),
                (Reference::property(2), Value::Int(6)),
            ])],
        };
        assert!(process_change(&fx.ctx(), &fx.model, &object).unwrap().is_success());
        assert_eq!(fx.count(ColumnFamily::HistoricIndex), 3);

        assert!(process_delete(&fx.ctx(), &fx.model, &key, true).unwrap().is_success());
        for family in [
            ColumnFamily::Existence,
            ColumnFamily::Table,
            ColumnFamily::HistoricTable,
            ColumnFamily::Index,
            ColumnFamily::HistoricIndex,
            ColumnFamily::Unique,
        ] {
            assert_eq!(fx.count(family), 0, "{:?} not empty", family);
        }
        // Release marker of "h1" remains, it never resolves to a key
        let snapshot = fx.storage.snapshot();
        assert!(snapshot
            .scan_prefix(fx.model.ns(ColumnFamily::HistoricUnique), &[], Direction::Forward)
            .all(|(_, v)| v.is_empty()));

        assert_eq!(
            process_delete(&fx.ctx(), &fx.model, &key, true).unwrap(),
            DeleteStatus::DoesNotExist { key }
        );
    }
}
