//! Change processor
//!
//! Applies an ordered list of changes to one record atomically. A savepoint
//! is taken before the first change; any validation failure rolls back to it
//! and the record is reported with every collected error. Index entries are
//! maintained by diffing the committed record against the transaction view
//! after all changes ran.

use std::collections::{BTreeMap, BTreeSet};

use tracing::{debug, warn};

use vellum_core::layout;
use vellum_core::reference::LAST_VERSION_QUALIFIER;
use vellum_core::{
    Change, IncMapAddition, IncMapChange, ListChange, MapChange, PropertyKind, Reference, Segment, SetChange,
    StoredValue, ValidationError, Value,
};
use vellum_storage::{ColumnFamily, Direction, Transaction};

use super::{read_last_version, CommitFailure, ProcessContext, RecordWriter};
use crate::database::RegisteredModel;
use crate::error::{Result, StoreError};
use crate::index::{check_unique_bindings, diff_indexes, lookup_unique, IndexWriter};
use crate::listener::UpdateEventKind;
use crate::requests::{ChangeObject, ChangeRequest};
use crate::responses::ChangeStatus;
use crate::values_getter::{SnapshotGetter, TransactionGetter, ValuesGetter};

// ============================================================================
// Request validation
// ============================================================================

/// Reject structurally invalid change requests before anything is written
pub(crate) fn validate_change_request(model: &RegisteredModel, request: &ChangeRequest) -> Result<()> {
    for object in &request.objects {
        if object.key.len() != model.key_size {
            return Err(StoreError::request(format!(
                "key {} has {} bytes, model '{}' uses {}",
                object.key,
                object.key.len(),
                model.name(),
                model.key_size
            )));
        }
        for change in &object.changes {
            validate_change(model, change)?;
        }
    }
    Ok(())
}

fn validate_change(model: &RegisteredModel, change: &Change) -> Result<()> {
    match change {
        Change::Check(pairs) => {
            for (reference, _) in pairs {
                model.model.definition_at(reference)?;
            }
        }
        Change::Change(pairs) => {
            for (reference, _) in pairs {
                reject_structural(reference)?;
                model.model.definition_at(reference)?;
            }
        }
        Change::Delete(references) => {
            for reference in references {
                reject_structural(reference)?;
                model.model.definition_at(reference)?;
            }
        }
        Change::ListChange(c) => {
            expect_kind(model, &c.reference, "ListChange", |k| matches!(k, PropertyKind::List { .. }))?
        }
        Change::SetChange(c) => {
            expect_kind(model, &c.reference, "SetChange", |k| matches!(k, PropertyKind::Set { .. }))?
        }
        Change::MapChange(c) => {
            expect_kind(model, &c.reference, "MapChange", |k| matches!(k, PropertyKind::Map { .. }))?
        }
        Change::IncMapChange(c) => expect_kind(model, &c.reference, "IncMapChange", |k| {
            matches!(k, PropertyKind::IncMap { .. })
        })?,
        Change::SoftDelete(_) => {}
        Change::ObjectCreate | Change::IncMapAddition(_) | Change::IndexChange(_) => {
            return Err(StoreError::request("derived changes cannot be requested"))
        }
    }
    Ok(())
}

fn reject_structural(reference: &Reference) -> Result<()> {
    let hint = match reference.last() {
        Some(Segment::ListItem(_)) => "ListChange",
        Some(Segment::SetItem(_)) => "SetChange",
        Some(Segment::MapKey(_)) => "MapChange or IncMapChange",
        Some(Segment::TypeTag(_)) => "a Change of the whole multi-type value",
        _ => return Ok(()),
    };
    Err(StoreError::request(format!(
        "'{}' addresses an element inside a collection, use {}",
        reference, hint
    )))
}

fn expect_kind(
    model: &RegisteredModel,
    reference: &Reference,
    change: &str,
    accepts: impl Fn(&PropertyKind) -> bool,
) -> Result<()> {
    let resolved = model.model.definition_at(reference)?;
    if accepts(resolved.kind) {
        Ok(())
    } else {
        Err(StoreError::request(format!(
            "{} cannot target '{}' of kind {}",
            change,
            reference,
            resolved.kind.name()
        )))
    }
}

// ============================================================================
// Processing
// ============================================================================

/// Apply the changes of one record
pub(crate) fn process_change(
    ctx: &ProcessContext<'_>,
    model: &RegisteredModel,
    object: &ChangeObject,
) -> Result<ChangeStatus> {
    let key = object.key.as_bytes();
    let _guard = ctx.locks.lock(model.id, key);
    let mut txn = ctx.storage.begin();

    if txn.get(model.ns(ColumnFamily::Existence), key).is_none() {
        txn.abort("record does not exist");
        return Ok(ChangeStatus::DoesNotExist {
            key: object.key.clone(),
        });
    }

    let last_version = read_last_version(txn.get(
        model.ns(ColumnFamily::Table),
        &layout::table_key(key, LAST_VERSION_QUALIFIER),
    ))?;
    if let Some(expected) = object.last_version {
        if expected != last_version {
            txn.abort("version guard mismatch");
            return Ok(ChangeStatus::ValidationFail(vec![ValidationError::VersionMismatch {
                expected,
                actual: last_version,
            }]));
        }
    }

    let ticket = ctx.allocate();
    let version = ticket.version();
    let savepoint = txn.savepoint();
    let mut applier = ChangeApplier {
        model,
        key,
        writer: RecordWriter::new(model, key, version, ctx.keep_history),
        indexer: IndexWriter::new(model, ctx.keep_history),
        errors: Vec::new(),
        staged: Vec::new(),
        derived: Vec::new(),
    };
    for change in &object.changes {
        applier.apply(&mut txn, change)?;
    }

    if !applier.errors.is_empty() {
        txn.rollback_to_savepoint(savepoint)?;
        txn.abort("validation failed");
        warn!(
            target: "vellum::change",
            model = %model.name(),
            key = %object.key,
            errors = applier.errors.len(),
            "Changes rolled back"
        );
        return Ok(ChangeStatus::ValidationFail(applier.errors));
    }

    // Checks alone leave the record and its last version untouched
    if txn.write_count() == 0 {
        txn.abort("nothing to write");
        debug!(
            target: "vellum::change",
            model = %model.name(),
            key = %object.key,
            "Checks passed without writes"
        );
        return Ok(ChangeStatus::Success {
            version: last_version,
            changes: object.changes.clone(),
        });
    }

    let diffs = {
        let mut before = SnapshotGetter::latest(model, txn.snapshot(), key);
        let mut after = TransactionGetter::overlay(model, &txn, key);
        diff_indexes(model, key, &mut before, &mut after)?
    };
    let index_changes = applier.indexer.apply_diffs(&mut txn, key, version, diffs)?;
    applier.writer.advance_last_version(&mut txn)?;

    let staged = applier.staged;
    let committed = txn.commit_with_checks(|view| {
        let conflicts = check_unique_bindings(view, model, &staged, key)?;
        if conflicts.is_empty() {
            Ok(())
        } else {
            Err(CommitFailure::Validation(conflicts))
        }
    });

    match committed {
        Ok(info) => {
            debug!(
                target: "vellum::change",
                model = %model.name(),
                key = %object.key,
                version = %version,
                writes = info.writes,
                "Changes committed"
            );
            ctx.publish(model, key, version, UpdateEventKind::Change);
            let mut changes = object.changes.clone();
            changes.extend(applier.derived);
            if !index_changes.is_empty() {
                changes.push(Change::IndexChange(index_changes));
            }
            Ok(ChangeStatus::Success { version, changes })
        }
        Err(CommitFailure::Validation(errors)) => Ok(ChangeStatus::ValidationFail(errors)),
        Err(CommitFailure::AlreadyExists) => Err(StoreError::request("record existence changed during commit")),
        Err(CommitFailure::Store(e)) => Err(e),
    }
}

/// Applies changes of one record inside its transaction
struct ChangeApplier<'m> {
    model: &'m RegisteredModel,
    key: &'m [u8],
    writer: RecordWriter<'m>,
    indexer: IndexWriter<'m>,
    errors: Vec<ValidationError>,
    /// Unique values bound by this transaction
    staged: Vec<(Reference, Value)>,
    /// Changes derived by the store, echoed after the caller's
    derived: Vec<Change>,
}

impl<'m> ChangeApplier<'m> {
    fn apply(&mut self, txn: &mut Transaction<'_>, change: &Change) -> Result<()> {
        match change {
            Change::Check(pairs) => self.check(txn, pairs),
            Change::Change(pairs) => self.change(txn, pairs),
            Change::Delete(references) => self.delete(txn, references),
            Change::ListChange(c) => self.list_change(txn, c),
            Change::SetChange(c) => self.set_change(txn, c),
            Change::MapChange(c) => self.map_change(txn, c),
            Change::IncMapChange(c) => self.inc_map_change(txn, c),
            Change::SoftDelete(deleted) => self.writer.write_soft_delete(txn, *deleted),
            Change::ObjectCreate | Change::IncMapAddition(_) | Change::IndexChange(_) => {
                Err(StoreError::request("derived changes cannot be requested"))
            }
        }
    }

    fn current_value(&self, txn: &Transaction<'_>, reference: &Reference) -> Result<Option<Value>> {
        TransactionGetter::overlay(self.model, txn, self.key).value(reference)
    }

    fn parent_exists(&self, txn: &Transaction<'_>, reference: &Reference) -> Result<bool> {
        match reference.parent() {
            Some(parent) => self.writer.exists(txn, &parent),
            None => Ok(true),
        }
    }

    /// Push a missing-parent error and report whether the target is writable
    fn require_parent(&mut self, txn: &Transaction<'_>, reference: &Reference) -> Result<bool> {
        if self.parent_exists(txn, reference)? {
            return Ok(true);
        }
        self.errors
            .push(ValidationError::invalid(reference, "parent value does not exist"));
        Ok(false)
    }

    fn check(&mut self, txn: &Transaction<'_>, pairs: &[(Reference, Value)]) -> Result<()> {
        for (reference, expected) in pairs {
            let actual = self.current_value(txn, reference)?;
            if actual.as_ref() != Some(expected) {
                self.errors.push(ValidationError::CheckMismatch {
                    reference: reference.clone(),
                    expected: expected.clone(),
                    actual,
                });
            }
        }
        Ok(())
    }

    fn change(&mut self, txn: &mut Transaction<'_>, pairs: &[(Reference, Value)]) -> Result<()> {
        let model = self.model;
        for (reference, value) in pairs {
            let resolved = model.model.definition_at(reference)?;
            let before = self.errors.len();
            resolved.kind.validate(reference, value, &mut self.errors);
            if self.errors.len() > before {
                continue;
            }

            let previous = self.current_value(txn, reference)?;
            if resolved.definition.map_or(false, |d| d.is_final) && previous.is_some() {
                self.errors.push(ValidationError::AlreadySet {
                    reference: reference.clone(),
                });
                continue;
            }
            if !self.require_parent(txn, reference)? {
                continue;
            }

            if !resolved.kind.is_scalar() {
                self.writer.delete_tree(txn, &reference.to_bytes())?;
            }
            self.writer.write_value(txn, reference, value)?;

            if let Some(def) = model.unique(reference) {
                if previous.as_ref() == Some(value) {
                    continue;
                }
                if let Some(old) = &previous {
                    self.indexer.release_unique(txn, def, old, self.writer.version())?;
                }
                if let Some((_, existing)) = lookup_unique(txn.snapshot(), model, def, value)? {
                    if existing != self.key {
                        self.errors.push(ValidationError::AlreadyExists {
                            reference: reference.clone(),
                            existing_key: existing,
                        });
                        continue;
                    }
                }
                self.indexer
                    .bind_unique(txn, def, value, self.key, self.writer.version())?;
                self.staged.push((reference.clone(), value.clone()));
            }
        }
        Ok(())
    }

    fn delete(&mut self, txn: &mut Transaction<'_>, references: &[Reference]) -> Result<()> {
        let model = self.model;
        for reference in references {
            let resolved = model.model.definition_at(reference)?;
            if resolved.definition.map_or(false, |d| d.required) {
                self.errors.push(ValidationError::Required {
                    reference: reference.clone(),
                });
                continue;
            }
            let previous = self.current_value(txn, reference)?;
            if let (Some(def), Some(old)) = (model.unique(reference), &previous) {
                self.indexer.release_unique(txn, def, old, self.writer.version())?;
            }
            self.writer.delete_tree(txn, &reference.to_bytes())?;
        }
        Ok(())
    }

    fn list_change(&mut self, txn: &mut Transaction<'_>, change: &ListChange) -> Result<()> {
        let reference = &change.reference;
        let model = self.model;
        let kind = model.model.definition_at(reference)?.kind;
        if !self.require_parent(txn, reference)? {
            return Ok(());
        }
        let current = match self.current_value(txn, reference)? {
            Some(Value::List(items)) => items,
            _ => Vec::new(),
        };

        let mut items = current.clone();
        items.retain(|v| !change.delete_values.contains(v));
        for (&index, value) in &change.add_values_at_index {
            if index as usize > items.len() {
                self.errors.push(ValidationError::invalid(
                    &reference.list_item(index),
                    format!("index {} is beyond the list size {}", index, items.len()),
                ));
                continue;
            }
            items.insert(index as usize, value.clone());
        }
        items.extend(change.add_values_to_end.iter().cloned());

        let before = self.errors.len();
        kind.validate(reference, &Value::List(items.clone()), &mut self.errors);
        if self.errors.len() > before {
            return Ok(());
        }

        for (i, item) in items.iter().enumerate() {
            if current.get(i) != Some(item) {
                self.writer.put(
                    txn,
                    &reference.list_item(i as u32).to_bytes(),
                    StoredValue::Scalar(item.clone()),
                )?;
            }
        }
        for i in items.len()..current.len() {
            self.writer
                .put(txn, &reference.list_item(i as u32).to_bytes(), StoredValue::Deleted)?;
        }
        let delta = items.len() as i64 - current.len() as i64;
        self.writer
            .adjust_counter(txn, reference, kind, delta, &mut self.errors)
    }

    fn set_change(&mut self, txn: &mut Transaction<'_>, change: &SetChange) -> Result<()> {
        let reference = &change.reference;
        let model = self.model;
        let kind = model.model.definition_at(reference)?.kind;
        let item_kind = match kind {
            PropertyKind::Set { item, .. } => item.as_ref(),
            other => {
                return Err(StoreError::request(format!(
                    "SetChange cannot target kind {}",
                    other.name()
                )))
            }
        };
        if !self.require_parent(txn, reference)? {
            return Ok(());
        }
        let current = match self.current_value(txn, reference)? {
            Some(Value::Set(items)) => items,
            _ => BTreeSet::new(),
        };

        let mut item_errors = Vec::new();
        let mut added = Vec::new();
        for value in &change.add_values {
            if current.contains(value) {
                continue;
            }
            let before = item_errors.len();
            item_kind.validate(&reference.set_item(value.clone()), value, &mut item_errors);
            if item_errors.len() == before {
                added.push(value);
            }
        }
        if !item_errors.is_empty() {
            self.errors.push(ValidationError::Umbrella {
                reference: reference.clone(),
                errors: item_errors,
            });
            return Ok(());
        }
        let removed: Vec<&Value> = change
            .delete_values
            .iter()
            .filter(|v| current.contains(*v) && !change.add_values.contains(*v))
            .collect();

        let delta = added.len() as i64 - removed.len() as i64;
        let before = self.errors.len();
        self.writer
            .adjust_counter(txn, reference, kind, delta, &mut self.errors)?;
        if self.errors.len() > before {
            return Ok(());
        }
        for value in added {
            self.writer.put(
                txn,
                &reference.set_item(value.clone()).to_bytes(),
                StoredValue::Scalar(value.clone()),
            )?;
        }
        for value in removed {
            self.writer
                .put(txn, &reference.set_item(value.clone()).to_bytes(), StoredValue::Deleted)?;
        }
        Ok(())
    }

    fn map_change(&mut self, txn: &mut Transaction<'_>, change: &MapChange) -> Result<()> {
        let reference = &change.reference;
        let model = self.model;
        let kind = model.model.definition_at(reference)?.kind;
        let (key_kind, value_kind) = match kind {
            PropertyKind::Map { key, value, .. } => (key.as_ref(), value.as_ref()),
            other => {
                return Err(StoreError::request(format!(
                    "MapChange cannot target kind {}",
                    other.name()
                )))
            }
        };
        if !self.require_parent(txn, reference)? {
            return Ok(());
        }
        let current = match self.current_value(txn, reference)? {
            Some(Value::Map(entries)) => entries,
            _ => BTreeMap::new(),
        };

        let mut item_errors = Vec::new();
        for (k, v) in &change.values_to_add {
            let entry = reference.map_key(k.clone());
            key_kind.validate(&entry, k, &mut item_errors);
            value_kind.validate(&entry, v, &mut item_errors);
        }
        if !item_errors.is_empty() {
            self.errors.push(ValidationError::Umbrella {
                reference: reference.clone(),
                errors: item_errors,
            });
            return Ok(());
        }

        let removed: Vec<&Value> = change
            .keys_to_delete
            .iter()
            .filter(|k| current.contains_key(*k) && !change.values_to_add.contains_key(*k))
            .collect();
        let added = change
            .values_to_add
            .keys()
            .filter(|k| !current.contains_key(*k))
            .count();
        let delta = added as i64 - removed.len() as i64;
        let before = self.errors.len();
        self.writer
            .adjust_counter(txn, reference, kind, delta, &mut self.errors)?;
        if self.errors.len() > before {
            return Ok(());
        }

        for k in removed {
            self.writer
                .delete_tree(txn, &reference.map_key(k.clone()).to_bytes())?;
        }
        for (k, v) in &change.values_to_add {
            let entry = reference.map_key(k.clone());
            if current.contains_key(k) {
                self.writer.delete_tree(txn, &entry.to_bytes())?;
            }
            self.writer.write_value(txn, &entry, v)?;
        }
        Ok(())
    }

    fn inc_map_change(&mut self, txn: &mut Transaction<'_>, change: &IncMapChange) -> Result<()> {
        let reference = &change.reference;
        let model = self.model;
        let kind = model.model.definition_at(reference)?.kind;
        let value_kind = match kind {
            PropertyKind::IncMap { value, .. } => value.as_ref(),
            other => {
                return Err(StoreError::request(format!(
                    "IncMapChange cannot target kind {}",
                    other.name()
                )))
            }
        };
        if !self.require_parent(txn, reference)? {
            return Ok(());
        }

        let first = match self.max_inc_map_key(txn, reference)? {
            Some(max) => max + 1,
            None => 0,
        };
        let keys: Vec<u64> = (first..first + change.add_values.len() as u64).collect();

        let mut item_errors = Vec::new();
        for (k, v) in keys.iter().zip(&change.add_values) {
            value_kind.validate(&reference.map_key(Value::UInt(*k)), v, &mut item_errors);
        }
        if !item_errors.is_empty() {
            self.errors.push(ValidationError::Umbrella {
                reference: reference.clone(),
                errors: item_errors,
            });
            return Ok(());
        }

        let before = self.errors.len();
        self.writer.adjust_counter(
            txn,
            reference,
            kind,
            change.add_values.len() as i64,
            &mut self.errors,
        )?;
        if self.errors.len() > before {
            return Ok(());
        }
        for (k, v) in keys.iter().zip(&change.add_values) {
            self.writer
                .write_value(txn, &reference.map_key(Value::UInt(*k)), v)?;
        }
        self.derived.push(Change::IncMapAddition(IncMapAddition {
            reference: reference.clone(),
            keys,
            values: change.add_values.clone(),
        }));
        Ok(())
    }

    /// Highest key ever assigned, counting removed entries
    fn max_inc_map_key(&self, txn: &Transaction<'_>, reference: &Reference) -> Result<Option<u64>> {
        let prefix = layout::table_key(self.key, &reference.to_bytes());
        let mut max = None;
        for (k, _) in txn.scan_prefix(self.model.ns(ColumnFamily::Table), &prefix, Direction::Forward) {
            let entry = Reference::from_bytes(&k[self.key.len()..])?;
            if entry.depth() != reference.depth() + 1 {
                continue;
            }
            if let Some(Segment::MapKey(Value::UInt(n))) = entry.last() {
                max = max.max(Some(*n));
            }
        }
        Ok(max)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::ModelRegistry;
    use crate::listener::UpdateHub;
    use crate::locks::KeyLocks;
    use crate::processors::add::process_add;
    use crate::responses::AddStatus;
    use crate::versions::VersionTracker;
    use vellum_core::{
        DataModel, EmbeddedModel, IsIndexable, LogicalClock, PropertyDefinition, RecordKey, Values, Version,
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
                        "Note",
                        vec![
                            PropertyDefinition::new(1, "title", PropertyKind::string()).required(),
                            PropertyDefinition::new(2, "tags", PropertyKind::list(PropertyKind::string()).with_size(None, Some(3))),
                            PropertyDefinition::new(3, "labels", PropertyKind::set(PropertyKind::string())),
                            PropertyDefinition::new(4, "attrs", PropertyKind::map(PropertyKind::string(), PropertyKind::int())),
                            PropertyDefinition::new(5, "log", PropertyKind::inc_map(PropertyKind::string())),
                            PropertyDefinition::new(6, "slug", PropertyKind::string()).unique(),
                            PropertyDefinition::new(7, "created", PropertyKind::uint()).final_value(),
                            PropertyDefinition::new(
                                8,
                                "meta",
                                PropertyKind::Embed(EmbeddedModel::new(
                                    "Meta",
                                    vec![PropertyDefinition::new(1, "author", PropertyKind::string())],
                                )),
                            ),
                        ],
                    )
                    .with_index(IsIndexable::property(Reference::property(1))),
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

        fn add(&self, values: Values) -> RecordKey {
            match process_add(&self.ctx(), &self.model, None, &values).unwrap() {
                AddStatus::Success { key, .. } => key,
                other => panic!("unexpected {:?}", other),
            }
        }

        fn change(&self, key: &RecordKey, changes: Vec<Change>) -> ChangeStatus {
            let object = ChangeObject {
                key: key.clone(),
                last_version: None,
                changes,
            };
            process_change(&self.ctx(), &self.model, &object).unwrap()
        }

        fn value(&self, key: &RecordKey, reference: &Reference) -> Option<Value> {
            let snapshot = self.storage.snapshot();
            SnapshotGetter::latest(&self.model, &snapshot, key.as_bytes())
                .value(reference)
                .unwrap()
        }
    }

    fn title(t: &str) -> Values {
        Values::new().with(1, t)
    }

    #[test]
    fn test_change_scalar_updates_index() {
        let fx = Fixture::new();
        let key = fx.add(title("a"));
        let status = fx.change(&key, vec![Change::Change(vec![(Reference::property(1), Value::from("b"))])]);
        match status {
            ChangeStatus::Success { changes, .. } => {
                assert!(matches!(changes.last(), Some(Change::IndexChange(c)) if c.len() == 1));
            }
            other => panic!("unexpected {:?}", other),
        }
        assert_eq!(fx.value(&key, &Reference::property(1)), Some(Value::from("b")));
        assert_eq!(fx.storage.len(fx.model.ns(ColumnFamily::Index)), 1);
    }

    #[test]
    fn test_missing_record() {
        let fx = Fixture::new();
        let key = RecordKey::new(vec![9u8; 16]);
        assert_eq!(
            fx.change(&key, vec![Change::SoftDelete(true)]),
            ChangeStatus::DoesNotExist { key }
        );
    }

    #[test]
    fn test_list_change_over_max_leaves_list() {
        let fx = Fixture::new();
        let tags = Reference::property(2);
        let list = Value::List(vec![Value::from("x"), Value::from("y"), Value::from("z")]);
        let key = fx.add(title("a").with(2, list.clone()));
        let status = fx.change(
            &key,
            vec![Change::ListChange(ListChange::new(tags.clone()).append([Value::from("w")]))],
        );
        assert!(matches!(status, ChangeStatus::ValidationFail(ref e) if matches!(e[0], ValidationError::InvalidSize { .. })));
        assert_eq!(fx.value(&key, &tags), Some(list));
    }

    #[test]
    fn test_list_change_order_of_operations() {
        let fx = Fixture::new();
        let tags = Reference::property(2);
        let key = fx.add(title("a").with(2, Value::List(vec![Value::from("x"), Value::from("y")])));
        let change = ListChange::new(tags.clone())
            .remove([Value::from("x")])
            .insert(0, Value::from("a"))
            .append([Value::from("z")]);
        assert!(fx.change(&key, vec![Change::ListChange(change)]).is_success());
        assert_eq!(
            fx.value(&key, &tags),
            Some(Value::List(vec![Value::from("a"), Value::from("y"), Value::from("z")]))
        );
    }

    #[test]
    fn test_set_change_adds_and_removes() {
        let fx = Fixture::new();
        let labels = Reference::property(3);
        let key = fx.add(title("a"));
        let add = SetChange::add(labels.clone(), [Value::from("p"), Value::from("q")]);
        assert!(fx.change(&key, vec![Change::SetChange(add)]).is_success());
        let remove = SetChange::add(labels.clone(), []).remove([Value::from("p")]);
        assert!(fx.change(&key, vec![Change::SetChange(remove)]).is_success());
        assert_eq!(
            fx.value(&key, &labels),
            Some(Value::Set([Value::from("q")].into_iter().collect()))
        );
    }

    #[test]
    fn test_map_change() {
        let fx = Fixture::new();
        let attrs = Reference::property(4);
        let key = fx.add(title("a"));
        let change = MapChange {
            reference: attrs.clone(),
            values_to_add: [(Value::from("k"), Value::Int(1)), (Value::from("j"), Value::Int(2))]
                .into_iter()
                .collect(),
            keys_to_delete: BTreeSet::new(),
        };
        assert!(fx.change(&key, vec![Change::MapChange(change)]).is_success());
        let change = MapChange {
            reference: attrs.clone(),
            values_to_add: BTreeMap::new(),
            keys_to_delete: [Value::from("k")].into_iter().collect(),
        };
        assert!(fx.change(&key, vec![Change::MapChange(change)]).is_success());
        assert_eq!(
            fx.value(&key, &attrs),
            Some(Value::Map([(Value::from("j"), Value::Int(2))].into_iter().collect()))
        );
    }

    #[test]
    fn test_inc_map_keys_never_reused() {
        let fx = Fixture::new();
        let log = Reference::property(5);
        let key = fx.add(title("a"));
        let append = |values: Vec<Value>| {
            Change::IncMapChange(IncMapChange {
                reference: log.clone(),
                add_values: values,
            })
        };
        match fx.change(&key, vec![append(vec![Value::from("one"), Value::from("two")])]) {
            ChangeStatus::Success { changes, .. } => assert!(changes.iter().any(
                |c| matches!(c, Change::IncMapAddition(a) if a.keys == vec![0, 1])
            )),
            other => panic!("unexpected {:?}", other),
        }
        let removal = MapChange {
            reference: log.clone(),
            values_to_add: BTreeMap::new(),
            keys_to_delete: [Value::UInt(1)].into_iter().collect(),
        };
        // MapChange does not apply to incrementing maps
        let object = ChangeRequest::new("Note").object(key.clone(), vec![Change::MapChange(removal)]);
        assert!(validate_change_request(&fx.model, &object).unwrap_err().is_request());
        assert!(fx.change(&key, vec![Change::Delete(vec![log.clone()])]).is_success());
        match fx.change(&key, vec![append(vec![Value::from("three")])]) {
            ChangeStatus::Success { changes, .. } => assert!(changes
                .iter()
                .any(|c| matches!(c, Change::IncMapAddition(a) if a.keys == vec![2]))),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_errors_roll_back_whole_record() {
        let fx = Fixture::new();
        let key = fx.add(title("a"));
        let status = fx.change(
            &key,
            vec![
                Change::Change(vec![(Reference::property(1), Value::from("b"))]),
                Change::Check(vec![(Reference::property(1), Value::from("zzz"))]),
                Change::Delete(vec![Reference::property(1)]),
            ],
        );
        match status {
            ChangeStatus::ValidationFail(errors) => assert_eq!(errors.len(), 2),
            other => panic!("unexpected {:?}", other),
        }
        assert_eq!(fx.value(&key, &Reference::property(1)), Some(Value::from("a")));
    }

    #[test]
    fn test_final_property_cannot_change() {
        let fx = Fixture::new();
        let key = fx.add(title("a").with(7, 1u64));
        let status = fx.change(&key, vec![Change::Change(vec![(Reference::property(7), Value::UInt(2))])]);
        assert_eq!(
            status,
            ChangeStatus::ValidationFail(vec![ValidationError::AlreadySet {
                reference: Reference::property(7)
            }])
        );
    }

    #[test]
    fn test_nested_target_needs_parent() {
        let fx = Fixture::new();
        let key = fx.add(title("a"));
        let author = Reference::property(8).field(1);
        let status = fx.change(&key, vec![Change::Change(vec![(author.clone(), Value::from("me"))])]);
        assert!(matches!(status, ChangeStatus::ValidationFail(_)));

        let meta = Value::Embed(Values::new().with(1, "you"));
        assert!(fx
            .change(&key, vec![Change::Change(vec![(Reference::property(8), meta)])])
            .is_success());
        assert!(fx
            .change(&key, vec![Change::Change(vec![(author.clone(), Value::from("me"))])])
            .is_success());
        assert_eq!(fx.value(&key, &author), Some(Value::from("me")));
    }

    #[test]
    fn test_unique_rebind() {
        let fx = Fixture::new();
        let slug = Reference::property(6);
        let first = fx.add(title("a").with(6, "x"));
        let second = fx.add(title("b"));
        let status = fx.change(&second, vec![Change::Change(vec![(slug.clone(), Value::from("x"))])]);
        assert_eq!(
            status,
            ChangeStatus::ValidationFail(vec![ValidationError::AlreadyExists {
                reference: slug.clone(),
                existing_key: first.as_bytes().to_vec(),
            }])
        );
        assert!(fx
            .change(&first, vec![Change::Change(vec![(slug.clone(), Value::from("y"))])])
            .is_success());
        assert!(fx
            .change(&second, vec![Change::Change(vec![(slug, Value::from("x"))])])
            .is_success());
    }

    #[test]
    fn test_version_guard() {
        let fx = Fixture::new();
        let key = fx.add(title("a"));
        let object = ChangeObject {
            key: key.clone(),
            last_version: Some(Version::new(999)),
            changes: vec![Change::SoftDelete(true)],
        };
        let status = process_change(&fx.ctx(), &fx.model, &object).unwrap();
        assert!(matches!(
            status,
            ChangeStatus::ValidationFail(ref e) if matches!(e[0], ValidationError::VersionMismatch { .. })
        ));
    }

    #[test]
    fn test_structural_target_rejected() {
        let fx = Fixture::new();
        let request = ChangeRequest::new("Note").object(
            RecordKey::new(vec![1u8; 16]),
            vec![Change::Change(vec![(Reference::property(2).list_item(0), Value::from("x"))])],
        );
        let err = validate_change_request(&fx.model, &request).unwrap_err();
        assert!(err.to_string().contains("ListChange"));
    }
}
