//! Add processor
//!
//! Creates one record in one transaction: existence and last-version
//! markers, every value decomposed into qualifiers, unique bindings and
//! index entries. Unique bindings are checked once early for a precise
//! error and again at commit against live state.

use tracing::debug;

use vellum_core::{Change, IndexChange, RecordKey, Reference, ValidationError, Value};
use vellum_storage::ColumnFamily;

use super::{CommitFailure, ProcessContext, RecordWriter};
use crate::database::RegisteredModel;
use crate::error::{Result, StoreError};
use crate::index::{check_unique_bindings, index_value, lookup_unique, IndexWriter};
use crate::listener::UpdateEventKind;
use crate::requests::AddRequest;
use crate::responses::AddStatus;
use crate::values_getter::RecordGetter;

/// Reject structurally invalid add requests before anything is written
pub(crate) fn validate_add_request(model: &RegisteredModel, request: &AddRequest) -> Result<()> {
    for object in &request.objects {
        if let Some(key) = &object.key {
            if key.len() != model.key_size {
                return Err(StoreError::request(format!(
                    "key {} has {} bytes, model '{}' uses {}",
                    key,
                    key.len(),
                    model.name(),
                    model.key_size
                )));
            }
        }
    }
    Ok(())
}

/// Add one record
pub(crate) fn process_add(
    ctx: &ProcessContext<'_>,
    model: &RegisteredModel,
    key: Option<RecordKey>,
    values: &vellum_core::Values,
) -> Result<AddStatus> {
    let errors = model.model.validate_values(values);
    if !errors.is_empty() {
        return Ok(AddStatus::ValidationFail(errors));
    }

    let key = match key {
        Some(key) => key,
        None => match model.model.key.derive(values)? {
            Some(key) => key,
            None => {
                let missing = key_references(model)
                    .into_iter()
                    .filter(|r| r.resolve(values).is_none())
                    .map(|reference| ValidationError::Required { reference })
                    .collect();
                return Ok(AddStatus::ValidationFail(missing));
            }
        },
    };
    let key_bytes = key.as_bytes();

    let _guard = ctx.locks.lock(model.id, key_bytes);
    let ticket = ctx.allocate();
    let version = ticket.version();
    let mut txn = ctx.storage.begin();

    let existence = model.ns(ColumnFamily::Existence);
    if txn.snapshot().may_exist(existence, key_bytes) && txn.get(existence, key_bytes).is_some() {
        txn.abort("record exists");
        return Ok(AddStatus::AlreadyExists { key });
    }

    txn.put(existence, key_bytes.to_vec(), version.to_bytes().to_vec())?;
    let writer = RecordWriter::new(model, key_bytes, version, ctx.keep_history);
    writer.advance_last_version(&mut txn)?;
    for (index, value) in values.iter() {
        writer.write_value(&mut txn, &Reference::property(index), value)?;
    }

    let indexer = IndexWriter::new(model, ctx.keep_history);
    let mut staged: Vec<(Reference, Value)> = Vec::new();
    let mut conflicts = Vec::new();
    for def in &model.uniques {
        let value = match def.reference.resolve(values) {
            Some(value) => value,
            None => continue,
        };
        if let Some((_, existing)) = lookup_unique(txn.snapshot(), model, def, value)? {
            if existing != key_bytes {
                conflicts.push(ValidationError::AlreadyExists {
                    reference: def.reference.clone(),
                    existing_key: existing,
                });
                continue;
            }
        }
        indexer.bind_unique(&mut txn, def, value, key_bytes, version)?;
        staged.push((def.reference.clone(), value.clone()));
    }
    if !conflicts.is_empty() {
        txn.abort("unique conflict");
        return Ok(AddStatus::ValidationFail(conflicts));
    }

    let mut index_changes = Vec::new();
    let mut getter = RecordGetter::new(values);
    for def in &model.indexes {
        if let Some(value) = index_value(def, key_bytes, &mut getter)? {
            indexer.write_index(&mut txn, def, &value, key_bytes, version)?;
            index_changes.push(IndexChange::Update {
                index: def.index_ref.clone(),
                value,
                previous: None,
            });
        }
    }

    let committed = txn.commit_with_checks(|view| {
        if view.committed(existence, key_bytes).is_some() {
            return Err(CommitFailure::AlreadyExists);
        }
        let conflicts = check_unique_bindings(view, model, &staged, key_bytes)?;
        if conflicts.is_empty() {
            Ok(())
        } else {
            Err(CommitFailure::Validation(conflicts))
        }
    });

    match committed {
        Ok(info) => {
            debug!(
                target: "vellum::add",
                model = %model.name(),
                key = %key,
                version = %version,
                writes = info.writes,
                "Record added"
            );
            ctx.publish(model, key_bytes, version, UpdateEventKind::Addition);
            let mut changes = vec![Change::ObjectCreate];
            if !index_changes.is_empty() {
                changes.push(Change::IndexChange(index_changes));
            }
            Ok(AddStatus::Success { key, version, changes })
        }
        Err(CommitFailure::AlreadyExists) => Ok(AddStatus::AlreadyExists { key }),
        Err(CommitFailure::Validation(errors)) => Ok(AddStatus::ValidationFail(errors)),
        Err(CommitFailure::Store(e)) => Err(e),
    }
}

fn key_references(model: &RegisteredModel) -> Vec<Reference> {
    match &model.model.key {
        vellum_core::KeyDefinition::Derived(descriptor) => {
            descriptor.references().into_iter().cloned().collect()
        }
        vellum_core::KeyDefinition::Uuid => Vec::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::ModelRegistry;
    use crate::listener::UpdateHub;
    use crate::locks::KeyLocks;
    use crate::versions::VersionTracker;
    use vellum_core::{
        DataModel, IsIndexable, KeyDefinition, LogicalClock, PropertyDefinition, PropertyKind, Values,
    };
    use vellum_storage::UnifiedStore;

    struct Fixture {
        storage: UnifiedStore,
        clock: LogicalClock,
        versions: VersionTracker,
        locks: KeyLocks,
        hub: UpdateHub,
    }

    impl Fixture {
        fn new() -> Self {
            Fixture {
                storage: UnifiedStore::new(),
                clock: LogicalClock::new(),
                versions: VersionTracker::new(),
                locks: KeyLocks::default(),
                hub: UpdateHub::new(16),
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
    }

    fn person() -> std::sync::Arc<RegisteredModel> {
        ModelRegistry::new()
            .register(
                DataModel::new(
                    "Person",
                    vec![
                        PropertyDefinition::new(1, "name", PropertyKind::string()).required().unique(),
                        PropertyDefinition::new(2, "age", PropertyKind::uint()),
                    ],
                )
                .with_index(IsIndexable::property(Reference::property(2))),
            )
            .unwrap()
    }

    #[test]
    fn test_add_writes_record_and_index() {
        let fx = Fixture::new();
        let model = person();
        let values = Values::new().with(1, "ann").with(2, 30u64);
        let status = process_add(&fx.ctx(), &model, None, &values).unwrap();
        match status {
            AddStatus::Success { key, changes, .. } => {
                assert_eq!(key.len(), 16);
                assert_eq!(changes[0], Change::ObjectCreate);
                assert!(matches!(changes[1], Change::IndexChange(ref c) if c.len() == 1));
            }
            other => panic!("unexpected {:?}", other),
        }
        assert_eq!(fx.storage.len(model.ns(ColumnFamily::Index)), 1);
        assert_eq!(fx.storage.len(model.ns(ColumnFamily::Unique)), 1);
    }

    #[test]
    fn test_add_existing_key_is_noop() {
        let fx = Fixture::new();
        let model = person();
        let key = RecordKey::new(vec![1u8; 16]);
        let values = Values::new().with(1, "ann");
        assert!(process_add(&fx.ctx(), &model, Some(key.clone()), &values)
            .unwrap()
            .is_success());
        let before = fx.storage.sequence();
        assert_eq!(
            process_add(&fx.ctx(), &model, Some(key.clone()), &values).unwrap(),
            AddStatus::AlreadyExists { key }
        );
        assert_eq!(fx.storage.sequence(), before);
    }

    #[test]
    fn test_add_invalid_values_writes_nothing() {
        let fx = Fixture::new();
        let model = person();
        let status = process_add(&fx.ctx(), &model, None, &Values::new().with(2, 3u64)).unwrap();
        assert!(matches!(status, AddStatus::ValidationFail(ref e) if e.len() == 1));
        assert!(fx.storage.is_empty(model.ns(ColumnFamily::Existence)));
    }

    #[test]
    fn test_unique_conflict_names_holder() {
        let fx = Fixture::new();
        let model = person();
        let first = RecordKey::new(vec![1u8; 16]);
        process_add(&fx.ctx(), &model, Some(first.clone()), &Values::new().with(1, "a")).unwrap();
        let status = process_add(&fx.ctx(), &model, None, &Values::new().with(1, "a")).unwrap();
        assert_eq!(
            status,
            AddStatus::ValidationFail(vec![ValidationError::AlreadyExists {
                reference: Reference::property(1),
                existing_key: first.into_bytes(),
            }])
        );
        assert_eq!(fx.storage.len(model.ns(ColumnFamily::Existence)), 1);
    }

    #[test]
    fn test_derived_key() {
        let fx = Fixture::new();
        let model = ModelRegistry::new()
            .register(
                DataModel::new(
                    "Measurement",
                    vec![PropertyDefinition::new(1, "sensor", PropertyKind::uint())
                        .required()
                        .final_value()],
                )
                .with_key(KeyDefinition::Derived(IsIndexable::property(Reference::property(1)))),
            )
            .unwrap();
        let values = Values::new().with(1, 9u64);
        let key = match process_add(&fx.ctx(), &model, None, &values).unwrap() {
            AddStatus::Success { key, .. } => key,
            other => panic!("unexpected {:?}", other),
        };
        assert_eq!(key.len(), model.key_size);
        assert!(matches!(
            process_add(&fx.ctx(), &model, None, &values).unwrap(),
            AddStatus::AlreadyExists { .. }
        ));
    }

    #[test]
    fn test_wrong_key_size_is_request_error() {
        let model = person();
        let request = AddRequest::new("Person").object_with_key(RecordKey::new(vec![1u8; 3]), Values::new());
        assert!(validate_add_request(&model, &request).unwrap_err().is_request());
    }
}
