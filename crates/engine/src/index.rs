//! Index engine
//!
//! Secondary index and unique binding maintenance, current and historic.
//!
//! ## Index entries
//!
//! An index entry is addressed by `index_ref + index_value + key` and holds
//! the version that wrote it. With history enabled, every write and removal
//! is mirrored as `... + inverted version` holding [`INDEX_PRESENT`] or
//! [`INDEX_REMOVED`], which answers "which keys had which index value at
//! version V".
//!
//! ## Unique bindings
//!
//! `field_ref + value` maps to `version + key`. Bindings are staged inside
//! the mutating transaction and verified against committed state by
//! [`check_unique_bindings`] while the commit holds the store write lock, so
//! two records can never both commit the same value.

use rustc_hash::FxHashSet;

use vellum_core::codec::encode_scalar;
use vellum_core::layout::{self, INDEX_PRESENT, INDEX_REMOVED};
use vellum_core::version::VERSION_SIZE;
use vellum_core::{CoreError, IndexChange, Reference, ValidationError, Value, Version};
use vellum_storage::{ColumnFamily, CommitView, Direction, StoreSnapshot, Transaction};

use crate::database::{IndexDef, RegisteredModel, UniqueDef};
use crate::error::{Result, StoreError};
use crate::values_getter::ValuesGetter;

/// Compute the index value of a record for one index
pub fn index_value(def: &IndexDef, key: &[u8], getter: &mut dyn ValuesGetter) -> Result<Option<Vec<u8>>> {
    def.descriptor
        .index_value::<StoreError, _>(key, &mut |r: &Reference| getter.value(r))
}

/// Before and after index value of one index
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct IndexDiff {
    pub position: usize,
    pub before: Option<Vec<u8>>,
    pub after: Option<Vec<u8>>,
}

/// Index values that differ between two states of a record
pub(crate) fn diff_indexes(
    model: &RegisteredModel,
    key: &[u8],
    before: &mut dyn ValuesGetter,
    after: &mut dyn ValuesGetter,
) -> Result<Vec<IndexDiff>> {
    let mut diffs = Vec::new();
    for (position, def) in model.indexes.iter().enumerate() {
        let old = index_value(def, key, before)?;
        let new = index_value(def, key, after)?;
        if old != new {
            diffs.push(IndexDiff {
                position,
                before: old,
                after: new,
            });
        }
    }
    Ok(diffs)
}

/// Writes index and unique entries of one model inside a transaction
pub(crate) struct IndexWriter<'m> {
    pub model: &'m RegisteredModel,
    pub keep_history: bool,
}

impl<'m> IndexWriter<'m> {
    pub fn new(model: &'m RegisteredModel, keep_history: bool) -> Self {
        IndexWriter { model, keep_history }
    }

    // ========================================================================
    // Secondary indexes
    // ========================================================================

    pub fn write_index(
        &self,
        txn: &mut Transaction<'_>,
        def: &IndexDef,
        value: &[u8],
        key: &[u8],
        version: Version,
    ) -> Result<()> {
        txn.put(
            self.model.ns(ColumnFamily::Index),
            layout::index_key(&def.index_ref, value, key),
            version.to_bytes().to_vec(),
        )?;
        if self.keep_history {
            txn.put(
                self.model.ns(ColumnFamily::HistoricIndex),
                layout::historic_index_key(&def.index_ref, value, key, version),
                INDEX_PRESENT.to_vec(),
            )?;
        }
        Ok(())
    }

    pub fn delete_index(
        &self,
        txn: &mut Transaction<'_>,
        def: &IndexDef,
        value: &[u8],
        key: &[u8],
        version: Version,
    ) -> Result<()> {
        txn.delete(
            self.model.ns(ColumnFamily::Index),
            layout::index_key(&def.index_ref, value, key),
        )?;
        if self.keep_history {
            txn.put(
                self.model.ns(ColumnFamily::HistoricIndex),
                layout::historic_index_key(&def.index_ref, value, key, version),
                INDEX_REMOVED.to_vec(),
            )?;
        }
        Ok(())
    }

    /// Apply index diffs, echoing each as an [`IndexChange`]
    pub fn apply_diffs(
        &self,
        txn: &mut Transaction<'_>,
        key: &[u8],
        version: Version,
        diffs: Vec<IndexDiff>,
    ) -> Result<Vec<IndexChange>> {
        let mut changes = Vec::with_capacity(diffs.len());
        for diff in diffs {
            let def = &self.model.indexes[diff.position];
            if let Some(old) = &diff.before {
                self.delete_index(txn, def, old, key, version)?;
            }
            match diff.after {
                Some(new) => {
                    self.write_index(txn, def, &new, key, version)?;
                    changes.push(IndexChange::Update {
                        index: def.index_ref.clone(),
                        value: new,
                        previous: diff.before,
                    });
                }
                None => {
                    if let Some(old) = diff.before {
                        changes.push(IndexChange::Delete {
                            index: def.index_ref.clone(),
                            value: old,
                        });
                    }
                }
            }
        }
        Ok(changes)
    }

    /// Remove every historic index entry of `key` under one index value
    pub fn purge_historic_index(&self, txn: &mut Transaction<'_>, def: &IndexDef, value: &[u8], key: &[u8]) -> Result<usize> {
        let prefix = layout::index_key(&def.index_ref, value, key);
        Ok(txn.delete_prefix(self.model.ns(ColumnFamily::HistoricIndex), &prefix)?)
    }

    // ========================================================================
    // Unique bindings
    // ========================================================================

    /// Bind `value` to `key`
    pub fn bind_unique(
        &self,
        txn: &mut Transaction<'_>,
        def: &UniqueDef,
        value: &Value,
        key: &[u8],
        version: Version,
    ) -> Result<()> {
        let value = encode_scalar(value)?;
        txn.put(
            self.model.ns(ColumnFamily::Unique),
            layout::unique_key(&def.field_ref, &value),
            layout::unique_value(version, key),
        )?;
        if self.keep_history {
            txn.put(
                self.model.ns(ColumnFamily::HistoricUnique),
                layout::historic_unique_key(&def.field_ref, &value, version),
                key.to_vec(),
            )?;
        }
        Ok(())
    }

    /// Release the binding of `value`
    pub fn release_unique(&self, txn: &mut Transaction<'_>, def: &UniqueDef, value: &Value, version: Version) -> Result<()> {
        let value = encode_scalar(value)?;
        txn.delete(
            self.model.ns(ColumnFamily::Unique),
            layout::unique_key(&def.field_ref, &value),
        )?;
        if self.keep_history {
            txn.put(
                self.model.ns(ColumnFamily::HistoricUnique),
                layout::historic_unique_key(&def.field_ref, &value, version),
                Vec::new(),
            )?;
        }
        Ok(())
    }

    /// Remove every trace of `key` holding `value`, current and historic
    ///
    /// Release markers stay; they never resolve to a key.
    pub fn purge_unique(&self, txn: &mut Transaction<'_>, def: &UniqueDef, value: &Value, key: &[u8]) -> Result<()> {
        let value = encode_scalar(value)?;
        let unique_ns = self.model.ns(ColumnFamily::Unique);
        let binding = layout::unique_key(&def.field_ref, &value);
        let bound_here = match txn.get(unique_ns, &binding) {
            Some(bytes) => layout::split_unique_value(bytes)?.1 == key,
            None => false,
        };
        if bound_here {
            txn.delete(unique_ns, binding.clone())?;
        }

        let historic_ns = self.model.ns(ColumnFamily::HistoricUnique);
        let held: Vec<Vec<u8>> = txn
            .scan_prefix(historic_ns, &binding, Direction::Forward)
            .into_iter()
            .filter(|(k, v)| k.len() == binding.len() + VERSION_SIZE && v.as_slice() == key)
            .map(|(k, _)| k)
            .collect();
        for k in held {
            txn.delete(historic_ns, k)?;
        }
        Ok(())
    }
}

// ============================================================================
// Reads
// ============================================================================

/// Current binding of a unique value: binding version and key
pub fn lookup_unique(
    snapshot: &StoreSnapshot,
    model: &RegisteredModel,
    def: &UniqueDef,
    value: &Value,
) -> Result<Option<(Version, Vec<u8>)>> {
    let value = encode_scalar(value)?;
    match snapshot.get(
        model.ns(ColumnFamily::Unique),
        &layout::unique_key(&def.field_ref, &value),
    ) {
        Some(bytes) => {
            let (version, key) = layout::split_unique_value(bytes)?;
            Ok(Some((version, key.to_vec())))
        }
        None => Ok(None),
    }
}

/// Key bound to a unique value at `as_of`, from the historic mirror
pub fn lookup_unique_as_of(
    snapshot: &StoreSnapshot,
    model: &RegisteredModel,
    def: &UniqueDef,
    value: &Value,
    as_of: Version,
) -> Result<Option<Vec<u8>>> {
    let value = encode_scalar(value)?;
    let prefix = layout::unique_key(&def.field_ref, &value);
    for (k, v) in snapshot.scan_prefix(model.ns(ColumnFamily::HistoricUnique), &prefix, Direction::Forward) {
        if k.len() != prefix.len() + VERSION_SIZE {
            continue;
        }
        let version = Version::from_inverted_bytes(&k[prefix.len()..])?;
        if version <= as_of {
            return Ok(if v.is_empty() { None } else { Some(v.to_vec()) });
        }
    }
    Ok(None)
}

/// One hit of an index scan
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexHit {
    /// Index value without the index reference
    pub value: Vec<u8>,
    /// Record key
    pub key: Vec<u8>,
}

/// Index entries below `index_ref + prefix` in the latest index
pub fn scan_index(
    snapshot: &StoreSnapshot,
    model: &RegisteredModel,
    def: &IndexDef,
    prefix: &[u8],
    direction: Direction,
) -> Result<Vec<IndexHit>> {
    let mut start = def.index_ref.clone();
    start.extend_from_slice(prefix);
    snapshot
        .scan_prefix(model.ns(ColumnFamily::Index), &start, direction)
        .map(|(k, _)| {
            let (value, key) = layout::split_index_key(&def.index_ref, model.key_size, k)?;
            Ok(IndexHit {
                value: value.to_vec(),
                key: key.to_vec(),
            })
        })
        .collect()
}

/// Index entries below `index_ref + prefix` as they were at `as_of`
pub fn scan_index_as_of(
    snapshot: &StoreSnapshot,
    model: &RegisteredModel,
    def: &IndexDef,
    prefix: &[u8],
    as_of: Version,
    direction: Direction,
) -> Result<Vec<IndexHit>> {
    let mut start = def.index_ref.clone();
    start.extend_from_slice(prefix);
    let mut decided = FxHashSet::default();
    let mut hits = Vec::new();
    for (k, marker) in snapshot.scan_prefix(model.ns(ColumnFamily::HistoricIndex), &start, Direction::Forward) {
        if k.len() < VERSION_SIZE {
            return Err(CoreError::codec("historic index key too short").into());
        }
        let (entry, inverted) = k.split_at(k.len() - VERSION_SIZE);
        let version = Version::from_inverted_bytes(inverted)?;
        // Versions of one value+key run newest first
        if version > as_of || decided.contains(entry) {
            continue;
        }
        decided.insert(entry.to_vec());
        if marker == INDEX_PRESENT {
            let (value, key) = layout::split_index_key(&def.index_ref, model.key_size, entry)?;
            hits.push(IndexHit {
                value: value.to_vec(),
                key: key.to_vec(),
            });
        }
    }
    if direction == Direction::Reverse {
        hits.reverse();
    }
    Ok(hits)
}

/// Verify staged unique bindings against committed state
///
/// A binding conflicts when the committed store binds the value to another
/// key. Returns one `AlreadyExists` per conflict.
pub(crate) fn check_unique_bindings(
    view: &CommitView<'_>,
    model: &RegisteredModel,
    staged: &[(Reference, Value)],
    key: &[u8],
) -> Result<Vec<ValidationError>> {
    let ns = model.ns(ColumnFamily::Unique);
    let mut conflicts = Vec::new();
    for (reference, value) in staged {
        let def = match model.unique(reference) {
            Some(def) => def,
            None => continue,
        };
        let binding = layout::unique_key(&def.field_ref, &encode_scalar(value)?);
        if let Some(bytes) = view.committed(ns, &binding) {
            let (_, existing) = layout::split_unique_value(bytes)?;
            if existing != key {
                conflicts.push(ValidationError::AlreadyExists {
                    reference: reference.clone(),
                    existing_key: existing.to_vec(),
                });
            }
        }
    }
    Ok(conflicts)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::ModelRegistry;
    use crate::values_getter::RecordGetter;
    use vellum_core::{DataModel, IsIndexable, PropertyDefinition, PropertyKind, Values};
    use vellum_storage::UnifiedStore;

    fn registered() -> std::sync::Arc<RegisteredModel> {
        let model = DataModel::new(
            "Person",
            vec![
                PropertyDefinition::new(1, "name", PropertyKind::string()).unique(),
                PropertyDefinition::new(2, "age", PropertyKind::uint()),
            ],
        )
        .with_index(IsIndexable::property(Reference::property(2)));
        ModelRegistry::new().register(model).unwrap()
    }

    const KEY_A: [u8; 16] = [1; 16];
    const KEY_B: [u8; 16] = [2; 16];

    #[test]
    fn test_diff_detects_changed_value() {
        let model = registered();
        let before = Values::new().with(2, 30u64);
        let after = Values::new().with(2, 31u64);
        let diffs = diff_indexes(
            &model,
            &KEY_A,
            &mut RecordGetter::new(&before),
            &mut RecordGetter::new(&after),
        )
        .unwrap();
        assert_eq!(diffs.len(), 1);
        assert!(diffs[0].before.is_some() && diffs[0].after.is_some());

        let unchanged = diff_indexes(
            &model,
            &KEY_A,
            &mut RecordGetter::new(&before),
            &mut RecordGetter::new(&before),
        )
        .unwrap();
        assert!(unchanged.is_empty());
    }

    #[test]
    fn test_historic_index_membership() {
        let model = registered();
        let store = UnifiedStore::new();
        let writer = IndexWriter::new(&model, true);
        let def = &model.indexes[0];
        let thirty = encode_scalar(&Value::UInt(30)).unwrap();
        let forty = encode_scalar(&Value::UInt(40)).unwrap();

        let mut txn = store.begin();
        writer.write_index(&mut txn, def, &thirty, &KEY_A, Version::new(1)).unwrap();
        txn.commit().unwrap();
        let mut txn = store.begin();
        writer.delete_index(&mut txn, def, &thirty, &KEY_A, Version::new(2)).unwrap();
        writer.write_index(&mut txn, def, &forty, &KEY_A, Version::new(2)).unwrap();
        txn.commit().unwrap();

        let snap = store.snapshot();
        let at_one = scan_index_as_of(&snap, &model, def, &[], Version::new(1), Direction::Forward).unwrap();
        assert_eq!(at_one, vec![IndexHit { value: thirty, key: KEY_A.to_vec() }]);
        let at_two = scan_index_as_of(&snap, &model, def, &[], Version::new(2), Direction::Forward).unwrap();
        assert_eq!(at_two.len(), 1);
        assert_eq!(at_two[0].value, forty);
        assert_eq!(scan_index(&snap, &model, def, &[], Direction::Forward).unwrap(), at_two);
    }

    #[test]
    fn test_unique_binding_history() {
        let model = registered();
        let store = UnifiedStore::new();
        let writer = IndexWriter::new(&model, true);
        let def = &model.uniques[0];
        let name = Value::from("a");

        let mut txn = store.begin();
        writer.bind_unique(&mut txn, def, &name, &KEY_A, Version::new(1)).unwrap();
        txn.commit().unwrap();
        let mut txn = store.begin();
        writer.release_unique(&mut txn, def, &name, Version::new(2)).unwrap();
        txn.commit().unwrap();

        let snap = store.snapshot();
        assert!(lookup_unique(&snap, &model, def, &name).unwrap().is_none());
        assert_eq!(
            lookup_unique_as_of(&snap, &model, def, &name, Version::new(1)).unwrap(),
            Some(KEY_A.to_vec())
        );
        assert_eq!(lookup_unique_as_of(&snap, &model, def, &name, Version::new(2)).unwrap(), None);

        let mut txn = store.begin();
        writer.purge_unique(&mut txn, def, &name, &KEY_A).unwrap();
        txn.commit().unwrap();
        let snap = store.snapshot();
        assert_eq!(lookup_unique_as_of(&snap, &model, def, &name, Version::new(1)).unwrap(), None);
    }

    #[test]
    fn test_commit_check_reports_other_key() {
        let model = registered();
        let store = UnifiedStore::new();
        let writer = IndexWriter::new(&model, false);
        let def = &model.uniques[0];
        let name = Value::from("a");

        let mut txn = store.begin();
        writer.bind_unique(&mut txn, def, &name, &KEY_A, Version::new(1)).unwrap();
        txn.commit().unwrap();

        let mut txn = store.begin();
        writer.bind_unique(&mut txn, def, &name, &KEY_B, Version::new(2)).unwrap();
        let staged = vec![(Reference::property(1), name.clone())];
        let result = txn.commit_with_checks::<StoreError, _>(|view| {
            let conflicts = check_unique_bindings(view, &model, &staged, &KEY_B)?;
            assert_eq!(
                conflicts,
                vec![ValidationError::AlreadyExists {
                    reference: Reference::property(1),
                    existing_key: KEY_A.to_vec(),
                }]
            );
            Err(StoreError::request("conflict"))
        });
        assert!(result.is_err());
        let snap = store.snapshot();
        assert_eq!(lookup_unique(&snap, &model, def, &name).unwrap().unwrap().1, KEY_A.to_vec());
    }
}
