//! ValuesGetter: "current value of reference R for record K"
//!
//! One trait, several backings:
//!
//! | Getter | Reads |
//! |---|---|
//! | [`SnapshotGetter`] | latest table of a committed snapshot |
//! | [`TransactionGetter`] | latest table through a transaction's overlay |
//! | [`HistoricGetter`] | historic table, newest entry at or before a version |
//! | [`RecordGetter`] | an in-memory record that is not stored yet |
//!
//! [`ReadGetter`] picks the latest or historic backing for a read.
//!
//! Storage-backed getters load only the qualifiers below the requested
//! reference and memoize every answer for their lifetime, so a getter is a
//! read session: create it per record and operation, drop it afterwards.
//!
//! # Rebuilding values
//!
//! Structured values are stored decomposed (see `processors::RecordWriter`).
//! Rebuilding them needs the schema kind: an empty list and an empty map have
//! the same stored form, a counter of zero.

use rustc_hash::{FxHashMap, FxHashSet};
use std::collections::BTreeMap;
use std::ops::Bound;

use vellum_core::reference::{LAST_VERSION_QUALIFIER, SOFT_DELETE_QUALIFIER};
use vellum_core::{
    layout, CoreError, PropertyDefinition, PropertyKind, Reference, Segment, StoredValue, TypedValue,
    Value, Values, Version,
};
use vellum_storage::{ColumnFamily, Direction, StoreSnapshot, Transaction};

use crate::database::RegisteredModel;
use crate::error::Result;

/// Read access to the values of one record
pub trait ValuesGetter {
    /// Value at `reference`, `None` when absent
    fn value(&mut self, reference: &Reference) -> Result<Option<Value>>;
}

/// Live qualifiers of one record, keyed by qualifier bytes
pub(crate) type Qualifiers = BTreeMap<Vec<u8>, StoredValue>;

pub(crate) fn is_meta_qualifier(qualifier: &[u8]) -> bool {
    qualifier == SOFT_DELETE_QUALIFIER || qualifier == LAST_VERSION_QUALIFIER
}

// ============================================================================
// Qualifier sources
// ============================================================================

/// Where a storage-backed getter loads qualifiers from
pub trait QualifierSource {
    /// Live qualifiers of `key` starting with `qualifier`
    fn load(&self, model: &RegisteredModel, key: &[u8], qualifier: &[u8]) -> Result<Qualifiers>;
}

fn collect_latest<'e>(
    key_len: usize,
    entries: impl Iterator<Item = (&'e [u8], &'e [u8])>,
) -> Result<Qualifiers> {
    let mut out = Qualifiers::new();
    for (k, v) in entries {
        let qualifier = &k[key_len..];
        if is_meta_qualifier(qualifier) {
            continue;
        }
        let (_, stored) = StoredValue::from_versioned_bytes(v)?;
        if !stored.is_deleted() {
            out.insert(qualifier.to_vec(), stored);
        }
    }
    Ok(out)
}

/// Latest table of a committed snapshot
#[derive(Debug, Clone, Copy)]
pub struct LatestSource<'a>(pub &'a StoreSnapshot);

impl QualifierSource for LatestSource<'_> {
    fn load(&self, model: &RegisteredModel, key: &[u8], qualifier: &[u8]) -> Result<Qualifiers> {
        let prefix = layout::table_key(key, qualifier);
        collect_latest(
            key.len(),
            self.0
                .scan_prefix(model.ns(ColumnFamily::Table), &prefix, Direction::Forward),
        )
    }
}

/// Latest table seen through a transaction
#[derive(Debug, Clone, Copy)]
pub struct OverlaySource<'t, 'a>(pub &'t Transaction<'a>);

impl QualifierSource for OverlaySource<'_, '_> {
    fn load(&self, model: &RegisteredModel, key: &[u8], qualifier: &[u8]) -> Result<Qualifiers> {
        let prefix = layout::table_key(key, qualifier);
        let entries = self
            .0
            .scan_prefix(model.ns(ColumnFamily::Table), &prefix, Direction::Forward);
        collect_latest(
            key.len(),
            entries.iter().map(|(k, v)| (k.as_slice(), v.as_slice())),
        )
    }
}

/// Historic table as of a version
#[derive(Debug, Clone, Copy)]
pub struct HistoricSource<'a> {
    /// Snapshot holding the historic mirror
    pub snapshot: &'a StoreSnapshot,
    /// Newest version taken into account
    pub as_of: Version,
}

impl QualifierSource for HistoricSource<'_> {
    fn load(&self, model: &RegisteredModel, key: &[u8], qualifier: &[u8]) -> Result<Qualifiers> {
        let prefix = layout::table_key(key, qualifier);
        let mut decided = FxHashSet::default();
        let mut out = Qualifiers::new();
        for (k, v) in self.snapshot.scan_prefix(
            model.ns(ColumnFamily::HistoricTable),
            &prefix,
            Direction::Forward,
        ) {
            let (qualifier, version) = layout::split_historic_table_key(key.len(), k)?;
            // Entries of one qualifier run newest first
            if version > self.as_of || is_meta_qualifier(qualifier) || decided.contains(qualifier) {
                continue;
            }
            decided.insert(qualifier.to_vec());
            let stored = StoredValue::from_bytes(v)?;
            if !stored.is_deleted() {
                out.insert(qualifier.to_vec(), stored);
            }
        }
        Ok(out)
    }
}

// ============================================================================
// Storage-backed getter
// ============================================================================

/// Memoizing getter over a [`QualifierSource`]
#[derive(Debug)]
pub struct StoredGetter<'m, S> {
    model: &'m RegisteredModel,
    key: &'m [u8],
    source: S,
    cache: FxHashMap<Reference, Option<Value>>,
}

/// Getter over the latest table of a snapshot
pub type SnapshotGetter<'a> = StoredGetter<'a, LatestSource<'a>>;
/// Getter through a transaction overlay
pub type TransactionGetter<'t, 'a> = StoredGetter<'t, OverlaySource<'t, 'a>>;
/// Getter over the historic table
pub type HistoricGetter<'a> = StoredGetter<'a, HistoricSource<'a>>;

impl<'a> StoredGetter<'a, LatestSource<'a>> {
    /// Latest committed values of `key` in `snapshot`
    pub fn latest(model: &'a RegisteredModel, snapshot: &'a StoreSnapshot, key: &'a [u8]) -> Self {
        StoredGetter::new(model, key, LatestSource(snapshot))
    }
}

impl<'t, 'a> StoredGetter<'t, OverlaySource<'t, 'a>> {
    /// Values of `key` including the transaction's own writes
    pub fn overlay(model: &'t RegisteredModel, txn: &'t Transaction<'a>, key: &'t [u8]) -> Self {
        StoredGetter::new(model, key, OverlaySource(txn))
    }
}

impl<'a> StoredGetter<'a, HistoricSource<'a>> {
    /// Values of `key` as they were at `as_of`
    pub fn historic(
        model: &'a RegisteredModel,
        snapshot: &'a StoreSnapshot,
        key: &'a [u8],
        as_of: Version,
    ) -> Self {
        StoredGetter::new(model, key, HistoricSource { snapshot, as_of })
    }
}

impl<'m, S: QualifierSource> StoredGetter<'m, S> {
    /// Getter over an arbitrary source
    pub fn new(model: &'m RegisteredModel, key: &'m [u8], source: S) -> Self {
        StoredGetter {
            model,
            key,
            source,
            cache: FxHashMap::default(),
        }
    }

    /// Every property value of the record
    pub fn record_values(&mut self) -> Result<Values> {
        let entries = self.source.load(self.model, self.key, &[])?;
        build_fields(&self.model.model.properties, None, &entries)
    }
}

impl<S: QualifierSource> ValuesGetter for StoredGetter<'_, S> {
    fn value(&mut self, reference: &Reference) -> Result<Option<Value>> {
        if let Some(cached) = self.cache.get(reference) {
            return Ok(cached.clone());
        }
        let kind = self.model.model.definition_at(reference)?.kind;
        let qualifier = reference.to_bytes();
        let entries = self.source.load(self.model, self.key, &qualifier)?;
        let value = build_value(kind, &qualifier, &entries)?;
        self.cache.insert(reference.clone(), value.clone());
        Ok(value)
    }
}

/// Latest or historic getter, picked by the read's version
pub enum ReadGetter<'a> {
    /// Latest committed values
    Latest(SnapshotGetter<'a>),
    /// Values as of a version
    Historic(HistoricGetter<'a>),
}

impl<'a> ReadGetter<'a> {
    /// Historic when `as_of` is set, latest otherwise
    pub fn new(
        model: &'a RegisteredModel,
        snapshot: &'a StoreSnapshot,
        key: &'a [u8],
        as_of: Option<Version>,
    ) -> Self {
        match as_of {
            Some(version) => ReadGetter::Historic(StoredGetter::historic(model, snapshot, key, version)),
            None => ReadGetter::Latest(StoredGetter::latest(model, snapshot, key)),
        }
    }

    /// Every property value of the record
    pub fn record_values(&mut self) -> Result<Values> {
        match self {
            ReadGetter::Latest(getter) => getter.record_values(),
            ReadGetter::Historic(getter) => getter.record_values(),
        }
    }
}

impl ValuesGetter for ReadGetter<'_> {
    fn value(&mut self, reference: &Reference) -> Result<Option<Value>> {
        match self {
            ReadGetter::Latest(getter) => getter.value(reference),
            ReadGetter::Historic(getter) => getter.value(reference),
        }
    }
}

// ============================================================================
// In-memory getter
// ============================================================================

/// Getter over values that are not stored
#[derive(Debug, Clone, Copy)]
pub struct RecordGetter<'a> {
    values: &'a Values,
}

impl<'a> RecordGetter<'a> {
    /// Getter over `values`
    pub fn new(values: &'a Values) -> Self {
        RecordGetter { values }
    }
}

impl ValuesGetter for RecordGetter<'_> {
    fn value(&mut self, reference: &Reference) -> Result<Option<Value>> {
        Ok(reference.resolve(self.values).cloned())
    }
}

// ============================================================================
// Rebuilding values from qualifiers
// ============================================================================

/// Direct children of `qualifier`, in stored order
fn children<'e>(qualifier: &[u8], entries: &'e Qualifiers) -> Result<Vec<(Segment, &'e [u8])>> {
    let mut out = Vec::new();
    for k in entries
        .range::<[u8], _>((Bound::Included(qualifier), Bound::Unbounded))
        .map(|(k, _)| k)
    {
        if !k.starts_with(qualifier) {
            break;
        }
        if k.len() == qualifier.len() {
            continue;
        }
        let below = Reference::from_bytes(&k[qualifier.len()..])?;
        if let [segment] = below.segments() {
            out.push((segment.clone(), k.as_slice()));
        }
    }
    Ok(out)
}

fn build_fields(
    properties: &[PropertyDefinition],
    parent: Option<&[u8]>,
    entries: &Qualifiers,
) -> Result<Values> {
    let mut values = Values::new();
    for def in properties {
        let mut qualifier = parent.map(<[u8]>::to_vec).unwrap_or_default();
        qualifier.extend_from_slice(&Reference::property(def.index).to_bytes());
        if let Some(value) = build_value(&def.kind, &qualifier, entries)? {
            values.insert(def.index, value);
        }
    }
    Ok(values)
}

pub(crate) fn build_value(kind: &PropertyKind, qualifier: &[u8], entries: &Qualifiers) -> Result<Option<Value>> {
    let stored = match entries.get(qualifier) {
        Some(stored) => stored,
        None => return Ok(None),
    };
    let value = match (kind, stored) {
        (_, StoredValue::Scalar(v)) => v.clone(),
        (PropertyKind::List { item, .. }, StoredValue::Counter(_)) => {
            let mut items = Vec::new();
            for (segment, child) in children(qualifier, entries)? {
                if let Segment::ListItem(_) = segment {
                    if let Some(v) = build_value(item, child, entries)? {
                        items.push(v);
                    }
                }
            }
            Value::List(items)
        }
        (PropertyKind::Set { .. }, StoredValue::Counter(_)) => Value::Set(
            children(qualifier, entries)?
                .into_iter()
                .filter_map(|(segment, _)| match segment {
                    Segment::SetItem(v) => Some(v),
                    _ => None,
                })
                .collect(),
        ),
        (PropertyKind::Map { value, .. }, StoredValue::Counter(_))
        | (PropertyKind::IncMap { value, .. }, StoredValue::Counter(_)) => {
            let mut map = BTreeMap::new();
            for (segment, child) in children(qualifier, entries)? {
                if let Segment::MapKey(k) = segment {
                    if let Some(v) = build_value(value, child, entries)? {
                        map.insert(k, v);
                    }
                }
            }
            Value::Map(map)
        }
        (PropertyKind::MultiType { .. }, StoredValue::TypeTag(tag)) => {
            let variant = kind.variant(*tag).ok_or_else(|| {
                CoreError::codec(format!("stored type tag {} is not a variant", tag))
            })?;
            let mut child = qualifier.to_vec();
            child.extend_from_slice(&Reference::from_segments(vec![Segment::TypeTag(*tag)]).to_bytes());
            match build_value(&variant.kind, &child, entries)? {
                Some(v) => Value::Typed(TypedValue::new(*tag, v)),
                None => return Ok(None),
            }
        }
        (PropertyKind::Embed(model), StoredValue::Embed) => {
            Value::Embed(build_fields(&model.properties, Some(qualifier), entries)?)
        }
        (kind, stored) => {
            return Err(CoreError::TypeMismatch {
                expected: kind.name().to_string(),
                actual: format!("{:?}", stored),
            }
            .into())
        }
    };
    Ok(Some(value))
}

#[cfg(test)]
mod tests {
    use super::*;
    use vellum_core::{DataModel, EmbeddedModel};

    fn model() -> DataModel {
        DataModel::new(
            "Doc",
            vec![
                PropertyDefinition::new(1, "title", PropertyKind::string()),
                PropertyDefinition::new(2, "tags", PropertyKind::list(PropertyKind::string())),
                PropertyDefinition::new(3, "labels", PropertyKind::set(PropertyKind::string())),
                PropertyDefinition::new(
                    4,
                    "meta",
                    PropertyKind::Embed(EmbeddedModel::new(
                        "Meta",
                        vec![PropertyDefinition::new(1, "lang", PropertyKind::string())],
                    )),
                ),
            ],
        )
    }

    fn q(reference: &Reference) -> Vec<u8> {
        reference.to_bytes()
    }

    fn entries() -> Qualifiers {
        let tags = Reference::property(2);
        let labels = Reference::property(3);
        let meta = Reference::property(4);
        [
            (q(&Reference::property(1)), StoredValue::Scalar(Value::from("hello"))),
            (q(&tags), StoredValue::Counter(2)),
            (q(&tags.list_item(0)), StoredValue::Scalar(Value::from("a"))),
            (q(&tags.list_item(1)), StoredValue::Scalar(Value::from("b"))),
            (q(&labels), StoredValue::Counter(0)),
            (q(&meta), StoredValue::Embed),
            (q(&meta.field(1)), StoredValue::Scalar(Value::from("en"))),
        ]
        .into_iter()
        .collect()
    }

    #[test]
    fn test_build_fields_rebuilds_record() {
        let values = build_fields(&model().properties, None, &entries()).unwrap();
        assert_eq!(values.get(1), Some(&Value::from("hello")));
        assert_eq!(
            values.get(2),
            Some(&Value::List(vec![Value::from("a"), Value::from("b")]))
        );
        assert_eq!(values.get(3), Some(&Value::Set(Default::default())));
        assert_eq!(
            values.get(4),
            Some(&Value::Embed(Values::new().with(1, "en")))
        );
    }

    #[test]
    fn test_build_nested_value() {
        let meta = Reference::property(4);
        let value = build_value(&PropertyKind::string(), &q(&meta.field(1)), &entries()).unwrap();
        assert_eq!(value, Some(Value::from("en")));
        assert_eq!(
            build_value(&PropertyKind::string(), &q(&Reference::property(9)), &entries()).unwrap(),
            None
        );
    }

    #[test]
    fn test_shape_mismatch_is_error() {
        let result = build_value(&PropertyKind::string(), &q(&Reference::property(2)), &entries());
        assert!(result.is_err());
    }

    #[test]
    fn test_record_getter() {
        let values = Values::new().with(1, "x");
        let mut getter = RecordGetter::new(&values);
        assert_eq!(
            getter.value(&Reference::property(1)).unwrap(),
            Some(Value::from("x"))
        );
        assert_eq!(getter.value(&Reference::property(2)).unwrap(), None);
    }
}
