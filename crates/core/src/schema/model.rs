//! Data model definitions
//!
//! A [`DataModel`] names a record type: how its key is formed, which
//! properties it has, and which secondary indexes are maintained for it.
//! [`DataModel::validate_definition`] is run once when a model is registered
//! so the mutation paths can rely on a well-formed schema.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashSet};

use crate::error::{CoreError, Result};
use crate::indexable::IsIndexable;
use crate::key::{RecordKey, UUID_KEY_SIZE};
use crate::reference::{Reference, Segment};
use crate::schema::property::{find_property, validate_fields, PropertyDefinition, PropertyKind};
use crate::validation::ValidationError;
use crate::value::{Value, Values};

/// How record keys are formed
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum KeyDefinition {
    /// Random 16-byte surrogate
    Uuid,
    /// Derived from fixed-width, required, final properties
    Derived(IsIndexable),
}

impl KeyDefinition {
    /// Derive the key for a new record
    ///
    /// Returns `None` when a key property has no value.
    pub fn derive(&self, values: &Values) -> Result<Option<RecordKey>> {
        match self {
            KeyDefinition::Uuid => Ok(Some(RecordKey::random())),
            KeyDefinition::Derived(indexable) => {
                let bytes = indexable
                    .index_value::<CoreError, _>(&[], &mut |r| Ok(r.resolve(values).cloned()))?;
                Ok(bytes.map(RecordKey::new))
            }
        }
    }
}

/// What a reference points at inside a model
#[derive(Debug, Clone, Copy)]
pub struct ResolvedReference<'a> {
    /// Kind of the addressed value
    pub kind: &'a PropertyKind,
    /// Field definition when the reference ends on a property segment
    pub definition: Option<&'a PropertyDefinition>,
    /// Kind of the containing value, if nested
    pub parent_kind: Option<&'a PropertyKind>,
}

/// Schema of a record type
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataModel {
    /// Model name, unique per store
    pub name: String,
    /// Key formation
    pub key: KeyDefinition,
    /// Top-level properties
    pub properties: Vec<PropertyDefinition>,
    /// Secondary indexes
    #[serde(default)]
    pub indexes: Vec<IsIndexable>,
}

impl DataModel {
    /// Create a model with a surrogate key and no indexes
    pub fn new(name: impl Into<String>, properties: Vec<PropertyDefinition>) -> Self {
        DataModel {
            name: name.into(),
            key: KeyDefinition::Uuid,
            properties,
            indexes: Vec::new(),
        }
    }

    /// Builder-style key definition
    pub fn with_key(mut self, key: KeyDefinition) -> Self {
        self.key = key;
        self
    }

    /// Builder-style index
    pub fn with_index(mut self, index: IsIndexable) -> Self {
        self.indexes.push(index);
        self
    }

    /// Top-level property by index
    pub fn property(&self, index: u32) -> Option<&PropertyDefinition> {
        find_property(&self.properties, index)
    }

    /// Top-level property by name
    pub fn property_by_name(&self, name: &str) -> Option<&PropertyDefinition> {
        self.properties.iter().find(|p| p.name == name)
    }

    /// Top-level unique properties
    pub fn unique_properties(&self) -> impl Iterator<Item = &PropertyDefinition> {
        self.properties.iter().filter(|p| p.unique)
    }

    /// Build a reference from a path of property names through embedded records
    pub fn reference(&self, names: &[&str]) -> Result<Reference> {
        let (first, rest) = names
            .split_first()
            .ok_or_else(|| CoreError::invalid_reference("empty property path"))?;
        let mut def = self
            .property_by_name(first)
            .ok_or_else(|| CoreError::invalid_reference(format!("unknown property '{}'", first)))?;
        let mut reference = Reference::property(def.index);
        for name in rest {
            let embedded = match &def.kind {
                PropertyKind::Embed(model) => model,
                other => {
                    return Err(CoreError::invalid_reference(format!(
                        "'{}' is a {} and has no fields",
                        def.name,
                        other.name()
                    )))
                }
            };
            def = embedded
                .properties
                .iter()
                .find(|p| p.name == *name)
                .ok_or_else(|| CoreError::invalid_reference(format!("unknown property '{}'", name)))?;
            reference = reference.field(def.index);
        }
        Ok(reference)
    }

    /// Resolve what a reference addresses
    pub fn definition_at(&self, reference: &Reference) -> Result<ResolvedReference<'_>> {
        let mut segments = reference.segments().iter();
        let root = match segments.next() {
            Some(Segment::Property(i)) => self
                .property(*i)
                .ok_or_else(|| CoreError::invalid_reference(format!("unknown property {}", i)))?,
            _ => {
                return Err(CoreError::invalid_reference(format!(
                    "reference '{}' must start at a property",
                    reference
                )))
            }
        };

        let mut resolved = ResolvedReference {
            kind: &root.kind,
            definition: Some(root),
            parent_kind: None,
        };
        for segment in segments {
            let (kind, definition) = resolved.kind.child(segment).ok_or_else(|| {
                CoreError::invalid_reference(format!(
                    "segment {} does not apply to {} in '{}'",
                    segment,
                    resolved.kind.name(),
                    reference
                ))
            })?;
            resolved = ResolvedReference {
                kind,
                definition,
                parent_kind: Some(resolved.kind),
            };
        }
        Ok(resolved)
    }

    /// Validate a complete record, aggregating every violation
    pub fn validate_values(&self, values: &Values) -> Vec<ValidationError> {
        let mut errors = Vec::new();
        validate_fields(&self.properties, None, values, &mut errors);
        errors
    }

    /// Key size in bytes
    pub fn key_size(&self) -> Result<usize> {
        match &self.key {
            KeyDefinition::Uuid => Ok(UUID_KEY_SIZE),
            KeyDefinition::Derived(indexable) => indexable
                .references()
                .into_iter()
                .map(|r| {
                    self.definition_at(r)?.kind.fixed_width().ok_or_else(|| {
                        CoreError::invalid_model(format!("key part '{}' is not fixed width", r))
                    })
                })
                .sum(),
        }
    }

    /// Check that the model is well formed
    pub fn validate_definition(&self) -> Result<()> {
        if self.name.is_empty() {
            return Err(CoreError::invalid_model("model name is empty"));
        }
        check_properties(&self.name, &self.properties)?;

        for def in self.unique_properties() {
            if !def.kind.is_scalar() {
                return Err(CoreError::invalid_model(format!(
                    "unique property '{}' must be scalar",
                    def.name
                )));
            }
        }

        if let KeyDefinition::Derived(indexable) = &self.key {
            if !indexable.is_fixed_key_shape() {
                return Err(CoreError::invalid_model(
                    "key may only combine plain or reversed property parts",
                ));
            }
            for reference in indexable.references() {
                if reference.depth() != 1 {
                    return Err(CoreError::invalid_model(format!(
                        "key part '{}' must be a top-level property",
                        reference
                    )));
                }
                let resolved = self.definition_at(reference)?;
                let def = resolved
                    .definition
                    .ok_or_else(|| CoreError::invalid_model("key part without definition"))?;
                if !def.required || !def.is_final {
                    return Err(CoreError::invalid_model(format!(
                        "key property '{}' must be required and final",
                        def.name
                    )));
                }
            }
            self.key_size()?;
        }

        let mut seen = HashSet::new();
        for index in &self.indexes {
            if !seen.insert(index.to_descriptor_bytes()) {
                return Err(CoreError::invalid_model(format!("duplicate index {}", index)));
            }
            for reference in index.references() {
                if !self.definition_at(reference)?.kind.is_scalar() {
                    return Err(CoreError::invalid_model(format!(
                        "indexed reference '{}' must be scalar",
                        reference
                    )));
                }
            }
        }
        Ok(())
    }
}

fn check_properties(owner: &str, properties: &[PropertyDefinition]) -> Result<()> {
    let mut indexes = BTreeSet::new();
    let mut names = HashSet::new();
    for def in properties {
        if !indexes.insert(def.index) {
            return Err(CoreError::invalid_model(format!(
                "duplicate property index {} in '{}'",
                def.index, owner
            )));
        }
        if !names.insert(def.name.as_str()) {
            return Err(CoreError::invalid_model(format!(
                "duplicate property name '{}' in '{}'",
                def.name, owner
            )));
        }
        check_kind(&def.name, &def.kind)?;
    }
    Ok(())
}

fn check_kind(name: &str, kind: &PropertyKind) -> Result<()> {
    let require_scalar = |what: &str, k: &PropertyKind| {
        if k.is_scalar() {
            Ok(())
        } else {
            Err(CoreError::invalid_model(format!(
                "{} of '{}' must be scalar, got {}",
                what,
                name,
                k.name()
            )))
        }
    };
    let require_value = |k: &PropertyKind| match k {
        PropertyKind::Embed(model) => check_properties(&model.name, &model.properties),
        other => require_scalar("values", other),
    };

    match kind {
        PropertyKind::List { item, .. } | PropertyKind::Set { item, .. } => {
            require_scalar("items", item.as_ref())
        }
        PropertyKind::Map { key, value, .. } => {
            require_scalar("keys", key.as_ref())?;
            require_value(value.as_ref())
        }
        PropertyKind::IncMap { value, .. } => require_value(value.as_ref()),
        PropertyKind::MultiType { variants } => {
            let mut tags = BTreeSet::new();
            for variant in variants {
                if !tags.insert(variant.tag) {
                    return Err(CoreError::invalid_model(format!(
                        "duplicate type tag {} in '{}'",
                        variant.tag, name
                    )));
                }
                check_kind(&variant.name, &variant.kind)?;
            }
            Ok(())
        }
        PropertyKind::Embed(model) => check_properties(&model.name, &model.properties),
        _ => Ok(()),
    }
}

/// Values holding only the given top-level scalars
///
/// Used to derive keys and index prefixes from equality predicates.
pub fn values_from_pins<'a>(pins: impl IntoIterator<Item = (&'a Reference, &'a Value)>) -> Values {
    pins.into_iter()
        .filter_map(|(r, v)| match r.segments() {
            [Segment::Property(i)] => Some((*i, v.clone())),
            _ => None,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::EmbeddedModel;

    fn person() -> DataModel {
        DataModel::new(
            "Person",
            vec![
                PropertyDefinition::new(1, "name", PropertyKind::string())
                    .required()
                    .unique(),
                PropertyDefinition::new(2, "age", PropertyKind::uint()),
                PropertyDefinition::new(
                    3,
                    "address",
                    PropertyKind::Embed(EmbeddedModel::new(
                        "Address",
                        vec![PropertyDefinition::new(1, "city", PropertyKind::string())],
                    )),
                ),
                PropertyDefinition::new(4, "tags", PropertyKind::list(PropertyKind::string())),
            ],
        )
        .with_index(IsIndexable::property(Reference::property(2)))
    }

    #[test]
    fn test_valid_definition() {
        person().validate_definition().unwrap();
    }

    #[test]
    fn test_reference_by_names() {
        let model = person();
        assert_eq!(
            model.reference(&["address", "city"]).unwrap(),
            Reference::property(3).field(1)
        );
        assert!(model.reference(&["age", "x"]).is_err());
        assert!(model.reference(&["missing"]).is_err());
    }

    #[test]
    fn test_definition_at_list_item() {
        let model = person();
        let resolved = model
            .definition_at(&Reference::property(4).list_item(0))
            .unwrap();
        assert_eq!(resolved.kind, &PropertyKind::string());
        assert!(resolved.definition.is_none());
        assert!(matches!(resolved.parent_kind, Some(PropertyKind::List { .. })));
    }

    #[test]
    fn test_duplicate_index_rejected() {
        let model = person().with_index(IsIndexable::property(Reference::property(2)));
        assert!(model.validate_definition().is_err());
    }

    #[test]
    fn test_non_scalar_unique_rejected() {
        let mut model = person();
        model.properties[3].unique = true;
        assert!(model.validate_definition().is_err());
    }

    #[test]
    fn test_derived_key_requires_final_fixed_width() {
        let model = person().with_key(KeyDefinition::Derived(IsIndexable::property(
            Reference::property(2),
        )));
        assert!(model.validate_definition().is_err());

        let mut model = model;
        model.properties[1].required = true;
        model.properties[1].is_final = true;
        model.validate_definition().unwrap();
        assert_eq!(model.key_size().unwrap(), 9);
    }

    #[test]
    fn test_derived_key_from_values() {
        let key = KeyDefinition::Derived(IsIndexable::property(Reference::property(2)));
        let values = Values::new().with(2, 7u64);
        let derived = key.derive(&values).unwrap().unwrap();
        assert_eq!(derived.len(), 9);
        assert!(key.derive(&Values::new()).unwrap().is_none());
    }

    #[test]
    fn test_validate_values_aggregates() {
        let model = person();
        let values = Values::new().with(2, "not a number").with(9, 1i64);
        let errors = model.validate_values(&values);
        assert_eq!(errors.len(), 3);
    }
}
