//! Registry of data models
//!
//! Every model registered with a store gets a numeric id that prefixes all of
//! its namespaces. Registration validates the model once and precomputes
//! what the mutation and read paths need per request: the key size, index
//! descriptor bytes and unique field references.

use parking_lot::RwLock;
use rustc_hash::FxHashMap;
use std::sync::Arc;
use tracing::info;

use vellum_core::{DataModel, IsIndexable, Reference};
use vellum_storage::{ColumnFamily, Namespace};

use crate::error::{Result, StoreError};

/// A secondary index of a model
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexDef {
    /// Descriptor computing the index value
    pub descriptor: IsIndexable,
    /// Descriptor bytes, the prefix of every entry of this index
    pub index_ref: Vec<u8>,
}

/// A unique property of a model
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UniqueDef {
    /// Property reference
    pub reference: Reference,
    /// Reference bytes, the prefix of every binding of this property
    pub field_ref: Vec<u8>,
}

/// A validated model with its storage identity
#[derive(Debug)]
pub struct RegisteredModel {
    /// Namespace prefix
    pub id: u32,
    /// Schema
    pub model: DataModel,
    /// Size of every key of this model
    pub key_size: usize,
    /// Secondary indexes
    pub indexes: Vec<IndexDef>,
    /// Unique properties
    pub uniques: Vec<UniqueDef>,
}

impl RegisteredModel {
    fn new(id: u32, model: DataModel) -> Result<Self> {
        model.validate_definition()?;
        let key_size = model.key_size()?;
        let indexes = model
            .indexes
            .iter()
            .map(|descriptor| IndexDef {
                index_ref: descriptor.to_descriptor_bytes(),
                descriptor: descriptor.clone(),
            })
            .collect();
        let uniques = model
            .unique_properties()
            .map(|def| {
                let reference = Reference::property(def.index);
                UniqueDef {
                    field_ref: reference.to_bytes(),
                    reference,
                }
            })
            .collect();
        Ok(RegisteredModel {
            id,
            model,
            key_size,
            indexes,
            uniques,
        })
    }

    /// Model name
    pub fn name(&self) -> &str {
        &self.model.name
    }

    /// Namespace of one column family of this model
    pub fn ns(&self, family: ColumnFamily) -> Namespace {
        Namespace::new(self.id, family)
    }

    /// Unique definition of a reference, if the property is unique
    pub fn unique(&self, reference: &Reference) -> Option<&UniqueDef> {
        self.uniques.iter().find(|u| &u.reference == reference)
    }

    /// Index whose descriptor equals `descriptor`
    pub fn index(&self, descriptor: &IsIndexable) -> Option<&IndexDef> {
        self.indexes.iter().find(|i| &i.descriptor == descriptor)
    }
}

/// Models known to a store, by name
#[derive(Debug, Default)]
pub struct ModelRegistry {
    models: RwLock<FxHashMap<String, Arc<RegisteredModel>>>,
}

impl ModelRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a model
    ///
    /// Re-registering an identical model returns the existing registration;
    /// a different model under a taken name is rejected.
    pub fn register(&self, model: DataModel) -> Result<Arc<RegisteredModel>> {
        let mut models = self.models.write();
        if let Some(existing) = models.get(&model.name) {
            if existing.model == model {
                return Ok(Arc::clone(existing));
            }
            return Err(StoreError::request(format!(
                "model '{}' is already registered with a different definition",
                model.name
            )));
        }
        let id = models.len() as u32 + 1;
        let registered = Arc::new(RegisteredModel::new(id, model)?);
        info!(
            target: "vellum::registry",
            model = %registered.name(),
            id,
            indexes = registered.indexes.len(),
            uniques = registered.uniques.len(),
            "Registered model"
        );
        models.insert(registered.model.name.clone(), Arc::clone(&registered));
        Ok(registered)
    }

    /// Look up a model by name
    pub fn get(&self, name: &str) -> Result<Arc<RegisteredModel>> {
        self.models
            .read()
            .get(name)
            .cloned()
            .ok_or_else(|| StoreError::UnknownModel(name.to_string()))
    }

    /// Number of registered models
    pub fn len(&self) -> usize {
        self.models.read().len()
    }

    /// Check if no model is registered
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vellum_core::{PropertyDefinition, PropertyKind};

    fn model() -> DataModel {
        DataModel::new(
            "Person",
            vec![
                PropertyDefinition::new(1, "name", PropertyKind::string()).unique(),
                PropertyDefinition::new(2, "age", PropertyKind::uint()),
            ],
        )
        .with_index(IsIndexable::property(Reference::property(2)))
    }

    #[test]
    fn test_register_precomputes() {
        let registry = ModelRegistry::new();
        let registered = registry.register(model()).unwrap();
        assert_eq!(registered.id, 1);
        assert_eq!(registered.key_size, 16);
        assert_eq!(registered.indexes.len(), 1);
        assert!(registered.unique(&Reference::property(1)).is_some());
        assert!(registered.unique(&Reference::property(2)).is_none());
    }

    #[test]
    fn test_reregister_same_model() {
        let registry = ModelRegistry::new();
        let first = registry.register(model()).unwrap();
        let second = registry.register(model()).unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_conflicting_definition_rejected() {
        let registry = ModelRegistry::new();
        registry.register(model()).unwrap();
        let other = DataModel::new("Person", vec![]);
        assert!(registry.register(other).unwrap_err().is_request());
    }

    #[test]
    fn test_unknown_model() {
        let registry = ModelRegistry::new();
        assert_eq!(
            registry.get("Nope").unwrap_err(),
            StoreError::UnknownModel("Nope".to_string())
        );
    }
}
