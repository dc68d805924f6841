//! Schema definitions
//!
//! - [`DataModel`]: record type with key formation, properties and indexes
//! - [`PropertyDefinition`] / [`PropertyKind`]: shape, bounds and flags of a property
//! - [`EmbeddedModel`]: schema of an embedded record

pub mod model;
pub mod property;

pub use model::{values_from_pins, DataModel, KeyDefinition, ResolvedReference};
pub use property::{validate_fields, EmbeddedModel, PropertyDefinition, PropertyKind, TypeVariant};
