//! Vellum - embedded versioned record store
//!
//! Vellum stores typed records under schema-defined models and keeps, per
//! record, its secondary index entries, unique bindings and optionally the
//! full version history of all three.
//!
//! # Quick Start
//!
//! ```
//! use vellum::{AddRequest, AddStatus, DataModel, DataStore, GetRequest, PropertyDefinition, PropertyKind, StoreConfig, Values};
//!
//! let store = DataStore::new(StoreConfig::default());
//! store.register(DataModel::new(
//!     "User",
//!     vec![PropertyDefinition::new(1, "name", PropertyKind::string()).unique()],
//! ))?;
//!
//! let statuses = store.add(&AddRequest::new("User").object(Values::new().with(1, "ada")))?;
//! if let AddStatus::Success { key, .. } = &statuses[0] {
//!     let found = store.get(&GetRequest::new("User", vec![key.clone()]))?;
//!     assert_eq!(found.values[0].values, Values::new().with(1, "ada"));
//! }
//! # Ok::<(), vellum::StoreError>(())
//! ```
//!
//! # Architecture
//!
//! - `vellum-core`: values, references, schemas, filters, codecs, versions
//! - `vellum-storage`: namespaced ordered byte store with transactions
//! - `vellum-engine`: processors, scans, versioned reads, updates

pub use vellum_core::{
    Change, Clock, DataModel, EmbeddedModel, Filter, HybridClock, IncMapChange, IsIndexable, KeyDefinition,
    ListChange, LogicalClock, MapChange, PropertyDefinition, PropertyKind, RecordKey, Reference, SelectGraph,
    SetChange, ValidationError, Value, Values, Version,
};
pub use vellum_engine::*;
