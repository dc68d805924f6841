//! Core types for Vellum
//!
//! This crate defines the foundational types used throughout the system:
//! - Value / Values: closed enum over property value shapes, and records
//! - Reference: byte path addressing a location inside a record
//! - codec / stored / layout: order-preserving byte codec and storage key layout
//! - Version / Clock: hybrid logical clock stamps
//! - schema: DataModel, PropertyDefinition, PropertyKind and value validation
//! - IsIndexable: index value descriptors
//! - Change / Filter / SelectGraph: mutation intents, predicates and field selection
//! - ValidationError: aggregated validation failures
//! - Error: Error type for codec and schema failures

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod change;
pub mod clock;
pub mod codec;
pub mod error;
pub mod filter;
pub mod indexable;
pub mod key;
pub mod layout;
pub mod reference;
pub mod schema;
pub mod select;
pub mod stored;
pub mod validation;
pub mod value;
pub mod version;

pub use change::{Change, IncMapAddition, IncMapChange, IndexChange, ListChange, MapChange, SetChange};
pub use clock::{Clock, HybridClock, LogicalClock};
pub use error::{CoreError, Result};
pub use filter::Filter;
pub use indexable::IsIndexable;
pub use key::RecordKey;
pub use reference::{Reference, Segment};
pub use schema::{DataModel, EmbeddedModel, KeyDefinition, PropertyDefinition, PropertyKind, TypeVariant};
pub use select::SelectGraph;
pub use stored::StoredValue;
pub use validation::ValidationError;
pub use value::{TypedValue, Value, Values};
pub use version::Version;
