//! Storage layer for Vellum
//!
//! This crate implements the ordered byte substrate the engine runs on:
//! - UnifiedStore: namespaced BTreeMaps behind a copy-on-write RwLock
//! - StoreSnapshot: lock-free point-in-time views with prefix and range
//!   iteration in both directions
//! - Transaction: buffered read-your-writes overlay with savepoints,
//!   rollback and commit-time checks

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod error;
pub mod namespace;
pub mod snapshot;
pub mod transaction;
pub mod unified;

pub use error::{Result, StorageError};
pub use namespace::{prefix_end, ColumnFamily, Direction, Namespace};
pub use snapshot::{Entry, EntryIter, StoreSnapshot};
pub use transaction::{CommitInfo, CommitView, Savepoint, Transaction, TransactionStatus};
pub use unified::UnifiedStore;
