//! Record engine for Vellum
//!
//! This crate implements everything above the byte substrate:
//! - DataStore: request dispatch, configuration and model registry
//! - Processors: add, change and delete with index and unique maintenance
//! - Scans: access-path planning and candidate evaluation
//! - Versioned reads: records and per-version change sets
//! - Updates: live-query reconciliation and mutation events
//! - Versions: in-flight tracking behind stable live-query anchors
//!
//! Every mutation of a record runs in one substrate transaction, so data,
//! indexes, unique bindings and their historic mirrors change together.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod aggregation;
pub mod database;
pub mod error;
pub mod index;
pub mod listener;
pub mod locks;
pub(crate) mod processors;
pub(crate) mod reader;
pub mod requests;
pub mod responses;
pub(crate) mod scan;
pub mod updates;
pub mod values_getter;
pub(crate) mod versions;

pub use aggregation::Aggregation;
pub use database::{DataStore, ModelRegistry, RegisteredModel, StoreConfig, CONFIG_FILE_NAME};
pub use error::{Result, StoreError};
pub use listener::{drain_pending, UpdateEvent, UpdateEventKind, UpdateHub};
pub use requests::{
    AddObject, AddRequest, ChangeObject, ChangeRequest, DeleteRequest, GetChangesRequest, GetRequest,
    GetUpdatesRequest, ScanChangesRequest, ScanRequest, ScanUpdatesRequest, DEFAULT_SCAN_LIMIT,
};
pub use responses::{
    AddStatus, ChangeStatus, ChangesResponse, DataObjectVersionedChange, DeleteStatus, UpdatesResponse,
    ValuesResponse, ValuesWithMetaData, VersionedChanges,
};
pub use updates::{RemovalReason, Update, UpdateListener};
pub use values_getter::{RecordGetter, ValuesGetter};
