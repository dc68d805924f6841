//! DataStore and request dispatch
//!
//! The [`DataStore`] ties the substrate, the version clock and the model
//! registry together and answers requests:
//!
//! - Mutations run one substrate transaction per record. Structural request
//!   errors are returned as `Err` before anything is written; per-record
//!   outcomes come back as status values in request order.
//! - Reads evaluate against one point-in-time snapshot and never block
//!   writers.
//! - Committed mutations are published to subscribers after commit, while
//!   the record's stripe is held, so events of one key keep commit order.
//! - Live queries anchor on the stable version: nothing at or below it is
//!   still being written.

pub mod config;
mod registry;

pub use config::{StoreConfig, CONFIG_FILE_NAME};
pub use registry::{IndexDef, ModelRegistry, RegisteredModel, UniqueDef};

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

use tokio::sync::broadcast;
use tracing::{error, info};

use vellum_core::{Clock, DataModel, HybridClock, RecordKey, SelectGraph, Version};
use vellum_storage::{StoreSnapshot, UnifiedStore};

use crate::aggregation::{Aggregation, Aggregator};
use crate::error::{Result, StoreError};
use crate::listener::{UpdateEvent, UpdateHub};
use crate::locks::KeyLocks;
use crate::processors::add::{process_add, validate_add_request};
use crate::processors::change::{process_change, validate_change_request};
use crate::processors::delete::process_delete;
use crate::processors::ProcessContext;
use crate::reader::{read_changes, read_record, ChangeWindow};
use crate::requests::{
    AddRequest, ChangeRequest, DeleteRequest, GetChangesRequest, GetRequest, GetUpdatesRequest, ScanChangesRequest,
    ScanRequest, ScanUpdatesRequest,
};
use crate::responses::{
    AddStatus, ChangeStatus, ChangesResponse, DataObjectVersionedChange, DeleteStatus, UpdatesResponse,
    ValuesResponse,
};
use crate::scan::{execute, matches_record, plan_scan, ScanMatch, ScanOptions};
use crate::updates::{reconcile, UpdateListener, UpdateQuery};
use crate::values_getter::ReadGetter;
use crate::versions::VersionTracker;

/// Embedded versioned record store
pub struct DataStore {
    config: StoreConfig,
    storage: UnifiedStore,
    clock: Arc<dyn Clock>,
    versions: VersionTracker,
    registry: ModelRegistry,
    locks: KeyLocks,
    hub: UpdateHub,
}

impl std::fmt::Debug for DataStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DataStore")
            .field("config", &self.config)
            .field("models", &self.registry.len())
            .field("sequence", &self.storage.sequence())
            .finish()
    }
}

/// Evaluated candidates of one read
struct Evaluation {
    snapshot: StoreSnapshot,
    matches: Vec<ScanMatch>,
    bounded: bool,
}

impl DataStore {
    /// Open an in-memory store with a hybrid clock
    pub fn new(config: StoreConfig) -> Self {
        Self::with_clock(config, Arc::new(HybridClock::new()))
    }

    /// Open an in-memory store on the given clock
    pub fn with_clock(config: StoreConfig, clock: Arc<dyn Clock>) -> Self {
        info!(
            target: "vellum::store",
            keep_all_versions = config.keep_all_versions,
            filter_soft_deleted = config.filter_soft_deleted,
            max_scan_limit = config.max_scan_limit,
            "Opened store"
        );
        DataStore {
            hub: UpdateHub::new(config.update_channel_capacity),
            config,
            storage: UnifiedStore::new(),
            clock,
            versions: VersionTracker::new(),
            registry: ModelRegistry::new(),
            locks: KeyLocks::default(),
        }
    }

    /// Open a store configured by a `vellum.toml` file
    pub fn from_config_file(path: &Path) -> Result<Self> {
        Ok(Self::new(StoreConfig::from_file(path)?))
    }

    /// Active configuration
    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    /// Underlying substrate
    pub fn storage(&self) -> &UnifiedStore {
        &self.storage
    }

    /// Most recently allocated version
    pub fn last_version(&self) -> Version {
        self.clock.last_version()
    }

    /// Newest version with no mutation at or below it still in flight
    pub fn stable_version(&self) -> Version {
        self.versions.stable_version(self.clock.as_ref())
    }

    /// Register a model, making it available to requests
    pub fn register(&self, model: DataModel) -> Result<Arc<RegisteredModel>> {
        self.registry.register(model)
    }

    /// Registered model by name
    pub fn model(&self, name: &str) -> Result<Arc<RegisteredModel>> {
        self.registry.get(name)
    }

    fn ctx(&self) -> ProcessContext<'_> {
        ProcessContext {
            storage: &self.storage,
            clock: self.clock.as_ref(),
            versions: &self.versions,
            locks: &self.locks,
            hub: &self.hub,
            keep_history: self.config.keep_all_versions,
        }
    }

    // ========================================================================
    // Mutations
    // ========================================================================

    /// Add records
    ///
    /// # Errors
    ///
    /// Returns an error for unknown models or keys of the wrong size.
    pub fn add(&self, request: &AddRequest) -> Result<Vec<AddStatus>> {
        let model = self.registry.get(&request.model)?;
        validate_add_request(&model, request)?;
        let ctx = self.ctx();
        let mut statuses = Vec::with_capacity(request.objects.len());
        for object in &request.objects {
            let status = match process_add(&ctx, &model, object.key.clone(), &object.values) {
                Ok(status) => status,
                Err(e) => server_fail(&model, "add", e, AddStatus::ServerFail),
            };
            statuses.push(status);
        }
        Ok(statuses)
    }

    /// Apply changes to records
    ///
    /// # Errors
    ///
    /// Returns an error for unknown models and structurally disallowed
    /// changes, such as changing a list item without a `ListChange`.
    pub fn change(&self, request: &ChangeRequest) -> Result<Vec<ChangeStatus>> {
        let model = self.registry.get(&request.model)?;
        validate_change_request(&model, request)?;
        let ctx = self.ctx();
        let mut statuses = Vec::with_capacity(request.objects.len());
        for object in &request.objects {
            let status = match process_change(&ctx, &model, object) {
                Ok(status) => status,
                Err(e) => server_fail(&model, "change", e, ChangeStatus::ServerFail),
            };
            statuses.push(status);
        }
        Ok(statuses)
    }

    /// Soft or hard delete records
    pub fn delete(&self, request: &DeleteRequest) -> Result<Vec<DeleteStatus>> {
        let model = self.registry.get(&request.model)?;
        let ctx = self.ctx();
        let mut statuses = Vec::with_capacity(request.keys.len());
        for key in &request.keys {
            let status = match process_delete(&ctx, &model, key, request.hard_delete) {
                Ok(status) => status,
                Err(e) => server_fail(&model, "delete", e, DeleteStatus::ServerFail),
            };
            statuses.push(status);
        }
        Ok(statuses)
    }

    // ========================================================================
    // Reads
    // ========================================================================

    fn check_version_read(&self, to_version: Option<Version>) -> Result<()> {
        if to_version.is_some() && !self.config.keep_all_versions {
            return Err(StoreError::request(
                "reading at a version needs keep_all_versions enabled",
            ));
        }
        Ok(())
    }

    fn evaluate_get(&self, model: &RegisteredModel, request: &GetRequest) -> Result<Evaluation> {
        self.check_version_read(request.to_version)?;
        let snapshot = self.storage.snapshot();
        let options = ScanOptions {
            filter: request.filter.as_ref(),
            as_of: request.to_version,
            filter_soft_deleted: request
                .filter_soft_deleted
                .unwrap_or(self.config.filter_soft_deleted),
            start: None,
            limit: usize::MAX,
        };
        let mut matches = Vec::new();
        for key in &request.keys {
            if matches_record(&snapshot, model, key.as_bytes(), &options)? {
                matches.push(ScanMatch {
                    key: key.as_bytes().to_vec(),
                    sort_key: None,
                });
            }
        }
        Ok(Evaluation {
            snapshot,
            matches,
            bounded: request.filter.is_some(),
        })
    }

    fn evaluate_scan(&self, model: &RegisteredModel, request: &ScanRequest) -> Result<Evaluation> {
        self.check_version_read(request.to_version)?;
        let plan = plan_scan(model, request.filter.as_ref(), request.order.as_ref(), request.descending)?;
        let limit = request.limit.min(self.config.max_scan_limit) as usize;
        let snapshot = self.storage.snapshot();
        let options = ScanOptions {
            filter: request.filter.as_ref(),
            as_of: request.to_version,
            filter_soft_deleted: request
                .filter_soft_deleted
                .unwrap_or(self.config.filter_soft_deleted),
            start: request.start_key.as_ref().map(|key| (key, request.include_start)),
            limit,
        };
        let matches = execute(&snapshot, model, &plan, &options)?;
        let bounded = request.filter.is_some() || matches.len() >= limit;
        Ok(Evaluation {
            snapshot,
            matches,
            bounded,
        })
    }

    fn values_response(
        &self,
        model: &RegisteredModel,
        evaluation: &Evaluation,
        select: Option<&SelectGraph>,
        as_of: Option<Version>,
        aggregations: &BTreeMap<String, Aggregation>,
    ) -> Result<ValuesResponse> {
        let mut aggregator = Aggregator::new(aggregations);
        let mut values = Vec::with_capacity(evaluation.matches.len());
        for found in &evaluation.matches {
            if let Some(record) = read_record(&evaluation.snapshot, model, &found.key, as_of, select)? {
                values.push(record);
            }
            if !aggregator.is_empty() {
                aggregator.feed(&mut ReadGetter::new(model, &evaluation.snapshot, &found.key, as_of))?;
            }
        }
        Ok(ValuesResponse {
            model: model.name().to_string(),
            values,
            aggregations: aggregator.finish(),
        })
    }

    /// Fetch records by key
    pub fn get(&self, request: &GetRequest) -> Result<ValuesResponse> {
        let model = self.registry.get(&request.model)?;
        let evaluation = self.evaluate_get(&model, request)?;
        self.values_response(
            &model,
            &evaluation,
            request.select.as_ref(),
            request.to_version,
            &request.aggregations,
        )
    }

    /// Scan records in key or index order
    ///
    /// # Errors
    ///
    /// Returns a request error when the order has no matching index.
    pub fn scan(&self, request: &ScanRequest) -> Result<ValuesResponse> {
        let model = self.registry.get(&request.model)?;
        let evaluation = self.evaluate_scan(&model, request)?;
        self.values_response(
            &model,
            &evaluation,
            request.select.as_ref(),
            request.to_version,
            &request.aggregations,
        )
    }

    fn changes_response(
        &self,
        model: &RegisteredModel,
        evaluation: &Evaluation,
        window: ChangeWindow,
        select: Option<&SelectGraph>,
    ) -> Result<ChangesResponse> {
        let mut changes = Vec::new();
        for found in &evaluation.matches {
            let versioned = read_changes(
                &evaluation.snapshot,
                model,
                &found.key,
                window,
                select,
                self.config.keep_all_versions,
            )?;
            if !versioned.is_empty() {
                changes.push(DataObjectVersionedChange {
                    key: RecordKey::from(found.key.as_slice()),
                    sort_key: found.sort_key.clone(),
                    changes: versioned,
                });
            }
        }
        Ok(ChangesResponse {
            model: model.name().to_string(),
            changes,
        })
    }

    /// Changes of records by key since a version
    pub fn get_changes(&self, request: &GetChangesRequest) -> Result<ChangesResponse> {
        let model = self.registry.get(&request.get.model)?;
        let evaluation = self.evaluate_get(&model, &request.get)?;
        let window = ChangeWindow {
            from_version: request.from_version,
            to_version: request.get.to_version,
            max_versions: request.max_versions,
        };
        self.changes_response(&model, &evaluation, window, request.get.select.as_ref())
    }

    /// Changes of scanned records since a version
    pub fn scan_changes(&self, request: &ScanChangesRequest) -> Result<ChangesResponse> {
        let model = self.registry.get(&request.scan.model)?;
        let evaluation = self.evaluate_scan(&model, &request.scan)?;
        let window = ChangeWindow {
            from_version: request.from_version,
            to_version: request.scan.to_version,
            max_versions: request.max_versions,
        };
        self.changes_response(&model, &evaluation, window, request.scan.select.as_ref())
    }

    /// Updates of records by key since a version
    pub fn get_updates(&self, request: &GetUpdatesRequest) -> Result<UpdatesResponse> {
        let model = self.registry.get(&request.get.model)?;
        // Taken before the snapshot, so the snapshot holds every version up to it
        let now = self.stable_version();
        let evaluation = self.evaluate_get(&model, &request.get)?;
        let query = UpdateQuery {
            from_version: request.from_version,
            to_version: request.get.to_version,
            max_versions: request.max_versions,
            select: request.get.select.as_ref(),
            previous: request.ordered_keys.as_deref(),
            bounded: evaluation.bounded,
            keep_history: self.config.keep_all_versions,
            now,
        };
        Ok(UpdatesResponse {
            model: model.name().to_string(),
            updates: reconcile(&evaluation.snapshot, &model, &evaluation.matches, &query)?,
        })
    }

    /// Updates of scanned records since a version
    pub fn scan_updates(&self, request: &ScanUpdatesRequest) -> Result<UpdatesResponse> {
        let model = self.registry.get(&request.scan.model)?;
        // Taken before the snapshot, so the snapshot holds every version up to it
        let now = self.stable_version();
        let evaluation = self.evaluate_scan(&model, &request.scan)?;
        let query = UpdateQuery {
            from_version: request.from_version,
            to_version: request.scan.to_version,
            max_versions: request.max_versions,
            select: request.scan.select.as_ref(),
            previous: request.ordered_keys.as_deref(),
            bounded: evaluation.bounded,
            keep_history: self.config.keep_all_versions,
            now,
        };
        Ok(UpdatesResponse {
            model: model.name().to_string(),
            updates: reconcile(&evaluation.snapshot, &model, &evaluation.matches, &query)?,
        })
    }

    // ========================================================================
    // Subscriptions
    // ========================================================================

    /// Receive every mutation committed from now on
    pub fn subscribe(&self) -> broadcast::Receiver<UpdateEvent> {
        self.hub.subscribe()
    }

    /// Live scan that reports updates on each poll
    pub fn listen(&self, request: ScanUpdatesRequest) -> UpdateListener<'_> {
        UpdateListener::new(self, request)
    }
}

fn server_fail<S>(model: &RegisteredModel, operation: &str, e: StoreError, wrap: fn(String) -> S) -> S {
    error!(
        target: "vellum::store",
        model = %model.name(),
        operation,
        error = %e,
        "Mutation failed"
    );
    wrap(e.to_string())
}
