//! Transactions over the unified store
//!
//! A [`Transaction`] reads from the snapshot it was started with and buffers
//! its writes in an ordered overlay (read-your-writes). Nothing reaches the
//! store until commit, which applies the whole overlay atomically.
//!
//! # Savepoints
//!
//! [`Transaction::savepoint`] records the overlay; [`Transaction::rollback_to_savepoint`]
//! restores it, discarding every write made since. Later savepoints are
//! discarded by the rollback, the target savepoint stays usable.
//!
//! # Commit checks
//!
//! [`Transaction::commit_with_checks`] runs a closure under the store write
//! lock before applying. The closure sees committed state (not the snapshot)
//! and the transaction's own writes, which makes it the place for checks
//! that must hold at the moment of commit, such as uniqueness.

use std::collections::BTreeMap;
use std::ops::Bound;

use tracing::{debug, warn};

use crate::error::{Result, StorageError};
use crate::namespace::{Direction, Namespace};
use crate::snapshot::{StoreSnapshot, Tables};
use crate::unified::UnifiedStore;

/// Buffered writes; `None` marks a deletion
pub(crate) type WriteSet = BTreeMap<(Namespace, Vec<u8>), Option<Vec<u8>>>;

/// Transaction lifecycle
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransactionStatus {
    /// Transaction is executing, can read/write
    Active,
    /// Transaction committed successfully
    Committed,
    /// Transaction was aborted
    Aborted {
        /// Human-readable reason for abort
        reason: String,
    },
}

/// Handle to a recorded overlay state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Savepoint(usize);

/// Outcome of a successful commit
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommitInfo {
    /// Commit sequence number
    pub sequence: u64,
    /// Number of buffered writes applied
    pub writes: usize,
}

/// Buffered read-your-writes transaction
#[derive(Debug)]
pub struct Transaction<'a> {
    store: &'a UnifiedStore,
    snapshot: StoreSnapshot,
    writes: WriteSet,
    savepoints: Vec<WriteSet>,
    status: TransactionStatus,
}

impl<'a> Transaction<'a> {
    pub(crate) fn new(store: &'a UnifiedStore, snapshot: StoreSnapshot) -> Self {
        debug!(target: "vellum::txn", sequence = snapshot.sequence(), "Transaction started");
        Transaction {
            store,
            snapshot,
            writes: WriteSet::new(),
            savepoints: Vec::new(),
            status: TransactionStatus::Active,
        }
    }

    /// Snapshot the transaction reads from
    pub fn snapshot(&self) -> &StoreSnapshot {
        &self.snapshot
    }

    /// Current status
    pub fn status(&self) -> &TransactionStatus {
        &self.status
    }

    fn ensure_active(&self) -> Result<()> {
        match &self.status {
            TransactionStatus::Active => Ok(()),
            other => Err(StorageError::TransactionNotActive(format!("{:?}", other))),
        }
    }

    // ========================================================================
    // Reads
    // ========================================================================

    /// Point lookup through the overlay
    pub fn get(&self, ns: Namespace, key: &[u8]) -> Option<&[u8]> {
        match self.writes.get(&(ns, key.to_vec())) {
            Some(buffered) => buffered.as_deref(),
            None => self.snapshot.get(ns, key),
        }
    }

    /// Check if a key is visible through the overlay
    pub fn exists(&self, ns: Namespace, key: &[u8]) -> bool {
        self.get(ns, key).is_some()
    }

    /// Entries starting with `prefix`, overlay merged over the snapshot
    pub fn scan_prefix(&self, ns: Namespace, prefix: &[u8], direction: Direction) -> Vec<(Vec<u8>, Vec<u8>)> {
        let mut merged: BTreeMap<Vec<u8>, Vec<u8>> = self
            .snapshot
            .scan_prefix(ns, prefix, Direction::Forward)
            .map(|(k, v)| (k.to_vec(), v.to_vec()))
            .collect();

        let start = (ns, prefix.to_vec());
        for ((wns, key), value) in self.writes.range((Bound::Included(&start), Bound::Unbounded)) {
            if *wns != ns || !key.starts_with(prefix) {
                break;
            }
            match value {
                Some(value) => {
                    merged.insert(key.clone(), value.clone());
                }
                None => {
                    merged.remove(key);
                }
            }
        }

        match direction {
            Direction::Forward => merged.into_iter().collect(),
            Direction::Reverse => merged.into_iter().rev().collect(),
        }
    }

    // ========================================================================
    // Writes
    // ========================================================================

    /// Buffer a write
    pub fn put(&mut self, ns: Namespace, key: Vec<u8>, value: Vec<u8>) -> Result<()> {
        self.ensure_active()?;
        self.writes.insert((ns, key), Some(value));
        Ok(())
    }

    /// Buffer a deletion
    pub fn delete(&mut self, ns: Namespace, key: Vec<u8>) -> Result<()> {
        self.ensure_active()?;
        self.writes.insert((ns, key), None);
        Ok(())
    }

    /// Delete every visible entry starting with `prefix`
    ///
    /// Returns the number of deleted entries.
    pub fn delete_prefix(&mut self, ns: Namespace, prefix: &[u8]) -> Result<usize> {
        self.ensure_active()?;
        let keys: Vec<Vec<u8>> = self
            .scan_prefix(ns, prefix, Direction::Forward)
            .into_iter()
            .map(|(k, _)| k)
            .collect();
        let count = keys.len();
        for key in keys {
            self.writes.insert((ns, key), None);
        }
        Ok(count)
    }

    /// Number of buffered writes
    pub fn write_count(&self) -> usize {
        self.writes.len()
    }

    // ========================================================================
    // Savepoints
    // ========================================================================

    /// Record the current overlay
    pub fn savepoint(&mut self) -> Savepoint {
        self.savepoints.push(self.writes.clone());
        Savepoint(self.savepoints.len() - 1)
    }

    /// Restore the overlay recorded by `savepoint`
    pub fn rollback_to_savepoint(&mut self, savepoint: Savepoint) -> Result<()> {
        self.ensure_active()?;
        let recorded = self
            .savepoints
            .get(savepoint.0)
            .ok_or(StorageError::UnknownSavepoint(savepoint.0))?;
        let discarded = self.writes.len().saturating_sub(recorded.len());
        self.writes = recorded.clone();
        self.savepoints.truncate(savepoint.0 + 1);
        debug!(target: "vellum::txn", savepoint = savepoint.0, discarded, "Rolled back to savepoint");
        Ok(())
    }

    // ========================================================================
    // Completion
    // ========================================================================

    /// Apply every buffered write atomically
    pub fn commit(self) -> Result<CommitInfo> {
        self.commit_with_checks::<StorageError, _>(|_| Ok(()))
    }

    /// Run `checks` under the store write lock, then apply if they pass
    ///
    /// On a failed check nothing is applied and the check's error is returned.
    pub fn commit_with_checks<E, F>(mut self, checks: F) -> std::result::Result<CommitInfo, E>
    where
        E: From<StorageError>,
        F: FnOnce(&CommitView<'_>) -> std::result::Result<(), E>,
    {
        self.ensure_active()?;
        let writes = self.writes.len();
        match self.store.apply(&self.writes, checks) {
            Ok(sequence) => {
                self.status = TransactionStatus::Committed;
                debug!(target: "vellum::txn", sequence, writes, "Transaction committed");
                Ok(CommitInfo { sequence, writes })
            }
            Err(e) => {
                self.status = TransactionStatus::Aborted {
                    reason: "commit check failed".to_string(),
                };
                warn!(target: "vellum::txn", writes, "Commit rejected by check");
                Err(e)
            }
        }
    }

    /// Discard every buffered write
    pub fn abort(mut self, reason: impl Into<String>) {
        let reason = reason.into();
        debug!(target: "vellum::txn", writes = self.writes.len(), reason = %reason, "Transaction aborted");
        self.writes.clear();
        self.status = TransactionStatus::Aborted { reason };
    }
}

/// Committed state plus the committing transaction's writes
///
/// Handed to commit checks while the store write lock is held.
#[derive(Debug)]
pub struct CommitView<'a> {
    live: &'a Tables,
    writes: &'a WriteSet,
}

impl<'a> CommitView<'a> {
    pub(crate) fn new(live: &'a Tables, writes: &'a WriteSet) -> Self {
        CommitView { live, writes }
    }

    /// Committed value, ignoring the transaction's own writes
    pub fn committed(&self, ns: Namespace, key: &[u8]) -> Option<&[u8]> {
        self.live.get(&ns)?.get(key).map(Vec::as_slice)
    }

    /// Value as it will be after this commit
    pub fn get(&self, ns: Namespace, key: &[u8]) -> Option<&[u8]> {
        match self.writes.get(&(ns, key.to_vec())) {
            Some(buffered) => buffered.as_deref(),
            None => self.committed(ns, key),
        }
    }
}
