//! Mutation events
//!
//! Every committed add, change and delete is published on a broadcast
//! channel after its commit, before the record's stripe lock is released.
//! Events of one key therefore arrive in commit order. A
//! slow receiver lags and skips events; it never blocks writers. Dropping a
//! receiver only stops its own delivery.

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::TryRecvError;
use tracing::warn;

use vellum_core::{RecordKey, Version};

/// What happened to a record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum UpdateEventKind {
    /// Record was created
    Addition,
    /// Record values changed
    Change,
    /// Record was deleted
    Deletion {
        /// Erased rather than flagged
        hard: bool,
    },
}

/// One committed mutation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateEvent {
    /// Model name
    pub model: String,
    /// Record key
    pub key: RecordKey,
    /// Commit version
    pub version: Version,
    /// Mutation kind
    pub kind: UpdateEventKind,
}

/// Broadcast hub for mutation events
#[derive(Debug)]
pub struct UpdateHub {
    tx: broadcast::Sender<UpdateEvent>,
}

impl UpdateHub {
    /// Hub buffering `capacity` events per receiver
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        UpdateHub { tx }
    }

    /// Publish an event, returning how many receivers will see it
    pub fn publish(&self, event: UpdateEvent) -> usize {
        self.tx.send(event).unwrap_or(0)
    }

    /// Receive every event published from now on
    pub fn subscribe(&self) -> broadcast::Receiver<UpdateEvent> {
        self.tx.subscribe()
    }

    /// Number of live receivers
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

/// Take every pending event without waiting
///
/// Events lost to lag are logged and skipped.
pub fn drain_pending(receiver: &mut broadcast::Receiver<UpdateEvent>) -> Vec<UpdateEvent> {
    let mut pending = Vec::new();
    loop {
        match receiver.try_recv() {
            Ok(event) => pending.push(event),
            Err(TryRecvError::Lagged(skipped)) => {
                warn!(target: "vellum::listener", skipped, "Receiver lagged behind");
            }
            Err(TryRecvError::Empty) | Err(TryRecvError::Closed) => break,
        }
    }
    pending
}
