//! Configuration loading, mutation events and concurrent writers

use std::sync::{mpsc, Arc};
use std::thread;

use parking_lot::Mutex;
use tempfile::TempDir;
use vellum_core::{
    Change, Clock, DataModel, LogicalClock, PropertyDefinition, PropertyKind, RecordKey, Reference, Value, Values,
    Version,
};
use vellum_engine::{
    drain_pending, AddRequest, AddStatus, ChangeRequest, DataStore, DeleteRequest, ScanRequest, ScanUpdatesRequest,
    StoreConfig, Update, UpdateEventKind, CONFIG_FILE_NAME,
};

fn counter_model() -> DataModel {
    DataModel::new(
        "Counter",
        vec![
            PropertyDefinition::new(1, "label", PropertyKind::string()),
            PropertyDefinition::new(2, "hits", PropertyKind::uint()),
        ],
    )
}

fn add_counter(store: &DataStore, label: &str) -> RecordKey {
    match store
        .add(&AddRequest::new("Counter").object(Values::new().with(1, label)))
        .unwrap()
        .remove(0)
    {
        AddStatus::Success { key, .. } => key,
        other => panic!("unexpected {:?}", other),
    }
}

fn relabel(key: &RecordKey, label: &str) -> ChangeRequest {
    ChangeRequest::new("Counter").object(
        key.clone(),
        vec![Change::Change(vec![(Reference::property(1), Value::from(label))])],
    )
}

/// Logical clock that can park the next allocation until released
#[derive(Default)]
struct GateClock {
    inner: LogicalClock,
    gate: Mutex<Option<(mpsc::Sender<Version>, mpsc::Receiver<()>)>>,
}

impl GateClock {
    /// Park the next allocation; returns the allocated version's receiver
    /// and the release handle
    fn hold_next(&self) -> (mpsc::Receiver<Version>, mpsc::Sender<()>) {
        let (allocated_tx, allocated_rx) = mpsc::channel();
        let (release_tx, release_rx) = mpsc::channel();
        *self.gate.lock() = Some((allocated_tx, release_rx));
        (allocated_rx, release_tx)
    }
}

impl Clock for GateClock {
    fn next_version(&self) -> Version {
        let version = self.inner.next_version();
        let gate = self.gate.lock().take();
        if let Some((allocated, release)) = gate {
            allocated.send(version).unwrap();
            release.recv().unwrap();
        }
        version
    }

    fn last_version(&self) -> Version {
        self.inner.last_version()
    }

    fn observe(&self, seen: Version) {
        self.inner.observe(seen)
    }
}

// ============================================================================
// Configuration
// ============================================================================

#[test]
fn test_store_from_config_file() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join(CONFIG_FILE_NAME);
    std::fs::write(&path, "keep_all_versions = false\nmax_scan_limit = 2\n").unwrap();

    let store = DataStore::from_config_file(&path).unwrap();
    assert!(!store.config().keep_all_versions);
    assert_eq!(store.config().max_scan_limit, 2);
    assert!(store.config().filter_soft_deleted);

    store.register(counter_model()).unwrap();
    for n in 0..3u64 {
        store
            .add(&AddRequest::new("Counter").object(Values::new().with(1, "c").with(2, n)))
            .unwrap();
    }
    let scanned = store.scan(&ScanRequest::new("Counter").limit(50)).unwrap();
    assert_eq!(scanned.values.len(), 2);
}

#[test]
fn test_written_config_round_trips() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join(CONFIG_FILE_NAME);
    let config = StoreConfig {
        update_channel_capacity: 8,
        ..StoreConfig::default()
    };
    config.write_to_file(&path).unwrap();
    assert_eq!(StoreConfig::from_file(&path).unwrap(), config);
}

#[test]
fn test_missing_config_file_is_an_error() {
    let dir = TempDir::new().unwrap();
    assert!(DataStore::from_config_file(&dir.path().join("absent.toml")).is_err());
}

// ============================================================================
// Events
// ============================================================================

#[tokio::test]
async fn test_subscriber_receives_committed_mutations() {
    let store = DataStore::new(StoreConfig::default());
    store.register(counter_model()).unwrap();
    let mut rx = store.subscribe();

    let statuses = store
        .add(&AddRequest::new("Counter").object(Values::new().with(1, "a")))
        .unwrap();
    let (key, version) = match &statuses[0] {
        AddStatus::Success { key, version, .. } => (key.clone(), *version),
        other => panic!("unexpected {:?}", other),
    };
    store.delete(&DeleteRequest::soft("Counter", vec![key.clone()])).unwrap();

    let added = rx.recv().await.unwrap();
    assert_eq!(added.key, key);
    assert_eq!(added.version, version);
    assert_eq!(added.kind, UpdateEventKind::Addition);
    let deleted = rx.recv().await.unwrap();
    assert_eq!(deleted.kind, UpdateEventKind::Deletion { hard: false });
    assert!(deleted.version > version);
}

#[test]
fn test_failed_add_publishes_nothing() {
    let store = DataStore::new(StoreConfig::default());
    store.register(counter_model()).unwrap();
    let mut rx = store.subscribe();
    let statuses = store
        .add(&AddRequest::new("Counter").object(Values::new().with(2, "not a number")))
        .unwrap();
    assert!(matches!(statuses[0], AddStatus::ValidationFail(_)));
    assert!(drain_pending(&mut rx).is_empty());
}

#[test]
fn test_events_of_one_key_follow_commit_order() {
    let store = Arc::new(DataStore::new(StoreConfig::default()));
    store.register(counter_model()).unwrap();
    let key = add_counter(&store, "start");
    let mut rx = store.subscribe();

    let handles: Vec<_> = (0..4)
        .map(|t| {
            let store = Arc::clone(&store);
            let key = key.clone();
            thread::spawn(move || {
                for n in 0..50 {
                    let statuses = store.change(&relabel(&key, &format!("t{}-{}", t, n))).unwrap();
                    assert!(statuses[0].is_success());
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    let events = drain_pending(&mut rx);
    assert_eq!(events.len(), 200);
    assert!(events.iter().all(|e| e.key == key && e.kind == UpdateEventKind::Change));
    assert!(events.windows(2).all(|w| w[0].version < w[1].version));
}

// ============================================================================
// Live updates
// ============================================================================

#[test]
fn test_filtered_listener_reports_records_leaving_range() {
    let store = DataStore::new(StoreConfig::default());
    store.register(counter_model()).unwrap();
    let statuses = store
        .add(
            &AddRequest::new("Counter")
                .object(Values::new().with(1, "a").with(2, 1u64))
                .object(Values::new().with(1, "b").with(2, 2u64)),
        )
        .unwrap();
    let first = match &statuses[0] {
        AddStatus::Success { key, .. } => key.clone(),
        other => panic!("unexpected {:?}", other),
    };

    let filter = vellum_core::Filter::LessThan(Reference::property(2), Value::UInt(10));
    let mut listener = store.listen(ScanUpdatesRequest::new(
        ScanRequest::new("Counter").filter(filter),
        Version::ZERO,
    ));
    listener.poll().unwrap();

    store
        .change(&ChangeRequest::new("Counter").object(
            first.clone(),
            vec![Change::Change(vec![(Reference::property(2), Value::UInt(99))])],
        ))
        .unwrap();
    let next = listener.poll().unwrap();
    assert!(next.updates.iter().any(|u| matches!(
        u,
        Update::Removal { key, reason: vellum_engine::RemovalReason::NotInRange, .. } if *key == first
    )));
    assert_eq!(listener.ordered_keys().map(<[_]>::len), Some(1));
}

#[test]
fn test_listener_sees_change_committed_after_its_poll() {
    let clock = Arc::new(GateClock::default());
    let store = Arc::new(DataStore::with_clock(StoreConfig::default(), clock.clone()));
    store.register(counter_model()).unwrap();
    let key = add_counter(&store, "a");

    let mut listener = store.listen(ScanUpdatesRequest::new(ScanRequest::new("Counter"), Version::ZERO));
    listener.poll().unwrap();

    // The writer holds its version but has not committed yet
    let (allocated, release) = clock.hold_next();
    let writer = {
        let store = Arc::clone(&store);
        let request = relabel(&key, "b");
        thread::spawn(move || store.change(&request).unwrap())
    };
    let pending = allocated.recv().unwrap();

    let during = listener.poll().unwrap();
    assert!(!during.updates.iter().any(|u| matches!(u, Update::Change { .. })));
    assert!(listener.from_version() <= pending);

    release.send(()).unwrap();
    assert!(writer.join().unwrap()[0].is_success());

    let after = listener.poll().unwrap();
    assert!(after
        .updates
        .iter()
        .any(|u| matches!(u, Update::Change { key: changed, .. } if *changed == key)));
    assert_eq!(store.stable_version(), pending);
}

// ============================================================================
// Concurrency
// ============================================================================

#[test]
fn test_concurrent_adds_on_distinct_keys() {
    let store = Arc::new(DataStore::new(StoreConfig::default()));
    store.register(counter_model()).unwrap();

    let handles: Vec<_> = (0..4)
        .map(|t| {
            let store = Arc::clone(&store);
            thread::spawn(move || {
                for n in 0..25u64 {
                    let values = Values::new().with(1, format!("t{}", t)).with(2, n);
                    let statuses = store.add(&AddRequest::new("Counter").object(values)).unwrap();
                    assert!(statuses[0].is_success());
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    let scanned = store.scan(&ScanRequest::new("Counter").limit(1000)).unwrap();
    assert_eq!(scanned.values.len(), 100);
}
