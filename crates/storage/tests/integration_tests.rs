//! Integration tests for the storage layer
//!
//! These tests verify that UnifiedStore works correctly as a complete system:
//! - Snapshot isolation against later commits
//! - Concurrent transactions on disjoint keys
//! - Prefix scans agree with a plain ordered map in both directions

use std::collections::BTreeMap;
use std::sync::Arc;
use std::thread;

use proptest::prelude::*;
use vellum_storage::{ColumnFamily, Direction, Namespace, StorageError, UnifiedStore};

const TABLE: Namespace = Namespace::new(1, ColumnFamily::Table);
const INDEX: Namespace = Namespace::new(1, ColumnFamily::Index);

fn put(store: &UnifiedStore, ns: Namespace, key: &[u8], value: &[u8]) {
    let mut txn = store.begin();
    txn.put(ns, key.to_vec(), value.to_vec()).unwrap();
    txn.commit().unwrap();
}

// ============================================================================
// Isolation
// ============================================================================

#[test]
fn test_snapshot_ignores_later_commits() {
    let store = UnifiedStore::new();
    put(&store, TABLE, b"a", b"1");
    let snapshot = store.snapshot();
    put(&store, TABLE, b"a", b"2");
    put(&store, TABLE, b"b", b"3");

    assert_eq!(snapshot.get(TABLE, b"a"), Some(&b"1"[..]));
    assert_eq!(snapshot.get(TABLE, b"b"), None);
    assert_eq!(store.snapshot().get(TABLE, b"a"), Some(&b"2"[..]));
}

#[test]
fn test_namespaces_do_not_share_keys() {
    let store = UnifiedStore::new();
    put(&store, TABLE, b"k", b"table");
    put(&store, INDEX, b"k", b"index");
    let snapshot = store.snapshot();
    assert_eq!(snapshot.get(TABLE, b"k"), Some(&b"table"[..]));
    assert_eq!(snapshot.get(INDEX, b"k"), Some(&b"index"[..]));
    assert_eq!(store.len(TABLE), 1);
}

#[test]
fn test_commit_check_sees_concurrent_commit() {
    let store = UnifiedStore::new();
    let mut first = store.begin();
    first.put(TABLE, b"unique".to_vec(), b"first".to_vec()).unwrap();
    let mut second = store.begin();
    second.put(TABLE, b"unique".to_vec(), b"second".to_vec()).unwrap();
    first.commit().unwrap();

    let rejected = second.commit_with_checks::<StorageError, _>(|view| {
        if view.committed(TABLE, b"unique").is_some() {
            return Err(StorageError::TransactionNotActive("taken".into()));
        }
        Ok(())
    });
    assert!(rejected.is_err());
    assert_eq!(store.snapshot().get(TABLE, b"unique"), Some(&b"first"[..]));
}

// ============================================================================
// Concurrency
// ============================================================================

#[test]
fn test_concurrent_commits_on_disjoint_keys() {
    let store = Arc::new(UnifiedStore::new());
    let handles: Vec<_> = (0..8u8)
        .map(|t| {
            let store = Arc::clone(&store);
            thread::spawn(move || {
                for n in 0..50u8 {
                    let mut txn = store.begin();
                    txn.put(TABLE, vec![t, n], vec![n]).unwrap();
                    txn.put(INDEX, vec![n, t], Vec::new()).unwrap();
                    txn.commit().unwrap();
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }
    assert_eq!(store.len(TABLE), 400);
    assert_eq!(store.len(INDEX), 400);
    assert_eq!(store.sequence(), 400);
}

// ============================================================================
// Reference model
// ============================================================================

proptest! {
    #[test]
    fn prop_prefix_scan_matches_btreemap(
        entries in prop::collection::btree_map(prop::collection::vec(0u8..4, 0..4), any::<u8>(), 0..40),
        removed in prop::collection::vec(prop::collection::vec(0u8..4, 0..4), 0..10),
        prefix in prop::collection::vec(0u8..4, 0..2),
    ) {
        let store = UnifiedStore::new();
        let mut model: BTreeMap<Vec<u8>, Vec<u8>> = BTreeMap::new();
        let mut txn = store.begin();
        for (key, value) in &entries {
            txn.put(TABLE, key.clone(), vec![*value]).unwrap();
            model.insert(key.clone(), vec![*value]);
        }
        for key in &removed {
            txn.delete(TABLE, key.clone()).unwrap();
            model.remove(key);
        }
        txn.commit().unwrap();

        let expected: Vec<(Vec<u8>, Vec<u8>)> = model
            .iter()
            .filter(|(k, _)| k.starts_with(&prefix))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        let snapshot = store.snapshot();
        let forward: Vec<(Vec<u8>, Vec<u8>)> = snapshot
            .scan_prefix(TABLE, &prefix, Direction::Forward)
            .map(|(k, v)| (k.to_vec(), v.to_vec()))
            .collect();
        prop_assert_eq!(&forward, &expected);

        let mut reverse: Vec<(Vec<u8>, Vec<u8>)> = snapshot
            .scan_prefix(TABLE, &prefix, Direction::Reverse)
            .map(|(k, v)| (k.to_vec(), v.to_vec()))
            .collect();
        reverse.reverse();
        prop_assert_eq!(&reverse, &expected);
    }
}
