//! StoreSnapshot: point-in-time view of every namespace
//!
//! A snapshot holds an `Arc` of the namespace map as it was when the
//! snapshot was taken. Writers replace namespaces copy-on-write, so a
//! snapshot never observes later commits and never blocks writers.
//!
//! # Design Notes
//!
//! - **Cheap to take**: one `Arc` clone under a read lock
//! - **Immutable**: once created, the snapshot never changes
//! - **Copy-on-write cost**: the first commit touching a namespace that a
//!   live snapshot shares clones that namespace's map

use std::collections::BTreeMap;
use std::ops::Bound;
use std::sync::Arc;

use rustc_hash::FxHashMap;

use crate::namespace::{prefix_end, Direction, Namespace};

pub(crate) type Table = BTreeMap<Vec<u8>, Vec<u8>>;
pub(crate) type Tables = FxHashMap<Namespace, Arc<Table>>;

/// Borrowed key/value pair
pub type Entry<'a> = (&'a [u8], &'a [u8]);

/// Iterator over borrowed entries
pub type EntryIter<'a> = Box<dyn Iterator<Item = Entry<'a>> + 'a>;

/// Immutable point-in-time view of the store
#[derive(Debug, Clone)]
pub struct StoreSnapshot {
    /// Commit sequence number the snapshot reflects
    sequence: u64,
    data: Arc<Tables>,
}

impl StoreSnapshot {
    pub(crate) fn new(sequence: u64, data: Arc<Tables>) -> Self {
        StoreSnapshot { sequence, data }
    }

    /// Number of commits visible in this snapshot
    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    /// Point lookup
    pub fn get(&self, ns: Namespace, key: &[u8]) -> Option<&[u8]> {
        self.data.get(&ns)?.get(key).map(Vec::as_slice)
    }

    /// Cheap membership probe
    ///
    /// May return false positives, never false negatives. The in-memory
    /// substrate answers it exactly; callers still confirm with [`get`](Self::get).
    pub fn may_exist(&self, ns: Namespace, key: &[u8]) -> bool {
        self.data.get(&ns).map_or(false, |t| t.contains_key(key))
    }

    /// Entries whose key starts with `prefix`
    pub fn scan_prefix<'s>(&'s self, ns: Namespace, prefix: &[u8], direction: Direction) -> EntryIter<'s> {
        let end = prefix_end(prefix);
        let upper = match &end {
            Some(end) => Bound::Excluded(end.as_slice()),
            None => Bound::Unbounded,
        };
        self.scan_range(ns, Bound::Included(prefix), upper, direction)
    }

    /// Entries within a key range
    pub fn scan_range<'s>(
        &'s self,
        ns: Namespace,
        start: Bound<&[u8]>,
        end: Bound<&[u8]>,
        direction: Direction,
    ) -> EntryIter<'s> {
        let table = match self.data.get(&ns) {
            Some(table) => table,
            None => return Box::new(std::iter::empty()),
        };
        if is_empty_range(start, end) {
            return Box::new(std::iter::empty());
        }
        let range = table
            .range::<[u8], _>((start, end))
            .map(|(k, v)| (k.as_slice(), v.as_slice()));
        match direction {
            Direction::Forward => Box::new(range),
            Direction::Reverse => Box::new(range.rev()),
        }
    }

    /// Number of entries in a namespace
    pub fn len(&self, ns: Namespace) -> usize {
        self.data.get(&ns).map_or(0, |t| t.len())
    }

    /// Check if a namespace has no entries
    pub fn is_empty(&self, ns: Namespace) -> bool {
        self.len(ns) == 0
    }
}

/// BTreeMap::range panics on inverted or empty-excluded ranges
pub(crate) fn is_empty_range(start: Bound<&[u8]>, end: Bound<&[u8]>) -> bool {
    match (start, end) {
        (Bound::Included(s), Bound::Included(e)) => s > e,
        (Bound::Included(s), Bound::Excluded(e))
        | (Bound::Excluded(s), Bound::Included(e)) => s >= e,
        (Bound::Excluded(s), Bound::Excluded(e)) => s >= e,
        _ => false,
    }
}
