//! Version clocks
//!
//! A [`Clock`] hands out strictly increasing [`Version`] stamps. The store
//! asks for exactly one stamp per committed mutation.
//!
//! - [`HybridClock`]: wall time (via `chrono`) combined with a logical
//!   counter, robust against the wall clock standing still or going back
//! - [`LogicalClock`]: plain counter, deterministic for tests and replay

use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;

use crate::version::{Version, LOGICAL_BITS};

/// Source of strictly increasing version stamps
pub trait Clock: Send + Sync {
    /// Allocate the next version
    fn next_version(&self) -> Version;

    /// Most recently allocated version (ZERO if none)
    fn last_version(&self) -> Version;

    /// Make sure future versions are newer than `seen`
    fn observe(&self, seen: Version);
}

/// Hybrid logical clock
#[derive(Debug, Default)]
pub struct HybridClock {
    last: Mutex<Version>,
}

impl HybridClock {
    /// Create a clock that has not issued any version yet
    pub fn new() -> Self {
        Self::default()
    }

    fn wall_millis() -> u64 {
        chrono::Utc::now().timestamp_millis().max(0) as u64
    }
}

impl Clock for HybridClock {
    fn next_version(&self) -> Version {
        let mut last = self.last.lock();
        let wall = Version::from_parts(Self::wall_millis(), 0);
        let next = if wall > *last {
            wall
        } else {
            // Wall clock did not advance; bump the logical part, spilling
            // into the millisecond part once the counter is exhausted.
            if last.logical() + 1 >= (1 << LOGICAL_BITS) {
                Version::from_parts(last.millis() + 1, 0)
            } else {
                last.next()
            }
        };
        *last = next;
        next
    }

    fn last_version(&self) -> Version {
        *self.last.lock()
    }

    fn observe(&self, seen: Version) {
        let mut last = self.last.lock();
        if seen > *last {
            *last = seen;
        }
    }
}

/// Counter clock issuing 1, 2, 3, ...
#[derive(Debug, Default)]
pub struct LogicalClock {
    counter: AtomicU64,
}

impl LogicalClock {
    /// Create a clock whose first version is 1
    pub fn new() -> Self {
        Self::default()
    }
}

impl Clock for LogicalClock {
    fn next_version(&self) -> Version {
        Version::new(self.counter.fetch_add(1, Ordering::SeqCst) + 1)
    }

    fn last_version(&self) -> Version {
        Version::new(self.counter.load(Ordering::SeqCst))
    }

    fn observe(&self, seen: Version) {
        self.counter.fetch_max(seen.as_u64(), Ordering::SeqCst);
    }
}
