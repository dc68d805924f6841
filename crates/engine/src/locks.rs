//! Striped per-record locks
//!
//! Mutations of one record are serialized by hashing `(model id, key)` onto
//! a fixed set of mutexes. The version stamp is taken while the stripe is
//! held, so versions of one record commit in increasing order. Records on
//! different stripes proceed in parallel.

use parking_lot::{Mutex, MutexGuard};
use rustc_hash::FxHasher;
use std::hash::{Hash, Hasher};

/// Default number of stripes
pub const DEFAULT_STRIPES: usize = 64;

/// Fixed set of mutexes addressed by record
#[derive(Debug)]
pub struct KeyLocks {
    stripes: Box<[Mutex<()>]>,
}

impl KeyLocks {
    /// Create `count` stripes (at least one)
    pub fn new(count: usize) -> Self {
        KeyLocks {
            stripes: (0..count.max(1)).map(|_| Mutex::new(())).collect(),
        }
    }

    fn stripe(&self, model_id: u32, key: &[u8]) -> usize {
        let mut hasher = FxHasher::default();
        model_id.hash(&mut hasher);
        key.hash(&mut hasher);
        (hasher.finish() as usize) % self.stripes.len()
    }

    /// Lock the stripe of a record
    pub fn lock(&self, model_id: u32, key: &[u8]) -> MutexGuard<'_, ()> {
        self.stripes[self.stripe(model_id, key)].lock()
    }
}

impl Default for KeyLocks {
    fn default() -> Self {
        Self::new(DEFAULT_STRIPES)
    }
}
