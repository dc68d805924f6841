//! Record keys
//!
//! A [`RecordKey`] is the immutable byte identity of one record. Keys are
//! fixed size per data model: either a random 16-byte UUID surrogate or the
//! concatenated fixed-width encodings of designated key properties (see
//! [`crate::schema::KeyDefinition`]). Fixed size lets index and unique
//! entries carry the key as a plain suffix.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Size of a random surrogate key
pub const UUID_KEY_SIZE: usize = 16;

/// Immutable byte identity of a record
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct RecordKey(Vec<u8>);

impl RecordKey {
    /// Wrap raw key bytes
    pub fn new(bytes: impl Into<Vec<u8>>) -> Self {
        RecordKey(bytes.into())
    }

    /// Fresh random surrogate key
    pub fn random() -> Self {
        RecordKey(uuid::Uuid::new_v4().as_bytes().to_vec())
    }

    /// Key bytes
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Key size in bytes
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Check if the key is empty
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Consume into raw bytes
    pub fn into_bytes(self) -> Vec<u8> {
        self.0
    }
}

impl AsRef<[u8]> for RecordKey {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl From<&[u8]> for RecordKey {
    fn from(bytes: &[u8]) -> Self {
        RecordKey(bytes.to_vec())
    }
}

impl fmt::Display for RecordKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for b in &self.0 {
            write!(f, "{:02x}", b)?;
        }
        Ok(())
    }
}

impl fmt::Debug for RecordKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "RecordKey({})", self)
    }
}
