//! Version stamps
//!
//! Every committed mutation is stamped with one `Version`: a hybrid logical
//! clock value packing wall-clock milliseconds in the high 44 bits and a
//! tie-breaking logical counter in the low 20 bits. Versions order records'
//! history and double as per-field "last modified" markers.
//!
//! ## Storage
//!
//! Versions are written big-endian so byte order equals numeric order.
//! Historic namespaces append the *inverted* version so a forward prefix
//! iteration yields the newest version first.

use byteorder::{BigEndian, ByteOrder};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{CoreError, Result};

/// Number of low bits reserved for the logical counter
pub const LOGICAL_BITS: u32 = 20;

/// Encoded size of a version
pub const VERSION_SIZE: usize = 8;

/// Hybrid logical clock stamp
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
pub struct Version(u64);

impl Version {
    /// The zero version, older than any committed mutation
    pub const ZERO: Version = Version(0);

    /// The maximum version
    pub const MAX: Version = Version(u64::MAX);

    /// Create a version from its raw value
    #[inline]
    pub const fn new(raw: u64) -> Self {
        Version(raw)
    }

    /// Create a version from wall-clock millis and a logical counter
    #[inline]
    pub const fn from_parts(millis: u64, logical: u64) -> Self {
        Version((millis << LOGICAL_BITS) | (logical & ((1 << LOGICAL_BITS) - 1)))
    }

    /// Raw numeric value
    #[inline]
    pub const fn as_u64(&self) -> u64 {
        self.0
    }

    /// Wall-clock component in milliseconds
    #[inline]
    pub const fn millis(&self) -> u64 {
        self.0 >> LOGICAL_BITS
    }

    /// Logical counter component
    #[inline]
    pub const fn logical(&self) -> u64 {
        self.0 & ((1 << LOGICAL_BITS) - 1)
    }

    /// The next version after this one
    #[inline]
    pub const fn next(&self) -> Self {
        Version(self.0.saturating_add(1))
    }

    /// The version just before this one
    #[inline]
    pub const fn prev(&self) -> Self {
        Version(self.0.saturating_sub(1))
    }

    /// Big-endian bytes
    pub fn to_bytes(&self) -> [u8; VERSION_SIZE] {
        let mut buf = [0u8; VERSION_SIZE];
        BigEndian::write_u64(&mut buf, self.0);
        buf
    }

    /// Inverted big-endian bytes, so newer versions sort first
    pub fn to_inverted_bytes(&self) -> [u8; VERSION_SIZE] {
        let mut buf = [0u8; VERSION_SIZE];
        BigEndian::write_u64(&mut buf, !self.0);
        buf
    }

    /// Read from big-endian bytes
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < VERSION_SIZE {
            return Err(CoreError::codec("truncated version"));
        }
        Ok(Version(BigEndian::read_u64(&bytes[..VERSION_SIZE])))
    }

    /// Read from inverted big-endian bytes
    pub fn from_inverted_bytes(bytes: &[u8]) -> Result<Self> {
        Ok(Version(!Self::from_bytes(bytes)?.0))
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "v{}", self.0)
    }
}

impl From<u64> for Version {
    fn from(raw: u64) -> Self {
        Version(raw)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parts_round_trip() {
        let v = Version::from_parts(1_700_000_000_000, 7);
        assert_eq!(v.millis(), 1_700_000_000_000);
        assert_eq!(v.logical(), 7);
    }

    #[test]
    fn test_inverted_bytes_sort_newest_first() {
        let older = Version::new(10);
        let newer = Version::new(11);
        assert!(older.to_bytes() < newer.to_bytes());
        assert!(newer.to_inverted_bytes() < older.to_inverted_bytes());
        assert_eq!(
            Version::from_inverted_bytes(&newer.to_inverted_bytes()).unwrap(),
            newer
        );
    }

    #[test]
    fn test_truncated_bytes() {
        assert!(Version::from_bytes(&[1, 2, 3]).is_err());
    }
}
