//! Stored value encoding
//!
//! Table qualifiers hold a [`StoredValue`] tagged with its storage kind, so a
//! generic reader can decode any qualifier without consulting the schema:
//!
//! ```text
//! Deleted   0x00
//! Scalar    0x01 | scalar encoding
//! Counter   0x02 | u32 BE collection size
//! TypeTag   0x03 | u32 BE selected variant
//! Embed     0x04
//! ```
//!
//! Latest-table entries prefix this with the 8-byte version of the write.

use byteorder::{BigEndian, ByteOrder};

use crate::codec::{decode_scalar_exact, encode_scalar_into};
use crate::error::{CoreError, Result};
use crate::value::Value;
use crate::version::{Version, VERSION_SIZE};

const KIND_DELETED: u8 = 0x00;
const KIND_SCALAR: u8 = 0x01;
const KIND_COUNTER: u8 = 0x02;
const KIND_TYPE_TAG: u8 = 0x03;
const KIND_EMBED: u8 = 0x04;

/// Content of one qualifier
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoredValue {
    /// Value was removed at this version
    Deleted,
    /// Scalar leaf value
    Scalar(Value),
    /// Size of the list, set or map at this reference
    Counter(u32),
    /// Selected variant of the multi-type value at this reference
    TypeTag(u32),
    /// An embedded record exists at this reference
    Embed,
}

impl StoredValue {
    /// Check if this is a deletion tombstone
    pub fn is_deleted(&self) -> bool {
        matches!(self, StoredValue::Deleted)
    }

    /// Encode to bytes
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(10);
        self.write_into(&mut out);
        out
    }

    fn write_into(&self, out: &mut Vec<u8>) {
        match self {
            StoredValue::Deleted => out.push(KIND_DELETED),
            StoredValue::Scalar(v) => {
                out.push(KIND_SCALAR);
                if encode_scalar_into(v, out).is_err() {
                    debug_assert!(false, "non-scalar stored as scalar leaf");
                }
            }
            StoredValue::Counter(n) => {
                out.push(KIND_COUNTER);
                let mut buf = [0u8; 4];
                BigEndian::write_u32(&mut buf, *n);
                out.extend_from_slice(&buf);
            }
            StoredValue::TypeTag(t) => {
                out.push(KIND_TYPE_TAG);
                let mut buf = [0u8; 4];
                BigEndian::write_u32(&mut buf, *t);
                out.extend_from_slice(&buf);
            }
            StoredValue::Embed => out.push(KIND_EMBED),
        }
    }

    /// Decode from bytes
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let (&kind, rest) = bytes
            .split_first()
            .ok_or_else(|| CoreError::codec("empty stored value"))?;
        match kind {
            KIND_DELETED => Ok(StoredValue::Deleted),
            KIND_SCALAR => Ok(StoredValue::Scalar(decode_scalar_exact(rest)?)),
            KIND_COUNTER => Ok(StoredValue::Counter(read_u32(rest)?)),
            KIND_TYPE_TAG => Ok(StoredValue::TypeTag(read_u32(rest)?)),
            KIND_EMBED => Ok(StoredValue::Embed),
            other => Err(CoreError::codec(format!(
                "unknown stored value kind {:#04x}",
                other
            ))),
        }
    }

    /// Encode with a leading version, as written to the latest table
    pub fn to_versioned_bytes(&self, version: Version) -> Vec<u8> {
        let mut out = Vec::with_capacity(VERSION_SIZE + 10);
        out.extend_from_slice(&version.to_bytes());
        self.write_into(&mut out);
        out
    }

    /// Decode a latest-table entry into its version and value
    pub fn from_versioned_bytes(bytes: &[u8]) -> Result<(Version, Self)> {
        let version = Version::from_bytes(bytes)?;
        Ok((version, Self::from_bytes(&bytes[VERSION_SIZE..])?))
    }
}

fn read_u32(bytes: &[u8]) -> Result<u32> {
    if bytes.len() != 4 {
        return Err(CoreError::codec("malformed u32 payload"));
    }
    Ok(BigEndian::read_u32(bytes))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_versioned_round_trip() {
        let stored = StoredValue::Scalar(Value::from("x"));
        let bytes = stored.to_versioned_bytes(Version::new(42));
        let (version, decoded) = StoredValue::from_versioned_bytes(&bytes).unwrap();
        assert_eq!(version, Version::new(42));
        assert_eq!(decoded, stored);
    }

    #[test]
    fn test_kinds_decode() {
        for stored in [
            StoredValue::Deleted,
            StoredValue::Counter(7),
            StoredValue::TypeTag(2),
            StoredValue::Embed,
        ] {
            assert_eq!(StoredValue::from_bytes(&stored.to_bytes()).unwrap(), stored);
        }
    }

    #[test]
    fn test_unknown_kind() {
        assert!(StoredValue::from_bytes(&[0x09]).is_err());
        assert!(StoredValue::from_bytes(&[]).is_err());
    }
}
