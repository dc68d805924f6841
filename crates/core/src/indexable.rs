//! Index value descriptors
//!
//! An [`IsIndexable`] describes how to compute an index value from a
//! record's values. It is used for secondary indexes and for derived keys.
//!
//! # Index values
//!
//! | Descriptor | Value |
//! |---|---|
//! | `Property(r)` | scalar encoding of the value at `r`, no entry when absent |
//! | `Reversed(d)` | every byte of `d` inverted, reversing its order |
//! | `Multiple(ds)` | concatenation of the parts, no entry when any part is absent |
//! | `ReferenceToMax(r)` | like `Property(r)`, but absent values become `0xFF` so they sort last |
//! | `KeyBytes` | the record key |
//!
//! # Descriptor bytes
//!
//! The descriptor itself encodes to a prefix-free byte tree which serves as
//! the `IndexRef` prefix of every entry of that index:
//!
//! ```text
//! Property        0x01 | u32 len | reference
//! Reversed        0x02 | inner
//! Multiple        0x03 | u32 count | parts
//! ReferenceToMax  0x04 | u32 len | reference
//! KeyBytes        0x05
//! ```

use byteorder::{BigEndian, ByteOrder};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::codec::{encode_scalar_into, invert};
use crate::error::CoreError;
use crate::reference::Reference;
use crate::value::Value;

const DESC_PROPERTY: u8 = 0x01;
const DESC_REVERSED: u8 = 0x02;
const DESC_MULTIPLE: u8 = 0x03;
const DESC_REFERENCE_TO_MAX: u8 = 0x04;
const DESC_KEY_BYTES: u8 = 0x05;

/// Index value standing in for an absent `ReferenceToMax` value
pub const MAX_SENTINEL: u8 = 0xFF;

/// Descriptor computing an index value from a record
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum IsIndexable {
    /// Value of one scalar reference
    Property(Reference),
    /// Inner descriptor in reverse order
    Reversed(Box<IsIndexable>),
    /// Ordered tuple of descriptors
    Multiple(Vec<IsIndexable>),
    /// Value of a reference, sorting last when absent
    ReferenceToMax(Reference),
    /// The record key
    KeyBytes,
}

impl IsIndexable {
    /// Index over one property
    pub fn property(reference: Reference) -> Self {
        IsIndexable::Property(reference)
    }

    /// Reversed descriptor
    pub fn reversed(inner: IsIndexable) -> Self {
        IsIndexable::Reversed(Box::new(inner))
    }

    /// Composite descriptor
    pub fn multiple(parts: Vec<IsIndexable>) -> Self {
        IsIndexable::Multiple(parts)
    }

    /// Top-level components; a composite yields its parts
    pub fn parts(&self) -> &[IsIndexable] {
        match self {
            IsIndexable::Multiple(parts) => parts,
            single => std::slice::from_ref(single),
        }
    }

    /// Every reference the descriptor reads
    pub fn references(&self) -> Vec<&Reference> {
        let mut out = Vec::new();
        self.collect_references(&mut out);
        out
    }

    fn collect_references<'a>(&'a self, out: &mut Vec<&'a Reference>) {
        match self {
            IsIndexable::Property(r) | IsIndexable::ReferenceToMax(r) => out.push(r),
            IsIndexable::Reversed(inner) => inner.collect_references(out),
            IsIndexable::Multiple(parts) => parts.iter().for_each(|p| p.collect_references(out)),
            IsIndexable::KeyBytes => {}
        }
    }

    /// Reference when the descriptor is a plain or reversed single property
    pub fn single_reference(&self) -> Option<&Reference> {
        match self {
            IsIndexable::Property(r) => Some(r),
            IsIndexable::Reversed(inner) => inner.single_reference(),
            _ => None,
        }
    }

    /// Check if the descriptor only combines plain or reversed properties
    pub fn is_fixed_key_shape(&self) -> bool {
        match self {
            IsIndexable::Property(_) => true,
            IsIndexable::Reversed(inner) => inner.is_fixed_key_shape(),
            IsIndexable::Multiple(parts) => !parts.is_empty() && parts.iter().all(Self::is_fixed_key_shape),
            IsIndexable::ReferenceToMax(_) | IsIndexable::KeyBytes => false,
        }
    }

    /// Compute the index value
    ///
    /// `get` resolves references against the record being indexed. Returns
    /// `None` when the record produces no entry for this index.
    pub fn index_value<E, F>(&self, key: &[u8], get: &mut F) -> Result<Option<Vec<u8>>, E>
    where
        E: From<CoreError>,
        F: FnMut(&Reference) -> Result<Option<Value>, E>,
    {
        let mut out = Vec::new();
        if self.write_value(key, get, &mut out)? {
            Ok(Some(out))
        } else {
            Ok(None)
        }
    }

    fn write_value<E, F>(&self, key: &[u8], get: &mut F, out: &mut Vec<u8>) -> Result<bool, E>
    where
        E: From<CoreError>,
        F: FnMut(&Reference) -> Result<Option<Value>, E>,
    {
        match self {
            IsIndexable::Property(r) => match get(r)? {
                Some(v) => {
                    encode_scalar_into(&v, out)?;
                    Ok(true)
                }
                None => Ok(false),
            },
            IsIndexable::ReferenceToMax(r) => {
                match get(r)? {
                    Some(v) => encode_scalar_into(&v, out)?,
                    None => out.push(MAX_SENTINEL),
                }
                Ok(true)
            }
            IsIndexable::Reversed(inner) => {
                let start = out.len();
                if !inner.write_value(key, get, out)? {
                    return Ok(false);
                }
                invert(&mut out[start..]);
                Ok(true)
            }
            IsIndexable::Multiple(parts) => {
                for part in parts {
                    if !part.write_value(key, get, out)? {
                        return Ok(false);
                    }
                }
                Ok(true)
            }
            IsIndexable::KeyBytes => {
                out.extend_from_slice(key);
                Ok(true)
            }
        }
    }

    /// Prefix-free descriptor bytes, used as the index reference
    pub fn to_descriptor_bytes(&self) -> Vec<u8> {
        let mut out = Vec::new();
        self.write_descriptor(&mut out);
        out
    }

    fn write_descriptor(&self, out: &mut Vec<u8>) {
        let mut len = [0u8; 4];
        match self {
            IsIndexable::Property(r) | IsIndexable::ReferenceToMax(r) => {
                out.push(if matches!(self, IsIndexable::Property(_)) {
                    DESC_PROPERTY
                } else {
                    DESC_REFERENCE_TO_MAX
                });
                let bytes = r.to_bytes();
                BigEndian::write_u32(&mut len, bytes.len() as u32);
                out.extend_from_slice(&len);
                out.extend_from_slice(&bytes);
            }
            IsIndexable::Reversed(inner) => {
                out.push(DESC_REVERSED);
                inner.write_descriptor(out);
            }
            IsIndexable::Multiple(parts) => {
                out.push(DESC_MULTIPLE);
                BigEndian::write_u32(&mut len, parts.len() as u32);
                out.extend_from_slice(&len);
                for part in parts {
                    part.write_descriptor(out);
                }
            }
            IsIndexable::KeyBytes => out.push(DESC_KEY_BYTES),
        }
    }
}

impl fmt::Display for IsIndexable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IsIndexable::Property(r) => write!(f, "{}", r),
            IsIndexable::Reversed(inner) => write!(f, "rev({})", inner),
            IsIndexable::Multiple(parts) => {
                write!(f, "(")?;
                for (i, part) in parts.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", part)?;
                }
                write!(f, ")")
            }
            IsIndexable::ReferenceToMax(r) => write!(f, "max({})", r),
            IsIndexable::KeyBytes => write!(f, "key"),
        }
    }
}
