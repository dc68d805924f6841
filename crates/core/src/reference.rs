//! Property references
//!
//! A [`Reference`] addresses a (possibly nested) location inside a record:
//! a top-level field, a field of an embedded record, a list position, a set
//! member, a map entry, or the selected variant of a multi-type value.
//!
//! ## Byte layout
//!
//! The storage form is the concatenation of self-delimiting segments, so a
//! container's reference is a byte prefix of every reference beneath it and
//! prefix iteration over a container yields exactly its contents:
//!
//! ```text
//! Property(i)   0x10 | u32 BE
//! ListItem(i)   0x20 | u32 BE
//! SetItem(v)    0x30 | scalar encoding of v
//! MapKey(k)     0x40 | scalar encoding of k
//! TypeTag(t)    0x50 | u32 BE
//! ```
//!
//! Record-meta qualifiers use bytes below 0x10 and therefore never collide
//! with a reference.

use byteorder::{BigEndian, ByteOrder};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::codec::{decode_scalar, encode_scalar_into};
use crate::error::{CoreError, Result};
use crate::value::{Value, Values};

const SEG_PROPERTY: u8 = 0x10;
const SEG_LIST_ITEM: u8 = 0x20;
const SEG_SET_ITEM: u8 = 0x30;
const SEG_MAP_KEY: u8 = 0x40;
const SEG_TYPE_TAG: u8 = 0x50;

/// Qualifier of the soft-delete flag
pub const SOFT_DELETE_QUALIFIER: &[u8] = &[0x00];
/// Qualifier of the last-version marker
pub const LAST_VERSION_QUALIFIER: &[u8] = &[0x01];

/// One step of a reference path
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Segment {
    /// Field of a record or embedded record
    Property(u32),
    /// Position in a list
    ListItem(u32),
    /// Member of a set
    SetItem(Value),
    /// Entry of a map or incrementing map
    MapKey(Value),
    /// Selected variant of a multi-type value
    TypeTag(u32),
}

impl Segment {
    /// Check if this segment addresses an element inside a collection or union
    pub fn is_structural(&self) -> bool {
        !matches!(self, Segment::Property(_))
    }
}

impl fmt::Display for Segment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Segment::Property(i) => write!(f, "{}", i),
            Segment::ListItem(i) => write!(f, "@{}", i),
            Segment::SetItem(v) => write!(f, "#{}", v),
            Segment::MapKey(k) => write!(f, "[{}]", k),
            Segment::TypeTag(t) => write!(f, "*{}", t),
        }
    }
}

/// Path to a location inside a record
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
pub struct Reference {
    segments: Vec<Segment>,
}

impl Reference {
    /// Reference to a top-level property
    pub fn property(index: u32) -> Self {
        Reference {
            segments: vec![Segment::Property(index)],
        }
    }

    /// Build a reference from segments
    pub fn from_segments(segments: Vec<Segment>) -> Self {
        Reference { segments }
    }

    /// Child reference with one more segment
    pub fn child(&self, segment: Segment) -> Self {
        let mut segments = self.segments.clone();
        segments.push(segment);
        Reference { segments }
    }

    /// Reference to a field of the embedded record at this reference
    pub fn field(&self, index: u32) -> Self {
        self.child(Segment::Property(index))
    }

    /// Reference to a list position under this reference
    pub fn list_item(&self, index: u32) -> Self {
        self.child(Segment::ListItem(index))
    }

    /// Reference to a set member under this reference
    pub fn set_item(&self, value: Value) -> Self {
        self.child(Segment::SetItem(value))
    }

    /// Reference to a map entry under this reference
    pub fn map_key(&self, key: Value) -> Self {
        self.child(Segment::MapKey(key))
    }

    /// Reference to the selected variant under this reference
    pub fn type_tag(&self, tag: u32) -> Self {
        self.child(Segment::TypeTag(tag))
    }

    /// Path segments
    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    /// Last segment
    pub fn last(&self) -> Option<&Segment> {
        self.segments.last()
    }

    /// Parent reference, if any
    pub fn parent(&self) -> Option<Reference> {
        if self.segments.len() <= 1 {
            return None;
        }
        Some(Reference {
            segments: self.segments[..self.segments.len() - 1].to_vec(),
        })
    }

    /// Number of segments
    pub fn depth(&self) -> usize {
        self.segments.len()
    }

    /// Check if `self` equals or lies beneath `other`
    pub fn starts_with(&self, other: &Reference) -> bool {
        self.segments.starts_with(&other.segments)
    }

    /// Index of the top-level property this reference starts at
    pub fn root_property(&self) -> Option<u32> {
        match self.segments.first() {
            Some(Segment::Property(i)) => Some(*i),
            _ => None,
        }
    }

    /// Look up the value this reference addresses inside a record
    pub fn resolve<'a>(&self, values: &'a Values) -> Option<&'a Value> {
        let (first, rest) = self.segments.split_first()?;
        let mut current = match first {
            Segment::Property(i) => values.get(*i)?,
            _ => return None,
        };
        for segment in rest {
            current = match (segment, current) {
                (Segment::Property(i), Value::Embed(fields)) => fields.get(*i)?,
                (Segment::ListItem(i), Value::List(items)) => items.get(*i as usize)?,
                (Segment::SetItem(v), Value::Set(items)) => items.get(v)?,
                (Segment::MapKey(k), Value::Map(entries)) => entries.get(k)?,
                (Segment::TypeTag(t), Value::Typed(typed)) if typed.tag == *t => &typed.value,
                _ => return None,
            };
        }
        Some(current)
    }

    /// Encode into storage bytes
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.segments.len() * 5);
        for segment in &self.segments {
            write_segment(segment, &mut out);
        }
        out
    }

    /// Decode from storage bytes
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let mut segments = Vec::new();
        let mut pos = 0;
        while pos < bytes.len() {
            let (segment, used) = read_segment(&bytes[pos..])?;
            segments.push(segment);
            pos += used;
        }
        Ok(Reference { segments })
    }
}

impl fmt::Display for Reference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, segment) in self.segments.iter().enumerate() {
            if i > 0 {
                write!(f, ".")?;
            }
            write!(f, "{}", segment)?;
        }
        Ok(())
    }
}

fn write_u32(tag: u8, n: u32, out: &mut Vec<u8>) {
    out.push(tag);
    let mut buf = [0u8; 4];
    BigEndian::write_u32(&mut buf, n);
    out.extend_from_slice(&buf);
}

fn write_segment(segment: &Segment, out: &mut Vec<u8>) {
    match segment {
        Segment::Property(i) => write_u32(SEG_PROPERTY, *i, out),
        Segment::ListItem(i) => write_u32(SEG_LIST_ITEM, *i, out),
        Segment::TypeTag(t) => write_u32(SEG_TYPE_TAG, *t, out),
        Segment::SetItem(v) | Segment::MapKey(v) => {
            out.push(if matches!(segment, Segment::SetItem(_)) {
                SEG_SET_ITEM
            } else {
                SEG_MAP_KEY
            });
            // Items and keys are validated as scalars before references are built.
            if encode_scalar_into(v, out).is_err() {
                debug_assert!(false, "non-scalar value in reference segment");
            }
        }
    }
}

fn read_u32(bytes: &[u8]) -> Result<u32> {
    if bytes.len() < 4 {
        return Err(CoreError::codec("truncated reference segment"));
    }
    Ok(BigEndian::read_u32(&bytes[..4]))
}

fn read_segment(bytes: &[u8]) -> Result<(Segment, usize)> {
    let (&tag, rest) = bytes
        .split_first()
        .ok_or_else(|| CoreError::codec("empty reference segment"))?;
    match tag {
        SEG_PROPERTY => Ok((Segment::Property(read_u32(rest)?), 5)),
        SEG_LIST_ITEM => Ok((Segment::ListItem(read_u32(rest)?), 5)),
        SEG_TYPE_TAG => Ok((Segment::TypeTag(read_u32(rest)?), 5)),
        SEG_SET_ITEM => {
            let (v, used) = decode_scalar(rest)?;
            Ok((Segment::SetItem(v), used + 1))
        }
        SEG_MAP_KEY => {
            let (v, used) = decode_scalar(rest)?;
            Ok((Segment::MapKey(v), used + 1))
        }
        other => Err(CoreError::codec(format!(
            "unknown reference segment tag {:#04x}",
            other
        ))),
    }
}
