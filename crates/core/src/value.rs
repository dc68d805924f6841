//! Value types for Vellum records
//!
//! This module defines:
//! - Value: closed enum over every value shape a record property can hold
//! - TypedValue: the payload of a multi-type (tagged union) property
//! - Values: a record (or embedded record) keyed by property index
//!
//! ## Shapes
//!
//! Scalars (`Bool`, `Int`, `UInt`, `Float`, `String`, `Bytes`) are stored as
//! single qualifiers. Structured shapes (`List`, `Set`, `Map`, `Typed`,
//! `Embed`) are decomposed into one qualifier per leaf plus a marker at the
//! container reference.
//!
//! ## Ordering
//!
//! Values are totally ordered so they can live in sets and map keys.
//! Floats order by `f64::total_cmp`, which means `NaN == NaN` here, unlike
//! IEEE-754 equality. Different shapes order by their variant rank.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::hash::{Hash, Hasher};

/// A property value of any shape
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Value {
    /// Boolean value
    Bool(bool),
    /// 64-bit signed integer
    Int(i64),
    /// 64-bit unsigned integer
    UInt(u64),
    /// 64-bit floating point
    Float(f64),
    /// UTF-8 string
    String(String),
    /// Raw bytes
    Bytes(Vec<u8>),
    /// Ordered list of scalar items
    List(Vec<Value>),
    /// Set of scalar items
    Set(BTreeSet<Value>),
    /// Map from scalar keys to values (also used for incrementing maps)
    Map(BTreeMap<Value, Value>),
    /// Tagged union value
    Typed(TypedValue),
    /// Embedded record
    Embed(Values),
}

/// Payload of a multi-type property: a variant tag plus its value
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TypedValue {
    /// Variant tag as declared in the schema
    pub tag: u32,
    /// Value of the selected variant
    pub value: Box<Value>,
}

impl TypedValue {
    /// Create a typed value
    pub fn new(tag: u32, value: Value) -> Self {
        TypedValue {
            tag,
            value: Box::new(value),
        }
    }
}

impl Value {
    /// Rank used to order values of different shapes
    fn rank(&self) -> u8 {
        match self {
            Value::Bool(_) => 0,
            Value::Int(_) => 1,
            Value::UInt(_) => 2,
            Value::Float(_) => 3,
            Value::String(_) => 4,
            Value::Bytes(_) => 5,
            Value::List(_) => 6,
            Value::Set(_) => 7,
            Value::Map(_) => 8,
            Value::Typed(_) => 9,
            Value::Embed(_) => 10,
        }
    }

    /// Get the type name as a string
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Bool(_) => "Bool",
            Value::Int(_) => "Int",
            Value::UInt(_) => "UInt",
            Value::Float(_) => "Float",
            Value::String(_) => "String",
            Value::Bytes(_) => "Bytes",
            Value::List(_) => "List",
            Value::Set(_) => "Set",
            Value::Map(_) => "Map",
            Value::Typed(_) => "Typed",
            Value::Embed(_) => "Embed",
        }
    }

    /// Check if this value is stored as a single qualifier
    pub fn is_scalar(&self) -> bool {
        matches!(
            self,
            Value::Bool(_)
                | Value::Int(_)
                | Value::UInt(_)
                | Value::Float(_)
                | Value::String(_)
                | Value::Bytes(_)
        )
    }

    /// Get as string slice if this is a String value
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    /// Get as i64 if this is an Int value
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(v) => Some(*v),
            _ => None,
        }
    }

    /// Get as u64 if this is a UInt value
    pub fn as_uint(&self) -> Option<u64> {
        match self {
            Value::UInt(v) => Some(*v),
            _ => None,
        }
    }

    /// Numeric view used by aggregations
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Int(v) => Some(*v as f64),
            Value::UInt(v) => Some(*v as f64),
            Value::Float(v) => Some(*v),
            _ => None,
        }
    }

    /// Get the embedded values if this is an Embed value
    pub fn as_embed(&self) -> Option<&Values> {
        match self {
            Value::Embed(v) => Some(v),
            _ => None,
        }
    }

    /// Number of elements for collection values
    pub fn collection_len(&self) -> Option<usize> {
        match self {
            Value::List(v) => Some(v.len()),
            Value::Set(v) => Some(v.len()),
            Value::Map(v) => Some(v.len()),
            _ => None,
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Value {}

impl PartialOrd for Value {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Value {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            (Value::Bool(a), Value::Bool(b)) => a.cmp(b),
            (Value::Int(a), Value::Int(b)) => a.cmp(b),
            (Value::UInt(a), Value::UInt(b)) => a.cmp(b),
            (Value::Float(a), Value::Float(b)) => a.total_cmp(b),
            (Value::String(a), Value::String(b)) => a.cmp(b),
            (Value::Bytes(a), Value::Bytes(b)) => a.cmp(b),
            (Value::List(a), Value::List(b)) => a.cmp(b),
            (Value::Set(a), Value::Set(b)) => a.cmp(b),
            (Value::Map(a), Value::Map(b)) => a.cmp(b),
            (Value::Typed(a), Value::Typed(b)) => a.cmp(b),
            (Value::Embed(a), Value::Embed(b)) => a.cmp(b),
            _ => self.rank().cmp(&other.rank()),
        }
    }
}

impl Hash for Value {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.rank().hash(state);
        match self {
            Value::Bool(v) => v.hash(state),
            Value::Int(v) => v.hash(state),
            Value::UInt(v) => v.hash(state),
            Value::Float(v) => v.to_bits().hash(state),
            Value::String(v) => v.hash(state),
            Value::Bytes(v) => v.hash(state),
            Value::List(v) => v.hash(state),
            Value::Set(v) => v.hash(state),
            Value::Map(v) => v.hash(state),
            Value::Typed(v) => v.hash(state),
            Value::Embed(v) => v.hash(state),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Bool(v) => write!(f, "{}", v),
            Value::Int(v) => write!(f, "{}", v),
            Value::UInt(v) => write!(f, "{}u", v),
            Value::Float(v) => write!(f, "{}", v),
            Value::String(v) => write!(f, "{:?}", v),
            Value::Bytes(v) => write!(f, "bytes[{}]", v.len()),
            Value::List(v) => write!(f, "list[{}]", v.len()),
            Value::Set(v) => write!(f, "set[{}]", v.len()),
            Value::Map(v) => write!(f, "map[{}]", v.len()),
            Value::Typed(v) => write!(f, "typed({}: {})", v.tag, v.value),
            Value::Embed(v) => write!(f, "embed[{}]", v.len()),
        }
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(v)
    }
}

impl From<u64> for Value {
    fn from(v: u64) -> Self {
        Value::UInt(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::String(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::String(v)
    }
}

impl From<Vec<u8>> for Value {
    fn from(v: Vec<u8>) -> Self {
        Value::Bytes(v)
    }
}

impl From<Values> for Value {
    fn from(v: Values) -> Self {
        Value::Embed(v)
    }
}

/// The property values of a record or embedded record
///
/// Keyed by the property index declared in the schema.
#[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Values(BTreeMap<u32, Value>);

impl Values {
    /// Create an empty value set
    pub fn new() -> Self {
        Values(BTreeMap::new())
    }

    /// Builder-style insert
    pub fn with(mut self, index: u32, value: impl Into<Value>) -> Self {
        self.0.insert(index, value.into());
        self
    }

    /// Set a property value, returning the previous one
    pub fn insert(&mut self, index: u32, value: Value) -> Option<Value> {
        self.0.insert(index, value)
    }

    /// Get a property value
    pub fn get(&self, index: u32) -> Option<&Value> {
        self.0.get(&index)
    }

    /// Get a mutable property value
    pub fn get_mut(&mut self, index: u32) -> Option<&mut Value> {
        self.0.get_mut(&index)
    }

    /// Remove a property value
    pub fn remove(&mut self, index: u32) -> Option<Value> {
        self.0.remove(&index)
    }

    /// Check if a property has a value
    pub fn contains(&self, index: u32) -> bool {
        self.0.contains_key(&index)
    }

    /// Number of properties with a value
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Check if no property has a value
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Iterate properties in index order
    pub fn iter(&self) -> impl Iterator<Item = (u32, &Value)> {
        self.0.iter().map(|(k, v)| (*k, v))
    }
}

impl FromIterator<(u32, Value)> for Values {
    fn from_iter<I: IntoIterator<Item = (u32, Value)>>(iter: I) -> Self {
        Values(iter.into_iter().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cross_shape_values_never_equal() {
        assert_ne!(Value::Int(1), Value::UInt(1));
        assert_ne!(Value::Int(1), Value::Float(1.0));
        assert_ne!(Value::String("a".into()), Value::Bytes(b"a".to_vec()));
    }

    #[test]
    fn test_float_total_order() {
        assert_eq!(Value::Float(f64::NAN), Value::Float(f64::NAN));
        assert!(Value::Float(-1.0) < Value::Float(0.0));
        assert!(Value::Float(0.0) < Value::Float(f64::INFINITY));
    }

    #[test]
    fn test_values_builder() {
        let values = Values::new().with(1, "alice").with(2, 30i64);
        assert_eq!(values.get(1), Some(&Value::String("alice".into())));
        assert_eq!(values.get(2).and_then(Value::as_int), Some(30));
        assert_eq!(values.len(), 2);
        assert!(!values.contains(3));
    }

    #[test]
    fn test_scalar_detection() {
        assert!(Value::Bytes(vec![1]).is_scalar());
        assert!(!Value::List(vec![]).is_scalar());
        assert!(!Value::Embed(Values::new()).is_scalar());
        assert!(!Value::Typed(TypedValue::new(1, Value::Int(2))).is_scalar());
    }

    #[test]
    fn test_set_ordering_of_values() {
        let set: BTreeSet<Value> = [Value::from("b"), Value::from("a")].into_iter().collect();
        let items: Vec<_> = set.iter().filter_map(Value::as_str).collect();
        assert_eq!(items, vec!["a", "b"]);
    }
}
