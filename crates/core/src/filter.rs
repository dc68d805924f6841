//! Record filters
//!
//! Filters resolve property values lazily through a caller-supplied getter,
//! so a record is only read as far as the filter needs. `And` and `Or`
//! short-circuit.
//!
//! Comparisons only match values of the same shape: `Int(1)` is neither
//! equal to nor greater than `UInt(0)`.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::mem::discriminant;

use crate::reference::Reference;
use crate::value::Value;

/// Predicate over a record's values
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Filter {
    /// A value is present
    Exists(Reference),
    /// Value equals
    Equals(Reference, Value),
    /// Value is greater than
    GreaterThan(Reference, Value),
    /// Value is greater than or equal
    GreaterThanEquals(Reference, Value),
    /// Value is less than
    LessThan(Reference, Value),
    /// Value is less than or equal
    LessThanEquals(Reference, Value),
    /// Value lies within a range
    Range {
        /// Compared reference
        reference: Reference,
        /// Lower bound
        from: Value,
        /// Upper bound
        to: Value,
        /// Include the lower bound
        inclusive_from: bool,
        /// Include the upper bound
        inclusive_to: bool,
    },
    /// String value starts with
    Prefix(Reference, String),
    /// Value is one of
    ValueIn(Reference, BTreeSet<Value>),
    /// Negation
    Not(Box<Filter>),
    /// All must match
    And(Vec<Filter>),
    /// Any must match
    Or(Vec<Filter>),
}

fn same_shape(a: &Value, b: &Value) -> bool {
    discriminant(a) == discriminant(b)
}

impl Filter {
    /// Equality filter
    pub fn equals(reference: Reference, value: impl Into<Value>) -> Self {
        Filter::Equals(reference, value.into())
    }

    /// Evaluate against a record
    pub fn matches<E, F>(&self, get: &mut F) -> Result<bool, E>
    where
        F: FnMut(&Reference) -> Result<Option<Value>, E>,
    {
        Ok(match self {
            Filter::Exists(r) => get(r)?.is_some(),
            Filter::Equals(r, expected) => get(r)?.map_or(false, |v| v == *expected),
            Filter::GreaterThan(r, bound) => {
                get(r)?.map_or(false, |v| same_shape(&v, bound) && v > *bound)
            }
            Filter::GreaterThanEquals(r, bound) => {
                get(r)?.map_or(false, |v| same_shape(&v, bound) && v >= *bound)
            }
            Filter::LessThan(r, bound) => {
                get(r)?.map_or(false, |v| same_shape(&v, bound) && v < *bound)
            }
            Filter::LessThanEquals(r, bound) => {
                get(r)?.map_or(false, |v| same_shape(&v, bound) && v <= *bound)
            }
            Filter::Range {
                reference,
                from,
                to,
                inclusive_from,
                inclusive_to,
            } => get(reference)?.map_or(false, |v| {
                let lower = if *inclusive_from { v >= *from } else { v > *from };
                let upper = if *inclusive_to { v <= *to } else { v < *to };
                same_shape(&v, from) && same_shape(&v, to) && lower && upper
            }),
            Filter::Prefix(r, prefix) => get(r)?
                .as_ref()
                .and_then(Value::as_str)
                .map_or(false, |s| s.starts_with(prefix.as_str())),
            Filter::ValueIn(r, options) => get(r)?.map_or(false, |v| options.contains(&v)),
            Filter::Not(inner) => !inner.matches(get)?,
            Filter::And(filters) => {
                for f in filters {
                    if !f.matches(get)? {
                        return Ok(false);
                    }
                }
                true
            }
            Filter::Or(filters) => {
                for f in filters {
                    if f.matches(get)? {
                        return Ok(true);
                    }
                }
                false
            }
        })
    }

    /// Values pinned by equality in every matching record
    ///
    /// Collects `Equals` terms reachable through nested `And`s only.
    pub fn equality_pins(&self) -> BTreeMap<Reference, Value> {
        let mut pins = BTreeMap::new();
        self.collect_pins(&mut pins);
        pins
    }

    fn collect_pins(&self, pins: &mut BTreeMap<Reference, Value>) {
        match self {
            Filter::Equals(r, v) => {
                pins.insert(r.clone(), v.clone());
            }
            Filter::And(filters) => filters.iter().for_each(|f| f.collect_pins(pins)),
            _ => {}
        }
    }
}
