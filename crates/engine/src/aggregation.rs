//! Aggregations over read results
//!
//! Each aggregation folds one reference over the records a get or scan
//! matched. Values are fetched through the record's getter, so aggregating
//! does not depend on the select graph.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use vellum_core::{Reference, Value};

use crate::error::Result;
use crate::values_getter::ValuesGetter;

/// Fold of one reference over matched records
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Aggregation {
    /// Records with a value
    Count(Reference),
    /// Sum of numeric values
    Sum(Reference),
    /// Smallest value
    Min(Reference),
    /// Largest value
    Max(Reference),
    /// Mean of numeric values, as a float
    Average(Reference),
}

impl Aggregation {
    /// Aggregated reference
    pub fn reference(&self) -> &Reference {
        match self {
            Aggregation::Count(r)
            | Aggregation::Sum(r)
            | Aggregation::Min(r)
            | Aggregation::Max(r)
            | Aggregation::Average(r) => r,
        }
    }
}

#[derive(Debug)]
enum State {
    Count(u64),
    Sum(Option<Value>),
    Min(Option<Value>),
    Max(Option<Value>),
    Average { total: f64, count: u64 },
}

/// Running aggregations of one read
#[derive(Debug)]
pub(crate) struct Aggregator<'r> {
    states: Vec<(&'r str, &'r Aggregation, State)>,
}

impl<'r> Aggregator<'r> {
    pub fn new(aggregations: &'r BTreeMap<String, Aggregation>) -> Self {
        let states = aggregations
            .iter()
            .map(|(name, aggregation)| {
                let state = match aggregation {
                    Aggregation::Count(_) => State::Count(0),
                    Aggregation::Sum(_) => State::Sum(None),
                    Aggregation::Min(_) => State::Min(None),
                    Aggregation::Max(_) => State::Max(None),
                    Aggregation::Average(_) => State::Average { total: 0.0, count: 0 },
                };
                (name.as_str(), aggregation, state)
            })
            .collect();
        Aggregator { states }
    }

    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }

    /// Fold one record in
    pub fn feed(&mut self, getter: &mut dyn ValuesGetter) -> Result<()> {
        for (_, aggregation, state) in &mut self.states {
            let value = match getter.value(aggregation.reference())? {
                Some(value) if value.is_scalar() => value,
                _ => continue,
            };
            match state {
                State::Count(n) => *n += 1,
                State::Sum(sum) => {
                    *sum = Some(match sum.take() {
                        Some(total) => add(total, &value),
                        None => value,
                    })
                }
                State::Min(min) => {
                    if min.as_ref().map_or(true, |m| value < *m) {
                        *min = Some(value);
                    }
                }
                State::Max(max) => {
                    if max.as_ref().map_or(true, |m| value > *m) {
                        *max = Some(value);
                    }
                }
                State::Average { total, count } => {
                    if let Some(v) = value.as_f64() {
                        *total += v;
                        *count += 1;
                    }
                }
            }
        }
        Ok(())
    }

    /// Results by aggregation name
    pub fn finish(self) -> BTreeMap<String, Option<Value>> {
        self.states
            .into_iter()
            .map(|(name, _, state)| {
                let result = match state {
                    State::Count(n) => Some(Value::UInt(n)),
                    State::Sum(sum) => sum,
                    State::Min(min) => min,
                    State::Max(max) => max,
                    State::Average { total, count } => {
                        if count == 0 {
                            None
                        } else {
                            Some(Value::Float(total / count as f64))
                        }
                    }
                };
                (name.to_string(), result)
            })
            .collect()
    }
}

/// Numeric sum of same-shaped values; other shapes keep the running total
fn add(total: Value, value: &Value) -> Value {
    match (total, value) {
        (Value::Int(a), Value::Int(b)) => Value::Int(a.saturating_add(*b)),
        (Value::UInt(a), Value::UInt(b)) => Value::UInt(a.saturating_add(*b)),
        (Value::Float(a), Value::Float(b)) => Value::Float(a + b),
        (total, _) => total,
    }
}
