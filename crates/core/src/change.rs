//! Mutation intents and change records
//!
//! [`Change`] is both the input of a change request and the unit of change
//! history: the processors echo caller changes back together with derived
//! changes (`ObjectCreate`, `IncMapAddition`, `IndexChange`) and change reads
//! report stored history using the same type.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

use crate::reference::Reference;
use crate::value::Value;

/// One mutation intent or observed change
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Change {
    /// Assert current values, never mutates
    Check(Vec<(Reference, Value)>),
    /// Set whole values
    Change(Vec<(Reference, Value)>),
    /// Remove values
    Delete(Vec<Reference>),
    /// Positional list edit
    ListChange(ListChange),
    /// Set membership edit
    SetChange(SetChange),
    /// Map entry edit
    MapChange(MapChange),
    /// Append to an incrementing map
    IncMapChange(IncMapChange),
    /// Set or clear the soft-delete flag
    SoftDelete(bool),
    /// Record was created
    ObjectCreate,
    /// Keys assigned by an incrementing map append
    IncMapAddition(IncMapAddition),
    /// Index entries rewritten by a mutation
    IndexChange(Vec<IndexChange>),
}

impl Change {
    /// Check if the change was derived by the store rather than requested
    pub fn is_derived(&self) -> bool {
        matches!(
            self,
            Change::ObjectCreate | Change::IncMapAddition(_) | Change::IndexChange(_)
        )
    }

    /// References targeted by a caller change
    pub fn targets(&self) -> Vec<&Reference> {
        match self {
            Change::Check(pairs) | Change::Change(pairs) => pairs.iter().map(|(r, _)| r).collect(),
            Change::Delete(refs) => refs.iter().collect(),
            Change::ListChange(c) => vec![&c.reference],
            Change::SetChange(c) => vec![&c.reference],
            Change::MapChange(c) => vec![&c.reference],
            Change::IncMapChange(c) => vec![&c.reference],
            Change::IncMapAddition(c) => vec![&c.reference],
            Change::SoftDelete(_) | Change::ObjectCreate | Change::IndexChange(_) => Vec::new(),
        }
    }
}

/// Positional list edit, applied as delete, then insert, then append
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListChange {
    /// List reference
    pub reference: Reference,
    /// Remove every occurrence of these values
    pub delete_values: Vec<Value>,
    /// Insert values at positions, applied in ascending position order
    pub add_values_at_index: BTreeMap<u32, Value>,
    /// Append values
    pub add_values_to_end: Vec<Value>,
}

impl ListChange {
    /// Empty edit of the list at `reference`
    pub fn new(reference: Reference) -> Self {
        ListChange {
            reference,
            ..Default::default()
        }
    }

    /// Builder-style append
    pub fn append(mut self, values: impl IntoIterator<Item = Value>) -> Self {
        self.add_values_to_end.extend(values);
        self
    }

    /// Builder-style insert
    pub fn insert(mut self, index: u32, value: Value) -> Self {
        self.add_values_at_index.insert(index, value);
        self
    }

    /// Builder-style delete by value
    pub fn remove(mut self, values: impl IntoIterator<Item = Value>) -> Self {
        self.delete_values.extend(values);
        self
    }
}

/// Set membership edit
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SetChange {
    /// Set reference
    pub reference: Reference,
    /// Members to add
    pub add_values: BTreeSet<Value>,
    /// Members to remove
    pub delete_values: BTreeSet<Value>,
}

impl SetChange {
    /// Add members to the set at `reference`
    pub fn add(reference: Reference, values: impl IntoIterator<Item = Value>) -> Self {
        SetChange {
            reference,
            add_values: values.into_iter().collect(),
            delete_values: BTreeSet::new(),
        }
    }

    /// Builder-style removal
    pub fn remove(mut self, values: impl IntoIterator<Item = Value>) -> Self {
        self.delete_values.extend(values);
        self
    }
}

/// Map entry edit
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MapChange {
    /// Map reference
    pub reference: Reference,
    /// Entries to put
    pub values_to_add: BTreeMap<Value, Value>,
    /// Keys to remove
    pub keys_to_delete: BTreeSet<Value>,
}

/// Append to an incrementing map
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IncMapChange {
    /// Incrementing map reference
    pub reference: Reference,
    /// Values to append under fresh keys
    pub add_values: Vec<Value>,
}

/// Keys the store assigned to an incrementing map append
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IncMapAddition {
    /// Incrementing map reference
    pub reference: Reference,
    /// Assigned keys, in the order of the appended values
    pub keys: Vec<u64>,
    /// Appended values
    pub values: Vec<Value>,
}

/// One rewritten index entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum IndexChange {
    /// Entry written with a new value
    Update {
        /// Index descriptor bytes
        index: Vec<u8>,
        /// New index value
        value: Vec<u8>,
        /// Value that was replaced, if any
        previous: Option<Vec<u8>>,
    },
    /// Entry removed
    Delete {
        /// Index descriptor bytes
        index: Vec<u8>,
        /// Removed index value
        value: Vec<u8>,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_targets() {
        let change = Change::Change(vec![
            (Reference::property(1), Value::from("a")),
            (Reference::property(2), Value::Int(1)),
        ]);
        assert_eq!(change.targets().len(), 2);
        assert!(Change::SoftDelete(true).targets().is_empty());
    }

    #[test]
    fn test_derived() {
        assert!(Change::ObjectCreate.is_derived());
        assert!(Change::IndexChange(vec![]).is_derived());
        assert!(!Change::Delete(vec![]).is_derived());
    }

    #[test]
    fn test_list_change_builder() {
        let change = ListChange::new(Reference::property(3))
            .remove([Value::from("a")])
            .insert(0, Value::from("b"))
            .append([Value::from("c")]);
        assert_eq!(change.delete_values.len(), 1);
        assert_eq!(change.add_values_at_index.get(&0), Some(&Value::from("b")));
        assert_eq!(change.add_values_to_end, vec![Value::from("c")]);
    }
}
