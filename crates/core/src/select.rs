//! Field selection
//!
//! A [`SelectGraph`] limits reads to a subset of a record's properties.
//! Selecting an embedded property without a sub-graph selects all of its
//! fields; with a sub-graph only the listed fields are read.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::reference::{Reference, Segment};
use crate::value::{Value, Values};

/// Tree of selected properties
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SelectGraph {
    properties: BTreeMap<u32, Option<SelectGraph>>,
}

impl SelectGraph {
    /// Empty selection
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style selection of a whole property
    pub fn with(mut self, index: u32) -> Self {
        self.properties.insert(index, None);
        self
    }

    /// Builder-style selection of some fields of an embedded property
    pub fn with_graph(mut self, index: u32, graph: SelectGraph) -> Self {
        self.properties.insert(index, Some(graph));
        self
    }

    /// Check if a reference lies inside the selection
    pub fn contains(&self, reference: &Reference) -> bool {
        let mut graph = self;
        for segment in reference.segments() {
            match segment {
                Segment::Property(i) => match graph.properties.get(i) {
                    Some(Some(sub)) => graph = sub,
                    Some(None) => return true,
                    None => return false,
                },
                // Structural segments below a selected property are selected.
                _ => return true,
            }
        }
        true
    }

    /// Restrict values to the selection
    pub fn apply(&self, values: &Values) -> Values {
        values
            .iter()
            .filter_map(|(index, value)| match self.properties.get(&index)? {
                None => Some((index, value.clone())),
                Some(sub) => match value {
                    Value::Embed(fields) => Some((index, Value::Embed(sub.apply(fields)))),
                    other => Some((index, other.clone())),
                },
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_contains_nested() {
        let graph = SelectGraph::new()
            .with(1)
            .with_graph(3, SelectGraph::new().with(2));
        assert!(graph.contains(&Reference::property(1)));
        assert!(graph.contains(&Reference::property(1).list_item(4)));
        assert!(graph.contains(&Reference::property(3).field(2)));
        assert!(!graph.contains(&Reference::property(3).field(1)));
        assert!(!graph.contains(&Reference::property(2)));
    }

    #[test]
    fn test_apply() {
        let values = Values::new()
            .with(1, "a")
            .with(2, 5i64)
            .with(3, Values::new().with(1, "x").with(2, "y"));
        let graph = SelectGraph::new()
            .with(1)
            .with_graph(3, SelectGraph::new().with(2));
        let selected = graph.apply(&values);
        assert_eq!(
            selected,
            Values::new()
                .with(1, "a")
                .with(3, Values::new().with(2, "y"))
        );
    }
}
