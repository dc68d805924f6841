//! Namespaces
//!
//! Every data model owns one keyspace per [`ColumnFamily`]. Namespaces are
//! physically separate ordered maps, so index and unique entries of
//! different models never interleave.

use std::fmt;

/// Keyspace kind within a model
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ColumnFamily {
    /// Key to creation version
    Existence,
    /// Latest value of every qualifier
    Table,
    /// Per-version qualifier history
    HistoricTable,
    /// Secondary index entries
    Index,
    /// Per-version index membership
    HistoricIndex,
    /// Unique value bindings
    Unique,
    /// Per-version unique binding history
    HistoricUnique,
}

impl ColumnFamily {
    /// Every column family
    pub const ALL: [ColumnFamily; 7] = [
        ColumnFamily::Existence,
        ColumnFamily::Table,
        ColumnFamily::HistoricTable,
        ColumnFamily::Index,
        ColumnFamily::HistoricIndex,
        ColumnFamily::Unique,
        ColumnFamily::HistoricUnique,
    ];

    /// Check if this family mirrors another one historically
    pub fn is_historic(&self) -> bool {
        matches!(
            self,
            ColumnFamily::HistoricTable | ColumnFamily::HistoricIndex | ColumnFamily::HistoricUnique
        )
    }

    /// Short name
    pub fn name(&self) -> &'static str {
        match self {
            ColumnFamily::Existence => "existence",
            ColumnFamily::Table => "table",
            ColumnFamily::HistoricTable => "historic_table",
            ColumnFamily::Index => "index",
            ColumnFamily::HistoricIndex => "historic_index",
            ColumnFamily::Unique => "unique",
            ColumnFamily::HistoricUnique => "historic_unique",
        }
    }
}

/// A model's keyspace of one column family
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Namespace {
    /// Model identifier
    pub model_id: u32,
    /// Column family
    pub family: ColumnFamily,
}

impl Namespace {
    /// Create a namespace
    pub const fn new(model_id: u32, family: ColumnFamily) -> Self {
        Namespace { model_id, family }
    }
}

impl fmt::Display for Namespace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.model_id, self.family.name())
    }
}

/// Iteration order of a scan
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Direction {
    /// Ascending key order
    #[default]
    Forward,
    /// Descending key order
    Reverse,
}

/// Smallest key greater than every key starting with `prefix`
///
/// `None` when no such key exists (empty or all-0xFF prefix).
pub fn prefix_end(prefix: &[u8]) -> Option<Vec<u8>> {
    let mut end = prefix.to_vec();
    while let Some(last) = end.pop() {
        if last < u8::MAX {
            end.push(last + 1);
            return Some(end);
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prefix_end() {
        assert_eq!(prefix_end(b"ab"), Some(b"ac".to_vec()));
        assert_eq!(prefix_end(&[0x01, 0xFF]), Some(vec![0x02]));
        assert_eq!(prefix_end(&[0xFF, 0xFF]), None);
        assert_eq!(prefix_end(&[]), None);
    }

    #[test]
    fn test_namespace_display() {
        let ns = Namespace::new(3, ColumnFamily::HistoricIndex);
        assert_eq!(ns.to_string(), "3/historic_index");
        assert!(ns.family.is_historic());
    }
}
