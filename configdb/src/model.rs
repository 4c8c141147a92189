//! Data types for ConfigDb operations.

use std::collections::BTreeMap;

pub use common::FieldValues;

/// Entries of one table, keyed by row key.
pub type TableData = BTreeMap<String, FieldValues>;

/// Tables of a configuration snapshot, keyed by upper-cased table name.
pub type ConfigData = BTreeMap<String, TableData>;

/// A row key made of one or more components.
///
/// Multi-key tables store their rows under a single string in which the
/// components are joined by the key separator. The joined form carries no
/// escaping: a component that itself contains the separator cannot be told
/// apart from two components once joined, so [`split`](Self::split) of a
/// [`join`](Self::join) only round-trips when no component contains the
/// separator.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct CompositeKey {
    parts: Vec<String>,
}

impl CompositeKey {
    /// Creates a key from its components, in order.
    pub fn new<I, S>(parts: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            parts: parts.into_iter().map(Into::into).collect(),
        }
    }

    /// Splits a stored row key at every occurrence of the separator.
    pub fn split(key: &str, separator: &str) -> Self {
        Self::new(key.split(separator))
    }

    /// Joins the components with the separator into a stored row key.
    pub fn join(&self, separator: &str) -> String {
        self.parts.join(separator)
    }

    pub fn parts(&self) -> &[String] {
        &self.parts
    }

    /// Returns true for keys with more than one component.
    pub fn is_composite(&self) -> bool {
        self.parts.len() > 1
    }
}

impl From<&str> for CompositeKey {
    fn from(key: &str) -> Self {
        Self::new([key])
    }
}
