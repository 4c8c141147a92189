//! Key encoding and decoding between (table, key) pairs and flat store keys.
//!
//! ```text
//! Flat key: | UPPER(table) | separator | key |
//! ```
//!
//! Decoding splits at the first separator. Nothing is escaped, so a table
//! name containing the separator does not survive a round trip: its tail is
//! moved into the key.

use crate::error::{Error, Result};

/// Wildcard matching any suffix in store patterns.
pub const WILDCARD: &str = "*";

/// Maps (table, key) pairs to flat keys for one database.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyCodec {
    separator: String,
}

impl KeyCodec {
    /// Creates a codec for the given separator.
    pub fn new(separator: impl Into<String>) -> Self {
        Self {
            separator: separator.into(),
        }
    }

    pub fn separator(&self) -> &str {
        &self.separator
    }

    /// Encodes a table entry as `UPPER(table) + separator + key`.
    ///
    /// Only ASCII letters are upper-cased; other characters pass through
    /// unchanged so the table keeps its byte length.
    pub fn encode_key(&self, table: &str, key: &str) -> String {
        let table = table.to_ascii_uppercase();
        let mut flat = String::with_capacity(table.len() + self.separator.len() + key.len());
        flat.push_str(&table);
        flat.push_str(&self.separator);
        flat.push_str(key);
        flat
    }

    /// Splits a flat key at the first separator into `(table, key)`.
    ///
    /// Fails for keys without a separator, which belong to no table.
    pub fn decode_key<'a>(&self, flat_key: &'a str) -> Result<(&'a str, &'a str)> {
        flat_key.split_once(self.separator.as_str()).ok_or_else(|| {
            Error::Encoding(format!(
                "key {:?} does not contain separator {:?}",
                flat_key, self.separator
            ))
        })
    }

    /// Returns the key part of a flat key, or an empty string if the key has
    /// no separator.
    pub fn row_key<'a>(&self, flat_key: &'a str) -> &'a str {
        self.decode_key(flat_key).map(|(_, key)| key).unwrap_or("")
    }

    /// Returns the pattern matching every flat key of a table.
    pub fn table_pattern(&self, table: &str) -> String {
        self.encode_key(table, WILDCARD)
    }
}
