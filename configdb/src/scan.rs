//! Cursor-driven enumeration of flat keys.
//!
//! [`CursorScanner`] walks the keyspace one bounded `SCAN` step at a time so
//! that large tables are never listed in a single blocking call. Results are
//! weakly consistent: a key present for the whole scan is returned at least
//! once, while keys created or deleted during the scan may be missed or seen
//! more than once. Callers must tolerate both.

use std::sync::Arc;

use common::{SCAN_START, StoreRead};

use crate::error::Result;

/// Iterates over batches of keys matching a pattern.
pub(crate) struct CursorScanner {
    store: Arc<dyn StoreRead>,
    pattern: String,
    batch_size: usize,
    cursor: u64,
    done: bool,
}

impl CursorScanner {
    /// Creates a scanner positioned at the start of the keyspace.
    pub(crate) fn new(
        store: Arc<dyn StoreRead>,
        pattern: impl Into<String>,
        batch_size: usize,
    ) -> Self {
        Self {
            store,
            pattern: pattern.into(),
            batch_size,
            cursor: SCAN_START,
            done: false,
        }
    }

    /// Returns the next batch of matching keys, or `None` once the store has
    /// signalled the end of the scan. Batches may be empty.
    pub(crate) async fn next_batch(&mut self) -> Result<Option<Vec<String>>> {
        if self.done {
            return Ok(None);
        }
        let (next, keys) = self
            .store
            .scan(self.cursor, &self.pattern, self.batch_size)
            .await?;
        tracing::trace!(
            pattern = %self.pattern,
            cursor = self.cursor,
            next = next,
            keys = keys.len(),
            "Scanned batch"
        );
        self.cursor = next;
        self.done = next == SCAN_START;
        Ok(Some(keys))
    }

    /// Drives the scan to completion and returns every key it produced.
    #[cfg(test)]
    pub(crate) async fn collect(mut self) -> Result<Vec<String>> {
        let mut keys = Vec::new();
        while let Some(batch) = self.next_batch().await? {
            keys.extend(batch);
        }
        Ok(keys)
    }
}
