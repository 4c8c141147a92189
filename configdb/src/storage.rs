//! ConfigDb-specific storage wrappers.
//!
//! This module provides [`ConfigDbStorage`] and [`ConfigDbStorageRead`] which
//! wrap a store session with key encoding and the table entry semantics:
//!
//! - **Replace** ([`ConfigDbStorage::set_entry`]): the stored entry ends up
//!   holding exactly the given fields. Fields missing from the input are
//!   deleted.
//! - **Merge** ([`ConfigDbStorage::mod_entry`], [`ConfigDbStorage::mod_config`]):
//!   the given fields are written, all other stored fields are kept.
//!
//! Under both policies an empty field map deletes the entry, and a missing
//! entry reads back as an empty map.

use std::collections::BTreeSet;
use std::sync::Arc;

use common::{Command, FieldValues, Store};

use crate::error::Result;
use crate::model::{ConfigData, TableData};
use crate::pipeline::{BatchPipeline, read_config};
use crate::serde::KeyCodec;

/// Builds the merge-only write for one entry: `DEL` for empty data,
/// otherwise `HMSET` of the given fields.
fn merge_command(flat_key: String, data: &FieldValues) -> Command {
    if data.is_empty() {
        Command::Del(flat_key)
    } else {
        Command::HMSet(flat_key, data.clone())
    }
}

/// Read-only table operations.
#[derive(Clone)]
pub(crate) struct ConfigDbStorageRead {
    store: Arc<dyn Store>,
    codec: KeyCodec,
    scan_batch_size: usize,
    init_indicator: String,
}

impl ConfigDbStorageRead {
    pub(crate) fn key_separator(&self) -> &str {
        self.codec.separator()
    }

    /// Reads all fields of an entry. Missing entries read as empty.
    pub(crate) async fn get_entry(&self, table: &str, key: &str) -> Result<FieldValues> {
        let flat_key = self.codec.encode_key(table, key);
        Ok(self.store.hgetall(&flat_key).await?)
    }

    /// Lists the keys of a table.
    ///
    /// With `split` the row keys are returned, otherwise the full flat keys.
    pub(crate) async fn get_keys(&self, table: &str, split: bool) -> Result<Vec<String>> {
        let keys = self.store.keys(&self.codec.table_pattern(table)).await?;
        if !split {
            return Ok(keys);
        }
        Ok(keys
            .iter()
            .map(|key| self.codec.row_key(key).to_string())
            .collect())
    }

    /// Reads a whole table.
    ///
    /// Keys that do not decode and entries that vanish between listing and
    /// reading are skipped.
    pub(crate) async fn get_table(&self, table: &str) -> Result<TableData> {
        let keys = self.store.keys(&self.codec.table_pattern(table)).await?;
        let mut data = TableData::new();
        for flat_key in keys {
            let row = match self.codec.decode_key(&flat_key) {
                Ok((_, row)) => row.to_string(),
                Err(err) => {
                    tracing::trace!(key = %flat_key, error = %err, "Skipping key");
                    continue;
                }
            };
            let fields = self.store.hgetall(&flat_key).await?;
            if !fields.is_empty() {
                data.insert(row, fields);
            }
        }
        tracing::debug!(table = %table, entries = data.len(), "Read table");
        Ok(data)
    }

    /// Reads every table of the database with pipelined scans.
    pub(crate) async fn get_config(&self) -> Result<ConfigData> {
        let data = read_config(
            Arc::clone(&self.store),
            &self.codec,
            self.scan_batch_size,
            &self.init_indicator,
        )
        .await?;
        tracing::debug!(tables = data.len(), "Read config");
        Ok(data)
    }
}

/// Read-write table operations.
#[derive(Clone)]
pub(crate) struct ConfigDbStorage {
    read: ConfigDbStorageRead,
}

impl ConfigDbStorage {
    /// Creates a new storage wrapper over a store session.
    pub(crate) fn new(
        store: Arc<dyn Store>,
        codec: KeyCodec,
        scan_batch_size: usize,
        init_indicator: impl Into<String>,
    ) -> Self {
        Self {
            read: ConfigDbStorageRead {
                store,
                codec,
                scan_batch_size,
                init_indicator: init_indicator.into(),
            },
        }
    }

    /// Creates a new storage with an in-memory backend.
    #[cfg(test)]
    pub(crate) fn in_memory() -> Self {
        use common::storage::in_memory::InMemoryStore;
        Self::new(
            Arc::new(InMemoryStore::new(4)),
            KeyCodec::new("|"),
            crate::config::SCAN_BATCH_SIZE,
            crate::config::INIT_INDICATOR,
        )
    }

    /// Returns a read-only view of this storage.
    pub(crate) fn as_read(&self) -> ConfigDbStorageRead {
        self.read.clone()
    }

    pub(crate) fn as_read_ref(&self) -> &ConfigDbStorageRead {
        &self.read
    }

    fn store(&self) -> &Arc<dyn Store> {
        &self.read.store
    }

    fn codec(&self) -> &KeyCodec {
        &self.read.codec
    }

    /// Replaces an entry with exactly the given fields.
    ///
    /// Reads the stored fields first, so a concurrent writer touching the
    /// same entry between the read and the writes can leave extra fields
    /// behind or lose its own.
    pub(crate) async fn set_entry(&self, table: &str, key: &str, data: &FieldValues) -> Result<()> {
        let flat_key = self.codec().encode_key(table, key);
        if data.is_empty() {
            self.store().del(&flat_key).await?;
            return Ok(());
        }

        let existing = self.store().hgetall(&flat_key).await?;
        self.store().hmset(&flat_key, data).await?;

        let stale: Vec<String> = existing
            .into_keys()
            .filter(|field| !data.contains_key(field))
            .collect();
        if !stale.is_empty() {
            tracing::trace!(key = %flat_key, fields = ?stale, "Pruning fields");
            self.store().hdel(&flat_key, &stale).await?;
        }
        Ok(())
    }

    /// Merges the given fields into an entry, or deletes it when `data` is
    /// empty.
    pub(crate) async fn mod_entry(&self, table: &str, key: &str, data: &FieldValues) -> Result<()> {
        let flat_key = self.codec().encode_key(table, key);
        if data.is_empty() {
            self.store().del(&flat_key).await?;
        } else {
            self.store().hmset(&flat_key, data).await?;
        }
        Ok(())
    }

    /// Deletes every entry of a table.
    pub(crate) async fn delete_table(&self, table: &str) -> Result<()> {
        let mut pipeline = BatchPipeline::new(Arc::clone(self.store()));
        let queued = pipeline
            .enqueue_deletes(&self.codec().table_pattern(table), self.read.scan_batch_size)
            .await?;
        pipeline.execute().await?;
        let failed = pipeline.discard_replies();
        if failed > 0 {
            tracing::warn!(
                table = %table,
                failed,
                keys = queued,
                "Some keys of a table were not deleted"
            );
        }
        tracing::debug!(table = %table, keys = queued, "Deleted table");
        Ok(())
    }

    /// Applies a multi-table change in one pipelined batch.
    ///
    /// A table mapped to no entries is deleted as a whole. Otherwise each
    /// entry is merged, or deleted when its field map is empty. Per-command
    /// failures are logged and do not fail the call.
    pub(crate) async fn mod_config(&self, data: &ConfigData) -> Result<()> {
        let mut pipeline = BatchPipeline::new(Arc::clone(self.store()));
        let mut deleted_tables = BTreeSet::new();
        for (table, entries) in data {
            if entries.is_empty() {
                pipeline
                    .enqueue_deletes(&self.codec().table_pattern(table), self.read.scan_batch_size)
                    .await?;
                deleted_tables.insert(table.as_str());
                continue;
            }
            for (key, fields) in entries {
                pipeline.enqueue(merge_command(self.codec().encode_key(table, key), fields));
            }
        }

        let commands = pipeline.len();
        pipeline.execute().await?;
        let failed = pipeline.discard_replies();
        if failed > 0 {
            tracing::warn!(failed, commands, "Some commands of a config update failed");
        }
        tracing::debug!(
            tables = data.len(),
            deleted_tables = ?deleted_tables,
            commands,
            "Modified config"
        );
        Ok(())
    }

    pub(crate) async fn close(&self) -> Result<()> {
        Ok(self.store().close().await?)
    }
}
