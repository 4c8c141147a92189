//! Read-only configuration access and the [`ConfigRead`] trait.

use std::sync::Arc;

use async_trait::async_trait;
use common::{Connector, DatabaseConfig, Store};

use crate::config::Config;
use crate::configdb::open_store;
use crate::error::Result;
use crate::model::{CompositeKey, ConfigData, FieldValues, TableData};
use crate::serde::KeyCodec;
use crate::storage::{ConfigDbStorage, ConfigDbStorageRead};

/// Trait for read operations on the configuration database.
///
/// This trait defines the common read interface shared by both
/// [`ConfigDb`](crate::ConfigDb) and [`ConfigDbReader`].
#[async_trait]
pub trait ConfigRead {
    /// Separator between table name and key, and between the components of
    /// a composite key.
    fn key_separator(&self) -> &str;

    /// Reads all fields of an entry. A missing entry reads as an empty map.
    async fn get_entry(&self, table: &str, key: &str) -> Result<FieldValues>;

    /// Lists the keys of a table: row keys when `split` is set, flat store
    /// keys otherwise.
    async fn get_keys(&self, table: &str, split: bool) -> Result<Vec<String>>;

    /// Reads a whole table. A missing table reads as an empty map.
    async fn get_table(&self, table: &str) -> Result<TableData>;

    /// Reads every table of the database.
    ///
    /// Entries are read in batches while the keyspace is scanned, so changes
    /// made concurrently may be observed partially.
    async fn get_config(&self) -> Result<ConfigData>;

    /// Lists the row keys of a table split into their components.
    async fn get_composite_keys(&self, table: &str) -> Result<Vec<CompositeKey>> {
        let keys = self.get_keys(table, true).await?;
        let separator = self.key_separator();
        Ok(keys
            .iter()
            .map(|key| CompositeKey::split(key, separator))
            .collect())
    }
}

/// A read-only view of the configuration database.
///
/// `ConfigDbReader` provides access to all read operations via the
/// [`ConfigRead`] trait, but not write operations.
#[derive(Clone)]
pub struct ConfigDbReader {
    storage: ConfigDbStorageRead,
}

impl ConfigDbReader {
    /// Connects a read-only view to the database named in `config`.
    ///
    /// Honors the retry and wait-for-init options the same way as
    /// [`ConfigDb::open`](crate::ConfigDb::open).
    pub async fn open(
        connector: &dyn Connector,
        databases: &DatabaseConfig,
        config: Config,
    ) -> Result<Self> {
        let (store, database) = open_store(connector, databases, &config).await?;
        Ok(Self::from_store(store, KeyCodec::new(database.separator), &config))
    }

    fn from_store(store: Arc<dyn Store>, codec: KeyCodec, config: &Config) -> Self {
        let storage = ConfigDbStorage::new(
            store,
            codec,
            config.scan_batch_size,
            config.init_indicator.as_str(),
        );
        Self::new(storage.as_read())
    }

    pub(crate) fn new(storage: ConfigDbStorageRead) -> Self {
        Self { storage }
    }
}

#[async_trait]
impl ConfigRead for ConfigDbReader {
    fn key_separator(&self) -> &str {
        self.storage.key_separator()
    }

    async fn get_entry(&self, table: &str, key: &str) -> Result<FieldValues> {
        self.storage.get_entry(table, key).await
    }

    async fn get_keys(&self, table: &str, split: bool) -> Result<Vec<String>> {
        self.storage.get_keys(table, split).await
    }

    async fn get_table(&self, table: &str) -> Result<TableData> {
        self.storage.get_table(table).await
    }

    async fn get_config(&self) -> Result<ConfigData> {
        self.storage.get_config().await
    }
}
