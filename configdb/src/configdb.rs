//! Core ConfigDb implementation with read and write APIs.

use std::sync::Arc;

use async_trait::async_trait;
use common::{Connector, DatabaseConfig, DatabaseInfo, Store};

use crate::config::Config;
use crate::error::{Error, Result};
use crate::init::InitGate;
use crate::model::{ConfigData, FieldValues, TableData};
use crate::reader::{ConfigDbReader, ConfigRead};
use crate::serde::KeyCodec;
use crate::storage::ConfigDbStorage;

/// Resolves the configured database, connects to it and, if requested,
/// waits for its initialization marker.
pub(crate) async fn open_store(
    connector: &dyn Connector,
    databases: &DatabaseConfig,
    config: &Config,
) -> Result<(Arc<dyn Store>, DatabaseInfo)> {
    let database = databases.database(&config.db_name)?;
    let instance = databases.instance(&database)?;
    tracing::debug!(
        db = %database.name,
        id = database.id,
        host = %instance.hostname,
        port = instance.port,
        "Connecting to database"
    );

    let store = loop {
        match connector.connect(&database).await {
            Ok(store) => break store,
            Err(err) if config.retry_on_failure => {
                tracing::warn!(
                    db = %database.name,
                    error = %err,
                    retry_in = ?config.retry_interval,
                    "Failed to connect, retrying"
                );
                tokio::time::sleep(config.retry_interval).await;
            }
            Err(err) => {
                return Err(Error::Connection(format!(
                    "failed to connect to {}: {}",
                    database.name, err
                )));
            }
        }
    };

    if config.wait_for_init {
        InitGate::new(Arc::clone(&store), config.init_indicator.as_str())
            .wait()
            .await?;
    }
    Ok((store, database))
}

/// The main configuration database interface providing read and write
/// operations.
///
/// `ConfigDb` projects tables of entries onto the flat keyspace of one
/// logical database. Each entry is stored as a hash under
/// `UPPER(table) + separator + key`, where the separator comes from the
/// database's configuration.
///
/// # Read Operations
///
/// Read operations are provided via the [`ConfigRead`] trait, which `ConfigDb`
/// implements. This allows generic code to work with either `ConfigDb` or
/// [`ConfigDbReader`].
///
/// # Write Semantics
///
/// [`set_entry`](Self::set_entry) replaces an entry, [`mod_entry`](Self::mod_entry)
/// and [`mod_config`](Self::mod_config) merge into it. Writing an empty field
/// map deletes the entry in every case.
///
/// # Example
///
/// ```ignore
/// use configdb::{ConfigDb, ConfigRead};
///
/// let db = ConfigDb::connect(&connector, &databases, true, false).await?;
///
/// db.set_entry("PORT", "Ethernet0", &fields).await?;
/// let entry = db.get_entry("PORT", "Ethernet0").await?;
///
/// db.delete_table("PORT").await?;
/// ```
pub struct ConfigDb {
    storage: ConfigDbStorage,
    db_name: String,
}

impl ConfigDb {
    /// Connects to `CONFIG_DB` with default options.
    ///
    /// # Arguments
    ///
    /// * `connector` - Opens sessions to the store.
    /// * `databases` - Database config resolving names to ids and separators.
    /// * `wait_for_init` - Block until the initialization marker is set.
    /// * `retry_on_failure` - Keep retrying failed connection attempts.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if `CONFIG_DB` is not configured and
    /// [`Error::Connection`] if the store cannot be reached and retrying is
    /// off.
    pub async fn connect(
        connector: &dyn Connector,
        databases: &DatabaseConfig,
        wait_for_init: bool,
        retry_on_failure: bool,
    ) -> Result<Self> {
        let config = Config {
            wait_for_init,
            retry_on_failure,
            ..Config::default()
        };
        Self::open(connector, databases, config).await
    }

    /// Connects to the database named in `config`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if the database or its instance is not
    /// configured and [`Error::Connection`] if the store cannot be reached
    /// and retrying is off.
    pub async fn open(
        connector: &dyn Connector,
        databases: &DatabaseConfig,
        config: Config,
    ) -> Result<Self> {
        let (store, database) = open_store(connector, databases, &config).await?;
        Ok(Self::new(store, &database, &config))
    }

    /// Creates a ConfigDb over an already established store session.
    ///
    /// Waits for the initialization marker if `config.wait_for_init` is set.
    pub async fn from_store(
        store: Arc<dyn Store>,
        database: &DatabaseInfo,
        config: Config,
    ) -> Result<Self> {
        if config.wait_for_init {
            InitGate::new(Arc::clone(&store), config.init_indicator.as_str())
                .wait()
                .await?;
        }
        Ok(Self::new(store, database, &config))
    }

    fn new(store: Arc<dyn Store>, database: &DatabaseInfo, config: &Config) -> Self {
        Self {
            storage: ConfigDbStorage::new(
                store,
                KeyCodec::new(database.separator.as_str()),
                config.scan_batch_size,
                config.init_indicator.as_str(),
            ),
            db_name: database.name.clone(),
        }
    }

    /// Name of the database this handle is bound to.
    pub fn db_name(&self) -> &str {
        &self.db_name
    }

    /// Writes an entry, replacing all of its fields.
    ///
    /// Stored fields not present in `data` are removed. An empty `data`
    /// deletes the entry.
    pub async fn set_entry(&self, table: &str, key: &str, data: &FieldValues) -> Result<()> {
        self.storage.set_entry(table, key, data).await
    }

    /// Writes the given fields of an entry, keeping its other fields.
    ///
    /// An empty `data` deletes the entry.
    pub async fn mod_entry(&self, table: &str, key: &str, data: &FieldValues) -> Result<()> {
        self.storage.mod_entry(table, key, data).await
    }

    /// Deletes every entry of a table. No-op if the table is empty.
    pub async fn delete_table(&self, table: &str) -> Result<()> {
        self.storage.delete_table(table).await
    }

    /// Applies changes to several tables in one batch.
    ///
    /// A table mapped to an empty map is deleted. Otherwise each entry is
    /// merged with [`mod_entry`](Self::mod_entry) semantics. Tables not
    /// mentioned are left alone.
    pub async fn mod_config(&self, data: &ConfigData) -> Result<()> {
        self.storage.mod_config(data).await
    }

    /// Returns a read-only view sharing this handle's session.
    pub fn reader(&self) -> ConfigDbReader {
        ConfigDbReader::new(self.storage.as_read())
    }

    /// Closes the session. Stored data is not affected.
    pub async fn close(self) -> Result<()> {
        self.storage.close().await
    }
}

#[async_trait]
impl ConfigRead for ConfigDb {
    fn key_separator(&self) -> &str {
        self.storage.as_read_ref().key_separator()
    }

    async fn get_entry(&self, table: &str, key: &str) -> Result<FieldValues> {
        self.storage.as_read_ref().get_entry(table, key).await
    }

    async fn get_keys(&self, table: &str, split: bool) -> Result<Vec<String>> {
        self.storage.as_read_ref().get_keys(table, split).await
    }

    async fn get_table(&self, table: &str) -> Result<TableData> {
        self.storage.as_read_ref().get_table(table).await
    }

    async fn get_config(&self) -> Result<ConfigData> {
        self.storage.as_read_ref().get_config().await
    }
}
