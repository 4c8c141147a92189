//! Database configuration.
//!
//! Describes which store instances exist and which logical databases live on
//! them. The file format is the JSON layout used by `database_config.json`:
//!
//! ```json
//! {
//!     "INSTANCES": {
//!         "redis": { "hostname": "127.0.0.1", "port": 6379, "unix_socket_path": "/var/run/redis/redis.sock" }
//!     },
//!     "DATABASES": {
//!         "APPL_DB": { "id": 0, "separator": ":", "instance": "redis" },
//!         "CONFIG_DB": { "id": 4, "separator": "|", "instance": "redis" }
//!     }
//! }
//! ```

use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

use super::{StoreError, StoreResult};

/// Connection endpoint of one store instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstanceInfo {
    pub hostname: String,
    pub port: u16,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unix_socket_path: Option<String>,
}

/// A logical database as it appears in the config file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatabaseEntry {
    pub id: u32,
    pub separator: String,
    pub instance: String,
}

/// A logical database resolved by name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatabaseInfo {
    pub name: String,
    pub id: u32,
    /// Separator between table name and key. Never empty.
    pub separator: String,
    pub instance: String,
}

/// The full set of instances and databases.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatabaseConfig {
    #[serde(rename = "INSTANCES", default)]
    pub instances: BTreeMap<String, InstanceInfo>,
    #[serde(rename = "DATABASES", default)]
    pub databases: BTreeMap<String, DatabaseEntry>,
}

impl DatabaseConfig {
    /// Parses a config from its JSON text.
    pub fn from_json(json: &str) -> StoreResult<Self> {
        serde_json::from_str(json)
            .map_err(|e| StoreError::Config(format!("database config syntax error: {}", e)))
    }

    /// Reads and parses a config file.
    pub fn load(path: impl AsRef<Path>) -> StoreResult<Self> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path).map_err(|e| {
            StoreError::Config(format!(
                "failed to read database config '{}': {}",
                path.display(),
                e
            ))
        })?;
        Self::from_json(&json)
    }

    /// Adds an instance, replacing any instance with the same name.
    pub fn with_instance(mut self, name: impl Into<String>, instance: InstanceInfo) -> Self {
        self.instances.insert(name.into(), instance);
        self
    }

    /// Adds a database, replacing any database with the same name.
    pub fn with_database(
        mut self,
        name: impl Into<String>,
        id: u32,
        separator: impl Into<String>,
        instance: impl Into<String>,
    ) -> Self {
        self.databases.insert(
            name.into(),
            DatabaseEntry {
                id,
                separator: separator.into(),
                instance: instance.into(),
            },
        );
        self
    }

    /// Resolves a database by name.
    pub fn database(&self, name: &str) -> StoreResult<DatabaseInfo> {
        let entry = self
            .databases
            .get(name)
            .ok_or_else(|| StoreError::Config(format!("failed to find {} database", name)))?;
        if entry.separator.is_empty() {
            return Err(StoreError::Config(format!(
                "database {} has an empty separator",
                name
            )));
        }
        Ok(DatabaseInfo {
            name: name.to_string(),
            id: entry.id,
            separator: entry.separator.clone(),
            instance: entry.instance.clone(),
        })
    }

    /// Returns the instance hosting a database.
    pub fn instance(&self, database: &DatabaseInfo) -> StoreResult<&InstanceInfo> {
        self.instances.get(&database.instance).ok_or_else(|| {
            StoreError::Config(format!(
                "failed to find the instance {} for {} database",
                database.instance, database.name
            ))
        })
    }

    /// Returns the separator of the database with the given id.
    pub fn separator_for_id(&self, id: u32) -> StoreResult<&str> {
        self.databases
            .values()
            .find(|db| db.id == id)
            .map(|db| db.separator.as_str())
            .ok_or_else(|| StoreError::Config(format!("failed to find database with id {}", id)))
    }

    /// Returns all database names in sorted order.
    pub fn database_names(&self) -> Vec<&str> {
        self.databases.keys().map(String::as_str).collect()
    }
}
