//! ConfigDb - A table-structured configuration client over a flat hash store.
//!
//! ConfigDb presents configuration as tables of entries, each entry being a
//! map of string fields, and stores them in a flat key-value store that
//! offers hashes, cursor scans, pipelining and keyspace notifications.
//!
//! # Architecture
//!
//! Every entry lives in one hash whose key is the upper-cased table name,
//! the database's separator and the entry key, e.g. `PORT|Ethernet0`.
//! Tables have no representation of their own: a table is the set of keys
//! sharing its prefix. Bulk operations walk that prefix with bounded scan
//! steps and send their commands as pipelined batches, so large tables are
//! neither listed nor modified in one blocking call.
//!
//! # Key Concepts
//!
//! - **ConfigDb**: The main entry point providing both read and write operations.
//! - **ConfigDbReader**: A read-only view of the database, useful for consumers
//!   that should not have write access.
//! - **ConfigRead**: Trait defining read operations shared by both types.
//! - **InitGate**: Startup wait on the initialization marker, driven by
//!   keyspace notifications instead of polling.
//!
//! # Example
//!
//! ```ignore
//! use common::DatabaseConfig;
//! use common::storage::in_memory::InMemoryInstance;
//! use configdb::{ConfigDb, ConfigRead, FieldValues};
//!
//! let databases = DatabaseConfig::load("/var/run/redis/sonic-db/database_config.json")?;
//! let db = ConfigDb::connect(&InMemoryInstance::new(), &databases, false, false).await?;
//!
//! // Replace an entry
//! let fields: FieldValues = [("admin_status".to_string(), "up".to_string())].into();
//! db.set_entry("PORT", "Ethernet0", &fields).await?;
//!
//! // Merge into it
//! let mtu: FieldValues = [("mtu".to_string(), "9100".to_string())].into();
//! db.mod_entry("PORT", "Ethernet0", &mtu).await?;
//!
//! // Read it back
//! let entry = db.get_entry("PORT", "Ethernet0").await?;
//! assert_eq!(entry.len(), 2);
//!
//! // Read everything
//! let config = db.get_config().await?;
//! ```

mod config;
mod configdb;
mod error;
mod init;
mod model;
mod pipeline;
mod reader;
mod scan;
mod serde;
mod storage;

pub use config::{CONFIG_DB, Config, INIT_INDICATOR, SCAN_BATCH_SIZE};
pub use configdb::ConfigDb;
pub use error::{Error, Result};
pub use init::{InitGate, InitState};
pub use model::{CompositeKey, ConfigData, FieldValues, TableData};
pub use reader::{ConfigDbReader, ConfigRead};
pub use serde::KeyCodec;
