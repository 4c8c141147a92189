//! Configuration options for ConfigDb handles.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Name of the configuration database.
pub const CONFIG_DB: &str = "CONFIG_DB";

/// Key written by the initializer once the database is fully populated.
pub const INIT_INDICATOR: &str = "CONFIG_DB_INITIALIZED";

/// Number of keys examined per scan step by scan-based operations.
pub const SCAN_BATCH_SIZE: usize = 30;

/// Configuration for opening a [`ConfigDb`](crate::ConfigDb).
///
/// # Example
///
/// ```ignore
/// use configdb::{Config, ConfigDb};
///
/// let config = Config {
///     wait_for_init: true,
///     ..Config::default()
/// };
/// let db = ConfigDb::open(connector, &databases, config).await?;
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Config {
    /// Logical database to connect to. Determines the key separator and the
    /// keyspace notification channel.
    #[serde(default = "default_db_name")]
    pub db_name: String,

    /// Block in connect until the initialization marker is set.
    ///
    /// The wait has no timeout. If the store never publishes keyspace
    /// notifications and the marker is not already set, connect never
    /// returns.
    #[serde(default)]
    pub wait_for_init: bool,

    /// Keep retrying when the connection attempt fails.
    #[serde(default)]
    pub retry_on_failure: bool,

    /// Pause between connection attempts when retrying.
    #[serde(with = "humantime_serde", default = "default_retry_interval")]
    pub retry_interval: Duration,

    /// Keys examined per scan step by table deletion and bulk reads.
    #[serde(default = "default_scan_batch_size")]
    pub scan_batch_size: usize,

    /// Key of the initialization marker.
    #[serde(default = "default_init_indicator")]
    pub init_indicator: String,
}

fn default_db_name() -> String {
    CONFIG_DB.to_string()
}

fn default_retry_interval() -> Duration {
    Duration::from_secs(1)
}

fn default_scan_batch_size() -> usize {
    SCAN_BATCH_SIZE
}

fn default_init_indicator() -> String {
    INIT_INDICATOR.to_string()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            db_name: default_db_name(),
            wait_for_init: false,
            retry_on_failure: false,
            retry_interval: default_retry_interval(),
            scan_batch_size: default_scan_batch_size(),
            init_indicator: default_init_indicator(),
        }
    }
}
