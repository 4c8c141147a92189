pub mod config;
pub mod in_memory;
pub mod util;

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;

use crate::storage::config::DatabaseInfo;

/// Field/value mapping held by a single hash key.
pub type FieldValues = BTreeMap<String, String>;

/// Cursor that starts a scan. A scan is complete when the store hands it back.
pub const SCAN_START: u64 = 0;

/// A single store command that can be queued into a pipelined batch.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Command {
    /// Reads a string value.
    Get(String),
    /// Reads every field of a hash.
    HGetAll(String),
    /// Writes the given fields into a hash, creating it if needed.
    HMSet(String, FieldValues),
    /// Removes the given fields from a hash.
    HDel(String, Vec<String>),
    /// Removes a key of any type.
    Del(String),
}

impl Command {
    /// Returns the key the command operates on.
    pub fn key(&self) -> &str {
        match self {
            Command::Get(key)
            | Command::HGetAll(key)
            | Command::HMSet(key, _)
            | Command::HDel(key, _)
            | Command::Del(key) => key,
        }
    }

    /// Returns the command name as the store spells it.
    pub fn name(&self) -> &'static str {
        match self {
            Command::Get(_) => "GET",
            Command::HGetAll(_) => "HGETALL",
            Command::HMSet(_, _) => "HMSET",
            Command::HDel(_, _) => "HDEL",
            Command::Del(_) => "DEL",
        }
    }
}

/// Reply to one command of a pipelined batch.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Reply {
    Status(String),
    Integer(i64),
    Nil,
    Value(String),
    Hash(FieldValues),
    /// Per-command failure. Other commands of the batch are unaffected.
    Error(String),
}

/// A message delivered to a pattern subscription.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Notification {
    /// The pattern the subscription was registered with.
    pub pattern: String,
    /// The channel the message was published on, e.g. `__keyspace@4__:KEY`.
    pub channel: String,
    /// The message body. For keyspace notifications this is the event name.
    pub payload: String,
}

impl Notification {
    /// Returns the key part of a keyspace channel, i.e. everything after
    /// the first `:`.
    pub fn key(&self) -> Option<&str> {
        self.channel.split_once(':').map(|(_, key)| key)
    }
}

/// What a [`Subscription`] delivers.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Message {
    /// A message published on a channel matching the subscription.
    Notification(Notification),
    /// The subscriber fell behind and `skipped` matching messages were
    /// dropped. Any state derived from the lost messages must be re-read.
    Lagged { skipped: u64 },
}

/// Error type for store operations
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// The store could not be reached or the session was lost
    Connection(String),
    /// Errors reported by the store for a command
    Storage(String),
    /// Invalid or incomplete database configuration
    Config(String),
    /// Internal errors
    Internal(String),
}

impl std::error::Error for StoreError {}

impl std::fmt::Display for StoreError {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            StoreError::Connection(msg) => write!(f, "Connection error: {}", msg),
            StoreError::Storage(msg) => write!(f, "Storage error: {}", msg),
            StoreError::Config(msg) => write!(f, "Config error: {}", msg),
            StoreError::Internal(msg) => write!(f, "Internal error: {}", msg),
        }
    }
}

impl StoreError {
    /// Converts a store error to StoreError::Storage.
    pub fn from_storage(e: impl std::fmt::Display) -> Self {
        StoreError::Storage(e.to_string())
    }
}

/// Result type alias for store operations
pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Read operations of the flat hash store.
#[async_trait]
pub trait StoreRead: Send + Sync {
    /// Returns the string value of a key, or `None` if it does not exist.
    async fn get(&self, key: &str) -> StoreResult<Option<String>>;

    /// Returns all fields of a hash. A missing key reads as an empty map.
    async fn hgetall(&self, key: &str) -> StoreResult<FieldValues>;

    /// Returns every key matching a glob pattern in one call.
    async fn keys(&self, pattern: &str) -> StoreResult<Vec<String>>;

    /// Runs one step of a cursor scan.
    ///
    /// Starting from `cursor` (use [`SCAN_START`] for a new scan), examines
    /// roughly `count` keys and returns the ones matching `pattern` together
    /// with the cursor to continue from. A returned cursor equal to
    /// [`SCAN_START`] means the scan is complete.
    ///
    /// Keys present for the whole duration of a scan are returned at least
    /// once. Keys added or removed while the scan is in progress may or may
    /// not be returned.
    async fn scan(&self, cursor: u64, pattern: &str, count: usize)
    -> StoreResult<(u64, Vec<String>)>;
}

/// A live pattern subscription on the store's publish/subscribe channel.
#[async_trait]
pub trait Subscription: Send {
    /// Waits for the next message on a channel matching the subscription.
    ///
    /// There is no timeout: if nothing is ever published this never returns.
    /// Dropped messages are reported as [`Message::Lagged`] rather than
    /// skipped silently.
    async fn next_message(&mut self) -> StoreResult<Message>;

    /// Cancels the pattern subscription.
    async fn punsubscribe(&mut self) -> StoreResult<()>;
}

/// A session on one logical database of the store.
#[async_trait]
pub trait Store: StoreRead {
    /// Returns the numeric id of the logical database this session selected.
    fn db_id(&self) -> u32;

    /// Sets a string value.
    async fn set(&self, key: &str, value: &str) -> StoreResult<()>;

    /// Writes fields into a hash, leaving other fields untouched.
    async fn hmset(&self, key: &str, fields: &FieldValues) -> StoreResult<()>;

    /// Removes fields from a hash and returns how many were removed.
    async fn hdel(&self, key: &str, fields: &[String]) -> StoreResult<i64>;

    /// Removes a key and returns how many keys were removed.
    async fn del(&self, key: &str) -> StoreResult<i64>;

    /// Transmits a batch of commands in one round trip.
    ///
    /// Replies are returned in the order the commands were given. A failing
    /// command yields a [`Reply::Error`] in its slot; only transport-level
    /// failures fail the whole call.
    async fn execute(&self, commands: Vec<Command>) -> StoreResult<Vec<Reply>>;

    /// Subscribes to every channel matching a glob pattern.
    async fn psubscribe(&self, pattern: &str) -> StoreResult<Box<dyn Subscription>>;

    /// Closes the session. Persisted data is unaffected.
    async fn close(&self) -> StoreResult<()>;
}

/// Opens store sessions for databases described by a
/// [`DatabaseConfig`](config::DatabaseConfig).
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self, database: &DatabaseInfo) -> StoreResult<Arc<dyn Store>>;
}
