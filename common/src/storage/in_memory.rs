use std::collections::{BTreeMap, HashMap};
use std::ops::Bound;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock, RwLockReadGuard, RwLockWriteGuard};

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;

use super::config::DatabaseInfo;
use super::util::{glob_match, keyspace_channel};
use super::{
    Command, Connector, FieldValues, Message, Notification, Reply, SCAN_START, Store, StoreError,
    StoreRead, StoreResult, Subscription,
};

const WRONGTYPE: &str = "WRONGTYPE Operation against a key holding the wrong kind of value";

/// Matching notifications buffered per subscription before newer ones are
/// dropped and reported as lag.
const EVENT_CHANNEL_CAPACITY: usize = 4096;

/// Unfinished scans remembered at once. Past this, the oldest cursor is
/// forgotten and resuming it fails with an invalid cursor error.
const MAX_OPEN_CURSORS: usize = 1024;

#[derive(Clone, Debug)]
enum StoredValue {
    String(String),
    Hash(FieldValues),
}

#[derive(Debug)]
struct KeyspaceEvent {
    key: String,
    event: &'static str,
}

impl KeyspaceEvent {
    fn new(key: String, event: &'static str) -> Self {
        Self { key, event }
    }
}

type Data = BTreeMap<String, StoredValue>;

struct Subscriber {
    pattern: String,
    sender: mpsc::Sender<Notification>,
    skipped: Arc<AtomicU64>,
}

/// In-memory implementation of the [`Store`] trait for one logical database.
///
/// Emulates the semantics of the hash store this workspace talks to: string
/// and hash values, glob `KEYS`, resumable `SCAN` cursors, pipelined batches
/// applied under a single write lock, and keyspace notifications published
/// on `__keyspace@<db>__:<key>` channels.
pub struct InMemoryStore {
    db_id: u32,
    data: RwLock<Data>,
    /// Open scan cursors, mapped to the last key they examined. Ids grow
    /// monotonically, so the first entry is the oldest.
    cursors: Mutex<BTreeMap<u64, String>>,
    next_cursor: AtomicU64,
    subscribers: Mutex<Vec<Subscriber>>,
    notify_keyspace_events: bool,
}

impl InMemoryStore {
    /// Creates an empty database with keyspace notifications enabled.
    pub fn new(db_id: u32) -> Self {
        Self {
            db_id,
            data: RwLock::new(BTreeMap::new()),
            cursors: Mutex::new(BTreeMap::new()),
            next_cursor: AtomicU64::new(SCAN_START + 1),
            subscribers: Mutex::new(Vec::new()),
            notify_keyspace_events: true,
        }
    }

    /// Disables keyspace notifications. Subscriptions still succeed but never
    /// receive anything.
    pub fn without_keyspace_events(mut self) -> Self {
        self.notify_keyspace_events = false;
        self
    }

    /// Returns the number of keys currently stored.
    pub fn len(&self) -> StoreResult<usize> {
        Ok(self.read_data()?.len())
    }

    /// Returns true if no keys are stored.
    pub fn is_empty(&self) -> StoreResult<bool> {
        Ok(self.read_data()?.is_empty())
    }

    fn read_data(&self) -> StoreResult<RwLockReadGuard<'_, Data>> {
        self.data
            .read()
            .map_err(|e| StoreError::Internal(format!("Failed to acquire read lock: {}", e)))
    }

    fn write_data(&self) -> StoreResult<RwLockWriteGuard<'_, Data>> {
        self.data
            .write()
            .map_err(|e| StoreError::Internal(format!("Failed to acquire write lock: {}", e)))
    }

    /// Delivers keyspace events to the subscriptions whose pattern matches
    /// the event's channel. A full subscription loses the event and is told
    /// so on its next receive.
    fn notify(&self, events: impl IntoIterator<Item = KeyspaceEvent>) {
        if !self.notify_keyspace_events {
            return;
        }
        let mut subscribers = match self.subscribers.lock() {
            Ok(subscribers) => subscribers,
            Err(e) => {
                tracing::warn!(error = %e, "Keyspace notifications not delivered");
                return;
            }
        };
        subscribers.retain(|subscriber| !subscriber.sender.is_closed());
        if subscribers.is_empty() {
            return;
        }
        for event in events {
            let channel = keyspace_channel(self.db_id, &event.key);
            for subscriber in subscribers.iter() {
                if !glob_match(&subscriber.pattern, &channel) {
                    continue;
                }
                let notification = Notification {
                    pattern: subscriber.pattern.clone(),
                    channel: channel.clone(),
                    payload: event.event.to_string(),
                };
                if let Err(TrySendError::Full(_)) = subscriber.sender.try_send(notification) {
                    subscriber.skipped.fetch_add(1, Ordering::Relaxed);
                }
            }
        }
    }

    #[cfg(test)]
    fn open_cursors(&self) -> usize {
        self.cursors.lock().map(|cursors| cursors.len()).unwrap_or(0)
    }

    /// Applies a single mutating command, surfacing an error reply as an error.
    fn run(&self, command: Command) -> StoreResult<Reply> {
        let (reply, event) = {
            let mut data = self.write_data()?;
            apply_command(&mut data, command)
        };
        self.notify(event);
        match reply {
            Reply::Error(msg) => Err(StoreError::Storage(msg)),
            reply => Ok(reply),
        }
    }
}

fn read_string(data: &Data, key: &str) -> Reply {
    match data.get(key) {
        None => Reply::Nil,
        Some(StoredValue::String(value)) => Reply::Value(value.clone()),
        Some(StoredValue::Hash(_)) => Reply::Error(WRONGTYPE.to_string()),
    }
}

fn read_hash(data: &Data, key: &str) -> Reply {
    match data.get(key) {
        None => Reply::Hash(FieldValues::new()),
        Some(StoredValue::Hash(fields)) => Reply::Hash(fields.clone()),
        Some(StoredValue::String(_)) => Reply::Error(WRONGTYPE.to_string()),
    }
}

fn wrong_arity(command: &str) -> Reply {
    Reply::Error(format!(
        "ERR wrong number of arguments for '{}' command",
        command
    ))
}

/// Applies one command and returns its reply plus the keyspace event it raised.
fn apply_command(data: &mut Data, command: Command) -> (Reply, Option<KeyspaceEvent>) {
    match command {
        Command::Get(key) => (read_string(data, &key), None),
        Command::HGetAll(key) => (read_hash(data, &key), None),
        Command::HMSet(key, fields) => {
            if fields.is_empty() {
                return (wrong_arity("hmset"), None);
            }
            let value = data
                .entry(key.clone())
                .or_insert_with(|| StoredValue::Hash(FieldValues::new()));
            match value {
                StoredValue::Hash(existing) => {
                    existing.extend(fields);
                    (
                        Reply::Status("OK".to_string()),
                        Some(KeyspaceEvent::new(key, "hset")),
                    )
                }
                StoredValue::String(_) => (Reply::Error(WRONGTYPE.to_string()), None),
            }
        }
        Command::HDel(key, fields) => {
            if fields.is_empty() {
                return (wrong_arity("hdel"), None);
            }
            let Some(value) = data.get_mut(&key) else {
                return (Reply::Integer(0), None);
            };
            let StoredValue::Hash(existing) = value else {
                return (Reply::Error(WRONGTYPE.to_string()), None);
            };
            let removed = fields
                .iter()
                .filter(|field| existing.remove(*field).is_some())
                .count() as i64;
            // A hash without fields does not exist.
            if existing.is_empty() {
                data.remove(&key);
            }
            if removed == 0 {
                (Reply::Integer(0), None)
            } else {
                (Reply::Integer(removed), Some(KeyspaceEvent::new(key, "hdel")))
            }
        }
        Command::Del(key) => match data.remove(&key) {
            Some(_) => (Reply::Integer(1), Some(KeyspaceEvent::new(key, "del"))),
            None => (Reply::Integer(0), None),
        },
    }
}

#[async_trait]
impl StoreRead for InMemoryStore {
    #[tracing::instrument(level = "trace", skip_all)]
    async fn get(&self, key: &str) -> StoreResult<Option<String>> {
        let data = self.read_data()?;
        match read_string(&data, key) {
            Reply::Value(value) => Ok(Some(value)),
            Reply::Nil => Ok(None),
            Reply::Error(msg) => Err(StoreError::Storage(msg)),
            other => Err(StoreError::Internal(format!(
                "unexpected reply to GET: {:?}",
                other
            ))),
        }
    }

    #[tracing::instrument(level = "trace", skip_all)]
    async fn hgetall(&self, key: &str) -> StoreResult<FieldValues> {
        let data = self.read_data()?;
        match read_hash(&data, key) {
            Reply::Hash(fields) => Ok(fields),
            Reply::Error(msg) => Err(StoreError::Storage(msg)),
            other => Err(StoreError::Internal(format!(
                "unexpected reply to HGETALL: {:?}",
                other
            ))),
        }
    }

    #[tracing::instrument(level = "trace", skip_all)]
    async fn keys(&self, pattern: &str) -> StoreResult<Vec<String>> {
        let data = self.read_data()?;
        Ok(data
            .keys()
            .filter(|key| glob_match(pattern, key))
            .cloned()
            .collect())
    }

    #[tracing::instrument(level = "trace", skip_all)]
    async fn scan(
        &self,
        cursor: u64,
        pattern: &str,
        count: usize,
    ) -> StoreResult<(u64, Vec<String>)> {
        let resume_after = if cursor == SCAN_START {
            None
        } else {
            let mut cursors = self
                .cursors
                .lock()
                .map_err(|e| StoreError::Internal(format!("Failed to acquire lock: {}", e)))?;
            let last = cursors
                .remove(&cursor)
                .ok_or_else(|| StoreError::Storage("ERR invalid cursor".to_string()))?;
            Some(last)
        };

        let (keys, last_examined, more) = {
            let data = self.read_data()?;
            let start = match &resume_after {
                Some(last) => Bound::Excluded(last.as_str()),
                None => Bound::Unbounded,
            };
            let mut keys = Vec::new();
            let mut last_examined = None;
            for key in data
                .range::<str, _>((start, Bound::Unbounded))
                .map(|(key, _)| key)
                .take(count.max(1))
            {
                if glob_match(pattern, key) {
                    keys.push(key.clone());
                }
                last_examined = Some(key.clone());
            }
            let more = match &last_examined {
                Some(last) => data
                    .range::<str, _>((Bound::Excluded(last.as_str()), Bound::Unbounded))
                    .next()
                    .is_some(),
                None => false,
            };
            (keys, last_examined, more)
        };

        match last_examined {
            Some(last) if more => {
                let next = self.next_cursor.fetch_add(1, Ordering::Relaxed);
                let mut cursors = self
                    .cursors
                    .lock()
                    .map_err(|e| StoreError::Internal(format!("Failed to acquire lock: {}", e)))?;
                while cursors.len() >= MAX_OPEN_CURSORS {
                    if let Some((abandoned, _)) = cursors.pop_first() {
                        tracing::debug!(cursor = abandoned, "Forgetting oldest open scan cursor");
                    }
                }
                cursors.insert(next, last);
                Ok((next, keys))
            }
            _ => Ok((SCAN_START, keys)),
        }
    }
}

#[async_trait]
impl Store for InMemoryStore {
    fn db_id(&self) -> u32 {
        self.db_id
    }

    #[tracing::instrument(level = "trace", skip_all)]
    async fn set(&self, key: &str, value: &str) -> StoreResult<()> {
        {
            let mut data = self.write_data()?;
            data.insert(key.to_string(), StoredValue::String(value.to_string()));
        }
        self.notify(Some(KeyspaceEvent::new(key.to_string(), "set")));
        Ok(())
    }

    #[tracing::instrument(level = "trace", skip_all)]
    async fn hmset(&self, key: &str, fields: &FieldValues) -> StoreResult<()> {
        self.run(Command::HMSet(key.to_string(), fields.clone()))
            .map(|_| ())
    }

    #[tracing::instrument(level = "trace", skip_all)]
    async fn hdel(&self, key: &str, fields: &[String]) -> StoreResult<i64> {
        match self.run(Command::HDel(key.to_string(), fields.to_vec()))? {
            Reply::Integer(removed) => Ok(removed),
            other => Err(StoreError::Internal(format!(
                "unexpected reply to HDEL: {:?}",
                other
            ))),
        }
    }

    #[tracing::instrument(level = "trace", skip_all)]
    async fn del(&self, key: &str) -> StoreResult<i64> {
        match self.run(Command::Del(key.to_string()))? {
            Reply::Integer(removed) => Ok(removed),
            other => Err(StoreError::Internal(format!(
                "unexpected reply to DEL: {:?}",
                other
            ))),
        }
    }

    /// Applies the whole batch within a single write lock acquisition, so no
    /// other session observes a partially applied batch.
    #[tracing::instrument(level = "trace", skip_all)]
    async fn execute(&self, commands: Vec<Command>) -> StoreResult<Vec<Reply>> {
        let mut events = Vec::new();
        let mut replies = Vec::with_capacity(commands.len());
        {
            let mut data = self.write_data()?;
            for command in commands {
                let (reply, event) = apply_command(&mut data, command);
                replies.push(reply);
                events.extend(event);
            }
        }
        self.notify(events);
        Ok(replies)
    }

    async fn psubscribe(&self, pattern: &str) -> StoreResult<Box<dyn Subscription>> {
        let (sender, receiver) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        let skipped = Arc::new(AtomicU64::new(0));
        self.subscribers
            .lock()
            .map_err(|e| StoreError::Internal(format!("Failed to acquire lock: {}", e)))?
            .push(Subscriber {
                pattern: pattern.to_string(),
                sender,
                skipped: Arc::clone(&skipped),
            });
        Ok(Box::new(InMemorySubscription {
            pattern: pattern.to_string(),
            receiver: Some(receiver),
            skipped,
        }))
    }

    async fn close(&self) -> StoreResult<()> {
        // No-op for in-memory storage
        Ok(())
    }
}

/// Pattern subscription on an [`InMemoryStore`]'s keyspace notifications.
///
/// Only notifications on matching channels are buffered, so unrelated
/// writes never push a matching one out.
pub struct InMemorySubscription {
    pattern: String,
    receiver: Option<mpsc::Receiver<Notification>>,
    skipped: Arc<AtomicU64>,
}

#[async_trait]
impl Subscription for InMemorySubscription {
    async fn next_message(&mut self) -> StoreResult<Message> {
        let receiver = self.receiver.as_mut().ok_or_else(|| {
            StoreError::Internal("subscription has been cancelled".to_string())
        })?;
        let skipped = self.skipped.swap(0, Ordering::Relaxed);
        if skipped > 0 {
            tracing::warn!(
                pattern = %self.pattern,
                skipped = skipped,
                "Subscription lagged, keyspace notifications dropped"
            );
            return Ok(Message::Lagged { skipped });
        }
        receiver
            .recv()
            .await
            .map(Message::Notification)
            .ok_or_else(|| StoreError::Connection("store has shut down".to_string()))
    }

    async fn punsubscribe(&mut self) -> StoreResult<()> {
        self.receiver = None;
        Ok(())
    }
}

/// A store instance holding any number of logical databases, keyed by id.
///
/// Acts as a [`Connector`]: every connection to the same database id shares
/// the same [`InMemoryStore`], the way separate clients share one server.
pub struct InMemoryInstance {
    databases: Mutex<HashMap<u32, Arc<InMemoryStore>>>,
    notify_keyspace_events: bool,
}

impl InMemoryInstance {
    /// Creates an empty instance with keyspace notifications enabled.
    pub fn new() -> Self {
        Self {
            databases: Mutex::new(HashMap::new()),
            notify_keyspace_events: true,
        }
    }

    /// Creates an empty instance whose databases never publish keyspace
    /// notifications.
    pub fn without_keyspace_events() -> Self {
        Self {
            databases: Mutex::new(HashMap::new()),
            notify_keyspace_events: false,
        }
    }

    /// Returns the database with the given id, creating it on first use.
    pub fn database(&self, id: u32) -> StoreResult<Arc<InMemoryStore>> {
        let mut databases = self
            .databases
            .lock()
            .map_err(|e| StoreError::Internal(format!("Failed to acquire lock: {}", e)))?;
        let notify = self.notify_keyspace_events;
        let db = databases.entry(id).or_insert_with(|| {
            let store = InMemoryStore::new(id);
            Arc::new(if notify {
                store
            } else {
                store.without_keyspace_events()
            })
        });
        Ok(Arc::clone(db))
    }
}

impl Default for InMemoryInstance {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Connector for InMemoryInstance {
    async fn connect(&self, database: &DatabaseInfo) -> StoreResult<Arc<dyn Store>> {
        let store: Arc<dyn Store> = self.database(database.id)?;
        Ok(store)
    }
}

/// Injected failure that fires either once or on every call.
#[cfg(feature = "test-utils")]
#[derive(Clone)]
enum Failure {
    /// Error is returned once, then automatically cleared.
    Once(StoreError),
    /// Error is returned on every subsequent call until explicitly cleared.
    Persistent(StoreError),
}

#[cfg(feature = "test-utils")]
type FailSlot = arc_swap::ArcSwap<Option<Failure>>;

/// Checks a [`FailSlot`] and returns an error if one is set.
///
/// For [`Failure::Once`], the slot is atomically swapped to `None` so the
/// error fires exactly once. For [`Failure::Persistent`], the slot is left
/// unchanged.
#[cfg(feature = "test-utils")]
fn check_failure(slot: &FailSlot) -> StoreResult<()> {
    let guard = slot.load();
    match guard.as_ref() {
        None => Ok(()),
        Some(Failure::Persistent(err)) => Err(err.clone()),
        Some(Failure::Once(_)) => {
            let prev = slot.swap(Arc::new(None));
            match prev.as_ref() {
                Some(Failure::Once(err)) => Err(err.clone()),
                _ => Ok(()),
            }
        }
    }
}

/// A connector wrapper that delegates to an inner [`Connector`] but can
/// inject connection failures on demand.
///
/// Gated behind the `test-utils` feature.
///
/// # Example
///
/// ```ignore
/// let connector = FailingConnector::wrap(Arc::new(InMemoryInstance::new()));
/// connector.fail_connect_once(StoreError::Connection("refused".into()));
/// // only the next connect call returns Err(...), then auto-clears
/// ```
#[cfg(feature = "test-utils")]
pub struct FailingConnector {
    inner: Arc<dyn Connector>,
    fail_connect: FailSlot,
    attempts: std::sync::atomic::AtomicUsize,
}

#[cfg(feature = "test-utils")]
impl FailingConnector {
    /// Wraps an existing connector, with failure injection initially `None`.
    pub fn wrap(inner: Arc<dyn Connector>) -> Arc<Self> {
        Arc::new(Self {
            inner,
            fail_connect: arc_swap::ArcSwap::from_pointee(None),
            attempts: std::sync::atomic::AtomicUsize::new(0),
        })
    }

    /// Makes `connect` return the given error on every subsequent call.
    pub fn fail_connect(&self, err: StoreError) {
        self.fail_connect
            .store(Arc::new(Some(Failure::Persistent(err))));
    }

    /// Makes `connect` return the given error on the next call only.
    pub fn fail_connect_once(&self, err: StoreError) {
        self.fail_connect.store(Arc::new(Some(Failure::Once(err))));
    }

    /// Clears any injected failure.
    pub fn clear(&self) {
        self.fail_connect.store(Arc::new(None));
    }

    /// Returns how many times `connect` has been called.
    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }
}

#[cfg(feature = "test-utils")]
#[async_trait]
impl Connector for FailingConnector {
    async fn connect(&self, database: &DatabaseInfo) -> StoreResult<Arc<dyn Store>> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        check_failure(&self.fail_connect)?;
        self.inner.connect(database).await
    }
}
