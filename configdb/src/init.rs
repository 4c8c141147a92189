//! Startup synchronization on the initialization marker.
//!
//! An external initializer populates the database and then sets the marker
//! key to a non-empty value. [`InitGate`] lets a client hold off until that
//! has happened without polling the store:
//!
//! ```text
//! Unchecked --marker set--------------------------------> Ready
//! Unchecked --marker unset--> WaitingForSignal --marker set--> Ready
//!                                   ^        |
//!                                   +--------+ notification, marker still unset
//! ```
//!
//! While waiting, the gate holds a pattern subscription on the marker's
//! keyspace channel. The marker is re-read once right after subscribing, so
//! a marker written between the first read and the subscription is not
//! missed. If the subscription reports that notifications were dropped, the
//! marker is re-read as well. There is no internal timeout: if the marker is never set, or the
//! store does not publish keyspace notifications, the wait does not end.
//! Wrap [`InitGate::wait`] in `tokio::time::timeout` to bound it.

use std::sync::Arc;

use common::storage::util::keyspace_channel;
use common::{Message, Store, Subscription};

use crate::error::Result;

/// Observable state of an [`InitGate`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InitState {
    /// The marker has not been read yet.
    Unchecked,
    /// The marker was unset; waiting for a keyspace notification.
    WaitingForSignal,
    /// The marker is set.
    Ready,
}

enum GateState {
    Unchecked,
    WaitingForSignal(Box<dyn Subscription>),
    Ready,
}

async fn marker_set(store: &dyn Store, marker: &str) -> Result<bool> {
    let value = store.get(marker).await?;
    Ok(value.is_some_and(|v| !v.is_empty()))
}

/// Waits for the initialization marker of one database.
pub struct InitGate {
    store: Arc<dyn Store>,
    marker: String,
    state: GateState,
}

impl InitGate {
    pub fn new(store: Arc<dyn Store>, marker: impl Into<String>) -> Self {
        Self {
            store,
            marker: marker.into(),
            state: GateState::Unchecked,
        }
    }

    pub fn state(&self) -> InitState {
        match self.state {
            GateState::Unchecked => InitState::Unchecked,
            GateState::WaitingForSignal(_) => InitState::WaitingForSignal,
            GateState::Ready => InitState::Ready,
        }
    }

    /// Advances the gate by one transition and returns the new state.
    ///
    /// From `Unchecked` this reads the marker and, if needed, subscribes.
    /// From `WaitingForSignal` this suspends until the next notification on
    /// the marker's channel. `Ready` is terminal. Dropping the returned
    /// future while it waits leaves the gate in `WaitingForSignal`.
    pub async fn step(&mut self) -> Result<InitState> {
        let message = match &mut self.state {
            GateState::Ready => return Ok(InitState::Ready),
            GateState::Unchecked => None,
            GateState::WaitingForSignal(subscription) => {
                Some(subscription.next_message().await?)
            }
        };

        let recheck = match message {
            None => {
                self.subscribe_unless_set().await?;
                false
            }
            Some(Message::Notification(notification)) => {
                tracing::trace!(
                    channel = %notification.channel,
                    event = %notification.payload,
                    "Keyspace notification"
                );
                notification.key() == Some(self.marker.as_str())
            }
            Some(Message::Lagged { skipped }) => {
                tracing::debug!(skipped, "Notifications lost, re-reading marker");
                true
            }
        };
        if recheck && marker_set(self.store.as_ref(), &self.marker).await? {
            self.finish().await?;
            tracing::info!(marker = %self.marker, "Database initialized");
        }
        Ok(self.state())
    }

    async fn subscribe_unless_set(&mut self) -> Result<()> {
        if marker_set(self.store.as_ref(), &self.marker).await? {
            tracing::debug!(marker = %self.marker, "Database already initialized");
            self.state = GateState::Ready;
            return Ok(());
        }
        let pattern = keyspace_channel(self.store.db_id(), &self.marker);
        self.state = GateState::WaitingForSignal(self.store.psubscribe(&pattern).await?);
        if marker_set(self.store.as_ref(), &self.marker).await? {
            self.finish().await?;
            tracing::debug!(marker = %self.marker, "Database initialized while subscribing");
            return Ok(());
        }
        tracing::info!(
            marker = %self.marker,
            channel = %pattern,
            "Waiting for database initialization"
        );
        Ok(())
    }

    async fn finish(&mut self) -> Result<()> {
        if let GateState::WaitingForSignal(mut subscription) =
            std::mem::replace(&mut self.state, GateState::Ready)
        {
            subscription.punsubscribe().await?;
        }
        Ok(())
    }

    /// Steps the gate until the marker is set.
    pub async fn wait(&mut self) -> Result<()> {
        while self.step().await? != InitState::Ready {}
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use async_trait::async_trait;
    use common::storage::in_memory::InMemoryStore;
    use common::{Command, FieldValues, Reply, StoreRead, StoreResult};

    use super::*;
    use crate::config::INIT_INDICATOR;

    /// Store whose subscriptions report lost notifications and then fall
    /// silent, the way a subscriber that fell behind sees the stream.
    struct LaggingStore {
        inner: Arc<InMemoryStore>,
    }

    struct LaggedSubscription {
        lagged: bool,
    }

    #[async_trait]
    impl Subscription for LaggedSubscription {
        async fn next_message(&mut self) -> StoreResult<Message> {
            if !self.lagged {
                self.lagged = true;
                return Ok(Message::Lagged { skipped: 1 });
            }
            std::future::pending().await
        }

        async fn punsubscribe(&mut self) -> StoreResult<()> {
            Ok(())
        }
    }

    #[async_trait]
    impl StoreRead for LaggingStore {
        async fn get(&self, key: &str) -> StoreResult<Option<String>> {
            self.inner.get(key).await
        }

        async fn hgetall(&self, key: &str) -> StoreResult<FieldValues> {
            self.inner.hgetall(key).await
        }

        async fn keys(&self, pattern: &str) -> StoreResult<Vec<String>> {
            self.inner.keys(pattern).await
        }

        async fn scan(
            &self,
            cursor: u64,
            pattern: &str,
            count: usize,
        ) -> StoreResult<(u64, Vec<String>)> {
            self.inner.scan(cursor, pattern, count).await
        }
    }

    #[async_trait]
    impl Store for LaggingStore {
        fn db_id(&self) -> u32 {
            self.inner.db_id()
        }

        async fn set(&self, key: &str, value: &str) -> StoreResult<()> {
            self.inner.set(key, value).await
        }

        async fn hmset(&self, key: &str, fields: &FieldValues) -> StoreResult<()> {
            self.inner.hmset(key, fields).await
        }

        async fn hdel(&self, key: &str, fields: &[String]) -> StoreResult<i64> {
            self.inner.hdel(key, fields).await
        }

        async fn del(&self, key: &str) -> StoreResult<i64> {
            self.inner.del(key).await
        }

        async fn execute(&self, commands: Vec<Command>) -> StoreResult<Vec<Reply>> {
            self.inner.execute(commands).await
        }

        async fn psubscribe(&self, _pattern: &str) -> StoreResult<Box<dyn Subscription>> {
            Ok(Box::new(LaggedSubscription { lagged: false }))
        }

        async fn close(&self) -> StoreResult<()> {
            self.inner.close().await
        }
    }

    #[tokio::test]
    async fn should_be_ready_immediately_when_marker_set() {
        // given
        let store = Arc::new(InMemoryStore::new(4));
        store.set(INIT_INDICATOR, "1").await.unwrap();
        let mut gate = InitGate::new(store, INIT_INDICATOR);

        // when
        let state = gate.step().await.unwrap();

        // then
        assert_eq!(state, InitState::Ready);
    }

    #[tokio::test]
    async fn should_wait_for_signal_when_marker_unset() {
        // given
        let store = Arc::new(InMemoryStore::new(4));
        let mut gate = InitGate::new(store, INIT_INDICATOR);
        assert_eq!(gate.state(), InitState::Unchecked);

        // when
        let state = gate.step().await.unwrap();

        // then
        assert_eq!(state, InitState::WaitingForSignal);
    }

    #[tokio::test]
    async fn should_become_ready_when_marker_set_later() {
        // given
        let store = Arc::new(InMemoryStore::new(4));
        let mut gate = InitGate::new(Arc::clone(&store) as Arc<dyn Store>, INIT_INDICATOR);
        gate.step().await.unwrap();

        // when
        let writer = tokio::spawn({
            let store = Arc::clone(&store);
            async move {
                tokio::time::sleep(Duration::from_millis(20)).await;
                store.set("PORT|Ethernet0", "unrelated").await.unwrap();
                store.set(INIT_INDICATOR, "1").await.unwrap();
            }
        });
        let result = tokio::time::timeout(Duration::from_secs(5), gate.wait()).await;
        writer.await.unwrap();

        // then
        assert!(matches!(result, Ok(Ok(()))));
        assert_eq!(gate.state(), InitState::Ready);
    }

    #[tokio::test]
    async fn should_keep_waiting_while_marker_empty() {
        // given
        let store = Arc::new(InMemoryStore::new(4));
        let mut gate = InitGate::new(Arc::clone(&store) as Arc<dyn Store>, INIT_INDICATOR);
        gate.step().await.unwrap();

        // when
        store.set(INIT_INDICATOR, "").await.unwrap();
        let state = gate.step().await.unwrap();

        // then
        assert_eq!(state, InitState::WaitingForSignal);
    }

    #[tokio::test]
    async fn should_become_ready_when_marker_set_before_many_unrelated_writes() {
        // given
        let store = Arc::new(InMemoryStore::new(4));
        let mut gate = InitGate::new(Arc::clone(&store) as Arc<dyn Store>, INIT_INDICATOR);
        gate.step().await.unwrap();

        // when
        store.set(INIT_INDICATOR, "1").await.unwrap();
        for i in 0..5000 {
            let fields: FieldValues = [("mtu".to_string(), "9100".to_string())].into();
            store
                .hmset(&format!("PORT|Ethernet{}", i), &fields)
                .await
                .unwrap();
        }
        let result = tokio::time::timeout(Duration::from_secs(5), gate.wait()).await;

        // then
        assert!(matches!(result, Ok(Ok(()))));
        assert_eq!(gate.state(), InitState::Ready);
    }

    #[tokio::test]
    async fn should_reread_marker_when_notifications_were_lost() {
        // given
        let inner = Arc::new(InMemoryStore::new(4).without_keyspace_events());
        let store = Arc::new(LaggingStore {
            inner: Arc::clone(&inner),
        });
        let mut gate = InitGate::new(store, INIT_INDICATOR);
        assert_eq!(gate.step().await.unwrap(), InitState::WaitingForSignal);

        // when
        inner.set(INIT_INDICATOR, "1").await.unwrap();
        let state = tokio::time::timeout(Duration::from_secs(5), gate.step()).await;

        // then
        assert!(matches!(state, Ok(Ok(InitState::Ready))));
    }

    #[tokio::test]
    async fn should_keep_waiting_after_lag_while_marker_unset() {
        // given
        let inner = Arc::new(InMemoryStore::new(4));
        let store = Arc::new(LaggingStore { inner });
        let mut gate = InitGate::new(store, INIT_INDICATOR);
        gate.step().await.unwrap();

        // when
        let state = gate.step().await.unwrap();

        // then
        assert_eq!(state, InitState::WaitingForSignal);
    }

    #[tokio::test]
    async fn should_not_finish_without_keyspace_notifications() {
        // given
        let store = Arc::new(InMemoryStore::new(4).without_keyspace_events());
        let mut gate = InitGate::new(Arc::clone(&store) as Arc<dyn Store>, INIT_INDICATOR);
        gate.step().await.unwrap();

        // when
        store.set(INIT_INDICATOR, "1").await.unwrap();
        let result = tokio::time::timeout(Duration::from_millis(50), gate.wait()).await;

        // then
        assert!(result.is_err());
    }
}
