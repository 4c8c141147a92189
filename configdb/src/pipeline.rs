//! Command pipelining.
//!
//! A [`BatchPipeline`] queues commands, transmits them to the store in one
//! round trip, and hands the replies back strictly in the order the commands
//! were queued. Callers rely on that order to pair the Nth reply with the
//! Nth command, so a short reply list is never allowed to shift later
//! pairings: a missing reply shows up as `None` for its own slot only.
//!
//! Batching is for round trips and ordering. It does not isolate the batch
//! from concurrent writers on other connections.

use std::collections::VecDeque;
use std::sync::Arc;

use common::{Command, Reply, Store, StoreRead};

use crate::error::Result;
use crate::model::ConfigData;
use crate::scan::CursorScanner;
use crate::serde::KeyCodec;

/// Queue of store commands dispatched together.
pub(crate) struct BatchPipeline {
    store: Arc<dyn Store>,
    queued: Vec<Command>,
    /// Replies of executed commands that have not been dequeued yet, with
    /// `None` standing in for replies the store failed to return.
    replies: VecDeque<Option<Reply>>,
}

impl BatchPipeline {
    pub(crate) fn new(store: Arc<dyn Store>) -> Self {
        Self {
            store,
            queued: Vec::new(),
            replies: VecDeque::new(),
        }
    }

    /// Adds a command to the next batch.
    pub(crate) fn enqueue(&mut self, command: Command) {
        self.queued.push(command);
    }

    /// Number of commands waiting to be executed.
    pub(crate) fn len(&self) -> usize {
        self.queued.len()
    }

    /// Transmits all queued commands in one batch and buffers their replies.
    ///
    /// Returns the number of commands sent. An empty queue sends nothing.
    pub(crate) async fn execute(&mut self) -> Result<usize> {
        if self.queued.is_empty() {
            return Ok(0);
        }
        let commands = std::mem::take(&mut self.queued);
        let sent = commands.len();
        let targets: Vec<(&'static str, String)> = commands
            .iter()
            .map(|command| (command.name(), command.key().to_string()))
            .collect();
        let replies = self.store.execute(commands).await?;
        for ((command, key), reply) in targets.iter().zip(&replies) {
            if let Reply::Error(msg) = reply {
                tracing::debug!(command, key = %key, error = %msg, "Pipelined command failed");
            }
        }
        if replies.len() != sent {
            tracing::warn!(
                commands = sent,
                replies = replies.len(),
                "Pipeline reply count does not match command count"
            );
        }
        let mut replies = replies.into_iter();
        for _ in 0..sent {
            self.replies.push_back(replies.next());
        }
        tracing::debug!(commands = sent, "Executed pipeline batch");
        Ok(sent)
    }

    /// Takes the reply to the oldest executed command that has not been
    /// dequeued yet.
    ///
    /// Returns `None` when the store did not return a reply for that command
    /// or when there is nothing left to dequeue.
    pub(crate) fn dequeue_reply(&mut self) -> Option<Reply> {
        self.replies.pop_front().flatten()
    }

    /// Scans every key matching `pattern` and queues a `DEL` for each one.
    ///
    /// Nothing is deleted until the pipeline is executed, so the scan is not
    /// disturbed by its own deletions. Returns the number of queued deletes.
    pub(crate) async fn enqueue_deletes(&mut self, pattern: &str, batch_size: usize) -> Result<usize> {
        let mut scanner = CursorScanner::new(
            Arc::clone(&self.store) as Arc<dyn StoreRead>,
            pattern,
            batch_size,
        );
        let mut queued = 0;
        while let Some(keys) = scanner.next_batch().await? {
            queued += keys.len();
            for key in keys {
                self.enqueue(Command::Del(key));
            }
        }
        Ok(queued)
    }

    /// Drops replies that were never dequeued and returns how many of them
    /// were errors.
    pub(crate) fn discard_replies(&mut self) -> usize {
        self.replies
            .drain(..)
            .flatten()
            .filter(|reply| matches!(reply, Reply::Error(_)))
            .count()
    }
}

/// Reads every table entry of the database in scan-sized pipelined batches.
///
/// Keys without a separator and the initialization marker are skipped, as
/// are entries that read back empty or fail to read as hashes. The result is
/// not a point-in-time snapshot: entries written between two batches may be
/// observed in a partially updated state.
pub(crate) async fn read_config(
    store: Arc<dyn Store>,
    codec: &KeyCodec,
    batch_size: usize,
    init_indicator: &str,
) -> Result<ConfigData> {
    let mut data = ConfigData::new();
    let mut scanner = CursorScanner::new(
        Arc::clone(&store) as Arc<dyn StoreRead>,
        crate::serde::WILDCARD,
        batch_size,
    );
    let mut pipeline = BatchPipeline::new(store);

    while let Some(keys) = scanner.next_batch().await? {
        let mut pending = Vec::with_capacity(keys.len());
        for key in &keys {
            if key == init_indicator {
                continue;
            }
            match codec.decode_key(key) {
                Ok((table, row)) => {
                    pipeline.enqueue(Command::HGetAll(key.clone()));
                    pending.push((table, row));
                }
                Err(err) => tracing::trace!(key = %key, error = %err, "Skipping key"),
            }
        }
        pipeline.execute().await?;

        for (table, row) in pending {
            match pipeline.dequeue_reply() {
                Some(Reply::Hash(fields)) if !fields.is_empty() => {
                    data.entry(table.to_string())
                        .or_default()
                        .insert(row.to_string(), fields);
                }
                Some(Reply::Hash(_)) => {}
                Some(Reply::Error(msg)) => {
                    tracing::debug!(table = %table, row = %row, error = %msg, "Skipping entry");
                }
                Some(other) => {
                    tracing::warn!(table = %table, row = %row, reply = ?other, "Unexpected reply");
                }
                None => {
                    tracing::warn!(table = %table, row = %row, "Missing pipeline reply");
                }
            }
        }
    }

    Ok(data)
}
