//! Ordered, append-only, per-topic message log.
//!
//! The [`Bus`] trait is the only transport the coordination core uses.
//! Two backends exist:
//! - [`InMemoryBus`]: in-process log for single-process runs and tests
//! - [`RedisStreamBus`]: Redis Streams, one stream per topic
//!
//! Cursors are held by the caller. A [`Consumer`] wraps a cursor and advances
//! it past every record it hands out.

pub mod memory;
pub mod redis_stream;
#[cfg(test)]
pub mod testing;

pub use memory::InMemoryBus;
pub use redis_stream::RedisStreamBus;

use async_trait::async_trait;
use futures::Stream;
use serde::de::DeserializeOwned;
use std::collections::VecDeque;
use std::fmt;
use std::future::Future;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::watch;

use crate::protocol::{Message, Topic};

/// Failure to talk to the bus.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("bus connection failed: {0}")]
    Connection(String),
    #[error("bus command failed: {0}")]
    Command(String),
    #[error("failed to encode record: {0}")]
    Encode(#[from] serde_json::Error),
    #[error("invalid record id '{0}'")]
    InvalidRecordId(String),
    #[error("bus state lock poisoned")]
    Poisoned,
}

impl TransportError {
    /// Whether a retry can possibly succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            TransportError::Connection(_) | TransportError::Command(_) | TransportError::Poisoned
        )
    }
}

/// Position of a record within a topic, ordered by append time.
///
/// Formatted `<millis>-<sequence>`, the same shape Redis Streams use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RecordId {
    pub millis: u64,
    pub seq: u64,
}

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.millis, self.seq)
    }
}

impl FromStr for RecordId {
    type Err = TransportError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || TransportError::InvalidRecordId(s.to_string());
        let (millis, seq) = s.split_once('-').ok_or_else(invalid)?;
        Ok(RecordId {
            millis: millis.parse().map_err(|_| invalid())?,
            seq: seq.parse().map_err(|_| invalid())?,
        })
    }
}

/// Where a read starts. Reads return records strictly after the cursor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cursor {
    /// Before the first record of the topic.
    Start,
    /// After the given record.
    After(RecordId),
}

/// A raw record as stored on the bus.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    pub id: RecordId,
    pub payload: String,
}

impl Record {
    pub fn decode<T: DeserializeOwned>(&self) -> serde_json::Result<T> {
        serde_json::from_str(&self.payload)
    }
}

/// Append-only per-topic log shared by every component.
///
/// Implementations must be safe for concurrent use from many tasks.
#[async_trait]
pub trait Bus: Send + Sync {
    /// Appends one record atomically and returns its id.
    async fn append(&self, topic: &Topic, payload: &str) -> Result<RecordId, TransportError>;

    /// Reads up to `max_batch` records strictly after `cursor`.
    ///
    /// When nothing is available, waits up to `block` for new records and
    /// then returns an empty batch. A zero `block` never waits.
    async fn read(
        &self,
        topic: &Topic,
        cursor: Cursor,
        max_batch: usize,
        block: Duration,
    ) -> Result<Vec<Record>, TransportError>;

    /// The newest `count` records, newest first.
    async fn read_recent(&self, topic: &Topic, count: usize)
        -> Result<Vec<Record>, TransportError>;

    /// A cursor positioned after the newest record ("only new records").
    async fn tail(&self, topic: &Topic) -> Result<Cursor, TransportError>;

    /// Drops every record of the topic.
    async fn clear(&self, topic: &Topic) -> Result<(), TransportError>;

    /// Serializes and appends a message.
    async fn publish(&self, topic: &Topic, message: &Message) -> Result<RecordId, TransportError> {
        let payload = serde_json::to_string(message)?;
        self.append(topic, &payload).await
    }
}

/// A caller-held cursor over one topic.
pub struct Consumer {
    bus: Arc<dyn Bus>,
    topic: Topic,
    cursor: Cursor,
}

impl Consumer {
    pub fn new(bus: Arc<dyn Bus>, topic: Topic, cursor: Cursor) -> Self {
        Self { bus, topic, cursor }
    }

    /// A consumer that only sees records appended from now on.
    ///
    /// Any backlog already on the topic is skipped.
    pub async fn from_now(bus: Arc<dyn Bus>, topic: Topic) -> Result<Self, TransportError> {
        let cursor = bus.tail(&topic).await?;
        Ok(Self::new(bus, topic, cursor))
    }

    pub fn topic(&self) -> &Topic {
        &self.topic
    }

    #[cfg(test)]
    pub fn cursor(&self) -> Cursor {
        self.cursor
    }

    /// Reads the next batch and advances the cursor past it.
    pub async fn next_batch(
        &mut self,
        max_batch: usize,
        block: Duration,
    ) -> Result<Vec<Record>, TransportError> {
        let records = self
            .bus
            .read(&self.topic, self.cursor, max_batch, block)
            .await?;
        if let Some(last) = records.last() {
            self.cursor = Cursor::After(last.id);
        }
        Ok(records)
    }

    /// Turns the consumer into a lazy, never-ending stream of records.
    ///
    /// Empty polls are absorbed; transport errors are yielded and the stream
    /// keeps going from the same cursor.
    pub fn into_stream(
        self,
        max_batch: usize,
        block: Duration,
    ) -> impl Stream<Item = Result<Record, TransportError>> {
        futures::stream::unfold(
            (self, VecDeque::new()),
            move |(mut consumer, mut buffered)| async move {
                loop {
                    if let Some(record) = buffered.pop_front() {
                        return Some((Ok(record), (consumer, buffered)));
                    }
                    match consumer.next_batch(max_batch, block).await {
                        Ok(records) => buffered.extend(records),
                        Err(e) => return Some((Err(e), (consumer, buffered))),
                    }
                }
            },
        )
    }
}

/// Polling settings for a listener loop.
#[derive(Debug, Clone, Copy)]
pub struct PollSettings {
    pub max_batch: usize,
    pub block: Duration,
    /// Pause after a failed read before polling again.
    pub error_backoff: Duration,
}

impl Default for PollSettings {
    fn default() -> Self {
        Self {
            max_batch: 10,
            block: Duration::from_secs(5),
            error_backoff: Duration::from_secs(1),
        }
    }
}

/// Runs a blocking-poll listener loop until `shutdown` flips to true.
///
/// Records that do not decode as a [`Message`] are logged and skipped.
pub async fn listen<F, Fut>(
    mut consumer: Consumer,
    settings: PollSettings,
    mut shutdown: watch::Receiver<bool>,
    mut on_message: F,
) where
    F: FnMut(Message) -> Fut,
    Fut: Future<Output = ()>,
{
    tracing::debug!(topic = %consumer.topic(), "Listener started");
    loop {
        if *shutdown.borrow() {
            break;
        }
        let batch = tokio::select! {
            changed = shutdown.changed() => {
                if changed.is_err() {
                    break;
                }
                continue;
            }
            batch = consumer.next_batch(settings.max_batch, settings.block) => batch,
        };

        match batch {
            Ok(records) => {
                for record in records {
                    match record.decode::<Message>() {
                        Ok(message) => on_message(message).await,
                        Err(e) => tracing::warn!(
                            topic = %consumer.topic(),
                            record_id = %record.id,
                            error = %e,
                            "Skipping undecodable record"
                        ),
                    }
                }
            }
            Err(e) => {
                tracing::error!(topic = %consumer.topic(), error = %e, "Bus read failed");
                tokio::time::sleep(settings.error_backoff).await;
            }
        }
    }
    tracing::debug!(topic = %consumer.topic(), "Listener stopped");
}

#[cfg(test)]
#[path = "tests/bus_tests.rs"]
mod tests;
