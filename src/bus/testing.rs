//! Fault-injecting bus for tests.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use super::{Bus, Cursor, InMemoryBus, Record, RecordId, TransportError};
use crate::protocol::Topic;

#[derive(Debug, Clone, Copy)]
enum Fault {
    Times(u32),
    Always,
}

/// Wraps an [`InMemoryBus`] and fails appends to selected topics.
#[derive(Default)]
pub struct FaultyBus {
    pub inner: InMemoryBus,
    faults: Mutex<HashMap<String, Fault>>,
    attempts: Mutex<HashMap<String, u32>>,
}

impl FaultyBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// The next `times` appends to `topic` fail with a connection error.
    pub fn fail_times(&self, topic: &Topic, times: u32) {
        self.faults
            .lock()
            .unwrap()
            .insert(topic.as_str().to_string(), Fault::Times(times));
    }

    /// Every append to `topic` fails.
    pub fn fail_always(&self, topic: &Topic) {
        self.faults
            .lock()
            .unwrap()
            .insert(topic.as_str().to_string(), Fault::Always);
    }

    /// Appends attempted on `topic`, failed ones included.
    pub fn attempts(&self, topic: &Topic) -> u32 {
        self.attempts
            .lock()
            .unwrap()
            .get(topic.as_str())
            .copied()
            .unwrap_or(0)
    }

    pub fn records(&self, topic: &Topic) -> Vec<Record> {
        self.inner.records(topic)
    }

    fn should_fail(&self, topic: &Topic) -> bool {
        *self
            .attempts
            .lock()
            .unwrap()
            .entry(topic.as_str().to_string())
            .or_default() += 1;
        let mut faults = self.faults.lock().unwrap();
        match faults.get_mut(topic.as_str()) {
            Some(Fault::Always) => true,
            Some(Fault::Times(0)) | None => false,
            Some(Fault::Times(left)) => {
                *left -= 1;
                true
            }
        }
    }
}

#[async_trait]
impl Bus for FaultyBus {
    async fn append(&self, topic: &Topic, payload: &str) -> Result<RecordId, TransportError> {
        if self.should_fail(topic) {
            return Err(TransportError::Connection(format!(
                "injected failure on {}",
                topic
            )));
        }
        self.inner.append(topic, payload).await
    }

    async fn read(
        &self,
        topic: &Topic,
        cursor: Cursor,
        max_batch: usize,
        block: Duration,
    ) -> Result<Vec<Record>, TransportError> {
        self.inner.read(topic, cursor, max_batch, block).await
    }

    async fn read_recent(
        &self,
        topic: &Topic,
        count: usize,
    ) -> Result<Vec<Record>, TransportError> {
        self.inner.read_recent(topic, count).await
    }

    async fn tail(&self, topic: &Topic) -> Result<Cursor, TransportError> {
        self.inner.tail(topic).await
    }

    async fn clear(&self, topic: &Topic) -> Result<(), TransportError> {
        self.inner.clear(topic).await
    }
}
