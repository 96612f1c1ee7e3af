//! In-process bus backend.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::sync::Notify;

use super::{Bus, Cursor, Record, RecordId, TransportError};
use crate::protocol::Topic;

#[derive(Default)]
struct LogState {
    topics: HashMap<String, Vec<Record>>,
    last_id: Option<RecordId>,
}

impl LogState {
    /// Next id: wall-clock milliseconds, with a sequence number that keeps
    /// ids strictly increasing when the clock stalls or steps back.
    fn next_id(&mut self) -> RecordId {
        let millis = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0);
        let id = match self.last_id {
            Some(last) if millis <= last.millis => RecordId {
                millis: last.millis,
                seq: last.seq + 1,
            },
            _ => RecordId { millis, seq: 0 },
        };
        self.last_id = Some(id);
        id
    }
}

/// Process-local bus. Blocking reads wake up as soon as anything is appended.
#[derive(Default)]
pub struct InMemoryBus {
    state: Mutex<LogState>,
    appended: Notify,
}

impl InMemoryBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every record of a topic, oldest first.
    #[cfg(test)]
    pub fn records(&self, topic: &Topic) -> Vec<Record> {
        self.state
            .lock()
            .map(|state| state.topics.get(topic.as_str()).cloned().unwrap_or_default())
            .unwrap_or_default()
    }

    fn collect(
        &self,
        topic: &Topic,
        cursor: Cursor,
        max_batch: usize,
    ) -> Result<Vec<Record>, TransportError> {
        let state = self.state.lock().map_err(|_| TransportError::Poisoned)?;
        let Some(records) = state.topics.get(topic.as_str()) else {
            return Ok(Vec::new());
        };
        let start = match cursor {
            Cursor::Start => 0,
            Cursor::After(after) => records.partition_point(|r| r.id <= after),
        };
        Ok(records
            .iter()
            .skip(start)
            .take(max_batch)
            .cloned()
            .collect())
    }
}

#[async_trait]
impl Bus for InMemoryBus {
    async fn append(&self, topic: &Topic, payload: &str) -> Result<RecordId, TransportError> {
        let id = {
            let mut state = self.state.lock().map_err(|_| TransportError::Poisoned)?;
            let id = state.next_id();
            state
                .topics
                .entry(topic.as_str().to_string())
                .or_default()
                .push(Record {
                    id,
                    payload: payload.to_string(),
                });
            id
        };
        self.appended.notify_waiters();
        Ok(id)
    }

    async fn read(
        &self,
        topic: &Topic,
        cursor: Cursor,
        max_batch: usize,
        block: Duration,
    ) -> Result<Vec<Record>, TransportError> {
        let deadline = tokio::time::Instant::now() + block;
        loop {
            // Register interest before checking so an append between the
            // check and the wait is not missed.
            let notified = self.appended.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            let batch = self.collect(topic, cursor, max_batch)?;
            if !batch.is_empty() || block.is_zero() {
                return Ok(batch);
            }
            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return Ok(Vec::new());
            }
        }
    }

    async fn read_recent(
        &self,
        topic: &Topic,
        count: usize,
    ) -> Result<Vec<Record>, TransportError> {
        let state = self.state.lock().map_err(|_| TransportError::Poisoned)?;
        Ok(state
            .topics
            .get(topic.as_str())
            .map(|records| records.iter().rev().take(count).cloned().collect())
            .unwrap_or_default())
    }

    async fn tail(&self, topic: &Topic) -> Result<Cursor, TransportError> {
        let state = self.state.lock().map_err(|_| TransportError::Poisoned)?;
        Ok(state
            .topics
            .get(topic.as_str())
            .and_then(|records| records.last())
            .map(|r| Cursor::After(r.id))
            .unwrap_or(Cursor::Start))
    }

    async fn clear(&self, topic: &Topic) -> Result<(), TransportError> {
        let mut state = self.state.lock().map_err(|_| TransportError::Poisoned)?;
        state.topics.remove(topic.as_str());
        Ok(())
    }
}
