//! Redis Streams bus backend.
//!
//! Each topic is one stream; each record stores the JSON message under a
//! single `payload` field (`XADD <topic> * payload <json>`).

use async_trait::async_trait;
use redis::streams::{StreamId, StreamRangeReply, StreamReadOptions, StreamReadReply};
use redis::AsyncCommands;
use std::time::Duration;

use super::{Bus, Cursor, Record, RecordId, TransportError};
use crate::protocol::Topic;

const PAYLOAD_FIELD: &str = "payload";

pub struct RedisStreamBus {
    client: redis::Client,
}

impl RedisStreamBus {
    /// Creates a bus from a connection URL such as `redis://localhost:6379/0`.
    pub fn open(connection_url: &str) -> Result<Self, TransportError> {
        let client = redis::Client::open(connection_url)
            .map_err(|e| TransportError::Connection(e.to_string()))?;
        Ok(Self { client })
    }

    /// Checks that the server answers.
    pub async fn ping(&self) -> Result<(), TransportError> {
        let mut conn = self.connection().await?;
        let _pong: String = redis::cmd("PING")
            .query_async(&mut conn)
            .await
            .map_err(command_error)?;
        Ok(())
    }

    // Blocking XREAD would stall a shared multiplexed pipeline, so every
    // operation takes its own connection.
    async fn connection(&self) -> Result<redis::aio::MultiplexedConnection, TransportError> {
        self.client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| TransportError::Connection(e.to_string()))
    }
}

fn command_error(e: redis::RedisError) -> TransportError {
    if e.is_io_error() || e.is_connection_dropped() || e.is_connection_refusal() {
        TransportError::Connection(e.to_string())
    } else {
        TransportError::Command(e.to_string())
    }
}

fn cursor_arg(cursor: Cursor) -> String {
    match cursor {
        Cursor::Start => "0-0".to_string(),
        Cursor::After(id) => id.to_string(),
    }
}

fn to_record(entry: &StreamId) -> Result<Record, TransportError> {
    Ok(Record {
        id: entry.id.parse()?,
        payload: entry.get::<String>(PAYLOAD_FIELD).unwrap_or_default(),
    })
}

#[async_trait]
impl Bus for RedisStreamBus {
    async fn append(&self, topic: &Topic, payload: &str) -> Result<RecordId, TransportError> {
        let mut conn = self.connection().await?;
        let id: String = conn
            .xadd(topic.as_str(), "*", &[(PAYLOAD_FIELD, payload)])
            .await
            .map_err(command_error)?;
        id.parse()
    }

    async fn read(
        &self,
        topic: &Topic,
        cursor: Cursor,
        max_batch: usize,
        block: Duration,
    ) -> Result<Vec<Record>, TransportError> {
        let mut conn = self.connection().await?;
        let mut options = StreamReadOptions::default().count(max_batch);
        // BLOCK 0 means "forever" to Redis; a zero duration means "don't wait".
        if !block.is_zero() {
            options = options.block(block.as_millis().max(1) as usize);
        }
        let reply: Option<StreamReadReply> = conn
            .xread_options(&[topic.as_str()], &[cursor_arg(cursor)], &options)
            .await
            .map_err(command_error)?;

        let Some(reply) = reply else {
            return Ok(Vec::new());
        };
        reply
            .keys
            .iter()
            .flat_map(|key| key.ids.iter())
            .map(to_record)
            .collect()
    }

    async fn read_recent(
        &self,
        topic: &Topic,
        count: usize,
    ) -> Result<Vec<Record>, TransportError> {
        let mut conn = self.connection().await?;
        let reply: StreamRangeReply = conn
            .xrevrange_count(topic.as_str(), "+", "-", count)
            .await
            .map_err(command_error)?;
        reply.ids.iter().map(to_record).collect()
    }

    async fn tail(&self, topic: &Topic) -> Result<Cursor, TransportError> {
        let newest = self.read_recent(topic, 1).await?;
        Ok(newest
            .first()
            .map(|r| Cursor::After(r.id))
            .unwrap_or(Cursor::Start))
    }

    async fn clear(&self, topic: &Topic) -> Result<(), TransportError> {
        let mut conn = self.connection().await?;
        conn.del::<_, ()>(topic.as_str())
            .await
            .map_err(command_error)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cursor_arguments() {
        assert_eq!(cursor_arg(Cursor::Start), "0-0");
        assert_eq!(
            cursor_arg(Cursor::After(RecordId {
                millis: 1700000000000,
                seq: 3
            })),
            "1700000000000-3"
        );
    }

    #[test]
    fn test_open_rejects_bad_url() {
        assert!(RedisStreamBus::open("not a url").is_err());
    }
}
