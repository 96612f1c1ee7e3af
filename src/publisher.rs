//! Retrying publisher with a dead-letter fallback.
//!
//! `send_with_retry` attempts a bus append a bounded number of times with
//! exponential backoff. When every attempt fails the message is captured in a
//! [`DeadLetterRecord`] on the dead-letter topic and the caller gets a
//! [`DeliveryError`]; callers treat that as final and never retry themselves.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

use crate::bus::{Bus, RecordId, TransportError};
use crate::protocol::{DeadLetterRecord, Message, Role, Topic, TopicNames};

/// Retry/backoff policy for bus appends.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Total attempts including the first one.
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    /// Randomize each delay by ±25%.
    pub jitter: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 100,
            max_delay_ms: 2000,
            jitter: true,
        }
    }
}

impl RetryPolicy {
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.max_attempts == 0 {
            anyhow::bail!("retry.max_attempts must be at least 1");
        }
        if self.base_delay_ms > self.max_delay_ms {
            anyhow::bail!(
                "retry.base_delay_ms ({}) exceeds retry.max_delay_ms ({})",
                self.base_delay_ms,
                self.max_delay_ms
            );
        }
        Ok(())
    }

    /// Delay before the attempt following failed attempt number `attempt`
    /// (1-based): base × 2^(attempt−1), capped at the maximum.
    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(20);
        let delay_ms = self
            .base_delay_ms
            .saturating_mul(2u64.pow(exponent))
            .min(self.max_delay_ms);
        if !self.jitter {
            return Duration::from_millis(delay_ms);
        }
        let jitter = (delay_ms as f64 * 0.25 * (rand::random::<f64>() * 2.0 - 1.0)) as i64;
        Duration::from_millis((delay_ms as i64 + jitter).max(1) as u64)
    }
}

/// A send that exhausted its retries.
#[derive(Debug, Error)]
#[error("delivery to {topic} failed after {attempts} attempt(s): {source}")]
pub struct DeliveryError {
    pub topic: Topic,
    pub attempts: u32,
    #[source]
    pub source: TransportError,
    /// Whether the dead-letter record was written.
    pub dead_lettered: bool,
}

/// Publishes messages to the topic named after their receiver.
#[derive(Clone)]
pub struct ReliablePublisher {
    bus: Arc<dyn Bus>,
    topics: TopicNames,
    policy: RetryPolicy,
    agent: Role,
}

impl ReliablePublisher {
    /// `agent` is recorded as `failed_by_agent` on dead letters.
    pub fn new(bus: Arc<dyn Bus>, topics: TopicNames, policy: RetryPolicy, agent: Role) -> Self {
        Self {
            bus,
            topics,
            policy,
            agent,
        }
    }

    /// Same bus and policy, publishing on behalf of another agent.
    pub fn for_agent(&self, agent: Role) -> Self {
        Self {
            agent,
            ..self.clone()
        }
    }

    pub fn bus(&self) -> &Arc<dyn Bus> {
        &self.bus
    }

    pub fn topics(&self) -> &TopicNames {
        &self.topics
    }

    /// Publishes `message` to its receiver's topic, retrying transient
    /// transport failures.
    pub async fn send_with_retry(&self, message: &Message) -> Result<RecordId, DeliveryError> {
        let topic = self.topics.for_role(&message.receiver);
        let max_attempts = self.policy.max_attempts.max(1);
        let mut attempts = 0;

        let error = loop {
            attempts += 1;
            match self.bus.publish(&topic, message).await {
                Ok(id) => {
                    if attempts > 1 {
                        tracing::info!(topic = %topic, attempts, "Delivered after retry");
                    }
                    return Ok(id);
                }
                Err(e) if e.is_retryable() && attempts < max_attempts => {
                    let delay = self.policy.backoff_delay(attempts);
                    tracing::warn!(
                        topic = %topic,
                        attempt = attempts,
                        max_attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "Publish failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(e) => break e,
            }
        };

        tracing::error!(
            topic = %topic,
            attempts,
            sender = %message.sender,
            context_id = %message.context_id,
            error = %error,
            "Publish retries exhausted, dead-lettering message"
        );
        let dead_lettered = self.dead_letter(message, &error).await;

        Err(DeliveryError {
            topic,
            attempts,
            source: error,
            dead_lettered,
        })
    }

    async fn dead_letter(&self, message: &Message, error: &TransportError) -> bool {
        let record = DeadLetterRecord::new(&self.agent, message, error.to_string());
        let dead_letter_topic = self.topics.dead_letter();
        let written = match serde_json::to_string(&record) {
            Ok(payload) => self.bus.append(&dead_letter_topic, &payload).await,
            Err(e) => Err(TransportError::Encode(e)),
        };
        match written {
            Ok(id) => {
                tracing::warn!(record_id = %id, topic = %dead_letter_topic, "Dead letter recorded");
                true
            }
            Err(e) => {
                tracing::error!(
                    topic = %dead_letter_topic,
                    error = %e,
                    "Failed to record dead letter; message is lost"
                );
                false
            }
        }
    }
}

#[cfg(test)]
#[path = "tests/publisher_tests.rs"]
mod tests;
