//! Stage worker runtime.
//!
//! A [`StageWorker`] listens on its stage topic, runs a [`StageHandler`] for
//! each task on a bounded pool and sends exactly one result back to the
//! orchestrator. Handler errors become results carrying `error` and
//! `success: false` so the orchestrator can apply its failure policy.

pub mod reference;

use async_trait::async_trait;
use serde_json::{json, Map, Value};
use std::sync::Arc;
use tokio::sync::{watch, Semaphore};
use tokio::task::JoinHandle;

use crate::bus::{self, Consumer, PollSettings, TransportError};
use crate::protocol::{Message, MessageKind, Role, StageRole};
use crate::publisher::ReliablePublisher;

/// The work behind one pipeline stage.
#[async_trait]
pub trait StageHandler: Send + Sync {
    fn role(&self) -> StageRole;

    /// Produces the result payload for a task.
    async fn handle(&self, task: &Message) -> anyhow::Result<Map<String, Value>>;
}

#[derive(Clone)]
pub struct StageWorker {
    handler: Arc<dyn StageHandler>,
    publisher: ReliablePublisher,
    permits: Arc<Semaphore>,
}

impl StageWorker {
    pub fn new(
        handler: Arc<dyn StageHandler>,
        publisher: ReliablePublisher,
        max_concurrency: usize,
    ) -> Self {
        Self {
            handler,
            publisher,
            permits: Arc::new(Semaphore::new(max_concurrency.max(1))),
        }
    }

    pub fn role(&self) -> StageRole {
        self.handler.role()
    }

    /// Runs the handler for one task and sends its result. Returns the result
    /// message, or `None` when the message was not a task for this stage.
    pub async fn process(&self, task: Message) -> Option<Message> {
        let role = self.role();
        if task.kind != MessageKind::Task || task.receiver != Role::Stage(role) {
            tracing::warn!(
                stage = %role,
                sender = %task.sender,
                kind = ?task.kind,
                "Skipping unexpected message"
            );
            return None;
        }
        let workflow_id = task.routing_workflow_id();

        let mut payload = match self.handler.handle(&task).await {
            Ok(payload) => payload,
            Err(e) => {
                tracing::error!(stage = %role, workflow_id = ?workflow_id, error = %e, "Stage failed");
                let mut failed = Map::new();
                failed.insert("success".into(), json!(false));
                failed.insert("status".into(), json!("failed"));
                failed.insert("error".into(), json!(e.to_string()));
                failed
            }
        };
        if let Some(id) = &workflow_id {
            payload.insert("workflow_id".into(), json!(id.as_str()));
        }

        let result = Message::result(
            Role::Stage(role),
            Role::Orchestrator,
            task.context_id,
            workflow_id,
            payload,
        );
        if let Err(e) = self.publisher.send_with_retry(&result).await {
            tracing::error!(stage = %role, error = %e, "Could not deliver stage result");
        }
        Some(result)
    }

    /// Starts listening on the stage topic. Only tasks appended after this
    /// returns are processed.
    pub async fn spawn(
        self,
        poll: PollSettings,
        shutdown: watch::Receiver<bool>,
    ) -> Result<JoinHandle<()>, TransportError> {
        let topic = self.publisher.topics().for_stage(self.role());
        let consumer = Consumer::from_now(self.publisher.bus().clone(), topic.clone()).await?;
        tracing::info!(stage = %self.role(), topic = %topic, "Stage worker listening");

        Ok(tokio::spawn(bus::listen(consumer, poll, shutdown, move |task| {
            let worker = self.clone();
            async move {
                // Waiting for a permit here holds the listener back, which
                // bounds the number of tasks in flight.
                let Ok(permit) = worker.permits.clone().acquire_owned().await else {
                    return;
                };
                tokio::spawn(async move {
                    worker.process(task).await;
                    drop(permit);
                });
            }
        })))
    }
}

/// Starts one worker per handler, each publishing as its own stage.
pub async fn spawn_stage_workers(
    handlers: Vec<Arc<dyn StageHandler>>,
    publisher: &ReliablePublisher,
    max_concurrency: usize,
    poll: PollSettings,
    shutdown: watch::Receiver<bool>,
) -> Result<Vec<JoinHandle<()>>, TransportError> {
    let mut handles = Vec::with_capacity(handlers.len());
    for handler in handlers {
        let publisher = publisher.for_agent(Role::Stage(handler.role()));
        let worker = StageWorker::new(handler, publisher, max_concurrency);
        handles.push(worker.spawn(poll, shutdown.clone()).await?);
    }
    Ok(handles)
}

#[cfg(test)]
#[path = "tests/stage_tests.rs"]
mod tests;
