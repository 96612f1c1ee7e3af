//! Actor wrapper that makes the routing path single-writer.
//!
//! The bus listener forwards every decoded message to the
//! [`OrchestratorActor`], which routes them one at a time.

use async_trait::async_trait;
use ractor::{Actor, ActorProcessingErr, ActorRef};
use tokio::sync::{oneshot, watch};
use tokio::task::JoinHandle;

use super::{Orchestrator, RouteOutcome};
use crate::bus::{self, Consumer, PollSettings};
use crate::domain::WorkflowId;
use crate::protocol::{Message, Role};

/// Messages that can be sent to the orchestrator actor.
pub enum OrchestratorMsg {
    /// Route one message; the outcome is sent back when a reply channel is given.
    Route(Box<Message>, Option<oneshot::Sender<RouteOutcome>>),
    /// Ids of every active workflow.
    ActiveWorkflows(oneshot::Sender<Vec<WorkflowId>>),
}

pub struct OrchestratorActor;

#[async_trait]
impl Actor for OrchestratorActor {
    type Msg = OrchestratorMsg;
    type State = Orchestrator;
    type Arguments = Orchestrator;

    async fn pre_start(
        &self,
        _myself: ActorRef<Self::Msg>,
        orchestrator: Self::Arguments,
    ) -> Result<Self::State, ActorProcessingErr> {
        Ok(orchestrator)
    }

    async fn handle(
        &self,
        _myself: ActorRef<Self::Msg>,
        message: Self::Msg,
        orchestrator: &mut Self::State,
    ) -> Result<(), ActorProcessingErr> {
        match message {
            OrchestratorMsg::Route(message, reply) => {
                let outcome = orchestrator.route(*message).await;
                tracing::debug!(outcome = %outcome, "Message routed");
                if let Some(reply) = reply {
                    if reply.send(outcome).is_err() {
                        tracing::debug!("Route reply channel closed");
                    }
                }
            }
            OrchestratorMsg::ActiveWorkflows(reply) => {
                let ids = orchestrator.table().ids().await;
                if reply.send(ids).is_err() {
                    tracing::debug!("Active workflows reply channel closed");
                }
            }
        }
        Ok(())
    }
}

/// A running orchestrator: the actor plus its bus listener.
pub struct OrchestratorHandle {
    actor: ActorRef<OrchestratorMsg>,
    actor_task: JoinHandle<()>,
    listener: JoinHandle<()>,
}

impl OrchestratorHandle {
    /// Routes a message directly, bypassing the bus.
    #[cfg(test)]
    pub async fn route(&self, message: Message) -> anyhow::Result<RouteOutcome> {
        let (tx, rx) = oneshot::channel();
        self.actor
            .send_message(OrchestratorMsg::Route(Box::new(message), Some(tx)))
            .map_err(|e| anyhow::anyhow!("orchestrator actor unavailable: {}", e))?;
        Ok(rx.await?)
    }

    pub async fn active_workflows(&self) -> anyhow::Result<Vec<WorkflowId>> {
        let (tx, rx) = oneshot::channel();
        self.actor
            .send_message(OrchestratorMsg::ActiveWorkflows(tx))
            .map_err(|e| anyhow::anyhow!("orchestrator actor unavailable: {}", e))?;
        Ok(rx.await?)
    }

    /// Waits for the listener to observe shutdown, then stops the actor.
    pub async fn join(self) -> anyhow::Result<()> {
        self.listener.await?;
        self.actor.stop(None);
        self.actor_task.await?;
        Ok(())
    }
}

/// Starts the orchestrator actor and its listener on the orchestrator topic.
///
/// The listener only sees records appended after this returns; anything
/// already on the topic is skipped.
pub async fn spawn_orchestrator(
    orchestrator: Orchestrator,
    poll: PollSettings,
    shutdown: watch::Receiver<bool>,
) -> anyhow::Result<OrchestratorHandle> {
    let publisher = orchestrator.publisher();
    let topic = publisher.topics().for_role(&Role::Orchestrator);
    let consumer = Consumer::from_now(publisher.bus().clone(), topic.clone()).await?;

    let (actor, actor_task) =
        OrchestratorActor::spawn(None, OrchestratorActor, orchestrator).await?;

    let listener = {
        let actor = actor.clone();
        tokio::spawn(bus::listen(consumer, poll, shutdown, move |message| {
            let actor = actor.clone();
            async move {
                if let Err(e) = actor.send_message(OrchestratorMsg::Route(Box::new(message), None)) {
                    tracing::error!(error = %e, "Orchestrator actor unavailable, message lost");
                }
            }
        }))
    };
    tracing::info!(topic = %topic, "Orchestrator listening");

    Ok(OrchestratorHandle {
        actor,
        actor_task,
        listener,
    })
}
