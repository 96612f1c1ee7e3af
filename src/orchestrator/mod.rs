//! The coordination core.
//!
//! The orchestrator listens on its own topic for both user requests and
//! stage results. Each accepted request becomes a [`Workflow`] in the
//! [`WorkflowTable`]; results are routed by sender to the transition table in
//! [`policy`], and every workflow gets a deadline watcher.
//!
//! Exactly one terminal message reaches the user per workflow: the routing
//! path and the watchers both go through [`WorkflowTable::remove`] and only
//! the caller that actually removed the workflow reports the outcome.

pub mod actor;
pub mod policy;
pub mod table;
pub mod tasks;
pub mod watcher;

pub use actor::{spawn_orchestrator, OrchestratorHandle};
pub use policy::Transition;
pub use table::WorkflowTable;
pub use tasks::TaskDefaults;

use serde_json::{json, Map, Value};
use std::sync::Arc;
use std::time::Duration;

use crate::bus::TransportError;
use crate::domain::{
    ContextId, FailureKind, RoutingAnomaly, TravelRequest, ValidationError, Workflow,
    WorkflowId, WorkflowServices, WorkflowStage,
};
use crate::protocol::{Message, MessageKind, OutcomeStatus, Role, StageRole};
use crate::publisher::ReliablePublisher;
use crate::transition_log::TransitionLog;
use tasks::TaskContext;

/// Timing and defaults for the orchestrator.
#[derive(Debug, Clone)]
pub struct OrchestratorSettings {
    /// Time a workflow may stay active before it is timed out.
    pub deadline: Duration,
    /// How often a watcher re-checks its workflow.
    pub watcher_interval: Duration,
    pub defaults: TaskDefaults,
}

impl Default for OrchestratorSettings {
    fn default() -> Self {
        Self {
            deadline: Duration::from_secs(120),
            watcher_interval: Duration::from_secs(5),
            defaults: TaskDefaults::default(),
        }
    }
}

/// What routing one message did.
#[derive(Debug, Clone, PartialEq)]
pub enum RouteOutcome {
    /// A new workflow was created and its first task sent.
    Accepted { workflow_id: WorkflowId },
    /// The user request failed validation; no workflow exists.
    Rejected(ValidationError),
    /// The workflow moved on and now awaits `stage`.
    Advanced {
        workflow_id: WorkflowId,
        stage: StageRole,
    },
    Completed { workflow_id: WorkflowId },
    Failed {
        workflow_id: WorkflowId,
        failure: FailureKind,
    },
    /// The message was logged and discarded.
    Dropped(RoutingAnomaly),
}

impl std::fmt::Display for RouteOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Accepted { workflow_id } => write!(f, "accepted {}", workflow_id),
            Self::Rejected(e) => write!(f, "rejected: {}", e),
            Self::Advanced { workflow_id, stage } => {
                write!(f, "{} awaiting {}", workflow_id, stage)
            }
            Self::Completed { workflow_id } => write!(f, "{} completed", workflow_id),
            Self::Failed {
                workflow_id,
                failure,
            } => write!(f, "{} failed: {}", workflow_id, failure.user_message()),
            Self::Dropped(anomaly) => write!(f, "dropped: {}", anomaly),
        }
    }
}

enum Terminal {
    Completed { itinerary: Value },
    Failed(FailureKind),
}

#[derive(Clone)]
pub struct Orchestrator {
    publisher: ReliablePublisher,
    table: WorkflowTable,
    settings: Arc<OrchestratorSettings>,
    services: WorkflowServices,
    transitions: Option<Arc<TransitionLog>>,
}

impl Orchestrator {
    pub fn new(
        publisher: ReliablePublisher,
        settings: OrchestratorSettings,
        services: WorkflowServices,
    ) -> Self {
        Self {
            publisher,
            table: WorkflowTable::new(),
            settings: Arc::new(settings),
            services,
            transitions: None,
        }
    }

    pub fn with_transition_log(mut self, log: Arc<TransitionLog>) -> Self {
        self.transitions = Some(log);
        self
    }

    pub fn table(&self) -> &WorkflowTable {
        &self.table
    }

    pub fn publisher(&self) -> &ReliablePublisher {
        &self.publisher
    }

    /// Drops every pipeline topic so a fresh run does not see stale records.
    /// The dead-letter topic is kept.
    pub async fn reset_pipeline(&self) -> Result<(), TransportError> {
        let topics = self.publisher.topics().pipeline_topics();
        for topic in &topics {
            self.publisher.bus().clear(topic).await?;
        }
        tracing::info!(topics = topics.len(), "Cleared pipeline topics");
        Ok(())
    }

    fn task_context(&self) -> TaskContext<'_> {
        TaskContext::new(&self.settings.defaults, self.services.clock.today())
    }

    /// Routes one message from the orchestrator topic.
    pub async fn route(&self, message: Message) -> RouteOutcome {
        if message.receiver != Role::Orchestrator {
            let anomaly = RoutingAnomaly::Unexpected(format!("message for {}", message.receiver));
            return self.drop_message(anomaly, &message);
        }
        match message.sender.clone() {
            Role::User => self.accept_request(message).await,
            Role::Stage(stage) => self.on_stage_result(stage, message).await,
            Role::Orchestrator => self.drop_message(
                RoutingAnomaly::Unexpected("message from orchestrator".into()),
                &message,
            ),
            Role::Unknown(name) => self.drop_message(RoutingAnomaly::UnknownSender(name), &message),
        }
    }

    async fn accept_request(&self, message: Message) -> RouteOutcome {
        let context_id = message.context_id;
        let request = match TravelRequest::from_payload(&message.payload) {
            Ok(request) => request,
            Err(e) => {
                tracing::warn!(context_id = %context_id, error = %e, "Rejecting travel request");
                let payload = failed_payload(None, &e.to_string());
                self.notify_user(&context_id, None, payload).await;
                return RouteOutcome::Rejected(e);
            }
        };

        let clock = &self.services.clock;
        let workflow_id = clock.workflow_id(&context_id);
        let workflow = Workflow::new(workflow_id.clone(), context_id.clone(), request, clock.now());
        let first = policy::start(&workflow, &self.task_context());

        tracing::info!(
            workflow_id = %workflow_id,
            context_id = %context_id,
            destination = %workflow.original_request.destination,
            travelers = workflow.original_request.travelers,
            budget = workflow.original_request.budget,
            "New trip request"
        );
        if !self.table.insert(workflow).await {
            let anomaly = RoutingAnomaly::Unexpected(format!("duplicate workflow id {}", workflow_id));
            tracing::error!(workflow_id = %workflow_id, "Workflow id already active");
            return RouteOutcome::Dropped(anomaly);
        }
        if let Some(log) = &self.transitions {
            log.log_created(&workflow_id, context_id.as_str());
        }
        watcher::spawn_watcher(
            self.clone(),
            workflow_id.clone(),
            self.settings.deadline,
            self.settings.watcher_interval,
        );

        match self.apply(&workflow_id, first).await {
            failed @ RouteOutcome::Failed { .. } => failed,
            _ => RouteOutcome::Accepted { workflow_id },
        }
    }

    async fn on_stage_result(&self, stage: StageRole, message: Message) -> RouteOutcome {
        if message.kind != MessageKind::Result {
            let anomaly = RoutingAnomaly::Unexpected(format!("task from {}", stage));
            return self.drop_message(anomaly, &message);
        }
        let Some(workflow_id) = message.routing_workflow_id() else {
            return self.drop_message(RoutingAnomaly::MissingWorkflowId, &message);
        };

        let cx = self.task_context();
        let payload = &message.payload;
        let decided = self
            .table
            .update(&workflow_id, |wf| {
                if wf.stage() != WorkflowStage::Awaiting(stage) {
                    return Err(RoutingAnomaly::OutOfOrder {
                        from: stage,
                        expected: wf.stage().to_string(),
                    });
                }
                wf.record(stage, payload.clone());
                Ok(policy::on_result(wf, stage, payload, &cx))
            })
            .await;

        match decided {
            None => self.drop_message(RoutingAnomaly::UnknownWorkflow, &message),
            Some(Err(anomaly)) => self.drop_message(anomaly, &message),
            Some(Ok(transition)) => {
                tracing::info!(workflow_id = %workflow_id, stage = %stage, "Stage result received");
                self.apply(&workflow_id, transition).await
            }
        }
    }

    async fn apply(&self, workflow_id: &WorkflowId, transition: Transition) -> RouteOutcome {
        match transition {
            Transition::Dispatch { stage, task } => self.dispatch(workflow_id, stage, task).await,
            Transition::Complete { itinerary } => {
                self.finish(workflow_id, Terminal::Completed { itinerary })
                    .await
            }
            Transition::Fail(failure) => self.finish(workflow_id, Terminal::Failed(failure)).await,
        }
    }

    /// Moves the workflow to `stage` and sends its task. Undeliverable tasks
    /// follow the stage's failure policy, which may skip ahead or fail the
    /// workflow.
    async fn dispatch(
        &self,
        workflow_id: &WorkflowId,
        mut stage: StageRole,
        mut task: Map<String, Value>,
    ) -> RouteOutcome {
        let cx = self.task_context();
        loop {
            let next = WorkflowStage::Awaiting(stage);
            let moved = self
                .table
                .update(workflow_id, |wf| {
                    let from = wf.stage();
                    wf.advance(next).map(|_| (from, wf.context_id.clone()))
                })
                .await;
            let context_id = match moved {
                None => return RouteOutcome::Dropped(RoutingAnomaly::UnknownWorkflow),
                Some(Err(e)) => {
                    tracing::error!(workflow_id = %workflow_id, error = %e, "Illegal transition");
                    return RouteOutcome::Dropped(RoutingAnomaly::Unexpected(e.to_string()));
                }
                Some(Ok((from, context_id))) => {
                    if let Some(log) = &self.transitions {
                        log.log_transition(workflow_id, from, next);
                    }
                    context_id
                }
            };

            let message = Message::task(stage, context_id, workflow_id.clone(), task);
            let error = match self.publisher.send_with_retry(&message).await {
                Ok(record_id) => {
                    tracing::info!(
                        workflow_id = %workflow_id,
                        stage = %stage,
                        record_id = %record_id,
                        "Task dispatched"
                    );
                    return RouteOutcome::Advanced {
                        workflow_id: workflow_id.clone(),
                        stage,
                    };
                }
                Err(e) => e,
            };

            tracing::warn!(
                workflow_id = %workflow_id,
                stage = %stage,
                dead_lettered = error.dead_lettered,
                error = %error,
                "Task undeliverable"
            );
            let fallback = self
                .table
                .read(workflow_id, |wf| {
                    policy::on_undeliverable(wf, stage, &error.to_string(), &cx)
                })
                .await;
            match fallback {
                None => return RouteOutcome::Dropped(RoutingAnomaly::UnknownWorkflow),
                Some(Transition::Dispatch {
                    stage: next_stage,
                    task: next_task,
                }) => {
                    stage = next_stage;
                    task = next_task;
                }
                Some(Transition::Complete { itinerary }) => {
                    return self
                        .finish(workflow_id, Terminal::Completed { itinerary })
                        .await
                }
                Some(Transition::Fail(failure)) => {
                    return self.finish(workflow_id, Terminal::Failed(failure)).await
                }
            }
        }
    }

    /// Times out a workflow that is still active. Returns false when the
    /// workflow already finished.
    pub async fn expire(&self, workflow_id: &WorkflowId) -> bool {
        let failure = FailureKind::Timeout {
            after_secs: self.settings.deadline.as_secs(),
        };
        let outcome = self.finish(workflow_id, Terminal::Failed(failure)).await;
        matches!(outcome, RouteOutcome::Failed { .. })
    }

    async fn finish(&self, workflow_id: &WorkflowId, terminal: Terminal) -> RouteOutcome {
        let Some(mut workflow) = self.table.remove(workflow_id).await else {
            return RouteOutcome::Dropped(RoutingAnomaly::UnknownWorkflow);
        };
        let from = workflow.stage();

        let (next, payload, outcome) = match terminal {
            Terminal::Completed { itinerary } => {
                let payload = completed_payload(workflow_id, itinerary, workflow.elapsed_secs());
                tracing::info!(
                    workflow_id = %workflow_id,
                    processing_secs = workflow.elapsed_secs(),
                    "Workflow completed"
                );
                (
                    WorkflowStage::Completed,
                    payload,
                    RouteOutcome::Completed {
                        workflow_id: workflow_id.clone(),
                    },
                )
            }
            Terminal::Failed(failure) => {
                let next = match failure {
                    FailureKind::Timeout { .. } => WorkflowStage::TimedOut,
                    _ => WorkflowStage::Failed,
                };
                let error = failure.user_message();
                if next == WorkflowStage::TimedOut {
                    tracing::warn!(workflow_id = %workflow_id, at = %from, "Workflow timed out");
                } else {
                    tracing::warn!(workflow_id = %workflow_id, at = %from, error = %error, "Workflow failed");
                }
                (
                    next,
                    failed_payload(Some(workflow_id), &error),
                    RouteOutcome::Failed {
                        workflow_id: workflow_id.clone(),
                        failure,
                    },
                )
            }
        };

        if let Err(e) = workflow.advance(next) {
            tracing::error!(workflow_id = %workflow_id, error = %e, "Illegal terminal transition");
        }
        if let Some(log) = &self.transitions {
            log.log_transition(workflow_id, from, next);
            let failure = match &outcome {
                RouteOutcome::Failed { failure, .. } => Some(failure),
                _ => None,
            };
            log.log_outcome(&workflow, failure);
        }

        self.notify_user(&workflow.context_id, Some(workflow_id), payload)
            .await;
        outcome
    }

    async fn notify_user(
        &self,
        context_id: &ContextId,
        workflow_id: Option<&WorkflowId>,
        payload: Map<String, Value>,
    ) {
        let message = Message::result(
            Role::Orchestrator,
            Role::User,
            context_id.clone(),
            workflow_id.cloned(),
            payload,
        );
        if let Err(e) = self.publisher.send_with_retry(&message).await {
            tracing::error!(context_id = %context_id, error = %e, "Could not notify user");
        }
    }

    fn drop_message(&self, anomaly: RoutingAnomaly, message: &Message) -> RouteOutcome {
        let workflow_id = message.routing_workflow_id();
        tracing::warn!(
            sender = %message.sender,
            context_id = %message.context_id,
            workflow_id = ?workflow_id,
            reason = %anomaly,
            "Dropping message"
        );
        RouteOutcome::Dropped(anomaly)
    }
}

fn completed_payload(workflow_id: &WorkflowId, itinerary: Value, processing_secs: f64) -> Map<String, Value> {
    let mut payload = Map::new();
    payload.insert("status".into(), json!(OutcomeStatus::Completed));
    payload.insert("itinerary".into(), itinerary);
    payload.insert("workflow_id".into(), json!(workflow_id.as_str()));
    payload.insert("processing_time".into(), json!(processing_secs));
    payload
}

fn failed_payload(workflow_id: Option<&WorkflowId>, error: &str) -> Map<String, Value> {
    let mut payload = Map::new();
    payload.insert("status".into(), json!(OutcomeStatus::Failed));
    payload.insert("error".into(), json!(error));
    if let Some(id) = workflow_id {
        payload.insert("workflow_id".into(), json!(id.as_str()));
    }
    payload
}

#[cfg(test)]
#[path = "tests/orchestrator_tests.rs"]
mod tests;
