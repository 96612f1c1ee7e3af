//! The orchestrator-owned coordination record for one travel request.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fmt;
use tokio::time::Instant;

use crate::domain::request::TravelRequest;
use crate::domain::types::{ContextId, TimestampUtc, WorkflowId};
use crate::protocol::StageRole;

/// Position of a workflow in the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowStage {
    Created,
    Awaiting(StageRole),
    Completed,
    Failed,
    TimedOut,
}

impl WorkflowStage {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            WorkflowStage::Completed | WorkflowStage::Failed | WorkflowStage::TimedOut
        )
    }

    /// Whether `next` is a legal successor of this stage.
    ///
    /// Stages advance strictly in pipeline order; skipping forward is allowed
    /// because undeliverable non-fatal tasks are bypassed. Failure and timeout
    /// are reachable from every non-terminal stage.
    pub fn can_advance_to(self, next: WorkflowStage) -> bool {
        use WorkflowStage::*;
        match (self, next) {
            (from, _) if from.is_terminal() => false,
            (_, Failed) | (_, TimedOut) => true,
            (Created, Awaiting(_)) => true,
            (Awaiting(current), Awaiting(to)) => to > current,
            (Awaiting(StageRole::Itinerary), Completed) => true,
            _ => false,
        }
    }

    pub fn status(self) -> WorkflowStatus {
        match self {
            WorkflowStage::Created | WorkflowStage::Awaiting(_) => WorkflowStatus::Running,
            WorkflowStage::Completed => WorkflowStatus::Completed,
            WorkflowStage::Failed => WorkflowStatus::Failed,
            WorkflowStage::TimedOut => WorkflowStatus::TimedOut,
        }
    }
}

impl fmt::Display for WorkflowStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WorkflowStage::Created => f.write_str("created"),
            WorkflowStage::Awaiting(stage) => write!(f, "{}", stage.label()),
            WorkflowStage::Completed => f.write_str("completed"),
            WorkflowStage::Failed => f.write_str("failed"),
            WorkflowStage::TimedOut => f.write_str("timed_out"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowStatus {
    Running,
    Completed,
    Failed,
    TimedOut,
}

/// One in-flight travel request and the results gathered so far.
#[derive(Debug, Clone)]
pub struct Workflow {
    pub id: WorkflowId,
    pub context_id: ContextId,
    pub original_request: TravelRequest,
    stage: WorkflowStage,
    collected: BTreeMap<StageRole, Map<String, Value>>,
    pub started_at: TimestampUtc,
    started: Instant,
}

impl Workflow {
    pub fn new(
        id: WorkflowId,
        context_id: ContextId,
        original_request: TravelRequest,
        started_at: TimestampUtc,
    ) -> Self {
        Self {
            id,
            context_id,
            original_request,
            stage: WorkflowStage::Created,
            collected: BTreeMap::new(),
            started_at,
            started: Instant::now(),
        }
    }

    pub fn stage(&self) -> WorkflowStage {
        self.stage
    }

    pub fn status(&self) -> WorkflowStatus {
        self.stage.status()
    }

    /// Moves the workflow to `next`, rejecting illegal transitions.
    pub fn advance(&mut self, next: WorkflowStage) -> anyhow::Result<()> {
        if !self.stage.can_advance_to(next) {
            anyhow::bail!(
                "workflow {} cannot move from {} to {}",
                self.id,
                self.stage,
                next
            );
        }
        self.stage = next;
        Ok(())
    }

    /// Stores the latest result payload of a stage.
    pub fn record(&mut self, stage: StageRole, payload: Map<String, Value>) {
        self.collected.insert(stage, payload);
    }

    pub fn collected(&self, stage: StageRole) -> Option<&Map<String, Value>> {
        self.collected.get(&stage)
    }

    /// Seconds elapsed since the workflow was accepted.
    pub fn elapsed_secs(&self) -> f64 {
        self.started.elapsed().as_secs_f64()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn workflow() -> Workflow {
        let payload = json!({"destination": "Goa", "budget": 100, "travelers": 1});
        let request = TravelRequest::from_payload(payload.as_object().unwrap()).unwrap();
        Workflow::new(
            WorkflowId::from("wf_ctx_1"),
            ContextId::from("ctx"),
            request,
            TimestampUtc::now(),
        )
    }

    #[test]
    fn test_stages_advance_in_order() {
        let mut wf = workflow();
        assert_eq!(wf.status(), WorkflowStatus::Running);
        for stage in StageRole::ALL {
            wf.advance(WorkflowStage::Awaiting(stage)).unwrap();
        }
        wf.advance(WorkflowStage::Completed).unwrap();
        assert_eq!(wf.status(), WorkflowStatus::Completed);
    }

    #[test]
    fn test_backward_and_post_terminal_moves_are_rejected() {
        let mut wf = workflow();
        wf.advance(WorkflowStage::Awaiting(StageRole::Hotel)).unwrap();
        assert!(wf
            .advance(WorkflowStage::Awaiting(StageRole::Flight))
            .is_err());
        assert!(wf.advance(WorkflowStage::Completed).is_err());

        wf.advance(WorkflowStage::TimedOut).unwrap();
        assert!(wf.advance(WorkflowStage::Failed).is_err());
        assert_eq!(wf.status(), WorkflowStatus::TimedOut);
    }

    #[test]
    fn test_failure_reachable_from_created() {
        assert!(WorkflowStage::Created.can_advance_to(WorkflowStage::Failed));
        assert!(!WorkflowStage::Created.can_advance_to(WorkflowStage::Completed));
    }

    #[test]
    fn test_collected_keeps_last_payload() {
        let mut wf = workflow();
        let first = json!({"n": 1}).as_object().cloned().unwrap();
        let second = json!({"n": 2}).as_object().cloned().unwrap();
        wf.record(StageRole::Weather, first);
        wf.record(StageRole::Weather, second);
        assert_eq!(wf.collected(StageRole::Weather).unwrap()["n"], json!(2));
        assert!(wf.collected(StageRole::Hotel).is_none());
    }
}
