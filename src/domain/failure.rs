//! Failure taxonomy and the per-stage failure policy.
//!
//! Only the flight and itinerary stages abort a workflow. Budget, hotel and
//! weather failures degrade to defaults and the pipeline continues.

use serde::{Deserialize, Serialize};

use crate::protocol::StageRole;

/// Share of the total budget given to flights when no allocation is known.
pub const FALLBACK_FLIGHT_SHARE: f64 = 0.4;

/// Share of the total budget left for hotels when flights overrun it.
pub const OVERRUN_HOTEL_SHARE: f64 = 0.6;

/// What the orchestrator does when a stage fails or cannot be reached.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OnStageFailure {
    /// Size the next task from a fixed share of the total budget.
    FallbackAllocation,
    /// Continue with whatever (possibly empty) data is available.
    ContinueDegraded,
    /// Fail the workflow and relay the error to the user.
    Abort,
}

/// The failure policy table.
pub fn failure_policy(stage: StageRole) -> OnStageFailure {
    match stage {
        StageRole::Budget => OnStageFailure::FallbackAllocation,
        StageRole::Flight => OnStageFailure::Abort,
        StageRole::Hotel => OnStageFailure::ContinueDegraded,
        StageRole::Weather => OnStageFailure::ContinueDegraded,
        StageRole::Itinerary => OnStageFailure::Abort,
    }
}

/// Canonical reasons a workflow or message did not go the happy path.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum FailureKind {
    /// A stage reported failure.
    StageFailure { stage: StageRole, error: String },
    /// A task for a stage could not be delivered.
    Undeliverable { stage: StageRole, error: String },
    /// The workflow exceeded its deadline.
    Timeout { after_secs: u64 },
}

impl FailureKind {
    /// Message relayed to the user for a fatal failure.
    pub fn user_message(&self) -> String {
        match self {
            FailureKind::StageFailure { error, .. } => error.clone(),
            FailureKind::Undeliverable { stage, error } => {
                format!("Could not reach {}: {}", stage, error)
            }
            FailureKind::Timeout { after_secs } => {
                if after_secs % 60 == 0 {
                    let minutes = after_secs / 60;
                    let unit = if minutes == 1 { "minute" } else { "minutes" };
                    format!("Planning timed out after {} {}", minutes, unit)
                } else {
                    format!("Planning timed out after {} seconds", after_secs)
                }
            }
        }
    }
}

/// Results and messages the orchestrator discards without telling the user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RoutingAnomaly {
    MissingWorkflowId,
    UnknownWorkflow,
    UnknownSender(String),
    /// A result from a stage the workflow is not waiting on.
    OutOfOrder {
        from: StageRole,
        expected: String,
    },
    /// A message the orchestrator never expects on its topic.
    Unexpected(String),
}

impl std::fmt::Display for RoutingAnomaly {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::MissingWorkflowId => write!(f, "result carries no workflow id"),
            Self::UnknownWorkflow => write!(f, "workflow is not active"),
            Self::UnknownSender(sender) => write!(f, "unknown sender '{}'", sender),
            Self::OutOfOrder { from, expected } => {
                write!(f, "result from {} while workflow is at {}", from, expected)
            }
            Self::Unexpected(what) => write!(f, "unexpected message: {}", what),
        }
    }
}
