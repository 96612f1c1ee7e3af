//! The per-stage transition table.
//!
//! Pure functions from (workflow, stage, payload) to the next step. The
//! routing path records the result on the workflow first and then asks here
//! what to do with it.

use serde_json::{Map, Value};

use super::tasks::{self, TaskContext};
use crate::domain::failure::{FALLBACK_FLIGHT_SHARE, OVERRUN_HOTEL_SHARE};
use crate::domain::{failure_policy, FailureKind, OnStageFailure, Workflow};
use crate::protocol::StageRole;

/// What the orchestrator does next for a workflow.
#[derive(Debug, Clone, PartialEq)]
pub enum Transition {
    /// Emit `task` to `stage` and wait for its result.
    Dispatch {
        stage: StageRole,
        task: Map<String, Value>,
    },
    /// Relay the itinerary to the user.
    Complete { itinerary: Value },
    /// Relay the failure to the user.
    Fail(FailureKind),
}

/// First step of a new workflow.
pub fn start(wf: &Workflow, cx: &TaskContext<'_>) -> Transition {
    Transition::Dispatch {
        stage: StageRole::Budget,
        task: tasks::budget_task(wf, cx),
    }
}

/// Decides the next step after `from` reported `payload`.
pub fn on_result(
    wf: &Workflow,
    from: StageRole,
    payload: &Map<String, Value>,
    cx: &TaskContext<'_>,
) -> Transition {
    match from {
        StageRole::Budget => match flight_allocation(payload) {
            Some(flight_budget) => Transition::Dispatch {
                stage: StageRole::Flight,
                task: tasks::flight_task(
                    wf,
                    cx,
                    flight_budget,
                    payload.get("optimized_budget").cloned(),
                ),
            },
            None => {
                tracing::info!(workflow_id = %wf.id, "No budget allocation, using fallback flight budget");
                continue_after(wf, StageRole::Budget, cx)
            }
        },
        StageRole::Flight => {
            if payload.get("success").and_then(Value::as_bool) == Some(true) {
                Transition::Dispatch {
                    stage: StageRole::Hotel,
                    task: tasks::hotel_task(wf, cx, remaining_budget(wf)),
                }
            } else {
                Transition::Fail(FailureKind::StageFailure {
                    stage: StageRole::Flight,
                    error: stage_error(payload, "No flights available"),
                })
            }
        }
        StageRole::Hotel | StageRole::Weather => continue_after(wf, from, cx),
        StageRole::Itinerary => match payload.get("itinerary") {
            Some(itinerary) if has_content(itinerary) => Transition::Complete {
                itinerary: itinerary.clone(),
            },
            _ => Transition::Fail(FailureKind::StageFailure {
                stage: StageRole::Itinerary,
                error: stage_error(payload, "Itinerary generation failed"),
            }),
        },
    }
}

/// Decides the next step after the task for `stage` could not be delivered.
pub fn on_undeliverable(
    wf: &Workflow,
    stage: StageRole,
    error: &str,
    cx: &TaskContext<'_>,
) -> Transition {
    match failure_policy(stage) {
        OnStageFailure::Abort => Transition::Fail(FailureKind::Undeliverable {
            stage,
            error: error.to_string(),
        }),
        OnStageFailure::FallbackAllocation | OnStageFailure::ContinueDegraded => {
            continue_after(wf, stage, cx)
        }
    }
}

/// The step following a non-fatal stage, whatever that stage produced.
fn continue_after(wf: &Workflow, stage: StageRole, cx: &TaskContext<'_>) -> Transition {
    match stage {
        StageRole::Budget => Transition::Dispatch {
            stage: StageRole::Flight,
            task: tasks::flight_task(
                wf,
                cx,
                wf.original_request.budget * FALLBACK_FLIGHT_SHARE,
                None,
            ),
        },
        StageRole::Hotel => Transition::Dispatch {
            stage: StageRole::Weather,
            task: tasks::weather_task(wf, cx),
        },
        StageRole::Weather => Transition::Dispatch {
            stage: StageRole::Itinerary,
            task: tasks::itinerary_task(wf, cx),
        },
        StageRole::Flight | StageRole::Itinerary => Transition::Fail(FailureKind::StageFailure {
            stage,
            error: format!("{} stage failed", stage.label()),
        }),
    }
}

/// The flight share from a budget result, if the stage produced one.
pub fn flight_allocation(payload: &Map<String, Value>) -> Option<f64> {
    payload
        .get("optimized_budget")?
        .get("category_allocations")?
        .get("flights")?
        .as_f64()
        .filter(|amount| amount.is_finite() && *amount > 0.0)
}

/// Budget left for hotels after flights; 60% of the total when flights
/// consumed all of it.
pub fn remaining_budget(wf: &Workflow) -> f64 {
    let total = wf.original_request.budget;
    let remaining = total - tasks::total_flight_cost(wf);
    if remaining <= 0.0 {
        tracing::warn!(workflow_id = %wf.id, total, "Flights overran the budget");
        total * OVERRUN_HOTEL_SHARE
    } else {
        remaining
    }
}

fn has_content(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::String(s) => !s.trim().is_empty(),
        Value::Array(items) => !items.is_empty(),
        Value::Object(map) => !map.is_empty(),
        Value::Bool(b) => *b,
        Value::Number(_) => true,
    }
}

fn stage_error(payload: &Map<String, Value>, fallback: &str) -> String {
    payload
        .get("error")
        .and_then(Value::as_str)
        .filter(|e| !e.is_empty())
        .unwrap_or(fallback)
        .to_string()
}

#[cfg(test)]
#[path = "tests/policy_tests.rs"]
mod tests;
