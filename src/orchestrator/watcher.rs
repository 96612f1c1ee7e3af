//! Per-workflow deadline watcher.

use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::Instant;

use super::Orchestrator;
use crate::domain::WorkflowId;

/// Spawns the watcher for a freshly created workflow.
///
/// The watcher sleeps in steps of at most `interval` and stops as soon as the
/// workflow is gone from the active set. If the workflow is still there at
/// the deadline it is expired.
pub fn spawn_watcher(
    orchestrator: Orchestrator,
    workflow_id: WorkflowId,
    deadline: Duration,
    interval: Duration,
) -> JoinHandle<bool> {
    tokio::spawn(async move { watch(orchestrator, workflow_id, deadline, interval).await })
}

/// Returns true when this watcher expired the workflow.
async fn watch(
    orchestrator: Orchestrator,
    workflow_id: WorkflowId,
    deadline: Duration,
    interval: Duration,
) -> bool {
    let expires_at = Instant::now() + deadline;
    let step = interval.max(Duration::from_millis(1));
    loop {
        let now = Instant::now();
        if now >= expires_at {
            break;
        }
        tokio::time::sleep(step.min(expires_at - now)).await;
        if !orchestrator.table().contains(&workflow_id).await {
            tracing::debug!(workflow_id = %workflow_id, "Watcher stopping, workflow finished");
            return false;
        }
    }
    orchestrator.expire(&workflow_id).await
}
