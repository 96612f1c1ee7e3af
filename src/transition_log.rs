//! JSONL log of workflow transitions for offline reconstruction.
//!
//! Each line carries a monotonic sequence number, a microsecond UTC
//! timestamp, the workflow id and the event itself.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use crate::domain::{FailureKind, Workflow, WorkflowId, WorkflowStage};

/// Append-only transition log.
pub struct TransitionLog {
    seq: AtomicU64,
    log_file: Mutex<File>,
    log_path: PathBuf,
}

/// A single log line.
#[derive(Debug, Serialize, Deserialize)]
pub struct TransitionEntry {
    pub seq: u64,
    pub ts: String,
    pub workflow_id: String,
    pub event: Value,
}

impl TransitionLog {
    /// Opens (or creates) the log file, creating parent directories.
    pub fn open(log_path: &Path) -> anyhow::Result<Self> {
        if let Some(parent) = log_path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(log_path)?;

        Ok(Self {
            seq: AtomicU64::new(0),
            log_file: Mutex::new(file),
            log_path: log_path.to_path_buf(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.log_path
    }

    fn next_seq(&self) -> u64 {
        self.seq.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Writes one event. Write failures are logged and otherwise ignored.
    pub fn log(&self, workflow_id: &WorkflowId, event: impl Serialize) {
        let entry = TransitionEntry {
            seq: self.next_seq(),
            ts: Utc::now().format("%Y-%m-%dT%H:%M:%S%.6fZ").to_string(),
            workflow_id: workflow_id.to_string(),
            event: serde_json::to_value(event).unwrap_or(Value::Null),
        };

        let Ok(line) = serde_json::to_string(&entry) else {
            return;
        };
        match self.log_file.lock() {
            Ok(mut file) => {
                if let Err(e) = writeln!(file, "{}", line).and_then(|_| file.flush()) {
                    tracing::warn!(path = %self.log_path.display(), error = %e, "Transition log write failed");
                }
            }
            Err(_) => tracing::warn!("Transition log lock poisoned"),
        }
    }

    pub fn log_created(&self, workflow_id: &WorkflowId, context_id: &str) {
        self.log(
            workflow_id,
            serde_json::json!({
                "type": "Created",
                "context_id": context_id
            }),
        );
    }

    pub fn log_transition(&self, workflow_id: &WorkflowId, from: WorkflowStage, to: WorkflowStage) {
        self.log(
            workflow_id,
            serde_json::json!({
                "type": "Transition",
                "from": from.to_string(),
                "to": to.to_string()
            }),
        );
    }

    /// Records how a finished workflow ended.
    pub fn log_outcome(&self, workflow: &Workflow, failure: Option<&FailureKind>) {
        self.log(
            &workflow.id,
            serde_json::json!({
                "type": "Outcome",
                "status": workflow.status(),
                "started_at": workflow.started_at.to_rfc3339(),
                "failure": failure
            }),
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::types::{ContextId, TimestampUtc};
    use crate::domain::TravelRequest;
    use crate::protocol::StageRole;
    use serde_json::json;
    use std::io::{BufRead, BufReader};
    use tempfile::tempdir;

    fn read_entries(path: &Path) -> Vec<TransitionEntry> {
        let file = File::open(path).unwrap();
        BufReader::new(file)
            .lines()
            .map(|line| serde_json::from_str(&line.unwrap()).unwrap())
            .collect()
    }

    #[test]
    fn test_entries_are_sequenced_jsonl() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("logs").join("transitions.jsonl");
        let log = TransitionLog::open(&path).unwrap();
        let id = WorkflowId::from("wf_ctx_1");
        let payload = json!({"destination": "Goa", "budget": 100, "travelers": 1});
        let mut workflow = Workflow::new(
            id.clone(),
            ContextId::from("ctx"),
            TravelRequest::from_payload(payload.as_object().unwrap()).unwrap(),
            TimestampUtc::now(),
        );

        log.log_created(&id, "ctx");
        log.log_transition(
            &id,
            WorkflowStage::Created,
            WorkflowStage::Awaiting(StageRole::Budget),
        );
        workflow.advance(WorkflowStage::TimedOut).unwrap();
        log.log_outcome(&workflow, Some(&FailureKind::Timeout { after_secs: 120 }));

        let entries = read_entries(log.path());
        assert_eq!(entries.len(), 3);
        assert_eq!(
            entries.iter().map(|e| e.seq).collect::<Vec<_>>(),
            vec![1, 2, 3]
        );
        assert!(entries.iter().all(|e| e.workflow_id == "wf_ctx_1"));
        assert_eq!(entries[1].event["to"], "budget");
        assert_eq!(entries[2].event["status"], "timed_out");
        assert!(entries[2].event["started_at"].is_string());
        assert_eq!(entries[2].event["failure"]["kind"], "timeout");
        assert!(entries[0].ts.ends_with('Z'));
    }

    #[test]
    fn test_reopen_appends() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("transitions.jsonl");
        let id = WorkflowId::from("wf");
        TransitionLog::open(&path).unwrap().log_created(&id, "a");
        TransitionLog::open(&path).unwrap().log_created(&id, "b");
        let entries = read_entries(&path);
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[1].event["context_id"], "b");
    }
}
