//! Strongly typed identifiers for workflows and user sessions.
//!
//! These newtypes keep the two string identifiers that travel on every
//! message from being confused with one another.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Unique identifier for one in-flight travel request.
/// Derived from the context id and the creation time; never reused.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WorkflowId(pub String);

impl WorkflowId {
    /// Builds the id for a workflow created at `created_millis` (Unix epoch
    /// milliseconds) within the given session.
    pub fn derive(context_id: &ContextId, created_millis: i64) -> Self {
        Self(format!("wf_{}_{}", context_id.as_str(), created_millis))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for WorkflowId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for WorkflowId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl std::fmt::Display for WorkflowId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Identifier of the originating user session.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(transparent)]
pub struct ContextId(pub String);

impl ContextId {
    /// Creates a fresh session id with the given prefix.
    pub fn generate(prefix: &str) -> Self {
        let suffix: String = uuid::Uuid::new_v4()
            .simple()
            .to_string()
            .chars()
            .take(8)
            .collect();
        Self(format!("{}_{}", prefix, suffix))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for ContextId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for ContextId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl std::fmt::Display for ContextId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// UTC timestamp wrapper for workflow records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TimestampUtc(pub DateTime<Utc>);

impl TimestampUtc {
    /// Creates a timestamp for the current moment.
    pub fn now() -> Self {
        Self(Utc::now())
    }

    /// Returns the timestamp as an RFC3339 string.
    pub fn to_rfc3339(&self) -> String {
        self.0.to_rfc3339()
    }
}

impl Default for TimestampUtc {
    fn default() -> Self {
        Self::now()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_workflow_id_derivation() {
        let id = WorkflowId::derive(&ContextId::from("session-7"), 1_700_000_000_123);
        assert_eq!(id.as_str(), "wf_session-7_1700000000123");
    }

    #[test]
    fn test_generated_context_ids_differ() {
        let a = ContextId::generate("user");
        let b = ContextId::generate("user");
        assert!(a.as_str().starts_with("user_"));
        assert_ne!(a, b);
    }
}
