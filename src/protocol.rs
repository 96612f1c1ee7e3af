//! Wire protocol shared by the orchestrator and the stage workers.
//!
//! Every record on the bus is a JSON-encoded [`Message`]. Roles map 1:1 to
//! topics; the orchestrator only reads the routing keys it owns and treats
//! the rest of a payload as opaque.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

use crate::domain::types::{ContextId, WorkflowId};

/// Default prefix applied to every topic name.
pub const DEFAULT_TOPIC_PREFIX: &str = "tacp:stream:";

/// Topic suffix used for undeliverable messages.
pub const DEAD_LETTER_TOPIC: &str = "dead_letter";

/// One of the five pipeline stages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageRole {
    Budget,
    Flight,
    Hotel,
    Weather,
    Itinerary,
}

impl StageRole {
    /// All stages in pipeline order.
    pub const ALL: [StageRole; 5] = [
        StageRole::Budget,
        StageRole::Flight,
        StageRole::Hotel,
        StageRole::Weather,
        StageRole::Itinerary,
    ];

    /// The role name used on the wire and as the topic suffix.
    pub fn agent_name(self) -> &'static str {
        match self {
            StageRole::Budget => "budget_optimizer",
            StageRole::Flight => "flight_booker",
            StageRole::Hotel => "hotel_scout",
            StageRole::Weather => "weather_agent",
            StageRole::Itinerary => "itinerary_builder",
        }
    }

    /// Short name used as the key for collected results.
    pub fn label(self) -> &'static str {
        match self {
            StageRole::Budget => "budget",
            StageRole::Flight => "flights",
            StageRole::Hotel => "hotels",
            StageRole::Weather => "weather",
            StageRole::Itinerary => "itinerary",
        }
    }

    fn from_agent_name(name: &str) -> Option<Self> {
        StageRole::ALL
            .into_iter()
            .find(|stage| stage.agent_name() == name)
    }
}

impl fmt::Display for StageRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.agent_name())
    }
}

/// Logical sender/receiver identity.
///
/// Known roles form a closed set; anything else is kept verbatim in
/// [`Role::Unknown`] so routing can reject it explicitly.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Role {
    User,
    Orchestrator,
    Stage(StageRole),
    Unknown(String),
}

impl Role {
    pub fn as_str(&self) -> &str {
        match self {
            Role::User => "user",
            Role::Orchestrator => "orchestrator",
            Role::Stage(stage) => stage.agent_name(),
            Role::Unknown(name) => name,
        }
    }
}

impl From<String> for Role {
    fn from(name: String) -> Self {
        match name.as_str() {
            "user" => Role::User,
            "orchestrator" => Role::Orchestrator,
            other => match StageRole::from_agent_name(other) {
                Some(stage) => Role::Stage(stage),
                None => Role::Unknown(name),
            },
        }
    }
}

impl From<&str> for Role {
    fn from(name: &str) -> Self {
        Role::from(name.to_string())
    }
}

impl From<Role> for String {
    fn from(role: Role) -> Self {
        role.as_str().to_string()
    }
}

impl From<StageRole> for Role {
    fn from(stage: StageRole) -> Self {
        Role::Stage(stage)
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A named append-only log on the bus.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Topic(String);

impl Topic {
    #[cfg(test)]
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Maps roles to topic names under a common prefix.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TopicNames {
    prefix: String,
}

impl TopicNames {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }

    pub fn for_role(&self, role: &Role) -> Topic {
        Topic(format!("{}{}", self.prefix, role.as_str()))
    }

    pub fn for_stage(&self, stage: StageRole) -> Topic {
        self.for_role(&Role::Stage(stage))
    }

    pub fn dead_letter(&self) -> Topic {
        Topic(format!("{}{}", self.prefix, DEAD_LETTER_TOPIC))
    }

    /// Every topic the pipeline uses, excluding the dead-letter topic.
    pub fn pipeline_topics(&self) -> Vec<Topic> {
        let mut topics = vec![
            self.for_role(&Role::Orchestrator),
            self.for_role(&Role::User),
        ];
        topics.extend(StageRole::ALL.into_iter().map(|s| self.for_stage(s)));
        topics
    }
}

impl Default for TopicNames {
    fn default() -> Self {
        Self::new(DEFAULT_TOPIC_PREFIX)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageKind {
    Task,
    Result,
}

/// Unit of communication on the bus.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    #[serde(alias = "message_type")]
    pub kind: MessageKind,
    pub sender: Role,
    pub receiver: Role,
    pub context_id: ContextId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workflow_id: Option<WorkflowId>,
    #[serde(default)]
    pub payload: Map<String, Value>,
}

impl Message {
    pub fn task(
        receiver: StageRole,
        context_id: ContextId,
        workflow_id: WorkflowId,
        payload: Map<String, Value>,
    ) -> Self {
        Self {
            kind: MessageKind::Task,
            sender: Role::Orchestrator,
            receiver: Role::Stage(receiver),
            context_id,
            workflow_id: Some(workflow_id),
            payload,
        }
    }

    pub fn result(
        sender: Role,
        receiver: Role,
        context_id: ContextId,
        workflow_id: Option<WorkflowId>,
        payload: Map<String, Value>,
    ) -> Self {
        Self {
            kind: MessageKind::Result,
            sender,
            receiver,
            context_id,
            workflow_id,
            payload,
        }
    }

    /// A new travel request from the user to the orchestrator.
    pub fn user_request(context_id: ContextId, payload: Map<String, Value>) -> Self {
        Self {
            kind: MessageKind::Task,
            sender: Role::User,
            receiver: Role::Orchestrator,
            context_id,
            workflow_id: None,
            payload,
        }
    }

    /// The workflow this message belongs to.
    ///
    /// Stage workers historically carried the id only inside the payload, so
    /// that location is honored when the envelope field is absent.
    pub fn routing_workflow_id(&self) -> Option<WorkflowId> {
        self.workflow_id.clone().or_else(|| {
            self.payload
                .get("workflow_id")
                .and_then(Value::as_str)
                .filter(|id| !id.is_empty())
                .map(WorkflowId::from)
        })
    }
}

/// Terminal status reported on the user topic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutcomeStatus {
    Completed,
    Failed,
}

/// Diagnostic artifact written when a message could not be delivered.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeadLetterRecord {
    pub error: String,
    pub failed_by_agent: String,
    pub original_sender: String,
    pub context_id: String,
    pub original_message: Value,
    pub timestamp: DateTime<Utc>,
}

impl DeadLetterRecord {
    pub fn new(failed_by: &Role, message: &Message, error: impl Into<String>) -> Self {
        Self {
            error: error.into(),
            failed_by_agent: failed_by.to_string(),
            original_sender: message.sender.to_string(),
            context_id: message.context_id.to_string(),
            original_message: serde_json::to_value(message).unwrap_or(Value::Null),
            timestamp: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_role_round_trips_known_names() {
        for stage in StageRole::ALL {
            let role = Role::from(stage.agent_name());
            assert_eq!(role, Role::Stage(stage));
        }
        assert_eq!(Role::from("user"), Role::User);
        assert_eq!(Role::from("orchestrator"), Role::Orchestrator);
    }

    #[test]
    fn test_unknown_role_is_preserved() {
        let role = Role::from("currency_converter");
        assert_eq!(role, Role::Unknown("currency_converter".to_string()));
        assert_eq!(role.as_str(), "currency_converter");
    }

    #[test]
    fn test_topic_names_use_prefix() {
        let topics = TopicNames::default();
        assert_eq!(
            topics.for_stage(StageRole::Hotel).as_str(),
            "tacp:stream:hotel_scout"
        );
        assert_eq!(topics.dead_letter().as_str(), "tacp:stream:dead_letter");
        assert_eq!(topics.pipeline_topics().len(), 7);
    }

    #[test]
    fn test_message_accepts_legacy_message_type_field() {
        let raw = json!({
            "message_type": "result",
            "sender": "flight_booker",
            "receiver": "orchestrator",
            "context_id": "ctx-1",
            "payload": {"workflow_id": "wf_ctx-1_1", "success": true}
        });
        let message: Message = serde_json::from_value(raw).unwrap();
        assert_eq!(message.kind, MessageKind::Result);
        assert_eq!(message.sender, Role::Stage(StageRole::Flight));
        assert_eq!(
            message.routing_workflow_id(),
            Some(WorkflowId::from("wf_ctx-1_1"))
        );
    }

    #[test]
    fn test_envelope_workflow_id_wins_over_payload() {
        let mut payload = Map::new();
        payload.insert("workflow_id".into(), json!("wf_payload"));
        let mut message = Message::result(
            Role::Stage(StageRole::Hotel),
            Role::Orchestrator,
            ContextId::from("ctx"),
            Some(WorkflowId::from("wf_envelope")),
            payload,
        );
        assert_eq!(
            message.routing_workflow_id(),
            Some(WorkflowId::from("wf_envelope"))
        );
        message.workflow_id = None;
        assert_eq!(
            message.routing_workflow_id(),
            Some(WorkflowId::from("wf_payload"))
        );
    }

    #[test]
    fn test_message_serializes_kind_and_roles_as_strings() {
        let message = Message::task(
            StageRole::Budget,
            ContextId::from("ctx"),
            WorkflowId::from("wf"),
            Map::new(),
        );
        let value = serde_json::to_value(&message).unwrap();
        assert_eq!(value["kind"], "task");
        assert_eq!(value["sender"], "orchestrator");
        assert_eq!(value["receiver"], "budget_optimizer");
        assert_eq!(value["workflow_id"], "wf");
    }
}
