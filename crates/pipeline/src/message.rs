//! Inter-worker messages.
//!
//! An [`AgentMessage`] is immutable once created. Workers return the messages
//! they want to send in their stage output; the engine posts them to the
//! [`crate::bus::CommunicationBus`] and appends them to the run's message log.

use serde::{Deserialize, Serialize};

use crate::{Stage, Timestamp};

/// Kind of an [`AgentMessage`].
///
/// Only [`MessageType::Escalate`] influences routing. The other kinds are
/// informational: the recipient reads them at the start of its next invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageType {
    RequestHelp,
    Escalate,
    ShareResource,
    Notify,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    Low,
    #[default]
    Normal,
    High,
}

/// One message between workers, or from a worker to the coordinator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentMessage {
    pub sender: Stage,
    pub recipient: Stage,
    pub message_type: MessageType,
    pub content: serde_json::Value,
    pub priority: Priority,
    pub created_at: Timestamp,
}

impl AgentMessage {
    pub fn new(
        sender: Stage,
        recipient: Stage,
        message_type: MessageType,
        content: serde_json::Value,
    ) -> Self {
        Self {
            sender,
            recipient,
            message_type,
            content,
            priority: Priority::Normal,
            created_at: Timestamp::now(),
        }
    }

    /// Escalation to the coordinator with a human-readable reason.
    pub fn escalate(sender: Stage, reason: impl Into<String>) -> Self {
        Self::new(
            sender,
            Stage::Coordinator,
            MessageType::Escalate,
            serde_json::json!({ "reason": reason.into() }),
        )
        .with_priority(Priority::High)
    }

    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    pub fn is_escalation(&self) -> bool {
        self.message_type == MessageType::Escalate
    }

    /// The `reason` field of the content, or the raw content when absent.
    pub fn reason(&self) -> String {
        match self.content.get("reason").and_then(|r| r.as_str()) {
            Some(reason) => reason.to_string(),
            None => self.content.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_escalation_targets_coordinator_with_high_priority() {
        let msg = AgentMessage::escalate(Stage::DataAnalysis, "all documents failed");
        assert_eq!(msg.recipient, Stage::Coordinator);
        assert_eq!(msg.priority, Priority::High);
        assert!(msg.is_escalation());
        assert_eq!(msg.reason(), "all documents failed");
    }

    #[test]
    fn test_message_type_wire_names() {
        let json = serde_json::to_string(&MessageType::RequestHelp).unwrap();
        assert_eq!(json, "\"request_help\"");
    }
}
