//! Messages carried by the message bus.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use super::agent::AgentMetrics;
use super::capability::Capability;
use super::subtask::{Subtask, SubtaskKind, SubtaskStatus};
use super::task::TaskParameters;

/// Mailbox of the orchestrator itself. Agents address status reports and
/// heartbeats here; broadcasts never reach it.
pub const COORDINATOR_ID: Uuid = Uuid::nil();

/// Wire-stable message kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MessageType {
    TaskAssignment,
    TaskStatus,
    CollaborationRequest,
    CollaborationResponse,
    Heartbeat,
}

impl MessageType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::TaskAssignment => "TASK_ASSIGNMENT",
            Self::TaskStatus => "TASK_STATUS",
            Self::CollaborationRequest => "COLLABORATION_REQUEST",
            Self::CollaborationResponse => "COLLABORATION_RESPONSE",
            Self::Heartbeat => "HEARTBEAT",
        }
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Destination of a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Recipient {
    Agent(Uuid),
    Broadcast,
}

/// Work handed to an agent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskAssignment {
    pub task_id: Uuid,
    pub subtask_id: Uuid,
    pub kind: SubtaskKind,
    pub required_capability: Capability,
    pub estimated_duration_secs: u32,
    pub parameters: TaskParameters,
}

impl TaskAssignment {
    pub fn for_subtask(subtask: &Subtask, parameters: TaskParameters) -> Self {
        Self {
            task_id: subtask.parent_task_id,
            subtask_id: subtask.id,
            kind: subtask.kind,
            required_capability: subtask.required_capability,
            estimated_duration_secs: subtask.estimated_duration_secs,
            parameters,
        }
    }
}

/// Progress or outcome of an assigned subtask.
///
/// Agents report `COMPLETED` or `FAILED`; the coordinator sends `CANCELLED`
/// to agents whose subtask was withdrawn.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusReport {
    pub task_id: Uuid,
    pub subtask_id: Uuid,
    pub status: SubtaskStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Wall time the agent spent, in seconds
    #[serde(default)]
    pub elapsed_secs: f64,
}

/// Typed message body. The variant determines the [`MessageType`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MessagePayload {
    TaskAssignment(TaskAssignment),
    TaskStatus(StatusReport),
    CollaborationRequest {
        request_id: Uuid,
        topic: String,
        body: serde_json::Value,
    },
    CollaborationResponse {
        request_id: Uuid,
        accepted: bool,
        body: serde_json::Value,
    },
    Heartbeat {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        metrics: Option<AgentMetrics>,
    },
}

impl MessagePayload {
    pub fn message_type(&self) -> MessageType {
        match self {
            Self::TaskAssignment(_) => MessageType::TaskAssignment,
            Self::TaskStatus(_) => MessageType::TaskStatus,
            Self::CollaborationRequest { .. } => MessageType::CollaborationRequest,
            Self::CollaborationResponse { .. } => MessageType::CollaborationResponse,
            Self::Heartbeat { .. } => MessageType::Heartbeat,
        }
    }
}

/// A message in a mailbox. Has no identity beyond its queue position.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub from: Uuid,
    pub to: Recipient,
    pub payload: MessagePayload,
    pub timestamp: DateTime<Utc>,
}

impl Message {
    pub fn new(from: Uuid, to: Recipient, payload: MessagePayload) -> Self {
        Self {
            from,
            to,
            payload,
            timestamp: Utc::now(),
        }
    }

    /// Coordinator → agent dispatch.
    pub fn assignment(to: Uuid, assignment: TaskAssignment) -> Self {
        Self::new(COORDINATOR_ID, Recipient::Agent(to), MessagePayload::TaskAssignment(assignment))
    }

    pub fn status(from: Uuid, to: Uuid, report: StatusReport) -> Self {
        Self::new(from, Recipient::Agent(to), MessagePayload::TaskStatus(report))
    }

    /// Coordinator → agent notice that a running subtask was withdrawn.
    pub fn cancellation(to: Uuid, task_id: Uuid, subtask_id: Uuid) -> Self {
        Self::status(
            COORDINATOR_ID,
            to,
            StatusReport {
                task_id,
                subtask_id,
                status: SubtaskStatus::Cancelled,
                result: None,
                error: None,
                elapsed_secs: 0.0,
            },
        )
    }

    pub fn collaboration_request(
        from: Uuid,
        to: Recipient,
        topic: impl Into<String>,
        body: serde_json::Value,
    ) -> Self {
        Self::new(
            from,
            to,
            MessagePayload::CollaborationRequest {
                request_id: Uuid::new_v4(),
                topic: topic.into(),
                body,
            },
        )
    }

    pub fn collaboration_response(
        from: Uuid,
        to: Uuid,
        request_id: Uuid,
        accepted: bool,
        body: serde_json::Value,
    ) -> Self {
        Self::new(
            from,
            Recipient::Agent(to),
            MessagePayload::CollaborationResponse {
                request_id,
                accepted,
                body,
            },
        )
    }

    /// Agent → coordinator liveness signal.
    pub fn heartbeat(from: Uuid, metrics: Option<AgentMetrics>) -> Self {
        Self::new(
            from,
            Recipient::Agent(COORDINATOR_ID),
            MessagePayload::Heartbeat { metrics },
        )
    }

    pub fn message_type(&self) -> MessageType {
        self.payload.message_type()
    }
}
