//! Domain errors for the Faultline orchestration core.

use thiserror::Error;
use uuid::Uuid;

/// Domain-level errors that can occur in the orchestration core.
#[derive(Debug, Error)]
pub enum DomainError {
    #[error("Task not found: {0}")]
    TaskNotFound(Uuid),

    #[error("Subtask not found: {0}")]
    SubtaskNotFound(Uuid),

    #[error("Agent not found: {0}")]
    AgentNotFound(Uuid),

    #[error("Invalid state transition for {entity} from {from} to {to}")]
    InvalidStateTransition {
        entity: &'static str,
        from: String,
        to: String,
    },

    #[error("Validation failed: {0}")]
    ValidationFailed(String),

    #[error("Task {task_id} cannot be retried: retry count {retry_count} reached max retries {max_retries}")]
    RetryExhausted {
        task_id: Uuid,
        retry_count: u32,
        max_retries: u32,
    },

    #[error("Agent {agent_id} is at capacity ({max_concurrent_tasks} concurrent tasks)")]
    AgentBusy {
        agent_id: Uuid,
        max_concurrent_tasks: usize,
    },

    #[error("Agent {agent_id} is unavailable: {reason}")]
    AgentUnavailable { agent_id: Uuid, reason: String },

    #[error("Message could not be delivered to {0}")]
    MessageUndeliverable(Uuid),

    #[error("Storage error: {0}")]
    StorageError(String),

    #[error("Serialization error: {0}")]
    SerializationError(String),
}

impl DomainError {
    /// Whether this error means "try again later" rather than a real failure.
    ///
    /// The scheduler defers assignments that fail with one of these instead of
    /// surfacing them to callers.
    pub fn is_backpressure(&self) -> bool {
        matches!(
            self,
            Self::AgentBusy { .. } | Self::AgentUnavailable { .. } | Self::MessageUndeliverable(_)
        )
    }

    /// Whether this error refers to an unknown entity id.
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            Self::TaskNotFound(_) | Self::SubtaskNotFound(_) | Self::AgentNotFound(_)
        )
    }

    pub(crate) fn transition(entity: &'static str, from: impl ToString, to: impl ToString) -> Self {
        Self::InvalidStateTransition {
            entity,
            from: from.to_string(),
            to: to.to_string(),
        }
    }
}

pub type DomainResult<T> = Result<T, DomainError>;

impl From<serde_json::Error> for DomainError {
    fn from(err: serde_json::Error) -> Self {
        DomainError::SerializationError(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backpressure_classification() {
        let id = Uuid::new_v4();
        assert!(DomainError::AgentBusy { agent_id: id, max_concurrent_tasks: 2 }.is_backpressure());
        assert!(DomainError::AgentUnavailable { agent_id: id, reason: "stopped".into() }.is_backpressure());
        assert!(DomainError::MessageUndeliverable(id).is_backpressure());
        assert!(!DomainError::TaskNotFound(id).is_backpressure());
        assert!(!DomainError::ValidationFailed("bad".into()).is_backpressure());
    }

    #[test]
    fn test_transition_error_message() {
        let err = DomainError::transition("task", "COMPLETED", "RUNNING");
        assert_eq!(
            err.to_string(),
            "Invalid state transition for task from COMPLETED to RUNNING"
        );
    }
}
