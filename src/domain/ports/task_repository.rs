//! Task repository port.

use async_trait::async_trait;
use uuid::Uuid;

use crate::domain::errors::DomainResult;
use crate::domain::models::{Subtask, Task, TaskStatus, TaskType};

/// Filter criteria for listing tasks.
#[derive(Debug, Clone, Default)]
pub struct TaskFilter {
    pub status: Option<TaskStatus>,
    pub task_type: Option<TaskType>,
    pub creator_id: Option<Uuid>,
    pub limit: Option<usize>,
}

impl TaskFilter {
    pub fn matches(&self, task: &Task) -> bool {
        self.status.is_none_or(|s| task.status == s)
            && self.task_type.is_none_or(|t| task.task_type == t)
            && self.creator_id.is_none_or(|c| task.creator_id == c)
    }
}

/// Repository interface for Task and Subtask persistence.
#[async_trait]
pub trait TaskRepository: Send + Sync {
    /// Persist a new task.
    async fn save(&self, task: &Task) -> DomainResult<()>;

    /// Get a task by ID.
    async fn find_by_id(&self, id: Uuid) -> DomainResult<Option<Task>>;

    /// Replace a stored task. Fails with `TaskNotFound` if it was never saved.
    async fn update(&self, task: &Task) -> DomainResult<()>;

    /// List tasks, oldest first.
    async fn list(&self, filter: TaskFilter) -> DomainResult<Vec<Task>>;

    /// Persist the subtasks produced for a task.
    async fn save_subtasks(&self, subtasks: &[Subtask]) -> DomainResult<()>;

    /// Get a subtask by ID.
    async fn find_subtask(&self, id: Uuid) -> DomainResult<Option<Subtask>>;

    /// Replace a stored subtask.
    async fn update_subtask(&self, subtask: &Subtask) -> DomainResult<()>;

    /// All subtasks of a task in generation order.
    async fn list_subtasks(&self, task_id: Uuid) -> DomainResult<Vec<Subtask>>;
}
