//! In-memory task store.

use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::{Subtask, Task};
use crate::domain::ports::{TaskFilter, TaskRepository};

#[derive(Default)]
struct Tables {
    tasks: HashMap<Uuid, Task>,
    subtasks: HashMap<Uuid, Subtask>,
}

/// Task repository backed by process memory.
#[derive(Default)]
pub struct InMemoryTaskRepository {
    tables: RwLock<Tables>,
}

impl InMemoryTaskRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl TaskRepository for InMemoryTaskRepository {
    async fn save(&self, task: &Task) -> DomainResult<()> {
        let mut tables = self.tables.write().await;
        if tables.tasks.contains_key(&task.id) {
            return Err(DomainError::StorageError(format!("Task {} already exists", task.id)));
        }
        tables.tasks.insert(task.id, task.clone());
        Ok(())
    }

    async fn find_by_id(&self, id: Uuid) -> DomainResult<Option<Task>> {
        Ok(self.tables.read().await.tasks.get(&id).cloned())
    }

    async fn update(&self, task: &Task) -> DomainResult<()> {
        let mut tables = self.tables.write().await;
        let slot = tables
            .tasks
            .get_mut(&task.id)
            .ok_or(DomainError::TaskNotFound(task.id))?;
        *slot = task.clone();
        Ok(())
    }

    async fn list(&self, filter: TaskFilter) -> DomainResult<Vec<Task>> {
        let tables = self.tables.read().await;
        let mut tasks: Vec<Task> = tables
            .tasks
            .values()
            .filter(|t| filter.matches(t))
            .cloned()
            .collect();
        tasks.sort_by_key(|t| (t.created_at, t.id));
        if let Some(limit) = filter.limit {
            tasks.truncate(limit);
        }
        Ok(tasks)
    }

    async fn save_subtasks(&self, subtasks: &[Subtask]) -> DomainResult<()> {
        let mut tables = self.tables.write().await;
        for subtask in subtasks {
            if !tables.tasks.contains_key(&subtask.parent_task_id) {
                return Err(DomainError::TaskNotFound(subtask.parent_task_id));
            }
        }
        for subtask in subtasks {
            tables.subtasks.insert(subtask.id, subtask.clone());
        }
        Ok(())
    }

    async fn find_subtask(&self, id: Uuid) -> DomainResult<Option<Subtask>> {
        Ok(self.tables.read().await.subtasks.get(&id).cloned())
    }

    async fn update_subtask(&self, subtask: &Subtask) -> DomainResult<()> {
        let mut tables = self.tables.write().await;
        let slot = tables
            .subtasks
            .get_mut(&subtask.id)
            .ok_or(DomainError::SubtaskNotFound(subtask.id))?;
        *slot = subtask.clone();
        Ok(())
    }

    async fn list_subtasks(&self, task_id: Uuid) -> DomainResult<Vec<Subtask>> {
        let tables = self.tables.read().await;
        let mut subtasks: Vec<Subtask> = tables
            .subtasks
            .values()
            .filter(|s| s.parent_task_id == task_id)
            .cloned()
            .collect();
        subtasks.sort_by_key(|s| s.sequence);
        Ok(subtasks)
    }
}
