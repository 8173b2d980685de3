//! Task registry.
//!
//! Owns tasks and their subtask graphs. Tasks and subtasks each sit behind
//! their own mutex. An operation that needs both takes the subtask lock
//! first; nothing acquires a subtask lock while holding a task lock.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use uuid::Uuid;

use super::dependency_resolver::DependencyResolver;
use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::{
    CreateTask, Subtask, SubtaskStatus, Task, TaskDefaults, TaskStatus, MAX_PROGRESS,
};
use crate::domain::ports::{TaskFilter, TaskRepository};

type TaskSlot = Arc<Mutex<Task>>;
type SubtaskSlot = Arc<Mutex<Subtask>>;

/// What an agent reported for a subtask.
#[derive(Debug, Clone, PartialEq)]
pub enum SubtaskOutcome {
    Completed(Option<serde_json::Value>),
    Failed(String),
}

/// Effect of rolling subtask state up into the parent task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Settlement {
    /// Nothing to change (still running at the same progress, paused, or terminal)
    Unchanged,
    /// Progress raised to the given value
    Progressed(u8),
    /// Every subtask completed; the task completed
    Completed,
    /// A subtask failed; the task failed with this message
    Failed(String),
}

/// Registry of tasks and their subtasks.
pub struct TaskRegistry<R: TaskRepository> {
    repository: Arc<R>,
    tasks: RwLock<HashMap<Uuid, TaskSlot>>,
    subtasks: RwLock<HashMap<Uuid, SubtaskSlot>>,
    /// Subtask ids per task, in generation order
    graphs: RwLock<HashMap<Uuid, Vec<Uuid>>>,
    defaults: TaskDefaults,
    resolver: DependencyResolver,
}

impl<R: TaskRepository> TaskRegistry<R> {
    pub fn new(repository: Arc<R>, defaults: TaskDefaults) -> Self {
        Self {
            repository,
            tasks: RwLock::new(HashMap::new()),
            subtasks: RwLock::new(HashMap::new()),
            graphs: RwLock::new(HashMap::new()),
            defaults,
            resolver: DependencyResolver::new(),
        }
    }

    /// Create a pending task from an API request.
    pub async fn create(&self, request: CreateTask) -> DomainResult<Task> {
        if let Some(parent_id) = request.parent_task_id {
            self.slot(parent_id).await?;
        }

        let mut task = Task::new(request.task_type, request.creator_id)
            .with_priority(request.priority.unwrap_or(self.defaults.default_priority))
            .with_max_retries(request.max_retries.unwrap_or(self.defaults.max_retries))
            .with_parameters(request.parameters);
        task.parent_task_id = request.parent_task_id;
        task.validate()?;

        self.repository.save(&task).await?;
        self.tasks
            .write()
            .await
            .insert(task.id, Arc::new(Mutex::new(task.clone())));

        tracing::info!(
            task_id = %task.id,
            task_type = %task.task_type,
            priority = task.priority,
            "Task created"
        );
        Ok(task)
    }

    /// Attach the decomposed subtask graph to a task. Only once per task.
    pub async fn attach_subtasks(&self, task_id: Uuid, subtasks: Vec<Subtask>) -> DomainResult<Vec<Subtask>> {
        self.slot(task_id).await?;
        if let Some(stray) = subtasks.iter().find(|s| s.parent_task_id != task_id) {
            return Err(DomainError::ValidationFailed(format!(
                "Subtask {} belongs to task {}, not {task_id}",
                stray.id, stray.parent_task_id
            )));
        }
        self.resolver.validate_graph(&subtasks)?;

        let mut graphs = self.graphs.write().await;
        if graphs.contains_key(&task_id) {
            return Err(DomainError::ValidationFailed(format!(
                "Task {task_id} already has subtasks"
            )));
        }
        self.repository.save_subtasks(&subtasks).await?;

        let mut ordered = subtasks.clone();
        ordered.sort_by_key(|s| s.sequence);
        graphs.insert(task_id, ordered.iter().map(|s| s.id).collect());
        let mut slots = self.subtasks.write().await;
        for subtask in &ordered {
            slots.insert(subtask.id, Arc::new(Mutex::new(subtask.clone())));
        }

        tracing::debug!(task_id = %task_id, subtasks = ordered.len(), "Subtasks attached");
        Ok(ordered)
    }

    pub async fn get(&self, task_id: Uuid) -> DomainResult<Task> {
        let slot = self.slot(task_id).await?;
        let task = slot.lock().await.clone();
        Ok(task)
    }

    /// Snapshot of tasks matching the filter, oldest first.
    pub async fn list(&self, filter: TaskFilter) -> Vec<Task> {
        let slots: Vec<TaskSlot> = self.tasks.read().await.values().cloned().collect();
        let mut tasks = Vec::new();
        for slot in slots {
            let task = slot.lock().await;
            if filter.matches(&task) {
                tasks.push(task.clone());
            }
        }
        tasks.sort_by_key(|t| (t.created_at, t.id));
        if let Some(limit) = filter.limit {
            tasks.truncate(limit);
        }
        tasks
    }

    pub async fn get_subtask(&self, subtask_id: Uuid) -> DomainResult<Subtask> {
        let slot = self.subtask_slot(subtask_id).await?;
        let subtask = slot.lock().await.clone();
        Ok(subtask)
    }

    /// Snapshot of a task's subtasks in generation order.
    pub async fn subtasks(&self, task_id: Uuid) -> DomainResult<Vec<Subtask>> {
        self.slot(task_id).await?;
        let ids = self.graphs.read().await.get(&task_id).cloned().unwrap_or_default();
        let mut subtasks = Vec::with_capacity(ids.len());
        for id in ids {
            subtasks.push(self.get_subtask(id).await?);
        }
        Ok(subtasks)
    }

    pub async fn start(&self, task_id: Uuid) -> DomainResult<Task> {
        self.transition(task_id, "started", Task::start).await
    }

    pub async fn pause(&self, task_id: Uuid) -> DomainResult<Task> {
        self.transition(task_id, "paused", Task::pause).await
    }

    pub async fn resume(&self, task_id: Uuid) -> DomainResult<Task> {
        self.transition(task_id, "resumed", Task::resume).await
    }

    pub async fn cancel(&self, task_id: Uuid) -> DomainResult<Task> {
        self.transition(task_id, "cancelled", Task::cancel).await
    }

    pub async fn complete(&self, task_id: Uuid, result: Option<serde_json::Value>) -> DomainResult<Task> {
        self.transition(task_id, "completed", |task| task.complete(result)).await
    }

    pub async fn fail(&self, task_id: Uuid, message: impl Into<String> + Send) -> DomainResult<Task> {
        self.transition(task_id, "failed", |task| task.fail(message)).await
    }

    /// Move a failed task back to PENDING and reset its whole subtask graph
    /// for a fresh attempt.
    ///
    /// Refused while any subtask is still RUNNING: its agent holds a slot
    /// that only its report (or a withdrawal) frees. A FAILED task never
    /// gains running subtasks, so the check cannot go stale.
    pub async fn retry(&self, task_id: Uuid) -> DomainResult<Task> {
        let ids = self.graphs.read().await.get(&task_id).cloned().unwrap_or_default();
        let mut running = 0;
        for id in &ids {
            if self.subtask_slot(*id).await?.lock().await.status == SubtaskStatus::Running {
                running += 1;
            }
        }
        if running > 0 {
            return Err(DomainError::ValidationFailed(format!(
                "Task {task_id} still has {running} running subtask(s); withdraw them before retrying"
            )));
        }

        let task = self.transition(task_id, "retried", Task::retry).await?;
        for id in ids {
            let slot = self.subtask_slot(id).await?;
            let mut guard = slot.lock().await;
            let mut candidate = guard.clone();
            candidate.reset();
            self.repository.update_subtask(&candidate).await?;
            *guard = candidate;
        }
        Ok(task)
    }

    pub async fn update_progress(&self, task_id: Uuid, value: i32) -> DomainResult<Task> {
        let ((), task) = self
            .mutate(task_id, |task| task.update_progress(value))
            .await?;
        tracing::debug!(task_id = %task_id, progress = task.progress, "Task progress updated");
        Ok(task)
    }

    /// Ready subtasks of dispatchable tasks in dispatch order: parent
    /// priority, parent age, stage sequence, id.
    pub async fn ready_subtasks(&self, limit: usize) -> DomainResult<Vec<Subtask>> {
        let task_ids: Vec<Uuid> = self.graphs.read().await.keys().copied().collect();
        let mut ready = Vec::new();
        for task_id in task_ids {
            if !self.get(task_id).await?.is_dispatchable() {
                continue;
            }
            let subtasks = self.subtasks(task_id).await?;
            ready.extend(self.resolver.ready(&subtasks).into_iter().cloned());
        }
        ready.sort_by_key(Subtask::schedule_key);
        ready.truncate(limit);
        Ok(ready)
    }

    /// Move a ready subtask to RUNNING on `agent_id`, running `dispatch`
    /// while the subtask is still locked.
    ///
    /// Nothing is committed unless `dispatch` succeeds. On success the parent
    /// task is marked dispatched (PENDING -> RUNNING on its first subtask).
    pub async fn claim_subtask<F, Fut>(&self, subtask_id: Uuid, agent_id: Uuid, dispatch: F) -> DomainResult<Subtask>
    where
        F: FnOnce(Subtask) -> Fut + Send,
        Fut: Future<Output = DomainResult<()>> + Send,
    {
        let slot = self.subtask_slot(subtask_id).await?;
        let mut guard = slot.lock().await;

        if guard.status != SubtaskStatus::Pending {
            return Err(DomainError::transition("subtask", guard.status, SubtaskStatus::Running));
        }
        let parent = self.get(guard.parent_task_id).await?;
        if !parent.is_dispatchable() {
            return Err(DomainError::transition("task", parent.status, TaskStatus::Running));
        }
        for dep_id in &guard.dependencies {
            let dep_status = self.get_subtask(*dep_id).await?.status;
            if dep_status != SubtaskStatus::Completed {
                return Err(DomainError::ValidationFailed(format!(
                    "Subtask {subtask_id} waits on {dep_id} ({dep_status})"
                )));
            }
        }

        let mut candidate = guard.clone();
        candidate.start(agent_id)?;
        self.repository.update_subtask(&candidate).await?;

        if let Err(err) = dispatch(candidate.clone()).await {
            if let Err(restore_err) = self.repository.update_subtask(&guard).await {
                tracing::error!(subtask_id = %subtask_id, error = %restore_err, "Failed to restore subtask after aborted dispatch");
            }
            return Err(err);
        }
        *guard = candidate.clone();

        if let Err(err) = self.mark_dispatched(candidate.parent_task_id, agent_id).await {
            tracing::warn!(task_id = %candidate.parent_task_id, error = %err, "Parent not marked running");
        }
        Ok(candidate)
    }

    /// Apply an agent's report. Returns `None` for a report that does not
    /// match a subtask running on that agent (late or duplicate).
    pub async fn finish_subtask(
        &self,
        subtask_id: Uuid,
        agent_id: Uuid,
        outcome: SubtaskOutcome,
    ) -> DomainResult<Option<Subtask>> {
        let slot = self.subtask_slot(subtask_id).await?;
        let mut guard = slot.lock().await;
        if !guard.is_running_on(agent_id) {
            tracing::debug!(
                subtask_id = %subtask_id,
                agent_id = %agent_id,
                status = %guard.status,
                "Ignoring stale subtask report"
            );
            return Ok(None);
        }

        let mut candidate = guard.clone();
        match outcome {
            SubtaskOutcome::Completed(result) => candidate.complete(result)?,
            SubtaskOutcome::Failed(message) => candidate.fail(message)?,
        }
        self.repository.update_subtask(&candidate).await?;
        *guard = candidate.clone();

        tracing::info!(
            subtask_id = %subtask_id,
            task_id = %candidate.parent_task_id,
            kind = %candidate.kind,
            status = %candidate.status,
            "Subtask finished"
        );
        Ok(Some(candidate))
    }

    /// Return a subtask that was running on `agent_id` to PENDING. Returns
    /// false if it was not running there.
    pub async fn requeue_subtask(&self, subtask_id: Uuid, agent_id: Uuid) -> DomainResult<bool> {
        let slot = self.subtask_slot(subtask_id).await?;
        let mut guard = slot.lock().await;
        if !guard.is_running_on(agent_id) {
            return Ok(false);
        }
        let mut candidate = guard.clone();
        candidate.requeue()?;
        self.repository.update_subtask(&candidate).await?;
        *guard = candidate;
        tracing::info!(subtask_id = %subtask_id, agent_id = %agent_id, "Subtask requeued");
        Ok(true)
    }

    /// Cancel every non-terminal subtask of a task. Returns the ones that
    /// were running, as they were before cancellation, so their agents can
    /// be released and notified.
    pub async fn cancel_subtasks(&self, task_id: Uuid) -> DomainResult<Vec<Subtask>> {
        let ids = self.graphs.read().await.get(&task_id).cloned().unwrap_or_default();
        let mut withdrawn = Vec::new();
        for id in ids {
            let slot = self.subtask_slot(id).await?;
            let mut guard = slot.lock().await;
            if guard.status.is_terminal() {
                continue;
            }
            let before = guard.clone();
            let mut candidate = guard.clone();
            candidate.cancel()?;
            self.repository.update_subtask(&candidate).await?;
            *guard = candidate;
            if before.status == SubtaskStatus::Running {
                withdrawn.push(before);
            }
        }
        Ok(withdrawn)
    }

    /// Roll subtask state up into the parent: fail on any failed subtask,
    /// complete when all completed, otherwise raise progress.
    pub async fn settle(&self, task_id: Uuid) -> DomainResult<Settlement> {
        let subtasks = self.subtasks(task_id).await?;
        if subtasks.is_empty() {
            return Ok(Settlement::Unchanged);
        }

        let slot = self.slot(task_id).await?;
        let mut guard = slot.lock().await;
        if guard.status != TaskStatus::Running {
            return Ok(Settlement::Unchanged);
        }

        let mut candidate = guard.clone();
        let settlement = if let Some(failed) = subtasks.iter().find(|s| s.status == SubtaskStatus::Failed) {
            let message = format!(
                "Subtask {} ({}) failed: {}",
                failed.id,
                failed.kind,
                failed.error_message.as_deref().unwrap_or("no reason given")
            );
            candidate.fail(message.clone())?;
            Settlement::Failed(message)
        } else if subtasks.iter().all(|s| s.status == SubtaskStatus::Completed) {
            candidate.complete(Some(aggregate_results(&subtasks)))?;
            Settlement::Completed
        } else {
            let done = subtasks.iter().filter(|s| s.status == SubtaskStatus::Completed).count();
            let progress = done * usize::from(MAX_PROGRESS) / subtasks.len();
            let progress = i32::try_from(progress).unwrap_or(i32::from(MAX_PROGRESS));
            if progress <= i32::from(candidate.progress) {
                return Ok(Settlement::Unchanged);
            }
            candidate.update_progress(progress)?;
            Settlement::Progressed(candidate.progress)
        };

        self.repository.update(&candidate).await?;
        *guard = candidate;
        match &settlement {
            Settlement::Completed => tracing::info!(task_id = %task_id, "Task completed"),
            Settlement::Failed(reason) => tracing::warn!(task_id = %task_id, reason = %reason, "Task failed"),
            _ => {}
        }
        Ok(settlement)
    }

    /// PENDING -> RUNNING on first dispatch, recording the first agent.
    async fn mark_dispatched(&self, task_id: Uuid, agent_id: Uuid) -> DomainResult<()> {
        let slot = self.slot(task_id).await?;
        let mut guard = slot.lock().await;
        if guard.status != TaskStatus::Pending {
            return Ok(());
        }
        let mut candidate = guard.clone();
        candidate.start()?;
        candidate.assigned_agent_id = Some(agent_id);
        self.repository.update(&candidate).await?;
        *guard = candidate;
        tracing::info!(task_id = %task_id, agent_id = %agent_id, "Task started");
        Ok(())
    }

    async fn transition(
        &self,
        task_id: Uuid,
        verb: &'static str,
        op: impl FnOnce(&mut Task) -> DomainResult<()> + Send,
    ) -> DomainResult<Task> {
        let ((), task) = self.mutate(task_id, op).await?;
        tracing::info!(task_id = %task_id, status = %task.status, "Task {verb}");
        Ok(task)
    }

    async fn mutate<T>(
        &self,
        task_id: Uuid,
        op: impl FnOnce(&mut Task) -> DomainResult<T> + Send,
    ) -> DomainResult<(T, Task)> {
        let slot = self.slot(task_id).await?;
        let mut guard = slot.lock().await;
        let mut candidate = guard.clone();
        let out = op(&mut candidate)?;
        self.repository.update(&candidate).await?;
        *guard = candidate;
        Ok((out, guard.clone()))
    }

    async fn slot(&self, task_id: Uuid) -> DomainResult<TaskSlot> {
        self.tasks
            .read()
            .await
            .get(&task_id)
            .cloned()
            .ok_or(DomainError::TaskNotFound(task_id))
    }

    async fn subtask_slot(&self, subtask_id: Uuid) -> DomainResult<SubtaskSlot> {
        self.subtasks
            .read()
            .await
            .get(&subtask_id)
            .cloned()
            .ok_or(DomainError::SubtaskNotFound(subtask_id))
    }
}

/// Parent result: each subtask's result keyed by its stage name.
fn aggregate_results(subtasks: &[Subtask]) -> serde_json::Value {
    let map: serde_json::Map<String, serde_json::Value> = subtasks
        .iter()
        .map(|s| {
            (
                s.kind.as_str().to_string(),
                s.result.clone().unwrap_or(serde_json::Value::Null),
            )
        })
        .collect();
    serde_json::Value::Object(map)
}
