//! Scheduler.
//!
//! Matches ready subtasks to available agents and dispatches them over the
//! message bus. An assignment is one combined step: the subtask is claimed,
//! the agent slot is taken and the TASK_ASSIGNMENT message is delivered, or
//! none of it happens. Agents without capacity and full mailboxes are
//! backpressure; the subtask stays PENDING for the next pass.
//!
//! The scheduler also applies agent reports coming into the coordinator inbox
//! and owns the cross-registry cascades (cancel, fail, retry, agent loss).

use std::sync::Arc;
use uuid::Uuid;

use super::agent_registry::AgentRegistry;
use super::message_bus::MessageBus;
use super::task_registry::{Settlement, SubtaskOutcome, TaskRegistry};
use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::{
    Message, MessagePayload, SchedulerConfig, StatusReport, Subtask, SubtaskStatus, Task,
    TaskAssignment, TaskStatus,
};
use crate::domain::ports::{AgentRepository, TaskRepository};

/// One dispatched subtask.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Dispatch {
    pub subtask_id: Uuid,
    pub agent_id: Uuid,
}

/// Result of a scheduler pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PassReport {
    /// Assignments made, in dispatch order
    pub dispatched: Vec<Dispatch>,
    /// Ready subtasks left PENDING for lack of capacity
    pub deferred: usize,
    /// Ready subtasks that changed state under us (cancelled, paused, claimed)
    pub skipped: usize,
}

impl PassReport {
    pub fn is_idle(&self) -> bool {
        self.dispatched.is_empty() && self.deferred == 0
    }
}

enum Attempt {
    Dispatched(Uuid),
    Deferred,
    Skipped,
}

pub struct Scheduler<T: TaskRepository, A: AgentRepository> {
    tasks: Arc<TaskRegistry<T>>,
    agents: Arc<AgentRegistry<A>>,
    bus: Arc<MessageBus>,
    config: SchedulerConfig,
}

impl<T: TaskRepository, A: AgentRepository> Scheduler<T, A> {
    pub fn new(
        tasks: Arc<TaskRegistry<T>>,
        agents: Arc<AgentRegistry<A>>,
        bus: Arc<MessageBus>,
        config: SchedulerConfig,
    ) -> Self {
        Self {
            tasks,
            agents,
            bus,
            config,
        }
    }

    /// Run one scheduling pass over the current ready set.
    pub async fn run_pass(&self) -> DomainResult<PassReport> {
        let ready = self.tasks.ready_subtasks(usize::MAX).await?;
        let mut report = PassReport::default();

        for subtask in ready {
            if report.dispatched.len() >= self.config.max_assignments_per_pass {
                report.deferred += 1;
                continue;
            }
            match self.dispatch(&subtask).await? {
                Attempt::Dispatched(agent_id) => report.dispatched.push(Dispatch {
                    subtask_id: subtask.id,
                    agent_id,
                }),
                Attempt::Deferred => report.deferred += 1,
                Attempt::Skipped => report.skipped += 1,
            }
        }

        if !report.is_idle() {
            tracing::debug!(
                dispatched = report.dispatched.len(),
                deferred = report.deferred,
                skipped = report.skipped,
                "Scheduler pass finished"
            );
        }
        Ok(report)
    }

    /// Try each candidate agent in tie-break order until one takes the subtask.
    async fn dispatch(&self, subtask: &Subtask) -> DomainResult<Attempt> {
        let parameters = self.tasks.get(subtask.parent_task_id).await?.parameters;
        let candidates = self.agents.available_agents(subtask.required_capability).await;
        if candidates.is_empty() {
            tracing::debug!(
                subtask_id = %subtask.id,
                capability = %subtask.required_capability,
                "No available agent, deferring"
            );
            return Ok(Attempt::Deferred);
        }

        let agents = &self.agents;
        let bus = &self.bus;
        for candidate in candidates {
            let agent_id = candidate.id;
            let parameters = parameters.clone();
            let claimed = self
                .tasks
                .claim_subtask(subtask.id, agent_id, move |claimed| async move {
                    let assignment = TaskAssignment::for_subtask(&claimed, parameters);
                    agents
                        .assign_task_with(agent_id, claimed.id, |_| async move {
                            if bus.send(Message::assignment(agent_id, assignment)).await {
                                Ok(())
                            } else {
                                Err(DomainError::MessageUndeliverable(agent_id))
                            }
                        })
                        .await
                        .map(|_| ())
                })
                .await;

            match claimed {
                Ok(_) => {
                    tracing::info!(
                        subtask_id = %subtask.id,
                        task_id = %subtask.parent_task_id,
                        agent_id = %agent_id,
                        kind = %subtask.kind,
                        "Subtask dispatched"
                    );
                    return Ok(Attempt::Dispatched(agent_id));
                }
                Err(err) if err.is_backpressure() => {
                    tracing::debug!(subtask_id = %subtask.id, agent_id = %agent_id, error = %err, "Candidate declined");
                }
                Err(
                    err @ (DomainError::InvalidStateTransition { .. }
                    | DomainError::ValidationFailed(_)
                    | DomainError::TaskNotFound(_)
                    | DomainError::SubtaskNotFound(_)),
                ) => {
                    tracing::debug!(subtask_id = %subtask.id, error = %err, "Subtask no longer claimable");
                    return Ok(Attempt::Skipped);
                }
                Err(err) => return Err(err),
            }
        }
        Ok(Attempt::Deferred)
    }

    /// Apply a message addressed to the coordinator.
    pub async fn handle_message(&self, message: Message) -> DomainResult<()> {
        match message.payload {
            MessagePayload::TaskStatus(report) => {
                self.handle_status(message.from, report).await?;
            }
            MessagePayload::Heartbeat { metrics } => {
                self.agents.heartbeat(message.from, metrics).await?;
            }
            other => {
                tracing::debug!(from = %message.from, kind = %other.message_type(), "Coordinator ignores message");
            }
        }
        Ok(())
    }

    /// Apply an agent's TASK_STATUS report and roll the result up into the
    /// parent task.
    pub async fn handle_status(&self, agent_id: Uuid, report: StatusReport) -> DomainResult<Settlement> {
        let outcome = match report.status {
            SubtaskStatus::Completed => SubtaskOutcome::Completed(report.result),
            SubtaskStatus::Failed => SubtaskOutcome::Failed(
                report
                    .error
                    .unwrap_or_else(|| "agent reported failure".to_string()),
            ),
            status => {
                tracing::debug!(subtask_id = %report.subtask_id, status = %status, "Ignoring non-final status report");
                return Ok(Settlement::Unchanged);
            }
        };

        let Some(subtask) = self
            .tasks
            .finish_subtask(report.subtask_id, agent_id, outcome)
            .await?
        else {
            return Ok(Settlement::Unchanged);
        };

        let success = subtask.status == SubtaskStatus::Completed;
        if let Err(err) = self
            .agents
            .complete_task(agent_id, subtask.id, success, report.elapsed_secs)
            .await
        {
            tracing::warn!(agent_id = %agent_id, subtask_id = %subtask.id, error = %err, "Agent could not record completion");
        }

        self.settle(subtask.parent_task_id).await
    }

    /// Roll subtask state into the task; a failed task withdraws whatever is
    /// still outstanding.
    pub async fn settle(&self, task_id: Uuid) -> DomainResult<Settlement> {
        let settlement = self.tasks.settle(task_id).await?;
        if matches!(settlement, Settlement::Failed(_)) {
            self.withdraw(task_id).await?;
        }
        Ok(settlement)
    }

    pub async fn cancel_task(&self, task_id: Uuid) -> DomainResult<Task> {
        let task = self.tasks.cancel(task_id).await?;
        self.withdraw(task_id).await?;
        Ok(task)
    }

    pub async fn fail_task(&self, task_id: Uuid, message: impl Into<String> + Send) -> DomainResult<Task> {
        let task = self.tasks.fail(task_id, message).await?;
        self.withdraw(task_id).await?;
        Ok(task)
    }

    /// Pausing only stops new dispatches; running subtasks finish normally.
    pub async fn pause_task(&self, task_id: Uuid) -> DomainResult<Task> {
        self.tasks.pause(task_id).await
    }

    /// Resume, then apply any subtask results that arrived while paused.
    pub async fn resume_task(&self, task_id: Uuid) -> DomainResult<Task> {
        self.tasks.resume(task_id).await?;
        self.settle(task_id).await?;
        self.tasks.get(task_id).await
    }

    /// Retry a failed task from scratch. Subtasks still running are
    /// withdrawn first, releasing and notifying their agents.
    pub async fn retry_task(&self, task_id: Uuid) -> DomainResult<Task> {
        if self.tasks.get(task_id).await?.status == TaskStatus::Failed {
            self.withdraw(task_id).await?;
        }
        self.tasks.retry(task_id).await
    }

    /// Stop an agent and put its in-flight subtasks back in the ready pool.
    pub async fn stop_agent(&self, agent_id: Uuid) -> DomainResult<usize> {
        let drained = self.agents.stop(agent_id).await?;
        Ok(self.requeue(agent_id, drained).await)
    }

    pub async fn restart_agent(&self, agent_id: Uuid) -> DomainResult<usize> {
        let drained = self.agents.restart(agent_id).await?;
        Ok(self.requeue(agent_id, drained).await)
    }

    pub async fn fault_agent(&self, agent_id: Uuid, reason: &str) -> DomainResult<usize> {
        let drained = self.agents.fault(agent_id, reason).await?;
        Ok(self.requeue(agent_id, drained).await)
    }

    /// Remove an agent and its mailbox, requeueing its in-flight subtasks.
    pub async fn deregister_agent(&self, agent_id: Uuid) -> DomainResult<usize> {
        let drained = self.agents.deregister(agent_id).await?;
        self.bus.unregister_agent(agent_id).await;
        Ok(self.requeue(agent_id, drained).await)
    }

    async fn requeue(&self, agent_id: Uuid, drained: Vec<Uuid>) -> usize {
        let mut requeued = 0;
        for subtask_id in drained {
            match self.tasks.requeue_subtask(subtask_id, agent_id).await {
                Ok(true) => requeued += 1,
                Ok(false) => {}
                Err(err) => {
                    tracing::warn!(subtask_id = %subtask_id, agent_id = %agent_id, error = %err, "Failed to requeue subtask");
                }
            }
        }
        requeued
    }

    /// Cancel a task's outstanding subtasks; free and notify their agents.
    async fn withdraw(&self, task_id: Uuid) -> DomainResult<usize> {
        let withdrawn = self.tasks.cancel_subtasks(task_id).await?;
        for subtask in &withdrawn {
            self.release_and_notify(subtask).await;
        }
        Ok(withdrawn.len())
    }

    async fn release_and_notify(&self, subtask: &Subtask) {
        let Some(agent_id) = subtask.assigned_agent_id else {
            return;
        };
        if let Err(err) = self.agents.release_task(agent_id, subtask.id).await {
            tracing::warn!(agent_id = %agent_id, subtask_id = %subtask.id, error = %err, "Could not release agent slot");
        }
        let notice = Message::cancellation(agent_id, subtask.parent_task_id, subtask.id);
        if !self.bus.send(notice).await {
            tracing::warn!(agent_id = %agent_id, subtask_id = %subtask.id, "Cancellation notice not delivered");
        }
    }
}
