//! Fleet orchestrator.
//!
//! Wires the registries, the message bus and the scheduler together and runs
//! the background loops:
//!
//! ```text
//!                 ┌──────────────────────────────┐
//!   submit ──────▶│ Orchestrator                 │
//!                 │  TaskRegistry   AgentRegistry│
//!                 │        \           /         │
//!                 │         Scheduler            │
//!                 └──────┬──────────────┬────────┘
//!                        │              │
//!        scheduler loop ─┘              └─ coordinator inbox loop
//!        (interval + kick)                 (TASK_STATUS, HEARTBEAT)
//!                        │              ▲
//!                        ▼              │
//!                 MessageBus ──▶ agents ┘      liveness monitor (interval)
//! ```
//!
//! Every loop stops on the orchestrator's [`CancellationToken`].

use anyhow::{Context, Result};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, Notify, RwLock};
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use super::simulated_agent::SimulatedAgent;
use crate::adapters::memory::{InMemoryAgentRepository, InMemoryTaskRepository};
use crate::domain::errors::DomainResult;
use crate::domain::models::{
    Agent, Config, CreateTask, HealthStatus, Task, TaskStatus, COORDINATOR_ID,
};
use crate::domain::ports::{AgentFilter, AgentRepository, TaskFilter, TaskRepository};
use crate::services::{
    AgentRegistry, LivenessMonitor, MessageBus, MessageBusStats, MonitorHandle, Received,
    Scheduler, TaskDecomposer, TaskRegistry,
};

/// How long a coordinator receive waits before re-checking for shutdown.
const INBOX_POLL: Duration = Duration::from_millis(250);

/// How long `shutdown` waits for each background loop.
const JOIN_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrchestratorState {
    Stopped,
    Running,
    Stopping,
}

/// Read-only snapshot across both registries and the bus.
#[derive(Debug, Clone, Serialize)]
pub struct FleetSummary {
    pub tasks_by_status: BTreeMap<&'static str, usize>,
    pub agents_by_status: BTreeMap<&'static str, usize>,
    pub healthy_agents: usize,
    pub bus: MessageBusStats,
}

/// Orchestrator backed by the in-memory repositories.
pub type InMemoryOrchestrator = Orchestrator<InMemoryTaskRepository, InMemoryAgentRepository>;

pub struct Orchestrator<T: TaskRepository + 'static, A: AgentRepository + 'static> {
    config: Config,
    tasks: Arc<TaskRegistry<T>>,
    agents: Arc<AgentRegistry<A>>,
    bus: Arc<MessageBus>,
    scheduler: Arc<Scheduler<T, A>>,
    decomposer: TaskDecomposer,
    state: RwLock<OrchestratorState>,
    shutdown: CancellationToken,
    kick: Arc<Notify>,
    loops: Mutex<Vec<JoinHandle<()>>>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    monitor: Mutex<Option<MonitorHandle>>,
}

impl InMemoryOrchestrator {
    pub fn in_memory(config: Config) -> Self {
        Self::new(
            config,
            Arc::new(InMemoryTaskRepository::new()),
            Arc::new(InMemoryAgentRepository::new()),
        )
    }
}

impl<T: TaskRepository + 'static, A: AgentRepository + 'static> Orchestrator<T, A> {
    pub fn new(config: Config, task_repository: Arc<T>, agent_repository: Arc<A>) -> Self {
        let tasks = Arc::new(TaskRegistry::new(task_repository, config.tasks.clone()));
        let agents = Arc::new(AgentRegistry::new(agent_repository, &config.agents));
        let bus = Arc::new(MessageBus::new(config.message_bus.clone()));
        let scheduler = Arc::new(Scheduler::new(
            Arc::clone(&tasks),
            Arc::clone(&agents),
            Arc::clone(&bus),
            config.scheduler.clone(),
        ));

        Self {
            config,
            tasks,
            agents,
            bus,
            scheduler,
            decomposer: TaskDecomposer::new(),
            state: RwLock::new(OrchestratorState::Stopped),
            shutdown: CancellationToken::new(),
            kick: Arc::new(Notify::new()),
            loops: Mutex::new(Vec::new()),
            workers: Mutex::new(Vec::new()),
            monitor: Mutex::new(None),
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn tasks(&self) -> &Arc<TaskRegistry<T>> {
        &self.tasks
    }

    pub fn agents(&self) -> &Arc<AgentRegistry<A>> {
        &self.agents
    }

    pub fn bus(&self) -> &Arc<MessageBus> {
        &self.bus
    }

    pub fn scheduler(&self) -> &Arc<Scheduler<T, A>> {
        &self.scheduler
    }

    pub fn decomposer(&self) -> &TaskDecomposer {
        &self.decomposer
    }

    /// Replace the decomposition table. Only before `start`.
    pub fn with_decomposer(mut self, decomposer: TaskDecomposer) -> Self {
        self.decomposer = decomposer;
        self
    }

    pub async fn state(&self) -> OrchestratorState {
        *self.state.read().await
    }

    /// Create a task and attach its decomposed subtask graph.
    pub async fn submit(&self, request: CreateTask) -> DomainResult<Task> {
        let task = self.tasks.create(request).await?;
        let subtasks = self.decomposer.decompose(&task);
        if let Err(err) = self.tasks.attach_subtasks(task.id, subtasks).await {
            tracing::error!(task_id = %task.id, error = %err, "Decomposition rejected, cancelling task");
            if let Err(cancel_err) = self.tasks.cancel(task.id).await {
                tracing::warn!(task_id = %task.id, error = %cancel_err, "Could not cancel undecomposable task");
            }
            return Err(err);
        }
        self.kick.notify_one();
        Ok(task)
    }

    /// Register, start and connect an agent.
    pub async fn bring_online(&self, agent: &Agent) -> DomainResult<Agent> {
        self.bus.register_agent(agent.id).await;
        let agent = self.agents.start(agent.id).await?;
        self.kick.notify_one();
        Ok(agent)
    }

    /// Register and start the fleet described by `config.fleet`.
    pub async fn provision_fleet(&self) -> DomainResult<Vec<Agent>> {
        let mut online = Vec::new();
        for entry in &self.config.fleet {
            for _ in 0..entry.count {
                let agent = self
                    .agents
                    .register(entry.capability, entry.max_concurrent_tasks)
                    .await?;
                online.push(self.bring_online(&agent).await?);
            }
        }
        tracing::info!(agents = online.len(), "Fleet provisioned");
        Ok(online)
    }

    /// One agent per capability the decomposer can ask for.
    pub async fn provision_default_fleet(&self) -> DomainResult<Vec<Agent>> {
        let mut online = Vec::new();
        for capability in self.decomposer.required_capabilities() {
            let agent = self.agents.register(capability, None).await?;
            online.push(self.bring_online(&agent).await?);
        }
        tracing::info!(agents = online.len(), "Default fleet provisioned");
        Ok(online)
    }

    /// Attach a simulated worker to each listed agent.
    pub async fn spawn_simulated_agents(&self, agents: &[Agent]) {
        let mut workers = self.workers.lock().await;
        for agent in agents {
            let worker = SimulatedAgent::new(agent.id, Arc::clone(&self.bus), self.config.simulation.clone());
            workers.push(worker.spawn(self.shutdown.child_token()));
        }
    }

    /// Start the scheduler loop, the coordinator inbox and the liveness
    /// monitor. Idempotent while running.
    pub async fn start(&self) -> Result<()> {
        let mut state = self.state.write().await;
        if *state != OrchestratorState::Stopped {
            return Ok(());
        }
        if self.shutdown.is_cancelled() {
            anyhow::bail!("Orchestrator was shut down and cannot be restarted");
        }

        self.bus.register_agent(COORDINATOR_ID).await;

        let monitor = LivenessMonitor::new(Arc::clone(&self.agents), self.config.liveness.clone());
        *self.monitor.lock().await = Some(monitor.handle());

        let mut loops = self.loops.lock().await;
        loops.push(self.spawn_scheduler_loop());
        loops.push(self.spawn_inbox_loop());
        loops.push(tokio::spawn(monitor.run(self.shutdown.child_token())));

        *state = OrchestratorState::Running;
        tracing::info!(
            interval_ms = self.config.scheduler.interval_ms,
            "Orchestrator started"
        );
        Ok(())
    }

    fn spawn_scheduler_loop(&self) -> JoinHandle<()> {
        let scheduler = Arc::clone(&self.scheduler);
        let kick = Arc::clone(&self.kick);
        let cancel = self.shutdown.child_token();
        let period = Duration::from_millis(self.config.scheduler.interval_ms);

        tokio::spawn(async move {
            let mut ticker = interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    biased;
                    () = cancel.cancelled() => break,
                    () = kick.notified() => {}
                    _ = ticker.tick() => {}
                }
                if let Err(err) = scheduler.run_pass().await {
                    tracing::error!(error = %err, "Scheduler pass failed");
                }
            }
            tracing::debug!("Scheduler loop stopped");
        })
    }

    fn spawn_inbox_loop(&self) -> JoinHandle<()> {
        let scheduler = Arc::clone(&self.scheduler);
        let bus = Arc::clone(&self.bus);
        let kick = Arc::clone(&self.kick);
        let cancel = self.shutdown.child_token();

        tokio::spawn(async move {
            loop {
                match bus.receive_with(COORDINATOR_ID, INBOX_POLL, &cancel).await {
                    Received::Message(message) => {
                        let kind = message.message_type();
                        let from = message.from;
                        match scheduler.handle_message(message).await {
                            Ok(()) => kick.notify_one(),
                            Err(err) if err.is_not_found() => {
                                tracing::debug!(from = %from, kind = %kind, error = %err, "Message from unknown sender");
                            }
                            Err(err) => {
                                tracing::warn!(from = %from, kind = %kind, error = %err, "Coordinator could not apply message");
                            }
                        }
                    }
                    Received::TimedOut => {}
                    Received::Cancelled | Received::Disconnected => break,
                }
            }
            tracing::debug!("Coordinator inbox stopped");
        })
    }

    /// Cancel every loop and worker, wait for them, and tear down the bus.
    pub async fn shutdown(&self) -> Result<()> {
        {
            let mut state = self.state.write().await;
            if *state == OrchestratorState::Stopping {
                return Ok(());
            }
            *state = OrchestratorState::Stopping;
        }
        tracing::info!("Stopping orchestrator");
        self.shutdown.cancel();

        let handles: Vec<JoinHandle<()>> = {
            let mut loops = self.loops.lock().await;
            let mut workers = self.workers.lock().await;
            loops.drain(..).chain(workers.drain(..)).collect()
        };
        let joined = tokio::time::timeout(JOIN_TIMEOUT, futures::future::join_all(handles))
            .await
            .context("Background loops did not stop in time")?;
        for result in joined {
            if let Err(err) = result {
                tracing::warn!(error = %err, "Background loop ended abnormally");
            }
        }

        self.bus.shutdown().await;
        *self.state.write().await = OrchestratorState::Stopped;
        tracing::info!("Orchestrator stopped");
        Ok(())
    }

    /// Wait until the task reaches a final state (or fails) or `timeout`
    /// elapses. Returns the last observed task.
    pub async fn wait_for(&self, task_id: Uuid, timeout: Duration) -> DomainResult<Task> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let task = self.tasks.get(task_id).await?;
            let settled = task.status.is_final() || task.status == TaskStatus::Failed;
            if settled || tokio::time::Instant::now() >= deadline {
                return Ok(task);
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }

    pub async fn monitor(&self) -> Option<MonitorHandle> {
        self.monitor.lock().await.clone()
    }

    /// Counts for reporting. Reads only.
    pub async fn summary(&self) -> FleetSummary {
        let mut tasks_by_status = BTreeMap::new();
        for task in self.tasks.list(TaskFilter::default()).await {
            *tasks_by_status.entry(task.status.as_str()).or_insert(0) += 1;
        }
        let agents = self.agents.list(AgentFilter::default()).await;
        let mut agents_by_status = BTreeMap::new();
        for agent in &agents {
            *agents_by_status.entry(agent.status.as_str()).or_insert(0) += 1;
        }
        FleetSummary {
            tasks_by_status,
            agents_by_status,
            healthy_agents: agents.iter().filter(|a| a.health == HealthStatus::Healthy).count(),
            bus: self.bus.stats().await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::{AgentStatus, Capability, FleetEntry, TaskType};

    fn config() -> Config {
        let mut config = Config::default();
        config.scheduler.interval_ms = 10;
        config.simulation.time_scale = 0.0005;
        config.simulation.heartbeat_interval_ms = 20;
        config
    }

    #[tokio::test]
    async fn test_submit_attaches_graph() {
        let orchestrator = InMemoryOrchestrator::in_memory(config());
        let task = orchestrator
            .submit(CreateTask::new(TaskType::FailureAnalysis, Uuid::new_v4()))
            .await
            .unwrap();
        let subtasks = orchestrator.tasks().subtasks(task.id).await.unwrap();
        assert_eq!(subtasks.len(), 4);
    }

    #[tokio::test]
    async fn test_provision_fleet_from_config() {
        let mut config = config();
        config.fleet = vec![FleetEntry {
            capability: Capability::Validation,
            count: 3,
            max_concurrent_tasks: Some(4),
        }];
        let orchestrator = InMemoryOrchestrator::in_memory(config);
        let agents = orchestrator.provision_fleet().await.unwrap();

        assert_eq!(agents.len(), 3);
        assert!(agents.iter().all(|a| a.status == AgentStatus::Idle && a.max_concurrent_tasks == 4));
        assert_eq!(orchestrator.bus().online_agents().await.len(), 3);
    }

    #[tokio::test]
    async fn test_simulated_run_completes_task() {
        let orchestrator = InMemoryOrchestrator::in_memory(config());
        let agents = orchestrator.provision_default_fleet().await.unwrap();
        orchestrator.spawn_simulated_agents(&agents).await;
        orchestrator.start().await.unwrap();

        let task = orchestrator
            .submit(CreateTask::new(TaskType::ImageAnalysis, Uuid::new_v4()))
            .await
            .unwrap();
        let task = orchestrator.wait_for(task.id, Duration::from_secs(5)).await.unwrap();
        assert_eq!(task.status, TaskStatus::Completed);

        let summary = orchestrator.summary().await;
        assert_eq!(summary.tasks_by_status.get("COMPLETED"), Some(&1));

        orchestrator.shutdown().await.unwrap();
        assert_eq!(orchestrator.state().await, OrchestratorState::Stopped);
        assert!(orchestrator.bus().is_shut_down());
        assert!(orchestrator.start().await.is_err());
    }
}
