//! Common test utilities for integration tests
//!
//! Provides shared fixtures, helpers, and test utilities used across
//! multiple integration test files.

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

use faultline::adapters::memory::{InMemoryAgentRepository, InMemoryTaskRepository};
use faultline::domain::models::{
    AgentDefaults, Capability, Config, CreateTask, MessageBusConfig, SchedulerConfig, Task,
    TaskDefaults, TaskType,
};
use faultline::services::{AgentRegistry, MessageBus, Scheduler, TaskDecomposer, TaskRegistry};

pub type Tasks = TaskRegistry<InMemoryTaskRepository>;
pub type Agents = AgentRegistry<InMemoryAgentRepository>;

/// Setup test logging
///
/// Initializes tracing subscriber for test output.
/// Call this at the beginning of tests that need logging.
pub fn setup_test_logging() {
    use tracing_subscriber::fmt;

    let _ = fmt()
        .with_test_writer()
        .with_max_level(tracing::Level::DEBUG)
        .try_init();
}

/// Config tuned for tests: fast loops, near-instant simulated stages.
pub fn fast_config() -> Config {
    let mut config = Config::default();
    config.scheduler.interval_ms = 10;
    config.liveness.sweep_interval_ms = 50;
    config.simulation.time_scale = 0.0005;
    config.simulation.heartbeat_interval_ms = 20;
    config
}

pub fn task_registry() -> Arc<Tasks> {
    Arc::new(TaskRegistry::new(
        Arc::new(InMemoryTaskRepository::new()),
        TaskDefaults::default(),
    ))
}

pub fn agent_registry() -> Arc<Agents> {
    Arc::new(AgentRegistry::new(
        Arc::new(InMemoryAgentRepository::new()),
        &AgentDefaults::default(),
    ))
}

/// Registries, bus and scheduler wired together without background loops.
pub struct Fleet {
    pub tasks: Arc<Tasks>,
    pub agents: Arc<Agents>,
    pub bus: Arc<MessageBus>,
    pub scheduler: Scheduler<InMemoryTaskRepository, InMemoryAgentRepository>,
}

impl Fleet {
    pub fn new() -> Self {
        Self::with_scheduler_config(SchedulerConfig::default())
    }

    pub fn with_scheduler_config(config: SchedulerConfig) -> Self {
        let tasks = task_registry();
        let agents = agent_registry();
        let bus = Arc::new(MessageBus::new(MessageBusConfig::default()));
        let scheduler = Scheduler::new(Arc::clone(&tasks), Arc::clone(&agents), Arc::clone(&bus), config);
        Self {
            tasks,
            agents,
            bus,
            scheduler,
        }
    }

    /// Register, start and connect an agent.
    pub async fn online_agent(&self, capability: Capability, max_concurrent_tasks: usize) -> Uuid {
        let agent = self
            .agents
            .register(capability, Some(max_concurrent_tasks))
            .await
            .expect("register agent");
        self.agents.start(agent.id).await.expect("start agent");
        self.bus.register_agent(agent.id).await;
        agent.id
    }

    /// Create a task and attach its default decomposition.
    pub async fn submit(&self, request: CreateTask) -> Task {
        let task = self.tasks.create(request).await.expect("create task");
        let subtasks = TaskDecomposer::new().decompose(&task);
        self.tasks
            .attach_subtasks(task.id, subtasks)
            .await
            .expect("attach subtasks");
        task
    }

    pub async fn submit_type(&self, task_type: TaskType) -> Task {
        self.submit(CreateTask::new(task_type, Uuid::new_v4())).await
    }
}

/// Wait for an async condition to be true with timeout
///
/// Polls every 10ms. Returns whether the condition held before the timeout.
pub async fn wait_until<F, Fut>(mut predicate: F, timeout: Duration) -> bool
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if predicate().await {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}
