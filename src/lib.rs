//! Faultline - agent fleet orchestrator
//!
//! Faultline breaks analysis tasks into dependency graphs of subtasks, matches
//! ready subtasks to capable agents, and moves assignments and status reports
//! over per-agent mailboxes.
//!
//! # Architecture
//!
//! This crate follows Clean Architecture / Hexagonal Architecture principles:
//!
//! - **Domain Layer** (`domain`): models, their state machines and the repository ports
//! - **Adapters** (`adapters`): in-memory repository implementations
//! - **Service Layer** (`services`): message bus, registries, decomposer, scheduler
//! - **Application Layer** (`application`): the running orchestrator and simulated agents
//! - **Infrastructure Layer** (`infrastructure`): configuration and logging
//! - **CLI Layer** (`cli`): Command-line interface
//!
//! # Example
//!
//! ```no_run
//! use faultline::application::InMemoryOrchestrator;
//! use faultline::domain::models::{Config, CreateTask, TaskType};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let orchestrator = InMemoryOrchestrator::in_memory(Config::default());
//!     let agents = orchestrator.provision_default_fleet().await?;
//!     orchestrator.spawn_simulated_agents(&agents).await;
//!     orchestrator.start().await?;
//!
//!     let task = orchestrator
//!         .submit(CreateTask::new(TaskType::ImageAnalysis, uuid::Uuid::new_v4()))
//!         .await?;
//!     let task = orchestrator
//!         .wait_for(task.id, std::time::Duration::from_secs(30))
//!         .await?;
//!     println!("{}: {}", task.id, task.status);
//!
//!     orchestrator.shutdown().await
//! }
//! ```

pub mod adapters;
pub mod application;
pub mod cli;
pub mod domain;
pub mod infrastructure;
pub mod services;

// Re-export commonly used types for convenience
pub use application::{FleetSummary, InMemoryOrchestrator, Orchestrator, OrchestratorState};
pub use domain::models::{
    Agent, AgentStatus, Capability, Config, CreateTask, HealthStatus, Message, Subtask,
    SubtaskStatus, Task, TaskStatus, TaskType,
};
pub use domain::ports::{AgentRepository, TaskRepository};
pub use domain::{DomainError, DomainResult};
pub use infrastructure::config::{ConfigError, ConfigLoader};
pub use services::{AgentRegistry, MessageBus, Scheduler, TaskDecomposer, TaskRegistry};
