//! Orchestration services.

pub mod agent_registry;
pub mod dependency_resolver;
pub mod liveness_monitor;
pub mod message_bus;
pub mod scheduler;
pub mod task_decomposer;
pub mod task_registry;

pub use agent_registry::AgentRegistry;
pub use dependency_resolver::DependencyResolver;
pub use liveness_monitor::{LivenessMonitor, MonitorHandle, MonitorStatus};
pub use message_bus::{MessageBus, MessageBusStats, Received};
pub use scheduler::{Dispatch, PassReport, Scheduler};
pub use task_decomposer::{DecompositionTemplate, StageTemplate, TaskDecomposer};
pub use task_registry::{Settlement, SubtaskOutcome, TaskRegistry};
