pub mod agent;
pub mod capability;
pub mod config;
pub mod message;
pub mod subtask;
pub mod task;

pub use agent::{Agent, AgentMetrics, AgentStatus, Degradation, HealthStatus, LoadThresholds};
pub use capability::Capability;
pub use config::{
    AgentDefaults, Config, FleetEntry, LivenessConfig, LoggingConfig, MessageBusConfig,
    SchedulerConfig, SimulationConfig, TaskDefaults,
};
pub use message::{
    COORDINATOR_ID, Message, MessagePayload, MessageType, Recipient, StatusReport, TaskAssignment,
};
pub use subtask::{Subtask, SubtaskKind, SubtaskStatus};
pub use task::{CreateTask, MAX_PROGRESS, Task, TaskParameters, TaskStatus, TaskType};
