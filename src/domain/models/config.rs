use serde::{Deserialize, Serialize};

use super::agent::LoadThresholds;
use super::capability::Capability;

/// Main configuration structure for Faultline
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct Config {
    /// Scheduler loop configuration
    #[serde(default)]
    pub scheduler: SchedulerConfig,

    /// Heartbeat staleness detection
    #[serde(default)]
    pub liveness: LivenessConfig,

    /// Mailbox sizing and receive timeouts
    #[serde(default)]
    pub message_bus: MessageBusConfig,

    /// Defaults applied to submitted tasks
    #[serde(default)]
    pub tasks: TaskDefaults,

    /// Defaults applied to registered agents
    #[serde(default)]
    pub agents: AgentDefaults,

    /// Agents provisioned at startup
    #[serde(default)]
    pub fleet: Vec<FleetEntry>,

    /// Simulated agent behavior for `run --simulate`
    #[serde(default)]
    pub simulation: SimulationConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Scheduler loop configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct SchedulerConfig {
    /// Milliseconds between scheduler passes
    #[serde(default = "default_scheduler_interval_ms")]
    pub interval_ms: u64,

    /// Upper bound on dispatches in a single pass
    #[serde(default = "default_max_assignments_per_pass")]
    pub max_assignments_per_pass: usize,
}

const fn default_scheduler_interval_ms() -> u64 {
    500
}

const fn default_max_assignments_per_pass() -> usize {
    64
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            interval_ms: default_scheduler_interval_ms(),
            max_assignments_per_pass: default_max_assignments_per_pass(),
        }
    }
}

/// Heartbeat staleness detection
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct LivenessConfig {
    /// Milliseconds between liveness sweeps
    #[serde(default = "default_sweep_interval_ms")]
    pub sweep_interval_ms: u64,

    /// Heartbeat age after which health becomes UNKNOWN
    #[serde(default = "default_heartbeat_ttl_secs")]
    pub heartbeat_ttl_secs: u64,

    /// Heartbeat age after which health becomes CRITICAL
    #[serde(default = "default_critical_ttl_secs")]
    pub critical_ttl_secs: u64,
}

const fn default_sweep_interval_ms() -> u64 {
    1_000
}

const fn default_heartbeat_ttl_secs() -> u64 {
    30
}

const fn default_critical_ttl_secs() -> u64 {
    90
}

impl Default for LivenessConfig {
    fn default() -> Self {
        Self {
            sweep_interval_ms: default_sweep_interval_ms(),
            heartbeat_ttl_secs: default_heartbeat_ttl_secs(),
            critical_ttl_secs: default_critical_ttl_secs(),
        }
    }
}

/// Mailbox sizing and receive timeouts
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct MessageBusConfig {
    /// Messages a mailbox holds before `send` reports failure
    #[serde(default = "default_mailbox_capacity")]
    pub mailbox_capacity: usize,

    /// Default timeout for a blocking receive
    #[serde(default = "default_receive_timeout_ms")]
    pub receive_timeout_ms: u64,
}

const fn default_mailbox_capacity() -> usize {
    256
}

const fn default_receive_timeout_ms() -> u64 {
    5_000
}

impl Default for MessageBusConfig {
    fn default() -> Self {
        Self {
            mailbox_capacity: default_mailbox_capacity(),
            receive_timeout_ms: default_receive_timeout_ms(),
        }
    }
}

/// Defaults applied to submitted tasks
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct TaskDefaults {
    /// Retry budget when a submission does not set one
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Priority when a submission does not set one (lower is more urgent)
    #[serde(default = "default_priority")]
    pub default_priority: i32,
}

const fn default_max_retries() -> u32 {
    3
}

const fn default_priority() -> i32 {
    5
}

impl Default for TaskDefaults {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            default_priority: default_priority(),
        }
    }
}

/// Defaults applied to registered agents
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct AgentDefaults {
    /// Concurrency cap when a fleet entry does not set one
    #[serde(default = "default_max_concurrent_tasks")]
    pub max_concurrent_tasks: usize,

    /// CPU percentage above which a heartbeat marks the agent WARNING
    #[serde(default = "default_warning_percent")]
    pub warning_cpu_percent: f64,

    /// Memory percentage above which a heartbeat marks the agent WARNING
    #[serde(default = "default_warning_percent")]
    pub warning_memory_percent: f64,
}

const fn default_max_concurrent_tasks() -> usize {
    2
}

const fn default_warning_percent() -> f64 {
    90.0
}

impl AgentDefaults {
    pub fn load_thresholds(&self) -> LoadThresholds {
        LoadThresholds {
            cpu_percent: self.warning_cpu_percent,
            memory_percent: self.warning_memory_percent,
        }
    }
}

impl Default for AgentDefaults {
    fn default() -> Self {
        Self {
            max_concurrent_tasks: default_max_concurrent_tasks(),
            warning_cpu_percent: default_warning_percent(),
            warning_memory_percent: default_warning_percent(),
        }
    }
}

/// A group of identical agents provisioned at startup
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct FleetEntry {
    pub capability: Capability,

    #[serde(default = "default_fleet_count")]
    pub count: usize,

    /// Overrides `agents.max_concurrent_tasks`
    #[serde(default)]
    pub max_concurrent_tasks: Option<usize>,
}

const fn default_fleet_count() -> usize {
    1
}

/// Simulated agent behavior
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct SimulationConfig {
    /// Multiplier applied to estimated durations (0.01 runs a 60s stage in 600ms)
    #[serde(default = "default_time_scale")]
    pub time_scale: f64,

    /// Milliseconds between simulated heartbeats
    #[serde(default = "default_heartbeat_interval_ms")]
    pub heartbeat_interval_ms: u64,

    /// Probability (0-1) that a simulated stage fails
    #[serde(default)]
    pub failure_rate: f64,
}

const fn default_time_scale() -> f64 {
    0.01
}

const fn default_heartbeat_interval_ms() -> u64 {
    1_000
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            time_scale: default_time_scale(),
            heartbeat_interval_ms: default_heartbeat_interval_ms(),
            failure_rate: 0.0,
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct LoggingConfig {
    /// Log level: trace, debug, info, warn, error
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log format: json or pretty
    #[serde(default = "default_log_format")]
    pub format: String,

    /// Directory for rolling log files; stdout only when unset
    #[serde(default)]
    pub log_dir: Option<String>,

    /// File rotation: daily, hourly or never
    #[serde(default = "default_rotation")]
    pub rotation: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "pretty".to_string()
}

fn default_rotation() -> String {
    "daily".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
            log_dir: None,
            rotation: default_rotation(),
        }
    }
}
