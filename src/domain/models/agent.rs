//! Agent domain model.
//!
//! Status and health are two axes of one state table. The combinations the
//! model allows are:
//!
//! | status        | health                                  |
//! |---------------|-----------------------------------------|
//! | `STOPPED`     | `STOPPED`                               |
//! | `ERROR`       | `ERROR`                                 |
//! | anything else | `HEALTHY`, `WARNING`, `CRITICAL`, `ERROR`, `UNKNOWN` |
//!
//! and `status == BUSY` exactly when `current_task_ids` is non-empty.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use super::capability::Capability;
use crate::domain::errors::{DomainError, DomainResult};

/// Lifecycle status of an agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AgentStatus {
    Idle,
    Busy,
    Starting,
    Stopping,
    Stopped,
    Error,
    Maintenance,
}

impl AgentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "IDLE",
            Self::Busy => "BUSY",
            Self::Starting => "STARTING",
            Self::Stopping => "STOPPING",
            Self::Stopped => "STOPPED",
            Self::Error => "ERROR",
            Self::Maintenance => "MAINTENANCE",
        }
    }

    /// Whether an agent in this status may take new work.
    pub fn accepts_work(&self) -> bool {
        matches!(self, Self::Idle | Self::Busy)
    }
}

impl fmt::Display for AgentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AgentStatus {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "IDLE" => Ok(Self::Idle),
            "BUSY" => Ok(Self::Busy),
            "STARTING" => Ok(Self::Starting),
            "STOPPING" => Ok(Self::Stopping),
            "STOPPED" => Ok(Self::Stopped),
            "ERROR" => Ok(Self::Error),
            "MAINTENANCE" => Ok(Self::Maintenance),
            _ => Err(DomainError::ValidationFailed(format!("Invalid agent status: {s}"))),
        }
    }
}

/// Health of an agent, orthogonal to its status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum HealthStatus {
    Healthy,
    Warning,
    Critical,
    Error,
    Unknown,
    Stopped,
}

impl HealthStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Healthy => "HEALTHY",
            Self::Warning => "WARNING",
            Self::Critical => "CRITICAL",
            Self::Error => "ERROR",
            Self::Unknown => "UNKNOWN",
            Self::Stopped => "STOPPED",
        }
    }
}

impl fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why health was degraded, when a heartbeat is able to recover it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Degradation {
    /// Heartbeats stopped arriving
    Staleness,
    /// Reported metrics crossed the warning thresholds
    Load,
}

/// Resource usage reported with a heartbeat.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AgentMetrics {
    /// CPU usage, 0-100
    pub cpu_percent: f64,
    /// Memory usage, 0-100
    pub memory_percent: f64,
}

impl AgentMetrics {
    pub fn new(cpu_percent: f64, memory_percent: f64) -> Self {
        Self {
            cpu_percent,
            memory_percent,
        }
    }

    pub fn validate(&self) -> DomainResult<()> {
        for (name, value) in [("cpu_percent", self.cpu_percent), ("memory_percent", self.memory_percent)] {
            if !value.is_finite() || !(0.0..=100.0).contains(&value) {
                return Err(DomainError::ValidationFailed(format!(
                    "{name} must be within 0-100, got {value}"
                )));
            }
        }
        Ok(())
    }

    fn exceeds(&self, thresholds: &LoadThresholds) -> bool {
        self.cpu_percent > thresholds.cpu_percent || self.memory_percent > thresholds.memory_percent
    }
}

/// Metric levels above which a heartbeat marks the agent WARNING.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LoadThresholds {
    pub cpu_percent: f64,
    pub memory_percent: f64,
}

impl Default for LoadThresholds {
    fn default() -> Self {
        Self {
            cpu_percent: 90.0,
            memory_percent: 90.0,
        }
    }
}

/// A worker unit in the fleet.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Agent {
    /// Unique agent identifier
    pub id: Uuid,
    /// Display name, e.g. "deep-analysis-1"
    pub name: String,
    /// The one kind of work this agent performs
    pub capability: Capability,
    pub status: AgentStatus,
    pub health: HealthStatus,
    /// Set while `health` is degraded for a reason a heartbeat can clear
    pub degradation: Option<Degradation>,
    /// Capacity limit, at least 1
    pub max_concurrent_tasks: usize,
    /// Subtasks currently executing on this agent
    pub current_task_ids: BTreeSet<Uuid>,
    pub last_heartbeat: DateTime<Utc>,
    /// Metrics from the most recent heartbeat
    pub last_metrics: Option<AgentMetrics>,
    pub total_tasks: u64,
    pub success_tasks: u64,
    pub failed_tasks: u64,
    /// Running mean over all completions, in seconds
    pub avg_execution_secs: f64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Agent {
    /// Create a freshly registered agent in `STARTING`/`HEALTHY`.
    pub fn new(capability: Capability, max_concurrent_tasks: usize) -> Self {
        let now = Utc::now();
        let id = Uuid::new_v4();
        Self {
            id,
            name: format!("{}-{}", capability.as_str().to_lowercase().replace('_', "-"), &id.simple().to_string()[..8]),
            capability,
            status: AgentStatus::Starting,
            health: HealthStatus::Healthy,
            degradation: None,
            max_concurrent_tasks,
            current_task_ids: BTreeSet::new(),
            last_heartbeat: now,
            last_metrics: None,
            total_tasks: 0,
            success_tasks: 0,
            failed_tasks: 0,
            avg_execution_secs: 0.0,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn load(&self) -> usize {
        self.current_task_ids.len()
    }

    pub fn has_capacity(&self) -> bool {
        self.load() < self.max_concurrent_tasks
    }

    /// Whether a new subtask could be assigned right now.
    pub fn is_available(&self) -> bool {
        self.check_available().is_ok()
    }

    /// Explain why a new subtask cannot be assigned, if it cannot.
    pub fn check_available(&self) -> DomainResult<()> {
        let reason = if !self.status.accepts_work() {
            format!("status is {}", self.status)
        } else if self.health != HealthStatus::Healthy {
            format!("health is {}", self.health)
        } else if !self.has_capacity() {
            format!("at capacity ({}/{})", self.load(), self.max_concurrent_tasks)
        } else {
            return Ok(());
        };
        Err(DomainError::AgentUnavailable {
            agent_id: self.id,
            reason,
        })
    }

    /// Take on a subtask.
    pub fn assign(&mut self, subtask_id: Uuid) -> DomainResult<()> {
        self.check_available()?;
        if self.current_task_ids.contains(&subtask_id) {
            return Err(DomainError::ValidationFailed(format!(
                "Subtask {subtask_id} is already assigned to agent {}",
                self.id
            )));
        }
        self.current_task_ids.insert(subtask_id);
        self.status = AgentStatus::Busy;
        self.touch();
        Ok(())
    }

    /// Record the outcome of a subtask this agent was running.
    pub fn complete(&mut self, subtask_id: Uuid, success: bool, elapsed_secs: f64) -> DomainResult<()> {
        if !self.current_task_ids.remove(&subtask_id) {
            return Err(DomainError::ValidationFailed(format!(
                "Subtask {subtask_id} is not assigned to agent {}",
                self.id
            )));
        }

        self.total_tasks += 1;
        if success {
            self.success_tasks += 1;
        } else {
            self.failed_tasks += 1;
            self.health = HealthStatus::Error;
            self.degradation = None;
        }
        #[allow(clippy::cast_precision_loss)]
        let n = self.total_tasks as f64;
        self.avg_execution_secs += (elapsed_secs.max(0.0) - self.avg_execution_secs) / n;

        self.settle_load();
        self.touch();
        Ok(())
    }

    /// Drop a subtask without recording an outcome. Returns whether it was held.
    pub fn release(&mut self, subtask_id: Uuid) -> bool {
        let held = self.current_task_ids.remove(&subtask_id);
        if held {
            self.settle_load();
            self.touch();
        }
        held
    }

    /// `STARTING | STOPPED | ERROR -> IDLE`, health reset to `HEALTHY`.
    pub fn start(&mut self) -> DomainResult<()> {
        if !matches!(
            self.status,
            AgentStatus::Starting | AgentStatus::Stopped | AgentStatus::Error
        ) {
            return Err(DomainError::transition("agent", self.status, AgentStatus::Idle));
        }
        self.status = AgentStatus::Idle;
        self.health = HealthStatus::Healthy;
        self.degradation = None;
        self.last_heartbeat = Utc::now();
        self.touch();
        Ok(())
    }

    /// Stop the agent. Returns the subtasks it was running.
    pub fn stop(&mut self) -> DomainResult<Vec<Uuid>> {
        if self.status == AgentStatus::Stopped {
            return Err(DomainError::transition("agent", self.status, AgentStatus::Stopped));
        }
        let drained = self.drain();
        self.status = AgentStatus::Stopped;
        self.health = HealthStatus::Stopped;
        self.degradation = None;
        self.touch();
        Ok(drained)
    }

    /// Mark the agent broken. Returns the subtasks it was running.
    pub fn fault(&mut self) -> DomainResult<Vec<Uuid>> {
        if self.status == AgentStatus::Stopped {
            return Err(DomainError::transition("agent", self.status, AgentStatus::Error));
        }
        let drained = self.drain();
        self.status = AgentStatus::Error;
        self.health = HealthStatus::Error;
        self.degradation = None;
        self.touch();
        Ok(drained)
    }

    pub fn enter_maintenance(&mut self) -> DomainResult<()> {
        match self.status {
            AgentStatus::Idle => {
                self.status = AgentStatus::Maintenance;
                self.touch();
                Ok(())
            }
            AgentStatus::Busy => Err(DomainError::AgentBusy {
                agent_id: self.id,
                max_concurrent_tasks: self.max_concurrent_tasks,
            }),
            other => Err(DomainError::transition("agent", other, AgentStatus::Maintenance)),
        }
    }

    pub fn exit_maintenance(&mut self) -> DomainResult<()> {
        if self.status != AgentStatus::Maintenance {
            return Err(DomainError::transition("agent", self.status, AgentStatus::Idle));
        }
        self.status = AgentStatus::Idle;
        self.touch();
        Ok(())
    }

    /// Record a heartbeat.
    ///
    /// Staleness and load degradations recover here. `ERROR` and `STOPPED`
    /// health only change through the lifecycle operations.
    pub fn heartbeat(
        &mut self,
        metrics: Option<AgentMetrics>,
        thresholds: &LoadThresholds,
        now: DateTime<Utc>,
    ) -> DomainResult<()> {
        if let Some(metrics) = &metrics {
            metrics.validate()?;
        }
        self.last_heartbeat = now;
        if metrics.is_some() {
            self.last_metrics = metrics;
        }
        self.updated_at = now;

        if matches!(self.health, HealthStatus::Error | HealthStatus::Stopped) {
            return Ok(());
        }

        let overloaded = metrics.is_some_and(|m| m.exceeds(thresholds));
        if overloaded {
            self.health = HealthStatus::Warning;
            self.degradation = Some(Degradation::Load);
        } else if self.degradation.is_some() {
            self.health = HealthStatus::Healthy;
            self.degradation = None;
        }
        Ok(())
    }

    /// Downgrade health if heartbeats are overdue. Returns the new health when
    /// it changed.
    pub fn sweep(&mut self, now: DateTime<Utc>, ttl: Duration, critical_ttl: Duration) -> Option<HealthStatus> {
        if matches!(self.health, HealthStatus::Error | HealthStatus::Stopped) {
            return None;
        }
        let age = now - self.last_heartbeat;
        let next = if age > critical_ttl {
            HealthStatus::Critical
        } else if age > ttl && self.health != HealthStatus::Critical {
            HealthStatus::Unknown
        } else {
            return None;
        };
        if next == self.health {
            return None;
        }
        self.health = next;
        self.degradation = Some(Degradation::Staleness);
        self.updated_at = now;
        Some(next)
    }

    /// Assert the status/health/load table. Violations are programming errors.
    pub fn debug_check_invariants(&self) {
        debug_assert!(
            self.load() <= self.max_concurrent_tasks,
            "agent {} exceeds capacity",
            self.id
        );
        debug_assert_eq!(
            self.status == AgentStatus::Busy,
            !self.current_task_ids.is_empty(),
            "agent {} BUSY/load mismatch",
            self.id
        );
        debug_assert_eq!(
            self.status == AgentStatus::Stopped,
            self.health == HealthStatus::Stopped,
            "agent {} STOPPED status/health mismatch",
            self.id
        );
    }

    fn drain(&mut self) -> Vec<Uuid> {
        std::mem::take(&mut self.current_task_ids).into_iter().collect()
    }

    fn settle_load(&mut self) {
        if self.status == AgentStatus::Busy && self.current_task_ids.is_empty() {
            self.status = AgentStatus::Idle;
        }
    }

    fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn running_agent(cap: usize) -> Agent {
        let mut agent = Agent::new(Capability::DeepAnalysis, cap);
        agent.start().unwrap();
        agent
    }

    #[test]
    fn test_register_defaults() {
        let agent = Agent::new(Capability::Validation, 2);
        assert_eq!(agent.status, AgentStatus::Starting);
        assert_eq!(agent.health, HealthStatus::Healthy);
        assert!(!agent.is_available());
        assert!(agent.name.starts_with("validation-"));
    }

    #[test]
    fn test_capacity_and_busy_status() {
        let mut agent = running_agent(2);
        let (a, b, c) = (Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4());

        agent.assign(a).unwrap();
        assert_eq!(agent.status, AgentStatus::Busy);
        agent.assign(b).unwrap();
        let err = agent.assign(c).unwrap_err();
        assert!(matches!(err, DomainError::AgentUnavailable { .. }));

        agent.complete(a, true, 2.0).unwrap();
        agent.assign(c).unwrap();
        agent.debug_check_invariants();

        agent.complete(b, true, 4.0).unwrap();
        agent.complete(c, true, 6.0).unwrap();
        assert_eq!(agent.status, AgentStatus::Idle);
        assert_eq!(agent.success_tasks, 3);
        assert!((agent.avg_execution_secs - 4.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_failed_completion_sets_error_health() {
        let mut agent = running_agent(2);
        let a = Uuid::new_v4();
        agent.assign(a).unwrap();
        agent.complete(a, false, 1.0).unwrap();

        assert_eq!(agent.health, HealthStatus::Error);
        assert_eq!(agent.status, AgentStatus::Idle);
        assert_eq!(agent.failed_tasks, 1);

        // Heartbeats do not clear ERROR
        agent.heartbeat(None, &LoadThresholds::default(), Utc::now()).unwrap();
        assert_eq!(agent.health, HealthStatus::Error);
    }

    #[test]
    fn test_stop_drains_and_start_recovers() {
        let mut agent = running_agent(3);
        let a = Uuid::new_v4();
        agent.assign(a).unwrap();

        let drained = agent.stop().unwrap();
        assert_eq!(drained, vec![a]);
        assert_eq!(agent.status, AgentStatus::Stopped);
        assert_eq!(agent.health, HealthStatus::Stopped);
        assert!(agent.stop().is_err());

        agent.start().unwrap();
        assert_eq!(agent.status, AgentStatus::Idle);
        assert_eq!(agent.health, HealthStatus::Healthy);
        agent.debug_check_invariants();
    }

    #[test]
    fn test_start_rejected_from_idle() {
        let mut agent = running_agent(1);
        assert!(matches!(
            agent.start(),
            Err(DomainError::InvalidStateTransition { .. })
        ));
    }

    #[test]
    fn test_maintenance_only_when_idle() {
        let mut agent = running_agent(1);
        let a = Uuid::new_v4();
        agent.assign(a).unwrap();
        assert!(matches!(agent.enter_maintenance(), Err(DomainError::AgentBusy { .. })));

        agent.release(a);
        agent.enter_maintenance().unwrap();
        assert!(!agent.is_available());
        agent.exit_maintenance().unwrap();
        assert!(agent.is_available());
    }

    #[test]
    fn test_sweep_downgrades_then_heartbeat_recovers() {
        let mut agent = running_agent(1);
        let ttl = Duration::seconds(30);
        let critical = Duration::seconds(90);
        let start = agent.last_heartbeat;

        assert_eq!(agent.sweep(start + Duration::seconds(10), ttl, critical), None);
        assert_eq!(
            agent.sweep(start + Duration::seconds(31), ttl, critical),
            Some(HealthStatus::Unknown)
        );
        assert_eq!(agent.sweep(start + Duration::seconds(40), ttl, critical), None);
        assert_eq!(
            agent.sweep(start + Duration::seconds(91), ttl, critical),
            Some(HealthStatus::Critical)
        );
        assert_eq!(agent.status, AgentStatus::Idle);

        agent.heartbeat(None, &LoadThresholds::default(), Utc::now()).unwrap();
        assert_eq!(agent.health, HealthStatus::Healthy);
        assert!(agent.degradation.is_none());
    }

    #[test]
    fn test_load_warning_from_metrics() {
        let mut agent = running_agent(1);
        let thresholds = LoadThresholds::default();

        agent.heartbeat(Some(AgentMetrics::new(97.0, 40.0)), &thresholds, Utc::now()).unwrap();
        assert_eq!(agent.health, HealthStatus::Warning);
        assert_eq!(agent.degradation, Some(Degradation::Load));

        agent.heartbeat(Some(AgentMetrics::new(20.0, 40.0)), &thresholds, Utc::now()).unwrap();
        assert_eq!(agent.health, HealthStatus::Healthy);
    }

    #[test]
    fn test_invalid_metrics_rejected() {
        let mut agent = running_agent(1);
        let before = agent.last_heartbeat;
        let result = agent.heartbeat(
            Some(AgentMetrics::new(140.0, 10.0)),
            &LoadThresholds::default(),
            Utc::now(),
        );
        assert!(matches!(result, Err(DomainError::ValidationFailed(_))));
        assert_eq!(agent.last_heartbeat, before);
    }

    #[test]
    fn test_fault_returns_inflight() {
        let mut agent = running_agent(2);
        let a = Uuid::new_v4();
        agent.assign(a).unwrap();
        assert_eq!(agent.fault().unwrap(), vec![a]);
        assert_eq!(agent.status, AgentStatus::Error);
        assert_eq!(agent.health, HealthStatus::Error);
        agent.start().unwrap();
        assert!(agent.is_available());
    }
}
