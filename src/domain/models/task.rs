//! Task domain model.
//!
//! A task is a top-level unit of analysis work submitted by a creator. It is
//! decomposed into subtasks that agents execute; the task itself only moves
//! through the lifecycle below.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::domain::errors::{DomainError, DomainResult};

/// Highest progress value a task can report.
pub const MAX_PROGRESS: u8 = 100;

/// Status of a task in its lifecycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskStatus {
    /// Submitted, nothing dispatched yet
    #[default]
    Pending,
    /// At least one subtask has been dispatched
    Running,
    /// Suspended by an operator; no new subtasks are dispatched
    Paused,
    /// All subtasks completed
    Completed,
    /// A subtask failed or the task was failed explicitly
    Failed,
    /// Cancelled by an operator
    Cancelled,
}

impl TaskStatus {
    /// Every status, in declaration order.
    pub const ALL: [TaskStatus; 6] = [
        Self::Pending,
        Self::Running,
        Self::Paused,
        Self::Completed,
        Self::Failed,
        Self::Cancelled,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::Running => "RUNNING",
            Self::Paused => "PAUSED",
            Self::Completed => "COMPLETED",
            Self::Failed => "FAILED",
            Self::Cancelled => "CANCELLED",
        }
    }

    /// Completed and cancelled tasks never change again. Failed tasks are
    /// terminal only once their retries are exhausted, see [`Task::is_terminal`].
    pub fn is_final(&self) -> bool {
        matches!(self, Self::Completed | Self::Cancelled)
    }

    /// Valid transitions from this status.
    pub fn valid_transitions(&self) -> &'static [TaskStatus] {
        match self {
            Self::Pending => &[Self::Running, Self::Cancelled],
            Self::Running => &[Self::Paused, Self::Completed, Self::Failed, Self::Cancelled],
            Self::Paused => &[Self::Running, Self::Cancelled],
            // Only reachable through an explicit retry
            Self::Failed => &[Self::Pending],
            Self::Completed | Self::Cancelled => &[],
        }
    }

    pub fn can_transition_to(&self, new_status: Self) -> bool {
        self.valid_transitions().contains(&new_status)
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaskStatus {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "PENDING" => Ok(Self::Pending),
            "RUNNING" => Ok(Self::Running),
            "PAUSED" => Ok(Self::Paused),
            "COMPLETED" => Ok(Self::Completed),
            "FAILED" => Ok(Self::Failed),
            "CANCELLED" | "CANCELED" => Ok(Self::Cancelled),
            _ => Err(DomainError::ValidationFailed(format!("Invalid task status: {s}"))),
        }
    }
}

/// Kind of analysis workload. Selects the decomposition template.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskType {
    ImageAnalysis,
    DocumentAnalysis,
    DataProcessing,
    ModelTraining,
    ReportGeneration,
    MultiModalFusion,
    QualityInspection,
    FailureAnalysis,
}

impl TaskType {
    pub const ALL: [TaskType; 8] = [
        Self::ImageAnalysis,
        Self::DocumentAnalysis,
        Self::DataProcessing,
        Self::ModelTraining,
        Self::ReportGeneration,
        Self::MultiModalFusion,
        Self::QualityInspection,
        Self::FailureAnalysis,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ImageAnalysis => "IMAGE_ANALYSIS",
            Self::DocumentAnalysis => "DOCUMENT_ANALYSIS",
            Self::DataProcessing => "DATA_PROCESSING",
            Self::ModelTraining => "MODEL_TRAINING",
            Self::ReportGeneration => "REPORT_GENERATION",
            Self::MultiModalFusion => "MULTI_MODAL_FUSION",
            Self::QualityInspection => "QUALITY_INSPECTION",
            Self::FailureAnalysis => "FAILURE_ANALYSIS",
        }
    }
}

impl fmt::Display for TaskType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaskType {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_uppercase().replace('-', "_");
        Self::ALL
            .into_iter()
            .find(|t| t.as_str() == normalized)
            .ok_or_else(|| DomainError::ValidationFailed(format!("Invalid task type: {s}")))
    }
}

/// Typed task parameters, validated once at the boundary.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TaskParameters {
    /// Short human-readable title
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    /// Free-form instructions for the agents
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Failure case this task analyses, if any
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub case_id: Option<String>,
    /// References to input artifacts (file ids, URIs)
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub inputs: Vec<String>,
    /// Append a report compilation stage to the decomposition
    #[serde(default)]
    pub include_report: bool,
    /// Structured, type-specific extras
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub attributes: BTreeMap<String, serde_json::Value>,
}

impl TaskParameters {
    const MAX_TITLE_LEN: usize = 200;

    pub fn validate(&self) -> DomainResult<()> {
        if let Some(title) = &self.title {
            if title.trim().is_empty() {
                return Err(DomainError::ValidationFailed("Task title cannot be blank".into()));
            }
            if title.chars().count() > Self::MAX_TITLE_LEN {
                return Err(DomainError::ValidationFailed(format!(
                    "Task title exceeds {} characters",
                    Self::MAX_TITLE_LEN
                )));
            }
        }
        if self.inputs.iter().any(|i| i.trim().is_empty()) {
            return Err(DomainError::ValidationFailed("Task inputs cannot be blank".into()));
        }
        if self.attributes.keys().any(|k| k.trim().is_empty()) {
            return Err(DomainError::ValidationFailed("Attribute keys cannot be blank".into()));
        }
        Ok(())
    }
}

/// Request to create a task, as supplied by the API layer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateTask {
    pub task_type: TaskType,
    /// Lower is more urgent; falls back to the configured default
    #[serde(default)]
    pub priority: Option<i32>,
    #[serde(default)]
    pub parameters: TaskParameters,
    pub creator_id: Uuid,
    #[serde(default)]
    pub parent_task_id: Option<Uuid>,
    /// Falls back to the configured default
    #[serde(default)]
    pub max_retries: Option<u32>,
}

impl CreateTask {
    pub fn new(task_type: TaskType, creator_id: Uuid) -> Self {
        Self {
            task_type,
            priority: None,
            parameters: TaskParameters::default(),
            creator_id,
            parent_task_id: None,
            max_retries: None,
        }
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = Some(priority);
        self
    }

    pub fn with_parameters(mut self, parameters: TaskParameters) -> Self {
        self.parameters = parameters;
        self
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = Some(max_retries);
        self
    }

    pub fn with_parent(mut self, parent_task_id: Uuid) -> Self {
        self.parent_task_id = Some(parent_task_id);
        self
    }
}

/// A top-level unit of work.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    /// Unique identifier
    pub id: Uuid,
    /// Workload kind
    pub task_type: TaskType,
    /// Current status
    pub status: TaskStatus,
    /// Lower is more urgent
    pub priority: i32,
    /// Who submitted the task
    pub creator_id: Uuid,
    /// Agent that received the first dispatched subtask
    pub assigned_agent_id: Option<Uuid>,
    /// Enclosing task, for nested submissions
    pub parent_task_id: Option<Uuid>,
    /// Typed input parameters
    pub parameters: TaskParameters,
    /// Aggregated result once completed
    pub result: Option<serde_json::Value>,
    /// 0-100
    pub progress: u8,
    /// Retries performed so far
    pub retry_count: u32,
    /// Maximum retries allowed
    pub max_retries: u32,
    /// Last failure reason
    pub error_message: Option<String>,
    /// When created
    pub created_at: DateTime<Utc>,
    /// When last updated
    pub updated_at: DateTime<Utc>,
    /// When execution first started
    pub started_at: Option<DateTime<Utc>>,
    /// When execution ended (completed, failed or cancelled)
    pub completed_at: Option<DateTime<Utc>>,
    /// Bumped on every mutation
    pub version: u64,
}

impl Task {
    /// Create a new pending task.
    pub fn new(task_type: TaskType, creator_id: Uuid) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            task_type,
            status: TaskStatus::default(),
            priority: 0,
            creator_id,
            assigned_agent_id: None,
            parent_task_id: None,
            parameters: TaskParameters::default(),
            result: None,
            progress: 0,
            retry_count: 0,
            max_retries: 3,
            error_message: None,
            created_at: now,
            updated_at: now,
            started_at: None,
            completed_at: None,
            version: 1,
        }
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_parameters(mut self, parameters: TaskParameters) -> Self {
        self.parameters = parameters;
        self
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn with_parent(mut self, parent_task_id: Uuid) -> Self {
        self.parent_task_id = Some(parent_task_id);
        self
    }

    /// A task is terminal once completed, cancelled, or failed with no
    /// retries left.
    pub fn is_terminal(&self) -> bool {
        self.status.is_final()
            || (self.status == TaskStatus::Failed && self.retry_count >= self.max_retries)
    }

    /// Whether new subtasks of this task may be dispatched.
    pub fn is_dispatchable(&self) -> bool {
        matches!(self.status, TaskStatus::Pending | TaskStatus::Running)
    }

    /// Check if can transition to given status.
    pub fn can_transition_to(&self, new_status: TaskStatus) -> bool {
        self.status.can_transition_to(new_status)
    }

    /// Transition to a new status through the transition table.
    ///
    /// `Failed -> Pending` is rejected here; it is only reachable via [`Task::retry`].
    pub fn transition_to(&mut self, new_status: TaskStatus) -> DomainResult<()> {
        let via_retry_only = self.status == TaskStatus::Failed && new_status == TaskStatus::Pending;
        if via_retry_only || !self.can_transition_to(new_status) {
            return Err(DomainError::transition("task", self.status, new_status));
        }

        let now = Utc::now();
        self.status = new_status;
        self.touch(now);

        match new_status {
            TaskStatus::Running if self.started_at.is_none() => self.started_at = Some(now),
            TaskStatus::Completed | TaskStatus::Failed | TaskStatus::Cancelled => {
                self.completed_at = Some(now);
            }
            _ => {}
        }

        Ok(())
    }

    pub fn start(&mut self) -> DomainResult<()> {
        if self.status != TaskStatus::Pending {
            return Err(DomainError::transition("task", self.status, TaskStatus::Running));
        }
        self.transition_to(TaskStatus::Running)
    }

    pub fn pause(&mut self) -> DomainResult<()> {
        self.transition_to(TaskStatus::Paused)
    }

    pub fn resume(&mut self) -> DomainResult<()> {
        if self.status != TaskStatus::Paused {
            return Err(DomainError::transition("task", self.status, TaskStatus::Running));
        }
        self.transition_to(TaskStatus::Running)
    }

    pub fn cancel(&mut self) -> DomainResult<()> {
        self.transition_to(TaskStatus::Cancelled)
    }

    /// Complete with a result. Forces progress to 100.
    pub fn complete(&mut self, result: Option<serde_json::Value>) -> DomainResult<()> {
        self.transition_to(TaskStatus::Completed)?;
        self.progress = MAX_PROGRESS;
        self.result = result;
        Ok(())
    }

    pub fn fail(&mut self, message: impl Into<String>) -> DomainResult<()> {
        self.transition_to(TaskStatus::Failed)?;
        self.error_message = Some(message.into());
        Ok(())
    }

    /// Check if task can be retried.
    pub fn can_retry(&self) -> bool {
        self.status == TaskStatus::Failed && self.retry_count < self.max_retries
    }

    /// Move a failed task back to pending for another attempt.
    pub fn retry(&mut self) -> DomainResult<()> {
        if self.status != TaskStatus::Failed {
            return Err(DomainError::transition("task", self.status, TaskStatus::Pending));
        }
        if self.retry_count >= self.max_retries {
            return Err(DomainError::RetryExhausted {
                task_id: self.id,
                retry_count: self.retry_count,
                max_retries: self.max_retries,
            });
        }
        self.retry_count += 1;
        self.status = TaskStatus::Pending;
        self.error_message = None;
        self.progress = 0;
        self.result = None;
        self.assigned_agent_id = None;
        self.completed_at = None;
        self.touch(Utc::now());
        Ok(())
    }

    /// Set progress. Only while running, within 0-100, never decreasing.
    pub fn update_progress(&mut self, value: i32) -> DomainResult<()> {
        if self.status != TaskStatus::Running {
            return Err(DomainError::ValidationFailed(format!(
                "Progress can only be updated while RUNNING (task is {})",
                self.status
            )));
        }
        let value = u8::try_from(value)
            .ok()
            .filter(|v| *v <= MAX_PROGRESS)
            .ok_or_else(|| {
                DomainError::ValidationFailed(format!("Progress {value} is outside 0-100"))
            })?;
        if value < self.progress {
            return Err(DomainError::ValidationFailed(format!(
                "Progress cannot decrease from {} to {value}",
                self.progress
            )));
        }
        self.progress = value;
        self.touch(Utc::now());
        Ok(())
    }

    /// Validate task.
    pub fn validate(&self) -> DomainResult<()> {
        if self.parent_task_id == Some(self.id) {
            return Err(DomainError::ValidationFailed("Task cannot be its own parent".into()));
        }
        self.parameters.validate()
    }

    fn touch(&mut self, now: DateTime<Utc>) {
        self.updated_at = now;
        self.version += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn task_in(status: TaskStatus) -> Task {
        let mut task = Task::new(TaskType::FailureAnalysis, Uuid::new_v4());
        task.status = status;
        task
    }

    #[test]
    fn test_task_creation() {
        let task = Task::new(TaskType::ImageAnalysis, Uuid::new_v4());
        assert_eq!(task.status, TaskStatus::Pending);
        assert_eq!(task.progress, 0);
        assert_eq!(task.retry_count, 0);
        assert!(task.started_at.is_none());
    }

    #[test]
    fn test_transition_table_all_pairs() {
        for from in TaskStatus::ALL {
            for to in TaskStatus::ALL {
                let mut task = task_in(from);
                let before = task.clone();
                let result = task.transition_to(to);

                let allowed = from.can_transition_to(to)
                    && !(from == TaskStatus::Failed && to == TaskStatus::Pending);
                if allowed {
                    assert!(result.is_ok(), "{from} -> {to} should succeed");
                    assert_eq!(task.status, to);
                } else {
                    assert!(
                        matches!(result, Err(DomainError::InvalidStateTransition { .. })),
                        "{from} -> {to} should be rejected"
                    );
                    assert_eq!(task, before, "{from} -> {to} must not mutate the task");
                }
            }
        }
    }

    #[test]
    fn test_lifecycle_timestamps() {
        let mut task = task_in(TaskStatus::Pending);
        task.start().unwrap();
        let started = task.started_at.unwrap();
        task.pause().unwrap();
        task.resume().unwrap();
        assert_eq!(task.started_at, Some(started));
        task.complete(Some(serde_json::json!({"ok": true}))).unwrap();
        assert_eq!(task.progress, 100);
        assert!(task.completed_at.is_some());
        assert!(task.is_terminal());
    }

    #[test]
    fn test_start_only_from_pending() {
        let mut task = task_in(TaskStatus::Paused);
        assert!(task.start().is_err());
        assert_eq!(task.status, TaskStatus::Paused);
    }

    #[test]
    fn test_retry_until_exhausted() {
        let mut task = task_in(TaskStatus::Running).with_max_retries(2);
        task.progress = 40;
        task.fail("boom").unwrap();

        task.retry().unwrap();
        assert_eq!(task.status, TaskStatus::Pending);
        assert_eq!(task.retry_count, 1);
        assert_eq!(task.progress, 0);
        assert!(task.error_message.is_none());

        task.start().unwrap();
        task.fail("boom again").unwrap();
        task.retry().unwrap();
        task.start().unwrap();
        task.fail("third strike").unwrap();

        for _ in 0..3 {
            let err = task.retry().unwrap_err();
            assert!(matches!(err, DomainError::RetryExhausted { retry_count: 2, max_retries: 2, .. }));
            assert_eq!(task.status, TaskStatus::Failed);
            assert_eq!(task.retry_count, 2);
        }
        assert!(task.is_terminal());
    }

    #[test]
    fn test_retry_requires_failed() {
        let mut task = task_in(TaskStatus::Running);
        assert!(matches!(task.retry(), Err(DomainError::InvalidStateTransition { .. })));
    }

    #[test]
    fn test_update_progress_rules() {
        let mut task = task_in(TaskStatus::Pending);
        assert!(task.update_progress(10).is_err());

        task.start().unwrap();
        task.update_progress(10).unwrap();
        task.update_progress(10).unwrap();
        assert!(matches!(task.update_progress(5), Err(DomainError::ValidationFailed(_))));
        assert!(matches!(task.update_progress(101), Err(DomainError::ValidationFailed(_))));
        assert!(matches!(task.update_progress(-1), Err(DomainError::ValidationFailed(_))));
        assert_eq!(task.progress, 10);

        task.pause().unwrap();
        assert!(task.update_progress(50).is_err());
    }

    #[test]
    fn test_status_wire_names() {
        assert_eq!(serde_json::to_string(&TaskStatus::Cancelled).unwrap(), "\"CANCELLED\"");
        assert_eq!("canceled".parse::<TaskStatus>().unwrap(), TaskStatus::Cancelled);
        assert_eq!(
            serde_json::to_string(&TaskType::MultiModalFusion).unwrap(),
            "\"MULTI_MODAL_FUSION\""
        );
        assert_eq!("failure-analysis".parse::<TaskType>().unwrap(), TaskType::FailureAnalysis);
        assert!("nonsense".parse::<TaskType>().is_err());
    }

    #[test]
    fn test_parameter_validation() {
        let mut params = TaskParameters::default();
        assert!(params.validate().is_ok());

        params.title = Some("   ".into());
        assert!(params.validate().is_err());

        params.title = Some("Wafer crack".into());
        params.attributes.insert(String::new(), serde_json::json!(1));
        assert!(params.validate().is_err());
    }

    #[test]
    fn test_negative_priority_is_allowed() {
        let task = Task::new(TaskType::DataProcessing, Uuid::new_v4()).with_priority(-1);
        assert!(task.validate().is_ok());
    }
}
