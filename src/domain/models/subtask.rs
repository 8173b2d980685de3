//! Subtask domain model.
//!
//! Subtasks are the nodes of a task's dependency graph. Each one is executed
//! by a single agent whose capability matches `required_capability`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use super::capability::Capability;
use crate::domain::errors::{DomainError, DomainResult};

/// Status of a subtask.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SubtaskStatus {
    #[default]
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl SubtaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::Running => "RUNNING",
            Self::Completed => "COMPLETED",
            Self::Failed => "FAILED",
            Self::Cancelled => "CANCELLED",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }
}

impl fmt::Display for SubtaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Stage of an analysis pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SubtaskKind {
    ImagePreprocessing,
    FeatureExtraction,
    PatternRecognition,
    ResultValidation,
    DocumentParsing,
    InformationExtraction,
    SemanticAnalysis,
    DataFusion,
    JointAnalysis,
    ComprehensiveEvaluation,
    PreliminaryAnalysis,
    DeepAnalysis,
    RootCauseAnalysis,
    ImprovementSuggestions,
    DataPreparation,
    CoreAnalysis,
    ResultOrganization,
    ReportCompilation,
}

impl SubtaskKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ImagePreprocessing => "IMAGE_PREPROCESSING",
            Self::FeatureExtraction => "FEATURE_EXTRACTION",
            Self::PatternRecognition => "PATTERN_RECOGNITION",
            Self::ResultValidation => "RESULT_VALIDATION",
            Self::DocumentParsing => "DOCUMENT_PARSING",
            Self::InformationExtraction => "INFORMATION_EXTRACTION",
            Self::SemanticAnalysis => "SEMANTIC_ANALYSIS",
            Self::DataFusion => "DATA_FUSION",
            Self::JointAnalysis => "JOINT_ANALYSIS",
            Self::ComprehensiveEvaluation => "COMPREHENSIVE_EVALUATION",
            Self::PreliminaryAnalysis => "PRELIMINARY_ANALYSIS",
            Self::DeepAnalysis => "DEEP_ANALYSIS",
            Self::RootCauseAnalysis => "ROOT_CAUSE_ANALYSIS",
            Self::ImprovementSuggestions => "IMPROVEMENT_SUGGESTIONS",
            Self::DataPreparation => "DATA_PREPARATION",
            Self::CoreAnalysis => "CORE_ANALYSIS",
            Self::ResultOrganization => "RESULT_ORGANIZATION",
            Self::ReportCompilation => "REPORT_COMPILATION",
        }
    }
}

impl fmt::Display for SubtaskKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A node in a task's dependency graph.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Subtask {
    /// Unique identifier
    pub id: Uuid,
    /// Owning task
    pub parent_task_id: Uuid,
    /// Pipeline stage
    pub kind: SubtaskKind,
    /// Human-readable stage name
    pub name: String,
    /// What the stage does
    pub description: String,
    /// Position in generation order
    pub sequence: usize,
    /// Subtasks that must complete first; all precede this one in generation order
    pub dependencies: Vec<Uuid>,
    /// Agents must have this capability
    pub required_capability: Capability,
    /// Current status
    pub status: SubtaskStatus,
    /// Agent currently (or last) executing this subtask
    pub assigned_agent_id: Option<Uuid>,
    /// Rough execution estimate in seconds
    pub estimated_duration_secs: u32,
    /// Copied from the parent; lower is more urgent
    pub priority: i32,
    /// Creation time of the parent, first tie-break after priority
    pub parent_created_at: DateTime<Utc>,
    /// Output reported by the agent
    pub result: Option<serde_json::Value>,
    /// Failure reported by the agent
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl Subtask {
    /// Mark as dispatched to an agent.
    pub fn start(&mut self, agent_id: Uuid) -> DomainResult<()> {
        self.expect_status(SubtaskStatus::Pending, SubtaskStatus::Running)?;
        let now = Utc::now();
        self.status = SubtaskStatus::Running;
        self.assigned_agent_id = Some(agent_id);
        self.started_at = Some(now);
        self.updated_at = now;
        Ok(())
    }

    pub fn complete(&mut self, result: Option<serde_json::Value>) -> DomainResult<()> {
        self.expect_status(SubtaskStatus::Running, SubtaskStatus::Completed)?;
        let now = Utc::now();
        self.status = SubtaskStatus::Completed;
        self.result = result;
        self.completed_at = Some(now);
        self.updated_at = now;
        Ok(())
    }

    pub fn fail(&mut self, message: impl Into<String>) -> DomainResult<()> {
        self.expect_status(SubtaskStatus::Running, SubtaskStatus::Failed)?;
        let now = Utc::now();
        self.status = SubtaskStatus::Failed;
        self.error_message = Some(message.into());
        self.completed_at = Some(now);
        self.updated_at = now;
        Ok(())
    }

    pub fn cancel(&mut self) -> DomainResult<()> {
        if self.status.is_terminal() {
            return Err(DomainError::transition("subtask", self.status, SubtaskStatus::Cancelled));
        }
        let now = Utc::now();
        self.status = SubtaskStatus::Cancelled;
        self.completed_at = Some(now);
        self.updated_at = now;
        Ok(())
    }

    /// Return a running subtask to the pending pool, e.g. when its agent stopped.
    pub fn requeue(&mut self) -> DomainResult<()> {
        self.expect_status(SubtaskStatus::Running, SubtaskStatus::Pending)?;
        self.clear_execution();
        Ok(())
    }

    /// Reset for a fresh attempt of the parent task, whatever the current status.
    pub fn reset(&mut self) {
        self.clear_execution();
        self.result = None;
    }

    /// Dispatch order: parent priority, parent age, stage, then id.
    pub fn schedule_key(&self) -> (i32, DateTime<Utc>, usize, Uuid) {
        (self.priority, self.parent_created_at, self.sequence, self.id)
    }

    /// Whether this subtask is running on the given agent.
    pub fn is_running_on(&self, agent_id: Uuid) -> bool {
        self.status == SubtaskStatus::Running && self.assigned_agent_id == Some(agent_id)
    }

    fn clear_execution(&mut self) {
        self.status = SubtaskStatus::Pending;
        self.assigned_agent_id = None;
        self.error_message = None;
        self.started_at = None;
        self.completed_at = None;
        self.updated_at = Utc::now();
    }

    fn expect_status(&self, expected: SubtaskStatus, target: SubtaskStatus) -> DomainResult<()> {
        if self.status == expected {
            Ok(())
        } else {
            Err(DomainError::transition("subtask", self.status, target))
        }
    }
}
