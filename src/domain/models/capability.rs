//! Capability tags matching subtask requirements to agent types.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::domain::errors::DomainError;

/// What kind of work an agent can perform.
///
/// An agent has exactly one capability; a subtask requires exactly one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Capability {
    // Fleet agent types
    VisionAnalysis,
    DocumentProcessing,
    DataAnalysis,
    ModelTraining,
    QualityInspection,
    FailureAnalysis,
    ReportGeneration,
    Coordination,
    Monitoring,

    // Stage specialists
    ImageProcessing,
    ImageAnalysis,
    PatternRecognition,
    Validation,
    NlpProcessing,
    SemanticAnalysis,
    DataFusion,
    MultimodalAnalysis,
    Evaluation,
    DeepAnalysis,
    RootCauseAnalysis,
    ExperienceBased,
    DataProcessing,
    GeneralAnalysis,
    ResultProcessing,
}

impl Capability {
    pub const ALL: [Capability; 24] = [
        Self::VisionAnalysis,
        Self::DocumentProcessing,
        Self::DataAnalysis,
        Self::ModelTraining,
        Self::QualityInspection,
        Self::FailureAnalysis,
        Self::ReportGeneration,
        Self::Coordination,
        Self::Monitoring,
        Self::ImageProcessing,
        Self::ImageAnalysis,
        Self::PatternRecognition,
        Self::Validation,
        Self::NlpProcessing,
        Self::SemanticAnalysis,
        Self::DataFusion,
        Self::MultimodalAnalysis,
        Self::Evaluation,
        Self::DeepAnalysis,
        Self::RootCauseAnalysis,
        Self::ExperienceBased,
        Self::DataProcessing,
        Self::GeneralAnalysis,
        Self::ResultProcessing,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::VisionAnalysis => "VISION_ANALYSIS",
            Self::DocumentProcessing => "DOCUMENT_PROCESSING",
            Self::DataAnalysis => "DATA_ANALYSIS",
            Self::ModelTraining => "MODEL_TRAINING",
            Self::QualityInspection => "QUALITY_INSPECTION",
            Self::FailureAnalysis => "FAILURE_ANALYSIS",
            Self::ReportGeneration => "REPORT_GENERATION",
            Self::Coordination => "COORDINATION",
            Self::Monitoring => "MONITORING",
            Self::ImageProcessing => "IMAGE_PROCESSING",
            Self::ImageAnalysis => "IMAGE_ANALYSIS",
            Self::PatternRecognition => "PATTERN_RECOGNITION",
            Self::Validation => "VALIDATION",
            Self::NlpProcessing => "NLP_PROCESSING",
            Self::SemanticAnalysis => "SEMANTIC_ANALYSIS",
            Self::DataFusion => "DATA_FUSION",
            Self::MultimodalAnalysis => "MULTIMODAL_ANALYSIS",
            Self::Evaluation => "EVALUATION",
            Self::DeepAnalysis => "DEEP_ANALYSIS",
            Self::RootCauseAnalysis => "ROOT_CAUSE_ANALYSIS",
            Self::ExperienceBased => "EXPERIENCE_BASED",
            Self::DataProcessing => "DATA_PROCESSING",
            Self::GeneralAnalysis => "GENERAL_ANALYSIS",
            Self::ResultProcessing => "RESULT_PROCESSING",
        }
    }
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Capability {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_uppercase().replace('-', "_");
        Self::ALL
            .into_iter()
            .find(|c| c.as_str() == normalized)
            .ok_or_else(|| DomainError::ValidationFailed(format!("Invalid capability: {s}")))
    }
}
