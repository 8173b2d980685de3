//! Task decomposition.
//!
//! Maps a task's type to a template of pipeline stages. Templates are held in
//! a registration table keyed by [`TaskType`]; types without an entry use the
//! generic prepare, analyze, organize pipeline.

use chrono::Utc;
use serde::Serialize;
use std::collections::{BTreeSet, HashMap};
use uuid::Uuid;

use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::{Capability, Subtask, SubtaskKind, SubtaskStatus, Task, TaskParameters, TaskType};

/// One stage of a decomposition template.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StageTemplate {
    pub kind: SubtaskKind,
    pub name: String,
    pub description: String,
    pub capability: Capability,
    pub estimated_duration_secs: u32,
    /// Indices of earlier stages in the same template
    pub depends_on: Vec<usize>,
}

impl StageTemplate {
    pub fn new(kind: SubtaskKind, capability: Capability, estimated_duration_secs: u32) -> Self {
        Self {
            kind,
            name: kind.as_str().to_string(),
            description: String::new(),
            capability,
            estimated_duration_secs,
            depends_on: Vec::new(),
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn after(mut self, stage: usize) -> Self {
        self.depends_on.push(stage);
        self
    }
}

/// Ordered stages of a task type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DecompositionTemplate {
    pub stages: Vec<StageTemplate>,
}

impl DecompositionTemplate {
    /// Build a chain where every stage depends on its predecessor.
    pub fn chain(stages: impl IntoIterator<Item = StageTemplate>) -> Self {
        let stages = stages
            .into_iter()
            .enumerate()
            .map(|(i, stage)| if i == 0 { stage } else { stage.after(i - 1) })
            .collect();
        Self { stages }
    }

    /// Edges may only point at earlier stages.
    pub fn validate(&self) -> DomainResult<()> {
        if self.stages.is_empty() {
            return Err(DomainError::ValidationFailed("Template has no stages".to_string()));
        }
        for (index, stage) in self.stages.iter().enumerate() {
            if let Some(bad) = stage.depends_on.iter().find(|&&dep| dep >= index) {
                return Err(DomainError::ValidationFailed(format!(
                    "Stage {index} ({}) depends on stage {bad}, which does not precede it",
                    stage.kind
                )));
            }
        }
        Ok(())
    }
}

/// Expands tasks into dependency-ordered subtask graphs.
#[derive(Debug, Clone)]
pub struct TaskDecomposer {
    templates: HashMap<TaskType, DecompositionTemplate>,
    fallback: DecompositionTemplate,
}

impl Default for TaskDecomposer {
    fn default() -> Self {
        Self::new()
    }
}

impl TaskDecomposer {
    /// A decomposer with the built-in templates registered.
    pub fn new() -> Self {
        let mut decomposer = Self::empty();
        for (task_type, template) in builtin_templates() {
            decomposer.templates.insert(task_type, template);
        }
        decomposer
    }

    /// A decomposer where every type uses the generic pipeline.
    pub fn empty() -> Self {
        Self {
            templates: HashMap::new(),
            fallback: generic_template(),
        }
    }

    /// Add or replace the template for a task type.
    pub fn register(&mut self, task_type: TaskType, template: DecompositionTemplate) -> DomainResult<()> {
        template.validate()?;
        self.templates.insert(task_type, template);
        Ok(())
    }

    pub fn is_registered(&self, task_type: TaskType) -> bool {
        self.templates.contains_key(&task_type)
    }

    /// Stages for a task type and parameters, without allocating subtasks.
    pub fn plan(&self, task_type: TaskType, parameters: &TaskParameters) -> Vec<StageTemplate> {
        let mut stages = self
            .templates
            .get(&task_type)
            .unwrap_or(&self.fallback)
            .stages
            .clone();

        if parameters.include_report {
            let last = stages.len() - 1;
            stages.push(
                StageTemplate::new(SubtaskKind::ReportCompilation, Capability::ReportGeneration, 30)
                    .with_description("Compile the findings into a report")
                    .after(last),
            );
        }
        stages
    }

    /// Expand a task into fresh subtasks. Same type and parameters always give
    /// the same shape; only the ids differ between calls.
    pub fn decompose(&self, task: &Task) -> Vec<Subtask> {
        let now = Utc::now();
        let stages = self.plan(task.task_type, &task.parameters);
        let ids: Vec<Uuid> = stages.iter().map(|_| Uuid::new_v4()).collect();

        let subtasks: Vec<Subtask> = stages
            .into_iter()
            .enumerate()
            .map(|(sequence, stage)| Subtask {
                id: ids[sequence],
                parent_task_id: task.id,
                kind: stage.kind,
                name: stage.name,
                description: stage.description,
                sequence,
                dependencies: stage.depends_on.iter().map(|&i| ids[i]).collect(),
                required_capability: stage.capability,
                status: SubtaskStatus::Pending,
                assigned_agent_id: None,
                estimated_duration_secs: stage.estimated_duration_secs,
                priority: task.priority,
                parent_created_at: task.created_at,
                result: None,
                error_message: None,
                created_at: now,
                updated_at: now,
                started_at: None,
                completed_at: None,
            })
            .collect();

        tracing::debug!(
            task_id = %task.id,
            task_type = %task.task_type,
            subtasks = subtasks.len(),
            "Task decomposed"
        );
        subtasks
    }

    /// Every capability some registered template (or the fallback) can require.
    pub fn required_capabilities(&self) -> BTreeSet<Capability> {
        let mut capabilities: BTreeSet<Capability> = self
            .templates
            .values()
            .chain(std::iter::once(&self.fallback))
            .flat_map(|t| t.stages.iter().map(|s| s.capability))
            .collect();
        capabilities.insert(Capability::ReportGeneration);
        capabilities
    }
}

fn generic_template() -> DecompositionTemplate {
    DecompositionTemplate::chain([
        StageTemplate::new(SubtaskKind::DataPreparation, Capability::DataProcessing, 30)
            .with_description("Prepare and clean the input data"),
        StageTemplate::new(SubtaskKind::CoreAnalysis, Capability::GeneralAnalysis, 60)
            .with_description("Run the core analysis"),
        StageTemplate::new(SubtaskKind::ResultOrganization, Capability::ResultProcessing, 20)
            .with_description("Organize and summarize the results"),
    ])
}

fn builtin_templates() -> Vec<(TaskType, DecompositionTemplate)> {
    vec![
        (
            TaskType::ImageAnalysis,
            DecompositionTemplate::chain([
                StageTemplate::new(SubtaskKind::ImagePreprocessing, Capability::ImageProcessing, 30)
                    .with_description("Denoise, normalize and crop the images"),
                StageTemplate::new(SubtaskKind::FeatureExtraction, Capability::ImageAnalysis, 60)
                    .with_description("Extract visual features"),
                StageTemplate::new(SubtaskKind::PatternRecognition, Capability::PatternRecognition, 45)
                    .with_description("Recognize defect patterns"),
                StageTemplate::new(SubtaskKind::ResultValidation, Capability::Validation, 20)
                    .with_description("Validate the recognition results"),
            ]),
        ),
        (
            TaskType::DocumentAnalysis,
            DecompositionTemplate::chain([
                StageTemplate::new(SubtaskKind::DocumentParsing, Capability::DocumentProcessing, 25)
                    .with_description("Parse document structure"),
                StageTemplate::new(SubtaskKind::InformationExtraction, Capability::NlpProcessing, 40)
                    .with_description("Extract entities and facts"),
                StageTemplate::new(SubtaskKind::SemanticAnalysis, Capability::SemanticAnalysis, 50)
                    .with_description("Analyze meaning and relations"),
            ]),
        ),
        (
            TaskType::MultiModalFusion,
            DecompositionTemplate::chain([
                StageTemplate::new(SubtaskKind::DataFusion, Capability::DataFusion, 60)
                    .with_description("Align and fuse the input modalities"),
                StageTemplate::new(SubtaskKind::JointAnalysis, Capability::MultimodalAnalysis, 90)
                    .with_description("Analyze the fused data jointly"),
                StageTemplate::new(SubtaskKind::ComprehensiveEvaluation, Capability::Evaluation, 30)
                    .with_description("Evaluate the combined findings"),
            ]),
        ),
        (
            TaskType::FailureAnalysis,
            DecompositionTemplate::chain([
                StageTemplate::new(SubtaskKind::PreliminaryAnalysis, Capability::FailureAnalysis, 45)
                    .with_description("Characterize the failure"),
                StageTemplate::new(SubtaskKind::DeepAnalysis, Capability::DeepAnalysis, 120)
                    .with_description("Investigate failure mechanisms"),
                StageTemplate::new(SubtaskKind::RootCauseAnalysis, Capability::RootCauseAnalysis, 80)
                    .with_description("Identify the root cause"),
                StageTemplate::new(SubtaskKind::ImprovementSuggestions, Capability::ExperienceBased, 40)
                    .with_description("Suggest corrective actions from past cases"),
            ]),
        ),
    ]
}
