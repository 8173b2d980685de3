//! `faultline decompose`: preview a task type's subtask graph.

use anyhow::Result;
use serde::Serialize;

use crate::cli::output::{output, table, truncate, CommandOutput};
use crate::cli::types::DecomposeArgs;
use crate::domain::models::{TaskParameters, TaskType};
use crate::services::{StageTemplate, TaskDecomposer};

#[derive(Debug, Serialize)]
pub struct DecomposeOutput {
    pub task_type: TaskType,
    pub stages: Vec<StageTemplate>,
    pub total_estimated_secs: u32,
}

impl CommandOutput for DecomposeOutput {
    fn to_human(&self) -> String {
        let mut t = table(&["#", "Stage", "Capability", "Est. (s)", "After", "Description"]);
        for (index, stage) in self.stages.iter().enumerate() {
            let after = stage
                .depends_on
                .iter()
                .map(ToString::to_string)
                .collect::<Vec<_>>()
                .join(",");
            t.add_row(vec![
                index.to_string(),
                stage.kind.to_string(),
                stage.capability.to_string(),
                stage.estimated_duration_secs.to_string(),
                if after.is_empty() { "-".to_string() } else { after },
                truncate(&stage.description, 48),
            ]);
        }
        format!(
            "{} decomposes into {} stages (~{}s sequential)\n{t}",
            self.task_type,
            self.stages.len(),
            self.total_estimated_secs
        )
    }
}

pub fn plan(decomposer: &TaskDecomposer, args: &DecomposeArgs) -> DecomposeOutput {
    let parameters = TaskParameters {
        include_report: args.include_report,
        ..TaskParameters::default()
    };
    let stages = decomposer.plan(args.task_type, &parameters);
    DecomposeOutput {
        task_type: args.task_type,
        total_estimated_secs: stages.iter().map(|s| s.estimated_duration_secs).sum(),
        stages,
    }
}

pub fn execute(args: &DecomposeArgs, json_mode: bool) -> Result<()> {
    output(&plan(&TaskDecomposer::new(), args), json_mode);
    Ok(())
}
