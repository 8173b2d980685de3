//! `faultline run`: bring the fleet online and orchestrate until interrupted.

use anyhow::{Context, Result};
use serde::Serialize;
use std::fmt::Write as _;
use std::time::Duration;
use uuid::Uuid;

use crate::application::{FleetSummary, InMemoryOrchestrator};
use crate::cli::output::{output, short_id, table, truncate, CommandOutput};
use crate::cli::types::RunArgs;
use crate::domain::models::{Config, CreateTask, Task, TaskParameters, TaskStatus};

#[derive(Debug, Serialize)]
pub struct TaskOutcome {
    pub id: Uuid,
    pub task_type: String,
    pub status: TaskStatus,
    pub progress: u8,
    pub error: Option<String>,
}

impl From<&Task> for TaskOutcome {
    fn from(task: &Task) -> Self {
        Self {
            id: task.id,
            task_type: task.task_type.to_string(),
            status: task.status,
            progress: task.progress,
            error: task.error_message.clone(),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct RunOutput {
    pub interrupted: bool,
    pub tasks: Vec<TaskOutcome>,
    pub summary: FleetSummary,
}

impl CommandOutput for RunOutput {
    fn to_human(&self) -> String {
        let mut out = String::new();
        if self.interrupted {
            out.push_str("Interrupted\n");
        }
        if !self.tasks.is_empty() {
            let mut t = table(&["ID", "Type", "Status", "Progress", "Error"]);
            for task in &self.tasks {
                t.add_row(vec![
                    short_id(&task.id),
                    task.task_type.clone(),
                    task.status.to_string(),
                    format!("{}%", task.progress),
                    task.error.as_deref().map_or_else(|| "-".to_string(), |e| truncate(e, 60)),
                ]);
            }
            let _ = writeln!(out, "{t}");
        }
        let _ = writeln!(out, "Tasks:  {}", render_counts(&self.summary.tasks_by_status));
        let _ = writeln!(
            out,
            "Agents: {} ({} healthy)",
            render_counts(&self.summary.agents_by_status),
            self.summary.healthy_agents
        );
        let bus = &self.summary.bus;
        let _ = write!(
            out,
            "Bus:    {} delivered, {} failed, {} broadcasts",
            bus.delivered, bus.failed, bus.broadcasts
        );
        out
    }
}

fn render_counts(counts: &std::collections::BTreeMap<&'static str, usize>) -> String {
    if counts.is_empty() {
        return "none".to_string();
    }
    counts
        .iter()
        .map(|(status, n)| format!("{status}={n}"))
        .collect::<Vec<_>>()
        .join(" ")
}

pub async fn execute(args: RunArgs, config: Config, json_mode: bool) -> Result<()> {
    let orchestrator = InMemoryOrchestrator::in_memory(config);

    let mut fleet = orchestrator
        .provision_fleet()
        .await
        .context("Failed to provision fleet")?;
    if fleet.is_empty() && args.simulate {
        fleet = orchestrator
            .provision_default_fleet()
            .await
            .context("Failed to provision default fleet")?;
    }
    if fleet.is_empty() {
        tracing::warn!("No agents configured; submitted tasks will stay pending");
    }
    if args.simulate {
        orchestrator.spawn_simulated_agents(&fleet).await;
    }
    orchestrator.start().await?;

    let creator_id = Uuid::new_v4();
    let mut submitted = Vec::with_capacity(args.submit.len());
    for task_type in &args.submit {
        let mut request = CreateTask::new(*task_type, creator_id).with_parameters(TaskParameters {
            include_report: args.include_report,
            ..TaskParameters::default()
        });
        if let Some(priority) = args.priority {
            request = request.with_priority(priority);
        }
        let task = orchestrator
            .submit(request)
            .await
            .with_context(|| format!("Failed to submit {task_type} task"))?;
        tracing::info!(task_id = %task.id, task_type = %task.task_type, "Task submitted");
        submitted.push(task.id);
    }

    let interrupted = if submitted.is_empty() {
        tracing::info!(agents = fleet.len(), "Orchestrator running, press Ctrl-C to stop");
        tokio::signal::ctrl_c().await.context("Failed to listen for Ctrl-C")?;
        true
    } else {
        let timeout = Duration::from_secs(args.timeout_secs);
        tokio::select! {
            signal = tokio::signal::ctrl_c() => {
                signal.context("Failed to listen for Ctrl-C")?;
                true
            }
            () = wait_all(&orchestrator, &submitted, timeout) => false,
        }
    };

    let mut tasks = Vec::with_capacity(submitted.len());
    for task_id in &submitted {
        tasks.push(TaskOutcome::from(&orchestrator.tasks().get(*task_id).await?));
    }
    let summary = orchestrator.summary().await;
    orchestrator.shutdown().await?;

    output(
        &RunOutput {
            interrupted,
            tasks,
            summary,
        },
        json_mode,
    );
    Ok(())
}

async fn wait_all(orchestrator: &InMemoryOrchestrator, task_ids: &[Uuid], timeout: Duration) {
    let waits = task_ids.iter().map(|id| orchestrator.wait_for(*id, timeout));
    for (task_id, result) in task_ids.iter().zip(futures::future::join_all(waits).await) {
        if let Err(err) = result {
            tracing::warn!(task_id = %task_id, error = %err, "Lost track of task");
        }
    }
}
