//! Reference agent worker.
//!
//! Consumes its mailbox, "executes" each assignment by sleeping for the
//! stage's estimated duration scaled by `time_scale`, reports the outcome to
//! the coordinator and sends periodic heartbeats. Cancellation notices abort
//! the matching execution.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{interval, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::domain::models::{
    AgentMetrics, Message, MessagePayload, SimulationConfig, StatusReport, SubtaskStatus,
    TaskAssignment, COORDINATOR_ID,
};
use crate::services::message_bus::{MessageBus, Received};

pub struct SimulatedAgent {
    agent_id: Uuid,
    bus: Arc<MessageBus>,
    config: SimulationConfig,
    in_flight: HashMap<Uuid, JoinHandle<()>>,
}

impl SimulatedAgent {
    pub fn new(agent_id: Uuid, bus: Arc<MessageBus>, config: SimulationConfig) -> Self {
        Self {
            agent_id,
            bus,
            config,
            in_flight: HashMap::new(),
        }
    }

    /// Run the worker on its own task until `cancel` fires or the mailbox
    /// is closed.
    pub fn spawn(self, cancel: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(self.run(cancel))
    }

    pub async fn run(mut self, cancel: CancellationToken) {
        let heartbeat_every = Duration::from_millis(self.config.heartbeat_interval_ms);
        let mut heartbeat = interval(heartbeat_every);
        heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);
        tracing::debug!(agent_id = %self.agent_id, "Simulated agent online");

        loop {
            self.in_flight.retain(|_, handle| !handle.is_finished());
            tokio::select! {
                biased;
                () = cancel.cancelled() => break,
                _ = heartbeat.tick() => self.send_heartbeat().await,
                received = self.bus.receive_with(self.agent_id, heartbeat_every, &cancel) => match received {
                    Received::Message(message) => self.handle(message),
                    Received::TimedOut => {}
                    Received::Cancelled | Received::Disconnected => break,
                },
            }
        }

        for (_, handle) in self.in_flight.drain() {
            handle.abort();
        }
        tracing::debug!(agent_id = %self.agent_id, "Simulated agent offline");
    }

    fn handle(&mut self, message: Message) {
        match message.payload {
            MessagePayload::TaskAssignment(assignment) => {
                let subtask_id = assignment.subtask_id;
                let handle = tokio::spawn(execute(
                    self.agent_id,
                    Arc::clone(&self.bus),
                    assignment,
                    self.config.clone(),
                ));
                self.in_flight.insert(subtask_id, handle);
            }
            MessagePayload::TaskStatus(report) if report.status == SubtaskStatus::Cancelled => {
                if let Some(handle) = self.in_flight.remove(&report.subtask_id) {
                    handle.abort();
                    tracing::debug!(agent_id = %self.agent_id, subtask_id = %report.subtask_id, "Execution aborted");
                }
            }
            other => {
                tracing::trace!(agent_id = %self.agent_id, kind = %other.message_type(), "Ignored");
            }
        }
    }

    async fn send_heartbeat(&self) {
        let running = self.in_flight.values().filter(|h| !h.is_finished()).count() as f64;
        let metrics = AgentMetrics::new((12.0 + 20.0 * running).min(100.0), (30.0 + 8.0 * running).min(100.0));
        if !self.bus.send(Message::heartbeat(self.agent_id, Some(metrics))).await {
            tracing::debug!(agent_id = %self.agent_id, "Heartbeat not delivered");
        }
    }
}

async fn execute(agent_id: Uuid, bus: Arc<MessageBus>, assignment: TaskAssignment, config: SimulationConfig) {
    let started = Instant::now();
    let scaled = f64::from(assignment.estimated_duration_secs) * config.time_scale;
    tokio::time::sleep(Duration::from_secs_f64(scaled.max(0.0))).await;

    let fails = draws_failure(assignment.subtask_id, config.failure_rate);
    let report = StatusReport {
        task_id: assignment.task_id,
        subtask_id: assignment.subtask_id,
        status: if fails {
            SubtaskStatus::Failed
        } else {
            SubtaskStatus::Completed
        },
        result: (!fails).then(|| {
            serde_json::json!({
                "stage": assignment.kind.as_str(),
                "agent_id": agent_id,
                "inputs": assignment.parameters.inputs,
            })
        }),
        error: fails.then(|| format!("{} aborted by simulated fault", assignment.kind)),
        elapsed_secs: started.elapsed().as_secs_f64(),
    };

    if !bus.send(Message::status(agent_id, COORDINATOR_ID, report)).await {
        tracing::warn!(agent_id = %agent_id, subtask_id = %assignment.subtask_id, "Status report not delivered");
    }
}

/// Failure draw from the (random) subtask id, so no extra RNG is needed.
fn draws_failure(subtask_id: Uuid, failure_rate: f64) -> bool {
    if failure_rate <= 0.0 {
        return false;
    }
    let sample = (subtask_id.as_u128() % 10_000) as f64 / 10_000.0;
    sample < failure_rate
}
