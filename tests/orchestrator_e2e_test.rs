//! End-to-end runs of the orchestrator with simulated agents.

mod common;

use std::sync::Arc;
use std::time::Duration;

use common::{fast_config, wait_until};
use faultline::application::{InMemoryOrchestrator, OrchestratorState};
use faultline::domain::models::{
    Capability, CreateTask, FleetEntry, SubtaskStatus, TaskParameters, TaskStatus, TaskType,
};
use uuid::Uuid;

#[tokio::test]
async fn test_every_task_type_completes() {
    common::setup_test_logging();
    let orchestrator = InMemoryOrchestrator::in_memory(fast_config());
    let agents = orchestrator.provision_default_fleet().await.unwrap();
    orchestrator.spawn_simulated_agents(&agents).await;
    orchestrator.start().await.unwrap();
    assert_eq!(orchestrator.state().await, OrchestratorState::Running);

    let creator = Uuid::new_v4();
    let mut submitted = Vec::new();
    for task_type in TaskType::ALL {
        let request = CreateTask::new(task_type, creator).with_parameters(TaskParameters {
            include_report: task_type == TaskType::FailureAnalysis,
            inputs: vec![format!("case-{}", task_type.as_str().to_lowercase())],
            ..TaskParameters::default()
        });
        submitted.push(orchestrator.submit(request).await.unwrap());
    }

    for task in &submitted {
        let done = orchestrator.wait_for(task.id, Duration::from_secs(10)).await.unwrap();
        assert_eq!(done.status, TaskStatus::Completed, "{} did not complete", task.task_type);
        assert_eq!(done.progress, 100);

        let subtasks = orchestrator.tasks().subtasks(task.id).await.unwrap();
        assert!(subtasks.iter().all(|s| s.status == SubtaskStatus::Completed));
        let result = done.result.expect("completed task carries results");
        for subtask in &subtasks {
            assert_eq!(result[subtask.kind.as_str()]["stage"], subtask.kind.as_str());
        }
    }

    let summary = orchestrator.summary().await;
    assert_eq!(summary.tasks_by_status.get("COMPLETED"), Some(&TaskType::ALL.len()));
    assert!(summary.bus.delivered > 0);
    orchestrator.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_configured_fleet_handles_parallel_tasks() {
    let mut config = fast_config();
    config.fleet = vec![
        FleetEntry {
            capability: Capability::DocumentProcessing,
            count: 2,
            max_concurrent_tasks: Some(2),
        },
        FleetEntry {
            capability: Capability::NlpProcessing,
            count: 1,
            max_concurrent_tasks: Some(4),
        },
        FleetEntry {
            capability: Capability::SemanticAnalysis,
            count: 1,
            max_concurrent_tasks: Some(4),
        },
    ];
    let orchestrator = InMemoryOrchestrator::in_memory(config);
    let agents = orchestrator.provision_fleet().await.unwrap();
    assert_eq!(agents.len(), 4);
    orchestrator.spawn_simulated_agents(&agents).await;
    orchestrator.start().await.unwrap();

    let mut ids = Vec::new();
    for _ in 0..6 {
        let task = orchestrator
            .submit(CreateTask::new(TaskType::DocumentAnalysis, Uuid::new_v4()))
            .await
            .unwrap();
        ids.push(task.id);
    }
    for id in ids {
        let task = orchestrator.wait_for(id, Duration::from_secs(10)).await.unwrap();
        assert_eq!(task.status, TaskStatus::Completed);
    }

    let mut completed = 0;
    for agent in &agents {
        let agent = orchestrator.agents().get(agent.id).await.unwrap();
        assert_eq!(agent.load(), 0);
        completed += agent.success_tasks;
    }
    assert_eq!(completed, 18);
    orchestrator.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_simulated_failures_fail_tasks() {
    let mut config = fast_config();
    config.simulation.failure_rate = 1.0;
    let orchestrator = InMemoryOrchestrator::in_memory(config);
    let agents = orchestrator.provision_default_fleet().await.unwrap();
    orchestrator.spawn_simulated_agents(&agents).await;
    orchestrator.start().await.unwrap();

    let task = orchestrator
        .submit(CreateTask::new(TaskType::ImageAnalysis, Uuid::new_v4()))
        .await
        .unwrap();
    let task = orchestrator.wait_for(task.id, Duration::from_secs(10)).await.unwrap();
    assert_eq!(task.status, TaskStatus::Failed);
    assert!(task
        .error_message
        .as_deref()
        .is_some_and(|m| m.contains("IMAGE_PREPROCESSING")));

    // Outstanding stages are withdrawn right after the task fails
    let task_id = task.id;
    assert!(
        wait_until(
            || {
                let tasks = Arc::clone(orchestrator.tasks());
                async move {
                    let subtasks = tasks.subtasks(task_id).await.unwrap();
                    subtasks[0].status == SubtaskStatus::Failed
                        && subtasks[1..].iter().all(|s| s.status == SubtaskStatus::Cancelled)
                }
            },
            Duration::from_secs(2),
        )
        .await
    );
    orchestrator.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_heartbeats_keep_fleet_healthy() {
    let mut config = fast_config();
    config.liveness.heartbeat_ttl_secs = 1;
    config.liveness.critical_ttl_secs = 5;
    let orchestrator = InMemoryOrchestrator::in_memory(config);
    let agents = orchestrator.provision_default_fleet().await.unwrap();
    orchestrator.spawn_simulated_agents(&agents).await;
    orchestrator.start().await.unwrap();

    let monitor = orchestrator.monitor().await.expect("monitor runs once started");
    assert!(
        wait_until(
            || {
                let monitor = monitor.clone();
                async move { monitor.status().await.total_sweeps >= 3 }
            },
            Duration::from_secs(5),
        )
        .await
    );

    let summary = orchestrator.summary().await;
    assert_eq!(summary.healthy_agents, agents.len());
    assert_eq!(monitor.status().await.total_downgrades, 0);
    orchestrator.shutdown().await.unwrap();
    assert!(!monitor.status().await.running);
}

#[tokio::test]
async fn test_shutdown_is_idempotent_and_final() {
    let orchestrator = InMemoryOrchestrator::in_memory(fast_config());
    orchestrator.start().await.unwrap();
    orchestrator.start().await.unwrap();

    orchestrator.shutdown().await.unwrap();
    assert_eq!(orchestrator.state().await, OrchestratorState::Stopped);
    assert!(orchestrator.bus().is_shut_down());
    assert!(orchestrator.start().await.is_err());
}
