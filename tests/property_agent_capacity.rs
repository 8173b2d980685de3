//! Property: concurrent assignment never exceeds an agent's capacity.

mod common;

use std::sync::Arc;

use common::agent_registry;
use faultline::domain::models::{AgentStatus, Capability};
use faultline::DomainError;
use proptest::prelude::*;
use uuid::Uuid;

fn runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_multi_thread()
        .worker_threads(4)
        .enable_all()
        .build()
        .expect("tokio runtime")
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    /// Property: exactly `min(capacity, attempts)` concurrent assignments
    /// succeed and the rest are refused as unavailable.
    #[test]
    fn prop_concurrent_assign_respects_capacity(
        capacity in 1usize..6,
        attempts in 1usize..24,
    ) {
        let (accepted, refused, load, status) = runtime().block_on(async {
            let agents = agent_registry();
            let agent = agents.register(Capability::DataAnalysis, Some(capacity)).await.unwrap();
            agents.start(agent.id).await.unwrap();

            let handles: Vec<_> = (0..attempts)
                .map(|_| {
                    let agents = Arc::clone(&agents);
                    tokio::spawn(async move { agents.assign_task(agent.id, Uuid::new_v4()).await })
                })
                .collect();

            let mut accepted = 0;
            let mut refused = 0;
            for result in futures::future::join_all(handles).await {
                match result.unwrap() {
                    Ok(_) => accepted += 1,
                    Err(DomainError::AgentUnavailable { .. }) => refused += 1,
                    Err(other) => panic!("unexpected error {other}"),
                }
            }
            let agent = agents.get(agent.id).await.unwrap();
            (accepted, refused, agent.load(), agent.status)
        });

        prop_assert_eq!(accepted, capacity.min(attempts));
        prop_assert_eq!(refused, attempts - accepted);
        prop_assert_eq!(load, accepted);
        prop_assert_eq!(status, AgentStatus::Busy);
    }

    /// Property: any interleaving of completions and releases brings the
    /// agent back to IDLE with consistent counters.
    #[test]
    fn prop_outcomes_return_agent_to_idle(
        outcomes in prop::collection::vec(prop::option::of(any::<bool>()), 1..5),
    ) {
        let capacity = outcomes.len();
        let agent = runtime().block_on(async {
            let agents = agent_registry();
            let agent = agents.register(Capability::DataAnalysis, Some(capacity)).await.unwrap();
            agents.start(agent.id).await.unwrap();

            let mut held = Vec::new();
            for _ in 0..capacity {
                let subtask_id = Uuid::new_v4();
                agents.assign_task(agent.id, subtask_id).await.unwrap();
                held.push(subtask_id);
            }
            for (subtask_id, outcome) in held.into_iter().zip(&outcomes) {
                match outcome {
                    Some(success) => {
                        agents.complete_task(agent.id, subtask_id, *success, 1.0).await.unwrap();
                    }
                    None => {
                        assert!(agents.release_task(agent.id, subtask_id).await.unwrap());
                    }
                }
            }
            agents.get(agent.id).await.unwrap()
        });

        let finished = outcomes.iter().filter(|o| o.is_some()).count() as u64;
        let failed = outcomes.iter().filter(|o| **o == Some(false)).count() as u64;
        prop_assert_eq!(agent.load(), 0);
        prop_assert_eq!(agent.status, AgentStatus::Idle);
        prop_assert_eq!(agent.total_tasks, finished);
        prop_assert_eq!(agent.failed_tasks, failed);
        prop_assert_eq!(agent.success_tasks + agent.failed_tasks, agent.total_tasks);
    }
}
