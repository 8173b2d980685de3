//! Properties of decomposed subtask graphs.

use std::collections::{HashMap, HashSet};

use faultline::domain::models::{SubtaskStatus, Task, TaskParameters, TaskType};
use faultline::services::{DependencyResolver, TaskDecomposer};
use proptest::prelude::*;
use proptest::test_runner::TestCaseError;
use uuid::Uuid;

fn task_type() -> impl Strategy<Value = TaskType> {
    prop::sample::select(TaskType::ALL.to_vec())
}

proptest! {
    /// Property: every decomposition is a valid DAG whose dependencies all
    /// precede their dependents, and the first stage is immediately ready.
    #[test]
    fn prop_decomposition_is_valid_dag(
        task_type in task_type(),
        include_report in any::<bool>(),
        priority in 0i32..10,
    ) {
        let parameters = TaskParameters { include_report, ..TaskParameters::default() };
        let task = Task::new(task_type, Uuid::new_v4())
            .with_priority(priority)
            .with_parameters(parameters);
        let subtasks = TaskDecomposer::new().decompose(&task);
        let resolver = DependencyResolver::new();

        prop_assert!(!subtasks.is_empty());
        resolver
            .validate_graph(&subtasks)
            .map_err(|e| TestCaseError::fail(e.to_string()))?;

        let ids: HashSet<Uuid> = subtasks.iter().map(|s| s.id).collect();
        prop_assert_eq!(ids.len(), subtasks.len());
        for subtask in &subtasks {
            prop_assert_eq!(subtask.parent_task_id, task.id);
            prop_assert_eq!(subtask.priority, priority);
            prop_assert_eq!(subtask.status, SubtaskStatus::Pending);
        }

        let ready = resolver.ready(&subtasks);
        prop_assert!(!ready.is_empty());
        prop_assert!(ready.iter().all(|s| s.dependencies.is_empty()));

        let has_report = subtasks.iter().any(|s| s.kind.as_str() == "REPORT_COMPILATION");
        prop_assert_eq!(has_report, include_report);
    }

    /// Property: topological order never places a subtask before one of its
    /// dependencies, and is stable across calls.
    #[test]
    fn prop_topological_order_respects_dependencies(
        task_type in task_type(),
        include_report in any::<bool>(),
    ) {
        let parameters = TaskParameters { include_report, ..TaskParameters::default() };
        let task = Task::new(task_type, Uuid::new_v4()).with_parameters(parameters);
        let subtasks = TaskDecomposer::new().decompose(&task);
        let resolver = DependencyResolver::new();

        let order = resolver
            .topological_sort(&subtasks)
            .map_err(|e| TestCaseError::fail(e.to_string()))?;
        prop_assert_eq!(order.len(), subtasks.len());

        let position: HashMap<Uuid, usize> = order.iter().enumerate().map(|(i, s)| (s.id, i)).collect();
        for subtask in &order {
            for dep in &subtask.dependencies {
                prop_assert!(position[dep] < position[&subtask.id]);
            }
        }

        let again = resolver
            .topological_sort(&subtasks)
            .map_err(|e| TestCaseError::fail(e.to_string()))?;
        let first: Vec<Uuid> = order.iter().map(|s| s.id).collect();
        let second: Vec<Uuid> = again.iter().map(|s| s.id).collect();
        prop_assert_eq!(first, second);
    }

    /// Property: the shape of a decomposition depends only on the task type
    /// and parameters.
    #[test]
    fn prop_same_inputs_same_shape(task_type in task_type(), include_report in any::<bool>()) {
        let parameters = TaskParameters { include_report, ..TaskParameters::default() };
        let decomposer = TaskDecomposer::new();
        let a = decomposer.decompose(&Task::new(task_type, Uuid::new_v4()).with_parameters(parameters.clone()));
        let b = decomposer.decompose(&Task::new(task_type, Uuid::new_v4()).with_parameters(parameters));

        let shape = |subtasks: &[faultline::Subtask]| -> Vec<_> {
            subtasks
                .iter()
                .map(|s| (s.kind, s.required_capability, s.sequence, s.dependencies.len()))
                .collect()
        };
        prop_assert_eq!(shape(&a), shape(&b));
    }
}
