use std::collections::{BTreeMap, HashMap, HashSet};
use uuid::Uuid;

use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::{Subtask, SubtaskStatus};

/// Validates subtask graphs and answers readiness questions over them
#[derive(Debug, Clone, Default)]
pub struct DependencyResolver;

// Standalone helper for cycle detection (no self needed)
fn detect_cycle_util(
    node: Uuid,
    graph: &HashMap<Uuid, Vec<Uuid>>,
    visited: &mut HashSet<Uuid>,
    rec_stack: &mut HashSet<Uuid>,
    path: &mut Vec<Uuid>,
) -> bool {
    visited.insert(node);
    rec_stack.insert(node);
    path.push(node);

    if let Some(neighbors) = graph.get(&node) {
        for &neighbor in neighbors {
            if !visited.contains(&neighbor) {
                if detect_cycle_util(neighbor, graph, visited, rec_stack, path) {
                    return true;
                }
            } else if rec_stack.contains(&neighbor) {
                if let Some(cycle_start) = path.iter().position(|&id| id == neighbor) {
                    path.drain(0..cycle_start);
                    return true;
                }
            }
        }
    }

    rec_stack.remove(&node);
    path.pop();
    false
}

impl DependencyResolver {
    pub fn new() -> Self {
        Self
    }

    /// Every dependency must name another subtask of the same set.
    pub fn validate_dependencies(&self, subtasks: &[Subtask]) -> DomainResult<()> {
        let ids: HashSet<Uuid> = subtasks.iter().map(|s| s.id).collect();
        for subtask in subtasks {
            for dep_id in &subtask.dependencies {
                if *dep_id == subtask.id {
                    return Err(DomainError::ValidationFailed(format!(
                        "Subtask {} depends on itself",
                        subtask.id
                    )));
                }
                if !ids.contains(dep_id) {
                    return Err(DomainError::ValidationFailed(format!(
                        "Dependency {dep_id} of subtask {} not found",
                        subtask.id
                    )));
                }
            }
        }
        Ok(())
    }

    /// Detect a dependency cycle. Returns the ids on the cycle.
    pub fn detect_cycle(&self, subtasks: &[Subtask]) -> Option<Vec<Uuid>> {
        let mut graph: HashMap<Uuid, Vec<Uuid>> = HashMap::new();
        for subtask in subtasks {
            graph
                .entry(subtask.id)
                .or_default()
                .extend(subtask.dependencies.iter().copied());
        }

        let mut visited = HashSet::new();
        let mut rec_stack = HashSet::new();
        let mut path = Vec::new();

        for subtask in subtasks {
            if !visited.contains(&subtask.id)
                && detect_cycle_util(subtask.id, &graph, &mut visited, &mut rec_stack, &mut path)
            {
                return Some(path);
            }
        }

        None
    }

    /// Validate a freshly decomposed graph: dependencies exist, there is no
    /// cycle, and every dependency precedes its dependent in generation order.
    pub fn validate_graph(&self, subtasks: &[Subtask]) -> DomainResult<()> {
        self.validate_dependencies(subtasks)?;
        if let Some(cycle) = self.detect_cycle(subtasks) {
            return Err(DomainError::ValidationFailed(format!(
                "Circular dependency detected: {cycle:?}"
            )));
        }
        let sequence: HashMap<Uuid, usize> = subtasks.iter().map(|s| (s.id, s.sequence)).collect();
        for subtask in subtasks {
            for dep_id in &subtask.dependencies {
                if sequence.get(dep_id).is_some_and(|&seq| seq >= subtask.sequence) {
                    return Err(DomainError::ValidationFailed(format!(
                        "Subtask {} depends on later subtask {dep_id}",
                        subtask.id
                    )));
                }
            }
        }
        Ok(())
    }

    /// Topological order, dependencies before dependents. Among subtasks
    /// that become available together, lower `sequence` comes first.
    pub fn topological_sort(&self, subtasks: &[Subtask]) -> DomainResult<Vec<Subtask>> {
        if let Some(cycle) = self.detect_cycle(subtasks) {
            return Err(DomainError::ValidationFailed(format!(
                "Circular dependency detected: {cycle:?}"
            )));
        }

        let mut by_id: HashMap<Uuid, &Subtask> = subtasks.iter().map(|s| (s.id, s)).collect();
        let mut in_degree: HashMap<Uuid, usize> = HashMap::new();
        let mut dependents: HashMap<Uuid, Vec<Uuid>> = HashMap::new();

        for subtask in subtasks {
            in_degree.entry(subtask.id).or_insert(0);
            for &dep_id in &subtask.dependencies {
                dependents.entry(dep_id).or_default().push(subtask.id);
                *in_degree.entry(subtask.id).or_insert(0) += 1;
            }
        }

        // Kahn's algorithm with a queue ordered by (sequence, id)
        let mut queue: BTreeMap<(usize, Uuid), Uuid> = subtasks
            .iter()
            .filter(|s| in_degree.get(&s.id) == Some(&0))
            .map(|s| ((s.sequence, s.id), s.id))
            .collect();

        let mut sorted = Vec::with_capacity(subtasks.len());
        while let Some((_, node_id)) = queue.pop_first() {
            if let Some(subtask) = by_id.remove(&node_id) {
                sorted.push(subtask.clone());
            }
            for neighbor in dependents.get(&node_id).into_iter().flatten() {
                if let Some(degree) = in_degree.get_mut(neighbor) {
                    *degree -= 1;
                    if *degree == 0 {
                        if let Some(next) = by_id.get(neighbor) {
                            queue.insert((next.sequence, next.id), next.id);
                        }
                    }
                }
            }
        }

        if sorted.len() != subtasks.len() {
            return Err(DomainError::ValidationFailed(
                "Topological sort failed: dependency outside the graph".to_string(),
            ));
        }

        Ok(sorted)
    }

    /// A subtask is ready iff it is PENDING and every dependency is COMPLETED.
    pub fn is_ready(&self, subtask: &Subtask, statuses: &HashMap<Uuid, SubtaskStatus>) -> bool {
        subtask.status == SubtaskStatus::Pending
            && subtask
                .dependencies
                .iter()
                .all(|dep| statuses.get(dep) == Some(&SubtaskStatus::Completed))
    }

    /// The ready members of one task's subtask set, in generation order.
    pub fn ready<'a>(&self, subtasks: &'a [Subtask]) -> Vec<&'a Subtask> {
        let statuses: HashMap<Uuid, SubtaskStatus> = subtasks.iter().map(|s| (s.id, s.status)).collect();
        let mut ready: Vec<&Subtask> = subtasks.iter().filter(|s| self.is_ready(s, &statuses)).collect();
        ready.sort_by_key(|s| s.sequence);
        ready
    }
}
