//! Agent registry.
//!
//! Owns every [`Agent`] record and enforces its status/health table. Each
//! agent sits behind its own mutex; a mutation clones the record, applies the
//! model operation, persists the clone, and only then commits it, so a failed
//! step leaves no trace.

use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use uuid::Uuid;

use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::{
    Agent, AgentDefaults, AgentMetrics, AgentStatus, Capability, HealthStatus, LoadThresholds,
};
use crate::domain::ports::{AgentFilter, AgentRepository};

type AgentSlot = Arc<Mutex<Agent>>;

/// Registry of fleet agents.
pub struct AgentRegistry<R: AgentRepository> {
    repository: Arc<R>,
    agents: RwLock<HashMap<Uuid, AgentSlot>>,
    default_max_concurrent_tasks: usize,
    thresholds: LoadThresholds,
}

impl<R: AgentRepository> AgentRegistry<R> {
    pub fn new(repository: Arc<R>, defaults: &AgentDefaults) -> Self {
        Self {
            repository,
            agents: RwLock::new(HashMap::new()),
            default_max_concurrent_tasks: defaults.max_concurrent_tasks,
            thresholds: defaults.load_thresholds(),
        }
    }

    /// Create an agent in `STARTING`/`HEALTHY`.
    pub async fn register(&self, capability: Capability, max_concurrent_tasks: Option<usize>) -> DomainResult<Agent> {
        let cap = max_concurrent_tasks.unwrap_or(self.default_max_concurrent_tasks);
        if cap == 0 {
            return Err(DomainError::ValidationFailed(
                "max_concurrent_tasks must be at least 1".to_string(),
            ));
        }
        self.insert(Agent::new(capability, cap)).await
    }

    /// Register a pre-built agent record, e.g. one with a custom name.
    pub async fn insert(&self, agent: Agent) -> DomainResult<Agent> {
        if agent.max_concurrent_tasks == 0 {
            return Err(DomainError::ValidationFailed(
                "max_concurrent_tasks must be at least 1".to_string(),
            ));
        }
        self.repository.save(&agent).await?;
        self.agents
            .write()
            .await
            .insert(agent.id, Arc::new(Mutex::new(agent.clone())));

        tracing::info!(
            agent_id = %agent.id,
            capability = %agent.capability,
            max_concurrent_tasks = agent.max_concurrent_tasks,
            "Agent registered"
        );
        Ok(agent)
    }

    /// Provision `count` fresh agents. Every call adds new agents.
    pub async fn scale_agents(&self, capability: Capability, count: usize) -> DomainResult<Vec<Agent>> {
        let mut created = Vec::with_capacity(count);
        for _ in 0..count {
            created.push(self.register(capability, None).await?);
        }
        tracing::info!(capability = %capability, count, "Agents provisioned");
        Ok(created)
    }

    pub async fn get(&self, agent_id: Uuid) -> DomainResult<Agent> {
        let slot = self.slot(agent_id).await?;
        let agent = slot.lock().await.clone();
        Ok(agent)
    }

    /// Snapshot of all agents matching the filter, oldest first.
    pub async fn list(&self, filter: AgentFilter) -> Vec<Agent> {
        let mut agents = Vec::new();
        for slot in self.slots().await {
            let agent = slot.lock().await;
            if filter.matches(&agent) {
                agents.push(agent.clone());
            }
        }
        agents.sort_by_key(|a| (a.created_at, a.id));
        agents
    }

    /// Agents that could take a subtask needing `capability` right now, best
    /// candidate first: fewest running subtasks, then lowest average
    /// execution time, then id.
    pub async fn available_agents(&self, capability: Capability) -> Vec<Agent> {
        let filter = AgentFilter {
            capability: Some(capability),
            ..AgentFilter::default()
        };
        let mut agents: Vec<Agent> = self
            .list(filter)
            .await
            .into_iter()
            .filter(Agent::is_available)
            .collect();
        agents.sort_by(|a, b| {
            a.load()
                .cmp(&b.load())
                .then(a.avg_execution_secs.total_cmp(&b.avg_execution_secs))
                .then(a.id.cmp(&b.id))
        });
        agents
    }

    /// `STARTING | STOPPED | ERROR -> IDLE`.
    pub async fn start(&self, agent_id: Uuid) -> DomainResult<Agent> {
        let ((), agent) = self.mutate(agent_id, Agent::start).await?;
        tracing::info!(agent_id = %agent_id, "Agent started");
        Ok(agent)
    }

    /// Stop the agent. Returns the subtasks it was running so the caller can
    /// put them back in the pending pool.
    pub async fn stop(&self, agent_id: Uuid) -> DomainResult<Vec<Uuid>> {
        let (drained, _) = self.mutate(agent_id, Agent::stop).await?;
        tracing::info!(agent_id = %agent_id, drained = drained.len(), "Agent stopped");
        Ok(drained)
    }

    /// Stop (unless already stopped) and start again.
    pub async fn restart(&self, agent_id: Uuid) -> DomainResult<Vec<Uuid>> {
        let (drained, _) = self
            .mutate(agent_id, |agent| {
                let drained = if agent.status == AgentStatus::Stopped {
                    Vec::new()
                } else {
                    agent.stop()?
                };
                agent.start()?;
                Ok(drained)
            })
            .await?;
        tracing::info!(agent_id = %agent_id, drained = drained.len(), "Agent restarted");
        Ok(drained)
    }

    /// Put the agent in `ERROR`/`ERROR`. Returns the subtasks it was running.
    pub async fn fault(&self, agent_id: Uuid, reason: &str) -> DomainResult<Vec<Uuid>> {
        let (drained, _) = self.mutate(agent_id, Agent::fault).await?;
        tracing::warn!(agent_id = %agent_id, reason, drained = drained.len(), "Agent faulted");
        Ok(drained)
    }

    pub async fn enter_maintenance(&self, agent_id: Uuid) -> DomainResult<Agent> {
        let ((), agent) = self.mutate(agent_id, Agent::enter_maintenance).await?;
        tracing::info!(agent_id = %agent_id, "Agent entered maintenance");
        Ok(agent)
    }

    pub async fn exit_maintenance(&self, agent_id: Uuid) -> DomainResult<Agent> {
        let ((), agent) = self.mutate(agent_id, Agent::exit_maintenance).await?;
        tracing::info!(agent_id = %agent_id, "Agent left maintenance");
        Ok(agent)
    }

    /// Remove the agent. Returns the subtasks it was running.
    pub async fn deregister(&self, agent_id: Uuid) -> DomainResult<Vec<Uuid>> {
        let slot = self.slot(agent_id).await?;
        let mut agent = slot.lock().await;
        self.repository.delete(agent_id).await?;
        self.agents.write().await.remove(&agent_id);
        let drained: Vec<Uuid> = std::mem::take(&mut agent.current_task_ids).into_iter().collect();
        agent.status = AgentStatus::Stopped;
        agent.health = HealthStatus::Stopped;
        tracing::info!(agent_id = %agent_id, drained = drained.len(), "Agent deregistered");
        Ok(drained)
    }

    /// Record a heartbeat now. Returns the resulting health.
    pub async fn heartbeat(&self, agent_id: Uuid, metrics: Option<AgentMetrics>) -> DomainResult<HealthStatus> {
        let thresholds = self.thresholds;
        let now = Utc::now();
        let ((), agent) = self
            .mutate(agent_id, |agent| agent.heartbeat(metrics, &thresholds, now))
            .await?;
        tracing::trace!(agent_id = %agent_id, health = %agent.health, "Heartbeat");
        Ok(agent.health)
    }

    /// Assign a subtask with no side effect beyond the registry.
    pub async fn assign_task(&self, agent_id: Uuid, subtask_id: Uuid) -> DomainResult<Agent> {
        self.assign_task_with(agent_id, subtask_id, |_| async { Ok(()) }).await
    }

    /// Assign a subtask and run `dispatch` while the agent is still locked.
    ///
    /// The assignment is committed only if `dispatch` succeeds; otherwise the
    /// agent is left exactly as it was and the dispatch error is returned.
    pub async fn assign_task_with<F, Fut>(&self, agent_id: Uuid, subtask_id: Uuid, dispatch: F) -> DomainResult<Agent>
    where
        F: FnOnce(Agent) -> Fut + Send,
        Fut: Future<Output = DomainResult<()>> + Send,
    {
        let slot = self.slot(agent_id).await?;
        let mut guard = slot.lock().await;

        let mut candidate = guard.clone();
        candidate.assign(subtask_id)?;
        self.repository.update(&candidate).await?;

        if let Err(err) = dispatch(candidate.clone()).await {
            if let Err(restore_err) = self.repository.update(&guard).await {
                tracing::error!(agent_id = %agent_id, error = %restore_err, "Failed to restore agent after aborted assignment");
            }
            return Err(err);
        }

        *guard = candidate;
        guard.debug_check_invariants();
        tracing::debug!(
            agent_id = %agent_id,
            subtask_id = %subtask_id,
            load = guard.load(),
            "Subtask assigned"
        );
        Ok(guard.clone())
    }

    /// Record the outcome of a subtask the agent was running.
    pub async fn complete_task(
        &self,
        agent_id: Uuid,
        subtask_id: Uuid,
        success: bool,
        elapsed_secs: f64,
    ) -> DomainResult<Agent> {
        let ((), agent) = self
            .mutate(agent_id, |agent| agent.complete(subtask_id, success, elapsed_secs))
            .await?;
        tracing::debug!(
            agent_id = %agent_id,
            subtask_id = %subtask_id,
            success,
            health = %agent.health,
            "Subtask finished on agent"
        );
        Ok(agent)
    }

    /// Free a slot without recording an outcome (cancelled subtask). Returns
    /// whether the agent was holding it.
    pub async fn release_task(&self, agent_id: Uuid, subtask_id: Uuid) -> DomainResult<bool> {
        let (held, _) = self
            .mutate(agent_id, |agent| Ok(agent.release(subtask_id)))
            .await?;
        Ok(held)
    }

    /// Downgrade agents whose heartbeat is older than `ttl` (UNKNOWN) or
    /// `critical_ttl` (CRITICAL). Status is never touched. Returns the agents
    /// whose health changed.
    pub async fn sweep_liveness(
        &self,
        now: DateTime<Utc>,
        ttl: Duration,
        critical_ttl: Duration,
    ) -> DomainResult<Vec<(Uuid, HealthStatus)>> {
        let mut changed = Vec::new();
        for slot in self.slots().await {
            let mut guard = slot.lock().await;
            let mut candidate = guard.clone();
            if let Some(health) = candidate.sweep(now, ttl, critical_ttl) {
                self.repository.update(&candidate).await?;
                *guard = candidate;
                tracing::warn!(agent_id = %guard.id, health = %health, "Agent heartbeat overdue");
                changed.push((guard.id, health));
            }
        }
        Ok(changed)
    }

    async fn slot(&self, agent_id: Uuid) -> DomainResult<AgentSlot> {
        self.agents
            .read()
            .await
            .get(&agent_id)
            .cloned()
            .ok_or(DomainError::AgentNotFound(agent_id))
    }

    async fn slots(&self) -> Vec<AgentSlot> {
        self.agents.read().await.values().cloned().collect()
    }

    /// Lock, apply `op` to a copy, persist, commit.
    async fn mutate<T>(
        &self,
        agent_id: Uuid,
        op: impl FnOnce(&mut Agent) -> DomainResult<T> + Send,
    ) -> DomainResult<(T, Agent)> {
        let slot = self.slot(agent_id).await?;
        let mut guard = slot.lock().await;
        let mut candidate = guard.clone();
        let out = op(&mut candidate)?;
        self.repository.update(&candidate).await?;
        *guard = candidate;
        guard.debug_check_invariants();
        Ok((out, guard.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::memory::InMemoryAgentRepository;

    fn registry() -> AgentRegistry<InMemoryAgentRepository> {
        AgentRegistry::new(Arc::new(InMemoryAgentRepository::new()), &AgentDefaults::default())
    }

    async fn running(registry: &AgentRegistry<InMemoryAgentRepository>, cap: usize) -> Uuid {
        let agent = registry.register(Capability::DeepAnalysis, Some(cap)).await.unwrap();
        registry.start(agent.id).await.unwrap();
        agent.id
    }

    #[tokio::test]
    async fn test_capacity_scenario() {
        let registry = registry();
        let id = running(&registry, 2).await;
        let (a, b, c) = (Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4());

        registry.assign_task(id, a).await.unwrap();
        registry.assign_task(id, b).await.unwrap();
        let err = registry.assign_task(id, c).await.unwrap_err();
        assert!(matches!(err, DomainError::AgentUnavailable { .. }));
        assert!(err.is_backpressure());

        registry.complete_task(id, a, true, 1.0).await.unwrap();
        let agent = registry.assign_task(id, c).await.unwrap();
        assert_eq!(agent.load(), 2);
        assert_eq!(agent.status, AgentStatus::Busy);
    }

    #[tokio::test]
    async fn test_failed_dispatch_rolls_back() {
        let registry = registry();
        let id = running(&registry, 1).await;
        let subtask = Uuid::new_v4();

        let err = registry
            .assign_task_with(id, subtask, |_| async move { Err(DomainError::MessageUndeliverable(id)) })
            .await
            .unwrap_err();
        assert!(matches!(err, DomainError::MessageUndeliverable(_)));

        let agent = registry.get(id).await.unwrap();
        assert_eq!(agent.status, AgentStatus::Idle);
        assert!(agent.current_task_ids.is_empty());
        let stored = registry.repository.find_by_id(id).await.unwrap().unwrap();
        assert!(stored.current_task_ids.is_empty());
    }

    #[tokio::test]
    async fn test_unknown_agent() {
        let registry = registry();
        let missing = Uuid::new_v4();
        assert!(registry.get(missing).await.unwrap_err().is_not_found());
        assert!(registry.assign_task(missing, Uuid::new_v4()).await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn test_register_rejects_zero_capacity() {
        let registry = registry();
        assert!(matches!(
            registry.register(Capability::Validation, Some(0)).await,
            Err(DomainError::ValidationFailed(_))
        ));
    }

    #[tokio::test]
    async fn test_scale_is_not_idempotent() {
        let registry = registry();
        registry.scale_agents(Capability::Validation, 2).await.unwrap();
        registry.scale_agents(Capability::Validation, 2).await.unwrap();
        let agents = registry.list(AgentFilter::default()).await;
        assert_eq!(agents.len(), 4);
        assert!(agents.iter().all(|a| a.status == AgentStatus::Starting));
    }

    #[tokio::test]
    async fn test_available_agents_ordering() {
        let registry = registry();
        let busy = running(&registry, 3).await;
        let idle = running(&registry, 3).await;
        let stopped = running(&registry, 3).await;
        registry.assign_task(busy, Uuid::new_v4()).await.unwrap();
        registry.stop(stopped).await.unwrap();

        let ids: Vec<Uuid> = registry
            .available_agents(Capability::DeepAnalysis)
            .await
            .iter()
            .map(|a| a.id)
            .collect();
        assert_eq!(ids, vec![idle, busy]);
        assert!(registry.available_agents(Capability::Validation).await.is_empty());
    }

    #[tokio::test]
    async fn test_stop_returns_inflight_and_restart() {
        let registry = registry();
        let id = running(&registry, 2).await;
        let subtask = Uuid::new_v4();
        registry.assign_task(id, subtask).await.unwrap();

        assert_eq!(registry.stop(id).await.unwrap(), vec![subtask]);
        let agent = registry.get(id).await.unwrap();
        assert_eq!(agent.health, HealthStatus::Stopped);

        assert!(registry.restart(id).await.unwrap().is_empty());
        assert!(registry.get(id).await.unwrap().is_available());
    }

    #[tokio::test]
    async fn test_stale_heartbeat_sets_unknown_only() {
        let registry = registry();
        let id = running(&registry, 1).await;
        let later = Utc::now() + Duration::seconds(45);

        let changed = registry
            .sweep_liveness(later, Duration::seconds(30), Duration::seconds(90))
            .await
            .unwrap();
        assert_eq!(changed, vec![(id, HealthStatus::Unknown)]);

        let agent = registry.get(id).await.unwrap();
        assert_eq!(agent.health, HealthStatus::Unknown);
        assert_eq!(agent.status, AgentStatus::Idle);

        assert_eq!(registry.heartbeat(id, None).await.unwrap(), HealthStatus::Healthy);
    }

    #[tokio::test]
    async fn test_deregister() {
        let registry = registry();
        let id = running(&registry, 2).await;
        let subtask = Uuid::new_v4();
        registry.assign_task(id, subtask).await.unwrap();

        assert_eq!(registry.deregister(id).await.unwrap(), vec![subtask]);
        assert!(registry.get(id).await.unwrap_err().is_not_found());
        assert!(registry.repository.find_by_id(id).await.unwrap().is_none());
    }
}
