//! Agent repository port.

use async_trait::async_trait;
use uuid::Uuid;

use crate::domain::errors::DomainResult;
use crate::domain::models::{Agent, AgentStatus, Capability};

/// Filter criteria for listing agents.
#[derive(Debug, Clone, Default)]
pub struct AgentFilter {
    pub capability: Option<Capability>,
    pub status: Option<AgentStatus>,
}

impl AgentFilter {
    pub fn matches(&self, agent: &Agent) -> bool {
        self.capability.is_none_or(|c| agent.capability == c)
            && self.status.is_none_or(|s| agent.status == s)
    }
}

/// Repository interface for Agent persistence.
#[async_trait]
pub trait AgentRepository: Send + Sync {
    /// Persist a newly registered agent.
    async fn save(&self, agent: &Agent) -> DomainResult<()>;

    /// Get an agent by ID.
    async fn find_by_id(&self, id: Uuid) -> DomainResult<Option<Agent>>;

    /// Replace a stored agent. Fails with `AgentNotFound` if it was never saved.
    async fn update(&self, agent: &Agent) -> DomainResult<()>;

    /// Remove a deregistered agent.
    async fn delete(&self, id: Uuid) -> DomainResult<()>;

    /// List agents, oldest first.
    async fn list(&self, filter: AgentFilter) -> DomainResult<Vec<Agent>>;
}
