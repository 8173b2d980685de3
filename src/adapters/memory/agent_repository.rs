//! In-memory agent store.

use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::Agent;
use crate::domain::ports::{AgentFilter, AgentRepository};

/// Agent repository backed by process memory.
#[derive(Default)]
pub struct InMemoryAgentRepository {
    agents: RwLock<HashMap<Uuid, Agent>>,
}

impl InMemoryAgentRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl AgentRepository for InMemoryAgentRepository {
    async fn save(&self, agent: &Agent) -> DomainResult<()> {
        let mut agents = self.agents.write().await;
        if agents.contains_key(&agent.id) {
            return Err(DomainError::StorageError(format!("Agent {} already exists", agent.id)));
        }
        agents.insert(agent.id, agent.clone());
        Ok(())
    }

    async fn find_by_id(&self, id: Uuid) -> DomainResult<Option<Agent>> {
        Ok(self.agents.read().await.get(&id).cloned())
    }

    async fn update(&self, agent: &Agent) -> DomainResult<()> {
        let mut agents = self.agents.write().await;
        let slot = agents.get_mut(&agent.id).ok_or(DomainError::AgentNotFound(agent.id))?;
        *slot = agent.clone();
        Ok(())
    }

    async fn delete(&self, id: Uuid) -> DomainResult<()> {
        self.agents
            .write()
            .await
            .remove(&id)
            .map(|_| ())
            .ok_or(DomainError::AgentNotFound(id))
    }

    async fn list(&self, filter: AgentFilter) -> DomainResult<Vec<Agent>> {
        let agents = self.agents.read().await;
        let mut found: Vec<Agent> = agents.values().filter(|a| filter.matches(a)).cloned().collect();
        found.sort_by_key(|a| (a.created_at, a.id));
        Ok(found)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::Capability;

    #[tokio::test]
    async fn test_crud() {
        let repo = InMemoryAgentRepository::new();
        let mut agent = Agent::new(Capability::Validation, 1);
        repo.save(&agent).await.unwrap();

        agent.start().unwrap();
        repo.update(&agent).await.unwrap();
        assert_eq!(repo.find_by_id(agent.id).await.unwrap().unwrap(), agent);

        repo.delete(agent.id).await.unwrap();
        assert!(repo.find_by_id(agent.id).await.unwrap().is_none());
        assert!(matches!(repo.delete(agent.id).await, Err(DomainError::AgentNotFound(_))));
    }

    #[tokio::test]
    async fn test_list_by_capability() {
        let repo = InMemoryAgentRepository::new();
        repo.save(&Agent::new(Capability::Validation, 1)).await.unwrap();
        repo.save(&Agent::new(Capability::DeepAnalysis, 1)).await.unwrap();

        let filter = AgentFilter {
            capability: Some(Capability::DeepAnalysis),
            ..AgentFilter::default()
        };
        assert_eq!(repo.list(filter).await.unwrap().len(), 1);
    }
}
