//! Process-local repository adapters.

mod agent_repository;
mod task_repository;

pub use agent_repository::InMemoryAgentRepository;
pub use task_repository::InMemoryTaskRepository;
