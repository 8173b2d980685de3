//! Port trait definitions (Hexagonal Architecture)
//!
//! Registries persist through these traits; the in-memory adapters in
//! `crate::adapters::memory` implement them.

pub mod agent_repository;
pub mod task_repository;

pub use agent_repository::{AgentFilter, AgentRepository};
pub use task_repository::{TaskFilter, TaskRepository};
