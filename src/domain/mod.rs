//! Domain layer for the Faultline orchestration core
//!
//! Models, their state machines, and the persistence ports.

pub mod errors;
pub mod models;
pub mod ports;

pub use errors::{DomainError, DomainResult};
