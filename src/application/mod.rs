//! Application layer: the running orchestrator and the reference agent
//! worker used by `run --simulate`.

pub mod orchestrator;
pub mod simulated_agent;

pub use orchestrator::{FleetSummary, InMemoryOrchestrator, Orchestrator, OrchestratorState};
pub use simulated_agent::SimulatedAgent;
