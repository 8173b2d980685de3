//! CLI command implementations.

pub mod config;
pub mod decompose;
pub mod run;
