//! CLI type definitions
//!
//! This module contains clap command structures that define the CLI interface.

use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

use crate::domain::models::TaskType;

#[derive(Parser, Debug)]
#[command(name = "faultline")]
#[command(about = "Faultline - agent fleet orchestrator", long_about = None)]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Output in JSON format
    #[arg(short, long, global = true)]
    pub json: bool,

    /// Configuration file (defaults to .faultline/config.yaml plus local overrides)
    #[arg(short, long, global = true, env = "FAULTLINE_CONFIG")]
    pub config: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the orchestrator until Ctrl-C or until submitted tasks settle
    Run(RunArgs),

    /// Show the subtask graph a task type decomposes into
    Decompose(DecomposeArgs),

    /// Print the effective configuration
    Config,
}

#[derive(Args, Debug)]
pub struct RunArgs {
    /// Attach simulated workers to every agent in the fleet
    #[arg(long)]
    pub simulate: bool,

    /// Submit a task of this type once the fleet is online (repeatable)
    #[arg(long = "submit", value_name = "TYPE")]
    pub submit: Vec<TaskType>,

    /// Append a report compilation stage to submitted tasks
    #[arg(long)]
    pub include_report: bool,

    /// Priority for submitted tasks (lower is more urgent)
    #[arg(short, long, allow_negative_numbers = true)]
    pub priority: Option<i32>,

    /// Seconds to wait for submitted tasks before giving up
    #[arg(long, default_value = "120")]
    pub timeout_secs: u64,
}

#[derive(Args, Debug)]
pub struct DecomposeArgs {
    /// Task type, e.g. IMAGE_ANALYSIS or failure-analysis
    pub task_type: TaskType,

    /// Append a report compilation stage
    #[arg(long)]
    pub include_report: bool,
}
