//! Faultline CLI entry point.

use clap::Parser;

use faultline::cli::{commands, Cli, Commands};
use faultline::infrastructure::config::ConfigLoader;
use faultline::infrastructure::logging::LoggerImpl;

async fn dispatch(command: Commands, config_path: Option<std::path::PathBuf>, json: bool) -> anyhow::Result<()> {
    let config = ConfigLoader::load_from(config_path.as_deref())?;
    let _logger = LoggerImpl::init(&config.logging)?;

    match command {
        Commands::Run(args) => commands::run::execute(args, config, json).await,
        Commands::Decompose(args) => commands::decompose::execute(&args, json),
        Commands::Config => commands::config::execute(config, json),
    }
}

#[tokio::main]
async fn main() {
    let Cli { command, json, config } = Cli::parse();

    if let Err(err) = dispatch(command, config, json).await {
        faultline::cli::handle_error(err, json);
    }
}
