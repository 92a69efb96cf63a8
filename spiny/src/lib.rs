//! spiny CLI library.

mod cli;
mod commands;

use anyhow::{Context, Result};
use clap::Parser;
use cli::{Cli, Commands};
use spiny_core::config::{load_dotenv, SpinyConfig};
use spiny_core::observability::{init_tracing, Verbosity};

/// Parse arguments, run the command and return the process exit code.
pub fn run_cli() -> Result<i32> {
    let cli = Cli::parse();
    load_dotenv();
    init_tracing(Verbosity::from_flags(cli.verbose, cli.quiet));

    let project_dir = std::fs::canonicalize(&cli.project_dir)
        .with_context(|| format!("Project directory {} not found", cli.project_dir.display()))?;
    let config = SpinyConfig::load(&project_dir, cli.config.as_deref(), &cli.overrides)?;
    tracing::debug!("Configuration: {:?}", config);

    match cli.command.unwrap_or(Commands::Run) {
        Commands::Run => commands::run::cmd_run(&config),
        Commands::Pythons { json } => commands::pythons::cmd_pythons(&config, json).map(|()| 0),
        Commands::Envs => commands::envs::cmd_envs(&config).map(|()| 0),
    }
}
