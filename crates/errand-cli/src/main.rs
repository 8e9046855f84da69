//! Errand CLI - inspect and drain the offline action queue
//!
//! Works against the same libSQL queue database the clients use, so queued
//! actions can be listed, retried, or delivered from a terminal.

mod cli;
mod commands;
mod config;
mod error;

#[cfg(test)]
mod tests;

use clap::Parser;

use crate::cli::{Cli, Commands};
use crate::commands::clear::run_clear;
use crate::commands::completions::run_completions;
use crate::commands::config::run_config;
use crate::commands::count::run_count;
use crate::commands::enqueue::run_enqueue;
use crate::commands::list::run_list;
use crate::commands::remove::run_remove;
use crate::commands::retry::run_retry;
use crate::commands::sync::run_sync;
use crate::config::CliConfig;
use crate::error::CliError;

#[tokio::main]
async fn main() {
    if let Err(error) = run().await {
        eprintln!("Error: {error}");
        std::process::exit(1);
    }
}

async fn run() -> Result<(), CliError> {
    dotenvy::dotenv().ok();

    let mut filter = tracing_subscriber::EnvFilter::from_default_env();
    if let Ok(directive) = "errand=info".parse() {
        filter = filter.add_directive(directive);
    }
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let cli = Cli::parse();
    let config_path = cli.config.unwrap_or_else(config::default_config_path);
    let config = CliConfig::load_from_path(&config_path).map_err(CliError::Config)?;
    let db_path = config.resolve_db_path(cli.db_path);

    match cli.command {
        Commands::Enqueue { kind, payload } => {
            run_enqueue(&kind, payload.as_deref(), &db_path, &config).await?;
        }
        Commands::List { json } => run_list(json, &db_path, &config).await?,
        Commands::Count => run_count(&db_path, &config).await?,
        Commands::Retry { id } => run_retry(&id, &db_path, &config).await?,
        Commands::Remove { id } => run_remove(&id, &db_path, &config).await?,
        Commands::Clear => run_clear(&db_path, &config).await?,
        Commands::Sync => run_sync(&db_path, &config).await?,
        Commands::Config { command } => run_config(command, &config_path, &config)?,
        Commands::Completions { shell, output } => {
            run_completions(shell, output.as_deref())?;
        }
    }

    Ok(())
}
