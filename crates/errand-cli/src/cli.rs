use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};

#[derive(Parser)]
#[command(name = "errand")]
#[command(about = "Inspect and drain the Errand offline action queue")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Optional path to local queue database file
    #[arg(long, global = true, value_name = "PATH")]
    pub db_path: Option<PathBuf>,

    /// Optional path to CLI config file
    #[arg(long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Queue an action for later delivery
    #[command(alias = "add")]
    Enqueue {
        /// Action kind (e.g. send_message, accept_task)
        kind: String,
        /// JSON payload (defaults to `{}`)
        payload: Option<String>,
    },
    /// List queued actions in dispatch order
    #[command(alias = "ls")]
    List {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Print the number of queued actions
    Count,
    /// Attempt one queued action now
    Retry {
        /// Action ID or unique ID prefix
        id: String,
    },
    /// Remove a queued action without delivering it
    #[command(alias = "rm")]
    Remove {
        /// Action ID or unique ID prefix
        id: String,
    },
    /// Drop every queued action
    Clear,
    /// Deliver all queued actions to the configured backend
    Sync,
    /// Show or update CLI configuration
    Config {
        #[command(subcommand)]
        command: ConfigCommands,
    },
    /// Generate shell completion scripts
    Completions {
        /// Target shell
        #[arg(value_enum)]
        shell: CompletionShell,
        /// Optional output path (stdout when omitted)
        #[arg(short, long, value_name = "PATH")]
        output: Option<PathBuf>,
    },
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, ValueEnum)]
pub enum CompletionShell {
    Bash,
    Zsh,
    Fish,
}

#[derive(Subcommand)]
pub enum ConfigCommands {
    /// Print the effective configuration
    Show,
    /// Initialize or update the config file
    Init {
        /// Backend base URL (e.g. <https://api.example.com>)
        #[arg(long, value_name = "URL")]
        api_base_url: Option<String>,
        /// Bearer token sent with every dispatch
        #[arg(long, value_name = "TOKEN")]
        api_token: Option<String>,
        /// Default queue database path
        #[arg(long, value_name = "PATH")]
        db_path: Option<PathBuf>,
    },
}
