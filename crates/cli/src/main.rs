//! FlowPilot CLI: the main entry point.
//!
//! Commands:
//! - `ask`      Run one request and print its events as JSON lines
//! - `onboard`  Write a default config file

use clap::{Parser, Subcommand};
use std::path::PathBuf;

mod commands;

#[derive(Parser)]
#[command(
    name = "flowpilot",
    about = "FlowPilot: planned, cancellable agent runs",
    version,
    author
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Config file (defaults to ~/.flowpilot/config.toml)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Ask a question and stream the run's events to stdout
    Ask {
        query: String,

        /// Run the analyze → search → build flow pipeline instead of the agent
        #[arg(long)]
        flow: bool,
    },

    /// Initialize the configuration directory
    Onboard,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Logs go to stderr; stdout carries only event lines
    let filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter)),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Ask { query, flow } => {
            commands::ask::run(query, flow, cli.config.as_deref()).await?
        }
        Commands::Onboard => commands::onboard::run(cli.config.as_deref())?,
    }

    Ok(())
}
