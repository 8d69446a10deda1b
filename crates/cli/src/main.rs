//! Transaction stream CLI
//!
//! Runs the stream processor against Kafka and Elasticsearch, replays
//! JSON-lines files offline, and validates configuration.

mod commands;
mod telemetry;

use anyhow::Context;
use clap::{Parser, Subcommand};
use colored::Colorize;
use commands::{CheckConfigCommand, ReplayCommand, RunCommand};
use std::path::PathBuf;
use txn_stream_config::AppConfig;

#[derive(Parser)]
#[command(
    name = "txn-stream",
    version,
    about = "Partitioned stream processor for financial transaction events",
    long_about = "Consumes transaction change events, deduplicates and enriches them,\n\
                  maintains per-user windowed and running aggregates, flags high-value\n\
                  transactions and upserts the results into Elasticsearch."
)]
struct Cli {
    /// Configuration file (YAML)
    #[arg(
        short,
        long,
        global = true,
        env = "TXN_STREAM_CONFIG",
        value_name = "FILE"
    )]
    config: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Consume from Kafka and write to Elasticsearch until interrupted
    Run(RunCommand),

    /// Feed a JSON-lines file through the pipeline and print the documents
    Replay(ReplayCommand),

    /// Load and validate configuration, then print the effective settings
    CheckConfig(CheckConfigCommand),
}

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        eprintln!("{} {:#}", "Error:".red().bold(), e);
        std::process::exit(1);
    }
}

async fn run() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config = AppConfig::load(cli.config.as_deref()).context("loading configuration")?;
    telemetry::init_tracing(&config.observability, cli.verbose)?;

    match cli.command {
        Commands::Run(command) => command.execute(config).await,
        Commands::Replay(command) => command.execute(config).await,
        Commands::CheckConfig(command) => command.execute(config),
    }
}
