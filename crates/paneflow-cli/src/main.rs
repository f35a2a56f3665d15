use anyhow::Result;
use clap::{Parser, Subcommand};
use colored::Colorize;
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod commands;
mod config;

use commands::*;

#[derive(Parser)]
#[command(name = "pflow")]
#[command(author, version, about = "Paneflow - incremental keyed window aggregation", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Replay a JSON-lines delta file through a configured engine
    Run {
        /// Stream configuration (JSON)
        #[arg(short, long)]
        config: PathBuf,

        /// Input file, one {"ts", "key", "value" | "remove"} object per line
        #[arg(short, long)]
        input: PathBuf,

        /// State snapshot to resume from and save to (durable streams only)
        #[arg(short, long)]
        state: Option<PathBuf>,

        /// Output format (table, json)
        #[arg(short, long, default_value = "table")]
        output: String,

        /// Advance the clock this far past the last record before stopping
        #[arg(short, long, default_value = "0")]
        flush_ms: i64,
    },

    /// Check that a configuration builds an engine
    Validate {
        /// Stream configuration (JSON)
        #[arg(short, long)]
        config: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    init_logging(cli.verbose)?;

    print_banner();

    match cli.command {
        Commands::Run {
            config,
            input,
            state,
            output,
            flush_ms,
        } => {
            run_stream(&config, &input, state.as_deref(), &output, flush_ms).await?;
        }
        Commands::Validate { config } => {
            validate_config(&config).await?;
        }
    }

    Ok(())
}

fn init_logging(verbose: bool) -> Result<()> {
    let filter = if verbose {
        "paneflow_cli=debug,paneflow_engine=debug,paneflow_windows=debug,paneflow_state=debug"
    } else {
        "paneflow_cli=info,paneflow_engine=warn"
    };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| filter.into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    Ok(())
}

fn print_banner() {
    println!("{}", "paneflow".bright_cyan().bold());
    println!(
        "{}",
        "Incremental keyed window aggregation v0.1.0\n".bright_black()
    );
}
