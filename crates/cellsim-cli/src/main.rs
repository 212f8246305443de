//! cellsim CLI - assemble, run and inspect whole-cell simulations.

mod commands;
mod config;

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "cellsim")]
#[command(author, version, about = "cellsim - composable multi-agent whole-cell simulation", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Verbose output (debug-level engine logs)
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Write a starter configuration (the glucose colony)
    Init {
        /// Output file; the extension selects TOML or JSON
        #[arg(default_value = config::DEFAULT_CONFIG_FILE)]
        path: PathBuf,

        /// Overwrite an existing file
        #[arg(short, long)]
        force: bool,
    },

    /// Check a configuration and assemble it without running
    Validate {
        /// Configuration file (.toml or .json)
        #[arg(default_value = config::DEFAULT_CONFIG_FILE)]
        config: PathBuf,
    },

    /// Run a simulation
    Run {
        /// Configuration file (.toml or .json)
        #[arg(default_value = config::DEFAULT_CONFIG_FILE)]
        config: PathBuf,

        /// Number of sub-ticks to run
        #[arg(short, long, default_value = "100")]
        ticks: u64,

        /// Write snapshots as JSON lines to this file
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Tick agents on the calling thread only
        #[arg(long)]
        sequential: bool,
    },

    /// Export the causality network of a configuration as JSON
    Network {
        /// Configuration file (.toml or .json)
        #[arg(default_value = config::DEFAULT_CONFIG_FILE)]
        config: PathBuf,

        /// Output file (default: stdout)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Compare two emitted runs snapshot by snapshot
    Compare {
        /// First JSON-lines run
        first: PathBuf,

        /// Second JSON-lines run
        second: PathBuf,

        /// Numbers closer than this are considered equal
        #[arg(short, long, default_value = "0.0")]
        tolerance: f64,

        /// Maximum number of differing snapshots to list
        #[arg(short, long, default_value = "10")]
        limit: usize,
    },
}

fn init_logging(verbose: bool) {
    let default_level = if verbose { "debug" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    match cli.command {
        Commands::Init { path, force } => commands::init::run(&path, force),
        Commands::Validate { config } => commands::validate::run(&config),
        Commands::Run {
            config,
            ticks,
            output,
            sequential,
        } => commands::run::run(&config, ticks, output.as_deref(), sequential, cli.verbose),
        Commands::Network { config, output } => commands::network::run(&config, output.as_deref()),
        Commands::Compare {
            first,
            second,
            tolerance,
            limit,
        } => commands::compare::run(&first, &second, tolerance, limit),
    }
}
