//! Fleet Discovery CLI
//!
//! Command-line front end for scene discovery and fleet anomaly assessment
//! over JSON scene files.
//!
//! # Commands
//!
//! - `discover`: Cluster scenes into categories (global fallback when no
//!   density clusters exist)
//! - `assess`: Score one scene against the rest of the fleet
//! - `stats`: Fleet statistics over a whole file
//!
//! Results are written to stdout as JSON; logs go to stderr.
//!
//! # Exit Codes
//! - 0: Success
//! - 1: Recoverable error
//! - 2: Invalid input data

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing_subscriber::{fmt, EnvFilter};

use fleet_discovery_core::DiscoveryConfig;

mod commands;
mod error;

pub use error::{exit_code_for_error, CliExitCode};

/// Fleet Discovery CLI - Scene Clustering and Anomaly Assessment
#[derive(Parser)]
#[command(name = "fleet-discovery-cli")]
#[command(author = "Fleet Discovery Team")]
#[command(version = "0.1.0")]
#[command(about = "Discover scene categories and assess scenes against the fleet baseline")]
#[command(propagate_version = true)]
struct Cli {
    /// Verbosity level (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// TOML configuration file (default: layered config/ files and environment)
    #[arg(short, long, global = true, env = "FLEET_DISCOVERY_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Cluster a scene file into categories
    Discover(commands::discover::DiscoverArgs),
    /// Score one scene against the rest of the fleet
    Assess(commands::assess::AssessArgs),
    /// Fleet statistics over a scene file
    Stats(commands::stats::StatsArgs),
}

fn main() {
    let cli = Cli::parse();

    let config = match cli.config.as_deref() {
        Some(path) => DiscoveryConfig::from_file(path),
        None => DiscoveryConfig::load(),
    };
    let config = match config {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Failed to load configuration: {}", e);
            std::process::exit(CliExitCode::Warning.into());
        }
    };

    // Setup logging based on verbosity
    let filter = match cli.verbose {
        0 => EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(&config.logging.level)),
        1 => EnvFilter::new("info"),
        2 => EnvFilter::new("debug"),
        _ => EnvFilter::new("trace"),
    };

    if config.logging.json {
        fmt()
            .json()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .init();
    } else {
        fmt()
            .with_env_filter(filter)
            .with_target(true)
            .with_level(true)
            .with_writer(std::io::stderr)
            .init();
    }

    // Dispatch to command handlers
    let exit_code = match cli.command {
        Commands::Discover(args) => commands::discover::discover_command(args, config),
        Commands::Assess(args) => commands::assess::assess_command(args, config),
        Commands::Stats(args) => commands::stats::stats_command(args, config),
    };

    std::process::exit(exit_code);
}
