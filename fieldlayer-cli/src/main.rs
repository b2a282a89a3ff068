//! FieldLayer CLI - Command-line interface
//!
//! This binary provides a command-line interface to the FieldLayer library:
//! writing a starter configuration, inspecting grid tiles, and running the
//! acquisition pipeline over a set of land parcels.

mod commands;
mod error;
mod runner;

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use commands::run::{OutputFormat, RunArgs};

#[derive(Parser)]
#[command(name = "fieldlayer")]
#[command(version = fieldlayer::VERSION)]
#[command(about = "Acquire, cluster and cache vegetation indices for land parcels", long_about = None)]
struct Cli {
    /// Configuration file (defaults to ~/.fieldlayer/config.ini)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Write a default configuration file
    Init {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },

    /// Show the grid tile containing a coordinate
    Tile {
        /// Latitude in decimal degrees
        #[arg(long, allow_hyphen_values = true)]
        lat: f64,

        /// Longitude in decimal degrees
        #[arg(long, allow_hyphen_values = true)]
        lon: f64,

        /// Zoom level (defaults to the configured grid zoom)
        #[arg(long)]
        zoom: Option<u8>,
    },

    /// Register lands, run the pipeline until the queue drains, and report
    Run {
        /// JSON file holding an array of land parcels
        #[arg(long)]
        lands: PathBuf,

        /// Seconds to wait for the queue to drain
        #[arg(long, default_value = "300")]
        timeout: u64,

        /// Report format
        #[arg(long, value_enum, default_value = "text")]
        format: OutputFormat,

        /// Also log to stdout
        #[arg(long)]
        verbose: bool,
    },

    /// Run the pipeline over the lands and print provider usage only
    Usage {
        /// JSON file holding an array of land parcels
        #[arg(long)]
        lands: PathBuf,

        /// Seconds to wait for the queue to drain
        #[arg(long, default_value = "300")]
        timeout: u64,

        /// Report format
        #[arg(long, value_enum, default_value = "text")]
        format: OutputFormat,
    },
}

fn main() {
    let cli = Cli::parse();
    let config = cli.config;

    let result = match cli.command {
        Commands::Init { force } => commands::init::run(config, force),
        Commands::Tile { lat, lon, zoom } => commands::tile::run(config, lat, lon, zoom),
        Commands::Run {
            lands,
            timeout,
            format,
            verbose,
        } => commands::run::run(RunArgs {
            config,
            lands,
            timeout,
            format,
            verbose,
            usage_only: false,
        }),
        Commands::Usage {
            lands,
            timeout,
            format,
        } => commands::run::run(RunArgs {
            config,
            lands,
            timeout,
            format,
            verbose: false,
            usage_only: true,
        }),
    };

    if let Err(e) = result {
        e.exit();
    }
}
