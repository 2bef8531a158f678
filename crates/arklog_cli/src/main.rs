//! Arklog CLI
//!
//! Command-line tools for inspecting arklog archive state.
//!
//! # Commands
//!
//! - `inspect` - Summarize a partition manifest document: offsets, segment
//!   count, and cloud-resident bytes
//! - `version` - Show version information

mod commands;

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// Arklog archive inspection tools.
#[derive(Parser)]
#[command(name = "arklog")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(global = true, short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Summarize a partition manifest document
    Inspect {
        /// Path to the manifest JSON document
        #[arg(short, long)]
        manifest: PathBuf,

        /// Count data already released from the readable window but not
        /// yet physically collected
        #[arg(short, long)]
        include_released: bool,

        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Show version information
    Version,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    match cli.command {
        Commands::Inspect {
            manifest,
            include_released,
            format,
        } => {
            commands::inspect::run(&manifest, include_released, &format)?;
        }
        Commands::Version => {
            println!("arklog CLI v{}", env!("CARGO_PKG_VERSION"));
        }
    }

    Ok(())
}
