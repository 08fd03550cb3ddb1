//! Pulse CLI
//!
//! Command-line tools for inspecting pulse files.
//!
//! # Commands
//!
//! - `info` - Display pulse file statistics
//! - `tree` - List the node tree with each field's storage form
//! - `dump` - Decode and print field contents
//! - `segments` - List segment headers and descriptors

mod commands;

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// Pulse file inspection tools.
#[derive(Parser)]
#[command(name = "pulse")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(global = true, short, long)]
    verbose: bool,

    /// Print JSON instead of text
    #[arg(global = true, long)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Display pulse file statistics
    Info {
        /// Path to the pulse file
        file: PathBuf,
    },

    /// List the node tree
    Tree {
        /// Path to the pulse file
        file: PathBuf,
    },

    /// Decode and print field contents
    Dump {
        /// Path to the pulse file
        file: PathBuf,

        /// Only nodes below this encoded path
        #[arg(short, long)]
        node: Option<String>,

        /// Maximum rows printed per field
        #[arg(short, long)]
        limit: Option<usize>,
    },

    /// List segment headers
    Segments {
        /// Path to the pulse file
        file: PathBuf,

        /// Only this encoded node path
        #[arg(short, long)]
        node: Option<String>,
    },
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Info { file } => commands::info::run(&file, cli.json)?,
        Commands::Tree { file } => commands::tree::run(&file, cli.json)?,
        Commands::Dump { file, node, limit } => {
            commands::dump::run(&file, node.as_deref(), limit, cli.json)?;
        }
        Commands::Segments { file, node } => {
            commands::segments::run(&file, node.as_deref(), cli.json)?;
        }
    }

    Ok(())
}
