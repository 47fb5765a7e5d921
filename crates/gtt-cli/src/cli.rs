//! Command-line argument definitions.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// Git working-time tracker.
///
/// Watches git working directories and records how long you actively work on
/// each project and branch.
#[derive(Debug, Parser)]
#[command(name = "gtt", version, about, long_about = None)]
pub struct Cli {
    /// Enable verbose output.
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Path to config file (defaults to ./config.json).
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

/// Available subcommands.
#[derive(Debug, Clone, Subcommand)]
pub enum Commands {
    /// Track configured repositories until interrupted (the default).
    Run,

    /// Show the current branch and change fingerprint of each repository.
    Status,

    /// Show recorded time per project and branch.
    Report {
        /// Only show this project.
        #[arg(long)]
        project: Option<String>,
    },
}
