use std::fs::OpenOptions;
use std::path::Path;
use std::sync::Mutex;

use anyhow::{Context, Result};
use clap::Parser;
use tracing_subscriber::EnvFilter;

use gtt_cli::commands::{report, run, status};
use gtt_cli::{Cli, Commands, Config};
use gtt_git::GitCli;

/// Initializes tracing to stderr, or to `log_file` when configured.
fn init_tracing(verbose: bool, log_file: Option<&Path>) -> Result<()> {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    let builder = tracing_subscriber::fmt().with_env_filter(filter);

    // Use try_init to avoid panic if tracing is already initialized (e.g., in tests)
    if let Some(path) = log_file {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .with_context(|| format!("failed to open log file {}", path.display()))?;
        let _ = builder
            .with_ansi(false)
            .with_writer(Mutex::new(file))
            .try_init();
    } else {
        let _ = builder.with_writer(std::io::stderr).try_init();
    }
    Ok(())
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = Config::load_from(cli.config.as_deref()).context("failed to load configuration")?;
    init_tracing(cli.verbose, config.log_file_path.as_deref())?;
    tracing::debug!(?config, "loaded configuration");

    match cli.command.unwrap_or(Commands::Run) {
        Commands::Run => run::run(&config)?,
        Commands::Status => {
            status::run(&mut std::io::stdout().lock(), &config, &GitCli::new())?;
        }
        Commands::Report { project } => {
            report::run(&mut std::io::stdout().lock(), &config, project.as_deref())?;
        }
    }

    Ok(())
}
