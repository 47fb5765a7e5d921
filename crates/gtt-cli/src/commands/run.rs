//! Run command: track every configured repository until interrupted.

use std::sync::Arc;

use anyhow::{Context, Result};
use gtt_core::{DurationStore, FingerprintSource, FlushOutcome, Tracker};
use gtt_git::GitCli;
use gtt_store::{FileStore, LogOnlyStore};

use crate::Config;
use crate::driver;

/// Builds the duration store selected by `write_to_file`.
pub fn open_store(config: &Config) -> Arc<dyn DurationStore> {
    if config.write_to_file {
        Arc::new(FileStore::new(&config.file_path))
    } else {
        tracing::warn!("write_to_file is off, tracked time will only be logged");
        Arc::new(LogOnlyStore)
    }
}

pub fn run(config: &Config) -> Result<()> {
    let tracker = Arc::new(Tracker::new(open_store(config), config.idle_cap));
    let source: Arc<dyn FingerprintSource> = Arc::new(GitCli::new());

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("failed to start async runtime")?;
    let outcomes = runtime.block_on(driver::run(config, tracker, source))?;

    let flushed = outcomes
        .iter()
        .filter(|(_, outcome)| matches!(outcome, FlushOutcome::Flushed { .. }))
        .count();
    let failed = outcomes
        .iter()
        .filter(|(_, outcome)| matches!(outcome, FlushOutcome::Failed { .. }))
        .count();

    println!("Program terminated. Flushed {flushed} project(s).");
    if failed > 0 {
        anyhow::bail!("final flush failed for {failed} project(s)");
    }
    Ok(())
}
