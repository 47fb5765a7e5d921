//! Report command for showing recorded time per project and branch.

use std::collections::BTreeMap;
use std::io::Write;
use std::time::Duration;

use anyhow::{Context, Result};
use gtt_core::format_duration;
use gtt_store::FileStore;

use crate::Config;

pub fn run<W: Write>(writer: &mut W, config: &Config, project: Option<&str>) -> Result<()> {
    let store = FileStore::new(&config.file_path);
    let records = store
        .records()
        .with_context(|| format!("failed to read {}", config.file_path.display()))?;

    let mut projects: BTreeMap<&str, Vec<(&str, Duration)>> = BTreeMap::new();
    for record in &records {
        if project.is_some_and(|wanted| wanted != record.project) {
            continue;
        }
        projects
            .entry(record.project.as_str())
            .or_default()
            .push((record.branch.as_str(), record.duration));
    }

    writeln!(writer, "Time tracker report")?;
    writeln!(writer, "Store: {}", config.file_path.display())?;

    if projects.is_empty() {
        match project {
            Some(name) => writeln!(writer, "No time recorded for {name}.")?,
            None => writeln!(writer, "No time recorded.")?,
        }
        return Ok(());
    }

    for (name, mut branches) in projects {
        branches.sort_unstable();
        let width = branches
            .iter()
            .map(|(branch, _)| branch.len())
            .chain(std::iter::once("total".len()))
            .max()
            .unwrap_or_default();
        let total: Duration = branches.iter().map(|(_, duration)| *duration).sum();

        writeln!(writer, "{name}")?;
        for (branch, duration) in &branches {
            writeln!(writer, "  {branch:<width$}  {}", format_duration(*duration))?;
        }
        writeln!(writer, "  {:<width$}  {}", "total", format_duration(total))?;
    }

    Ok(())
}
