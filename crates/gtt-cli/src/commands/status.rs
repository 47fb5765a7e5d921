//! Status command for showing what the tracker sees in each repository.

use std::io::Write;

use anyhow::Result;
use gtt_core::FingerprintSource;

use crate::Config;

pub fn run<W: Write>(writer: &mut W, config: &Config, source: &dyn FingerprintSource) -> Result<()> {
    writeln!(writer, "Time tracker status")?;
    writeln!(writer, "Store: {}", config.file_path.display())?;
    if !config.write_to_file {
        writeln!(writer, "Writing to file is disabled.")?;
    }

    for (name, repository) in &config.repositories {
        writeln!(writer, "{name} ({})", repository.path.display())?;

        match source.current_branch(&repository.path) {
            Ok(branch) => writeln!(writer, "  branch:      {branch}")?,
            Err(err) => {
                tracing::warn!(project = %name, error = %err, "branch query failed");
                writeln!(writer, "  error:       {err}")?;
                continue;
            }
        }
        match source.status_fingerprint(&repository.path) {
            Ok(fingerprint) => writeln!(writer, "  fingerprint: {fingerprint}")?,
            Err(err) => writeln!(writer, "  error:       {err}")?,
        }
        if !repository.exclude.is_empty() {
            writeln!(writer, "  exclude:     {}", repository.exclude.join(", "))?;
        }
    }

    Ok(())
}
