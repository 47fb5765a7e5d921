//! git command-line fingerprint source.
//!
//! Shells out to `git` in the working directory:
//! - fingerprint: MD5 of `git diff HEAD` (tracked changes, staged or not)
//! - branch: `git branch --show-current`, or `HEAD` when detached

use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

use gtt_core::{Fingerprint, FingerprintSource, SourceError};

/// Branch name reported while HEAD is detached (rebase, bisect, tag checkout).
pub const DETACHED_BRANCH: &str = "HEAD";

/// [`FingerprintSource`] that runs the `git` binary.
#[derive(Debug, Clone)]
pub struct GitCli {
    program: PathBuf,
}

impl Default for GitCli {
    fn default() -> Self {
        Self {
            program: PathBuf::from("git"),
        }
    }
}

impl GitCli {
    pub fn new() -> Self {
        Self::default()
    }

    /// Uses a specific git executable instead of the one on `PATH`.
    pub fn with_program(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
        }
    }

    fn run(&self, path: &Path, command: &'static str, args: &[&str]) -> Result<Vec<u8>, SourceError> {
        let output = Command::new(&self.program)
            .args(args)
            .current_dir(path)
            .stdin(Stdio::null())
            .output()
            .map_err(|source| SourceError::Spawn {
                command,
                path: path.to_path_buf(),
                source,
            })?;

        if !output.status.success() {
            return Err(SourceError::Failed {
                command,
                path: path.to_path_buf(),
                status: output.status.to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        Ok(output.stdout)
    }
}

impl FingerprintSource for GitCli {
    fn status_fingerprint(&self, path: &Path) -> Result<Fingerprint, SourceError> {
        let diff = self.run(path, "git diff HEAD", &["diff", "HEAD"])?;
        Ok(Fingerprint::new(format!("{:x}", md5::compute(diff))))
    }

    fn current_branch(&self, path: &Path) -> Result<String, SourceError> {
        const COMMAND: &str = "git branch --show-current";

        let stdout = self.run(path, COMMAND, &["branch", "--show-current"])?;
        let branch = String::from_utf8(stdout).map_err(|_| SourceError::InvalidOutput {
            command: COMMAND,
            path: path.to_path_buf(),
        })?;

        let branch = branch.trim();
        if branch.is_empty() {
            tracing::debug!(path = %path.display(), "HEAD is detached");
            return Ok(DETACHED_BRANCH.to_string());
        }
        Ok(branch.to_string())
    }
}
