//! The fingerprint source seam: what the tracker asks a working directory.

use std::fmt;
use std::path::{Path, PathBuf};

use thiserror::Error;

/// Opaque token summarizing the uncommitted state of a working tree.
///
/// Two equal fingerprints mean no content change was observed between them.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Fingerprint(String);

impl Fingerprint {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Errors from querying a working directory.
#[derive(Debug, Error)]
pub enum SourceError {
    /// The query command could not be started.
    #[error("failed to run `{command}` in {}", path.display())]
    Spawn {
        command: &'static str,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    /// The query command ran but reported failure.
    #[error("`{command}` failed in {} ({status}): {stderr}", path.display())]
    Failed {
        command: &'static str,
        path: PathBuf,
        status: String,
        stderr: String,
    },
    /// The query command printed something that is not a usable answer.
    #[error("`{command}` returned unusable output in {}", path.display())]
    InvalidOutput { command: &'static str, path: PathBuf },
}

/// Read-only queries against a version-controlled working directory.
pub trait FingerprintSource: Send + Sync {
    /// Returns a token that changes iff the uncommitted content changes.
    fn status_fingerprint(&self, path: &Path) -> Result<Fingerprint, SourceError>;

    /// Returns the name of the checked-out branch.
    fn current_branch(&self, path: &Path) -> Result<String, SourceError>;
}
