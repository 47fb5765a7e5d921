//! The duration store seam: where flushed time ends up.
//!
//! A store maps `(project, branch)` to a cumulative duration. The tracker only
//! ever calls [`DurationStore::add`]; `read` and `write` exist for reporting
//! and for callers that manage totals themselves.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use thiserror::Error;

use crate::duration::{DurationParseError, round_to_second};

/// Storage errors.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Reading or replacing the backing file failed.
    #[error("failed to {action} {}", path.display())]
    Io {
        action: &'static str,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    /// A record for the requested key holds an unparseable duration.
    #[error("malformed duration {value:?} for {project} | {branch}")]
    MalformedDuration {
        project: String,
        branch: String,
        value: String,
        #[source]
        source: DurationParseError,
    },
    /// A line does not have the `project | branch : duration` shape.
    #[error("malformed record on line {line_number}: {line:?}")]
    MalformedLine { line_number: usize, line: String },
    /// The key cannot be represented in a record line.
    #[error("invalid record key {project:?} | {branch:?}: {reason}")]
    InvalidKey {
        project: String,
        branch: String,
        reason: &'static str,
    },
}

/// One persisted `(project, branch) -> duration` entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    pub project: String,
    pub branch: String,
    pub duration: Duration,
}

/// Persistent cumulative durations keyed by project and branch.
///
/// Implementations must make [`add`](Self::add) atomic with respect to every
/// other call on the same store, since all projects share one store.
pub trait DurationStore: Send + Sync {
    /// Returns the stored duration, or zero if there is no record.
    fn read(&self, project: &str, branch: &str) -> Result<Duration, StoreError>;

    /// Replaces the stored duration, creating the record if needed.
    fn write(&self, project: &str, branch: &str, duration: Duration) -> Result<(), StoreError>;

    /// Adds `delta` to the stored duration and returns the new total.
    fn add(&self, project: &str, branch: &str, delta: Duration) -> Result<Duration, StoreError>;
}

/// Checks that a key can round-trip through the `project | branch : duration` line format.
pub fn validate_key(project: &str, branch: &str) -> Result<(), StoreError> {
    let invalid = |reason| StoreError::InvalidKey {
        project: project.to_string(),
        branch: branch.to_string(),
        reason,
    };

    if project.is_empty() {
        return Err(invalid("project name is empty"));
    }
    if project.contains(':') || project.contains('|') {
        return Err(invalid("project name contains a delimiter"));
    }
    if branch.contains(':') {
        return Err(invalid("branch name contains ':'"));
    }
    if project.contains('\n') || branch.contains('\n') {
        return Err(invalid("key contains a newline"));
    }
    Ok(())
}

/// In-memory store, mostly useful for tests.
#[derive(Debug, Default)]
pub struct MemoryStore {
    records: Mutex<BTreeMap<(String, String), Duration>>,
    writes: AtomicUsize,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of successful `write`/`add` calls so far.
    pub fn writes(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    /// All records, ordered by project then branch.
    pub fn records(&self) -> Vec<Record> {
        self.records
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|((project, branch), duration)| Record {
                project: project.clone(),
                branch: branch.clone(),
                duration: *duration,
            })
            .collect()
    }
}

impl DurationStore for MemoryStore {
    fn read(&self, project: &str, branch: &str) -> Result<Duration, StoreError> {
        let records = self.records.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(records
            .get(&(project.to_string(), branch.to_string()))
            .copied()
            .unwrap_or_default())
    }

    fn write(&self, project: &str, branch: &str, duration: Duration) -> Result<(), StoreError> {
        validate_key(project, branch)?;
        let mut records = self.records.lock().unwrap_or_else(PoisonError::into_inner);
        records.insert(
            (project.to_string(), branch.to_string()),
            round_to_second(duration),
        );
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn add(&self, project: &str, branch: &str, delta: Duration) -> Result<Duration, StoreError> {
        validate_key(project, branch)?;
        let mut records = self.records.lock().unwrap_or_else(PoisonError::into_inner);
        let entry = records
            .entry((project.to_string(), branch.to_string()))
            .or_default();
        *entry = round_to_second(entry.saturating_add(delta));
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(*entry)
    }
}
