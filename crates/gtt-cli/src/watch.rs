//! Filesystem change notification for tracked repositories.
//!
//! A `notify` recommended watcher runs recursively over the repository and
//! forwards the path of every qualifying change into a tokio channel. Bursts
//! are not coalesced here; the driver debounces them.

use std::path::{Path, PathBuf};

use notify::event::ModifyKind;
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use thiserror::Error;
use tokio::sync::mpsc;

/// Errors that can occur when setting up a repository watcher.
#[derive(Debug, Error)]
pub enum WatchError {
    /// The repository directory does not exist or is not a directory.
    #[error("repository directory not found: {}", .0.display())]
    NotFound(PathBuf),
    /// The underlying `notify` crate returned an error.
    #[error("filesystem watcher error: {0}")]
    Notify(#[from] notify::Error),
}

/// Keeps a repository watch alive. Dropping it stops the notifications.
#[derive(Debug)]
pub struct RepoWatcher {
    _watcher: RecommendedWatcher,
}

/// Watches `path` recursively, sending changed paths into `tx`.
///
/// Paths containing any `exclude` substring are dropped. When the channel is
/// full the change is dropped as well; one pending change is enough to keep
/// the debounce window open.
pub fn watch_repository(
    project: &str,
    path: &Path,
    exclude: Vec<String>,
    tx: mpsc::Sender<PathBuf>,
) -> Result<RepoWatcher, WatchError> {
    if !path.is_dir() {
        return Err(WatchError::NotFound(path.to_path_buf()));
    }

    let project = project.to_string();
    let mut watcher =
        notify::recommended_watcher(move |res: Result<Event, notify::Error>| match res {
            Ok(event) => {
                if !is_qualifying(&event.kind) {
                    return;
                }
                for changed in event.paths {
                    if is_excluded(&changed, &exclude) {
                        tracing::trace!(project = %project, path = %changed.display(), "excluded change");
                        continue;
                    }
                    let _ = tx.try_send(changed);
                }
            }
            Err(err) => tracing::warn!(project = %project, error = %err, "watch error"),
        })?;

    watcher.watch(path, RecursiveMode::Recursive)?;

    Ok(RepoWatcher { _watcher: watcher })
}

/// Creations, content changes, renames and removals count as activity.
/// Access and metadata-only events do not.
pub fn is_qualifying(kind: &EventKind) -> bool {
    match kind {
        EventKind::Create(_) | EventKind::Remove(_) => true,
        EventKind::Modify(modify) => !matches!(modify, ModifyKind::Metadata(_)),
        _ => false,
    }
}

/// Returns `true` if the path contains any of the exclude substrings.
pub fn is_excluded(path: &Path, exclude: &[String]) -> bool {
    let path = path.to_string_lossy();
    exclude.iter().any(|pattern| path.contains(pattern.as_str()))
}
