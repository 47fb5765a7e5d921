//! Storage layer for the git time tracker.
//!
//! Durations live in a plain text file, one record per line:
//!
//! ```text
//! demo | main : 1h23m4s
//! demo | feature/login : 40s
//! ```
//!
//! Records are matched by their `<project> | <branch> :` prefix. Updates
//! rewrite the whole file, replacing the matching line (or appending one) and
//! passing every other line through untouched. The new contents are written to
//! a temporary file next to the store and renamed over it, so a crash mid-write
//! leaves either the old or the new file, never a truncated one.
//!
//! # Thread Safety
//!
//! [`FileStore`] holds a mutex around every read-modify-write. All projects
//! share the one file, so this lock is what keeps concurrent flushes from
//! clobbering each other; per-project locks in the tracker are not enough.
//! Other processes writing the same file are not coordinated with.

use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use gtt_core::store::validate_key;
use gtt_core::{DurationStore, Record, StoreError, format_duration, parse_duration};
use tempfile::NamedTempFile;

/// Duration store backed by a line-oriented text file.
#[derive(Debug)]
pub struct FileStore {
    path: PathBuf,
    lock: Mutex<()>,
}

impl FileStore {
    /// Creates a store for `path`. The file is created on first write.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Lists every record in file order. Blank lines are skipped.
    pub fn records(&self) -> Result<Vec<Record>, StoreError> {
        let _guard = self.lock.lock().unwrap_or_else(PoisonError::into_inner);
        let contents = self.load()?;

        let mut records = Vec::new();
        for (index, line) in contents.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            let Some((project, branch, value)) = split_record(line) else {
                return Err(StoreError::MalformedLine {
                    line_number: index + 1,
                    line: line.to_string(),
                });
            };
            let duration = parse_value(project, branch, value)?;
            records.push(Record {
                project: project.to_string(),
                branch: branch.to_string(),
                duration,
            });
        }
        Ok(records)
    }

    fn read_unlocked(&self, project: &str, branch: &str) -> Result<Duration, StoreError> {
        let contents = self.load()?;
        let prefix = record_prefix(project, branch);

        contents
            .lines()
            .find_map(|line| line.strip_prefix(&prefix))
            .map_or(Ok(Duration::ZERO), |value| {
                parse_value(project, branch, value)
            })
    }

    fn write_unlocked(
        &self,
        project: &str,
        branch: &str,
        duration: Duration,
    ) -> Result<(), StoreError> {
        let contents = self.load()?;
        let prefix = record_prefix(project, branch);
        let record = format!("{prefix} {}", format_duration(duration));

        let mut lines = Vec::new();
        let mut replaced = false;
        for line in contents.lines() {
            if line.starts_with(&prefix) {
                // Later duplicates of the same key are dropped.
                if !replaced {
                    lines.push(record.as_str());
                    replaced = true;
                }
            } else {
                lines.push(line);
            }
        }
        if !replaced {
            lines.push(record.as_str());
        }

        let mut output = lines.join("\n");
        output.push('\n');
        self.replace(&output)
    }

    /// Returns the file contents, or an empty string if it does not exist yet.
    fn load(&self) -> Result<String, StoreError> {
        match fs::read_to_string(&self.path) {
            Ok(contents) => Ok(contents),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(String::new()),
            Err(err) => Err(io_error("read", &self.path, err)),
        }
    }

    /// Atomically replaces the file with `contents`.
    fn replace(&self, contents: &str) -> Result<(), StoreError> {
        let dir = match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };
        fs::create_dir_all(&dir).map_err(|err| io_error("create directory", &dir, err))?;

        let mut temp =
            NamedTempFile::new_in(&dir).map_err(|err| io_error("create temp file in", &dir, err))?;
        temp.write_all(contents.as_bytes())
            .and_then(|()| temp.as_file().sync_all())
            .map_err(|err| io_error("write", temp.path(), err))?;

        let permissions = match fs::metadata(&self.path) {
            Ok(metadata) => Some(metadata.permissions()),
            Err(_) => default_permissions(),
        };
        if let Some(permissions) = permissions {
            fs::set_permissions(temp.path(), permissions)
                .map_err(|err| io_error("set permissions on", temp.path(), err))?;
        }

        temp.persist(&self.path)
            .map_err(|err| io_error("replace", &self.path, err.error))?;
        Ok(())
    }
}

impl DurationStore for FileStore {
    fn read(&self, project: &str, branch: &str) -> Result<Duration, StoreError> {
        let _guard = self.lock.lock().unwrap_or_else(PoisonError::into_inner);
        self.read_unlocked(project, branch)
    }

    fn write(&self, project: &str, branch: &str, duration: Duration) -> Result<(), StoreError> {
        validate_key(project, branch)?;
        let _guard = self.lock.lock().unwrap_or_else(PoisonError::into_inner);
        self.write_unlocked(project, branch, duration)
    }

    fn add(&self, project: &str, branch: &str, delta: Duration) -> Result<Duration, StoreError> {
        validate_key(project, branch)?;
        let _guard = self.lock.lock().unwrap_or_else(PoisonError::into_inner);
        let total = self.read_unlocked(project, branch)?.saturating_add(delta);
        self.write_unlocked(project, branch, total)?;
        Ok(gtt_core::round_to_second(total))
    }
}

/// Store used when writing to file is disabled: flushes are logged and dropped.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogOnlyStore;

impl DurationStore for LogOnlyStore {
    fn read(&self, _project: &str, _branch: &str) -> Result<Duration, StoreError> {
        Ok(Duration::ZERO)
    }

    fn write(&self, project: &str, branch: &str, duration: Duration) -> Result<(), StoreError> {
        tracing::info!(project, branch, duration = %format_duration(duration), "not persisted (write_to_file is off)");
        Ok(())
    }

    fn add(&self, project: &str, branch: &str, delta: Duration) -> Result<Duration, StoreError> {
        tracing::info!(project, branch, delta = %format_duration(delta), "not persisted (write_to_file is off)");
        Ok(delta)
    }
}

fn record_prefix(project: &str, branch: &str) -> String {
    format!("{project} | {branch} :")
}

/// Splits `project | branch : value` into its parts.
fn split_record(line: &str) -> Option<(&str, &str, &str)> {
    let (project, rest) = line.split_once(" | ")?;
    let (branch, value) = rest.split_once(" :")?;
    Some((project, branch, value))
}

fn parse_value(project: &str, branch: &str, value: &str) -> Result<Duration, StoreError> {
    parse_duration(value).map_err(|source| StoreError::MalformedDuration {
        project: project.to_string(),
        branch: branch.to_string(),
        value: value.trim().to_string(),
        source,
    })
}

fn io_error(action: &'static str, path: &Path, source: io::Error) -> StoreError {
    StoreError::Io {
        action,
        path: path.to_path_buf(),
        source,
    }
}

#[cfg(unix)]
fn default_permissions() -> Option<fs::Permissions> {
    use std::os::unix::fs::PermissionsExt;
    Some(fs::Permissions::from_mode(0o644))
}

#[cfg(not(unix))]
const fn default_permissions() -> Option<fs::Permissions> {
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::Arc;

    fn secs(n: u64) -> Duration {
        Duration::from_secs(n)
    }

    fn store_in(dir: &tempfile::TempDir) -> FileStore {
        FileStore::new(dir.path().join("time-tracker.txt"))
    }

    #[test]
    fn test_missing_file_reads_zero() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(&dir);
        assert_eq!(store.read("demo", "main").unwrap(), Duration::ZERO);
        assert!(store.records().unwrap().is_empty());
    }

    #[test]
    fn test_write_then_read_rounds_to_second() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(&dir);

        store
            .write("demo", "main", Duration::from_millis(40_600))
            .unwrap();

        assert_eq!(store.read("demo", "main").unwrap(), secs(41));
        assert_eq!(store.read("demo", "feature").unwrap(), Duration::ZERO);
        assert_eq!(
            fs::read_to_string(store.path()).unwrap(),
            "demo | main : 41s\n"
        );
    }

    #[test]
    fn test_write_replaces_line_in_place() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(&dir);
        fs::write(
            store.path(),
            "other | main : 5m0s\ndemo | main : 1s\n# keep me\n",
        )
        .unwrap();

        store.write("demo", "main", secs(40)).unwrap();
        store.write("demo", "main", secs(90)).unwrap();

        assert_eq!(
            fs::read_to_string(store.path()).unwrap(),
            "other | main : 5m0s\ndemo | main : 1m30s\n# keep me\n"
        );
    }

    #[test]
    fn test_write_appends_new_key() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(&dir);
        fs::write(store.path(), "demo | main : 40s").unwrap();

        store.write("demo", "feature", secs(3_700)).unwrap();

        assert_eq!(
            fs::read_to_string(store.path()).unwrap(),
            "demo | main : 40s\ndemo | feature : 1h1m40s\n"
        );
    }

    #[test]
    fn test_prefix_match_does_not_confuse_similar_branches() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(&dir);
        fs::write(store.path(), "demo | main2 : 10s\n").unwrap();

        assert_eq!(store.read("demo", "main").unwrap(), Duration::ZERO);
        store.write("demo", "main", secs(5)).unwrap();
        assert_eq!(store.read("demo", "main2").unwrap(), secs(10));
        assert_eq!(store.records().unwrap().len(), 2);
    }

    #[test]
    fn test_add_accumulates_onto_stored_total() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(&dir);

        assert_eq!(store.add("demo", "main", secs(40)).unwrap(), secs(40));
        assert_eq!(store.add("demo", "main", secs(20)).unwrap(), secs(60));
        assert_eq!(
            fs::read_to_string(store.path()).unwrap(),
            "demo | main : 1m0s\n"
        );
    }

    #[test]
    fn test_malformed_duration_is_a_read_error() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(&dir);
        fs::write(store.path(), "demo | main : soon\nother | main : 5s\n").unwrap();

        let err = store.read("demo", "main").unwrap_err();
        assert!(matches!(err, StoreError::MalformedDuration { ref value, .. } if value == "soon"));
        assert!(store.add("demo", "main", secs(1)).is_err());

        assert_eq!(store.read("other", "main").unwrap(), secs(5));
        assert_eq!(
            fs::read_to_string(store.path()).unwrap(),
            "demo | main : soon\nother | main : 5s\n"
        );
    }

    #[test]
    fn test_records_reports_malformed_lines() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(&dir);
        fs::write(store.path(), "demo | main : 40s\n\nnot a record\n").unwrap();

        let err = store.records().unwrap_err();
        assert!(matches!(err, StoreError::MalformedLine { line_number: 3, .. }));
    }

    #[test]
    fn test_records_in_file_order() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(&dir);
        store.write("zeta", "main", secs(1)).unwrap();
        store.write("alpha", "dev", secs(2)).unwrap();

        let records = store.records().unwrap();
        assert_eq!(
            records,
            vec![
                Record {
                    project: "zeta".to_string(),
                    branch: "main".to_string(),
                    duration: secs(1),
                },
                Record {
                    project: "alpha".to_string(),
                    branch: "dev".to_string(),
                    duration: secs(2),
                },
            ]
        );
    }

    #[test]
    fn test_write_creates_parent_directories() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::new(dir.path().join("nested/deeper/store.txt"));
        store.write("demo", "main", secs(1)).unwrap();
        assert_eq!(store.read("demo", "main").unwrap(), secs(1));
    }

    #[test]
    fn test_invalid_keys_are_rejected_before_touching_file() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(&dir);
        assert!(matches!(
            store.write("de:mo", "main", secs(1)),
            Err(StoreError::InvalidKey { .. })
        ));
        assert!(!store.path().exists());
    }

    #[test]
    fn test_concurrent_adds_are_serialized() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(store_in(&dir));

        let handles: Vec<_> = ["alpha", "beta", "gamma", "delta"]
            .into_iter()
            .map(|project| {
                let store = Arc::clone(&store);
                std::thread::spawn(move || {
                    for _ in 0..10 {
                        store.add(project, "main", secs(1)).unwrap();
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        let records = store.records().unwrap();
        assert_eq!(records.len(), 4);
        assert!(records.iter().all(|record| record.duration == secs(10)));
    }

    #[test]
    fn test_corrupt_record_only_holds_back_its_own_branch() {
        use chrono::{TimeZone, Utc};
        use gtt_core::{FlushOutcome, ManualClock, SampleOutcome, Tracker};

        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(store_in(&dir));
        fs::write(store.path(), "demo | main : garbage\n").unwrap();
        let clock = ManualClock::new(Utc.with_ymd_and_hms(2026, 1, 15, 9, 0, 0).unwrap());
        let tracker = Tracker::with_clock(store.clone(), Arc::new(clock.clone()), secs(20 * 60));

        tracker.sample("demo", "main");
        clock.advance(secs(30));
        assert!(matches!(
            tracker.sample("demo", "feature"),
            SampleOutcome::SwitchDeferred { .. }
        ));
        for _ in 0..5 {
            clock.advance(secs(10 * 60));
            tracker.sample("demo", "feature");
        }

        assert_eq!(
            tracker.force_flush("demo"),
            FlushOutcome::Failed {
                pending: vec![("main".to_string(), secs(30))],
            }
        );
        assert_eq!(tracker.snapshot("demo").unwrap().active_branch, "feature");
        assert_eq!(store.read("demo", "feature").unwrap(), secs(50 * 60));
        assert_eq!(
            fs::read_to_string(store.path()).unwrap(),
            "demo | main : garbage\ndemo | feature : 50m0s\n"
        );
    }

    #[test]
    fn test_log_only_store_never_persists() {
        let store = LogOnlyStore;
        assert_eq!(store.add("demo", "main", secs(30)).unwrap(), secs(30));
        assert_eq!(store.read("demo", "main").unwrap(), Duration::ZERO);
    }
}
