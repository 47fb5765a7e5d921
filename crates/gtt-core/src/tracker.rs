//! Activity tracker.
//!
//! Keeps one [`TrackedProject`] per project name and decides, on every sample,
//! whether elapsed time is folded into the accumulator, flushed to the
//! [`DurationStore`] because the branch changed, or flushed because the
//! project went idle.
//!
//! # Locking
//!
//! The project map has its own lock, held only to look up or insert an entry.
//! Each entry has a separate lock held for the whole of a `sample` or
//! `force_flush`, so calls for one project are totally ordered while unrelated
//! projects never wait on each other. The store serializes its own file access.
//!
//! # Failed flushes
//!
//! Time that could not be written stays in memory. Time on the active branch
//! stays in `active_time`. Time from a branch the project already left moves to
//! `unflushed`, keyed by branch, and every later flush retries it. A record that
//! can never be written therefore holds back only its own time, never tracking
//! on the branches that follow.
//!
//! # Idle cap
//!
//! No single elapsed gap is credited beyond the idle cap (the check interval
//! by default). A laptop that slept for an hour, or a repository left alone
//! for longer than the sampling cadence, contributes at most one cap.

use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::clock::{Clock, SystemClock, elapsed_between};
use crate::duration::format_duration;
use crate::source::{FingerprintSource, SourceError};
use crate::store::DurationStore;

/// In-memory accounting state for one project.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackedProject {
    pub project_name: String,
    /// Branch the pending `active_time` belongs to.
    pub active_branch: String,
    /// Time accrued since the last successful flush.
    pub active_time: Duration,
    /// When `active_time` was last brought up to date.
    pub last_sample: DateTime<Utc>,
    /// Time from earlier branches whose flush failed, awaiting a retry.
    pub unflushed: BTreeMap<String, Duration>,
}

impl TrackedProject {
    fn new(project_name: &str, branch: &str, now: DateTime<Utc>) -> Self {
        Self {
            project_name: project_name.to_string(),
            active_branch: branch.to_string(),
            active_time: Duration::ZERO,
            last_sample: now,
            unflushed: BTreeMap::new(),
        }
    }

    /// Moves `duration` of `branch` time to the retry set.
    fn carry(&mut self, branch: String, duration: Duration) {
        let slot = self.unflushed.entry(branch).or_default();
        *slot = slot.saturating_add(duration);
    }

    /// Everything not yet written: carried branches first, then the active one.
    fn pending(&self) -> Vec<(String, Duration)> {
        let mut pending: Vec<(String, Duration)> = self
            .unflushed
            .iter()
            .map(|(branch, duration)| (branch.clone(), *duration))
            .collect();
        if !self.active_time.is_zero() {
            pending.push((self.active_branch.clone(), self.active_time));
        }
        pending
    }

    /// Folds the time since `last_sample`, capped at `cap`, into `active_time`.
    fn fold(&mut self, now: DateTime<Utc>, cap: Duration) -> Duration {
        let credited = elapsed_between(self.last_sample, now).min(cap);
        self.active_time = self.active_time.saturating_add(credited);
        self.last_sample = now;
        credited
    }
}

/// What a call to [`Tracker::sample`] did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SampleOutcome {
    /// First sample for the project; state was created and nothing credited.
    Started { branch: String },
    /// Same branch as before; elapsed time was added to the accumulator.
    Accrued { active_time: Duration },
    /// The branch changed; the old branch's time was flushed.
    Switched {
        from: String,
        to: String,
        flushed: Duration,
        total: Duration,
    },
    /// The branch changed but the old branch's flush failed. The tracker moved
    /// to the new branch; the old time is carried and retried on later flushes.
    SwitchDeferred {
        from: String,
        to: String,
        pending: Duration,
    },
}

/// What a call to [`Tracker::force_flush`] did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FlushOutcome {
    /// Unknown project, or nothing accrued on the active branch and nothing
    /// left to retry.
    Idle,
    /// The active branch's time was written and nothing is left pending.
    Flushed {
        branch: String,
        flushed: Duration,
        total: Duration,
    },
    /// Some time could not be written. Lists every branch still pending.
    Failed { pending: Vec<(String, Duration)> },
}

/// Registry of tracked projects plus the flush policy.
///
/// Constructed once by the driver and shared by `Arc` with every sampler.
pub struct Tracker {
    store: Arc<dyn DurationStore>,
    clock: Arc<dyn Clock>,
    idle_cap: Duration,
    projects: Mutex<HashMap<String, Arc<Mutex<TrackedProject>>>>,
}

impl Tracker {
    /// Creates a tracker on the system clock.
    pub fn new(store: Arc<dyn DurationStore>, idle_cap: Duration) -> Self {
        Self::with_clock(store, Arc::new(SystemClock), idle_cap)
    }

    pub fn with_clock(
        store: Arc<dyn DurationStore>,
        clock: Arc<dyn Clock>,
        idle_cap: Duration,
    ) -> Self {
        Self {
            store,
            clock,
            idle_cap,
            projects: Mutex::new(HashMap::new()),
        }
    }

    pub const fn idle_cap(&self) -> Duration {
        self.idle_cap
    }

    /// Queries `source` for the current branch of `path`, then samples.
    ///
    /// A failed query leaves the tracker untouched.
    pub fn sample_from(
        &self,
        project: &str,
        source: &dyn FingerprintSource,
        path: &Path,
    ) -> Result<SampleOutcome, SourceError> {
        let branch = source.current_branch(path).inspect_err(|err| {
            tracing::warn!(project, path = %path.display(), error = %err, "branch query failed");
        })?;
        Ok(self.sample(project, &branch))
    }

    /// Records activity on `branch` for `project`.
    pub fn sample(&self, project: &str, branch: &str) -> SampleOutcome {
        let Some(entry) = self.get_or_start(project, branch) else {
            tracing::debug!(project, branch, "started tracking");
            return SampleOutcome::Started {
                branch: branch.to_string(),
            };
        };

        let mut state = lock(&entry);
        let now = self.clock.now();
        state.fold(now, self.idle_cap);

        if state.active_branch == branch {
            tracing::debug!(
                project,
                branch,
                active = %format_duration(state.active_time),
                "activity accrued"
            );
            return SampleOutcome::Accrued {
                active_time: state.active_time,
            };
        }

        let from = std::mem::replace(&mut state.active_branch, branch.to_string());
        let pending = std::mem::take(&mut state.active_time);
        self.retry_unflushed(project, &mut state);
        if pending.is_zero() {
            tracing::info!(project, from = %from, to = branch, "branch changed");
            return SampleOutcome::Switched {
                from,
                to: branch.to_string(),
                flushed: Duration::ZERO,
                total: Duration::ZERO,
            };
        }

        match self.store.add(project, &from, pending) {
            Ok(total) => {
                tracing::info!(
                    project,
                    from = %from,
                    to = branch,
                    flushed = %format_duration(pending),
                    total = %format_duration(total),
                    "branch changed, time flushed"
                );
                SampleOutcome::Switched {
                    from,
                    to: branch.to_string(),
                    flushed: pending,
                    total,
                }
            }
            Err(err) => {
                tracing::warn!(
                    project,
                    branch = %from,
                    pending = %format_duration(pending),
                    error = %err,
                    "flush on branch change failed, time carried for retry"
                );
                state.carry(from.clone(), pending);
                SampleOutcome::SwitchDeferred {
                    from,
                    to: branch.to_string(),
                    pending,
                }
            }
        }
    }

    /// Flushes accrued time for `project`, crediting the idle gap up to the cap.
    pub fn force_flush(&self, project: &str) -> FlushOutcome {
        let Some(entry) = self.get(project) else {
            return FlushOutcome::Idle;
        };

        let mut state = lock(&entry);
        if state.active_time.is_zero() && state.unflushed.is_empty() {
            return FlushOutcome::Idle;
        }

        self.retry_unflushed(project, &mut state);

        let mut outcome = FlushOutcome::Idle;
        if !state.active_time.is_zero() {
            let now = self.clock.now();
            let credited = state.fold(now, self.idle_cap);
            let branch = state.active_branch.clone();
            let pending = state.active_time;

            match self.store.add(project, &branch, pending) {
                Ok(total) => {
                    state.active_time = Duration::ZERO;
                    tracing::info!(
                        project,
                        branch = %branch,
                        idle = %format_duration(credited),
                        flushed = %format_duration(pending),
                        total = %format_duration(total),
                        "time flushed"
                    );
                    outcome = FlushOutcome::Flushed {
                        branch,
                        flushed: pending,
                        total,
                    };
                }
                Err(err) => {
                    tracing::warn!(
                        project,
                        branch = %branch,
                        pending = %format_duration(pending),
                        error = %err,
                        "flush failed, time kept pending"
                    );
                }
            }
        }

        let pending = state.pending();
        if pending.is_empty() {
            outcome
        } else {
            FlushOutcome::Failed { pending }
        }
    }

    /// Retries carried time from earlier branches, dropping what gets written.
    fn retry_unflushed(&self, project: &str, state: &mut TrackedProject) {
        state.unflushed.retain(|branch, duration| {
            match self.store.add(project, branch, *duration) {
                Ok(total) => {
                    tracing::info!(
                        project,
                        branch = %branch,
                        flushed = %format_duration(*duration),
                        total = %format_duration(total),
                        "carried time flushed"
                    );
                    false
                }
                Err(err) => {
                    tracing::warn!(
                        project,
                        branch = %branch,
                        pending = %format_duration(*duration),
                        error = %err,
                        "carried time still unwritable"
                    );
                    true
                }
            }
        });
    }

    /// Force-flushes every tracked project, in name order.
    pub fn flush_all(&self) -> Vec<(String, FlushOutcome)> {
        self.project_names()
            .into_iter()
            .map(|name| {
                let outcome = self.force_flush(&name);
                (name, outcome)
            })
            .collect()
    }

    /// A copy of the current state for `project`.
    pub fn snapshot(&self, project: &str) -> Option<TrackedProject> {
        self.get(project).map(|entry| lock(&entry).clone())
    }

    /// Names of all tracked projects, sorted.
    pub fn project_names(&self) -> Vec<String> {
        let mut names: Vec<String> = lock(&self.projects).keys().cloned().collect();
        names.sort();
        names
    }

    fn get(&self, project: &str) -> Option<Arc<Mutex<TrackedProject>>> {
        lock(&self.projects).get(project).cloned()
    }

    /// Returns the existing entry, or inserts a fresh one and returns `None`.
    fn get_or_start(&self, project: &str, branch: &str) -> Option<Arc<Mutex<TrackedProject>>> {
        let mut projects = lock(&self.projects);
        if let Some(entry) = projects.get(project) {
            return Some(Arc::clone(entry));
        }
        let state = TrackedProject::new(project, branch, self.clock.now());
        projects.insert(project.to_string(), Arc::new(Mutex::new(state)));
        None
    }
}

/// Locks a mutex, recovering the data if a previous holder panicked.
fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
