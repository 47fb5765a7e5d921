//! Scheduling for tracked projects.
//!
//! Each project runs one [`ProjectLoop`] task with two triggers:
//! - a debounced filesystem notification: every change restarts the quiet
//!   window, and the activity sample fires once the window passes untouched
//! - a periodic tick, restarted after every activity sample: if the diff
//!   fingerprint moved since the last look the tick samples, otherwise it
//!   confirms the project is idle and force-flushes
//!
//! git queries and store writes are blocking, so they run on the blocking pool.
//! On shutdown the loops stop first, then every project is flushed once.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use gtt_core::{Fingerprint, FingerprintSource, FlushOutcome, Tracker, format_duration};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinSet;
use tokio::time::{Instant, sleep_until};

use crate::config::Config;
use crate::watch::{RepoWatcher, watch_repository};

/// Buffered changes per project before new ones are dropped.
const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Timer settings shared by every project loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timing {
    pub check_interval: Duration,
    pub debounce: Duration,
}

impl From<&Config> for Timing {
    fn from(config: &Config) -> Self {
        Self {
            check_interval: config.check_interval,
            debounce: config.debounce_interval,
        }
    }
}

/// Restartable quiet-window timer.
#[derive(Debug, Clone)]
pub struct Debounce {
    window: Duration,
    deadline: Option<Instant>,
}

impl Debounce {
    pub const fn new(window: Duration) -> Self {
        Self {
            window,
            deadline: None,
        }
    }

    /// Records an event, pushing the deadline a full window past `now`.
    pub fn touch(&mut self, now: Instant) {
        self.deadline = Some(now + self.window);
    }

    /// When the coalesced callback is due, if an event is pending.
    pub const fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    pub const fn clear(&mut self) {
        self.deadline = None;
    }
}

/// Drives sampling for one project.
pub struct ProjectLoop {
    name: String,
    path: PathBuf,
    tracker: Arc<Tracker>,
    source: Arc<dyn FingerprintSource>,
    timing: Timing,
    last_fingerprint: Option<Fingerprint>,
}

impl ProjectLoop {
    pub fn new(
        name: impl Into<String>,
        path: impl Into<PathBuf>,
        tracker: Arc<Tracker>,
        source: Arc<dyn FingerprintSource>,
        timing: Timing,
    ) -> Self {
        Self {
            name: name.into(),
            path: path.into(),
            tracker,
            source,
            timing,
            last_fingerprint: None,
        }
    }

    /// Runs until `shutdown` turns true or its sender goes away.
    pub async fn run(
        mut self,
        mut events: mpsc::Receiver<PathBuf>,
        mut shutdown: watch::Receiver<bool>,
    ) {
        self.last_fingerprint = self.fingerprint().await;

        let mut debounce = Debounce::new(self.timing.debounce);
        let mut events_open = true;
        let tick = tokio::time::sleep(self.timing.check_interval);
        tokio::pin!(tick);

        loop {
            tokio::select! {
                biased;

                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        if debounce.deadline().is_some() {
                            tracing::debug!(project = %self.name, "sampling pending change before stop");
                            self.on_activity().await;
                        }
                        break;
                    }
                }
                event = events.recv(), if events_open => match event {
                    Some(path) => {
                        tracing::trace!(project = %self.name, path = %path.display(), "change");
                        debounce.touch(Instant::now());
                    }
                    None => {
                        tracing::debug!(project = %self.name, "watcher closed, ticks only");
                        events_open = false;
                    }
                },
                () = sleep_until(debounce.deadline().unwrap_or_else(Instant::now)),
                    if debounce.deadline().is_some() =>
                {
                    debounce.clear();
                    self.on_activity().await;
                    tick.as_mut().reset(Instant::now() + self.timing.check_interval);
                }
                () = &mut tick => {
                    self.on_tick().await;
                    tick.as_mut().reset(Instant::now() + self.timing.check_interval);
                }
            }
        }

        tracing::debug!(project = %self.name, "project loop stopped");
    }

    /// Samples the current branch and refreshes the fingerprint baseline.
    async fn on_activity(&mut self) {
        let tracker = Arc::clone(&self.tracker);
        let source = Arc::clone(&self.source);
        let name = self.name.clone();
        let path = self.path.clone();

        let sampled = blocking(&self.name, move || {
            // Failures are logged by the tracker; the next trigger retries.
            let _ = tracker.sample_from(&name, source.as_ref(), &path);
            source.status_fingerprint(&path).ok()
        })
        .await;

        if let Some(fingerprint) = sampled.flatten() {
            self.last_fingerprint = Some(fingerprint);
        }
    }

    /// Samples if the content moved since the last look, flushes otherwise.
    async fn on_tick(&mut self) {
        let current = self.fingerprint().await;
        let changed = current.is_some() && current != self.last_fingerprint;

        if changed {
            tracing::debug!(project = %self.name, "fingerprint changed since last check");
            self.last_fingerprint = current;
            self.on_activity().await;
            return;
        }

        let tracker = Arc::clone(&self.tracker);
        let name = self.name.clone();
        blocking(&self.name, move || tracker.force_flush(&name)).await;
    }

    async fn fingerprint(&self) -> Option<Fingerprint> {
        let source = Arc::clone(&self.source);
        let path = self.path.clone();
        let name = self.name.clone();

        blocking(&self.name, move || {
            source
                .status_fingerprint(&path)
                .inspect_err(|err| {
                    tracing::warn!(project = %name, path = %path.display(), error = %err, "fingerprint query failed");
                })
                .ok()
        })
        .await
        .flatten()
    }
}

/// Runs `f` on the blocking pool, logging a panicked task.
async fn blocking<T, F>(project: &str, f: F) -> Option<T>
where
    T: Send + 'static,
    F: FnOnce() -> T + Send + 'static,
{
    match tokio::task::spawn_blocking(f).await {
        Ok(value) => Some(value),
        Err(err) => {
            tracing::error!(project, error = %err, "blocking task failed");
            None
        }
    }
}

/// Watches and samples every configured repository until a termination signal
/// arrives, then flushes everything.
pub async fn run(
    config: &Config,
    tracker: Arc<Tracker>,
    source: Arc<dyn FingerprintSource>,
) -> Result<Vec<(String, FlushOutcome)>> {
    let timing = Timing::from(config);
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let mut tasks = JoinSet::new();
    let mut watchers = Vec::with_capacity(config.repositories.len());

    for (name, repository) in &config.repositories {
        let (tx, rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        let watcher = watch_repository(name, &repository.path, repository.exclude.clone(), tx)
            .with_context(|| format!("failed to watch repository {name:?}"))?;
        watchers.push(watcher);

        let project = ProjectLoop::new(
            name.clone(),
            repository.path.clone(),
            Arc::clone(&tracker),
            Arc::clone(&source),
            timing,
        );
        tasks.spawn(project.run(rx, shutdown_rx.clone()));

        tracing::info!(
            project = %name,
            path = %repository.path.display(),
            check_interval = %format_duration(timing.check_interval),
            "tracking"
        );
    }

    println!("Tracking {} project(s). Press Ctrl+C or send SIGTERM to stop.", watchers.len());

    shutdown_signal()
        .await
        .context("failed to listen for termination signals")?;
    tracing::info!("termination signal received");

    shutdown(shutdown_tx, tasks, watchers, tracker).await
}

/// Stops every project loop, then force-flushes every tracked project.
///
/// Notifications stop first so no sample can race the final flush. Loops
/// sample any change still inside its debounce window before they stop.
pub async fn shutdown(
    shutdown_tx: watch::Sender<bool>,
    mut tasks: JoinSet<()>,
    watchers: Vec<RepoWatcher>,
    tracker: Arc<Tracker>,
) -> Result<Vec<(String, FlushOutcome)>> {
    drop(watchers);
    let _ = shutdown_tx.send(true);
    while let Some(joined) = tasks.join_next().await {
        if let Err(err) = joined {
            tracing::error!(error = %err, "project loop ended abnormally");
        }
    }

    let outcomes = tokio::task::spawn_blocking(move || tracker.flush_all())
        .await
        .context("final flush did not complete")?;

    for (project, outcome) in &outcomes {
        if let FlushOutcome::Failed { pending } = outcome {
            for (branch, duration) in pending {
                tracing::error!(
                    project = %project,
                    branch = %branch,
                    lost = %format_duration(*duration),
                    "final flush failed"
                );
            }
        }
    }
    Ok(outcomes)
}

/// Resolves on Ctrl-C, or SIGTERM on unix.
async fn shutdown_signal() -> std::io::Result<()> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};

        let mut terminate = signal(SignalKind::terminate())?;
        tokio::select! {
            result = tokio::signal::ctrl_c() => result,
            _ = terminate.recv() => Ok(()),
        }
    }

    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::path::Path;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use chrono::{TimeZone, Utc};
    use gtt_core::{DurationStore, ManualClock, MemoryStore, SourceError, StoreError};

    /// Source on branch `main` whose fingerprint is fixed or changes on every call.
    #[derive(Default)]
    struct ScriptedSource {
        churning: bool,
        branch_calls: AtomicUsize,
        fingerprint_calls: AtomicUsize,
    }

    impl ScriptedSource {
        fn churning() -> Self {
            Self {
                churning: true,
                ..Self::default()
            }
        }

        fn branch_calls(&self) -> usize {
            self.branch_calls.load(Ordering::SeqCst)
        }
    }

    impl FingerprintSource for ScriptedSource {
        fn status_fingerprint(&self, _path: &Path) -> Result<Fingerprint, SourceError> {
            let call = self.fingerprint_calls.fetch_add(1, Ordering::SeqCst);
            let token = if self.churning { call } else { 0 };
            Ok(Fingerprint::new(format!("fp-{token}")))
        }

        fn current_branch(&self, _path: &Path) -> Result<String, SourceError> {
            self.branch_calls.fetch_add(1, Ordering::SeqCst);
            Ok("main".to_string())
        }
    }

    fn tracker_with(store: Arc<MemoryStore>, clock: &ManualClock) -> Arc<Tracker> {
        Arc::new(Tracker::with_clock(
            store,
            Arc::new(clock.clone()),
            Duration::from_secs(20 * 60),
        ))
    }

    fn clock() -> ManualClock {
        ManualClock::new(Utc.with_ymd_and_hms(2026, 1, 15, 9, 0, 0).unwrap())
    }

    fn spawn_loop(
        tracker: Arc<Tracker>,
        source: Arc<ScriptedSource>,
        timing: Timing,
    ) -> (
        mpsc::Sender<PathBuf>,
        watch::Sender<bool>,
        tokio::task::JoinHandle<()>,
    ) {
        let (tx, rx) = mpsc::channel(16);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let project = ProjectLoop::new("demo", "/work/demo", tracker, source, timing);
        let handle = tokio::spawn(project.run(rx, shutdown_rx));
        (tx, shutdown_tx, handle)
    }

    #[test]
    fn test_debounce_restarts_window_on_every_touch() {
        let start = Instant::now();
        let mut debounce = Debounce::new(Duration::from_secs(5));
        assert_eq!(debounce.deadline(), None);

        debounce.touch(start);
        debounce.touch(start + Duration::from_secs(3));
        assert_eq!(debounce.deadline(), Some(start + Duration::from_secs(8)));

        debounce.clear();
        assert_eq!(debounce.deadline(), None);
    }

    #[tokio::test]
    async fn test_burst_of_changes_samples_once() {
        let store = Arc::new(MemoryStore::new());
        let tracker = tracker_with(store, &clock());
        let source = Arc::new(ScriptedSource::default());
        let timing = Timing {
            check_interval: Duration::from_secs(3600),
            debounce: Duration::from_millis(250),
        };
        let (tx, shutdown_tx, handle) = spawn_loop(Arc::clone(&tracker), source.clone(), timing);

        for i in 0..5 {
            tx.send(PathBuf::from(format!("/work/demo/file{i}.rs")))
                .await
                .unwrap();
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        tokio::time::sleep(Duration::from_millis(750)).await;

        assert_eq!(source.branch_calls(), 1);
        assert_eq!(tracker.snapshot("demo").unwrap().active_branch, "main");

        shutdown_tx.send(true).unwrap();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn test_idle_tick_force_flushes() {
        let store = Arc::new(MemoryStore::new());
        let clock = clock();
        let tracker = tracker_with(store.clone(), &clock);
        tracker.sample("demo", "main");
        clock.advance(Duration::from_secs(30));
        tracker.sample("demo", "main");

        let source = Arc::new(ScriptedSource::default());
        let timing = Timing {
            check_interval: Duration::from_millis(100),
            debounce: Duration::from_secs(3600),
        };
        let (_tx, shutdown_tx, handle) = spawn_loop(Arc::clone(&tracker), source.clone(), timing);

        tokio::time::sleep(Duration::from_millis(400)).await;

        assert_eq!(store.read("demo", "main").unwrap(), Duration::from_secs(30));
        assert_eq!(source.branch_calls(), 0);

        shutdown_tx.send(true).unwrap();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn test_tick_samples_when_fingerprint_moved() {
        let store = Arc::new(MemoryStore::new());
        let tracker = tracker_with(store.clone(), &clock());
        let source = Arc::new(ScriptedSource::churning());
        let timing = Timing {
            check_interval: Duration::from_millis(100),
            debounce: Duration::from_secs(3600),
        };
        let (_tx, shutdown_tx, handle) = spawn_loop(Arc::clone(&tracker), source.clone(), timing);

        tokio::time::sleep(Duration::from_millis(400)).await;

        assert!(source.branch_calls() >= 1);
        assert!(tracker.snapshot("demo").is_some());
        assert_eq!(store.writes(), 0);

        shutdown_tx.send(true).unwrap();
        handle.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_activity_sample_restarts_tick() {
        let store = Arc::new(MemoryStore::new());
        let clock = clock();
        let tracker = tracker_with(store.clone(), &clock);
        tracker.sample("demo", "main");
        clock.advance(Duration::from_secs(30));

        let source = Arc::new(ScriptedSource::default());
        let timing = Timing {
            check_interval: Duration::from_secs(10),
            debounce: Duration::from_secs(1),
        };
        let (tx, shutdown_tx, handle) = spawn_loop(Arc::clone(&tracker), source.clone(), timing);

        // The sample lands at 9.5s, just before the first tick is due at 10s.
        tokio::time::sleep(Duration::from_millis(8500)).await;
        tx.send(PathBuf::from("/work/demo/src/lib.rs")).await.unwrap();

        tokio::time::sleep(Duration::from_millis(6500)).await;
        assert_eq!(source.branch_calls(), 1);
        assert_eq!(tracker.snapshot("demo").unwrap().active_time, Duration::from_secs(30));
        assert_eq!(store.writes(), 0);

        // The restarted tick is due a full interval after the sample, at 19.5s.
        tokio::time::sleep(Duration::from_secs(6)).await;
        assert_eq!(store.read("demo", "main").unwrap(), Duration::from_secs(30));
        assert_eq!(store.writes(), 1);

        shutdown_tx.send(true).unwrap();
        handle.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_samples_change_inside_debounce_window() {
        let store = Arc::new(MemoryStore::new());
        let clock = clock();
        let tracker = tracker_with(store.clone(), &clock);
        tracker.sample("demo", "main");
        clock.advance(Duration::from_secs(15 * 60));

        let source = Arc::new(ScriptedSource::default());
        let timing = Timing {
            check_interval: Duration::from_secs(3600),
            debounce: Duration::from_millis(500),
        };
        let (tx, rx) = mpsc::channel(16);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let mut tasks = JoinSet::new();
        tasks.spawn(
            ProjectLoop::new(
                "demo",
                "/work/demo",
                Arc::clone(&tracker),
                source.clone(),
                timing,
            )
            .run(rx, shutdown_rx),
        );

        tx.send(PathBuf::from("/work/demo/src/main.rs")).await.unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;
        let outcomes = shutdown(shutdown_tx, tasks, Vec::new(), Arc::clone(&tracker))
            .await
            .unwrap();

        assert_eq!(source.branch_calls(), 1);
        assert_eq!(
            outcomes,
            vec![(
                "demo".to_string(),
                FlushOutcome::Flushed {
                    branch: "main".to_string(),
                    flushed: Duration::from_secs(15 * 60),
                    total: Duration::from_secs(15 * 60),
                }
            )]
        );
        assert_eq!(
            store.read("demo", "main").unwrap(),
            Duration::from_secs(15 * 60)
        );
    }

    /// Store that panics on every write.
    struct PanickingStore;

    impl DurationStore for PanickingStore {
        fn read(&self, _project: &str, _branch: &str) -> Result<Duration, StoreError> {
            Ok(Duration::ZERO)
        }

        fn write(&self, _project: &str, _branch: &str, _duration: Duration) -> Result<(), StoreError> {
            panic!("store exploded");
        }

        fn add(&self, _project: &str, _branch: &str, _delta: Duration) -> Result<Duration, StoreError> {
            panic!("store exploded");
        }
    }

    #[tokio::test]
    async fn test_shutdown_reports_a_crashed_final_flush() {
        let clock = clock();
        let tracker = Arc::new(Tracker::with_clock(
            Arc::new(PanickingStore),
            Arc::new(clock.clone()),
            Duration::from_secs(20 * 60),
        ));
        tracker.sample("demo", "main");
        clock.advance(Duration::from_secs(45));
        tracker.sample("demo", "main");

        let (shutdown_tx, _shutdown_rx) = watch::channel(false);
        let err = shutdown(shutdown_tx, JoinSet::new(), Vec::new(), tracker)
            .await
            .unwrap_err();

        assert!(err.to_string().contains("final flush did not complete"));
    }

    #[tokio::test]
    async fn test_loop_stops_when_shutdown_sender_drops() {
        let tracker = tracker_with(Arc::new(MemoryStore::new()), &clock());
        let timing = Timing {
            check_interval: Duration::from_secs(3600),
            debounce: Duration::from_secs(1),
        };
        let (_tx, shutdown_tx, handle) =
            spawn_loop(tracker, Arc::new(ScriptedSource::default()), timing);

        drop(shutdown_tx);

        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn test_shutdown_stops_loops_then_flushes_everything() {
        let store = Arc::new(MemoryStore::new());
        let clock = clock();
        let tracker = tracker_with(store.clone(), &clock);
        tracker.sample("demo", "main");
        tracker.sample("other", "develop");
        clock.advance(Duration::from_secs(45));
        tracker.sample("demo", "main");
        tracker.sample("other", "develop");

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let mut tasks = JoinSet::new();
        let (_tx, rx) = mpsc::channel(1);
        let timing = Timing {
            check_interval: Duration::from_secs(3600),
            debounce: Duration::from_secs(1),
        };
        tasks.spawn(
            ProjectLoop::new(
                "demo",
                "/work/demo",
                Arc::clone(&tracker),
                Arc::new(ScriptedSource::default()),
                timing,
            )
            .run(rx, shutdown_rx),
        );

        let outcomes = shutdown(shutdown_tx, tasks, Vec::new(), tracker)
            .await
            .unwrap();

        assert_eq!(outcomes.len(), 2);
        assert_eq!(store.read("demo", "main").unwrap(), Duration::from_secs(45));
        assert_eq!(store.read("other", "develop").unwrap(), Duration::from_secs(45));
    }
}
