//! Debounced filesystem change aggregation.
//!
//! [`ChangeAggregator::start`] registers a non-recursive watch on every
//! directory under the source root that may hold in-scope entries and
//! spawns a background task. That task is the only owner of the
//! [`PendingChanges`] set: raw events stamp paths with the current time, and
//! on every tick the entries quiet for longer than [`QUIET_WINDOW`] are sent
//! out as one batch of relative paths.
//!
//! At most one batch is in flight. When the consumer has not picked up the
//! previous batch, settled entries go back into the pending set and ride
//! along with the next tick.

mod events;
mod pending;

pub use pending::PendingChanges;

use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use notify::{Event, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::errors::WatchError;
use crate::filter::{self, ScopeRules};

/// How long a path must stay quiet before it is emitted.
pub const QUIET_WINDOW: Duration = Duration::from_secs(1);

const EVENT_BUFFER: usize = 1024;

/// A settled set of changed paths, relative to the source root.
pub type ChangeBatch = Vec<PathBuf>;

/// Timing knobs for the aggregator.
#[derive(Debug, Clone, Copy)]
pub struct AggregatorOptions {
    /// Interval between flushes of the pending set.
    pub tick: Duration,
    /// Minimum age of the last event before a path is flushed.
    pub quiet: Duration,
}

impl AggregatorOptions {
    pub fn new(tick: Duration) -> Self {
        Self {
            tick,
            quiet: QUIET_WINDOW,
        }
    }
}

/// Handle to the running aggregator task.
pub struct ChangeAggregator {
    /// Settled change batches.
    pub batches: mpsc::Receiver<ChangeBatch>,
    /// Non-fatal watcher problems.
    pub diagnostics: mpsc::UnboundedReceiver<WatchError>,
    shutdown: Option<oneshot::Sender<()>>,
    task: JoinHandle<()>,
}

impl ChangeAggregator {
    /// Register watches under `root` and start the aggregation task.
    ///
    /// Must be called from within a tokio runtime. Failing to watch the root
    /// itself is an error; failures below it are reported as diagnostics.
    pub fn start(root: &Path, rules: ScopeRules, options: AggregatorOptions) -> Result<Self, WatchError> {
        let root = root.canonicalize().map_err(|source| WatchError::Scan {
            path: root.to_path_buf(),
            source,
        })?;

        let (event_tx, event_rx) = mpsc::channel::<notify::Result<Event>>(EVENT_BUFFER);
        let watcher = RecommendedWatcher::new(
            move |res| {
                let _ = event_tx.blocking_send(res);
            },
            notify::Config::default(),
        )
        .map_err(WatchError::Create)?;

        let (batch_tx, batches) = mpsc::channel(1);
        let (diag_tx, diagnostics) = mpsc::unbounded_channel();
        let (shutdown_tx, shutdown_rx) = oneshot::channel();

        let mut task = AggregatorTask {
            root: root.clone(),
            rules,
            quiet: options.quiet,
            watcher,
            watched: HashSet::new(),
            pending: PendingChanges::new(),
            batch_tx,
            diag_tx,
        };
        task.register_dir(&root, false)?;
        info!(
            root = %root.display(),
            directories = task.watched.len(),
            tick_ms = options.tick.as_millis() as u64,
            "change aggregator started"
        );

        let task = tokio::spawn(task.run(event_rx, shutdown_rx, options.tick));
        Ok(Self {
            batches,
            diagnostics,
            shutdown: Some(shutdown_tx),
            task,
        })
    }

    /// Stop the task and release every watch.
    pub async fn stop(mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        let _ = (&mut self.task).await;
    }
}

struct AggregatorTask {
    root: PathBuf,
    rules: ScopeRules,
    quiet: Duration,
    watcher: RecommendedWatcher,
    watched: HashSet<PathBuf>,
    pending: PendingChanges,
    batch_tx: mpsc::Sender<ChangeBatch>,
    diag_tx: mpsc::UnboundedSender<WatchError>,
}

impl AggregatorTask {
    async fn run(
        mut self,
        mut events: mpsc::Receiver<notify::Result<Event>>,
        mut shutdown: oneshot::Receiver<()>,
        tick: Duration,
    ) {
        let mut ticker = tokio::time::interval(tick);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    info!("change aggregator stopping");
                    break;
                }
                Some(res) = events.recv() => match res {
                    Ok(event) => self.handle_event(event),
                    Err(e) => {
                        warn!(error = %e, "filesystem watcher error");
                        self.report(WatchError::Event(e));
                    }
                },
                _ = ticker.tick() => {
                    if !self.flush() {
                        debug!("batch receiver dropped");
                        break;
                    }
                }
            }
        }
    }

    fn handle_event(&mut self, event: Event) {
        if !events::is_qualifying(&event.kind) {
            return;
        }
        let now = Instant::now();

        for path in &event.paths {
            let Some(rel) = self.relative(path) else {
                continue;
            };
            if rel.as_os_str().is_empty() || filter::is_vcs_path(&rel) {
                continue;
            }

            match fs::symlink_metadata(path) {
                Err(_) => {
                    // Gone: removed or renamed away.
                    self.watched.retain(|w| !w.starts_with(path));
                    if self.rules.may_contain(&rel) {
                        self.pending.record(path.clone(), now);
                    }
                }
                Ok(meta) if meta.is_dir() => {
                    if !self.rules.may_contain(&rel) {
                        continue;
                    }
                    if events::may_create_dir(&event.kind) && !self.watched.contains(path) {
                        if let Err(e) = self.register_dir(path, true) {
                            warn!(path = %path.display(), error = %e, "failed to watch new directory");
                            self.report(e);
                        }
                    }
                    self.pending.record(path.clone(), now);
                }
                Ok(_) => {
                    if self.rules.in_scope(&rel) {
                        self.pending.record(path.clone(), now);
                    }
                }
            }
        }
    }

    /// Watch `dir` and every directory below it that may hold in-scope
    /// entries. With `record`, entries found are added to the pending set,
    /// catching files created before the watch was in place.
    fn register_dir(&mut self, dir: &Path, record: bool) -> Result<(), WatchError> {
        self.watcher
            .watch(dir, RecursiveMode::NonRecursive)
            .map_err(|source| WatchError::Register {
                path: dir.to_path_buf(),
                source,
            })?;
        self.watched.insert(dir.to_path_buf());
        debug!(path = %dir.display(), "watching directory");

        let entries = fs::read_dir(dir).map_err(|source| WatchError::Scan {
            path: dir.to_path_buf(),
            source,
        })?;
        let now = Instant::now();

        for entry in entries.flatten() {
            let path = entry.path();
            let Some(rel) = self.relative(&path) else {
                continue;
            };
            let Ok(file_type) = entry.file_type() else {
                continue;
            };

            if file_type.is_dir() {
                if !self.rules.may_contain(&rel) || self.watched.contains(&path) {
                    continue;
                }
                if record {
                    self.pending.record(path.clone(), now);
                }
                if let Err(e) = self.register_dir(&path, record) {
                    warn!(path = %path.display(), error = %e, "failed to watch directory");
                    self.report(e);
                }
            } else if record && self.rules.in_scope(&rel) {
                self.pending.record(path, now);
            }
        }
        Ok(())
    }

    /// Hand settled entries to the consumer. Returns `false` once the
    /// consumer is gone.
    fn flush(&mut self) -> bool {
        let settled = self.pending.drain_settled(Instant::now(), self.quiet);
        if settled.is_empty() {
            return true;
        }

        let batch: ChangeBatch = settled
            .iter()
            .filter_map(|(path, _)| self.relative(path))
            .collect();
        let count = batch.len();

        match self.batch_tx.try_send(batch) {
            Ok(()) => {
                debug!(count, "emitted change batch");
                true
            }
            Err(TrySendError::Full(_)) => {
                debug!(count, "previous batch still being processed, holding changes");
                self.pending.restore(settled);
                true
            }
            Err(TrySendError::Closed(_)) => false,
        }
    }

    fn relative(&self, path: &Path) -> Option<PathBuf> {
        path.strip_prefix(&self.root).ok().map(Path::to_path_buf)
    }

    fn report(&self, error: WatchError) {
        let _ = self.diag_tx.send(error);
    }
}
