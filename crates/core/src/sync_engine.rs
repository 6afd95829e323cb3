//! Directory-to-repository synchronization engine.
//!
//! The [`SyncEngine`] sequences each cycle:
//!
//! 1. Reconcile the mirror tree (full walk on startup, a settled batch of
//!    paths afterwards).
//! 2. Pull from the remote; if the merge leaves unmerged paths, run the
//!    conflict resolver.
//! 3. Stage everything, commit with a message derived from the change
//!    summary, push.
//!
//! The engine owns the backend exclusively and runs cycles one at a time:
//! [`SyncEngine::monitor`] moves it onto a blocking task for each batch and
//! only reads the next batch once it is back.

use std::future::Future;
use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, info, warn};

use crate::config::MirrorConfig;
use crate::conflict::{ConflictResolver, StrategyPicker};
use crate::errors::{ConflictError, CoreError, GitError, SyncError};
use crate::git::{GitBackend, PullOutcome, VcsBackend};
use crate::notification::{change_counts, NotificationSink};
use crate::reconcile::{ChangeSummary, ReconcileOutcome, Reconciler};
use crate::report::{self, PlainStyle, ReportStyle, DEFAULT_REPORT_LIMIT, INITIAL_COMMIT_MESSAGE};
use crate::watcher::{AggregatorOptions, ChangeAggregator, ChangeBatch};

// ---------------------------------------------------------------------------
// Sync state machine
// ---------------------------------------------------------------------------

/// Phase of the current cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncState {
    Idle,
    Reconciling,
    Pulling,
    ResolvingConflicts,
    Committing,
    Pushing,
}

impl std::fmt::Display for SyncState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Idle => write!(f, "idle"),
            Self::Reconciling => write!(f, "reconciling"),
            Self::Pulling => write!(f, "pulling"),
            Self::ResolvingConflicts => write!(f, "resolving_conflicts"),
            Self::Committing => write!(f, "committing"),
            Self::Pushing => write!(f, "pushing"),
        }
    }
}

/// Statistics from a single sync cycle.
#[derive(Debug, Clone, Default)]
pub struct SyncStats {
    pub summary: ChangeSummary,
    pub path_failures: usize,
    pub conflicts_detected: usize,
    pub conflicts_resolved: usize,
    /// SHA of the commit created, if any.
    pub commit: Option<String>,
    pub pushed: bool,
    pub started_at: String,
    pub completed_at: Option<String>,
}

/// Receives rendered change-report lines.
pub type ReportWriter = Box<dyn FnMut(&str) + Send>;

// ---------------------------------------------------------------------------
// Engine
// ---------------------------------------------------------------------------

/// The mirror sync engine.
pub struct SyncEngine {
    reconciler: Reconciler,
    backend: Box<dyn VcsBackend>,
    picker: Box<dyn StrategyPicker>,
    notifier: Arc<dyn NotificationSink>,
    resolver: ConflictResolver,
    style: Box<dyn ReportStyle + Send>,
    report_limit: usize,
    report_out: ReportWriter,
    state: SyncState,
    /// Local commits not yet accepted by the remote.
    unpushed: bool,
}

impl SyncEngine {
    /// Create an engine from its parts.
    pub fn new(
        reconciler: Reconciler,
        backend: Box<dyn VcsBackend>,
        picker: Box<dyn StrategyPicker>,
        notifier: Arc<dyn NotificationSink>,
    ) -> Self {
        info!(
            source = %reconciler.source_root().display(),
            mirror = %reconciler.mirror_root().display(),
            "initializing sync engine"
        );
        Self {
            reconciler,
            backend,
            picker,
            notifier,
            resolver: ConflictResolver::new(),
            style: Box::new(PlainStyle),
            report_limit: DEFAULT_REPORT_LIMIT,
            report_out: Box::new(|line: &str| info!("{line}")),
            state: SyncState::Idle,
            unpushed: false,
        }
    }

    /// Build the engine described by `config`: validate the source root,
    /// open or create the repository and configure its remote.
    pub fn from_config(
        config: &MirrorConfig,
        picker: Box<dyn StrategyPicker>,
        notifier: Arc<dyn NotificationSink>,
    ) -> Result<Self, CoreError> {
        config.ensure_source_readable()?;

        let mut backend = GitBackend::open_or_init(
            &config.mirror.repo_dir,
            &config.remote.branch,
            config.commit.author(),
        )?;
        if let Some(url) = &config.remote.url {
            backend.set_remote(url)?;
        }
        if let Some(credentials) = config.remote.credentials() {
            backend.set_credentials(credentials);
        }

        let reconciler = Reconciler::new(
            &config.mirror.source_dir,
            &config.mirror.repo_dir,
            config.scope_rules(),
        )
        .with_prune_stale(config.mirror.prune_stale);

        let mut engine = Self::new(reconciler, Box::new(backend), picker, notifier);
        engine.report_limit = config.mirror.report_limit;
        Ok(engine)
    }

    /// Render change reports with `style`, at most `limit` entries per kind,
    /// handing each line to `out`.
    pub fn with_report(mut self, style: Box<dyn ReportStyle + Send>, limit: usize, out: ReportWriter) -> Self {
        self.style = style;
        self.report_limit = limit;
        self.report_out = out;
        self
    }

    pub fn state(&self) -> SyncState {
        self.state
    }

    pub fn reconciler(&self) -> &Reconciler {
        &self.reconciler
    }

    pub fn backend(&self) -> &dyn VcsBackend {
        self.backend.as_ref()
    }

    fn set_state(&mut self, state: SyncState) {
        debug!(from = %self.state, to = %state, "state transition");
        self.state = state;
    }

    // -----------------------------------------------------------------------
    // Cycles
    // -----------------------------------------------------------------------

    /// Mirror the whole scoped source tree and sync it with a fixed commit
    /// message.
    pub fn initial_sync(&mut self) -> Result<SyncStats, SyncError> {
        let mut stats = new_stats();
        self.set_state(SyncState::Reconciling);

        let outcome = match self.reconciler.initial_sync() {
            Ok(outcome) => outcome,
            Err(e) => {
                self.set_state(SyncState::Idle);
                self.notifier.sync_error(&format!("Initial sync failed: {e}"));
                return Err(e);
            }
        };
        self.absorb(outcome, &mut stats);

        let result = self.sync_with_remote(INITIAL_COMMIT_MESSAGE, &mut stats);
        self.finish(result, &mut stats, || "Initial sync complete".to_string())?;
        Ok(stats)
    }

    /// Reconcile one settled batch of relative paths and sync the result.
    pub fn sync_batch(&mut self, batch: &[std::path::PathBuf]) -> Result<SyncStats, SyncError> {
        let mut stats = new_stats();
        info!(count = batch.len(), "processing change batch");
        self.set_state(SyncState::Reconciling);

        let outcome = self.reconciler.sync_changed(batch);
        self.absorb(outcome, &mut stats);

        let message = report::commit_message(&stats.summary, batch.len());
        let count = batch.len();
        let result = self.sync_with_remote(&message, &mut stats);
        self.finish(result, &mut stats, || format!("Successfully synchronized {count} files"))?;
        Ok(stats)
    }

    /// Report what reconciliation did.
    fn absorb(&mut self, outcome: ReconcileOutcome, stats: &mut SyncStats) {
        for failure in &outcome.failures {
            self.notifier.sync_error(&failure.error.to_string());
        }
        stats.path_failures = outcome.failures.len();

        if !outcome.summary.is_empty() {
            let lines = report::change_report(&outcome.summary, self.report_limit, self.style.as_ref());
            (self.report_out)(&self.style.heading("Changes Detected"));
            for line in &lines {
                (self.report_out)(line);
            }
            self.notifier.file_changes_detected(&change_counts(&outcome.summary));
        }
        stats.summary = outcome.summary;
    }

    fn finish(
        &mut self,
        result: Result<(), SyncError>,
        stats: &mut SyncStats,
        success_message: impl FnOnce() -> String,
    ) -> Result<(), SyncError> {
        self.set_state(SyncState::Idle);
        stats.completed_at = Some(Utc::now().to_rfc3339());

        match result {
            Ok(()) => {
                if stats.pushed {
                    self.notifier.sync_success(&success_message());
                }
                Ok(())
            }
            Err(e) => {
                self.notifier.sync_error(&format!("Failed to sync with remote: {e}"));
                Err(e)
            }
        }
    }

    /// Pull (resolving conflicts), stage, commit and push.
    fn sync_with_remote(&mut self, message: &str, stats: &mut SyncStats) -> Result<(), SyncError> {
        // A previous run may have stopped with unmerged paths.
        let leftover = self
            .backend
            .unmerged_status()
            .map_err(|e| SyncError::Conflict(ConflictError::DetectionFailed(e)))?;
        if !leftover.is_empty() {
            warn!(count = leftover.len(), "repository has unresolved conflicts from an earlier cycle");
            self.resolve_conflicts(stats)?;
        }

        self.set_state(SyncState::Pulling);
        let outcome = match self.backend.pull() {
            Err(GitError::DirtyWorktree(detail)) => {
                debug!(detail, "local changes block the pull, committing them first");
                self.commit_staged(message, stats)?;
                self.set_state(SyncState::Pulling);
                self.backend.pull().map_err(SyncError::Pull)?
            }
            other => other.map_err(SyncError::Pull)?,
        };
        match outcome {
            PullOutcome::Conflicted => self.resolve_conflicts(stats)?,
            PullOutcome::Merged => self.unpushed = true,
            outcome => debug!(?outcome, "pull complete"),
        }

        self.commit_staged(message, stats)?;
        if !self.unpushed {
            return Ok(());
        }

        self.set_state(SyncState::Pushing);
        self.backend.push().map_err(SyncError::Push)?;
        self.unpushed = false;
        stats.pushed = true;
        Ok(())
    }

    /// Stage everything and commit. An unchanged tree is not an error.
    fn commit_staged(&mut self, message: &str, stats: &mut SyncStats) -> Result<(), SyncError> {
        self.set_state(SyncState::Committing);
        self.backend.stage_all().map_err(SyncError::Stage)?;
        match self.backend.commit(message) {
            Ok(sha) => {
                info!(sha = %sha, message, "committed changes");
                stats.commit = Some(sha);
                self.unpushed = true;
                Ok(())
            }
            Err(GitError::NothingToCommit) => {
                info!("No changes to commit");
                Ok(())
            }
            Err(e) => Err(SyncError::Commit(e)),
        }
    }

    fn resolve_conflicts(&mut self, stats: &mut SyncStats) -> Result<(), SyncError> {
        self.set_state(SyncState::ResolvingConflicts);
        let report = self
            .resolver
            .run(self.backend.as_mut(), self.picker.as_mut())?;

        stats.conflicts_detected += report.resolved.len() + report.failures.len();
        stats.conflicts_resolved += report.resolved.len();

        if !report.is_clean() {
            return Err(ConflictError::Unresolved(report.unresolved_paths()).into());
        }
        if !report.resolved.is_empty() {
            info!(count = report.resolved.len(), "all conflicts resolved");
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Steady state
    // -----------------------------------------------------------------------

    /// Watch the source tree and sync every settled batch until `shutdown`
    /// completes. A failing cycle is reported and the loop carries on; the
    /// next batch is the retry.
    pub async fn monitor<F>(self, options: AggregatorOptions, shutdown: F) -> Result<Self, CoreError>
    where
        F: Future<Output = ()>,
    {
        let mut aggregator = ChangeAggregator::start(
            self.reconciler.source_root(),
            self.reconciler.rules().clone(),
            options,
        )?;
        info!("monitoring for changes");

        tokio::pin!(shutdown);
        let mut engine = self;

        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    info!("shutdown requested, stopping monitor");
                    break;
                }
                Some(diagnostic) = aggregator.diagnostics.recv() => {
                    warn!(error = %diagnostic, "watcher error");
                    engine.notifier.sync_error(&format!("Watcher error: {diagnostic}"));
                }
                batch = aggregator.batches.recv() => {
                    let Some(batch) = batch else {
                        warn!("change aggregator stopped unexpectedly");
                        break;
                    };
                    match run_blocking(engine, batch).await {
                        Ok((returned, result)) => {
                            engine = returned;
                            if let Err(e) = result {
                                warn!(error = %e, "sync cycle failed, retrying on next change");
                            }
                        }
                        Err(e) => {
                            aggregator.stop().await;
                            return Err(e.into());
                        }
                    }
                }
            }
        }

        aggregator.stop().await;
        Ok(engine)
    }
}

async fn run_blocking(
    mut engine: SyncEngine,
    batch: ChangeBatch,
) -> Result<(SyncEngine, Result<SyncStats, SyncError>), SyncError> {
    tokio::task::spawn_blocking(move || {
        let result = engine.sync_batch(&batch);
        (engine, result)
    })
    .await
    .map_err(|e| SyncError::TaskAborted(e.to_string()))
}

fn new_stats() -> SyncStats {
    SyncStats {
        started_at: Utc::now().to_rfc3339(),
        ..Default::default()
    }
}
