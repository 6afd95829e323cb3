//! Reconciliation of the mirror tree against the source tree.
//!
//! [`Reconciler::initial_sync`] walks the whole scoped source tree;
//! [`Reconciler::sync_changed`] handles a debounced batch of relative paths.
//! Both produce a [`ChangeSummary`] describing what was added, modified or
//! deleted in the mirror. Per-path failures are collected in the
//! [`ReconcileOutcome`] instead of aborting the batch.

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};

use crate::errors::{MirrorError, SyncError};
use crate::filter::{self, ScopeRules};
use crate::mirror::{self, CopyOutcome, RemovedEntry};

// ---------------------------------------------------------------------------
// Change summary
// ---------------------------------------------------------------------------

/// The operation applied to a mirror entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChangeKind {
    Added,
    Modified,
    Deleted,
}

impl ChangeKind {
    /// All kinds in reporting order.
    pub const ALL: [ChangeKind; 3] = [ChangeKind::Added, ChangeKind::Modified, ChangeKind::Deleted];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Added => "added",
            Self::Modified => "modified",
            Self::Deleted => "deleted",
        }
    }
}

impl fmt::Display for ChangeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One changed mirror entry, relative to the roots.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangedPath {
    pub path: PathBuf,
    pub is_dir: bool,
}

impl fmt::Display for ChangedPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_dir {
            write!(f, "dir: {}", filter::to_slash(&self.path))
        } else {
            f.write_str(&filter::to_slash(&self.path))
        }
    }
}

/// Changed paths grouped by operation kind, in the order they were applied.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChangeSummary {
    added: Vec<ChangedPath>,
    modified: Vec<ChangedPath>,
    deleted: Vec<ChangedPath>,
}

impl ChangeSummary {
    pub fn record(&mut self, kind: ChangeKind, path: impl Into<PathBuf>, is_dir: bool) {
        let entry = ChangedPath {
            path: path.into(),
            is_dir,
        };
        match kind {
            ChangeKind::Added => self.added.push(entry),
            ChangeKind::Modified => self.modified.push(entry),
            ChangeKind::Deleted => self.deleted.push(entry),
        }
    }

    pub fn paths(&self, kind: ChangeKind) -> &[ChangedPath] {
        match kind {
            ChangeKind::Added => &self.added,
            ChangeKind::Modified => &self.modified,
            ChangeKind::Deleted => &self.deleted,
        }
    }

    pub fn count(&self, kind: ChangeKind) -> usize {
        self.paths(kind).len()
    }

    pub fn total(&self) -> usize {
        self.added.len() + self.modified.len() + self.deleted.len()
    }

    pub fn is_empty(&self) -> bool {
        self.total() == 0
    }
}

/// A path whose mirror operation failed.
#[derive(Debug)]
pub struct PathFailure {
    pub path: PathBuf,
    pub error: MirrorError,
}

/// Result of a reconciliation pass.
#[derive(Debug, Default)]
pub struct ReconcileOutcome {
    pub summary: ChangeSummary,
    pub failures: Vec<PathFailure>,
}

impl ReconcileOutcome {
    fn fail(&mut self, path: &Path, error: MirrorError) {
        warn!(path = %path.display(), error = %error, "mirror operation failed");
        self.failures.push(PathFailure {
            path: path.to_path_buf(),
            error,
        });
    }
}

// ---------------------------------------------------------------------------
// Reconciler
// ---------------------------------------------------------------------------

/// Brings the mirror tree into agreement with the source tree.
#[derive(Debug, Clone)]
pub struct Reconciler {
    source_root: PathBuf,
    mirror_root: PathBuf,
    rules: ScopeRules,
    prune_stale: bool,
}

impl Reconciler {
    pub fn new(source_root: impl Into<PathBuf>, mirror_root: impl Into<PathBuf>, rules: ScopeRules) -> Self {
        Self {
            source_root: source_root.into(),
            mirror_root: mirror_root.into(),
            rules,
            prune_stale: false,
        }
    }

    /// Remove mirror entries with no in-scope source counterpart during
    /// [`initial_sync`](Self::initial_sync).
    pub fn with_prune_stale(mut self, prune: bool) -> Self {
        self.prune_stale = prune;
        self
    }

    pub fn source_root(&self) -> &Path {
        &self.source_root
    }

    pub fn mirror_root(&self) -> &Path {
        &self.mirror_root
    }

    pub fn rules(&self) -> &ScopeRules {
        &self.rules
    }

    /// Mirror the whole scoped source tree.
    ///
    /// Failing to enumerate any source directory aborts the walk.
    pub fn initial_sync(&self) -> Result<ReconcileOutcome, SyncError> {
        info!(
            source = %self.source_root.display(),
            mirror = %self.mirror_root.display(),
            "starting full reconciliation"
        );

        fs::create_dir_all(&self.mirror_root)
            .map_err(|e| MirrorError::new("create directory", &self.mirror_root, e))?;

        let mut outcome = ReconcileOutcome::default();
        self.walk_source(Path::new(""), &mut outcome)?;
        if self.prune_stale {
            self.sweep_mirror(Path::new(""), &mut outcome)?;
        }

        info!(
            added = outcome.summary.count(ChangeKind::Added),
            modified = outcome.summary.count(ChangeKind::Modified),
            deleted = outcome.summary.count(ChangeKind::Deleted),
            failures = outcome.failures.len(),
            "full reconciliation complete"
        );
        Ok(outcome)
    }

    /// Reconcile a batch of relative paths. Each path is handled
    /// independently; the order of `paths` does not affect the result.
    pub fn sync_changed(&self, paths: &[PathBuf]) -> ReconcileOutcome {
        let mut outcome = ReconcileOutcome::default();
        for rel in paths {
            if rel.as_os_str().is_empty() || filter::is_vcs_path(rel) {
                continue;
            }
            self.reconcile_path(rel, &mut outcome);
        }
        outcome
    }

    fn reconcile_path(&self, rel: &Path, outcome: &mut ReconcileOutcome) {
        let src = self.source_root.join(rel);
        let dst = self.mirror_root.join(rel);

        let src_meta = match fs::metadata(&src) {
            Ok(meta) => Some(meta),
            Err(e) if mirror::is_absent(&e) => None,
            Err(e) => {
                outcome.fail(rel, MirrorError::new("stat", &src, e));
                return;
            }
        };

        match src_meta {
            None => self.remove_from_mirror(rel, &dst, outcome),
            Some(meta) if meta.is_dir() && is_symlink(&src) => {
                debug!(path = %src.display(), "not following directory symlink");
                self.remove_from_mirror(rel, &dst, outcome);
            }
            Some(meta) if meta.is_dir() => {
                if !self.rules.may_contain(rel) {
                    self.remove_from_mirror(rel, &dst, outcome);
                } else if self.rules.in_scope(rel) {
                    self.mirror_dir(rel, outcome);
                }
            }
            Some(_) => {
                if self.rules.in_scope(rel) {
                    self.mirror_file(rel, outcome);
                } else {
                    self.remove_from_mirror(rel, &dst, outcome);
                }
            }
        }
    }

    fn remove_from_mirror(&self, rel: &Path, dst: &Path, outcome: &mut ReconcileOutcome) {
        match mirror::remove(dst) {
            Ok(Some(kind)) => {
                let is_dir = kind == RemovedEntry::Directory;
                outcome.summary.record(ChangeKind::Deleted, rel, is_dir);
            }
            Ok(None) => {}
            Err(e) => outcome.fail(rel, e),
        }
    }

    fn mirror_dir(&self, rel: &Path, outcome: &mut ReconcileOutcome) {
        if let Err(e) = self.ensure_parents(rel, outcome) {
            outcome.fail(rel, e);
            return;
        }
        match mirror::ensure_dir(&self.source_root.join(rel), &self.mirror_root.join(rel)) {
            Ok(true) => outcome.summary.record(ChangeKind::Added, rel, true),
            Ok(false) => {}
            Err(e) => outcome.fail(rel, e),
        }
    }

    fn mirror_file(&self, rel: &Path, outcome: &mut ReconcileOutcome) {
        if let Err(e) = self.ensure_parents(rel, outcome) {
            outcome.fail(rel, e);
            return;
        }
        match mirror::copy_file(&self.source_root.join(rel), &self.mirror_root.join(rel)) {
            Ok(CopyOutcome::Created) => outcome.summary.record(ChangeKind::Added, rel, false),
            Ok(CopyOutcome::Replaced) => outcome.summary.record(ChangeKind::Modified, rel, false),
            Ok(CopyOutcome::Unchanged) => {}
            Err(e) => outcome.fail(rel, e),
        }
    }

    /// Create every missing ancestor of `rel` in the mirror with the
    /// permissions of its source counterpart.
    fn ensure_parents(&self, rel: &Path, outcome: &mut ReconcileOutcome) -> Result<(), MirrorError> {
        let Some(parent) = rel.parent() else {
            return Ok(());
        };
        let mut prefix = PathBuf::new();
        for component in parent.components() {
            prefix.push(component);
            let created = mirror::ensure_dir(&self.source_root.join(&prefix), &self.mirror_root.join(&prefix))?;
            if created {
                outcome.summary.record(ChangeKind::Added, &prefix, true);
            }
        }
        Ok(())
    }

    fn walk_source(&self, rel_dir: &Path, outcome: &mut ReconcileOutcome) -> Result<(), SyncError> {
        let dir = self.source_root.join(rel_dir);
        for name in sorted_entries(&dir)? {
            let rel = rel_dir.join(&name);
            if filter::is_vcs_path(&rel) {
                continue;
            }
            let path = dir.join(&name);
            let meta = match fs::metadata(&path) {
                Ok(meta) => meta,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                    debug!(path = %path.display(), "skipping dangling symlink");
                    continue;
                }
                Err(source) => return Err(SyncError::Walk { path, source }),
            };

            if meta.is_dir() {
                if is_symlink(&path) {
                    debug!(path = %path.display(), "not following directory symlink");
                    continue;
                }
                if !self.rules.may_contain(&rel) {
                    continue;
                }
                if self.rules.in_scope(&rel) {
                    self.mirror_dir(&rel, outcome);
                }
                self.walk_source(&rel, outcome)?;
            } else if self.rules.in_scope(&rel) {
                self.mirror_file(&rel, outcome);
            }
        }
        Ok(())
    }

    /// Remove mirror entries that are missing at the source or out of scope.
    fn sweep_mirror(&self, rel_dir: &Path, outcome: &mut ReconcileOutcome) -> Result<(), SyncError> {
        let dir = self.mirror_root.join(rel_dir);
        for name in sorted_entries(&dir)? {
            let rel = rel_dir.join(&name);
            if filter::is_vcs_path(&rel) {
                continue;
            }
            let dst = dir.join(&name);
            let mirror_is_dir = fs::symlink_metadata(&dst).map(|m| m.is_dir()).unwrap_or(false);
            let src_meta = fs::metadata(self.source_root.join(&rel)).ok();

            let keep = match &src_meta {
                Some(meta) if meta.is_dir() && mirror_is_dir => self.rules.may_contain(&rel),
                Some(meta) if !meta.is_dir() && !mirror_is_dir => self.rules.in_scope(&rel),
                _ => false,
            };

            if !keep {
                debug!(path = %rel.display(), "pruning stale mirror entry");
                self.remove_from_mirror(&rel, &dst, outcome);
            } else if mirror_is_dir {
                self.sweep_mirror(&rel, outcome)?;
            }
        }
        Ok(())
    }
}

fn sorted_entries(dir: &Path) -> Result<Vec<std::ffi::OsString>, SyncError> {
    let walk_err = |source| SyncError::Walk {
        path: dir.to_path_buf(),
        source,
    };
    let mut names = Vec::new();
    for entry in fs::read_dir(dir).map_err(walk_err)? {
        names.push(entry.map_err(walk_err)?.file_name());
    }
    names.sort();
    Ok(names)
}

fn is_symlink(path: &Path) -> bool {
    fs::symlink_metadata(path)
        .map(|m| m.file_type().is_symlink())
        .unwrap_or(false)
}
