//! Error types for the dotmirror core library.
//!
//! Each subsystem has its own error type derived with `thiserror`, and a
//! top-level [`CoreError`] enum unifies them all for callers that want a
//! single error type.

use std::path::PathBuf;

use thiserror::Error;

// ---------------------------------------------------------------------------
// Top-level error
// ---------------------------------------------------------------------------

/// Unified error type for the entire core library.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Mirror(#[from] MirrorError),

    #[error(transparent)]
    Watch(#[from] WatchError),

    #[error(transparent)]
    Git(#[from] GitError),

    #[error(transparent)]
    Conflict(#[from] ConflictError),

    #[error(transparent)]
    Sync(#[from] SyncError),
}

// ---------------------------------------------------------------------------
// Configuration errors
// ---------------------------------------------------------------------------

/// Errors from configuration loading and validation.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Config file not found.
    #[error("configuration file not found: {0}")]
    FileNotFound(String),

    /// TOML parse error.
    #[error("configuration parse error: {0}")]
    ParseError(String),

    /// A config value is invalid.
    #[error("invalid configuration value for '{field}': {detail}")]
    InvalidValue { field: String, detail: String },

    /// The configured source root cannot be read.
    #[error("source directory '{}' is not readable: {source}", path.display())]
    SourceUnreadable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Generic I/O error reading or writing the config file.
    #[error("configuration I/O error: {0}")]
    IoError(#[from] std::io::Error),
}

// ---------------------------------------------------------------------------
// Mirror errors
// ---------------------------------------------------------------------------

/// A filesystem operation on a single mirror entry failed.
#[derive(Debug, Error)]
#[error("failed to {op} '{}': {source}", path.display())]
pub struct MirrorError {
    /// Short verb describing the failed operation ("copy", "create directory", ...).
    pub op: &'static str,
    /// The path the operation was applied to.
    pub path: PathBuf,
    #[source]
    pub source: std::io::Error,
}

impl MirrorError {
    pub fn new(op: &'static str, path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self {
            op,
            path: path.into(),
            source,
        }
    }
}

// ---------------------------------------------------------------------------
// Watcher errors
// ---------------------------------------------------------------------------

/// Errors from the filesystem watcher subsystem.
#[derive(Debug, Error)]
pub enum WatchError {
    /// The platform watcher could not be created.
    #[error("failed to create filesystem watcher: {0}")]
    Create(#[source] notify::Error),

    /// A directory could not be registered with the watcher.
    #[error("failed to watch '{}': {source}", path.display())]
    Register {
        path: PathBuf,
        #[source]
        source: notify::Error,
    },

    /// The platform watcher reported an error while running.
    #[error("filesystem watcher error: {0}")]
    Event(#[source] notify::Error),

    /// Walking the source tree to register watches failed.
    #[error("failed to scan '{}' for watching: {source}", path.display())]
    Scan {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

// ---------------------------------------------------------------------------
// Git errors
// ---------------------------------------------------------------------------

/// Errors from the version-control backend.
#[derive(Debug, Error)]
pub enum GitError {
    /// The repository could not be created or opened.
    #[error("failed to open or initialize repository at '{path}': {detail}")]
    RepositoryInit { path: String, detail: String },

    /// A `git2` library error.
    #[error("git2 error: {0}")]
    Git2Error(#[from] git2::Error),

    /// Remote operations need a configured remote.
    #[error("remote URL not set")]
    RemoteNotSet,

    /// The working tree matches HEAD.
    #[error("no changes to commit")]
    NothingToCommit,

    /// Push was rejected (e.g. non-fast-forward).
    #[error("git push rejected for branch '{branch}': {detail}")]
    PushRejected { branch: String, detail: String },

    /// Uncommitted worktree changes would be overwritten by a pull.
    #[error("local changes would be overwritten by pull: {0}")]
    DirtyWorktree(String),

    /// A conflict side was requested for a path that is not in conflict.
    #[error("no {side} version of '{path}' in the index")]
    MissingStage { path: String, side: String },

    /// Generic I/O wrapper.
    #[error("git I/O error: {0}")]
    IoError(#[from] std::io::Error),
}

// ---------------------------------------------------------------------------
// Conflict errors
// ---------------------------------------------------------------------------

/// Errors from the conflict detection / resolution subsystem.
#[derive(Debug, Error)]
pub enum ConflictError {
    /// Reading the worktree status failed.
    #[error("failed to detect conflicts: {0}")]
    DetectionFailed(#[source] GitError),

    /// Resolving one path failed.
    #[error("failed to resolve conflict for '{path}': {detail}")]
    ResolutionFailed { path: String, detail: String },

    /// One or more paths could not be resolved.
    #[error("{} conflict(s) left unresolved: {}", .0.len(), .0.join(", "))]
    Unresolved(Vec<String>),
}

// ---------------------------------------------------------------------------
// Sync errors
// ---------------------------------------------------------------------------

/// Cycle-level failures of the sync engine.
#[derive(Debug, Error)]
pub enum SyncError {
    /// Walking the source tree during the initial sync failed.
    #[error("failed to walk '{}': {source}", path.display())]
    Walk {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A mirror operation aborted the initial sync.
    #[error("initial sync failed: {0}")]
    Mirror(#[from] MirrorError),

    /// Pulling from the remote failed for a reason other than conflicts.
    #[error("failed to pull from remote: {0}")]
    Pull(#[source] GitError),

    /// Conflicts could not be cleared.
    #[error("failed to resolve conflicts: {0}")]
    Conflict(#[from] ConflictError),

    /// Staging changes failed.
    #[error("failed to add changes: {0}")]
    Stage(#[source] GitError),

    /// Creating the commit failed.
    #[error("failed to commit changes: {0}")]
    Commit(#[source] GitError),

    /// Pushing to the remote failed.
    #[error("failed to push changes: {0}")]
    Push(#[source] GitError),

    /// The background blocking task panicked or was cancelled.
    #[error("sync task aborted: {0}")]
    TaskAborted(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display_messages() {
        let err = MirrorError::new(
            "copy",
            "/tmp/mirror/i3/config",
            std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied"),
        );
        assert_eq!(
            err.to_string(),
            "failed to copy '/tmp/mirror/i3/config': denied"
        );

        assert_eq!(GitError::NothingToCommit.to_string(), "no changes to commit");

        let err = ConflictError::Unresolved(vec!["a.conf".into(), "b.conf".into()]);
        assert_eq!(err.to_string(), "2 conflict(s) left unresolved: a.conf, b.conf");

        let err = SyncError::Push(GitError::RemoteNotSet);
        assert_eq!(err.to_string(), "failed to push changes: remote URL not set");
    }

    #[test]
    fn test_core_error_from_subsystem() {
        let core_err: CoreError = GitError::RemoteNotSet.into();
        assert!(matches!(core_err, CoreError::Git(_)));

        let core_err: CoreError = ConfigError::ParseError("bad".into()).into();
        assert!(matches!(core_err, CoreError::Config(_)));
    }
}
