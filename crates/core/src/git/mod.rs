//! Version-control backend used by the sync engine.
//!
//! The engine only talks to the repository through [`VcsBackend`]. The
//! default implementation, [`GitBackend`], is built on `git2`.

pub mod client;

pub use client::{CommitAuthor, GitBackend};

use std::fmt;
use std::path::{Path, PathBuf};

use crate::errors::GitError;

/// Name of the remote the backend pulls from and pushes to.
pub const REMOTE_NAME: &str = "origin";

/// Result of a successful pull.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PullOutcome {
    /// Nothing new on the remote (or no remote branch yet).
    UpToDate,
    /// Local history moved forward to the remote tip.
    FastForwarded,
    /// Histories diverged and merged without conflicts.
    Merged,
    /// Histories diverged and the merge left unmerged paths.
    Conflicted,
}

/// Which side of a conflict to take.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    /// Stage 2, "ours".
    Local,
    /// Stage 3, "theirs".
    Remote,
}

impl Side {
    /// Index stage number holding this side.
    pub fn stage(self) -> i32 {
        match self {
            Self::Local => 2,
            Self::Remote => 3,
        }
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Local => f.write_str("local"),
            Self::Remote => f.write_str("remote"),
        }
    }
}

/// A path left unmerged by a pull, with the blob ids of both sides when the
/// index still holds them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnmergedEntry {
    pub path: PathBuf,
    pub local_id: Option<String>,
    pub remote_id: Option<String>,
}

/// Username / token pair used for HTTPS remotes.
#[derive(Clone)]
pub struct Credentials {
    pub username: String,
    pub token: String,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("token", &"[redacted]")
            .finish()
    }
}

/// Repository operations the sync engine depends on.
pub trait VcsBackend: Send {
    /// Root of the working tree.
    fn workdir(&self) -> &Path;

    /// Point the `origin` remote at `url`, creating it if needed.
    fn set_remote(&mut self, url: &str) -> Result<(), GitError>;

    /// Use `credentials` for subsequent network operations.
    fn set_credentials(&mut self, credentials: Credentials);

    /// Stage the given worktree-relative paths. Missing files are staged as
    /// deletions; conflict stages for the paths are cleared.
    fn stage(&mut self, paths: &[PathBuf]) -> Result<(), GitError>;

    /// Stage every change in the working tree, deletions included.
    fn stage_all(&mut self) -> Result<(), GitError>;

    /// Commit the index. Fails with [`GitError::NothingToCommit`] when the
    /// index matches HEAD and no merge is in progress.
    fn commit(&mut self, message: &str) -> Result<String, GitError>;

    /// Push the configured branch to `origin`.
    fn push(&mut self) -> Result<(), GitError>;

    /// Fetch from `origin` and integrate the remote branch. Fails with
    /// [`GitError::DirtyWorktree`], leaving everything untouched, when
    /// uncommitted changes are in the way.
    fn pull(&mut self) -> Result<PullOutcome, GitError>;

    /// Paths currently in the unmerged state.
    fn unmerged_status(&self) -> Result<Vec<UnmergedEntry>, GitError>;

    /// Write one side of an unmerged path into the working tree. Returns
    /// `false` if that side deleted the file, in which case the worktree file
    /// is removed. Fails with [`GitError::MissingStage`] when `path` is not
    /// in conflict.
    fn restore_side(&mut self, path: &Path, side: Side) -> Result<bool, GitError>;
}
