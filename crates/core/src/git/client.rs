//! [`VcsBackend`] implementation on top of `git2`.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use git2::build::CheckoutBuilder;
use git2::{
    Cred, CredentialType, FetchOptions, IndexAddOption, MergeOptions, Oid, PushOptions,
    RemoteCallbacks, Repository, RepositoryInitOptions, RepositoryState, ResetType, Signature,
    StatusOptions,
};
use tracing::{debug, info, instrument, warn};

use super::{Credentials, PullOutcome, Side, UnmergedEntry, VcsBackend, REMOTE_NAME};
use crate::errors::GitError;

/// Identity recorded on every commit the engine creates.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommitAuthor {
    pub name: String,
    pub email: String,
}

impl Default for CommitAuthor {
    fn default() -> Self {
        Self {
            name: "Config Handler".into(),
            email: "config-handler@automatic.com".into(),
        }
    }
}

/// Git repository backing the mirror tree.
pub struct GitBackend {
    repo: Repository,
    workdir: PathBuf,
    branch: String,
    author: CommitAuthor,
    credentials: Option<Credentials>,
}

impl GitBackend {
    /// Open the repository at `path`, creating the directory and an empty
    /// repository on `branch` when none exists.
    pub fn open_or_init<P: AsRef<Path>>(path: P, branch: &str, author: CommitAuthor) -> Result<Self, GitError> {
        let path = path.as_ref();
        let init_err = |detail: String| GitError::RepositoryInit {
            path: path.display().to_string(),
            detail,
        };

        let repo = if path.join(".git").exists() {
            info!(path = %path.display(), "opening existing git repository");
            Repository::open(path).map_err(|e| init_err(e.message().to_string()))?
        } else {
            info!(path = %path.display(), branch, "creating new git repository");
            fs::create_dir_all(path).map_err(|e| init_err(e.to_string()))?;
            let mut opts = RepositoryInitOptions::new();
            opts.initial_head(branch);
            Repository::init_opts(path, &opts).map_err(|e| init_err(e.message().to_string()))?
        };

        let workdir = repo
            .workdir()
            .map(Path::to_path_buf)
            .ok_or_else(|| init_err("repository has no working directory".into()))?;

        Ok(Self {
            repo,
            workdir,
            branch: branch.to_string(),
            author,
            credentials: None,
        })
    }

    pub fn branch(&self) -> &str {
        &self.branch
    }

    pub fn repo(&self) -> &Repository {
        &self.repo
    }

    /// Return the SHA of HEAD, if any commit exists.
    pub fn head_sha(&self) -> Option<String> {
        self.repo
            .head()
            .ok()
            .and_then(|h| h.peel_to_commit().ok())
            .map(|c| c.id().to_string())
    }

    fn local_ref(&self) -> String {
        format!("refs/heads/{}", self.branch)
    }

    fn callbacks(&self) -> RemoteCallbacks<'static> {
        let mut callbacks = RemoteCallbacks::new();
        let credentials = self.credentials.clone();
        callbacks.credentials(move |_url, username_from_url, allowed| {
            if let Some(creds) = &credentials {
                if allowed.contains(CredentialType::USER_PASS_PLAINTEXT) {
                    return Cred::userpass_plaintext(&creds.username, &creds.token);
                }
            }
            if allowed.contains(CredentialType::SSH_KEY) {
                return Cred::ssh_key_from_agent(username_from_url.unwrap_or("git"));
            }
            Cred::default()
        });
        callbacks
    }

    #[instrument(skip(self), fields(remote = REMOTE_NAME))]
    fn fetch(&self) -> Result<(), GitError> {
        let mut remote = self
            .repo
            .find_remote(REMOTE_NAME)
            .map_err(|_| GitError::RemoteNotSet)?;
        let mut fetch_opts = FetchOptions::new();
        fetch_opts.remote_callbacks(self.callbacks());
        remote.fetch(&[] as &[&str], Some(&mut fetch_opts), None)?;
        debug!("fetch completed");
        Ok(())
    }

    fn merge_heads(&mut self) -> Result<Vec<Oid>, GitError> {
        let mut heads = Vec::new();
        if self.repo.state() == RepositoryState::Merge {
            self.repo.mergehead_foreach(|oid| {
                heads.push(*oid);
                true
            })?;
        }
        Ok(heads)
    }
}

impl VcsBackend for GitBackend {
    fn workdir(&self) -> &Path {
        &self.workdir
    }

    fn set_remote(&mut self, url: &str) -> Result<(), GitError> {
        if self.repo.find_remote(REMOTE_NAME).is_ok() {
            info!(url, "updating existing remote URL");
            self.repo.remote_set_url(REMOTE_NAME, url)?;
        } else {
            info!(url, "setting up new remote URL");
            self.repo.remote(REMOTE_NAME, url)?;
        }
        Ok(())
    }

    fn set_credentials(&mut self, credentials: Credentials) {
        debug!(username = %credentials.username, "credentials configured");
        self.credentials = Some(credentials);
    }

    fn stage(&mut self, paths: &[PathBuf]) -> Result<(), GitError> {
        let mut index = self.repo.index()?;
        for path in paths {
            if fs::symlink_metadata(self.workdir.join(path)).is_ok() {
                index.add_path(path)?;
            } else {
                index.remove_path(path)?;
            }
        }
        index.write()?;
        Ok(())
    }

    fn stage_all(&mut self) -> Result<(), GitError> {
        let mut index = self.repo.index()?;
        index.add_all(["*"].iter(), IndexAddOption::DEFAULT, None)?;
        index.update_all(["*"].iter(), None)?;
        index.write()?;
        debug!(entries = index.len(), "staged working tree");
        Ok(())
    }

    #[instrument(skip(self, message))]
    fn commit(&mut self, message: &str) -> Result<String, GitError> {
        let merge_heads = self.merge_heads()?;
        let mut index = self.repo.index()?;
        let tree_oid = index.write_tree()?;

        let head = match self.repo.head() {
            Ok(head) => Some(head.peel_to_commit()?),
            Err(_) => None,
        };
        if merge_heads.is_empty() {
            let unchanged = match &head {
                Some(commit) => commit.tree_id() == tree_oid,
                None => index.is_empty(),
            };
            if unchanged {
                return Err(GitError::NothingToCommit);
            }
        }

        let tree = self.repo.find_tree(tree_oid)?;
        let signature = Signature::now(&self.author.name, &self.author.email)?;
        let mut parents = Vec::new();
        if let Some(commit) = head {
            parents.push(commit);
        }
        for oid in &merge_heads {
            parents.push(self.repo.find_commit(*oid)?);
        }
        let parent_refs: Vec<&git2::Commit> = parents.iter().collect();

        let oid = self
            .repo
            .commit(Some("HEAD"), &signature, &signature, message, &tree, &parent_refs)?;
        if !merge_heads.is_empty() {
            self.repo.cleanup_state()?;
        }

        info!(sha = %oid, parents = parent_refs.len(), "created commit");
        Ok(oid.to_string())
    }

    #[instrument(skip(self), fields(remote = REMOTE_NAME, branch = %self.branch))]
    fn push(&mut self) -> Result<(), GitError> {
        info!("pushing");
        let mut remote = self
            .repo
            .find_remote(REMOTE_NAME)
            .map_err(|_| GitError::RemoteNotSet)?;

        let mut callbacks = self.callbacks();
        let rejection = Arc::new(Mutex::new(None::<String>));
        let rejection_slot = rejection.clone();
        callbacks.push_update_reference(move |refname, status| {
            if let Some(msg) = status {
                warn!(refname, msg, "push rejected");
                if let Ok(mut slot) = rejection_slot.lock() {
                    *slot = Some(msg.to_string());
                }
            }
            Ok(())
        });

        let mut push_opts = PushOptions::new();
        push_opts.remote_callbacks(callbacks);
        let refspec = format!("{0}:{0}", self.local_ref());
        remote.push(&[&refspec], Some(&mut push_opts))?;

        let rejected = rejection.lock().ok().and_then(|mut slot| slot.take());
        if let Some(detail) = rejected {
            return Err(GitError::PushRejected {
                branch: self.branch.clone(),
                detail,
            });
        }
        info!("push completed");
        Ok(())
    }

    #[instrument(skip(self), fields(remote = REMOTE_NAME, branch = %self.branch))]
    fn pull(&mut self) -> Result<PullOutcome, GitError> {
        self.fetch()?;

        let remote_ref = format!("refs/remotes/{}/{}", REMOTE_NAME, self.branch);
        let remote_reference = match self.repo.find_reference(&remote_ref) {
            Ok(r) => r,
            Err(e) if e.code() == git2::ErrorCode::NotFound => {
                debug!("remote branch does not exist yet");
                return Ok(PullOutcome::UpToDate);
            }
            Err(e) => return Err(e.into()),
        };
        let fetched = self.repo.reference_to_annotated_commit(&remote_reference)?;
        let fetched_commit = self.repo.find_commit(fetched.id())?;
        let (analysis, _) = self.repo.merge_analysis(&[&fetched])?;

        if analysis.is_up_to_date() {
            debug!("already up to date");
            return Ok(PullOutcome::UpToDate);
        }

        let local_ref = self.local_ref();

        if analysis.is_unborn() {
            // No local commits yet: adopt the remote history, keep local files.
            self.repo
                .reference(&local_ref, fetched.id(), true, "dotmirror: adopt remote history")?;
            self.repo.set_head(&local_ref)?;
            self.repo
                .reset(fetched_commit.as_object(), ResetType::Mixed, None)?;
            self.repo
                .checkout_head(Some(
                    CheckoutBuilder::new()
                        .safe()
                        .recreate_missing(true)
                        .allow_conflicts(true),
                ))?;
            info!(sha = %fetched.id(), "adopted remote history");
            return Ok(PullOutcome::FastForwarded);
        }

        if analysis.is_fast_forward() {
            self.repo
                .checkout_tree(fetched_commit.as_object(), Some(CheckoutBuilder::new().safe()))
                .map_err(checkout_error)?;
            let mut reference = self.repo.find_reference(&local_ref)?;
            reference.set_target(fetched.id(), "dotmirror: fast-forward pull")?;
            self.repo.set_head(&local_ref)?;
            info!(sha = %fetched.id(), "fast-forwarded");
            return Ok(PullOutcome::FastForwarded);
        }

        info!("histories diverged, merging");
        let mut merge_opts = MergeOptions::new();
        let mut checkout = CheckoutBuilder::new();
        checkout.allow_conflicts(true).conflict_style_merge(true);
        self.repo
            .merge(&[&fetched], Some(&mut merge_opts), Some(&mut checkout))
            .map_err(checkout_error)?;
        drop(fetched);
        drop(fetched_commit);
        drop(remote_reference);

        if self.repo.index()?.has_conflicts() {
            warn!("merge left unmerged paths");
            return Ok(PullOutcome::Conflicted);
        }

        let message = format!("Merge remote-tracking branch '{}/{}'", REMOTE_NAME, self.branch);
        self.commit(&message)?;
        Ok(PullOutcome::Merged)
    }

    fn unmerged_status(&self) -> Result<Vec<UnmergedEntry>, GitError> {
        let mut index = self.repo.index()?;
        index.read(false)?;

        let mut opts = StatusOptions::new();
        opts.include_untracked(false).include_ignored(false);
        let statuses = self.repo.statuses(Some(&mut opts))?;

        let mut entries = Vec::new();
        for status in statuses.iter() {
            if !status.status().is_conflicted() {
                continue;
            }
            let Some(path) = status.path() else {
                warn!("skipping unmerged entry with non-UTF-8 path");
                continue;
            };
            let path = PathBuf::from(path);
            let local_id = index.get_path(&path, Side::Local.stage()).map(|e| e.id.to_string());
            let remote_id = index.get_path(&path, Side::Remote.stage()).map(|e| e.id.to_string());
            entries.push(UnmergedEntry {
                path,
                local_id,
                remote_id,
            });
        }
        Ok(entries)
    }

    fn restore_side(&mut self, path: &Path, side: Side) -> Result<bool, GitError> {
        let mut index = self.repo.index()?;
        index.read(false)?;
        let target = self.workdir.join(path);

        let Some(entry) = index.get_path(path, side.stage()) else {
            if (1..=3).all(|stage| index.get_path(path, stage).is_none()) {
                return Err(GitError::MissingStage {
                    path: path.display().to_string(),
                    side: side.to_string(),
                });
            }
            if fs::symlink_metadata(&target).is_ok() {
                fs::remove_file(&target)?;
            }
            debug!(path = %path.display(), %side, "side deleted the file");
            return Ok(false);
        };

        let blob = self.repo.find_blob(entry.id)?;
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&target, blob.content())?;
        set_file_mode(&target, entry.mode)?;
        debug!(path = %path.display(), %side, "restored conflict side");
        Ok(true)
    }
}

/// Checkout refusing to touch modified files surfaces as a conflict code.
fn checkout_error(e: git2::Error) -> GitError {
    if e.code() == git2::ErrorCode::Conflict {
        GitError::DirtyWorktree(e.message().to_string())
    } else {
        e.into()
    }
}

#[cfg(unix)]
fn set_file_mode(path: &Path, mode: u32) -> std::io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    let perms = if mode & 0o111 != 0 { 0o755 } else { 0o644 };
    fs::set_permissions(path, fs::Permissions::from_mode(perms))
}

#[cfg(not(unix))]
fn set_file_mode(_path: &Path, _mode: u32) -> std::io::Result<()> {
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn backend(dir: &Path) -> GitBackend {
        GitBackend::open_or_init(dir, "main", CommitAuthor::default()).unwrap()
    }

    fn origin(root: &TempDir) -> String {
        let path = root.path().join("origin.git");
        Repository::init_bare(&path).unwrap();
        path.to_string_lossy().into_owned()
    }

    fn commit_file(b: &mut GitBackend, rel: &str, content: &str) {
        fs::write(b.workdir().join(rel), content).unwrap();
        b.stage_all().unwrap();
        b.commit(&format!("update {rel}")).unwrap();
    }

    #[test]
    fn test_init_creates_directory_on_main() {
        let root = TempDir::new().unwrap();
        let path = root.path().join("nested/repo");
        let b = backend(&path);
        assert!(path.join(".git").exists());
        assert_eq!(b.repo().find_reference("HEAD").unwrap().symbolic_target(), Some("refs/heads/main"));
        assert!(b.head_sha().is_none());

        // Reopening finds the same repository.
        let reopened = backend(&path);
        assert_eq!(reopened.workdir(), b.workdir());
    }

    #[test]
    fn test_commit_with_nothing_staged() {
        let root = TempDir::new().unwrap();
        let mut b = backend(root.path());
        assert!(matches!(b.commit("empty"), Err(GitError::NothingToCommit)));

        commit_file(&mut b, "a.conf", "1");
        b.stage_all().unwrap();
        assert!(matches!(b.commit("again"), Err(GitError::NothingToCommit)));
    }

    #[test]
    fn test_stage_all_records_deletions() {
        let root = TempDir::new().unwrap();
        let mut b = backend(root.path());
        commit_file(&mut b, "a.conf", "1");

        fs::remove_file(root.path().join("a.conf")).unwrap();
        b.stage_all().unwrap();
        b.commit("remove a.conf").unwrap();

        let head = b.repo().head().unwrap().peel_to_tree().unwrap();
        assert!(head.get_name("a.conf").is_none());
    }

    #[test]
    fn test_commit_uses_configured_author() {
        let root = TempDir::new().unwrap();
        let mut b = backend(root.path());
        commit_file(&mut b, "a.conf", "1");
        let commit = b.repo().head().unwrap().peel_to_commit().unwrap();
        assert_eq!(commit.author().name(), Some("Config Handler"));
        assert_eq!(commit.author().email(), Some("config-handler@automatic.com"));
    }

    #[test]
    fn test_remote_operations_need_remote() {
        let root = TempDir::new().unwrap();
        let mut b = backend(root.path());
        assert!(matches!(b.pull(), Err(GitError::RemoteNotSet)));
        assert!(matches!(b.push(), Err(GitError::RemoteNotSet)));
    }

    #[test]
    fn test_pull_from_empty_remote_is_up_to_date() {
        let root = TempDir::new().unwrap();
        let url = origin(&root);
        let mut b = backend(&root.path().join("a"));
        b.set_remote(&url).unwrap();
        // Replacing the URL works too.
        b.set_remote(&url).unwrap();
        assert_eq!(b.pull().unwrap(), PullOutcome::UpToDate);
    }

    #[test]
    fn test_push_then_adopt_in_fresh_clone() {
        let root = TempDir::new().unwrap();
        let url = origin(&root);

        let mut a = backend(&root.path().join("a"));
        a.set_remote(&url).unwrap();
        commit_file(&mut a, "kitty.conf", "font_size 11");
        a.push().unwrap();

        let b_dir = root.path().join("b");
        let mut b = backend(&b_dir);
        fs::write(b_dir.join("local-only.conf"), "keep me").unwrap();
        b.set_remote(&url).unwrap();
        assert_eq!(b.pull().unwrap(), PullOutcome::FastForwarded);

        assert_eq!(fs::read_to_string(b_dir.join("kitty.conf")).unwrap(), "font_size 11");
        assert_eq!(fs::read_to_string(b_dir.join("local-only.conf")).unwrap(), "keep me");
        assert_eq!(b.head_sha(), a.head_sha());

        // Second pull has nothing to do.
        assert_eq!(b.pull().unwrap(), PullOutcome::UpToDate);
    }

    #[test]
    fn test_fast_forward_pull() {
        let root = TempDir::new().unwrap();
        let url = origin(&root);

        let mut a = backend(&root.path().join("a"));
        a.set_remote(&url).unwrap();
        commit_file(&mut a, "x.conf", "1");
        a.push().unwrap();

        let mut b = backend(&root.path().join("b"));
        b.set_remote(&url).unwrap();
        b.pull().unwrap();

        commit_file(&mut a, "x.conf", "2");
        a.push().unwrap();

        assert_eq!(b.pull().unwrap(), PullOutcome::FastForwarded);
        assert_eq!(fs::read_to_string(b.workdir().join("x.conf")).unwrap(), "2");
    }

    #[test]
    fn test_diverged_push_is_rejected_then_conflict_resolved() {
        let root = TempDir::new().unwrap();
        let url = origin(&root);

        let mut a = backend(&root.path().join("a"));
        a.set_remote(&url).unwrap();
        commit_file(&mut a, "f.conf", "base\n");
        a.push().unwrap();

        let mut b = backend(&root.path().join("b"));
        b.set_remote(&url).unwrap();
        b.pull().unwrap();
        commit_file(&mut b, "f.conf", "remote\n");
        b.push().unwrap();

        commit_file(&mut a, "f.conf", "local\n");
        assert!(a.push().is_err());

        assert_eq!(a.pull().unwrap(), PullOutcome::Conflicted);
        let unmerged = a.unmerged_status().unwrap();
        assert_eq!(unmerged.len(), 1);
        assert_eq!(unmerged[0].path, PathBuf::from("f.conf"));
        assert!(unmerged[0].local_id.is_some());
        assert!(unmerged[0].remote_id.is_some());

        let worktree = fs::read_to_string(a.workdir().join("f.conf")).unwrap();
        assert!(worktree.contains("<<<<<<<"));

        assert!(a.restore_side(Path::new("f.conf"), Side::Remote).unwrap());
        assert_eq!(fs::read_to_string(a.workdir().join("f.conf")).unwrap(), "remote\n");
        a.stage(&[PathBuf::from("f.conf")]).unwrap();
        assert!(a.unmerged_status().unwrap().is_empty());

        a.commit("resolve").unwrap();
        let parents = a.repo().head().unwrap().peel_to_commit().unwrap().parent_count();
        assert_eq!(parents, 2);
        assert_eq!(a.repo().state(), RepositoryState::Clean);
        a.push().unwrap();
    }

    #[test]
    fn test_restore_side_of_path_not_in_conflict() {
        let root = TempDir::new().unwrap();
        let mut a = backend(&root.path().join("a"));
        commit_file(&mut a, "calm.conf", "steady\n");

        let err = a.restore_side(Path::new("calm.conf"), Side::Remote).unwrap_err();
        assert!(matches!(err, GitError::MissingStage { .. }));
        assert_eq!(fs::read_to_string(a.workdir().join("calm.conf")).unwrap(), "steady\n");
    }

    #[test]
    fn test_clean_merge_creates_merge_commit() {
        let root = TempDir::new().unwrap();
        let url = origin(&root);

        let mut a = backend(&root.path().join("a"));
        a.set_remote(&url).unwrap();
        commit_file(&mut a, "one.conf", "1");
        a.push().unwrap();

        let mut b = backend(&root.path().join("b"));
        b.set_remote(&url).unwrap();
        b.pull().unwrap();
        commit_file(&mut b, "two.conf", "2");
        b.push().unwrap();

        commit_file(&mut a, "three.conf", "3");
        assert_eq!(a.pull().unwrap(), PullOutcome::Merged);
        assert!(a.workdir().join("two.conf").exists());
        assert_eq!(a.repo().head().unwrap().peel_to_commit().unwrap().parent_count(), 2);
        a.push().unwrap();
    }

    #[test]
    fn test_pull_over_dirty_file_reports_dirty_worktree() {
        let root = TempDir::new().unwrap();
        let url = origin(&root);

        let mut a = backend(&root.path().join("a"));
        a.set_remote(&url).unwrap();
        commit_file(&mut a, "f.conf", "base\n");
        a.push().unwrap();

        let mut b = backend(&root.path().join("b"));
        b.set_remote(&url).unwrap();
        b.pull().unwrap();
        commit_file(&mut b, "f.conf", "remote\n");
        b.push().unwrap();

        fs::write(a.workdir().join("f.conf"), "uncommitted\n").unwrap();
        assert!(matches!(a.pull(), Err(GitError::DirtyWorktree(_))));
        assert_eq!(fs::read_to_string(a.workdir().join("f.conf")).unwrap(), "uncommitted\n");
    }
}
