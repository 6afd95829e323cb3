//! End-to-end tests for the mirror sync engine.
//!
//! These tests exercise the real `SyncEngine` with:
//! - A real source directory and mirror working tree under a temp dir
//! - A local bare repository as `origin` (no network I/O)
//! - A second clone that pushes competing changes to produce real conflicts
//! - The filesystem watcher for the monitoring loop

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use git2::Repository;
use tempfile::TempDir;

use dotmirror_core::config::MirrorConfig;
use dotmirror_core::conflict::{FixedStrategy, ResolutionStrategy, MERGE_HEADER};
use dotmirror_core::git::{CommitAuthor, GitBackend, VcsBackend};
use dotmirror_core::notification::{LogSink, Notifier};
use dotmirror_core::reconcile::ChangeKind;
use dotmirror_core::report::INITIAL_COMMIT_MESSAGE;
use dotmirror_core::sync_engine::SyncEngine;
use dotmirror_core::watcher::AggregatorOptions;

// ===========================================================================
// Helpers
// ===========================================================================

struct TestEnv {
    root: TempDir,
    source: PathBuf,
    mirror: PathBuf,
    origin: PathBuf,
}

impl TestEnv {
    fn new() -> Self {
        let root = TempDir::new().unwrap();
        let source = root.path().join("config");
        let mirror = root.path().join("mirror");
        let origin = root.path().join("origin.git");
        fs::create_dir_all(&source).unwrap();
        Repository::init_bare(&origin).unwrap();
        Self {
            root,
            source,
            mirror,
            origin,
        }
    }

    fn config(&self, include: &[&str], exclude: &[&str]) -> MirrorConfig {
        let mut config = MirrorConfig::default();
        config.mirror.source_dir = self.source.clone();
        config.mirror.repo_dir = self.mirror.clone();
        config.mirror.include = include.iter().map(|s| s.to_string()).collect();
        config.mirror.exclude = exclude.iter().map(|s| s.to_string()).collect();
        config.remote.url = Some(self.origin.to_string_lossy().into_owned());
        config.notifications.desktop = false;
        config.validate().unwrap();
        config
    }

    fn engine(&self, include: &[&str], exclude: &[&str], strategy: ResolutionStrategy) -> SyncEngine {
        SyncEngine::from_config(
            &self.config(include, exclude),
            Box::new(FixedStrategy(strategy)),
            Arc::new(Notifier::default().with_sink(LogSink)),
        )
        .unwrap()
    }

    fn write_source(&self, rel: &str, content: &str) {
        let path = self.source.join(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, content).unwrap();
    }

    /// A second working copy of origin, synced to its current head.
    fn clone(&self, name: &str) -> GitBackend {
        let mut backend =
            GitBackend::open_or_init(self.root.path().join(name), "main", CommitAuthor::default()).unwrap();
        backend.set_remote(&self.origin.to_string_lossy()).unwrap();
        backend.pull().unwrap();
        backend
    }

    fn origin_head_message(&self) -> String {
        let repo = Repository::open_bare(&self.origin).unwrap();
        let commit = repo
            .find_reference("refs/heads/main")
            .unwrap()
            .peel_to_commit()
            .unwrap();
        commit.message().unwrap_or_default().to_string()
    }

    fn origin_file(&self, rel: &str) -> Option<String> {
        let repo = Repository::open_bare(&self.origin).unwrap();
        let tree = repo
            .find_reference("refs/heads/main")
            .ok()?
            .peel_to_tree()
            .ok()?;
        let entry = tree.get_path(Path::new(rel)).ok()?;
        let blob = repo.find_blob(entry.id()).ok()?;
        Some(String::from_utf8_lossy(blob.content()).into_owned())
    }
}

fn commit_in(backend: &mut GitBackend, rel: &str, content: &str) {
    fs::write(backend.workdir().join(rel), content).unwrap();
    backend.stage_all().unwrap();
    backend.commit(&format!("edit {rel}")).unwrap();
    backend.push().unwrap();
}

// ===========================================================================
// Initial sync
// ===========================================================================

#[test]
fn test_initial_sync_mirrors_scoped_tree_to_origin() {
    let env = TestEnv::new();
    env.write_source("i3/config", "bindsym $mod+Return exec kitty\n");
    env.write_source("cache/tmp.log", "noise\n");

    let mut engine = env.engine(&["i3/**"], &["**/*.log"], ResolutionStrategy::MergeBoth);
    let stats = engine.initial_sync().unwrap();

    assert!(env.mirror.join("i3/config").is_file());
    assert!(!env.mirror.join("cache").exists());
    assert_eq!(stats.summary.count(ChangeKind::Added), 2);
    assert!(stats.pushed);

    assert_eq!(env.origin_head_message(), INITIAL_COMMIT_MESSAGE);
    assert_eq!(
        env.origin_file("i3/config").as_deref(),
        Some("bindsym $mod+Return exec kitty\n")
    );
    assert!(env.origin_file("cache/tmp.log").is_none());
}

#[test]
fn test_second_initial_sync_is_empty() {
    let env = TestEnv::new();
    env.write_source("kitty/kitty.conf", "font_size 11\n");

    let mut engine = env.engine(&[], &[], ResolutionStrategy::MergeBoth);
    engine.initial_sync().unwrap();

    let again = engine.initial_sync().unwrap();
    assert!(again.summary.is_empty());
    assert!(again.commit.is_none());
    assert!(!again.pushed);
}

#[test]
fn test_restart_picks_up_existing_mirror_repository() {
    let env = TestEnv::new();
    env.write_source("picom.conf", "shadow = true\n");
    env.engine(&[], &[], ResolutionStrategy::MergeBoth)
        .initial_sync()
        .unwrap();

    env.write_source("picom.conf", "shadow = false\n");
    let mut restarted = env.engine(&[], &[], ResolutionStrategy::MergeBoth);
    let stats = restarted.initial_sync().unwrap();

    assert_eq!(stats.summary.count(ChangeKind::Modified), 1);
    assert_eq!(env.origin_file("picom.conf").as_deref(), Some("shadow = false\n"));
}

// ===========================================================================
// Batches
// ===========================================================================

#[test]
fn test_batch_propagates_edits_and_deletions() {
    let env = TestEnv::new();
    env.write_source("sway/config", "set $mod Mod4\n");
    env.write_source("dunst/dunstrc", "[global]\n");

    let mut engine = env.engine(&[], &[], ResolutionStrategy::MergeBoth);
    engine.initial_sync().unwrap();

    fs::remove_dir_all(env.source.join("dunst")).unwrap();
    env.write_source("sway/config", "set $mod Mod1\n");
    let stats = engine
        .sync_batch(&[PathBuf::from("dunst"), PathBuf::from("sway/config")])
        .unwrap();

    assert!(stats.pushed);
    assert_eq!(
        env.origin_head_message(),
        "Configuration update: modified: sway/config; deleted: dunst"
    );
    assert!(env.origin_file("dunst/dunstrc").is_none());
    assert_eq!(env.origin_file("sway/config").as_deref(), Some("set $mod Mod1\n"));
}

#[test]
fn test_batch_pulls_remote_additions() {
    let env = TestEnv::new();
    env.write_source("a.conf", "a\n");
    let mut engine = env.engine(&[], &[], ResolutionStrategy::MergeBoth);
    engine.initial_sync().unwrap();

    let mut other = env.clone("other");
    commit_in(&mut other, "remote-only.conf", "from elsewhere\n");

    env.write_source("a.conf", "a2\n");
    engine.sync_batch(&[PathBuf::from("a.conf")]).unwrap();

    assert!(env.mirror.join("remote-only.conf").exists());
    assert_eq!(env.origin_file("a.conf").as_deref(), Some("a2\n"));
    assert_eq!(env.origin_file("remote-only.conf").as_deref(), Some("from elsewhere\n"));
}

// ===========================================================================
// Conflicts
// ===========================================================================

fn diverge(env: &TestEnv, strategy: ResolutionStrategy) -> SyncEngine {
    env.write_source("alacritty.toml", "opacity = 1.0\n");
    let mut engine = env.engine(&[], &[], strategy);
    engine.initial_sync().unwrap();

    let mut other = env.clone("other");
    commit_in(&mut other, "alacritty.toml", "opacity = 0.8\n");

    env.write_source("alacritty.toml", "opacity = 0.9\n");
    engine
}

#[test]
fn test_conflict_resolved_with_remote_version() {
    let env = TestEnv::new();
    let mut engine = diverge(&env, ResolutionStrategy::KeepRemote);

    let stats = engine.sync_batch(&[PathBuf::from("alacritty.toml")]).unwrap();

    assert_eq!(stats.conflicts_detected, 1);
    assert_eq!(stats.conflicts_resolved, 1);
    assert!(stats.pushed);
    assert_eq!(
        fs::read_to_string(env.mirror.join("alacritty.toml")).unwrap(),
        "opacity = 0.8\n"
    );
    assert_eq!(env.origin_file("alacritty.toml").as_deref(), Some("opacity = 0.8\n"));
}

#[test]
fn test_conflict_merge_both_keeps_markers_under_header() {
    let env = TestEnv::new();
    let mut engine = diverge(&env, ResolutionStrategy::MergeBoth);

    engine.sync_batch(&[PathBuf::from("alacritty.toml")]).unwrap();

    let merged = env.origin_file("alacritty.toml").unwrap();
    assert!(merged.starts_with(MERGE_HEADER));
    assert!(merged.contains("<<<<<<<"));
    assert!(merged.contains("opacity = 0.9"));
    assert!(merged.contains("opacity = 0.8"));
    assert!(merged.contains(">>>>>>>"));
}

// ===========================================================================
// Monitoring
// ===========================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_monitor_syncs_settled_changes() {
    let env = TestEnv::new();
    env.write_source("waybar/config", "{}\n");

    let mut engine = env.engine(&[], &["**/*.tmp"], ResolutionStrategy::MergeBoth);
    engine.initial_sync().unwrap();

    let (stop_tx, stop_rx) = tokio::sync::oneshot::channel::<()>();
    let options = AggregatorOptions {
        tick: Duration::from_millis(100),
        quiet: Duration::from_millis(300),
    };
    let monitor = tokio::spawn(engine.monitor(options, async {
        let _ = stop_rx.await;
    }));

    // Let the watches settle before touching the tree.
    tokio::time::sleep(Duration::from_millis(200)).await;
    env.write_source("waybar/style.css", "* { font-size: 12px; }\n");
    env.write_source("waybar/scratch.tmp", "ignored\n");

    let mut synced = false;
    for _ in 0..100 {
        if env.origin_file("waybar/style.css").is_some() {
            synced = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }

    let _ = stop_tx.send(());
    let engine = monitor.await.unwrap().unwrap();

    assert!(synced, "watched change never reached origin");
    assert!(env.origin_file("waybar/scratch.tmp").is_none());
    assert_eq!(
        env.origin_head_message(),
        "Configuration update: added: waybar/style.css"
    );
    assert_eq!(engine.state(), dotmirror_core::sync_engine::SyncState::Idle);
}
