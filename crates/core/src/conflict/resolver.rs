//! Conflict resolution.
//!
//! The [`ConflictResolver`] walks `Idle -> DetectingConflicts ->
//! AwaitingStrategy -> Resolving -> Idle`, asking a [`StrategyPicker`] for a
//! [`ResolutionPlan`] once conflicts are known. Each path is resolved on its
//! own; a failing path never blocks the others.

use std::collections::HashMap;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use tracing::{debug, info, warn};

use super::detector::{detect_conflicts, ConflictRecord};
use crate::errors::ConflictError;
use crate::git::{Side, VcsBackend};

/// Header written at the top of a file resolved with
/// [`ResolutionStrategy::MergeBoth`].
pub const MERGE_HEADER: &str = "# MERGED FILE\n# Contains both versions due to conflict\n\n";

/// How to settle one conflicting path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResolutionStrategy {
    /// Take the local version.
    KeepLocal,
    /// Take the remote version.
    KeepRemote,
    /// Keep the conflicted file, markers included, under a header for manual
    /// follow-up.
    MergeBoth,
}

impl ResolutionStrategy {
    pub const ALL: [ResolutionStrategy; 3] = [Self::KeepLocal, Self::KeepRemote, Self::MergeBoth];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::KeepLocal => "local",
            Self::KeepRemote => "remote",
            Self::MergeBoth => "merge",
        }
    }

    /// One-line description for prompts.
    pub fn description(&self) -> &'static str {
        match self {
            Self::KeepLocal => "Keep local version",
            Self::KeepRemote => "Keep remote version",
            Self::MergeBoth => "Merge both versions (manual edit required)",
        }
    }
}

impl fmt::Display for ResolutionStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ResolutionStrategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "local" | "keep-local" | "ours" => Ok(Self::KeepLocal),
            "remote" | "keep-remote" | "theirs" => Ok(Self::KeepRemote),
            "merge" | "merge-both" | "both" => Ok(Self::MergeBoth),
            other => Err(format!("unknown resolution strategy '{other}'")),
        }
    }
}

/// Strategies chosen for one resolution session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResolutionPlan {
    /// The same strategy for every conflicting path.
    Uniform(ResolutionStrategy),
    /// A strategy per path. Paths without an entry stay unresolved.
    PerPath(HashMap<PathBuf, ResolutionStrategy>),
}

impl ResolutionPlan {
    pub fn strategy_for(&self, path: &Path) -> Option<ResolutionStrategy> {
        match self {
            Self::Uniform(strategy) => Some(*strategy),
            Self::PerPath(map) => map.get(path).copied(),
        }
    }
}

/// Chooses the resolution plan for a set of conflicts.
pub trait StrategyPicker: Send {
    fn pick(&mut self, conflicts: &[ConflictRecord]) -> ResolutionPlan;
}

/// Picker that always applies one configured strategy.
#[derive(Debug, Clone, Copy)]
pub struct FixedStrategy(pub ResolutionStrategy);

impl StrategyPicker for FixedStrategy {
    fn pick(&mut self, _conflicts: &[ConflictRecord]) -> ResolutionPlan {
        ResolutionPlan::Uniform(self.0)
    }
}

/// Resolver lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolverState {
    Idle,
    DetectingConflicts,
    AwaitingStrategy,
    Resolving,
}

impl fmt::Display for ResolverState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Idle => write!(f, "idle"),
            Self::DetectingConflicts => write!(f, "detecting_conflicts"),
            Self::AwaitingStrategy => write!(f, "awaiting_strategy"),
            Self::Resolving => write!(f, "resolving"),
        }
    }
}

/// Outcome of one resolution session.
#[derive(Debug, Default)]
pub struct ResolutionReport {
    pub resolved: Vec<(PathBuf, ResolutionStrategy)>,
    pub failures: Vec<(PathBuf, ConflictError)>,
}

impl ResolutionReport {
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }

    /// Paths that could not be resolved.
    pub fn unresolved_paths(&self) -> Vec<String> {
        self.failures
            .iter()
            .map(|(path, _)| path.display().to_string())
            .collect()
    }
}

/// Drives detection and resolution of unmerged paths.
#[derive(Debug)]
pub struct ConflictResolver {
    state: ResolverState,
}

impl Default for ConflictResolver {
    fn default() -> Self {
        Self::new()
    }
}

impl ConflictResolver {
    pub fn new() -> Self {
        Self {
            state: ResolverState::Idle,
        }
    }

    pub fn state(&self) -> ResolverState {
        self.state
    }

    fn set_state(&mut self, state: ResolverState) {
        debug!(from = %self.state, to = %state, "conflict resolver state transition");
        self.state = state;
    }

    /// Detect conflicts, ask `picker` for a plan and apply it.
    pub fn run(
        &mut self,
        backend: &mut dyn VcsBackend,
        picker: &mut dyn StrategyPicker,
    ) -> Result<ResolutionReport, ConflictError> {
        let conflicts = self.detect(backend)?;
        if conflicts.is_empty() {
            info!("no conflicts to resolve");
            return Ok(ResolutionReport::default());
        }

        self.set_state(ResolverState::AwaitingStrategy);
        let plan = picker.pick(&conflicts);
        Ok(self.resolve(backend, &conflicts, &plan))
    }

    /// Read the unmerged paths from the backend.
    pub fn detect(&mut self, backend: &dyn VcsBackend) -> Result<Vec<ConflictRecord>, ConflictError> {
        self.set_state(ResolverState::DetectingConflicts);
        match detect_conflicts(backend) {
            Ok(conflicts) => {
                if conflicts.is_empty() {
                    self.set_state(ResolverState::Idle);
                }
                Ok(conflicts)
            }
            Err(e) => {
                self.set_state(ResolverState::Idle);
                Err(e)
            }
        }
    }

    /// Apply `plan` to every conflict, collecting per-path failures.
    pub fn resolve(
        &mut self,
        backend: &mut dyn VcsBackend,
        conflicts: &[ConflictRecord],
        plan: &ResolutionPlan,
    ) -> ResolutionReport {
        self.set_state(ResolverState::Resolving);
        let mut report = ResolutionReport::default();

        for conflict in conflicts {
            let path = &conflict.path;
            let Some(strategy) = plan.strategy_for(path) else {
                warn!(path = %path.display(), "no strategy chosen, leaving conflict unresolved");
                report.failures.push((
                    path.clone(),
                    ConflictError::ResolutionFailed {
                        path: path.display().to_string(),
                        detail: "no strategy chosen".into(),
                    },
                ));
                continue;
            };

            match resolve_one(backend, path, strategy) {
                Ok(()) => {
                    info!(path = %path.display(), %strategy, "conflict resolved");
                    report.resolved.push((path.clone(), strategy));
                }
                Err(e) => {
                    warn!(path = %path.display(), %strategy, error = %e, "conflict resolution failed");
                    report.failures.push((path.clone(), e));
                }
            }
        }

        self.set_state(ResolverState::Idle);
        report
    }
}

fn resolve_one(
    backend: &mut dyn VcsBackend,
    path: &Path,
    strategy: ResolutionStrategy,
) -> Result<(), ConflictError> {
    let failed = |detail: String| ConflictError::ResolutionFailed {
        path: path.display().to_string(),
        detail,
    };

    match strategy {
        ResolutionStrategy::KeepLocal | ResolutionStrategy::KeepRemote => {
            let side = if strategy == ResolutionStrategy::KeepLocal {
                Side::Local
            } else {
                Side::Remote
            };
            let present = backend
                .restore_side(path, side)
                .map_err(|e| failed(e.to_string()))?;
            if !present {
                debug!(path = %path.display(), %side, "chosen side deleted the file");
            }
        }
        ResolutionStrategy::MergeBoth => {
            let target = backend.workdir().join(path);
            let content = match fs::read(&target) {
                Ok(content) => content,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                    // Modify/delete conflict: keep whichever side still exists.
                    let restored = backend
                        .restore_side(path, Side::Local)
                        .and_then(|local| if local { Ok(true) } else { backend.restore_side(path, Side::Remote) })
                        .map_err(|e| failed(e.to_string()))?;
                    if restored {
                        fs::read(&target).map_err(|e| failed(e.to_string()))?
                    } else {
                        Vec::new()
                    }
                }
                Err(e) => return Err(failed(e.to_string())),
            };

            let mut merged = Vec::with_capacity(MERGE_HEADER.len() + content.len());
            merged.extend_from_slice(MERGE_HEADER.as_bytes());
            merged.extend_from_slice(&content);
            fs::write(&target, merged).map_err(|e| failed(e.to_string()))?;
        }
    }

    backend
        .stage(&[path.to_path_buf()])
        .map_err(|e| failed(e.to_string()))
}
