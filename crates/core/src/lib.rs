//! dotmirror core library.
//!
//! Mirrors a scoped directory tree into a git working tree and keeps it in
//! sync with a remote: path filtering, mirror copying, change aggregation,
//! reconciliation, conflict resolution, notifications and the sync engine
//! that sequences them.

pub mod config;
pub mod conflict;
pub mod errors;
pub mod filter;
pub mod git;
pub mod mirror;
pub mod notification;
pub mod reconcile;
pub mod report;
pub mod sync_engine;
pub mod watcher;

// Re-exports for convenience.
pub use config::MirrorConfig;
pub use errors::CoreError;
pub use filter::ScopeRules;
pub use reconcile::{ChangeKind, ChangeSummary, Reconciler};
pub use sync_engine::{SyncEngine, SyncState, SyncStats};
