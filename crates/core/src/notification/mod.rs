//! Notifications about detected changes and sync results.
//!
//! Sinks are fire-and-forget: a failing sink logs and returns, it never
//! propagates an error into the sync cycle. The [`Notifier`] facade fans a
//! notification out to every configured sink.

pub mod desktop;

pub use desktop::DesktopSink;

use tracing::{error, info};

use crate::config::NotificationConfig;
use crate::reconcile::{ChangeKind, ChangeSummary};

/// Receiver of engine notifications.
pub trait NotificationSink: Send + Sync {
    fn file_changes_detected(&self, summary: &str);
    fn sync_error(&self, message: &str);
    fn sync_success(&self, message: &str);
}

/// Writes notifications to the tracing log.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogSink;

impl NotificationSink for LogSink {
    fn file_changes_detected(&self, summary: &str) {
        info!(summary, "changes detected");
    }

    fn sync_error(&self, message: &str) {
        error!(message, "sync error");
    }

    fn sync_success(&self, message: &str) {
        info!(message, "sync complete");
    }
}

/// Dispatches to every configured sink.
#[derive(Default)]
pub struct Notifier {
    sinks: Vec<Box<dyn NotificationSink>>,
}

impl Notifier {
    /// Build the notifier described by `config`. The log sink is always on.
    pub fn new(config: &NotificationConfig) -> Self {
        let mut notifier = Self::default().with_sink(LogSink);
        if config.desktop {
            info!(app_name = %config.app_name, "desktop notifications enabled");
            notifier = notifier.with_sink(DesktopSink::new(&config.app_name));
        }
        notifier
    }

    pub fn with_sink(mut self, sink: impl NotificationSink + 'static) -> Self {
        self.sinks.push(Box::new(sink));
        self
    }

    pub fn sink_count(&self) -> usize {
        self.sinks.len()
    }
}

impl NotificationSink for Notifier {
    fn file_changes_detected(&self, summary: &str) {
        for sink in &self.sinks {
            sink.file_changes_detected(summary);
        }
    }

    fn sync_error(&self, message: &str) {
        for sink in &self.sinks {
            sink.sync_error(message);
        }
    }

    fn sync_success(&self, message: &str) {
        for sink in &self.sinks {
            sink.sync_success(message);
        }
    }
}

/// Payload for [`NotificationSink::file_changes_detected`], e.g.
/// `Added: 2 files, Deleted: 1 files`. Kinds with no entries are omitted.
pub fn change_counts(summary: &ChangeSummary) -> String {
    ChangeKind::ALL
        .iter()
        .filter(|kind| summary.count(**kind) > 0)
        .map(|kind| {
            let label = match kind {
                ChangeKind::Added => "Added",
                ChangeKind::Modified => "Modified",
                ChangeKind::Deleted => "Deleted",
            };
            format!("{label}: {} files", summary.count(*kind))
        })
        .collect::<Vec<_>>()
        .join(", ")
}
