//! Commit messages and human-readable change reports built from a
//! [`ChangeSummary`].
//!
//! Presentation is delegated to a stateless [`ReportStyle`] so the core
//! stays free of terminal concerns; [`PlainStyle`] renders unadorned text.

use crate::filter;
use crate::reconcile::{ChangeKind, ChangeSummary};

/// Message for the commit created by the initial full sync.
pub const INITIAL_COMMIT_MESSAGE: &str = "Initial sync of configuration files";

/// Paths listed per kind in a commit message.
pub const COMMIT_PATHS_PER_KIND: usize = 3;

/// Default number of entries per kind shown in a change report.
pub const DEFAULT_REPORT_LIMIT: usize = 5;

/// Build the commit message for a reconciled batch.
///
/// Each kind lists up to [`COMMIT_PATHS_PER_KIND`] paths followed by
/// `and N more`; kinds are joined with `; `. When nothing was classified the
/// message falls back to the size of the batch.
pub fn commit_message(summary: &ChangeSummary, batch_len: usize) -> String {
    let mut parts = Vec::new();

    for kind in ChangeKind::ALL {
        let paths = summary.paths(kind);
        if paths.is_empty() {
            continue;
        }
        let mut listed = paths
            .iter()
            .take(COMMIT_PATHS_PER_KIND)
            .map(|p| filter::to_slash(&p.path))
            .collect::<Vec<_>>()
            .join(", ");
        if paths.len() > COMMIT_PATHS_PER_KIND {
            listed.push_str(&format!(" and {} more", paths.len() - COMMIT_PATHS_PER_KIND));
        }
        parts.push(format!("{kind}: {listed}"));
    }

    if parts.is_empty() {
        return format!("Updated configuration files: {batch_len} files changed");
    }
    format!("Configuration update: {}", parts.join("; "))
}

/// Formatting capability for change reports.
pub trait ReportStyle {
    /// Section heading such as `Added files:`.
    fn heading(&self, text: &str) -> String;
    /// One changed entry.
    fn entry(&self, kind: ChangeKind, text: &str) -> String;
    /// The overflow line for a capped section.
    fn overflow(&self, text: &str) -> String;
}

/// Unstyled output.
#[derive(Debug, Default, Clone, Copy)]
pub struct PlainStyle;

impl ReportStyle for PlainStyle {
    fn heading(&self, text: &str) -> String {
        text.to_string()
    }

    fn entry(&self, kind: ChangeKind, text: &str) -> String {
        format!("  [{kind}] {text}")
    }

    fn overflow(&self, text: &str) -> String {
        format!("  {text}")
    }
}

/// Render `summary` as report lines, showing at most `limit` entries per
/// kind. `limit` only caps the display.
pub fn change_report(summary: &ChangeSummary, limit: usize, style: &dyn ReportStyle) -> Vec<String> {
    let mut lines = Vec::new();

    for kind in ChangeKind::ALL {
        let paths = summary.paths(kind);
        if paths.is_empty() {
            continue;
        }
        lines.push(style.heading(&format!("{} files:", capitalize(kind.as_str()))));
        for changed in paths.iter().take(limit) {
            lines.push(style.entry(kind, &changed.to_string()));
        }
        if paths.len() > limit {
            lines.push(style.overflow(&format!(
                "... and {} more {kind} files",
                paths.len() - limit
            )));
        }
    }
    lines
}

fn capitalize(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}
