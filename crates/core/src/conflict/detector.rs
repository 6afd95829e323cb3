//! Conflict detection from the backend's worktree status.

use std::path::PathBuf;

use tracing::{debug, info};

use crate::errors::ConflictError;
use crate::git::VcsBackend;

/// A path left unmerged by a pull.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConflictRecord {
    /// Path relative to the mirror root.
    pub path: PathBuf,
    /// Blob id of the local ("ours") version, when recoverable.
    pub local_id: Option<String>,
    /// Blob id of the remote ("theirs") version, when recoverable.
    pub remote_id: Option<String>,
}

impl ConflictRecord {
    /// Short ids for display, `-` when a side is unknown.
    pub fn short_ids(&self) -> (String, String) {
        let short = |id: &Option<String>| match id {
            Some(id) => id.chars().take(8).collect(),
            None => "-".to_string(),
        };
        (short(&self.local_id), short(&self.remote_id))
    }
}

/// List every unmerged path the backend reports.
pub fn detect_conflicts(backend: &dyn VcsBackend) -> Result<Vec<ConflictRecord>, ConflictError> {
    let entries = backend
        .unmerged_status()
        .map_err(ConflictError::DetectionFailed)?;

    let records: Vec<ConflictRecord> = entries
        .into_iter()
        .map(|entry| {
            debug!(
                path = %entry.path.display(),
                local = entry.local_id.as_deref().unwrap_or("-"),
                remote = entry.remote_id.as_deref().unwrap_or("-"),
                "unmerged path"
            );
            ConflictRecord {
                path: entry.path,
                local_id: entry.local_id,
                remote_id: entry.remote_id,
            }
        })
        .collect();

    if !records.is_empty() {
        info!(count = records.len(), "conflicts detected");
    }
    Ok(records)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_short_ids() {
        let record = ConflictRecord {
            path: PathBuf::from("i3/config"),
            local_id: Some("0123456789abcdef".into()),
            remote_id: None,
        };
        assert_eq!(record.short_ids(), ("01234567".to_string(), "-".to_string()));
    }
}
