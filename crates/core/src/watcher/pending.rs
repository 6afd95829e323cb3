//! The pending change set owned by the aggregator task.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use tokio::time::Instant;

/// Absolute source paths mapped to the time of their most recent event.
#[derive(Debug, Default)]
pub struct PendingChanges {
    entries: HashMap<PathBuf, Instant>,
}

impl PendingChanges {
    pub fn new() -> Self {
        Self::default()
    }

    /// Note an event for `path`. Repeated events only move its timestamp.
    pub fn record(&mut self, path: PathBuf, at: Instant) {
        self.entries.insert(path, at);
    }

    /// Remove and return every entry that has been quiet for strictly longer
    /// than `quiet`, sorted by path.
    pub fn drain_settled(&mut self, now: Instant, quiet: Duration) -> Vec<(PathBuf, Instant)> {
        let mut settled: Vec<(PathBuf, Instant)> = Vec::new();
        self.entries.retain(|path, at| {
            if now.saturating_duration_since(*at) > quiet {
                settled.push((path.clone(), *at));
                false
            } else {
                true
            }
        });
        settled.sort_by(|a, b| a.0.cmp(&b.0));
        settled
    }

    /// Put back entries that could not be handed over. A newer event
    /// recorded in the meantime keeps its timestamp.
    pub fn restore(&mut self, entries: Vec<(PathBuf, Instant)>) {
        for (path, at) in entries {
            self.entries.entry(path).or_insert(at);
        }
    }

    pub fn contains(&self, path: &Path) -> bool {
        self.entries.contains_key(path)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const QUIET: Duration = Duration::from_secs(1);

    fn paths(settled: &[(PathBuf, Instant)]) -> Vec<PathBuf> {
        settled.iter().map(|(p, _)| p.clone()).collect()
    }

    #[test]
    fn test_rapid_writes_coalesce_into_one_entry() {
        let mut pending = PendingChanges::new();
        let t0 = Instant::now();
        let path = PathBuf::from("/home/u/.config/polybar/config.ini");

        for i in 0..5 {
            pending.record(path.clone(), t0 + Duration::from_millis(i * 50));
        }
        assert_eq!(pending.len(), 1);

        let settled = pending.drain_settled(t0 + Duration::from_secs(3), QUIET);
        assert_eq!(paths(&settled), vec![path]);
        assert!(pending.is_empty());
    }

    #[test]
    fn test_entries_within_quiet_window_stay_pending() {
        let mut pending = PendingChanges::new();
        let t0 = Instant::now();
        let path = PathBuf::from("/src/polybar/config.ini");

        // Two writes 200ms apart, ticks every 5s.
        pending.record(path.clone(), t0);
        pending.record(path.clone(), t0 + Duration::from_millis(200));

        // Exactly one quiet window after the last write is not enough.
        let at_boundary = t0 + Duration::from_millis(1200);
        assert!(pending.drain_settled(at_boundary, QUIET).is_empty());
        assert!(pending.contains(&path));

        let next_tick = t0 + Duration::from_secs(5);
        assert_eq!(paths(&pending.drain_settled(next_tick, QUIET)), vec![path]);
    }

    #[test]
    fn test_drain_is_partial_and_sorted() {
        let mut pending = PendingChanges::new();
        let t0 = Instant::now();
        pending.record(PathBuf::from("/src/b"), t0);
        pending.record(PathBuf::from("/src/a"), t0);
        pending.record(PathBuf::from("/src/fresh"), t0 + Duration::from_millis(1900));

        let settled = pending.drain_settled(t0 + Duration::from_secs(2), QUIET);
        assert_eq!(paths(&settled), vec![PathBuf::from("/src/a"), PathBuf::from("/src/b")]);
        assert_eq!(pending.len(), 1);
    }

    #[test]
    fn test_restore_keeps_newer_timestamp() {
        let mut pending = PendingChanges::new();
        let t0 = Instant::now();
        let path = PathBuf::from("/src/a");
        pending.record(path.clone(), t0);

        let settled = pending.drain_settled(t0 + Duration::from_secs(2), QUIET);
        let newer = t0 + Duration::from_millis(2500);
        pending.record(path.clone(), newer);
        pending.restore(settled);

        // The restored entry must not hide the newer event.
        assert!(pending.drain_settled(t0 + Duration::from_secs(3), QUIET).is_empty());
        assert_eq!(paths(&pending.drain_settled(t0 + Duration::from_secs(4), QUIET)), vec![path]);
    }
}
