//! Running counters of photos, windows and decisions.

use crate::core::FlushReason;
use crate::sink::Delivery;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::warn;

/// Counters for the current run, optionally seeded from a previous one.
#[derive(Debug)]
pub struct ActivityLog {
    /// Created files seen by the watcher
    photos_seen: AtomicU64,
    /// Created files skipped by the extension filter
    photos_skipped: AtomicU64,
    /// Photos classified and added to a window
    records_admitted: AtomicU64,
    /// Photos lost to a classification failure
    records_dropped: AtomicU64,
    /// Windows flushed because they filled up
    windows_full: AtomicU64,
    /// Windows flushed by their deadline
    windows_timed_out: AtomicU64,
    positive_decisions: AtomicU64,
    negative_decisions: AtomicU64,
    reports_delivered: AtomicU64,
    reports_spooled: AtomicU64,
    reports_lost: AtomicU64,
    watcher_errors: AtomicU64,
    /// Session start time
    session_start: DateTime<Utc>,
    /// Path for persisting stats
    persist_path: Option<PathBuf>,
}

impl ActivityLog {
    /// Create a new activity log.
    pub fn new() -> Self {
        Self {
            photos_seen: AtomicU64::new(0),
            photos_skipped: AtomicU64::new(0),
            records_admitted: AtomicU64::new(0),
            records_dropped: AtomicU64::new(0),
            windows_full: AtomicU64::new(0),
            windows_timed_out: AtomicU64::new(0),
            positive_decisions: AtomicU64::new(0),
            negative_decisions: AtomicU64::new(0),
            reports_delivered: AtomicU64::new(0),
            reports_spooled: AtomicU64::new(0),
            reports_lost: AtomicU64::new(0),
            watcher_errors: AtomicU64::new(0),
            session_start: Utc::now(),
            persist_path: None,
        }
    }

    /// Create an activity log with persistence.
    pub fn with_persistence(path: PathBuf) -> Self {
        let mut log = Self::new();
        log.persist_path = Some(path);

        // Try to load existing stats
        if let Err(e) = log.load() {
            warn!("Could not load previous activity stats: {e}");
        }

        log
    }

    pub fn record_photo_seen(&self) {
        self.photos_seen.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_photo_skipped(&self) {
        self.photos_skipped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_admitted(&self) {
        self.records_admitted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_dropped(&self) {
        self.records_dropped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_watcher_error(&self) {
        self.watcher_errors.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a flushed window and its decision.
    pub fn record_decision(&self, reason: FlushReason, is_positive: bool) {
        match reason {
            FlushReason::Full => self.windows_full.fetch_add(1, Ordering::Relaxed),
            FlushReason::TimedOut => self.windows_timed_out.fetch_add(1, Ordering::Relaxed),
        };
        if is_positive {
            self.positive_decisions.fetch_add(1, Ordering::Relaxed);
        } else {
            self.negative_decisions.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Record how a report was delivered.
    pub fn record_delivery(&self, delivery: Delivery) {
        let counter = match delivery {
            Delivery::Delivered => &self.reports_delivered,
            Delivery::Spooled => &self.reports_spooled,
            Delivery::Lost => &self.reports_lost,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    /// Get the current statistics.
    pub fn stats(&self) -> ActivityStats {
        ActivityStats {
            photos_seen: self.photos_seen.load(Ordering::Relaxed),
            photos_skipped: self.photos_skipped.load(Ordering::Relaxed),
            records_admitted: self.records_admitted.load(Ordering::Relaxed),
            records_dropped: self.records_dropped.load(Ordering::Relaxed),
            windows_full: self.windows_full.load(Ordering::Relaxed),
            windows_timed_out: self.windows_timed_out.load(Ordering::Relaxed),
            positive_decisions: self.positive_decisions.load(Ordering::Relaxed),
            negative_decisions: self.negative_decisions.load(Ordering::Relaxed),
            reports_delivered: self.reports_delivered.load(Ordering::Relaxed),
            reports_spooled: self.reports_spooled.load(Ordering::Relaxed),
            reports_lost: self.reports_lost.load(Ordering::Relaxed),
            watcher_errors: self.watcher_errors.load(Ordering::Relaxed),
            session_start: self.session_start,
            session_duration_secs: (Utc::now() - self.session_start).num_seconds().max(0) as u64,
        }
    }

    /// Get a summary string for display.
    pub fn summary(&self) -> String {
        self.stats().summary()
    }

    /// Save stats to disk.
    pub fn save(&self) -> Result<(), std::io::Error> {
        if let Some(ref path) = self.persist_path {
            // Ensure parent directory exists
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)?;
            }

            let persisted = PersistedStats {
                stats: self.stats(),
                last_updated: Utc::now(),
            };
            let json = serde_json::to_string_pretty(&persisted).map_err(std::io::Error::other)?;

            std::fs::write(path, json)?;
        }
        Ok(())
    }

    /// Load persisted stats from disk without attaching them to a log.
    pub fn read_persisted(path: &std::path::Path) -> Result<ActivityStats, std::io::Error> {
        let content = std::fs::read_to_string(path)?;
        let persisted: PersistedStats =
            serde_json::from_str(&content).map_err(std::io::Error::other)?;
        Ok(persisted.stats)
    }

    /// Load stats from disk.
    fn load(&mut self) -> Result<(), std::io::Error> {
        if let Some(ref path) = self.persist_path {
            if path.exists() {
                let s = Self::read_persisted(path)?;
                self.photos_seen.store(s.photos_seen, Ordering::Relaxed);
                self.photos_skipped.store(s.photos_skipped, Ordering::Relaxed);
                self.records_admitted.store(s.records_admitted, Ordering::Relaxed);
                self.records_dropped.store(s.records_dropped, Ordering::Relaxed);
                self.windows_full.store(s.windows_full, Ordering::Relaxed);
                self.windows_timed_out.store(s.windows_timed_out, Ordering::Relaxed);
                self.positive_decisions.store(s.positive_decisions, Ordering::Relaxed);
                self.negative_decisions.store(s.negative_decisions, Ordering::Relaxed);
                self.reports_delivered.store(s.reports_delivered, Ordering::Relaxed);
                self.reports_spooled.store(s.reports_spooled, Ordering::Relaxed);
                self.reports_lost.store(s.reports_lost, Ordering::Relaxed);
                self.watcher_errors.store(s.watcher_errors, Ordering::Relaxed);
            }
        }
        Ok(())
    }
}

impl Default for ActivityLog {
    fn default() -> Self {
        Self::new()
    }
}

/// Snapshot of activity statistics.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActivityStats {
    pub photos_seen: u64,
    pub photos_skipped: u64,
    pub records_admitted: u64,
    pub records_dropped: u64,
    pub windows_full: u64,
    pub windows_timed_out: u64,
    pub positive_decisions: u64,
    pub negative_decisions: u64,
    pub reports_delivered: u64,
    pub reports_spooled: u64,
    pub reports_lost: u64,
    pub watcher_errors: u64,
    pub session_start: DateTime<Utc>,
    pub session_duration_secs: u64,
}

impl ActivityStats {
    pub fn summary(&self) -> String {
        format!(
            "Activity:\n\
             - Photos seen: {} ({} skipped)\n\
             - Photos classified: {} ({} dropped)\n\
             - Bursts decided: {} full, {} timed out\n\
             - Visits: {}, false motion events: {}\n\
             - Reports: {} delivered, {} spooled, {} lost\n\
             - Watcher errors: {}\n\
             - Session duration: {} seconds",
            self.photos_seen,
            self.photos_skipped,
            self.records_admitted,
            self.records_dropped,
            self.windows_full,
            self.windows_timed_out,
            self.positive_decisions,
            self.negative_decisions,
            self.reports_delivered,
            self.reports_spooled,
            self.reports_lost,
            self.watcher_errors,
            self.session_duration_secs
        )
    }
}

/// Stats format for persistence.
#[derive(Debug, Serialize, Deserialize)]
struct PersistedStats {
    #[serde(flatten)]
    stats: ActivityStats,
    last_updated: DateTime<Utc>,
}

/// Thread-safe shared activity log.
pub type SharedActivityLog = Arc<ActivityLog>;

/// Create a new shared activity log with persistence.
pub fn create_shared_log_with_persistence(path: PathBuf) -> SharedActivityLog {
    Arc::new(ActivityLog::with_persistence(path))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_activity_log_counting() {
        let log = ActivityLog::new();

        log.record_photo_seen();
        log.record_photo_seen();
        log.record_admitted();
        log.record_dropped();
        log.record_decision(FlushReason::TimedOut, false);
        log.record_decision(FlushReason::Full, true);
        log.record_delivery(Delivery::Spooled);

        let stats = log.stats();
        assert_eq!(stats.photos_seen, 2);
        assert_eq!(stats.records_admitted, 1);
        assert_eq!(stats.records_dropped, 1);
        assert_eq!(stats.windows_full, 1);
        assert_eq!(stats.windows_timed_out, 1);
        assert_eq!(stats.positive_decisions, 1);
        assert_eq!(stats.negative_decisions, 1);
        assert_eq!(stats.reports_spooled, 1);
    }

    #[test]
    fn test_persistence_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("activity.json");

        let log = ActivityLog::with_persistence(path.clone());
        log.record_photo_seen();
        log.record_watcher_error();
        log.save().unwrap();

        let reloaded = ActivityLog::with_persistence(path.clone());
        reloaded.record_photo_seen();
        let stats = reloaded.stats();
        assert_eq!(stats.photos_seen, 2);
        assert_eq!(stats.watcher_errors, 1);
        assert_eq!(ActivityLog::read_persisted(&path).unwrap().photos_seen, 1);
    }

    #[test]
    fn test_summary_format() {
        let summary = ActivityLog::new().summary();
        assert!(summary.contains("Photos seen"));
        assert!(summary.contains("false motion events"));
    }
}
