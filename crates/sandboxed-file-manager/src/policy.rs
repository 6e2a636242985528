//! Retention policy for stored objects.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Which timestamp a retention decision is based on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum TimeMatch {
    /// Last read or write seen by this process, falling back to mtime
    #[default]
    LastAccess,
    /// Modification time (mtime)
    Modified,
}

/// Configuration for automatic removal of stale objects.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CleanupPolicy {
    /// How long an object is kept before it is eligible for removal
    pub retention_duration: Duration,
    /// Which timestamp to use for cleanup decisions
    pub time_match: TimeMatch,
    /// Whether cleanup is enabled
    pub enabled: bool,
}

impl CleanupPolicy {
    /// 24 hours retention based on last access.
    #[must_use]
    pub fn new() -> Self {
        Self {
            retention_duration: Duration::from_secs(24 * 60 * 60),
            time_match: TimeMatch::LastAccess,
            enabled: true,
        }
    }

    #[must_use]
    pub fn remove_after(mut self, duration: Duration) -> Self {
        self.retention_duration = duration;
        self
    }

    #[must_use]
    pub fn time_match(mut self, time_match: TimeMatch) -> Self {
        self.time_match = time_match;
        self
    }

    #[must_use]
    pub fn enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    /// Keep everything forever.
    #[must_use]
    pub fn disabled() -> Self {
        Self {
            retention_duration: Duration::ZERO,
            time_match: TimeMatch::LastAccess,
            enabled: false,
        }
    }

    /// A disabled policy or a zero retention both mean nothing ever expires.
    #[must_use]
    pub fn is_infinite(&self) -> bool {
        !self.enabled || self.retention_duration.is_zero()
    }

    /// Check interval scaled to the retention so drift stays proportional.
    #[must_use]
    pub fn recommended_cleanup_interval(&self) -> Duration {
        match self.retention_duration.as_secs() {
            0..=3600 => Duration::from_secs(60),
            3601..=86400 => Duration::from_secs(600),
            86401..=604_800 => Duration::from_secs(3600),
            604_801..=2_592_000 => Duration::from_secs(14400),
            _ => Duration::from_secs(43200),
        }
    }

    /// Whether an object with the given timestamps should be removed now.
    #[must_use]
    pub fn should_cleanup(&self, last_accessed: DateTime<Utc>, modified: DateTime<Utc>) -> bool {
        if self.is_infinite() {
            return false;
        }

        let cutoff =
            Utc::now() - chrono::Duration::from_std(self.retention_duration).unwrap_or_default();

        let timestamp = match self.time_match {
            TimeMatch::LastAccess => last_accessed.max(modified),
            TimeMatch::Modified => modified,
        };

        timestamp < cutoff
    }
}

impl Default for CleanupPolicy {
    fn default() -> Self {
        Self::new()
    }
}
