//! Retention policy for archived snapshots.

use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};

/// How long snapshots are kept.
///
/// The newest entry of every device is always kept, however old it is,
/// so at least one restorable backup exists for each device. A zero
/// `max_age` disables pruning.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetentionPolicy {
    pub max_age: Duration,
}

impl RetentionPolicy {
    pub fn new(max_age: Duration) -> Self {
        Self { max_age }
    }

    /// Saturates for day counts too large to represent.
    pub fn from_days(days: u64) -> Self {
        Self::new(Duration::from_secs(days.saturating_mul(24 * 60 * 60)))
    }

    /// Keep everything.
    pub fn keep_all() -> Self {
        Self::new(Duration::ZERO)
    }

    pub fn is_disabled(&self) -> bool {
        self.max_age.is_zero()
    }

    /// Entries older than this are eligible for removal.
    pub fn cutoff(&self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        if self.is_disabled() {
            return None;
        }
        let age = TimeDelta::from_std(self.max_age).ok()?;
        now.checked_sub_signed(age)
    }

    /// Timestamps from one device's entries that should be removed.
    ///
    /// `timestamps` must be sorted oldest first. The last one is never
    /// returned.
    pub fn expired(&self, timestamps: &[DateTime<Utc>], now: DateTime<Utc>) -> Vec<DateTime<Utc>> {
        let Some(cutoff) = self.cutoff(now) else {
            return Vec::new();
        };
        let Some((_newest, older)) = timestamps.split_last() else {
            return Vec::new();
        };
        older.iter().filter(|ts| **ts < cutoff).copied().collect()
    }
}

impl Default for RetentionPolicy {
    fn default() -> Self {
        Self::from_days(30)
    }
}
