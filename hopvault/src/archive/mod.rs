//! Snapshot archive with drift classification.
//!
//! Every capture is appended under `(device, timestamp)`. On append the
//! blob is fingerprinted and compared with the device's most recent prior
//! entry, which decides whether the capture is the first for the device,
//! unchanged, or changed.

mod fingerprint;
mod retention;
mod store;
mod upload;

use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, TimeDelta, Utc};
use log::{debug, info, warn};

pub use fingerprint::Fingerprint;
pub use retention::RetentionPolicy;
pub use store::{
    EntryKey, FsStore, MemoryStore, SnapshotStore, TIMESTAMP_FORMAT, entry_file_name,
    format_timestamp, parse_timestamp, truncate_millis, validate_device_name,
};
pub use upload::{
    MirrorStore, SftpSettings, SftpTarget, Upload, UploadQueue, UploadStats, UploadTarget,
    Uploader, remote_path, upload_queue,
};

use crate::error::{ArchiveError, Result};

/// Drift classification of one recorded capture.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Drift {
    /// No prior entry for the device.
    First,

    /// Same fingerprint as the most recent prior entry.
    Unchanged,

    /// Fingerprint differs from the most recent prior entry.
    Changed,
}

impl fmt::Display for Drift {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Drift::First => "first",
            Drift::Unchanged => "unchanged",
            Drift::Changed => "changed",
        })
    }
}

/// A persisted snapshot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveEntry {
    pub key: EntryKey,
    pub fingerprint: Fingerprint,
    pub size: usize,
}

/// What [`Archive::record`] stored and how it compares.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Recorded {
    pub entry: ArchiveEntry,
    pub drift: Drift,

    /// The entry it was compared with.
    pub prior: Option<EntryKey>,
}

/// Append-only snapshot archive over a [`SnapshotStore`].
///
/// Safe to share between concurrently running chains. Appends and sweeps
/// for the same device are serialized, so two captures can never both see
/// the same prior entry or overwrite each other.
pub struct Archive {
    store: Box<dyn SnapshotStore>,
    locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl fmt::Debug for Archive {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Archive").finish_non_exhaustive()
    }
}

impl Archive {
    pub fn new(store: impl SnapshotStore + 'static) -> Self {
        Self {
            store: Box::new(store),
            locks: Mutex::new(HashMap::new()),
        }
    }

    /// Archive over an in-memory store.
    pub fn in_memory() -> Self {
        Self::new(MemoryStore::new())
    }

    /// Archive over flat files under `root`.
    pub fn open_dir(root: impl Into<PathBuf>) -> Result<Self> {
        Ok(Self::new(FsStore::new(root)?))
    }

    pub fn store(&self) -> &dyn SnapshotStore {
        self.store.as_ref()
    }

    /// Append a capture and classify it against the most recent prior entry.
    ///
    /// The fingerprint covers `blob` exactly as given, so any byte
    /// difference is drift. Captures from a [`HopChain`](crate::HopChain)
    /// arrive already normalized by
    /// [`normalize_output`](crate::driver::normalize_output): `\r\n` and
    /// bare `\r` become `\n`, and leading or trailing blank lines are
    /// dropped. Differences confined to those therefore never show as
    /// drift there.
    ///
    /// A timestamp that collides with an existing entry is moved forward
    /// one millisecond at a time until it is free.
    pub fn record(
        &self,
        device: &str,
        blob: &[u8],
        captured_at: DateTime<Utc>,
    ) -> Result<Recorded> {
        validate_device_name(device)?;
        let lock = self.device_lock(device);
        let _guard = lock_ignoring_poison(&*lock);

        let existing = self.store.list(device)?;
        let mut timestamp = truncate_millis(captured_at);
        while existing.binary_search(&timestamp).is_ok() {
            timestamp += TimeDelta::milliseconds(1);
        }

        let fingerprint = Fingerprint::of(blob);
        let prior = prior_timestamp(&existing, timestamp).map(|ts| EntryKey::new(device, ts));
        let drift = match &prior {
            None => Drift::First,
            Some(key) => {
                let previous = Fingerprint::of(&self.store.get(key)?);
                if previous == fingerprint {
                    Drift::Unchanged
                } else {
                    Drift::Changed
                }
            }
        };

        let key = EntryKey::new(device, timestamp);
        self.store.put(&key, blob)?;
        debug!("recorded {} ({}, {})", key, drift, fingerprint.short());

        Ok(Recorded {
            entry: ArchiveEntry {
                key,
                fingerprint,
                size: blob.len(),
            },
            drift,
            prior,
        })
    }

    /// The latest entry for `device` strictly before `before`.
    pub fn most_recent_prior(
        &self,
        device: &str,
        before: DateTime<Utc>,
    ) -> Result<Option<ArchiveEntry>> {
        let timestamps = self.store.list(device)?;
        match prior_timestamp(&timestamps, truncate_millis(before)) {
            Some(ts) => self.entry(&EntryKey::new(device, ts)).map(Some),
            None => Ok(None),
        }
    }

    /// The newest entry for `device`.
    pub fn latest(&self, device: &str) -> Result<Option<ArchiveEntry>> {
        match self.store.list(device)?.last() {
            Some(ts) => self.entry(&EntryKey::new(device, *ts)).map(Some),
            None => Ok(None),
        }
    }

    /// Keys stored for `device`, oldest first.
    pub fn entries(&self, device: &str) -> Result<Vec<EntryKey>> {
        Ok(self
            .store
            .list(device)?
            .into_iter()
            .map(|ts| EntryKey::new(device, ts))
            .collect())
    }

    pub fn read(&self, key: &EntryKey) -> Result<Vec<u8>> {
        self.store.get(key)
    }

    fn entry(&self, key: &EntryKey) -> Result<ArchiveEntry> {
        let blob = self.store.get(key)?;
        Ok(ArchiveEntry {
            key: key.clone(),
            fingerprint: Fingerprint::of(&blob),
            size: blob.len(),
        })
    }

    /// Remove entries older than the policy allows.
    ///
    /// Visits every device even when some removals fail; failures are
    /// logged and reported together as one `Sweep` error afterwards.
    pub fn sweep(&self, policy: &RetentionPolicy, now: DateTime<Utc>) -> Result<usize> {
        if policy.is_disabled() {
            debug!("retention disabled, nothing swept");
            return Ok(0);
        }

        let devices = self.store.devices().map_err(|e| ArchiveError::Sweep {
            message: format!("listing devices: {}", e),
        })?;

        let mut removed = 0;
        let mut failures = Vec::new();
        for device in &devices {
            let lock = self.device_lock(device);
            let _guard = lock_ignoring_poison(&*lock);

            let timestamps = match self.store.list(device) {
                Ok(timestamps) => timestamps,
                Err(e) => {
                    warn!("retention: cannot list {}: {}", device, e);
                    failures.push(device.clone());
                    continue;
                }
            };

            for ts in policy.expired(&timestamps, now) {
                let key = EntryKey::new(device.as_str(), ts);
                match self.store.remove(&key) {
                    Ok(()) => {
                        debug!("retention: removed {}", key);
                        removed += 1;
                    }
                    Err(e) => {
                        warn!("retention: cannot remove {}: {}", key, e);
                        failures.push(key.to_string());
                    }
                }
            }
        }

        if !failures.is_empty() {
            return Err(ArchiveError::Sweep {
                message: format!(
                    "{} removed, {} failed ({})",
                    removed,
                    failures.len(),
                    failures.join(", ")
                ),
            }
            .into());
        }

        info!("retention: removed {} entries across {} devices", removed, devices.len());
        Ok(removed)
    }

    fn device_lock(&self, device: &str) -> Arc<Mutex<()>> {
        let mut locks = lock_ignoring_poison(&self.locks);
        Arc::clone(locks.entry(device.to_string()).or_default())
    }
}

/// Latest timestamp strictly before `before` in an ascending list.
fn prior_timestamp(timestamps: &[DateTime<Utc>], before: DateTime<Utc>) -> Option<DateTime<Utc>> {
    let idx = timestamps.partition_point(|ts| *ts < before);
    idx.checked_sub(1).map(|i| timestamps[i])
}

/// A panic while holding an archive lock leaves nothing half-written
/// in memory, so the guard is still usable.
fn lock_ignoring_poison<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
