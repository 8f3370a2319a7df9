//! Snapshot storage backends.
//!
//! The archive only needs a keyed blob store with ordered listing per
//! device. Two backends ship here: flat files on the local filesystem
//! and an in-memory map. Either can be mirrored to a remote upload
//! target with [`MirrorStore`](super::MirrorStore).

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::{DateTime, NaiveDateTime, Timelike, Utc};
use log::{debug, warn};

use crate::error::{ArchiveError, Result};

/// Timestamp format used in keys and file names.
pub const TIMESTAMP_FORMAT: &str = "%Y%m%dT%H%M%S%.3fZ";

const FILE_PREFIX: &str = "running-config_";
const FILE_SUFFIX: &str = ".txt";

/// Truncate to the millisecond precision keys carry.
pub fn truncate_millis(ts: DateTime<Utc>) -> DateTime<Utc> {
    let nanos = ts.nanosecond() / 1_000_000 * 1_000_000;
    ts.with_nanosecond(nanos).unwrap_or(ts)
}

pub fn format_timestamp(ts: &DateTime<Utc>) -> String {
    ts.format(TIMESTAMP_FORMAT).to_string()
}

pub fn parse_timestamp(s: &str) -> Option<DateTime<Utc>> {
    NaiveDateTime::parse_from_str(s, TIMESTAMP_FORMAT)
        .ok()
        .map(|naive| naive.and_utc())
}

/// Check that a device name is usable as a storage key.
///
/// Names become directory names, so path separators and dot-prefixed
/// names are refused.
pub fn validate_device_name(name: &str) -> Result<()> {
    let bad = name.is_empty()
        || name.starts_with('.')
        || name.chars().any(|c| matches!(c, '/' | '\\' | '\0') || c.is_control());
    if bad {
        return Err(ArchiveError::InvalidKey(name.to_string()).into());
    }
    Ok(())
}

/// File name of the snapshot stored under `key`, without its directory.
pub fn entry_file_name(key: &EntryKey) -> String {
    format!("{}{}{}", FILE_PREFIX, format_timestamp(&key.timestamp), FILE_SUFFIX)
}

/// (device, timestamp) key of one stored snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EntryKey {
    pub device: String,
    pub timestamp: DateTime<Utc>,
}

impl EntryKey {
    pub fn new(device: impl Into<String>, timestamp: DateTime<Utc>) -> Self {
        Self {
            device: device.into(),
            timestamp: truncate_millis(timestamp),
        }
    }
}

impl fmt::Display for EntryKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.device, format_timestamp(&self.timestamp))
    }
}

/// Keyed blob persistence for snapshots.
///
/// Implementations must be safe to share between chains. The archive
/// serializes writes per device, so a backend only has to keep distinct
/// keys independent.
pub trait SnapshotStore: Send + Sync {
    /// Store a blob under `key`.
    fn put(&self, key: &EntryKey, blob: &[u8]) -> Result<()>;

    /// Read the blob stored under `key`.
    fn get(&self, key: &EntryKey) -> Result<Vec<u8>>;

    /// Timestamps stored for `device`, oldest first.
    fn list(&self, device: &str) -> Result<Vec<DateTime<Utc>>>;

    /// Every device with at least one stored entry.
    fn devices(&self) -> Result<Vec<String>>;

    /// Remove the entry under `key`.
    fn remove(&self, key: &EntryKey) -> Result<()>;
}

/// Flat-file store.
///
/// ```text
/// {root}/
///   PE/
///     running-config_20261014T120000.000Z.txt
///   EOR1/
///     running-config_20261014T120000.000Z.txt
/// ```
///
/// Blobs are written to a temporary sibling and renamed into place, so a
/// listed entry is always complete.
#[derive(Debug, Clone)]
pub struct FsStore {
    root: PathBuf,
}

impl FsStore {
    /// Open a store rooted at `root`, creating the directory if needed.
    pub fn new(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        fs::create_dir_all(&root).map_err(|source| ArchiveError::Write {
            key: root.display().to_string(),
            source,
        })?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Path of the file holding `key`.
    pub fn entry_path(&self, key: &EntryKey) -> PathBuf {
        self.root.join(&key.device).join(entry_file_name(key))
    }

    fn io_read(key: &EntryKey, source: io::Error) -> crate::Error {
        if source.kind() == io::ErrorKind::NotFound {
            ArchiveError::NotFound {
                key: key.to_string(),
            }
            .into()
        } else {
            ArchiveError::Read {
                key: key.to_string(),
                source,
            }
            .into()
        }
    }
}

impl SnapshotStore for FsStore {
    fn put(&self, key: &EntryKey, blob: &[u8]) -> Result<()> {
        validate_device_name(&key.device)?;
        let path = self.entry_path(key);
        let write_err = |source| ArchiveError::Write {
            key: key.to_string(),
            source,
        };

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(write_err)?;
        }

        let tmp = path.with_extension("txt.tmp");
        fs::write(&tmp, blob).map_err(write_err)?;
        if let Err(e) = fs::rename(&tmp, &path) {
            let _ = fs::remove_file(&tmp);
            return Err(write_err(e).into());
        }

        debug!("stored {} ({} bytes) at {}", key, blob.len(), path.display());
        Ok(())
    }

    fn get(&self, key: &EntryKey) -> Result<Vec<u8>> {
        validate_device_name(&key.device)?;
        fs::read(self.entry_path(key)).map_err(|e| Self::io_read(key, e))
    }

    fn list(&self, device: &str) -> Result<Vec<DateTime<Utc>>> {
        validate_device_name(device)?;
        let dir = self.root.join(device);
        let entries = match fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(source) => {
                return Err(ArchiveError::Read {
                    key: device.to_string(),
                    source,
                }
                .into());
            }
        };

        let mut timestamps: Vec<DateTime<Utc>> = entries
            .flatten()
            .filter_map(|entry| {
                let name = entry.file_name();
                let name = name.to_str()?;
                let ts = name.strip_prefix(FILE_PREFIX)?.strip_suffix(FILE_SUFFIX)?;
                let parsed = parse_timestamp(ts);
                if parsed.is_none() {
                    warn!("ignoring unrecognised archive file {}", entry.path().display());
                }
                parsed
            })
            .collect();
        timestamps.sort();
        Ok(timestamps)
    }

    fn devices(&self) -> Result<Vec<String>> {
        let entries = fs::read_dir(&self.root).map_err(|source| ArchiveError::Read {
            key: self.root.display().to_string(),
            source,
        })?;

        let mut devices: Vec<String> = entries
            .flatten()
            .filter(|entry| entry.path().is_dir())
            .filter_map(|entry| entry.file_name().into_string().ok())
            .filter(|name| !name.starts_with('.'))
            .collect();
        devices.sort();
        Ok(devices)
    }

    fn remove(&self, key: &EntryKey) -> Result<()> {
        validate_device_name(&key.device)?;
        fs::remove_file(self.entry_path(key)).map_err(|source| {
            ArchiveError::Write {
                key: key.to_string(),
                source,
            }
            .into()
        })
    }
}

/// In-memory store for tests and embedding.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: Mutex<HashMap<String, BTreeMap<DateTime<Utc>, Vec<u8>>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn entries(&self) -> std::sync::MutexGuard<'_, HashMap<String, BTreeMap<DateTime<Utc>, Vec<u8>>>> {
        self.entries.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl SnapshotStore for MemoryStore {
    fn put(&self, key: &EntryKey, blob: &[u8]) -> Result<()> {
        validate_device_name(&key.device)?;
        self.entries()
            .entry(key.device.clone())
            .or_default()
            .insert(key.timestamp, blob.to_vec());
        Ok(())
    }

    fn get(&self, key: &EntryKey) -> Result<Vec<u8>> {
        self.entries()
            .get(&key.device)
            .and_then(|device| device.get(&key.timestamp))
            .cloned()
            .ok_or_else(|| {
                ArchiveError::NotFound {
                    key: key.to_string(),
                }
                .into()
            })
    }

    fn list(&self, device: &str) -> Result<Vec<DateTime<Utc>>> {
        Ok(self
            .entries()
            .get(device)
            .map(|entries| entries.keys().copied().collect())
            .unwrap_or_default())
    }

    fn devices(&self) -> Result<Vec<String>> {
        let mut devices: Vec<String> = self
            .entries()
            .iter()
            .filter(|(_, entries)| !entries.is_empty())
            .map(|(name, _)| name.clone())
            .collect();
        devices.sort();
        Ok(devices)
    }

    fn remove(&self, key: &EntryKey) -> Result<()> {
        let removed = self
            .entries()
            .get_mut(&key.device)
            .and_then(|entries| entries.remove(&key.timestamp));
        match removed {
            Some(_) => Ok(()),
            None => Err(ArchiveError::NotFound {
                key: key.to_string(),
            }
            .into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    fn ts(sec: u32, millis: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 10, 14, 12, 0, sec).unwrap() + chrono::TimeDelta::milliseconds(millis)
    }

    #[test]
    fn test_timestamp_format_round_trips_millis() {
        let t = ts(5, 123);
        let s = format_timestamp(&t);
        assert_eq!(s, "20261014T120005.123Z");
        assert_eq!(parse_timestamp(&s), Some(t));
        assert_eq!(parse_timestamp("20261014_120005"), None);
    }

    #[test]
    fn test_key_truncates_to_millis() {
        let t = ts(0, 0) + chrono::TimeDelta::nanoseconds(1_234_567);
        let key = EntryKey::new("PE", t);
        assert_eq!(key.timestamp, ts(0, 1));
        assert_eq!(key.to_string(), "PE/20261014T120000.001Z");
    }

    #[test]
    fn test_device_name_validation() {
        assert!(validate_device_name("EOR1").is_ok());
        assert!(validate_device_name("core-sw.dc1").is_ok());
        assert!(validate_device_name("").is_err());
        assert!(validate_device_name("..").is_err());
        assert!(validate_device_name("a/b").is_err());
        assert!(validate_device_name("a\\b").is_err());
    }

    #[test]
    fn test_fs_store_layout() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsStore::new(dir.path().join("backups")).unwrap();

        let key = EntryKey::new("SPINE", ts(1, 500));
        store.put(&key, b"hostname SPINE\n").unwrap();

        let path = dir
            .path()
            .join("backups/SPINE/running-config_20261014T120001.500Z.txt");
        assert!(path.is_file());
        assert_eq!(store.get(&key).unwrap(), b"hostname SPINE\n");

        // No temporary file left behind
        let names: Vec<_> = fs::read_dir(path.parent().unwrap())
            .unwrap()
            .flatten()
            .map(|e| e.file_name())
            .collect();
        assert_eq!(names.len(), 1);
    }

    #[test]
    fn test_fs_store_lists_in_order_and_ignores_strays() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsStore::new(dir.path()).unwrap();

        for (sec, body) in [(30, "c"), (10, "a"), (20, "b")] {
            store.put(&EntryKey::new("PE", ts(sec, 0)), body.as_bytes()).unwrap();
        }
        fs::write(dir.path().join("PE/notes.txt"), "x").unwrap();
        fs::write(dir.path().join("PE/running-config_garbage.txt"), "x").unwrap();

        assert_eq!(store.list("PE").unwrap(), vec![ts(10, 0), ts(20, 0), ts(30, 0)]);
        assert!(store.list("EOR1").unwrap().is_empty());
        assert_eq!(store.devices().unwrap(), vec!["PE".to_string()]);

        store.remove(&EntryKey::new("PE", ts(10, 0))).unwrap();
        assert_eq!(store.list("PE").unwrap(), vec![ts(20, 0), ts(30, 0)]);
    }

    #[test]
    fn test_fs_store_missing_entry() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsStore::new(dir.path()).unwrap();
        let err = store.get(&EntryKey::new("PE", ts(0, 0))).unwrap_err();
        assert!(matches!(err, crate::Error::Archive(ArchiveError::NotFound { .. })));
    }

    #[test]
    fn test_memory_store() {
        let store = MemoryStore::new();
        store.put(&EntryKey::new("EOR1", ts(2, 0)), b"two").unwrap();
        store.put(&EntryKey::new("EOR1", ts(1, 0)), b"one").unwrap();
        store.put(&EntryKey::new("PE", ts(1, 0)), b"pe").unwrap();

        assert_eq!(store.list("EOR1").unwrap(), vec![ts(1, 0), ts(2, 0)]);
        assert_eq!(store.devices().unwrap(), vec!["EOR1".to_string(), "PE".to_string()]);

        store.remove(&EntryKey::new("PE", ts(1, 0))).unwrap();
        assert_eq!(store.devices().unwrap(), vec!["EOR1".to_string()]);
        assert!(store.remove(&EntryKey::new("PE", ts(1, 0))).is_err());
    }
}
