//! Structured cycle events.
//!
//! The core emits events and leaves formatting and delivery to an
//! [`EventSink`]. [`LogSink`] forwards them to the `log` facade.

use std::sync::Mutex;
use std::time::Duration;

use log::{error, info, warn};

use crate::archive::{Drift, EntryKey, Fingerprint};
use crate::chain::OutcomeCounts;
use crate::error::ErrorKind;

/// Something worth reporting during a cycle.
#[derive(Debug, Clone, PartialEq)]
pub enum CycleEvent {
    CycleStarted {
        chain: String,
        devices: usize,
    },

    DeviceCaptured {
        chain: String,
        device: String,
        depth: usize,
        drift: Drift,
        fingerprint: Fingerprint,
        entry: EntryKey,
    },

    DeviceFailed {
        chain: String,
        device: String,
        depth: usize,
        kind: ErrorKind,
        message: String,
    },

    CycleFinished {
        chain: String,
        counts: OutcomeCounts,
        elapsed: Duration,
    },

    RetentionSwept {
        removed: usize,
    },

    RetentionFailed {
        message: String,
    },

    SnapshotUploaded {
        entry: EntryKey,
        path: String,
    },

    UploadFailed {
        entry: EntryKey,
        message: String,
    },
}

/// Receiver of cycle events.
pub trait EventSink: Send + Sync {
    fn emit(&self, event: &CycleEvent);
}

/// Writes events through `log`.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogSink;

impl EventSink for LogSink {
    fn emit(&self, event: &CycleEvent) {
        match event {
            CycleEvent::CycleStarted { chain, devices } => {
                info!("[{}] cycle started ({} devices)", chain, devices);
            }
            CycleEvent::DeviceCaptured {
                chain,
                device,
                depth,
                drift,
                fingerprint,
                entry,
            } => {
                info!(
                    "[{}] {} (depth {}): {} {} -> {}",
                    chain,
                    device,
                    depth,
                    drift,
                    fingerprint.short(),
                    entry
                );
            }
            CycleEvent::DeviceFailed {
                chain,
                device,
                depth,
                kind,
                message,
            } => {
                error!("[{}] {} (depth {}) failed [{}]: {}", chain, device, depth, kind, message);
            }
            CycleEvent::CycleFinished {
                chain,
                counts,
                elapsed,
            } => {
                if counts.failed > 0 {
                    warn!("[{}] cycle finished in {:?}: {}", chain, elapsed, counts);
                } else {
                    info!("[{}] cycle finished in {:?}: {}", chain, elapsed, counts);
                }
            }
            CycleEvent::RetentionSwept { removed } => {
                info!("retention sweep removed {} entries", removed);
            }
            CycleEvent::RetentionFailed { message } => {
                error!("retention sweep failed: {}", message);
            }
            CycleEvent::SnapshotUploaded { entry, path } => {
                info!("uploaded {} to {}", entry, path);
            }
            CycleEvent::UploadFailed { entry, message } => {
                warn!("upload of {} failed: {}", entry, message);
            }
        }
    }
}

/// Keeps every event in memory.
#[derive(Debug, Default)]
pub struct RecordingSink {
    events: Mutex<Vec<CycleEvent>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<CycleEvent> {
        self.events
            .lock()
            .map(|events| events.clone())
            .unwrap_or_else(|poisoned| poisoned.into_inner().clone())
    }

    pub fn clear(&self) {
        match self.events.lock() {
            Ok(mut events) => events.clear(),
            Err(poisoned) => poisoned.into_inner().clear(),
        }
    }
}

impl EventSink for RecordingSink {
    fn emit(&self, event: &CycleEvent) {
        match self.events.lock() {
            Ok(mut events) => events.push(event.clone()),
            Err(poisoned) => poisoned.into_inner().push(event.clone()),
        }
    }
}
