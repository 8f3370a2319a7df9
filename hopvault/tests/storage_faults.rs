//! Capture cycles over a store that refuses some operations.

mod common;

use std::io;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use common::{Lab, LabConnector, core_devices, credentials_for, fast_timing};
use hopvault::archive::{EntryKey, MemoryStore};
use hopvault::error::{ArchiveError, Result};
use hopvault::events::RecordingSink;
use hopvault::platform::vendors::cisco_ios;
use hopvault::{
    Archive, ChainJob, CycleEvent, ErrorKind, HopChain, Outcome, RetentionPolicy, Scheduler,
    SessionState, SnapshotStore, SweepOutcome,
};

/// Memory store that fails writes or removals for chosen devices.
#[derive(Default)]
struct FaultyStore {
    inner: MemoryStore,
    refuse_put: Vec<&'static str>,
    refuse_remove: Vec<&'static str>,
}

fn refused(key: &EntryKey) -> hopvault::Error {
    ArchiveError::Write {
        key: key.to_string(),
        source: io::Error::new(io::ErrorKind::PermissionDenied, "store is read-only"),
    }
    .into()
}

impl SnapshotStore for FaultyStore {
    fn put(&self, key: &EntryKey, blob: &[u8]) -> Result<()> {
        if self.refuse_put.contains(&key.device.as_str()) {
            return Err(refused(key));
        }
        self.inner.put(key, blob)
    }

    fn get(&self, key: &EntryKey) -> Result<Vec<u8>> {
        self.inner.get(key)
    }

    fn list(&self, device: &str) -> Result<Vec<DateTime<Utc>>> {
        self.inner.list(device)
    }

    fn devices(&self) -> Result<Vec<String>> {
        self.inner.devices()
    }

    fn remove(&self, key: &EntryKey) -> Result<()> {
        if self.refuse_remove.contains(&key.device.as_str()) {
            return Err(refused(key));
        }
        self.inner.remove(key)
    }
}

fn chain(sink: &Arc<RecordingSink>) -> HopChain {
    HopChain::new(
        "core",
        cisco_ios::platform().unwrap(),
        fast_timing(),
        Arc::new(credentials_for(&core_devices())),
    )
    .with_events(sink.clone())
}

#[tokio::test(start_paused = true)]
async fn test_refused_write_fails_only_that_device() {
    let lab = Lab::core();
    let devices = core_devices();
    let sink = Arc::new(RecordingSink::new());
    let archive = Archive::new(FaultyStore {
        refuse_put: vec!["EOR1"],
        ..Default::default()
    });

    let mut session = lab.session("192.168.122.147");
    let results = chain(&sink).capture_all(&mut session, &devices, &archive).await;

    assert_eq!(results[0].outcome, Outcome::First);
    assert_eq!(results[1].outcome, Outcome::Failed);
    assert_eq!(results[1].failure.as_ref().unwrap().kind, ErrorKind::Storage);
    assert!(results[1].failure.as_ref().unwrap().message.contains("read-only"));
    assert_eq!(results[2].outcome, Outcome::First);

    // The channel was never in doubt, so SPINE was reached through EOR1
    assert_eq!(lab.count_received("EOR1", "ssh -l admin 10.0.1.2"), 1);
    assert_eq!(session.state(), SessionState::Connected { depth: 0 });
    assert!(archive.entries("EOR1").unwrap().is_empty());
    assert_eq!(archive.entries("SPINE").unwrap().len(), 1);

    assert!(sink.events().iter().any(|e| matches!(
        e,
        CycleEvent::DeviceFailed { device, kind: ErrorKind::Storage, .. } if device == "EOR1"
    )));
    session.close().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_refused_removal_reports_failed_sweep() {
    let lab = Lab::core();
    let sink = Arc::new(RecordingSink::new());
    let archive = Arc::new(Archive::new(FaultyStore {
        refuse_remove: vec!["OLD"],
        ..Default::default()
    }));

    let week_ago = Utc::now() - chrono::Duration::days(7);
    archive.record("PE", b"hostname PE\n", week_ago).unwrap();
    archive.record("OLD", b"hostname OLD\n", week_ago - chrono::Duration::days(1)).unwrap();
    archive.record("OLD", b"hostname OLD\n", week_ago).unwrap();

    let job = ChainJob::new(chain(&sink), core_devices(), LabConnector::new(&lab));
    let scheduler = Scheduler::new(vec![job], Arc::clone(&archive))
        .with_retention(RetentionPolicy::from_days(1))
        .with_events(sink.clone());

    let summary = scheduler.run_once().await;

    // Captures are unaffected; only the sweep reports the failure
    assert!(!summary.report("core").unwrap().has_failures());
    let SweepOutcome::Failed(message) = &summary.sweep else {
        panic!("sweep should fail, got {:?}", summary.sweep);
    };
    assert!(message.contains("OLD/"), "{}", message);
    assert!(summary.has_failures());

    // Other devices were still swept
    assert_eq!(archive.entries("PE").unwrap().len(), 1);
    assert_eq!(archive.entries("OLD").unwrap().len(), 2);

    assert!(
        sink.events()
            .iter()
            .any(|e| matches!(e, CycleEvent::RetentionFailed { message } if message.contains("OLD/")))
    );
}
