//! Capture cycles archiving to disk.

mod common;

use std::fs;
use std::sync::Arc;

use common::{Lab, LabConnector, core_devices, credentials_for, fast_timing};
use hopvault::archive::FsStore;
use hopvault::platform::vendors::cisco_ios;
use hopvault::{Archive, ChainJob, HopChain, Outcome, Scheduler};

fn scheduler(lab: &Lab, root: &std::path::Path) -> Scheduler<LabConnector> {
    let devices = core_devices();
    let chain = HopChain::new(
        "core",
        cisco_ios::platform().unwrap(),
        fast_timing(),
        Arc::new(credentials_for(&devices)),
    );
    let archive = Archive::open_dir(root).unwrap();
    Scheduler::new(vec![ChainJob::new(chain, devices, LabConnector::new(lab))], Arc::new(archive))
}

#[tokio::test(start_paused = true)]
async fn test_snapshots_land_per_device() {
    let dir = tempfile::tempdir().unwrap();
    let lab = Lab::core();
    let scheduler = scheduler(&lab, dir.path());

    let summary = scheduler.run_once().await;
    assert!(!summary.has_failures());

    let store = FsStore::new(dir.path()).unwrap();
    for result in &summary.report("core").unwrap().results {
        let key = result.entry.as_ref().unwrap();
        let path = store.entry_path(key);
        assert!(path.starts_with(dir.path().join(&result.device)));

        let on_disk = fs::read_to_string(&path).unwrap();
        assert_eq!(Some(on_disk.as_str()), result.text.as_deref());
    }

    // No temporaries are left behind
    let leftovers: Vec<_> = fs::read_dir(dir.path().join("PE"))
        .unwrap()
        .flatten()
        .filter(|e| e.file_name().to_string_lossy().ends_with(".tmp"))
        .collect();
    assert!(leftovers.is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_drift_survives_restart() {
    let dir = tempfile::tempdir().unwrap();
    let lab = Lab::core();

    let first = scheduler(&lab, dir.path()).run_once().await;
    assert_eq!(first.counts().first, 3);

    // A fresh archive over the same directory sees the earlier snapshots
    lab.set_config("SPINE", "hostname SPINE\r\n!\r\nrouter bgp 65000\r\nend");
    let second = scheduler(&lab, dir.path()).run_once().await;
    let report = second.report("core").unwrap();
    assert_eq!(
        report.outcomes(),
        vec![
            ("PE", Outcome::Unchanged),
            ("EOR1", Outcome::Unchanged),
            ("SPINE", Outcome::Changed),
        ]
    );

    let archive = Archive::open_dir(dir.path()).unwrap();
    assert_eq!(archive.entries("SPINE").unwrap().len(), 2);
    let latest = archive.latest("SPINE").unwrap().unwrap();
    assert_eq!(Some(latest.key), report.result("SPINE").unwrap().entry.clone());
}
