//! Periodic capture cycles.
//!
//! A cycle runs every configured chain once, concurrently, and then sweeps
//! the archive. Cycles run inline on the ticking task, so a slow cycle
//! delays (and skips) ticks rather than overlapping the next one.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures_util::future::join_all;
use log::{debug, info, warn};
use tokio::time::{Instant, MissedTickBehavior, interval, timeout, timeout_at};

use crate::archive::{Archive, FsStore, MirrorStore, RetentionPolicy, SftpTarget, UploadQueue, Uploader, upload_queue};
use crate::chain::{CycleReport, HopChain, OutcomeCounts};
use crate::config::AppConfig;
use crate::device::DeviceSpec;
use crate::driver::deadline_after;
use crate::error::{ArchiveError, ConfigError, ErrorKind, Result};
use crate::events::{CycleEvent, EventSink, LogSink};
use crate::transport::{Connector, SshConnector};

/// Bound on closing a session after a cycle.
const CLOSE_TIMEOUT: Duration = Duration::from_secs(10);

/// Bound on waiting for queued uploads before exit.
const UPLOAD_FLUSH_TIMEOUT: Duration = Duration::from_secs(120);

/// One chain with its inventory and its way in.
pub struct ChainJob<K: Connector> {
    pub chain: HopChain,
    pub devices: Vec<DeviceSpec>,
    pub connector: K,
}

impl<K: Connector> ChainJob<K> {
    pub fn new(chain: HopChain, devices: Vec<DeviceSpec>, connector: K) -> Self {
        Self {
            chain,
            devices,
            connector,
        }
    }
}

/// What the retention sweep did at the end of a cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SweepOutcome {
    Removed(usize),
    Failed(String),
}

/// Every chain's report plus the sweep result.
#[derive(Debug, Clone)]
pub struct CycleSummary {
    pub reports: Vec<CycleReport>,
    pub sweep: SweepOutcome,
}

impl CycleSummary {
    pub fn counts(&self) -> OutcomeCounts {
        OutcomeCounts::tally(self.reports.iter().flat_map(|r| &r.results))
    }

    pub fn has_failures(&self) -> bool {
        self.reports.iter().any(CycleReport::has_failures)
            || matches!(self.sweep, SweepOutcome::Failed(_))
    }

    pub fn report(&self, chain: &str) -> Option<&CycleReport> {
        self.reports.iter().find(|r| r.chain == chain)
    }
}

/// The archive under `config.archive_dir`, mirrored to the upload target
/// when one is configured.
///
/// The uploader is spawned on the current Tokio runtime.
pub fn open_archive(config: &AppConfig) -> Result<(Archive, Option<UploadQueue>)> {
    let local = FsStore::new(&config.archive_dir)?;
    let Some(settings) = &config.upload else {
        return Ok((Archive::new(local), None));
    };

    let runtime = tokio::runtime::Handle::try_current().map_err(|e| ConfigError::Invalid {
        message: format!("uploads need a running Tokio runtime: {}", e),
    })?;
    let (queue, receiver) = upload_queue();
    let uploader = Uploader::new(SftpTarget::new(settings.clone()), settings.remote_dir.clone());
    runtime.spawn(uploader.run(receiver));
    info!("mirroring snapshots to {}:{}", settings.host, settings.remote_dir);

    Ok((Archive::new(MirrorStore::new(local, queue.clone())), Some(queue)))
}

impl Scheduler<SshConnector> {
    /// SSH scheduler for every chain in `config`, archiving under
    /// `config.archive_dir`.
    pub fn from_config(config: &AppConfig) -> Result<Self> {
        let (archive, uploads) = open_archive(config)?;
        let archive = Arc::new(archive);
        let jobs = config
            .chains
            .iter()
            .map(|chain| {
                let hop_chain = HopChain::new(
                    chain.name.clone(),
                    chain.platform.clone(),
                    config.timing,
                    Arc::clone(&config.credentials),
                );
                let connector = SshConnector::new(Arc::clone(&config.credentials), chain.connect.clone());
                ChainJob::new(hop_chain, chain.devices.clone(), connector)
            })
            .collect();

        let mut scheduler = Scheduler::new(jobs, archive)
            .with_retention(config.retention)
            .with_max_cycle(config.max_cycle);
        if let Some(queue) = uploads {
            scheduler = scheduler.with_uploads(queue);
        }
        Ok(scheduler)
    }
}

/// Runs capture cycles over a set of independent chains.
pub struct Scheduler<K: Connector> {
    jobs: Vec<ChainJob<K>>,
    archive: Arc<Archive>,
    retention: RetentionPolicy,
    max_cycle: Duration,
    events: Arc<dyn EventSink>,
    uploads: Option<UploadQueue>,
}

impl<K: Connector> Scheduler<K> {
    pub fn new(jobs: Vec<ChainJob<K>>, archive: Arc<Archive>) -> Self {
        Self {
            jobs,
            archive,
            retention: RetentionPolicy::default(),
            max_cycle: Duration::from_secs(600),
            events: Arc::new(LogSink),
            uploads: None,
        }
    }

    pub fn with_retention(mut self, retention: RetentionPolicy) -> Self {
        self.retention = retention;
        self
    }

    /// Bound on one chain's cycle, connection included.
    pub fn with_max_cycle(mut self, max_cycle: Duration) -> Self {
        self.max_cycle = max_cycle;
        self
    }

    /// Sink for scheduler-level events (chains keep their own sinks).
    pub fn with_events(mut self, events: Arc<dyn EventSink>) -> Self {
        self.events = events;
        self
    }

    /// Queue feeding the uploader behind the archive's store.
    pub fn with_uploads(mut self, uploads: UploadQueue) -> Self {
        self.uploads = Some(uploads);
        self
    }

    /// Wait for uploads queued so far, for a bounded time.
    ///
    /// Returns true when nothing is left pending.
    pub async fn flush_uploads(&self) -> bool {
        let Some(uploads) = &self.uploads else {
            return true;
        };
        match timeout(UPLOAD_FLUSH_TIMEOUT, uploads.flush()).await {
            Ok(flushed) => flushed,
            Err(_) => {
                warn!("uploads still pending after {:?}", UPLOAD_FLUSH_TIMEOUT);
                false
            }
        }
    }

    pub fn archive(&self) -> &Arc<Archive> {
        &self.archive
    }

    /// Run one cycle: every chain concurrently, then one retention sweep.
    pub async fn run_once(&self) -> CycleSummary {
        let reports = join_all(self.jobs.iter().map(|job| self.run_chain(job))).await;
        let sweep = self.sweep().await;
        CycleSummary { reports, sweep }
    }

    /// Run a cycle every `period` until `shutdown` completes.
    ///
    /// Shutdown is honoured between cycles. Ticks missed while a cycle
    /// was running are skipped. Returns the number of cycles run.
    pub async fn run_forever<F>(&self, period: Duration, shutdown: F) -> usize
    where
        F: Future<Output = ()>,
    {
        let mut ticker = interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        tokio::pin!(shutdown);

        let mut cycles = 0;
        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    info!("shutdown requested after {} cycles", cycles);
                    return cycles;
                }
                _ = ticker.tick() => {}
            }

            cycles += 1;
            debug!("cycle {} starting", cycles);
            let summary = self.run_once().await;
            info!("cycle {} done: {}", cycles, summary.counts());
        }
    }

    /// Remove expired snapshots.
    ///
    /// The store is synchronous, so the sweep runs on the blocking pool.
    pub async fn sweep(&self) -> SweepOutcome {
        let archive = Arc::clone(&self.archive);
        let policy = self.retention;
        let swept = tokio::task::spawn_blocking(move || archive.sweep(&policy, Utc::now()))
            .await
            .unwrap_or_else(|e| {
                Err(ArchiveError::Sweep {
                    message: e.to_string(),
                }
                .into())
            });

        match swept {
            Ok(removed) => {
                self.events.emit(&CycleEvent::RetentionSwept { removed });
                SweepOutcome::Removed(removed)
            }
            Err(e) => {
                let message = e.to_string();
                self.events.emit(&CycleEvent::RetentionFailed {
                    message: message.clone(),
                });
                SweepOutcome::Failed(message)
            }
        }
    }

    /// One chain's cycle, bounded by `max_cycle`.
    ///
    /// The session is always closed. On expiry the capture in flight is
    /// dropped, results already recorded stay, and the remaining devices
    /// are tagged failed.
    async fn run_chain(&self, job: &ChainJob<K>) -> CycleReport {
        let chain = &job.chain;
        let started_at = Utc::now();
        let start = Instant::now();
        let deadline = deadline_after(start, self.max_cycle);
        let mut results = Vec::with_capacity(job.devices.len());

        chain.events().emit(&CycleEvent::CycleStarted {
            chain: chain.name().to_string(),
            devices: job.devices.len(),
        });

        if let Some(first) = job.devices.first() {
            match timeout_at(deadline, job.connector.connect(first)).await {
                Ok(Ok(mut session)) => {
                    let capture = chain.capture_into(&mut session, &job.devices, &self.archive, &mut results);
                    if timeout_at(deadline, capture).await.is_err() {
                        warn!(
                            "[{}] cycle exceeded {:?}, abandoning after {} of {} devices",
                            chain.name(),
                            self.max_cycle,
                            results.len(),
                            job.devices.len()
                        );
                    }
                    match timeout(CLOSE_TIMEOUT, session.close()).await {
                        Ok(Ok(())) => {}
                        Ok(Err(e)) => warn!("[{}] error closing session: {}", chain.name(), e),
                        Err(_) => warn!("[{}] session close timed out", chain.name()),
                    }
                }
                Ok(Err(e)) => chain.fail_unreachable(&mut results, &job.devices, &e),
                Err(_) => {}
            }

            let message = format!("cycle exceeded {:?}", self.max_cycle);
            chain.fail_remaining(&mut results, &job.devices, ErrorKind::Cancelled, &message);
        }

        let report = CycleReport {
            chain: chain.name().to_string(),
            started_at,
            finished_at: Utc::now(),
            results,
        };
        chain.events().emit(&CycleEvent::CycleFinished {
            chain: report.chain.clone(),
            counts: report.counts(),
            elapsed: start.elapsed(),
        });
        report
    }
}
