//! # Hopvault
//!
//! Periodic configuration backups for network devices that are only
//! reachable through a chain of interactive SSH hops.
//!
//! One SSH session is opened to the first device of a chain. Every later
//! device is reached by running the CLI's own `ssh` client from the
//! previous device's prompt, so all hops share a single interactive
//! channel. Responses carry no end marker; the driver treats a response as
//! complete once the channel has been quiet for a configurable window, and
//! every hop is confirmed by its prompt before its output is trusted.
//!
//! Captured configurations go into an append-only [`Archive`] that tags
//! each capture as first, unchanged or changed against the device's
//! previous snapshot, and prunes old snapshots while always keeping the
//! newest one per device.
//!
//! ## Features
//!
//! - Async SSH via russh, with legacy algorithm profiles for old IOS images
//! - Quiescence-based completion with a first-byte ceiling and hard limit
//! - Prompt-confirmed credential entry and hop identity checks
//! - BLAKE3 drift detection over flat-file or in-memory stores
//! - A scheduler that runs independent chains concurrently and never
//!   overlaps cycles
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use hopvault::{AppConfig, Scheduler};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), hopvault::Error> {
//!     let config = AppConfig::load("hopvault.toml")?;
//!     let scheduler = Scheduler::from_config(&config)?;
//!
//!     let summary = scheduler.run_once().await;
//!     for report in &summary.reports {
//!         for result in &report.results {
//!             println!("{} {}: {}", report.chain, result.device, result.outcome);
//!         }
//!     }
//!     Ok(())
//! }
//! ```

pub mod archive;
pub mod chain;
pub mod channel;
pub mod config;
pub mod credentials;
pub mod device;
pub mod driver;
pub mod error;
pub mod events;
pub mod platform;
pub mod schedule;
pub mod transport;

// Re-export main types for convenience
pub use archive::{Archive, ArchiveEntry, Drift, Fingerprint, RetentionPolicy, SnapshotStore};
pub use chain::{CaptureResult, CycleReport, HopChain, Outcome};
pub use config::AppConfig;
pub use credentials::{CredentialProvider, DeviceCredentials, InlineCredentials};
pub use device::DeviceSpec;
pub use driver::{CommandDriver, QuiescenceWindow, Response, Timing};
pub use error::{Error, ErrorKind, Result};
pub use events::{CycleEvent, EventSink, LogSink};
pub use platform::{PlatformDefinition, PlatformRegistry};
pub use schedule::{ChainJob, CycleSummary, Scheduler, SweepOutcome};
pub use transport::{Connector, Session, SessionState, SshConfig};
