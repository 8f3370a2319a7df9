//! Per-device capture results and per-cycle reports.

use std::fmt;

use chrono::{DateTime, Utc};

use crate::archive::{Drift, EntryKey, Fingerprint, Recorded};
use crate::error::{Error, ErrorKind};

/// Outcome tag of one device in one cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Outcome {
    First,
    Unchanged,
    Changed,
    Failed,
}

impl From<Drift> for Outcome {
    fn from(drift: Drift) -> Self {
        match drift {
            Drift::First => Outcome::First,
            Drift::Unchanged => Outcome::Unchanged,
            Drift::Changed => Outcome::Changed,
        }
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Outcome::First => "first",
            Outcome::Unchanged => "unchanged",
            Outcome::Changed => "changed",
            Outcome::Failed => "failed",
        })
    }
}

/// Why a device has no snapshot this cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaptureFailure {
    pub kind: ErrorKind,
    pub message: String,
}

impl From<&Error> for CaptureFailure {
    fn from(err: &Error) -> Self {
        Self {
            kind: err.kind(),
            message: err.to_string(),
        }
    }
}

/// Result of one device in one cycle.
#[derive(Debug, Clone)]
pub struct CaptureResult {
    pub device: String,

    /// Hop depth of the device (0 = first device).
    pub depth: usize,

    pub captured_at: DateTime<Utc>,

    /// Captured configuration text, as stored.
    pub text: Option<String>,

    pub fingerprint: Option<Fingerprint>,

    /// Where the snapshot was stored.
    pub entry: Option<EntryKey>,

    pub outcome: Outcome,

    /// Set exactly when `outcome` is `Failed`.
    pub failure: Option<CaptureFailure>,
}

impl CaptureResult {
    /// A capture that made it into the archive.
    pub fn recorded(device: impl Into<String>, depth: usize, text: String, recorded: Recorded) -> Self {
        Self {
            device: device.into(),
            depth,
            captured_at: recorded.entry.key.timestamp,
            text: Some(text),
            fingerprint: Some(recorded.entry.fingerprint),
            entry: Some(recorded.entry.key),
            outcome: recorded.drift.into(),
            failure: None,
        }
    }

    /// A capture that failed with `err`.
    pub fn failed(device: impl Into<String>, depth: usize, captured_at: DateTime<Utc>, err: &Error) -> Self {
        Self::failed_with(device, depth, captured_at, CaptureFailure::from(err))
    }

    pub fn failed_with(
        device: impl Into<String>,
        depth: usize,
        captured_at: DateTime<Utc>,
        failure: CaptureFailure,
    ) -> Self {
        Self {
            device: device.into(),
            depth,
            captured_at,
            text: None,
            fingerprint: None,
            entry: None,
            outcome: Outcome::Failed,
            failure: Some(failure),
        }
    }

    pub fn is_failed(&self) -> bool {
        self.outcome == Outcome::Failed
    }
}

/// Number of results per outcome.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct OutcomeCounts {
    pub first: usize,
    pub unchanged: usize,
    pub changed: usize,
    pub failed: usize,
}

impl OutcomeCounts {
    pub fn tally<'a>(results: impl IntoIterator<Item = &'a CaptureResult>) -> Self {
        let mut counts = Self::default();
        for result in results {
            match result.outcome {
                Outcome::First => counts.first += 1,
                Outcome::Unchanged => counts.unchanged += 1,
                Outcome::Changed => counts.changed += 1,
                Outcome::Failed => counts.failed += 1,
            }
        }
        counts
    }

    pub fn total(&self) -> usize {
        self.first + self.unchanged + self.changed + self.failed
    }
}

impl fmt::Display for OutcomeCounts {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} first, {} unchanged, {} changed, {} failed",
            self.first, self.unchanged, self.changed, self.failed
        )
    }
}

/// One chain's cycle.
#[derive(Debug, Clone)]
pub struct CycleReport {
    pub chain: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,

    /// One result per configured device, in hop order.
    pub results: Vec<CaptureResult>,
}

impl CycleReport {
    pub fn counts(&self) -> OutcomeCounts {
        OutcomeCounts::tally(&self.results)
    }

    pub fn has_failures(&self) -> bool {
        self.results.iter().any(CaptureResult::is_failed)
    }

    pub fn result(&self, device: &str) -> Option<&CaptureResult> {
        self.results.iter().find(|r| r.device == device)
    }

    pub fn outcomes(&self) -> Vec<(&str, Outcome)> {
        self.results
            .iter()
            .map(|r| (r.device.as_str(), r.outcome))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::HopError;

    #[test]
    fn test_failed_result_carries_kind() {
        let err = Error::from(HopError::CredentialRejected {
            device: "EOR1".into(),
            depth: 1,
        });
        let result = CaptureResult::failed("EOR1", 1, Utc::now(), &err);
        assert!(result.is_failed());
        let failure = result.failure.unwrap();
        assert_eq!(failure.kind, ErrorKind::Credential);
        assert!(failure.message.contains("EOR1"));
    }

    #[test]
    fn test_counts() {
        let now = Utc::now();
        let failure = CaptureFailure {
            kind: ErrorKind::Cancelled,
            message: "cycle timed out".into(),
        };
        let report = CycleReport {
            chain: "core".into(),
            started_at: now,
            finished_at: now,
            results: vec![
                CaptureResult::failed_with("PE", 0, now, failure.clone()),
                CaptureResult::failed_with("EOR1", 1, now, failure),
            ],
        };
        let counts = report.counts();
        assert_eq!(counts.failed, 2);
        assert_eq!(counts.total(), 2);
        assert!(report.has_failures());
        assert_eq!(report.result("EOR1").map(|r| r.depth), Some(1));
        assert_eq!(counts.to_string(), "0 first, 0 unchanged, 0 changed, 2 failed");
    }
}
