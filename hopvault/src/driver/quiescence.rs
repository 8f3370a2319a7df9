//! Completion detection by output quiescence.
//!
//! The remote CLI gives no end-of-response marker, so a response is
//! considered complete once no new bytes have arrived for an idle window.
//! Three bounds keep every wait finite:
//!
//! - before the first byte, the wait is capped at `ceiling_factor * idle`
//! - after the first byte, each silence of `idle` ends the read
//! - output that never goes quiet is cut off at `hard_limit`

use std::time::Duration;

use log::trace;
use serde::Deserialize;
use tokio::time::Instant;

use crate::channel::{PatternBuffer, ShellChannel};
use crate::error::Result;

/// Default multiplier applied to the idle window for the first-byte ceiling.
pub const DEFAULT_CEILING_FACTOR: u32 = 3;

/// Default bound for a response that keeps streaming.
pub const DEFAULT_HARD_LIMIT: Duration = Duration::from_secs(300);

/// Fallback horizon when a deadline would overflow `Instant`.
const FAR_FUTURE: Duration = Duration::from_secs(86_400 * 365 * 30);

/// `start + wait`, saturating far in the future instead of overflowing.
pub fn deadline_after(start: Instant, wait: Duration) -> Instant {
    start
        .checked_add(wait)
        .or_else(|| start.checked_add(FAR_FUTURE))
        .unwrap_or(start)
}

/// Idle-timeout settings for one command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QuiescenceWindow {
    /// Silence that marks the end of a response.
    pub idle: Duration,

    /// First-byte ceiling as a multiple of `idle`.
    pub ceiling_factor: u32,

    /// Absolute bound on one read, whatever the device does.
    pub hard_limit: Duration,
}

impl QuiescenceWindow {
    /// Window with the default ceiling factor and hard limit.
    pub fn new(idle: Duration) -> Self {
        Self {
            idle,
            ceiling_factor: DEFAULT_CEILING_FACTOR,
            hard_limit: DEFAULT_HARD_LIMIT,
        }
    }

    pub fn from_millis(millis: u64) -> Self {
        Self::new(Duration::from_millis(millis))
    }

    /// Maximum wait for the first byte.
    pub fn ceiling(&self) -> Duration {
        self.idle.saturating_mul(self.ceiling_factor.max(1))
    }

    /// Same window with twice the idle time (used for the single retry).
    pub fn doubled(&self) -> Self {
        Self {
            idle: self.idle.saturating_mul(2),
            ..*self
        }
    }

    pub fn with_hard_limit(mut self, hard_limit: Duration) -> Self {
        self.hard_limit = hard_limit;
        self
    }

    pub fn with_ceiling_factor(mut self, factor: u32) -> Self {
        self.ceiling_factor = factor;
        self
    }
}

/// How a quiescence read ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadOutcome {
    /// Output arrived and then went quiet.
    Quiet,

    /// Nothing arrived before the first-byte ceiling.
    Silent,

    /// Output kept arriving until the hard limit.
    Unbounded,
}

/// Read into `buffer` until the channel goes quiet or a bound is hit.
pub async fn read_until_quiet<C: ShellChannel>(
    channel: &mut C,
    window: &QuiescenceWindow,
    buffer: &mut PatternBuffer,
) -> Result<ReadOutcome> {
    let start = Instant::now();
    let first_byte_deadline = deadline_after(start, window.ceiling());
    let hard_deadline = deadline_after(start, window.hard_limit.max(window.ceiling()));
    let mut last_activity: Option<Instant> = None;

    loop {
        let deadline = match last_activity {
            None => first_byte_deadline,
            Some(at) => deadline_after(at, window.idle).min(hard_deadline),
        };

        match channel.recv_until(deadline).await? {
            Some(chunk) => {
                if chunk.is_empty() {
                    continue;
                }
                trace!("quiescence read: {} bytes", chunk.len());
                buffer.extend(&chunk);
                let now = Instant::now();
                if now >= hard_deadline {
                    return Ok(ReadOutcome::Unbounded);
                }
                last_activity = Some(now);
            }
            None => {
                return Ok(match last_activity {
                    None => ReadOutcome::Silent,
                    Some(at) if Instant::now() >= deadline_after(at, window.idle) => ReadOutcome::Quiet,
                    Some(_) => ReadOutcome::Unbounded,
                });
            }
        }
    }
}

/// Per-purpose windows for a chain.
///
/// Configuration dumps get a long window; login prompts and secrets a
/// short one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timing {
    /// Inner-login commands, secrets, and identity confirmation.
    pub login: QuiescenceWindow,

    /// Ordinary commands such as disabling pagination.
    pub command: QuiescenceWindow,

    /// Full configuration dumps.
    pub dump: QuiescenceWindow,

    /// Bound on waiting for a credential prompt to appear.
    pub prompt_wait: Duration,
}

impl Default for Timing {
    fn default() -> Self {
        Self {
            login: QuiescenceWindow::from_millis(2000),
            command: QuiescenceWindow::from_millis(2000),
            dump: QuiescenceWindow::from_millis(5000),
            prompt_wait: Duration::from_secs(15),
        }
    }
}

/// Serialized form of [`Timing`], in milliseconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TimingSettings {
    pub login_ms: u64,
    pub command_ms: u64,
    pub dump_ms: u64,
    pub prompt_wait_ms: u64,
    pub ceiling_factor: u32,
    pub hard_limit_secs: u64,
}

impl Default for TimingSettings {
    fn default() -> Self {
        Self {
            login_ms: 2000,
            command_ms: 2000,
            dump_ms: 5000,
            prompt_wait_ms: 15_000,
            ceiling_factor: DEFAULT_CEILING_FACTOR,
            hard_limit_secs: DEFAULT_HARD_LIMIT.as_secs(),
        }
    }
}

impl From<TimingSettings> for Timing {
    fn from(s: TimingSettings) -> Self {
        let window = |ms| {
            QuiescenceWindow::from_millis(ms)
                .with_ceiling_factor(s.ceiling_factor)
                .with_hard_limit(Duration::from_secs(s.hard_limit_secs))
        };
        Self {
            login: window(s.login_ms),
            command: window(s.command_ms),
            dump: window(s.dump_ms),
            prompt_wait: Duration::from_millis(s.prompt_wait_ms),
        }
    }
}
