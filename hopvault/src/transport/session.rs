//! The logical command channel threaded through a hop chain.

use log::{debug, warn};

use super::config::SshConfig;
use super::ssh::{SshChannel, SshTransport};
use crate::channel::ShellChannel;
use crate::error::{DriverError, Result};

/// Where a session currently stands in its chain.
///
/// Depth 0 is the directly reachable device. Transitions happen only on
/// explicit confirmation, never on elapsed time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// No live channel.
    Disconnected,

    /// Confirmed at the hop with this depth.
    Connected { depth: usize },

    /// Inner login issued towards this depth, not yet confirmed.
    HoppingTo { depth: usize },

    /// Position unknown after a failed hop or a channel error.
    Failed,
}

/// One authenticated connection plus one interactive channel.
///
/// The same value is extended in place as the chain hops: every hop
/// shares the physical channel opened to the first device.
pub struct Session<C: ShellChannel = SshChannel> {
    transport: Option<SshTransport>,
    channel: Option<C>,
    state: SessionState,
}

impl Session<SshChannel> {
    /// Connect to the first device and open its shell.
    ///
    /// Leaves nothing open on failure.
    pub async fn open(config: SshConfig) -> Result<Self> {
        let target = config.socket_addr();
        let transport = SshTransport::connect(config).await?;

        let channel = match transport.open_channel().await {
            Ok(channel) => channel,
            Err(e) => {
                if let Err(close_err) = transport.close().await {
                    debug!("close after failed channel open to {}: {}", target, close_err);
                }
                return Err(e);
            }
        };

        debug!("session open to {}", target);
        Ok(Self {
            transport: Some(transport),
            channel: Some(channel),
            state: SessionState::Connected { depth: 0 },
        })
    }
}

impl<C: ShellChannel> Session<C> {
    /// Wrap an already-open channel positioned at the first device.
    pub fn from_channel(channel: C) -> Self {
        Self {
            transport: None,
            channel: Some(channel),
            state: SessionState::Connected { depth: 0 },
        }
    }

    /// Current state.
    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Confirmed depth, if the session is at a known hop.
    pub fn depth(&self) -> Option<usize> {
        match self.state {
            SessionState::Connected { depth } => Some(depth),
            _ => None,
        }
    }

    /// Whether a channel is still held.
    pub fn is_open(&self) -> bool {
        self.channel.is_some()
    }

    /// Whether the underlying SSH connection is still alive.
    pub fn is_alive(&self) -> bool {
        self.channel.is_some() && self.transport.as_ref().is_none_or(SshTransport::is_alive)
    }

    /// The shared channel, or `NotConnected` once closed.
    pub fn channel_mut(&mut self) -> Result<&mut C> {
        self.channel
            .as_mut()
            .ok_or_else(|| DriverError::NotConnected.into())
    }

    /// Record that an inner login towards `depth` has been issued.
    pub(crate) fn begin_hop(&mut self, depth: usize) {
        self.state = SessionState::HoppingTo { depth };
    }

    /// Record confirmed arrival at `depth`.
    pub(crate) fn confirm_arrival(&mut self, depth: usize) {
        self.state = SessionState::Connected { depth };
    }

    /// Record a confirmed exit back to `depth`.
    pub(crate) fn confirm_exit(&mut self, depth: usize) {
        self.state = SessionState::Connected { depth };
    }

    /// Position is no longer known.
    pub(crate) fn mark_failed(&mut self) {
        if self.channel.is_some() {
            self.state = SessionState::Failed;
        }
    }

    /// Release the channel and the connection.
    ///
    /// Idempotent, and safe on a session whose hop failed part way.
    /// Errors while closing are logged; the session always ends up
    /// `Disconnected`.
    pub async fn close(&mut self) -> Result<()> {
        self.state = SessionState::Disconnected;

        if let Some(mut channel) = self.channel.take() {
            if let Err(e) = channel.close().await {
                warn!("error closing shell channel: {}", e);
            }
        }

        if let Some(transport) = self.transport.take() {
            transport.close().await?;
        }

        Ok(())
    }
}
