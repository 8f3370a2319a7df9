//! PTY shell channel abstraction for interactive sessions.

use std::future::Future;

use tokio::time::Instant;

use crate::error::Result;

/// Terminal settings requested when the shell channel is opened.
#[derive(Debug, Clone, Copy)]
pub struct PtyConfig {
    /// Terminal width.
    pub terminal_width: u32,

    /// Terminal height.
    pub terminal_height: u32,
}

impl Default for PtyConfig {
    fn default() -> Self {
        Self {
            terminal_width: 511,
            terminal_height: 24,
        }
    }
}

/// One interactive byte stream into a remote CLI.
///
/// Every hop of a chain shares the same `ShellChannel`: an inner `ssh`
/// started from the outer device's prompt simply takes over the stream.
/// Implemented over an SSH PTY for real devices and by simulated CLIs in
/// tests.
pub trait ShellChannel: Send {
    /// Write raw bytes into the channel.
    fn send(&mut self, data: &[u8]) -> impl Future<Output = Result<()>> + Send;

    /// Wait for the next chunk of output.
    ///
    /// Returns `Ok(None)` if nothing arrived before `deadline`. A closed
    /// channel is an error, never an empty chunk.
    fn recv_until(
        &mut self,
        deadline: Instant,
    ) -> impl Future<Output = Result<Option<Vec<u8>>>> + Send;

    /// Close the channel. Safe to call more than once.
    fn close(&mut self) -> impl Future<Output = Result<()>> + Send;
}
