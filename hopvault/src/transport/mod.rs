//! SSH transport layer wrapping russh.
//!
//! This module provides connection management, algorithm negotiation for
//! legacy devices, and the hop-spanning [`Session`].

pub mod config;
mod connector;
mod session;
mod ssh;

pub use config::{AlgorithmProfile, AuthMethod, HostKeyVerification, SshConfig};
pub use connector::{ConnectSettings, Connector, SshConnector};
pub use session::{Session, SessionState};
pub use ssh::{SshChannel, SshTransport};
