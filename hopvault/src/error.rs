//! Error types for hopvault.

use std::fmt;
use std::io;
use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// Main error type for hopvault operations.
#[derive(Error, Debug)]
pub enum Error {
    /// SSH transport-level errors (the ConnectError family)
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    /// Channel operation errors
    #[error("Channel error: {0}")]
    Channel(#[from] ChannelError),

    /// Command/response driver errors
    #[error("Driver error: {0}")]
    Driver(#[from] DriverError),

    /// Hop chain errors
    #[error("Hop error: {0}")]
    Hop(#[from] HopError),

    /// Snapshot archive errors
    #[error("Archive error: {0}")]
    Archive(#[from] ArchiveError),

    /// Configuration errors
    #[error("Config error: {0}")]
    Config(#[from] ConfigError),
}

/// Transport layer errors (SSH connection, authentication).
#[derive(Error, Debug)]
pub enum TransportError {
    /// Failed to connect to host
    #[error("Connection failed to {host}:{port}: {source}")]
    ConnectionFailed {
        host: String,
        port: u16,
        #[source]
        source: io::Error,
    },

    /// SSH handshake or protocol error
    #[error("SSH error: {0}")]
    Ssh(#[from] russh::Error),

    /// Authentication failed
    #[error("Authentication failed for user '{user}'")]
    AuthenticationFailed { user: String },

    /// SSH key error
    #[error("SSH key error: {0}")]
    Key(String),

    /// Host is not in known_hosts and verification is strict
    #[error("Host key for {host}:{port} is not known")]
    HostKeyUnknown { host: String, port: u16 },

    /// Host key differs from the one recorded in known_hosts
    #[error("Host key for {host}:{port} changed (known_hosts line {line})")]
    HostKeyChanged { host: String, port: u16, line: usize },

    /// known_hosts could not be read or written
    #[error("known_hosts error: {0}")]
    KnownHosts(String),

    /// An algorithm profile named an algorithm the transport does not implement
    #[error("Unsupported {kind} algorithm '{name}'")]
    UnsupportedAlgorithm { kind: &'static str, name: String },

    /// Connection was closed unexpectedly
    #[error("Connection disconnected")]
    Disconnected,

    /// Operation timed out
    #[error("Operation timed out after {0:?}")]
    Timeout(Duration),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

/// Channel layer errors (PTY shell operations).
#[derive(Error, Debug)]
pub enum ChannelError {
    /// Failed to open PTY channel
    #[error("Failed to open PTY channel: {0}")]
    PtyOpenFailed(russh::Error),

    /// Channel closed unexpectedly
    #[error("Channel closed")]
    Closed,

    /// SSH protocol error on the channel
    #[error("Channel SSH error: {0}")]
    Ssh(russh::Error),

    /// Invalid regex pattern
    #[error("Invalid regex pattern: {0}")]
    InvalidPattern(#[from] regex::Error),
}

/// Command/response driver errors.
#[derive(Error, Debug)]
pub enum DriverError {
    /// Session not connected
    #[error("Session not connected")]
    NotConnected,

    /// No quiescence observed within the ceiling
    #[error("No complete response to '{command}' within {waited:?} ({received} bytes received)")]
    ResponseTimeout {
        command: String,
        waited: Duration,
        received: usize,
    },

    /// The device reported a failure for the command
    #[error("Command '{command}' failed: {message}")]
    CommandFailed { command: String, message: String },
}

/// Hop chain errors.
#[derive(Error, Debug)]
pub enum HopError {
    /// Could not verify arrival at the next hop
    #[error("Could not confirm arrival at '{device}' (depth {depth}): {reason}")]
    ConfirmationFailed {
        device: String,
        depth: usize,
        reason: String,
    },

    /// A credential prompt was expected but never shown
    #[error("No credential prompt from '{device}' (depth {depth}) within {waited:?}")]
    PromptNotSeen {
        device: String,
        depth: usize,
        waited: Duration,
    },

    /// The device prompted again after the credential was sent
    #[error("Credential rejected by '{device}' (depth {depth})")]
    CredentialRejected { device: String, depth: usize },

    /// No credential is available for the device
    #[error("No credential available for '{device}'")]
    MissingCredential { device: String },

    /// A device upstream in the chain failed, so this hop is unreachable
    #[error("'{device}' (depth {depth}) unreachable: upstream '{upstream}' failed")]
    UpstreamFailed {
        device: String,
        depth: usize,
        upstream: String,
    },
}

/// Snapshot archive errors.
#[derive(Error, Debug)]
pub enum ArchiveError {
    /// The storage backend rejected a write
    #[error("Failed to write snapshot '{key}': {source}")]
    Write {
        key: String,
        #[source]
        source: io::Error,
    },

    /// The storage backend failed a read
    #[error("Failed to read snapshot '{key}': {source}")]
    Read {
        key: String,
        #[source]
        source: io::Error,
    },

    /// No snapshot stored under the key
    #[error("Snapshot '{key}' not found")]
    NotFound { key: String },

    /// A persisted name could not be mapped back to a key
    #[error("Invalid snapshot key '{0}'")]
    InvalidKey(String),

    /// Retention cleanup failed
    #[error("Retention sweep failed: {message}")]
    Sweep { message: String },

    /// Mirroring a snapshot to the upload target failed
    #[error("Failed to upload '{path}': {message}")]
    Upload { path: String, message: String },
}

/// Configuration loading and validation errors.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// The configuration file could not be read
    #[error("Failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// The configuration file is not valid TOML for the schema
    #[error("Failed to parse configuration: {0}")]
    Parse(#[from] toml::de::Error),

    /// The configuration parsed but is not usable
    #[error("Invalid configuration: {message}")]
    Invalid { message: String },

    /// A chain names a dialect that is not registered
    #[error("Unknown dialect '{name}'")]
    UnknownDialect { name: String },
}

/// Coarse classification used when reporting failures.
///
/// Lets an operator tell a credential problem from a network problem
/// from a timing problem without reading the full error chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Credential,
    Network,
    Timing,
    HopConfirmation,
    Command,
    Storage,
    Config,
    Cancelled,
}

impl ErrorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorKind::Credential => "credential",
            ErrorKind::Network => "network",
            ErrorKind::Timing => "timing",
            ErrorKind::HopConfirmation => "hop-confirmation",
            ErrorKind::Command => "command",
            ErrorKind::Storage => "storage",
            ErrorKind::Config => "config",
            ErrorKind::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Error {
    /// Classify this error for failure reporting.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Transport(e) => match e {
                TransportError::AuthenticationFailed { .. } | TransportError::Key(_) => {
                    ErrorKind::Credential
                }
                TransportError::UnsupportedAlgorithm { .. } => ErrorKind::Config,
                _ => ErrorKind::Network,
            },
            Error::Channel(ChannelError::InvalidPattern(_)) => ErrorKind::Config,
            Error::Channel(_) => ErrorKind::Network,
            Error::Driver(DriverError::ResponseTimeout { .. }) => ErrorKind::Timing,
            Error::Driver(DriverError::CommandFailed { .. }) => ErrorKind::Command,
            Error::Driver(DriverError::NotConnected) => ErrorKind::Network,
            Error::Hop(e) => match e {
                HopError::CredentialRejected { .. } | HopError::MissingCredential { .. } => {
                    ErrorKind::Credential
                }
                HopError::PromptNotSeen { .. } => ErrorKind::Timing,
                HopError::ConfirmationFailed { .. } | HopError::UpstreamFailed { .. } => {
                    ErrorKind::HopConfirmation
                }
            },
            Error::Archive(_) => ErrorKind::Storage,
            Error::Config(_) => ErrorKind::Config,
        }
    }

    /// Whether this is a response timeout (eligible for one retry).
    pub fn is_response_timeout(&self) -> bool {
        matches!(self, Error::Driver(DriverError::ResponseTimeout { .. }))
    }
}

/// Result type alias using hopvault's Error.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_distinguishes_credential_network_timing() {
        let auth: Error = TransportError::AuthenticationFailed {
            user: "admin".into(),
        }
        .into();
        assert_eq!(auth.kind(), ErrorKind::Credential);

        let net: Error = TransportError::Timeout(Duration::from_secs(30)).into();
        assert_eq!(net.kind(), ErrorKind::Network);

        let timing: Error = DriverError::ResponseTimeout {
            command: "show running-config".into(),
            waited: Duration::from_secs(15),
            received: 0,
        }
        .into();
        assert_eq!(timing.kind(), ErrorKind::Timing);
        assert!(timing.is_response_timeout());
    }

    #[test]
    fn test_hop_errors_kind() {
        let rejected: Error = HopError::CredentialRejected {
            device: "EOR1".into(),
            depth: 1,
        }
        .into();
        assert_eq!(rejected.kind(), ErrorKind::Credential);

        let unconfirmed: Error = HopError::ConfirmationFailed {
            device: "EOR1".into(),
            depth: 1,
            reason: "prompt 'PE#'".into(),
        }
        .into();
        assert_eq!(unconfirmed.kind(), ErrorKind::HopConfirmation);
        assert!(!unconfirmed.is_response_timeout());
    }
}
