//! Opening the first hop of a chain.

use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use super::config::{AlgorithmProfile, HostKeyVerification, SshConfig};
use super::session::Session;
use super::ssh::SshChannel;
use crate::channel::{PtyConfig, ShellChannel};
use crate::credentials::CredentialProvider;
use crate::device::DeviceSpec;
use crate::error::Result;

/// Opens a session positioned at a chain's first device.
pub trait Connector: Send + Sync {
    type Channel: ShellChannel;

    fn connect(&self, first: &DeviceSpec) -> impl Future<Output = Result<Session<Self::Channel>>> + Send;
}

/// Transport settings shared by the hops of one chain.
#[derive(Debug, Clone)]
pub struct ConnectSettings {
    pub timeout: Duration,
    pub pty: PtyConfig,
    pub host_key_verification: HostKeyVerification,
    pub known_hosts_path: Option<PathBuf>,
    pub algorithms: AlgorithmProfile,
}

impl Default for ConnectSettings {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            pty: PtyConfig::default(),
            host_key_verification: HostKeyVerification::default(),
            known_hosts_path: None,
            algorithms: AlgorithmProfile::default(),
        }
    }
}

/// Password SSH login to the first device.
pub struct SshConnector {
    credentials: Arc<dyn CredentialProvider>,
    settings: ConnectSettings,
}

impl SshConnector {
    pub fn new(credentials: Arc<dyn CredentialProvider>, settings: ConnectSettings) -> Self {
        Self {
            credentials,
            settings,
        }
    }

    /// SSH configuration for `device`, credential included.
    pub fn ssh_config(&self, device: &DeviceSpec) -> Result<SshConfig> {
        let password = self.credentials.login(device)?;
        let mut config = SshConfig::new(&device.address, &device.username, password);
        config.port = device.port;
        config.timeout = self.settings.timeout;
        config.terminal_width = self.settings.pty.terminal_width;
        config.terminal_height = self.settings.pty.terminal_height;
        config.host_key_verification = self.settings.host_key_verification;
        config.known_hosts_path = self.settings.known_hosts_path.clone();
        config.algorithms = self.settings.algorithms.clone();
        Ok(config)
    }
}

impl Connector for SshConnector {
    type Channel = SshChannel;

    fn connect(&self, first: &DeviceSpec) -> impl Future<Output = Result<Session<SshChannel>>> + Send {
        let config = self.ssh_config(first);
        async move { Session::open(config?).await }
    }
}
