//! SSH transport implementation using russh.

use std::borrow::Cow;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::{Arc, Mutex};

use log::{debug, warn};
use russh::client::{self, Handle, Msg};
use russh::keys::{Algorithm, PrivateKeyWithHashAlg, PublicKey, load_secret_key};
use russh::{Channel, ChannelMsg, Preferred, cipher, kex, mac};
use secrecy::ExposeSecret;
use tokio::time::Instant;

use super::config::{AlgorithmProfile, AuthMethod, HostKeyVerification, SshConfig};
use crate::channel::{PtyConfig, ShellChannel};
use crate::error::{ChannelError, Result, TransportError};

/// SSH transport wrapping russh client.
pub struct SshTransport {
    /// The russh session handle.
    session: Handle<SshHandler>,

    /// Terminal settings for the shell channel.
    pty: PtyConfig,
}

impl SshTransport {
    /// Connect to the SSH server and authenticate.
    ///
    /// Both the handshake and the authentication are bounded by
    /// `config.timeout`. On any failure the connection is torn down
    /// before the error is returned.
    pub async fn connect(config: SshConfig) -> Result<Self> {
        let ssh_config = Arc::new(client::Config {
            inactivity_timeout: Some(config.timeout.saturating_mul(10)),
            preferred: preferred_algorithms(&config.algorithms)?,
            ..Default::default()
        });

        let host_key_error: Arc<Mutex<Option<TransportError>>> = Arc::new(Mutex::new(None));

        let handler = SshHandler {
            host: config.host.clone(),
            port: config.port,
            host_key_verification: config.host_key_verification,
            known_hosts_path: config.known_hosts_path.clone(),
            host_key_error: host_key_error.clone(),
        };

        debug!("connecting to {}", config.socket_addr());

        let mut session = tokio::time::timeout(
            config.timeout,
            client::connect(ssh_config, (config.host.as_str(), config.port), handler),
        )
        .await
        .map_err(|_| TransportError::Timeout(config.timeout))?
        .map_err(|e| {
            // Prefer the detailed host-key error over russh's generic UnknownKey
            let stored = host_key_error.lock().ok().and_then(|mut slot| slot.take());
            stored.unwrap_or(TransportError::Ssh(e))
        })?;

        let auth = tokio::time::timeout(config.timeout, Self::authenticate(&mut session, &config))
            .await
            .map_err(|_| crate::Error::from(TransportError::Timeout(config.timeout)))
            .and_then(|r| r);

        if let Err(e) = auth {
            let _ = session
                .disconnect(russh::Disconnect::ByApplication, "", "en")
                .await;
            return Err(e);
        }

        Ok(Self {
            session,
            pty: PtyConfig {
                terminal_width: config.terminal_width,
                terminal_height: config.terminal_height,
            },
        })
    }

    /// Open a new PTY shell channel on this connection.
    pub async fn open_channel(&self) -> Result<SshChannel> {
        let channel = self
            .session
            .channel_open_session()
            .await
            .map_err(ChannelError::PtyOpenFailed)?;

        channel
            .request_pty(
                true,
                "vt100",
                self.pty.terminal_width,
                self.pty.terminal_height,
                0,
                0,
                &[],
            )
            .await
            .map_err(ChannelError::PtyOpenFailed)?;

        channel
            .request_shell(true)
            .await
            .map_err(ChannelError::PtyOpenFailed)?;

        Ok(SshChannel {
            channel,
            closed: false,
        })
    }

    /// Open a channel running the named subsystem, such as `sftp`.
    pub async fn open_subsystem(&self, name: &str) -> Result<Channel<Msg>> {
        let channel = self
            .session
            .channel_open_session()
            .await
            .map_err(ChannelError::Ssh)?;
        channel
            .request_subsystem(true, name)
            .await
            .map_err(ChannelError::Ssh)?;
        Ok(channel)
    }

    /// Whether the russh background task is still running.
    pub fn is_alive(&self) -> bool {
        !self.session.is_closed()
    }

    /// Authenticate with the server.
    async fn authenticate(session: &mut Handle<SshHandler>, config: &SshConfig) -> Result<()> {
        let success = match &config.auth {
            AuthMethod::Password(password) => session
                .authenticate_password(&config.username, password.expose_secret())
                .await
                .map_err(TransportError::Ssh)?
                .success(),
            AuthMethod::PrivateKey { path, passphrase } => {
                let key = load_secret_key(path, passphrase.as_ref().map(|p| p.expose_secret()))
                    .map_err(|e| TransportError::Key(e.to_string()))?;

                let hash_alg = session
                    .best_supported_rsa_hash()
                    .await
                    .map_err(TransportError::Ssh)?
                    .flatten();

                session
                    .authenticate_publickey(
                        &config.username,
                        PrivateKeyWithHashAlg::new(Arc::new(key), hash_alg),
                    )
                    .await
                    .map_err(TransportError::Ssh)?
                    .success()
            }
        };

        if !success {
            return Err(TransportError::AuthenticationFailed {
                user: config.username.clone(),
            }
            .into());
        }

        Ok(())
    }

    /// Close the connection.
    pub async fn close(self) -> Result<()> {
        self.session
            .disconnect(russh::Disconnect::ByApplication, "", "en")
            .await
            .map_err(TransportError::Ssh)?;
        Ok(())
    }
}

/// Translate an algorithm profile into russh preferences.
///
/// Unset lists keep russh's defaults. Names russh does not implement are
/// rejected up front rather than silently dropped from the offer.
pub(crate) fn preferred_algorithms(profile: &AlgorithmProfile) -> Result<Preferred> {
    let mut preferred = Preferred::default();

    if let Some(names) = &profile.kex {
        let mut list = resolve(names, "kex", |n| kex::Name::try_from(n).ok())?;
        // Pseudo-algorithms that only advertise extension support
        list.push(kex::EXTENSION_SUPPORT_AS_CLIENT);
        list.push(kex::EXTENSION_OPENSSH_STRICT_KEX_AS_CLIENT);
        preferred.kex = Cow::Owned(list);
    }
    if let Some(names) = &profile.ciphers {
        preferred.cipher = Cow::Owned(resolve(names, "cipher", |n| cipher::Name::try_from(n).ok())?);
    }
    if let Some(names) = &profile.macs {
        preferred.mac = Cow::Owned(resolve(names, "mac", |n| mac::Name::try_from(n).ok())?);
    }
    if let Some(names) = &profile.host_keys {
        preferred.key = Cow::Owned(resolve(names, "host key", |n| Algorithm::from_str(n).ok())?);
    }

    Ok(preferred)
}

fn resolve<T>(
    names: &[String],
    kind: &'static str,
    lookup: impl Fn(&str) -> Option<T>,
) -> Result<Vec<T>> {
    names
        .iter()
        .map(|name| {
            lookup(name).ok_or_else(|| {
                TransportError::UnsupportedAlgorithm {
                    kind,
                    name: name.clone(),
                }
                .into()
            })
        })
        .collect()
}

/// Interactive shell channel over an SSH PTY.
pub struct SshChannel {
    channel: Channel<Msg>,
    closed: bool,
}

impl ShellChannel for SshChannel {
    async fn send(&mut self, data: &[u8]) -> Result<()> {
        if self.closed {
            return Err(ChannelError::Closed.into());
        }
        self.channel
            .data(data)
            .await
            .map_err(|e| ChannelError::Ssh(e).into())
    }

    async fn recv_until(&mut self, deadline: Instant) -> Result<Option<Vec<u8>>> {
        if self.closed {
            return Err(ChannelError::Closed.into());
        }
        loop {
            let msg = match tokio::time::timeout_at(deadline, self.channel.wait()).await {
                Ok(msg) => msg,
                Err(_) => return Ok(None),
            };
            match msg {
                Some(ChannelMsg::Data { data }) => return Ok(Some(data.to_vec())),
                Some(ChannelMsg::ExtendedData { data, .. }) => return Ok(Some(data.to_vec())),
                Some(ChannelMsg::Eof) | Some(ChannelMsg::Close) | None => {
                    self.closed = true;
                    return Err(ChannelError::Closed.into());
                }
                Some(other) => {
                    debug!("ignoring channel message: {:?}", other);
                }
            }
        }
    }

    async fn close(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        self.channel
            .close()
            .await
            .map_err(|e| ChannelError::Ssh(e).into())
    }
}

/// SSH client handler for russh.
struct SshHandler {
    host: String,
    port: u16,
    host_key_verification: HostKeyVerification,
    known_hosts_path: Option<PathBuf>,
    /// Stores a detailed host-key error so connect() can surface it
    /// instead of the generic russh::Error::UnknownKey.
    host_key_error: Arc<Mutex<Option<TransportError>>>,
}

impl SshHandler {
    /// Check the host key against known_hosts.
    ///
    /// Returns `Ok(true)` if matched, `Ok(false)` if host not found,
    /// `Err(TransportError::HostKeyChanged)` if key changed.
    fn check_known_hosts(&self, pubkey: &PublicKey) -> std::result::Result<bool, TransportError> {
        let result = if let Some(ref path) = self.known_hosts_path {
            russh::keys::check_known_hosts_path(&self.host, self.port, pubkey, path)
        } else {
            russh::keys::check_known_hosts(&self.host, self.port, pubkey)
        };

        match result {
            Ok(matched) => Ok(matched),
            Err(russh::keys::Error::KeyChanged { line }) => Err(TransportError::HostKeyChanged {
                host: self.host.clone(),
                port: self.port,
                line,
            }),
            Err(e) => Err(TransportError::KnownHosts(e.to_string())),
        }
    }

    /// Save a new host key to known_hosts.
    fn learn_host_key(&self, pubkey: &PublicKey) -> std::result::Result<(), TransportError> {
        let result = if let Some(ref path) = self.known_hosts_path {
            russh::keys::known_hosts::learn_known_hosts_path(&self.host, self.port, pubkey, path)
        } else {
            russh::keys::known_hosts::learn_known_hosts(&self.host, self.port, pubkey)
        };

        result.map_err(|e| TransportError::KnownHosts(e.to_string()))
    }

    fn reject(&self, error: TransportError) -> bool {
        if let Ok(mut slot) = self.host_key_error.lock() {
            *slot = Some(error);
        }
        false
    }
}

impl client::Handler for SshHandler {
    type Error = russh::Error;

    async fn check_server_key(
        &mut self,
        server_public_key: &PublicKey,
    ) -> std::result::Result<bool, Self::Error> {
        match self.host_key_verification {
            HostKeyVerification::Disabled => Ok(true),

            HostKeyVerification::AcceptNew => match self.check_known_hosts(server_public_key) {
                Ok(true) => Ok(true),
                Ok(false) => {
                    if let Err(e) = self.learn_host_key(server_public_key) {
                        warn!("Failed to save host key: {}", e);
                    }
                    Ok(true)
                }
                Err(e) => Ok(self.reject(e)),
            },

            HostKeyVerification::Strict => match self.check_known_hosts(server_public_key) {
                Ok(true) => Ok(true),
                Ok(false) => Ok(self.reject(TransportError::HostKeyUnknown {
                    host: self.host.clone(),
                    port: self.port,
                })),
                Err(e) => Ok(self.reject(e)),
            },
        }
    }
}
