//! SSH connection configuration.

use std::path::PathBuf;
use std::time::Duration;

use secrecy::SecretString;
use serde::Deserialize;

/// Host key verification mode, analogous to OpenSSH's `StrictHostKeyChecking`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HostKeyVerification {
    /// Reject unknown and changed keys. Connection fails if the host
    /// is not already in known_hosts.
    Strict,

    /// Accept and auto-learn unknown keys, but reject changed keys.
    #[default]
    AcceptNew,

    /// Accept all keys without checking. For lab use only.
    Disabled,
}

/// Restriction of the algorithms offered during key exchange.
///
/// Each list is optional; an unset list keeps the transport's modern
/// defaults. Older network operating systems often only speak SHA-1 key
/// exchange, CBC ciphers and `hmac-sha1`, so a chain's entry point can be
/// pinned to a suite the device actually implements.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct AlgorithmProfile {
    /// Key-exchange algorithm names, in preference order.
    pub kex: Option<Vec<String>>,

    /// Cipher names, in preference order.
    pub ciphers: Option<Vec<String>>,

    /// MAC names, in preference order.
    pub macs: Option<Vec<String>>,

    /// Host key algorithm names, in preference order.
    pub host_keys: Option<Vec<String>>,
}

impl AlgorithmProfile {
    /// A suite for IOS-era devices that predate curve25519 and AEAD ciphers.
    pub fn legacy() -> Self {
        Self {
            kex: Some(strings(&[
                "curve25519-sha256",
                "diffie-hellman-group14-sha256",
                "diffie-hellman-group14-sha1",
                "diffie-hellman-group1-sha1",
            ])),
            ciphers: Some(strings(&[
                "aes128-ctr",
                "aes256-ctr",
                "aes128-cbc",
                "aes256-cbc",
            ])),
            macs: Some(strings(&["hmac-sha2-256", "hmac-sha1"])),
            host_keys: Some(strings(&["rsa-sha2-256", "ssh-rsa"])),
        }
    }

    /// True when nothing is overridden.
    pub fn is_default(&self) -> bool {
        self.kex.is_none() && self.ciphers.is_none() && self.macs.is_none() && self.host_keys.is_none()
    }
}

fn strings(names: &[&str]) -> Vec<String> {
    names.iter().map(|s| s.to_string()).collect()
}

/// SSH connection configuration.
#[derive(Debug)]
pub struct SshConfig {
    /// Target host (hostname or IP address).
    pub host: String,

    /// SSH port (default: 22).
    pub port: u16,

    /// Username for authentication.
    pub username: String,

    /// Authentication method.
    pub auth: AuthMethod,

    /// Connection timeout. Also bounds authentication.
    pub timeout: Duration,

    /// Terminal width for PTY.
    pub terminal_width: u32,

    /// Terminal height for PTY.
    pub terminal_height: u32,

    /// Host key verification mode.
    pub host_key_verification: HostKeyVerification,

    /// Path to known_hosts file.
    pub known_hosts_path: Option<PathBuf>,

    /// Allowed key-exchange, cipher and MAC algorithms.
    pub algorithms: AlgorithmProfile,
}

impl SshConfig {
    /// Password-authenticated config with default timeouts.
    pub fn new(host: impl Into<String>, username: impl Into<String>, password: SecretString) -> Self {
        Self {
            host: host.into(),
            port: 22,
            username: username.into(),
            auth: AuthMethod::Password(password),
            timeout: Duration::from_secs(30),
            terminal_width: 511,
            terminal_height: 24,
            host_key_verification: HostKeyVerification::default(),
            known_hosts_path: None,
            algorithms: AlgorithmProfile::default(),
        }
    }

    /// Get the socket address for connection.
    pub fn socket_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Authentication method for SSH connections.
#[derive(Debug)]
pub enum AuthMethod {
    /// Password authentication.
    Password(SecretString),

    /// Private key authentication.
    PrivateKey {
        /// Path to the private key file.
        path: PathBuf,
        /// Optional passphrase for encrypted keys.
        passphrase: Option<SecretString>,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_profile_overrides_nothing() {
        assert!(AlgorithmProfile::default().is_default());
        assert!(!AlgorithmProfile::legacy().is_default());
    }

    #[test]
    fn test_profile_from_toml() {
        let profile: AlgorithmProfile = toml::from_str(
            r#"
            kex = ["diffie-hellman-group14-sha1"]
            macs = ["hmac-sha1"]
            "#,
        )
        .unwrap();
        assert_eq!(profile.kex.as_deref(), Some(&["diffie-hellman-group14-sha1".to_string()][..]));
        assert!(profile.ciphers.is_none());
    }

    #[test]
    fn test_socket_addr() {
        let mut config = SshConfig::new("10.0.0.1", "admin", SecretString::from("x"));
        config.port = 2222;
        assert_eq!(config.socket_addr(), "10.0.0.1:2222");
    }
}
