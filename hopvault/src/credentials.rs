//! Credential lookup for hops.
//!
//! The hop chain only ever asks a [`CredentialProvider`]; where the
//! secrets live (inventory file, environment, a vault) is up to the
//! provider.

use std::collections::HashMap;

use secrecy::{ExposeSecret, SecretString};

use crate::device::DeviceSpec;
use crate::error::{HopError, Result};

/// Source of login passwords and secondary (enable) secrets.
pub trait CredentialProvider: Send + Sync {
    /// Password for the SSH login to `device`.
    fn login(&self, device: &DeviceSpec) -> Result<SecretString>;

    /// Secondary secret for privilege escalation on `device`, if it needs one.
    fn secret(&self, device: &DeviceSpec) -> Result<Option<SecretString>>;
}

/// Credentials for one device.
#[derive(Debug)]
pub struct DeviceCredentials {
    pub password: SecretString,
    pub secret: Option<SecretString>,
}

impl DeviceCredentials {
    pub fn new(password: impl Into<String>) -> Self {
        Self {
            password: SecretString::from(password.into()),
            secret: None,
        }
    }

    pub fn with_secret(mut self, secret: impl Into<String>) -> Self {
        self.secret = Some(SecretString::from(secret.into()));
        self
    }
}

/// Credentials held in memory, keyed by device name.
#[derive(Debug, Default)]
pub struct InlineCredentials {
    entries: HashMap<String, DeviceCredentials>,
}

impl InlineCredentials {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, device: impl Into<String>, credentials: DeviceCredentials) {
        self.entries.insert(device.into(), credentials);
    }

    pub fn with(mut self, device: impl Into<String>, credentials: DeviceCredentials) -> Self {
        self.insert(device, credentials);
        self
    }
}

impl CredentialProvider for InlineCredentials {
    fn login(&self, device: &DeviceSpec) -> Result<SecretString> {
        self.entries
            .get(&device.name)
            .map(|c| copy_secret(&c.password))
            .ok_or_else(|| {
                HopError::MissingCredential {
                    device: device.name.clone(),
                }
                .into()
            })
    }

    fn secret(&self, device: &DeviceSpec) -> Result<Option<SecretString>> {
        Ok(self
            .entries
            .get(&device.name)
            .and_then(|c| c.secret.as_ref())
            .map(copy_secret))
    }
}

/// Credentials read from the environment at lookup time.
///
/// Device `EOR1` reads `HOPVAULT_EOR1_PASSWORD` and, optionally,
/// `HOPVAULT_EOR1_SECRET`. Non-alphanumeric characters in the name
/// become `_`.
#[derive(Debug, Clone)]
pub struct EnvCredentials {
    prefix: String,
}

impl Default for EnvCredentials {
    fn default() -> Self {
        Self {
            prefix: "HOPVAULT".to_string(),
        }
    }
}

impl EnvCredentials {
    pub fn with_prefix(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }

    fn var_name(&self, device: &DeviceSpec, suffix: &str) -> String {
        let name: String = device
            .name
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() { c.to_ascii_uppercase() } else { '_' })
            .collect();
        format!("{}_{}_{}", self.prefix, name, suffix)
    }
}

impl CredentialProvider for EnvCredentials {
    fn login(&self, device: &DeviceSpec) -> Result<SecretString> {
        std::env::var(self.var_name(device, "PASSWORD"))
            .map(SecretString::from)
            .map_err(|_| {
                HopError::MissingCredential {
                    device: device.name.clone(),
                }
                .into()
            })
    }

    fn secret(&self, device: &DeviceSpec) -> Result<Option<SecretString>> {
        Ok(std::env::var(self.var_name(device, "SECRET"))
            .ok()
            .map(SecretString::from))
    }
}

pub(crate) fn copy_secret(secret: &SecretString) -> SecretString {
    SecretString::from(secret.expose_secret().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_inline_lookup() {
        let creds = InlineCredentials::new()
            .with("PE", DeviceCredentials::new("cisco").with_secret("enable-me"))
            .with("EOR1", DeviceCredentials::new("cisco"));

        let pe = DeviceSpec::new("PE", "192.168.122.147", "admin");
        assert_eq!(creds.login(&pe).unwrap().expose_secret(), "cisco");
        assert_eq!(
            creds.secret(&pe).unwrap().map(|s| s.expose_secret().to_string()),
            Some("enable-me".to_string())
        );

        let eor1 = DeviceSpec::new("EOR1", "10.0.0.2", "admin");
        assert!(creds.secret(&eor1).unwrap().is_none());

        let spine = DeviceSpec::new("SPINE", "10.0.1.2", "admin");
        assert!(matches!(
            creds.login(&spine),
            Err(crate::Error::Hop(HopError::MissingCredential { .. }))
        ));
    }

    #[test]
    fn test_env_var_names() {
        let env = EnvCredentials::default();
        let device = DeviceSpec::new("core-r1.dc", "10.0.0.1", "admin");
        assert_eq!(env.var_name(&device, "PASSWORD"), "HOPVAULT_CORE_R1_DC_PASSWORD");
        assert_eq!(
            EnvCredentials::with_prefix("LAB").var_name(&device, "SECRET"),
            "LAB_CORE_R1_DC_SECRET"
        );
    }

    #[test]
    fn test_secrets_are_redacted_in_debug() {
        let creds = DeviceCredentials::new("hunter2");
        assert!(!format!("{:?}", creds).contains("hunter2"));
    }
}
