//! Inventory and runtime configuration.
//!
//! Configuration is a TOML file parsed once at startup into an explicit
//! [`AppConfig`] value that is handed to constructors. Nothing here is
//! global.
//!
//! ```toml
//! archive_dir = "./backups"
//! period_secs = 60
//! max_cycle_secs = 600
//! retention_days = 30
//!
//! [timing]
//! dump_ms = 8000
//!
//! [[chains]]
//! name = "core"
//! dialect = "cisco_ios"
//!
//! [[chains.devices]]
//! name = "PE"
//! address = "192.168.122.147"
//! username = "admin"
//! password = "cisco"
//! secret = "cisco"
//! ```

use std::fs;
use std::ops::RangeInclusive;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use indexmap::IndexMap;
use secrecy::SecretString;
use serde::Deserialize;

use crate::archive::{RetentionPolicy, SftpSettings, validate_device_name};
use crate::channel::PtyConfig;
use crate::credentials::{CredentialProvider, DeviceCredentials, EnvCredentials, InlineCredentials};
use crate::device::DeviceSpec;
use crate::driver::{Timing, TimingSettings};
use crate::error::{ConfigError, Result};
use crate::platform::{PlatformDefinition, PlatformRegistry};
use crate::transport::{AlgorithmProfile, ConnectSettings, HostKeyVerification};

/// Where device passwords and secrets come from.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CredentialSource {
    /// `password` / `secret` fields of each device entry.
    #[default]
    Inline,

    /// `HOPVAULT_<DEVICE>_PASSWORD` / `HOPVAULT_<DEVICE>_SECRET`.
    Env,
}

/// The configuration file as written.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ConfigFile {
    pub archive_dir: PathBuf,

    #[serde(default = "default_period_secs")]
    pub period_secs: u64,

    #[serde(default = "default_max_cycle_secs")]
    pub max_cycle_secs: u64,

    /// Zero keeps every snapshot.
    #[serde(default = "default_retention_days")]
    pub retention_days: u64,

    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,

    #[serde(default)]
    pub host_key_verification: HostKeyVerification,

    #[serde(default)]
    pub known_hosts: Option<PathBuf>,

    #[serde(default)]
    pub credentials: CredentialSource,

    #[serde(default)]
    pub timing: TimingSettings,

    /// Default algorithm profile; a chain may override it.
    #[serde(default)]
    pub algorithms: AlgorithmProfile,

    #[serde(default)]
    pub chains: Vec<ChainFile>,

    /// Mirror every snapshot to an SFTP server.
    #[serde(default)]
    pub upload: Option<UploadFile>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct UploadFile {
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    pub username: String,

    /// Falls back to `HOPVAULT_UPLOAD_PASSWORD`.
    #[serde(default)]
    pub password: Option<String>,

    pub remote_dir: String,

    #[serde(default)]
    pub algorithms: Option<AlgorithmProfile>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ChainFile {
    pub name: String,

    #[serde(default = "default_dialect")]
    pub dialect: String,

    #[serde(default)]
    pub algorithms: Option<AlgorithmProfile>,

    /// Overrides the dialect's dump command.
    #[serde(default)]
    pub dump_command: Option<String>,

    #[serde(default)]
    pub devices: Vec<DeviceFile>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DeviceFile {
    pub name: String,
    pub address: String,

    #[serde(default = "default_port")]
    pub port: u16,

    pub username: String,

    #[serde(default)]
    pub hostname: Option<String>,

    #[serde(default)]
    pub password: Option<String>,

    #[serde(default)]
    pub secret: Option<String>,
}

fn default_port() -> u16 {
    22
}

fn default_period_secs() -> u64 {
    60
}

fn default_max_cycle_secs() -> u64 {
    600
}

fn default_retention_days() -> u64 {
    30
}

fn default_connect_timeout_secs() -> u64 {
    30
}

fn default_dialect() -> String {
    "cisco_ios".to_string()
}

/// One chain, ready to run.
#[derive(Debug, Clone)]
pub struct ChainConfig {
    pub name: String,
    pub platform: PlatformDefinition,
    pub devices: Vec<DeviceSpec>,
    pub connect: ConnectSettings,
}

/// Validated configuration.
pub struct AppConfig {
    pub archive_dir: PathBuf,
    pub period: Duration,
    pub max_cycle: Duration,
    pub retention: RetentionPolicy,
    pub timing: Timing,
    pub chains: Vec<ChainConfig>,
    pub credentials: Arc<dyn CredentialProvider>,

    /// Where snapshots are mirrored, if anywhere.
    pub upload: Option<SftpSettings>,
}

impl std::fmt::Debug for AppConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppConfig")
            .field("archive_dir", &self.archive_dir)
            .field("period", &self.period)
            .field("max_cycle", &self.max_cycle)
            .field("retention", &self.retention)
            .field("timing", &self.timing)
            .field("chains", &self.chains)
            .field("upload", &self.upload)
            .finish_non_exhaustive()
    }
}

impl AppConfig {
    /// Read and validate a configuration file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml(&text)
    }

    pub fn from_toml(text: &str) -> Result<Self> {
        let file: ConfigFile = toml::from_str(text).map_err(ConfigError::from)?;
        let registry = PlatformRegistry::with_builtins()?;
        Self::from_file(file, &registry)
    }

    /// Validate a parsed file against the dialects in `registry`.
    pub fn from_file(file: ConfigFile, registry: &PlatformRegistry) -> Result<Self> {
        if file.chains.is_empty() {
            return Err(invalid("at least one chain is required"));
        }
        check_range("period_secs", file.period_secs, PERIOD_SECS)?;
        check_range("max_cycle_secs", file.max_cycle_secs, MAX_CYCLE_SECS)?;
        check_range("retention_days", file.retention_days, RETENTION_DAYS)?;
        check_range("connect_timeout_secs", file.connect_timeout_secs, CONNECT_TIMEOUT_SECS)?;
        check_timing(&file.timing)?;

        // Device names key the archive, so they must be unique across chains
        let mut owners: IndexMap<String, String> = IndexMap::new();
        let mut credentials = InlineCredentials::new();
        let mut chains = Vec::with_capacity(file.chains.len());

        for chain in file.chains {
            if chain.devices.is_empty() {
                return Err(invalid(format!("chain '{}' has no devices", chain.name)));
            }

            let mut platform = registry.resolve(&chain.dialect)?.clone();
            if let Some(dump) = chain.dump_command {
                platform = platform.with_dump_command(dump);
            }

            let mut devices = Vec::with_capacity(chain.devices.len());
            for device in chain.devices {
                let name = device.name.clone();
                validate_device_name(&name).map_err(|_| {
                    invalid(format!("device name {:?} cannot be used as an archive key", name))
                })?;
                if let Some(owner) = owners.insert(name.clone(), chain.name.clone()) {
                    return Err(invalid(format!(
                        "device '{}' appears in chain '{}' and again in chain '{}'",
                        name, owner, chain.name
                    )));
                }

                if file.credentials == CredentialSource::Inline {
                    let Some(password) = device.password else {
                        return Err(invalid(format!("device '{}' has no password", name)));
                    };
                    let mut entry = DeviceCredentials::new(password);
                    if let Some(secret) = device.secret {
                        entry = entry.with_secret(secret);
                    }
                    credentials.insert(name, entry);
                }
                devices.push(DeviceSpec {
                    name: device.name,
                    address: device.address,
                    port: device.port,
                    username: device.username,
                    hostname: device.hostname,
                });
            }

            chains.push(ChainConfig {
                name: chain.name,
                platform,
                devices,
                connect: ConnectSettings {
                    timeout: Duration::from_secs(file.connect_timeout_secs),
                    pty: PtyConfig::default(),
                    host_key_verification: file.host_key_verification,
                    known_hosts_path: file.known_hosts.clone(),
                    algorithms: chain.algorithms.unwrap_or_else(|| file.algorithms.clone()),
                },
            });
        }

        let upload = file
            .upload
            .map(|upload| {
                upload_settings(
                    upload,
                    &file.algorithms,
                    file.connect_timeout_secs,
                    file.host_key_verification,
                    file.known_hosts.clone(),
                )
            })
            .transpose()?;

        let credentials: Arc<dyn CredentialProvider> = match file.credentials {
            CredentialSource::Inline => Arc::new(credentials),
            CredentialSource::Env => Arc::new(EnvCredentials::default()),
        };

        Ok(Self {
            archive_dir: file.archive_dir,
            period: Duration::from_secs(file.period_secs),
            max_cycle: Duration::from_secs(file.max_cycle_secs),
            retention: RetentionPolicy::from_days(file.retention_days),
            timing: file.timing.into(),
            chains,
            credentials,
            upload,
        })
    }

    pub fn device_count(&self) -> usize {
        self.chains.iter().map(|c| c.devices.len()).sum()
    }
}

const PERIOD_SECS: RangeInclusive<u64> = 1..=7 * 86_400;
const MAX_CYCLE_SECS: RangeInclusive<u64> = 1..=86_400;
const RETENTION_DAYS: RangeInclusive<u64> = 0..=36_500;
const CONNECT_TIMEOUT_SECS: RangeInclusive<u64> = 1..=3_600;
const WINDOW_MS: RangeInclusive<u64> = 1..=600_000;
const PROMPT_WAIT_MS: RangeInclusive<u64> = 1..=3_600_000;
const CEILING_FACTOR: RangeInclusive<u64> = 1..=100;
const HARD_LIMIT_SECS: RangeInclusive<u64> = 1..=86_400;

fn check_range(field: &str, value: u64, range: RangeInclusive<u64>) -> Result<()> {
    if range.contains(&value) {
        return Ok(());
    }
    Err(invalid(format!(
        "{} must be between {} and {} (got {})",
        field,
        range.start(),
        range.end(),
        value
    )))
}

fn check_timing(timing: &TimingSettings) -> Result<()> {
    check_range("timing.login_ms", timing.login_ms, WINDOW_MS)?;
    check_range("timing.command_ms", timing.command_ms, WINDOW_MS)?;
    check_range("timing.dump_ms", timing.dump_ms, WINDOW_MS)?;
    check_range("timing.prompt_wait_ms", timing.prompt_wait_ms, PROMPT_WAIT_MS)?;
    check_range("timing.ceiling_factor", u64::from(timing.ceiling_factor), CEILING_FACTOR)?;
    check_range("timing.hard_limit_secs", timing.hard_limit_secs, HARD_LIMIT_SECS)
}

/// Environment variable holding the upload password when the file has none.
pub const UPLOAD_PASSWORD_ENV: &str = "HOPVAULT_UPLOAD_PASSWORD";

fn upload_settings(
    upload: UploadFile,
    algorithms: &AlgorithmProfile,
    timeout_secs: u64,
    host_key_verification: HostKeyVerification,
    known_hosts_path: Option<PathBuf>,
) -> Result<SftpSettings> {
    if upload.remote_dir.trim().is_empty() {
        return Err(invalid("upload.remote_dir must not be empty"));
    }
    let password = match upload.password {
        Some(password) => password,
        None => std::env::var(UPLOAD_PASSWORD_ENV).map_err(|_| {
            invalid(format!(
                "upload has no password and {} is not set",
                UPLOAD_PASSWORD_ENV
            ))
        })?,
    };

    Ok(SftpSettings {
        host: upload.host,
        port: upload.port,
        username: upload.username,
        password: SecretString::from(password),
        remote_dir: upload.remote_dir,
        timeout: Duration::from_secs(timeout_secs),
        host_key_verification,
        known_hosts_path,
        algorithms: upload.algorithms.unwrap_or_else(|| algorithms.clone()),
    })
}

fn invalid(message: impl Into<String>) -> crate::Error {
    ConfigError::Invalid {
        message: message.into(),
    }
    .into()
}
