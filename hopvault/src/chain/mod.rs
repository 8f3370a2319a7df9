//! Hop chain traversal and capture.
//!
//! A chain walks an ordered device list over one [`Session`]. The first
//! device is reached by the transport itself; every later device is
//! reached by issuing the dialect's inner-login command from the previous
//! device's shell. A hop is only trusted once the channel shows the
//! expected device's prompt, because completion detection is timing based
//! and a late or lost response would otherwise go unnoticed.
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use hopvault::error::ChannelError;
//! use hopvault::{
//!     Archive, DeviceCredentials, DeviceSpec, HopChain, InlineCredentials, Session, SshConfig,
//!     Timing, platform::vendors::cisco_ios,
//! };
//! use secrecy::SecretString;
//!
//! # async fn example() -> Result<(), hopvault::Error> {
//! let devices = vec![
//!     DeviceSpec::new("PE", "192.168.122.147", "admin"),
//!     DeviceSpec::new("EOR1", "10.0.0.2", "admin"),
//! ];
//! let credentials = InlineCredentials::new()
//!     .with("PE", DeviceCredentials::new("cisco").with_secret("cisco"))
//!     .with("EOR1", DeviceCredentials::new("cisco").with_secret("cisco"));
//!
//! let platform = cisco_ios::platform().map_err(ChannelError::from)?;
//! let chain = HopChain::new("core", platform, Timing::default(), Arc::new(credentials));
//! let archive = Archive::open_dir("./backups")?;
//!
//! let config = SshConfig::new("192.168.122.147", "admin", SecretString::from("cisco"));
//! let mut session = Session::open(config).await?;
//! let results = chain.capture_all(&mut session, &devices, &archive).await;
//! session.close().await?;
//!
//! for result in &results {
//!     println!("{}: {}", result.device, result.outcome);
//! }
//! # Ok(())
//! # }
//! ```

mod result;

use std::sync::Arc;

use chrono::Utc;
use log::{debug, info, warn};
use regex::bytes::Regex;

pub use result::{CaptureFailure, CaptureResult, CycleReport, Outcome, OutcomeCounts};

use crate::archive::Archive;
use crate::channel::{ShellChannel, last_line};
use crate::credentials::CredentialProvider;
use crate::device::DeviceSpec;
use crate::driver::{CommandDriver, InteractiveEvent, InteractiveStep, Timing};
use crate::error::{ChannelError, DriverError, Error, ErrorKind, HopError, Result};
use crate::events::{CycleEvent, EventSink, LogSink};
use crate::platform::PlatformDefinition;
use crate::transport::{Session, SessionState};

/// Blank lines sent to back out of a credential prompt that was answered
/// wrongly.
const ABANDON_ATTEMPTS: usize = 3;

/// Walks one ordered device list and captures each device's configuration.
pub struct HopChain {
    name: String,
    platform: PlatformDefinition,
    timing: Timing,
    driver: CommandDriver,
    credentials: Arc<dyn CredentialProvider>,
    events: Arc<dyn EventSink>,
}

impl HopChain {
    pub fn new(
        name: impl Into<String>,
        platform: PlatformDefinition,
        timing: Timing,
        credentials: Arc<dyn CredentialProvider>,
    ) -> Self {
        Self {
            name: name.into(),
            platform,
            timing,
            driver: CommandDriver::new(),
            credentials,
            events: Arc::new(LogSink),
        }
    }

    pub fn with_events(mut self, events: Arc<dyn EventSink>) -> Self {
        self.events = events;
        self
    }

    pub fn with_driver(mut self, driver: CommandDriver) -> Self {
        self.driver = driver;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn platform(&self) -> &PlatformDefinition {
        &self.platform
    }

    pub fn timing(&self) -> &Timing {
        &self.timing
    }

    pub(crate) fn events(&self) -> &dyn EventSink {
        self.events.as_ref()
    }

    /// Capture every device in hop order and return one result per device.
    ///
    /// The session must be positioned at `devices[0]`. It is left wherever
    /// the unwind ends; callers close it afterwards.
    pub async fn capture_all<C: ShellChannel>(
        &self,
        session: &mut Session<C>,
        devices: &[DeviceSpec],
        archive: &Archive,
    ) -> Vec<CaptureResult> {
        let mut results = Vec::with_capacity(devices.len());
        self.capture_into(session, devices, archive, &mut results).await;
        results
    }

    /// [`capture_all`](Self::capture_all), appending to `results` as each
    /// device finishes so a caller that abandons the future keeps the
    /// results gathered so far.
    pub async fn capture_into<C: ShellChannel>(
        &self,
        session: &mut Session<C>,
        devices: &[DeviceSpec],
        archive: &Archive,
        results: &mut Vec<CaptureResult>,
    ) {
        let mut attempted = 0;

        for (depth, device) in devices.iter().enumerate() {
            attempted = depth;
            let arrival = if depth == 0 {
                self.settle(session, device).await
            } else {
                self.hop_to(session, devices, depth).await
            };

            let prompt = match arrival {
                Ok(prompt) => prompt,
                Err(e) => {
                    self.push_failure(results, device, depth, &e);
                    self.fail_downstream(results, devices, depth);
                    break;
                }
            };

            match self.capture_here(session, device, depth, &prompt).await {
                Ok(text) => match archive.record(&device.name, text.as_bytes(), Utc::now()) {
                    Ok(recorded) => {
                        self.events.emit(&CycleEvent::DeviceCaptured {
                            chain: self.name.clone(),
                            device: device.name.clone(),
                            depth,
                            drift: recorded.drift,
                            fingerprint: recorded.entry.fingerprint,
                            entry: recorded.entry.key.clone(),
                        });
                        results.push(CaptureResult::recorded(&device.name, depth, text, recorded));
                    }
                    // The channel is still good; later devices go ahead
                    Err(e) => self.push_failure(results, device, depth, &e),
                },
                Err(e) => {
                    self.push_failure(results, device, depth, &e);
                    if session.depth() != Some(depth) {
                        self.fail_downstream(results, devices, depth);
                        break;
                    }
                }
            }
        }

        self.unwind(session, devices, attempted).await;
    }

    /// Position at the first device: drain the banner and confirm identity.
    async fn settle<C: ShellChannel>(
        &self,
        session: &mut Session<C>,
        device: &DeviceSpec,
    ) -> Result<String> {
        let banner = self.driver.drain(session, self.timing.login).await?;
        debug!("[{}] {} banner: {} bytes", self.name, device.name, banner.len());
        self.confirm_identity(session, device, 0).await
    }

    /// Log into `devices[depth]` from the hop before it.
    ///
    /// The credential is only sent once the login prompt has been seen.
    async fn hop_to<C: ShellChannel>(
        &self,
        session: &mut Session<C>,
        devices: &[DeviceSpec],
        depth: usize,
    ) -> Result<String> {
        let device = &devices[depth];
        let password = self.credentials.login(device)?;
        let login = self
            .platform
            .login_command(&device.username, &device.address, device.port);

        info!("[{}] hop {} -> {} ({})", self.name, depth - 1, device.name, device.address);
        session.begin_hop(depth);

        let events = [
            InteractiveEvent::with_pattern(login, self.platform.login_prompt.clone()),
            InteractiveEvent::secret(password),
        ];
        let result = self
            .driver
            .send_interactive(session, &events, &self.timing)
            .await?;

        match result.failed_step() {
            Some((0, _)) => {
                session.mark_failed();
                return Err(HopError::PromptNotSeen {
                    device: device.name.clone(),
                    depth,
                    waited: self.timing.prompt_wait,
                }
                .into());
            }
            Some((_, step)) => {
                session.mark_failed();
                return Err(unanswered("login credential", step));
            }
            None => {}
        }

        let after = result.final_output().unwrap_or_default();
        if self.platform.login_prompt.is_match(last_line(after.as_bytes()).as_bytes()) {
            // Asked again: the credential was refused
            let login_prompt = self.platform.login_prompt.clone();
            self.abandon_prompt(session, &login_prompt).await;
            self.reconfirm(session, &devices[depth - 1], depth - 1).await;
            return Err(HopError::CredentialRejected {
                device: device.name.clone(),
                depth,
            }
            .into());
        }

        self.confirm_identity(session, device, depth).await
    }

    /// Check that the channel is at `device` and return its prompt.
    ///
    /// Timeouts on the identity command count as a failed confirmation.
    async fn confirm_identity<C: ShellChannel>(
        &self,
        session: &mut Session<C>,
        device: &DeviceSpec,
        depth: usize,
    ) -> Result<String> {
        let hostname = device.expected_hostname();
        let pattern = self.identity_pattern(hostname)?;

        let response = match self
            .driver
            .execute_with_retry(session, &self.platform.identity_command, self.timing.login)
            .await
        {
            Ok(response) => response,
            Err(e) if e.is_response_timeout() => {
                session.mark_failed();
                return Err(HopError::ConfirmationFailed {
                    device: device.name.clone(),
                    depth,
                    reason: e.to_string(),
                }
                .into());
            }
            Err(e) => return Err(e),
        };

        if !pattern.is_match(response.prompt.as_bytes()) {
            session.mark_failed();
            return Err(HopError::ConfirmationFailed {
                device: device.name.clone(),
                depth,
                reason: format!("prompt {:?} does not identify {}", response.prompt, hostname),
            }
            .into());
        }

        session.confirm_arrival(depth);
        debug!("[{}] at {} (depth {}): {:?}", self.name, device.name, depth, response.prompt);
        Ok(response.prompt)
    }

    /// Escalate, disable paging and dump the configuration.
    async fn capture_here<C: ShellChannel>(
        &self,
        session: &mut Session<C>,
        device: &DeviceSpec,
        depth: usize,
        prompt: &str,
    ) -> Result<String> {
        self.escalate(session, device, depth, prompt).await?;

        if let Some(pagination) = &self.platform.pagination_command {
            let response = self
                .driver
                .execute_with_retry(session, pagination, self.timing.command)
                .await?;
            self.check_failure(pagination, &response.result)?;
        }

        let dump = &self.platform.dump_command;
        let response = self
            .driver
            .execute_with_retry(session, dump, self.timing.dump)
            .await?;
        self.check_failure(dump, &response.result)?;

        // A dump that paused longer than the window looks complete but
        // does not end at the prompt
        let pattern = self.identity_pattern(device.expected_hostname())?;
        if !pattern.is_match(response.prompt.as_bytes()) {
            session.mark_failed();
            return Err(HopError::ConfirmationFailed {
                device: device.name.clone(),
                depth,
                reason: format!(
                    "'{}' output did not end at the device prompt (last line {:?})",
                    dump, response.prompt
                ),
            }
            .into());
        }

        debug!(
            "[{}] {}: {} bytes of configuration in {:?} ({} attempt(s))",
            self.name,
            device.name,
            response.result.len(),
            response.elapsed,
            response.attempts
        );
        Ok(response.result)
    }

    /// Enter the privileged level when the device has a secondary secret
    /// and the prompt is not privileged yet.
    async fn escalate<C: ShellChannel>(
        &self,
        session: &mut Session<C>,
        device: &DeviceSpec,
        depth: usize,
        prompt: &str,
    ) -> Result<()> {
        let Some(level) = &self.platform.privileged else {
            return Ok(());
        };
        if level.matches(prompt) {
            return Ok(());
        }
        let Some(secret) = self.credentials.secret(device)? else {
            debug!("[{}] {}: no secret, staying at {:?}", self.name, device.name, prompt);
            return Ok(());
        };

        let events = [
            InteractiveEvent::with_pattern(level.escalate_command.clone(), level.escalate_prompt.clone()),
            InteractiveEvent::secret(secret),
        ];
        let result = self
            .driver
            .send_interactive(session, &events, &self.timing)
            .await?;

        match result.failed_step() {
            Some((0, _)) => {
                return Err(HopError::PromptNotSeen {
                    device: device.name.clone(),
                    depth,
                    waited: self.timing.prompt_wait,
                }
                .into());
            }
            Some((_, step)) => {
                let err = unanswered(&format!("{} secret", level.escalate_command), step);
                self.reconfirm(session, device, depth).await;
                return Err(err);
            }
            None => {}
        }

        let after = last_line(result.final_output().unwrap_or_default().as_bytes());
        if level.matches(&after) {
            debug!("[{}] {}: {} reached", self.name, device.name, level.name);
            return Ok(());
        }

        if level.escalate_prompt.is_match(after.as_bytes()) {
            self.abandon_prompt(session, &level.escalate_prompt).await;
        }
        self.reconfirm(session, device, depth).await;
        Err(HopError::CredentialRejected {
            device: device.name.clone(),
            depth,
        }
        .into())
    }

    /// Send blank lines until the channel no longer shows `prompt`.
    async fn abandon_prompt<C: ShellChannel>(&self, session: &mut Session<C>, prompt: &Regex) {
        for _ in 0..ABANDON_ATTEMPTS {
            match self.driver.execute(session, "", self.timing.login).await {
                Ok(response) if !prompt.is_match(response.prompt.as_bytes()) => return,
                Ok(_) => {}
                Err(e) => {
                    debug!("[{}] abandoning credential prompt: {}", self.name, e);
                    return;
                }
            }
        }
    }

    /// Best-effort check that the channel is back at `device`.
    async fn reconfirm<C: ShellChannel>(
        &self,
        session: &mut Session<C>,
        device: &DeviceSpec,
        depth: usize,
    ) {
        if let Err(e) = self.confirm_identity(session, device, depth).await {
            warn!("[{}] position unknown after failed credential: {}", self.name, e);
        }
    }

    /// Leave every hop entered, innermost first.
    ///
    /// `attempted` is the deepest hop the cycle tried to reach. When the
    /// position is unknown it is located first from the prompt. Unwind
    /// problems are logged only; the session is closed at the end of the
    /// cycle regardless.
    async fn unwind<C: ShellChannel>(
        &self,
        session: &mut Session<C>,
        devices: &[DeviceSpec],
        attempted: usize,
    ) {
        let known = match session.state() {
            SessionState::Connected { depth } => Some(depth),
            SessionState::Disconnected => return,
            SessionState::HoppingTo { .. } | SessionState::Failed => None,
        };
        let located = match known {
            Some(depth) => Some(depth),
            None if attempted == 0 => None,
            None => self.locate(session, &devices[..=attempted]).await,
        };
        let Some(mut depth) = located else {
            warn!("[{}] position unknown, leaving the session to be closed", self.name);
            return;
        };

        while depth > 0 {
            let exit = &self.platform.exit_command;
            let response = match self.driver.execute_with_retry(session, exit, self.timing.login).await {
                Ok(response) => response,
                Err(e) => {
                    warn!("[{}] unwind from {} failed: {}", self.name, devices[depth].name, e);
                    return;
                }
            };

            match self.identify(&response.prompt, &devices[..depth]) {
                Some(upstream) => {
                    session.confirm_exit(upstream);
                    debug!("[{}] back at {}", self.name, devices[upstream].name);
                    depth = upstream;
                }
                None => {
                    warn!(
                        "[{}] exit from {} ended at unrecognised prompt {:?}",
                        self.name, devices[depth].name, response.prompt
                    );
                    session.mark_failed();
                    return;
                }
            }
        }
    }

    /// Find which of `candidates` the channel is at by redrawing the prompt.
    async fn locate<C: ShellChannel>(
        &self,
        session: &mut Session<C>,
        candidates: &[DeviceSpec],
    ) -> Option<usize> {
        let response = match self
            .driver
            .execute(session, &self.platform.identity_command, self.timing.login)
            .await
        {
            Ok(response) => response,
            Err(e) => {
                debug!("[{}] cannot redraw prompt: {}", self.name, e);
                return None;
            }
        };
        let depth = self.identify(&response.prompt, candidates)?;
        session.confirm_exit(depth);
        Some(depth)
    }

    /// Innermost device among `candidates` whose identity matches `prompt`.
    fn identify(&self, prompt: &str, candidates: &[DeviceSpec]) -> Option<usize> {
        candidates.iter().rposition(|device| {
            self.identity_pattern(device.expected_hostname())
                .is_ok_and(|pattern| pattern.is_match(prompt.as_bytes()))
        })
    }

    fn identity_pattern(&self, hostname: &str) -> Result<Regex> {
        self.platform
            .identity_pattern(hostname)
            .map_err(|e| ChannelError::InvalidPattern(e).into())
    }

    fn check_failure(&self, command: &str, output: &str) -> Result<()> {
        match self.platform.detect_failure(output) {
            Some(pattern) => Err(DriverError::CommandFailed {
                command: command.to_string(),
                message: output
                    .lines()
                    .find(|l| l.contains(pattern))
                    .unwrap_or(pattern)
                    .trim()
                    .to_string(),
            }
            .into()),
            None => Ok(()),
        }
    }

    fn push_failure(
        &self,
        results: &mut Vec<CaptureResult>,
        device: &DeviceSpec,
        depth: usize,
        err: &Error,
    ) {
        let result = CaptureResult::failed(&device.name, depth, Utc::now(), err);
        self.emit_failure(&result);
        results.push(result);
    }

    /// Mark every device after `failed_at` unreachable.
    fn fail_downstream(&self, results: &mut Vec<CaptureResult>, devices: &[DeviceSpec], failed_at: usize) {
        let upstream = &devices[failed_at].name;
        for (depth, device) in devices.iter().enumerate().skip(failed_at + 1) {
            let err = Error::from(HopError::UpstreamFailed {
                device: device.name.clone(),
                depth,
                upstream: upstream.clone(),
            });
            self.push_failure(results, device, depth, &err);
        }
    }

    /// The first device could not be reached at all.
    pub(crate) fn fail_unreachable(&self, results: &mut Vec<CaptureResult>, devices: &[DeviceSpec], err: &Error) {
        let depth = results.len();
        if let Some(device) = devices.get(depth) {
            self.push_failure(results, device, depth, err);
            self.fail_downstream(results, devices, depth);
        }
    }

    /// Fill in results for devices the cycle never reached.
    pub(crate) fn fail_remaining(
        &self,
        results: &mut Vec<CaptureResult>,
        devices: &[DeviceSpec],
        kind: ErrorKind,
        message: &str,
    ) {
        let now = Utc::now();
        for (depth, device) in devices.iter().enumerate().skip(results.len()) {
            let result = CaptureResult::failed_with(
                &device.name,
                depth,
                now,
                CaptureFailure {
                    kind,
                    message: message.to_string(),
                },
            );
            self.emit_failure(&result);
            results.push(result);
        }
    }

    fn emit_failure(&self, result: &CaptureResult) {
        if let Some(failure) = &result.failure {
            self.events.emit(&CycleEvent::DeviceFailed {
                chain: self.name.clone(),
                device: result.device.clone(),
                depth: result.depth,
                kind: failure.kind,
                message: failure.message.clone(),
            });
        }
    }
}

/// A credential that stayed unanswered through the retry window.
fn unanswered(what: &str, step: &InteractiveStep) -> Error {
    DriverError::ResponseTimeout {
        command: what.to_string(),
        waited: step.elapsed,
        received: step.output.len(),
    }
    .into()
}
