//! Simulated multi-hop Cisco-style CLI.
//!
//! A [`Lab`] holds a set of devices. A [`SimChannel`] is one shell stream
//! into the lab: it starts at the device the session connected to, and an
//! `ssh -l <user> <address>` typed at a prompt moves the stream into
//! another device, just as the real CLI's ssh client does. Every answer is
//! delayed by the answering device's latency on tokio's clock, so tests
//! run on a paused clock and timing is deterministic.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use hopvault::channel::ShellChannel;
use hopvault::error::{ChannelError, Result};
use hopvault::{
    Connector, DeviceCredentials, DeviceSpec, InlineCredentials, QuiescenceWindow, Session, Timing,
};
use tokio::time::{Instant, sleep_until};

pub const PASSWORD: &str = "cisco";
pub const SECRET: &str = "enable-me";

/// One simulated device.
#[derive(Debug, Clone)]
pub struct SimDevice {
    pub name: String,
    pub address: String,
    pub password: String,
    pub secret: Option<String>,
    pub config: String,

    /// Delay before every answer this device gives.
    pub latency: Duration,

    /// Commands this device silently swallows.
    pub stalls: Vec<String>,

    /// Commands answered only after an extra delay.
    pub slow: Vec<(String, Duration)>,

    /// Credentials typed at this device's password prompts get no answer.
    pub swallows_credentials: bool,

    /// Every line this device received, secrets excluded.
    pub received: Vec<String>,
}

impl SimDevice {
    pub fn new(name: &str, address: &str) -> Self {
        Self {
            name: name.to_string(),
            address: address.to_string(),
            password: PASSWORD.to_string(),
            secret: Some(SECRET.to_string()),
            config: sample_config(name),
            latency: Duration::from_millis(20),
            stalls: Vec::new(),
            slow: Vec::new(),
            swallows_credentials: false,
            received: Vec::new(),
        }
    }
}

pub fn sample_config(hostname: &str) -> String {
    format!(
        "version 15.2\r\n!\r\nhostname {}\r\n!\r\ninterface GigabitEthernet0/0\r\n \
         description uplink\r\n ip address dhcp\r\n!\r\nline vty 0 4\r\n login local\r\n \
         transport input ssh\r\n!\r\nend",
        hostname
    )
}

#[derive(Debug, Default)]
struct LabState {
    devices: Vec<SimDevice>,
    open_sessions: usize,
    max_open_sessions: usize,
    sessions_opened: usize,
}

/// Shared handle to the simulated network.
#[derive(Debug, Clone, Default)]
pub struct Lab {
    state: Arc<Mutex<LabState>>,
}

impl Lab {
    pub fn new(devices: Vec<SimDevice>) -> Self {
        Self {
            state: Arc::new(Mutex::new(LabState {
                devices,
                ..Default::default()
            })),
        }
    }

    /// PE -> EOR1 -> SPINE.
    pub fn core() -> Self {
        Self::new(vec![
            SimDevice::new("PE", "192.168.122.147"),
            SimDevice::new("EOR1", "10.0.0.2"),
            SimDevice::new("SPINE", "10.0.1.2"),
        ])
    }

    fn state(&self) -> MutexGuard<'_, LabState> {
        self.state.lock().unwrap()
    }

    pub fn device_mut<T>(&self, name: &str, f: impl FnOnce(&mut SimDevice) -> T) -> T {
        let mut state = self.state();
        let device = state
            .devices
            .iter_mut()
            .find(|d| d.name == name)
            .unwrap_or_else(|| panic!("no simulated device {}", name));
        f(device)
    }

    pub fn add_device(&self, device: SimDevice) {
        self.state().devices.push(device);
    }

    pub fn set_config(&self, name: &str, config: &str) {
        self.device_mut(name, |d| d.config = config.to_string());
    }

    pub fn set_latency(&self, name: &str, latency: Duration) {
        self.device_mut(name, |d| d.latency = latency);
    }

    pub fn set_password(&self, name: &str, password: &str) {
        self.device_mut(name, |d| d.password = password.to_string());
    }

    pub fn stall(&self, name: &str, command: &str) {
        self.device_mut(name, |d| d.stalls.push(command.to_string()));
    }

    pub fn slow_down(&self, name: &str, command: &str, delay: Duration) {
        self.device_mut(name, |d| d.slow.push((command.to_string(), delay)));
    }

    pub fn received(&self, name: &str) -> Vec<String> {
        self.device_mut(name, |d| d.received.clone())
    }

    pub fn count_received(&self, name: &str, line: &str) -> usize {
        self.received(name).iter().filter(|l| *l == line).count()
    }

    pub fn sessions_opened(&self) -> usize {
        self.state().sessions_opened
    }

    pub fn open_sessions(&self) -> usize {
        self.state().open_sessions
    }

    /// Highest number of sessions that were open at the same time.
    pub fn max_open_sessions(&self) -> usize {
        self.state().max_open_sessions
    }

    fn index_of_address(&self, address: &str) -> Option<usize> {
        self.state().devices.iter().position(|d| d.address == address)
    }

    /// Open a stream positioned at the device with `address`.
    pub fn shell(&self, address: &str) -> SimChannel {
        let index = self
            .index_of_address(address)
            .unwrap_or_else(|| panic!("nothing at {}", address));
        let mut channel = SimChannel {
            lab: self.clone(),
            frames: vec![Frame {
                device: index,
                privileged: false,
            }],
            mode: Mode::Shell,
            pending: Vec::new(),
            outbound: VecDeque::new(),
            extra_delay: Duration::ZERO,
            closed: false,
            released: false,
        };
        {
            let mut state = self.state();
            state.sessions_opened += 1;
            state.open_sessions += 1;
            state.max_open_sessions = state.max_open_sessions.max(state.open_sessions);
        }
        let banner = format!("\r\n\r\nUnauthorized access prohibited\r\n\r\n{}", channel.prompt());
        channel.emit(index, banner.into_bytes());
        channel
    }

    pub fn session(&self, address: &str) -> Session<SimChannel> {
        Session::from_channel(self.shell(address))
    }
}

#[derive(Debug, Clone, Copy)]
struct Frame {
    device: usize,
    privileged: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    Shell,
    LoginPassword { target: usize, attempts: u32 },
    EnablePassword { attempts: u32 },
}

/// One shell stream through the lab.
#[derive(Debug)]
pub struct SimChannel {
    lab: Lab,
    frames: Vec<Frame>,
    mode: Mode,
    pending: Vec<u8>,
    outbound: VecDeque<(Instant, Vec<u8>)>,
    extra_delay: Duration,
    closed: bool,
    released: bool,
}

impl SimChannel {
    fn current(&self) -> Frame {
        self.frames[self.frames.len() - 1]
    }

    fn device(&self, index: usize) -> SimDevice {
        self.lab.state().devices[index].clone()
    }

    fn prompt(&self) -> String {
        let frame = self.current();
        let name = self.device(frame.device).name;
        format!("{}{}", name, if frame.privileged { "#" } else { ">" })
    }

    /// Queue output from `device`, after its latency and after anything
    /// already queued.
    fn emit(&mut self, device: usize, data: Vec<u8>) {
        let latency = self.device(device).latency + self.extra_delay;
        let mut ready = Instant::now() + latency;
        if let Some((last, _)) = self.outbound.back() {
            ready = ready.max(*last);
        }
        self.outbound.push_back((ready, data));
    }

    /// Queue output in pieces `spacing` apart.
    fn emit_spaced(&mut self, device: usize, pieces: Vec<String>, spacing: Duration) {
        let mut iter = pieces.into_iter();
        if let Some(first) = iter.next() {
            self.emit(device, first.into_bytes());
        }
        for piece in iter {
            let mut ready = Instant::now() + spacing;
            if let Some((last, _)) = self.outbound.back() {
                ready = ready.max(*last + spacing);
            }
            self.outbound.push_back((ready, piece.into_bytes()));
        }
    }

    fn handle_line(&mut self, line: String) {
        let frame = self.current();
        match self.mode {
            Mode::Shell => self.shell_line(frame, line),
            Mode::LoginPassword { target, attempts } => self.login_password(frame, target, attempts, line),
            Mode::EnablePassword { attempts } => self.enable_password(frame, attempts, line),
        }
    }

    fn shell_line(&mut self, frame: Frame, line: String) {
        let device = self.device(frame.device);
        self.lab.device_mut(&device.name, |d| d.received.push(line.clone()));

        if device.stalls.contains(&line) {
            return;
        }
        self.extra_delay = device
            .slow
            .iter()
            .find(|(command, _)| *command == line)
            .map(|(_, delay)| *delay)
            .unwrap_or_default();

        let command = line.trim();
        let echo = line.clone();
        if command.is_empty() {
            let out = format!("\r\n{}", self.prompt());
            self.emit(frame.device, out.into_bytes());
        } else if command == "enable" {
            if frame.privileged {
                let out = format!("{}\r\n{}", echo, self.prompt());
                self.emit(frame.device, out.into_bytes());
            } else {
                self.mode = Mode::EnablePassword { attempts: 0 };
                self.emit(frame.device, format!("{}\r\nPassword: ", echo).into_bytes());
            }
        } else if command == "terminal length 0" {
            let out = format!("{}\r\n{}", echo, self.prompt());
            self.emit(frame.device, out.into_bytes());
        } else if command == "show running-config" {
            if !frame.privileged {
                let out = format!(
                    "{}\r\n                       ^\r\n% Invalid input detected at '^' marker.\r\n\r\n{}",
                    echo,
                    self.prompt()
                );
                self.emit(frame.device, out.into_bytes());
                return;
            }
            let pieces = vec![
                format!("{}\r\nBuilding configuration...\r\n\r\n", echo),
                format!(
                    "Current configuration : {} bytes\r\n{}\r\n",
                    device.config.len(),
                    device.config
                ),
                format!("\r\n{}", self.prompt()),
            ];
            self.emit_spaced(frame.device, pieces, Duration::from_millis(5));
        } else if command == "terminal monitor" {
            // Log lines that never stop for long
            let mut pieces = vec![format!("{}\r\n", echo)];
            pieces.extend((0..600).map(|i| format!("*Oct 14 12:00:{:02}: %LINK-3-UPDOWN: flap {}\r\n", i % 60, i)));
            self.emit_spaced(frame.device, pieces, Duration::from_millis(100));
        } else if let Some(rest) = command.strip_prefix("ssh -l ") {
            let address = rest.split_whitespace().nth(1).unwrap_or_default();
            match self.lab.index_of_address(address) {
                Some(target) => {
                    self.mode = Mode::LoginPassword {
                        target,
                        attempts: 0,
                    };
                    self.emit(target, format!("{}\r\nPassword: ", echo).into_bytes());
                }
                None => {
                    let out = format!(
                        "{}\r\n% Destination unreachable; gateway or host down\r\n\r\n{}",
                        echo,
                        self.prompt()
                    );
                    self.emit(frame.device, out.into_bytes());
                }
            }
        } else if command == "exit" {
            self.frames.pop();
            if self.frames.is_empty() {
                self.closed = true;
                return;
            }
            let out = format!(
                "{}\r\n\r\n[Connection to {} closed by foreign host]\r\n{}",
                echo,
                device.address,
                self.prompt()
            );
            self.emit(self.current().device, out.into_bytes());
        } else {
            let out = format!(
                "{}\r\n% Invalid input detected at '^' marker.\r\n\r\n{}",
                echo,
                self.prompt()
            );
            self.emit(frame.device, out.into_bytes());
        }
    }

    fn login_password(&mut self, frame: Frame, target: usize, attempts: u32, line: String) {
        let device = self.device(target);
        if device.swallows_credentials {
            return;
        }
        if line == device.password {
            self.mode = Mode::Shell;
            self.frames.push(Frame {
                device: target,
                privileged: false,
            });
            let out = format!("\r\n\r\n{}", self.prompt());
            self.emit(target, out.into_bytes());
        } else if attempts + 1 < 3 {
            self.mode = Mode::LoginPassword {
                target,
                attempts: attempts + 1,
            };
            self.emit(target, b"\r\nPassword: ".to_vec());
        } else {
            self.mode = Mode::Shell;
            let out = format!("\r\n% Authentication failed.\r\n{}", self.prompt());
            self.emit(frame.device, out.into_bytes());
        }
    }

    fn enable_password(&mut self, frame: Frame, attempts: u32, line: String) {
        let device = self.device(frame.device);
        if device.swallows_credentials {
            return;
        }
        if device.secret.as_deref() == Some(line.as_str()) {
            self.mode = Mode::Shell;
            if let Some(top) = self.frames.last_mut() {
                top.privileged = true;
            }
            let out = format!("\r\n{}", self.prompt());
            self.emit(frame.device, out.into_bytes());
        } else if attempts + 1 < 3 {
            self.mode = Mode::EnablePassword {
                attempts: attempts + 1,
            };
            self.emit(frame.device, b"\r\nPassword: ".to_vec());
        } else {
            self.mode = Mode::Shell;
            let out = format!("\r\n% Bad secrets\r\n\r\n{}", self.prompt());
            self.emit(frame.device, out.into_bytes());
        }
    }
}

impl ShellChannel for SimChannel {
    fn send(&mut self, data: &[u8]) -> impl Future<Output = Result<()>> + Send {
        let result = if self.closed {
            Err(ChannelError::Closed.into())
        } else {
            self.pending.extend_from_slice(data);
            while let Some(pos) = self.pending.iter().position(|b| *b == b'\n') {
                let raw: Vec<u8> = self.pending.drain(..=pos).collect();
                let line = String::from_utf8_lossy(&raw)
                    .trim_end_matches(['\r', '\n'])
                    .to_string();
                self.handle_line(line);
                if self.closed {
                    break;
                }
            }
            Ok(())
        };
        async move { result }
    }

    fn recv_until(&mut self, deadline: Instant) -> impl Future<Output = Result<Option<Vec<u8>>>> + Send {
        async move {
            let next = self.outbound.front().map(|(ready, _)| *ready);
            match next {
                Some(ready) if ready <= deadline => {
                    sleep_until(ready).await;
                    Ok(self.outbound.pop_front().map(|(_, data)| data))
                }
                Some(_) => {
                    sleep_until(deadline).await;
                    Ok(None)
                }
                None if self.closed => Err(ChannelError::Closed.into()),
                None => {
                    sleep_until(deadline).await;
                    Ok(None)
                }
            }
        }
    }

    fn close(&mut self) -> impl Future<Output = Result<()>> + Send {
        self.closed = true;
        self.frames.clear();
        if !self.released {
            self.released = true;
            self.lab.state().open_sessions -= 1;
        }
        async { Ok(()) }
    }
}

/// Connects to the first device of a chain inside the lab.
#[derive(Debug, Clone)]
pub struct LabConnector {
    pub lab: Lab,

    /// Delay before the session is handed out.
    pub connect_delay: Duration,
}

impl LabConnector {
    pub fn new(lab: &Lab) -> Self {
        Self {
            lab: lab.clone(),
            connect_delay: Duration::ZERO,
        }
    }
}

impl Connector for LabConnector {
    type Channel = SimChannel;

    fn connect(&self, first: &DeviceSpec) -> impl Future<Output = Result<Session<SimChannel>>> + Send {
        let lab = self.lab.clone();
        let address = first.address.clone();
        let delay = self.connect_delay;
        async move {
            tokio::time::sleep(delay).await;
            Ok(lab.session(&address))
        }
    }
}

/// Inventory matching [`Lab::core`].
pub fn core_devices() -> Vec<DeviceSpec> {
    vec![
        DeviceSpec::new("PE", "192.168.122.147", "admin"),
        DeviceSpec::new("EOR1", "10.0.0.2", "admin"),
        DeviceSpec::new("SPINE", "10.0.1.2", "admin"),
    ]
}

pub fn credentials_for(devices: &[DeviceSpec]) -> InlineCredentials {
    devices.iter().fold(InlineCredentials::new(), |creds, device| {
        creds.with(
            device.name.clone(),
            DeviceCredentials::new(PASSWORD).with_secret(SECRET),
        )
    })
}

/// Short windows so tests stay quick on the paused clock.
pub fn fast_timing() -> Timing {
    Timing {
        login: QuiescenceWindow::from_millis(200),
        command: QuiescenceWindow::from_millis(200),
        dump: QuiescenceWindow::from_millis(300),
        prompt_wait: Duration::from_secs(2),
    }
}
