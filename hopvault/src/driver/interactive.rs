//! Prompted input sequences.
//!
//! Inner logins and privilege escalation both follow the same shape: send
//! a line, wait until the device shows a credential prompt, then send the
//! secret. Secrets are only ever sent after the prompt has actually been
//! seen in the channel tail.

use std::time::Duration;

use regex::bytes::Regex;
use secrecy::{ExposeSecret, SecretString};

use crate::channel::compile_prompt_pattern;

/// What is sent for one event.
#[derive(Debug)]
pub enum EventInput {
    /// Plain text, logged as-is.
    Text(String),

    /// A credential, never logged.
    Secret(SecretString),
}

impl EventInput {
    /// Text safe for logs and step records.
    pub fn display(&self) -> &str {
        match self {
            EventInput::Text(text) => text,
            EventInput::Secret(_) => "********",
        }
    }

    pub(crate) fn expose(&self) -> &str {
        match self {
            EventInput::Text(text) => text,
            EventInput::Secret(secret) => secret.expose_secret(),
        }
    }
}

/// What ends an event after its input is sent.
#[derive(Debug, Clone)]
pub enum Expect {
    /// Wait until the pattern appears in the channel tail.
    Pattern(Regex),

    /// Read until the channel goes quiet.
    Quiet,
}

/// An event in an interactive sequence.
#[derive(Debug)]
pub struct InteractiveEvent {
    /// The input to send.
    pub input: EventInput,

    /// What to wait for after sending.
    pub expect: Expect,

    /// Optional timeout override for a pattern wait.
    pub timeout: Option<Duration>,
}

impl InteractiveEvent {
    /// Send `input`, then wait for `pattern` (anchored to the end of output).
    pub fn new(input: impl Into<String>, pattern: &str) -> Result<Self, regex::Error> {
        Ok(Self {
            input: EventInput::Text(input.into()),
            expect: Expect::Pattern(compile_prompt_pattern(pattern)?),
            timeout: None,
        })
    }

    /// Send `input`, then wait for an already-compiled pattern.
    pub fn with_pattern(input: impl Into<String>, pattern: Regex) -> Self {
        Self {
            input: EventInput::Text(input.into()),
            expect: Expect::Pattern(pattern),
            timeout: None,
        }
    }

    /// Send `input`, then read until quiet.
    pub fn quiet(input: impl Into<String>) -> Self {
        Self {
            input: EventInput::Text(input.into()),
            expect: Expect::Quiet,
            timeout: None,
        }
    }

    /// Send a secret, then read until quiet.
    pub fn secret(secret: SecretString) -> Self {
        Self {
            input: EventInput::Secret(secret),
            expect: Expect::Quiet,
            timeout: None,
        }
    }

    /// Set a custom timeout for this specific event.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Whether the input is hidden from logs.
    pub fn is_hidden(&self) -> bool {
        matches!(self.input, EventInput::Secret(_))
    }
}

/// Result of an interactive sequence.
#[derive(Debug, Clone)]
pub struct InteractiveResult {
    /// Results from each step that ran.
    pub steps: Vec<InteractiveStep>,

    /// Total time for the sequence.
    pub elapsed: Duration,

    /// Whether a step failed (the sequence stops at the first failure).
    pub failed: bool,
}

impl InteractiveResult {
    /// Create a new interactive result.
    pub fn new(steps: Vec<InteractiveStep>, elapsed: Duration) -> Self {
        let failed = steps.iter().any(|s| s.failed);
        Self {
            steps,
            elapsed,
            failed,
        }
    }

    /// Get the final output (from the last step).
    pub fn final_output(&self) -> Option<&str> {
        self.steps.last().map(|s| s.output.as_str())
    }

    /// The step that failed, if any.
    pub fn failed_step(&self) -> Option<(usize, &InteractiveStep)> {
        self.steps.iter().enumerate().find(|(_, s)| s.failed)
    }
}

/// Result of a single step in an interactive sequence.
#[derive(Debug, Clone)]
pub struct InteractiveStep {
    /// The input that was sent (masked if hidden).
    pub input: String,

    /// The output received after sending the input.
    pub output: String,

    /// Time taken for this step.
    pub elapsed: Duration,

    /// Whether this step failed.
    pub failed: bool,
}

impl InteractiveStep {
    pub fn success(input: impl Into<String>, output: impl Into<String>, elapsed: Duration) -> Self {
        Self {
            input: input.into(),
            output: output.into(),
            elapsed,
            failed: false,
        }
    }

    pub fn failed(input: impl Into<String>, output: impl Into<String>, elapsed: Duration) -> Self {
        Self {
            input: input.into(),
            output: output.into(),
            elapsed,
            failed: true,
        }
    }
}
