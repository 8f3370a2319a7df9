//! Command/response driver over a session's shared channel.

use std::time::Duration;

use log::{debug, trace, warn};
use secrecy::SecretString;
use tokio::time::Instant;

use super::interactive::{Expect, InteractiveEvent, InteractiveResult, InteractiveStep};
use super::quiescence::{QuiescenceWindow, ReadOutcome, Timing, deadline_after, read_until_quiet};
use super::response::Response;
use crate::channel::{PatternBuffer, PromptMatcher, ShellChannel};
use crate::error::{DriverError, Error, Result};
use crate::transport::Session;

/// Masked command text recorded for secrets.
const HIDDEN: &str = "********";

/// Sends command lines and collects responses by quiescence.
///
/// Commands are strictly sequential: the CLI has no request/response
/// correlation, so each call waits for its response before returning.
#[derive(Debug, Clone)]
pub struct CommandDriver {
    /// Appended to every line sent.
    line_ending: String,

    /// Tail depth for prompt pattern checks.
    search_depth: usize,
}

impl Default for CommandDriver {
    fn default() -> Self {
        Self {
            line_ending: "\n".to_string(),
            search_depth: 1000,
        }
    }
}

impl CommandDriver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Use a different line terminator (some devices want `\r`).
    pub fn with_line_ending(mut self, line_ending: impl Into<String>) -> Self {
        self.line_ending = line_ending.into();
        self
    }

    /// Send `command` and return everything received until the channel goes
    /// quiet for `window.idle`.
    ///
    /// Fails with `ResponseTimeout` if nothing arrives within the window's
    /// ceiling, or if output never goes quiet before its hard limit.
    pub async fn execute<C: ShellChannel>(
        &self,
        session: &mut Session<C>,
        command: &str,
        window: QuiescenceWindow,
    ) -> Result<Response> {
        let start = Instant::now();
        let mut buffer = PatternBuffer::new(self.search_depth);

        let outcome = {
            let channel = session.channel_mut()?;
            self.exchange(channel, command, &window, &mut buffer).await
        };
        let outcome = self.observe(session, outcome)?;

        match outcome {
            ReadOutcome::Quiet => {
                let response = Response::from_raw(command, buffer.as_slice(), start.elapsed());
                debug!(
                    "{:?}: {} bytes in {:?}, prompt {:?}",
                    command,
                    buffer.len(),
                    response.elapsed,
                    response.prompt
                );
                Ok(response)
            }
            ReadOutcome::Silent | ReadOutcome::Unbounded => Err(DriverError::ResponseTimeout {
                command: command.to_string(),
                waited: start.elapsed(),
                received: buffer.len(),
            }
            .into()),
        }
    }

    /// [`execute`](Self::execute), retried once with a doubled window on
    /// `ResponseTimeout`.
    ///
    /// The retry first listens for a late answer to the first send and
    /// only resends when nothing at all arrives, so two answers to the same
    /// command are never in flight on the channel.
    pub async fn execute_with_retry<C: ShellChannel>(
        &self,
        session: &mut Session<C>,
        command: &str,
        window: QuiescenceWindow,
    ) -> Result<Response> {
        let start = Instant::now();
        let first = match self.execute(session, command, window).await {
            Err(e) if e.is_response_timeout() => e,
            other => return other,
        };

        let retry = window.doubled();
        warn!("{}; retrying {:?} with {:?} idle window", first, command, retry.idle);

        let mut buffer = PatternBuffer::new(self.search_depth);
        let late = {
            let channel = session.channel_mut()?;
            read_until_quiet(channel, &retry, &mut buffer).await
        };

        let mut response = match self.observe(session, late)? {
            ReadOutcome::Quiet => {
                debug!("{:?}: late response of {} bytes", command, buffer.len());
                Response::from_raw(command, buffer.as_slice(), start.elapsed())
            }
            ReadOutcome::Silent => self.execute(session, command, retry).await?,
            ReadOutcome::Unbounded => {
                return Err(DriverError::ResponseTimeout {
                    command: command.to_string(),
                    waited: start.elapsed(),
                    received: buffer.len(),
                }
                .into());
            }
        };
        response.attempts = 2;
        response.elapsed = start.elapsed();
        Ok(response)
    }

    /// Send a secret line and read until quiet. The secret is never logged
    /// and the response records a masked command.
    pub async fn send_secret<C: ShellChannel>(
        &self,
        session: &mut Session<C>,
        secret: SecretString,
        window: QuiescenceWindow,
    ) -> Result<Response> {
        let events = [InteractiveEvent::secret(secret)];
        let timing = Timing {
            login: window,
            ..Timing::default()
        };
        let result = self.send_interactive(session, &events, &timing).await?;
        let output = result.final_output().unwrap_or_default();
        if result.failed {
            return Err(DriverError::ResponseTimeout {
                command: HIDDEN.to_string(),
                waited: result.elapsed,
                received: output.len(),
            }
            .into());
        }
        let mut response = Response::from_raw("", output.as_bytes(), result.elapsed);
        response.command = HIDDEN.to_string();
        Ok(response)
    }

    /// Read and discard output until the channel goes quiet.
    ///
    /// Used for login banners; silence is not an error here.
    pub async fn drain<C: ShellChannel>(
        &self,
        session: &mut Session<C>,
        window: QuiescenceWindow,
    ) -> Result<String> {
        let mut buffer = PatternBuffer::new(self.search_depth);
        let outcome = {
            let channel = session.channel_mut()?;
            read_until_quiet(channel, &window, &mut buffer).await
        };
        self.observe(session, outcome)?;
        trace!("drained {} bytes", buffer.len());
        Ok(buffer.as_str_lossy().into_owned())
    }

    /// Run a prompted sequence, stopping at the first step that fails.
    ///
    /// Pattern steps wait at most `event.timeout` (default
    /// `timing.prompt_wait`) for the pattern to show in the channel tail.
    /// Quiet steps read with `timing.login`; if nothing at all arrives they
    /// listen once more with the doubled window without resending.
    pub async fn send_interactive<C: ShellChannel>(
        &self,
        session: &mut Session<C>,
        events: &[InteractiveEvent],
        timing: &Timing,
    ) -> Result<InteractiveResult> {
        let start = Instant::now();
        let mut steps = Vec::with_capacity(events.len());

        for event in events {
            let step_start = Instant::now();
            let mut buffer = PatternBuffer::new(self.search_depth);

            let succeeded = {
                let channel = session.channel_mut()?;
                self.interactive_step(channel, event, timing, &mut buffer).await
            };
            let succeeded = self.observe(session, succeeded)?;

            let output = buffer.as_str_lossy().into_owned();
            let display = event.input.display();
            if succeeded {
                steps.push(InteractiveStep::success(display, output, step_start.elapsed()));
            } else {
                debug!("interactive step {:?} did not complete", display);
                steps.push(InteractiveStep::failed(display, output, step_start.elapsed()));
                break;
            }
        }

        Ok(InteractiveResult::new(steps, start.elapsed()))
    }

    async fn interactive_step<C: ShellChannel>(
        &self,
        channel: &mut C,
        event: &InteractiveEvent,
        timing: &Timing,
        buffer: &mut PatternBuffer,
    ) -> Result<bool> {
        debug!("send: {:?}", event.input.display());
        self.send_line(channel, event.input.expose()).await?;

        match &event.expect {
            Expect::Pattern(pattern) => {
                let limit = event.timeout.unwrap_or(timing.prompt_wait);
                self.wait_for_prompt(channel, pattern, limit, buffer).await
            }
            Expect::Quiet => {
                let outcome = match read_until_quiet(channel, &timing.login, buffer).await? {
                    // Listen once more; a secret is never resent blindly
                    ReadOutcome::Silent => {
                        let retry = timing.login.doubled();
                        warn!(
                            "no answer to {:?}; listening {:?} more",
                            event.input.display(),
                            retry.ceiling()
                        );
                        read_until_quiet(channel, &retry, buffer).await?
                    }
                    other => other,
                };
                Ok(outcome == ReadOutcome::Quiet)
            }
        }
    }

    /// Wait until `matcher` matches the buffer tail, for at most `limit`.
    pub async fn wait_for_prompt<C: ShellChannel, M: PromptMatcher + ?Sized>(
        &self,
        channel: &mut C,
        matcher: &M,
        limit: Duration,
        buffer: &mut PatternBuffer,
    ) -> Result<bool> {
        let deadline = deadline_after(Instant::now(), limit);
        loop {
            if matcher.is_match(buffer.tail()) {
                return Ok(true);
            }
            match channel.recv_until(deadline).await? {
                Some(chunk) => buffer.extend(&chunk),
                None => return Ok(false),
            }
        }
    }

    async fn exchange<C: ShellChannel>(
        &self,
        channel: &mut C,
        command: &str,
        window: &QuiescenceWindow,
        buffer: &mut PatternBuffer,
    ) -> Result<ReadOutcome> {
        debug!("send: {:?}", command);
        self.send_line(channel, command).await?;
        read_until_quiet(channel, window, buffer).await
    }

    async fn send_line<C: ShellChannel>(&self, channel: &mut C, line: &str) -> Result<()> {
        let mut data = Vec::with_capacity(line.len() + self.line_ending.len());
        data.extend_from_slice(line.as_bytes());
        data.extend_from_slice(self.line_ending.as_bytes());
        channel.send(&data).await
    }

    /// A channel error leaves the session's position unknown.
    fn observe<C: ShellChannel, T>(&self, session: &mut Session<C>, result: Result<T>) -> Result<T> {
        if let Err(Error::Channel(_)) = &result {
            session.mark_failed();
        }
        result
    }
}
