//! Channel layer for the shared interactive byte stream.
//!
//! This module holds the shell channel seam, the output accumulation
//! buffer (with ANSI stripping) and prompt pattern helpers.

mod buffer;
mod patterns;
mod pty;

pub use buffer::{PatternBuffer, last_line};
pub use patterns::{PromptMatcher, compile_prompt_pattern, render_identity_pattern};
pub use pty::{PtyConfig, ShellChannel};
