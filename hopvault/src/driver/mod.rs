//! Command/response driver.
//!
//! The driver layer sends command lines into a session's channel and
//! decides when each response is complete using quiescence timing rather
//! than prompt matching.

mod command;
mod interactive;
mod quiescence;
mod response;

pub use command::CommandDriver;
pub use interactive::{EventInput, Expect, InteractiveEvent, InteractiveResult, InteractiveStep};
pub use quiescence::{
    DEFAULT_CEILING_FACTOR, DEFAULT_HARD_LIMIT, QuiescenceWindow, ReadOutcome, Timing,
    TimingSettings, deadline_after, read_until_quiet,
};
pub use response::{Response, normalize_output};
