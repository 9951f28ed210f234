//! Job status poller.
//!
//! A [`StatusPoller`] drives one job from `start()` until a terminal status,
//! the consecutive-error cap, the overall deadline, or an explicit `stop()`.
//! Every outcome reaches the owner as a [`PollEvent`] through the poller's
//! own [`PollEvents`] channel.

mod config;
mod runner;
mod types;

pub use config::PollerConfig;
pub use runner::{PollEvents, StatusPoller};
pub use types::{PollEvent, PollerError, PollerState};
