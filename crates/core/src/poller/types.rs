//! Types for the status poller.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::api::ApiError;
use crate::job::StatusRecord;

/// Errors returned by poller operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PollerError {
    /// A poller instance polls one job only.
    #[error("poller cannot be started from state {0}")]
    AlreadyStarted(PollerState),
}

/// The single event type a poller delivers.
#[derive(Debug, Clone, PartialEq)]
pub enum PollEvent {
    /// A successful poll. Emitted at most once per tick.
    StatusUpdate(StatusRecord),
    /// The consecutive-error cap was reached.
    ConnectionLost { attempts: u32, last_error: ApiError },
    /// The overall deadline passed before a terminal status arrived.
    TimedOut { elapsed: Duration },
}

impl PollEvent {
    /// Whether the poller has stopped after emitting this event.
    pub fn is_terminal(&self) -> bool {
        match self {
            PollEvent::StatusUpdate(record) => record.status.is_terminal(),
            PollEvent::ConnectionLost { .. } | PollEvent::TimedOut { .. } => true,
        }
    }
}

/// Lifecycle of a poller instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PollerState {
    Idle,
    Polling,
    /// The job completed.
    Completed,
    /// The job failed on the backend.
    Failed,
    /// `stop()` was called.
    Stopped,
    TimedOut,
    ConnectionLost,
}

impl PollerState {
    pub fn as_str(&self) -> &'static str {
        match self {
            PollerState::Idle => "idle",
            PollerState::Polling => "polling",
            PollerState::Completed => "completed",
            PollerState::Failed => "failed",
            PollerState::Stopped => "stopped",
            PollerState::TimedOut => "timed_out",
            PollerState::ConnectionLost => "connection_lost",
        }
    }

    /// Terminal states are final for the instance.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, PollerState::Idle | PollerState::Polling)
    }
}

impl std::fmt::Display for PollerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::JobStatus;

    #[test]
    fn test_event_terminality() {
        let running = PollEvent::StatusUpdate(StatusRecord::new(JobStatus::Extracting, 10, ""));
        assert!(!running.is_terminal());

        let done = PollEvent::StatusUpdate(StatusRecord::new(JobStatus::Completed, 100, ""));
        assert!(done.is_terminal());

        assert!(PollEvent::TimedOut {
            elapsed: Duration::from_secs(1)
        }
        .is_terminal());
        assert!(PollEvent::ConnectionLost {
            attempts: 5,
            last_error: ApiError::Timeout
        }
        .is_terminal());
    }

    #[test]
    fn test_state_terminality() {
        assert!(!PollerState::Idle.is_terminal());
        assert!(!PollerState::Polling.is_terminal());
        for state in [
            PollerState::Completed,
            PollerState::Failed,
            PollerState::Stopped,
            PollerState::TimedOut,
            PollerState::ConnectionLost,
        ] {
            assert!(state.is_terminal(), "{} should be terminal", state);
        }
    }

    #[test]
    fn test_error_display() {
        let err = PollerError::AlreadyStarted(PollerState::Polling);
        assert_eq!(err.to_string(), "poller cannot be started from state polling");
    }
}
