//! Upload-to-report workflow.
//!
//! [`WorkflowOrchestrator`] owns one job at a time: it uploads the invoice
//! files, starts processing, and folds the status poller's events into an
//! observable [`WorkflowState`].

mod config;
mod progress;
mod runner;
mod types;

pub use config::WorkflowConfig;
pub use progress::aggregate_progress;
pub use runner::WorkflowOrchestrator;
pub use types::{ErrorPhase, WorkflowError, WorkflowPhase, WorkflowState};
