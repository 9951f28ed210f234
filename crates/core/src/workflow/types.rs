//! Types for the workflow orchestrator.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::api::ApiError;
use crate::job::{FileError, JobResult};

/// Where the workflow currently is.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowPhase {
    #[default]
    Idle,
    Uploading,
    Processing,
    Completed,
    Failed,
}

impl WorkflowPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            WorkflowPhase::Idle => "idle",
            WorkflowPhase::Uploading => "uploading",
            WorkflowPhase::Processing => "processing",
            WorkflowPhase::Completed => "completed",
            WorkflowPhase::Failed => "failed",
        }
    }

    /// Whether a job is in flight.
    pub fn is_active(&self) -> bool {
        matches!(self, WorkflowPhase::Uploading | WorkflowPhase::Processing)
    }
}

impl std::fmt::Display for WorkflowPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The operation an error came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorPhase {
    Upload,
    Processing,
    Download,
}

impl ErrorPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorPhase::Upload => "upload",
            ErrorPhase::Processing => "processing",
            ErrorPhase::Download => "download",
        }
    }
}

impl std::fmt::Display for ErrorPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors surfaced by the workflow, each tagged with the phase that produced it.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum WorkflowError {
    /// Rejected client-side or by the server's validation. Not retryable.
    #[error("{phase} validation failed: {message}")]
    Validation { phase: ErrorPhase, message: String },

    #[error("{phase} network error: {message}")]
    Network { phase: ErrorPhase, message: String },

    /// An error response from the backend. `status` is absent when the
    /// response could not be decoded at all.
    #[error("{phase} failed: {message}")]
    Server {
        phase: ErrorPhase,
        status: Option<u16>,
        message: String,
    },

    /// The status poller hit its consecutive-error cap.
    #[error("lost connection to the server after {attempts} attempts: {message}")]
    Connection { attempts: u32, message: String },

    /// The job did not settle within the polling budget.
    #[error("processing did not finish within {limit_secs}s")]
    Timeout { limit_secs: u64 },

    /// The backend reported the job as failed.
    #[error("processing failed: {message}")]
    JobFailed { message: String },

    /// The download returned an error payload instead of a report.
    #[error("download returned an error instead of a report: {message}")]
    DownloadIntegrity { message: String },

    /// The report could not be written locally.
    #[error("could not save report: {message}")]
    LocalIo { message: String },

    /// Superseded by `cancel()`, `reset()` or a newer `submit()`.
    #[error("workflow cancelled")]
    Cancelled,
}

impl WorkflowError {
    /// Phase the error belongs to. `None` for cancellation.
    pub fn phase(&self) -> Option<ErrorPhase> {
        match self {
            WorkflowError::Validation { phase, .. }
            | WorkflowError::Network { phase, .. }
            | WorkflowError::Server { phase, .. } => Some(*phase),
            WorkflowError::Connection { .. }
            | WorkflowError::Timeout { .. }
            | WorkflowError::JobFailed { .. } => Some(ErrorPhase::Processing),
            WorkflowError::DownloadIntegrity { .. } | WorkflowError::LocalIo { .. } => {
                Some(ErrorPhase::Download)
            }
            WorkflowError::Cancelled => None,
        }
    }

    /// Tag a collaborator error with the operation that produced it.
    pub fn from_api(phase: ErrorPhase, error: ApiError) -> Self {
        match error {
            ApiError::Validation(message) => WorkflowError::Validation { phase, message },
            ApiError::Network(message) => WorkflowError::Network { phase, message },
            ApiError::Timeout => WorkflowError::Network {
                phase,
                message: "request timed out".to_string(),
            },
            ApiError::Server { status, message } => WorkflowError::Server {
                phase,
                status: Some(status),
                message,
            },
            ApiError::InvalidResponse(message) => WorkflowError::Server {
                phase,
                status: None,
                message,
            },
        }
    }
}

/// Observable snapshot of a workflow.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WorkflowState {
    pub phase: WorkflowPhase,
    /// Upload progress, 0..=100.
    pub upload_progress: u8,
    /// Backend processing progress, 0..=100.
    pub processing_progress: u8,
    /// Both phases blended into one 0..=100 value.
    pub aggregate_progress: u8,
    pub current_step: String,
    pub upload_id: Option<String>,
    pub job_id: Option<String>,
    /// Per-file problems, in arrival order.
    pub errors: Vec<FileError>,
    pub result: Option<JobResult>,
    pub error: Option<WorkflowError>,
}

impl WorkflowState {
    /// Whether nothing is in flight.
    pub fn is_settled(&self) -> bool {
        !self.phase.is_active()
    }

    /// Completed with per-file errors.
    pub fn is_partial_success(&self) -> bool {
        self.phase == WorkflowPhase::Completed && !self.errors.is_empty()
    }
}
