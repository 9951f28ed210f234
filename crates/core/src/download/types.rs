//! Types for report downloads.

use std::path::PathBuf;

use thiserror::Error;

use crate::api::{ApiError, OutputFormat};

/// Errors that can occur while downloading a report.
#[derive(Debug, Error)]
pub enum DownloadError {
    /// The request itself failed.
    #[error(transparent)]
    Api(#[from] ApiError),

    /// The server answered with an error payload instead of a report.
    #[error("download integrity check failed: {message}")]
    Integrity { message: String },

    /// The report could not be written to disk.
    #[error("failed to store report: {0}")]
    Io(#[from] std::io::Error),
}

/// A report saved to disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Artifact {
    pub job_id: String,
    pub format: OutputFormat,
    /// Final location of the report.
    pub path: PathBuf,
    pub file_name: String,
    pub content_type: Option<String>,
    pub size_bytes: u64,
}
