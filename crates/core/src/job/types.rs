//! Types describing a consolidation job.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::warn;

/// Errors raised when a [`JobHandle`] is mutated out of order.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum JobHandleError {
    #[error("job id already assigned: {0}")]
    JobIdAlreadyAssigned(String),
}

/// Normalized status of a backend job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    /// Queued, not yet picked up.
    Pending,
    /// Checking the uploaded files.
    Validating,
    /// Extracting invoice data.
    Extracting,
    /// Merging extracted invoices.
    Consolidating,
    /// Rendering the output report.
    Generating,
    /// Running, step unknown. Also the fallback for unrecognized statuses.
    Processing,
    /// Finished; the report can be downloaded.
    Completed,
    /// Finished without a report.
    Failed,
}

impl JobStatus {
    /// Returns the wire representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Validating => "validating",
            JobStatus::Extracting => "extracting",
            JobStatus::Consolidating => "consolidating",
            JobStatus::Generating => "generating",
            JobStatus::Processing => "processing",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
        }
    }

    /// Whether polling stops at this status.
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }

    /// Normalize a backend status string.
    ///
    /// Matching is case-insensitive. Anything outside the known set maps to
    /// [`JobStatus::Processing`] and is logged, never rejected.
    pub fn from_backend(raw: &str) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "pending" => JobStatus::Pending,
            "validating" => JobStatus::Validating,
            "extracting" => JobStatus::Extracting,
            "consolidating" => JobStatus::Consolidating,
            "generating" => JobStatus::Generating,
            "processing" => JobStatus::Processing,
            "completed" => JobStatus::Completed,
            "failed" => JobStatus::Failed,
            other => {
                warn!(status = other, "Unrecognized job status, treating as processing");
                JobStatus::Processing
            }
        }
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A problem with one input file. The job may still complete.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileError {
    pub file_name: String,
    pub message: String,
    pub code: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub line: Option<u32>,
}

impl FileError {
    pub fn new(
        file_name: impl Into<String>,
        message: impl Into<String>,
        code: impl Into<String>,
    ) -> Self {
        Self {
            file_name: file_name.into(),
            message: message.into(),
            code: code.into(),
            line: None,
        }
    }

    pub fn with_line(mut self, line: u32) -> Self {
        self.line = Some(line);
        self
    }
}

/// Summary the backend attaches to a finished job.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct JobResult {
    /// Name of the generated report on the server.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_file: Option<String>,
    /// Number of invoices that made it into the report.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub invoice_count: Option<u64>,
    /// Sum of all consolidated invoice totals.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_amount: Option<f64>,
    /// Per-file problems encountered while processing.
    #[serde(default)]
    pub errors: Vec<FileError>,
}

/// One normalized status poll result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusRecord {
    pub status: JobStatus,
    /// Backend-reported progress, already clamped to 0..=100.
    pub progress: u8,
    pub current_step: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<JobResult>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl StatusRecord {
    pub fn new(status: JobStatus, progress: u8, current_step: impl Into<String>) -> Self {
        Self {
            status,
            progress: progress.min(100),
            current_step: current_step.into(),
            result: None,
            error: None,
        }
    }

    pub fn with_result(mut self, result: JobResult) -> Self {
        self.result = Some(result);
        self
    }

    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.error = Some(error.into());
        self
    }

    /// File errors carried by the attached result, if any.
    pub fn file_errors(&self) -> &[FileError] {
        self.result
            .as_ref()
            .map(|r| r.errors.as_slice())
            .unwrap_or(&[])
    }
}

/// One in-flight or finished job.
///
/// `job_id` is absent while the files are still being uploaded and is set
/// exactly once, when processing starts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobHandle {
    upload_id: String,
    job_id: Option<String>,
    status: JobStatus,
    progress: u8,
    current_step: String,
    errors: Vec<FileError>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    result: Option<JobResult>,
    created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    completed_at: Option<DateTime<Utc>>,
}

impl JobHandle {
    pub fn new(upload_id: impl Into<String>) -> Self {
        Self {
            upload_id: upload_id.into(),
            job_id: None,
            status: JobStatus::Pending,
            progress: 0,
            current_step: String::new(),
            errors: Vec::new(),
            result: None,
            created_at: Utc::now(),
            completed_at: None,
        }
    }

    pub fn upload_id(&self) -> &str {
        &self.upload_id
    }

    pub fn job_id(&self) -> Option<&str> {
        self.job_id.as_deref()
    }

    pub fn status(&self) -> JobStatus {
        self.status
    }

    pub fn progress(&self) -> u8 {
        self.progress
    }

    pub fn current_step(&self) -> &str {
        &self.current_step
    }

    pub fn errors(&self) -> &[FileError] {
        &self.errors
    }

    pub fn result(&self) -> Option<&JobResult> {
        self.result.as_ref()
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn completed_at(&self) -> Option<DateTime<Utc>> {
        self.completed_at
    }

    /// Record the job id handed out by the process starter.
    pub fn assign_job_id(&mut self, job_id: impl Into<String>) -> Result<(), JobHandleError> {
        if let Some(existing) = &self.job_id {
            return Err(JobHandleError::JobIdAlreadyAssigned(existing.clone()));
        }
        self.job_id = Some(job_id.into());
        Ok(())
    }

    /// Append file errors that have not been seen yet, keeping arrival order.
    pub fn record_errors<'a>(&mut self, errors: impl IntoIterator<Item = &'a FileError>) {
        for error in errors {
            if !self.errors.contains(error) {
                self.errors.push(error.clone());
            }
        }
    }

    /// Fold a status poll into the handle.
    ///
    /// Progress never goes backwards while the job runs. Once a terminal
    /// status has been applied the handle is frozen.
    pub fn apply(&mut self, record: &StatusRecord) {
        if self.status.is_terminal() {
            return;
        }

        self.status = record.status;
        self.progress = if record.status == JobStatus::Completed {
            100
        } else {
            self.progress.max(record.progress.min(100))
        };
        if !record.current_step.is_empty() {
            self.current_step = record.current_step.clone();
        }
        if let Some(result) = &record.result {
            self.record_errors(&result.errors);
            self.result = Some(result.clone());
        }
        if record.status.is_terminal() {
            self.completed_at = Some(Utc::now());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_backend_known_statuses() {
        assert_eq!(JobStatus::from_backend("pending"), JobStatus::Pending);
        assert_eq!(JobStatus::from_backend("validating"), JobStatus::Validating);
        assert_eq!(JobStatus::from_backend("extracting"), JobStatus::Extracting);
        assert_eq!(JobStatus::from_backend("consolidating"), JobStatus::Consolidating);
        assert_eq!(JobStatus::from_backend("generating"), JobStatus::Generating);
        assert_eq!(JobStatus::from_backend("processing"), JobStatus::Processing);
        assert_eq!(JobStatus::from_backend("completed"), JobStatus::Completed);
        assert_eq!(JobStatus::from_backend("failed"), JobStatus::Failed);
    }

    #[test]
    fn test_from_backend_is_case_insensitive() {
        assert_eq!(JobStatus::from_backend("  Completed "), JobStatus::Completed);
        assert_eq!(JobStatus::from_backend("FAILED"), JobStatus::Failed);
    }

    #[test]
    fn test_from_backend_unknown_falls_back_to_processing() {
        assert_eq!(JobStatus::from_backend("rendering_charts"), JobStatus::Processing);
        assert_eq!(JobStatus::from_backend(""), JobStatus::Processing);
    }

    #[test]
    fn test_terminal_statuses() {
        assert!(JobStatus::Completed.is_terminal());
        assert!(JobStatus::Failed.is_terminal());
        assert!(!JobStatus::Processing.is_terminal());
        assert!(!JobStatus::Pending.is_terminal());
    }

    #[test]
    fn test_status_serialization() {
        assert_eq!(
            serde_json::to_string(&JobStatus::Consolidating).unwrap(),
            "\"consolidating\""
        );
    }

    #[test]
    fn test_job_id_assigned_once() {
        let mut handle = JobHandle::new("upl-1");
        assert!(handle.job_id().is_none());

        handle.assign_job_id("job-1").unwrap();
        assert_eq!(handle.job_id(), Some("job-1"));

        let err = handle.assign_job_id("job-2").unwrap_err();
        assert_eq!(err, JobHandleError::JobIdAlreadyAssigned("job-1".to_string()));
        assert_eq!(handle.job_id(), Some("job-1"));
    }

    #[test]
    fn test_apply_keeps_progress_monotonic() {
        let mut handle = JobHandle::new("upl-1");
        handle.apply(&StatusRecord::new(JobStatus::Extracting, 40, "Extracting"));
        handle.apply(&StatusRecord::new(JobStatus::Extracting, 25, "Extracting again"));

        assert_eq!(handle.progress(), 40);
        assert_eq!(handle.current_step(), "Extracting again");
    }

    #[test]
    fn test_apply_completed_freezes_handle() {
        let mut handle = JobHandle::new("upl-1");
        handle.apply(&StatusRecord::new(JobStatus::Generating, 80, "Generating"));
        handle.apply(&StatusRecord::new(JobStatus::Completed, 95, "Done"));

        assert_eq!(handle.status(), JobStatus::Completed);
        assert_eq!(handle.progress(), 100);
        assert!(handle.completed_at().is_some());

        handle.apply(&StatusRecord::new(JobStatus::Processing, 10, "Late update"));
        assert_eq!(handle.status(), JobStatus::Completed);
        assert_eq!(handle.current_step(), "Done");
    }

    #[test]
    fn test_errors_accumulate_in_order_without_duplicates() {
        let bad_format = FileError::new("invalid.json", "bad format", "PARSE_ERROR");
        let missing_total = FileError::new("b.pdf", "missing total", "MISSING_FIELD").with_line(12);

        let mut handle = JobHandle::new("upl-1");
        handle.apply(
            &StatusRecord::new(JobStatus::Extracting, 30, "Extracting").with_result(JobResult {
                errors: vec![bad_format.clone()],
                ..Default::default()
            }),
        );
        handle.apply(
            &StatusRecord::new(JobStatus::Consolidating, 60, "Merging").with_result(JobResult {
                errors: vec![bad_format.clone(), missing_total.clone()],
                ..Default::default()
            }),
        );

        assert_eq!(handle.errors(), &[bad_format, missing_total]);
    }
}
