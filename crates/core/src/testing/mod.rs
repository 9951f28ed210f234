//! Testing utilities and mock implementations.
//!
//! [`MockJobApi`] stands in for the consolidation backend so workflows can be
//! exercised end-to-end without a server.
//!
//! # Example
//!
//! ```rust,ignore
//! use consolidator_core::testing::{fixtures, MockJobApi};
//!
//! let api = Arc::new(MockJobApi::new());
//! api.push_status(fixtures::status(JobStatus::Extracting, 40)).await;
//! api.push_status(fixtures::completed(2)).await;
//! api.fail_next_upload(ApiError::Timeout).await;
//! ```

mod mock_job_api;

pub use mock_job_api::{MockJobApi, RecordedStart, RecordedUpload};

/// Test fixtures and helper functions.
pub mod fixtures {
    use crate::api::{RawArtifact, UploadFile};
    use crate::job::{FileError, JobResult, JobStatus, StatusRecord};

    /// A small JSON invoice upload.
    pub fn invoice_file(name: &str) -> UploadFile {
        UploadFile::new(
            name,
            format!(r#"{{"invoice_number": "{}", "total": 100.0}}"#, name).into_bytes(),
        )
    }

    /// A running status at `progress`.
    pub fn status(status: JobStatus, progress: u8) -> StatusRecord {
        StatusRecord::new(status, progress, format!("{} invoices", status))
    }

    /// A completed status with `invoice_count` consolidated invoices.
    pub fn completed(invoice_count: u64) -> StatusRecord {
        StatusRecord::new(JobStatus::Completed, 100, "Done").with_result(JobResult {
            output_file: Some("consolidated.xlsx".to_string()),
            invoice_count: Some(invoice_count),
            total_amount: Some(invoice_count as f64 * 100.0),
            errors: Vec::new(),
        })
    }

    /// A completed status where some files could not be processed.
    pub fn completed_with_errors(errors: Vec<FileError>) -> StatusRecord {
        let mut record = completed(1);
        if let Some(result) = record.result.as_mut() {
            result.errors = errors;
        }
        record
    }

    /// A failed status carrying the backend error string.
    pub fn failed(message: &str) -> StatusRecord {
        StatusRecord::new(JobStatus::Failed, 0, "Failed").with_error(message)
    }

    /// A well-formed spreadsheet download.
    pub fn xlsx_artifact() -> RawArtifact {
        RawArtifact {
            content_type: Some(
                "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet".to_string(),
            ),
            file_name: Some("consolidated.xlsx".to_string()),
            data: b"PK\x03\x04mock-xlsx".to_vec(),
        }
    }

    /// An error envelope served where a report was expected.
    pub fn error_artifact(detail: &str) -> RawArtifact {
        RawArtifact {
            content_type: Some("application/json".to_string()),
            file_name: None,
            data: serde_json::json!({ "detail": detail }).to_string().into_bytes(),
        }
    }
}

