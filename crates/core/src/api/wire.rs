//! Backend wire format and its normalization into domain types.
//!
//! The backend is loose about field names and status strings; everything is
//! coerced here so the rest of the crate only sees closed types.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::job::{FileError, JobResult, JobStatus, StatusRecord};

use super::{
    ColumnProfile, FileAcceptance, OutputFormat, ProcessOptions, StartResult, UploadResult,
};

/// Keys an error envelope may carry. A body with any other key is data.
const ENVELOPE_KEYS: &[&str] = &["detail", "error", "message", "code", "status_code"];

#[derive(Debug, Serialize)]
pub(crate) struct WireStartRequest<'a> {
    upload_id: &'a str,
    output_format: OutputFormat,
    column_profile: ColumnProfile,
    #[serde(skip_serializing_if = "Option::is_none")]
    custom_columns: Option<Vec<&'a str>>,
    options: WireStartOptions,
}

#[derive(Debug, Serialize)]
struct WireStartOptions {
    include_summary: bool,
    include_items_sheet: bool,
}

impl<'a> WireStartRequest<'a> {
    pub(crate) fn new(upload_id: &'a str, options: &'a ProcessOptions) -> Self {
        let custom_columns = (options.column_profile == ColumnProfile::Custom)
            .then(|| options.custom_columns.iter().map(String::as_str).collect());
        Self {
            upload_id,
            output_format: options.output_format,
            column_profile: options.column_profile,
            custom_columns,
            options: WireStartOptions {
                include_summary: options.include_summary,
                include_items_sheet: options.include_items_sheet,
            },
        }
    }
}

#[derive(Debug, Deserialize)]
pub(crate) struct WireUploadResponse {
    upload_id: String,
    #[serde(default)]
    file_count: Option<u32>,
    #[serde(default)]
    files: Vec<WireUploadedFile>,
}

#[derive(Debug, Deserialize)]
struct WireUploadedFile {
    #[serde(alias = "filename", alias = "name")]
    file_name: String,
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    accepted: Option<bool>,
    #[serde(default, alias = "error")]
    message: Option<String>,
}

impl WireUploadResponse {
    pub(crate) fn into_upload_result(self) -> UploadResult {
        let files: Vec<FileAcceptance> = self
            .files
            .into_iter()
            .map(|f| {
                let accepted = f
                    .accepted
                    .or_else(|| {
                        f.status.as_deref().map(|s| {
                            matches!(
                                s.trim().to_ascii_lowercase().as_str(),
                                "accepted" | "ok" | "valid" | "uploaded"
                            )
                        })
                    })
                    .unwrap_or(f.message.is_none());
                FileAcceptance {
                    file_name: f.file_name,
                    accepted,
                    message: f.message,
                }
            })
            .collect();

        UploadResult {
            upload_id: self.upload_id,
            file_count: self.file_count.unwrap_or(files.len() as u32),
            files,
        }
    }
}

#[derive(Debug, Deserialize)]
pub(crate) struct WireStartResponse {
    job_id: String,
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    estimated_time: Option<f64>,
}

impl WireStartResponse {
    pub(crate) fn into_start_result(self) -> StartResult {
        StartResult {
            job_id: self.job_id,
            status: self
                .status
                .as_deref()
                .map(JobStatus::from_backend)
                .unwrap_or(JobStatus::Pending),
            estimated_time_secs: self
                .estimated_time
                .filter(|t| t.is_finite() && *t >= 0.0)
                .map(|t| t.round() as u64),
        }
    }
}

#[derive(Debug, Deserialize)]
pub(crate) struct WireStatusResponse {
    status: String,
    #[serde(default)]
    progress: Option<f64>,
    #[serde(default)]
    current_step: Option<String>,
    #[serde(default)]
    result: Option<WireJobResult>,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct WireJobResult {
    #[serde(default)]
    output_file: Option<String>,
    #[serde(default, alias = "total_invoices", alias = "invoices_processed")]
    invoice_count: Option<u64>,
    #[serde(default)]
    total_amount: Option<f64>,
    #[serde(default)]
    errors: Vec<WireFileError>,
}

#[derive(Debug, Deserialize)]
struct WireFileError {
    #[serde(alias = "filename", alias = "file")]
    file_name: String,
    #[serde(alias = "error")]
    message: String,
    #[serde(default)]
    code: Option<String>,
    #[serde(default)]
    line: Option<u32>,
}

impl WireStatusResponse {
    pub(crate) fn into_status_record(self) -> StatusRecord {
        let status = JobStatus::from_backend(&self.status);
        StatusRecord {
            status,
            progress: clamp_progress(self.progress),
            current_step: self.current_step.unwrap_or_default(),
            result: self.result.map(|r| JobResult {
                output_file: r.output_file,
                invoice_count: r.invoice_count,
                total_amount: r.total_amount,
                errors: r
                    .errors
                    .into_iter()
                    .map(|e| FileError {
                        file_name: e.file_name,
                        message: e.message,
                        code: e.code.unwrap_or_else(|| "UNKNOWN".to_string()),
                        line: e.line,
                    })
                    .collect(),
            }),
            error: self.error,
        }
    }
}

/// Coerce a backend progress number into 0..=100.
pub(crate) fn clamp_progress(raw: Option<f64>) -> u8 {
    match raw {
        Some(p) if p.is_finite() => p.round().clamp(0.0, 100.0) as u8,
        _ => 0,
    }
}

/// Pull a human-readable message out of an error response body.
pub(crate) fn error_message(body: &str) -> Option<String> {
    let value: Value = serde_json::from_str(body).ok()?;
    message_from_value(&value)
}

/// Decode `data` as an error envelope, returning its message.
///
/// Only objects made exclusively of envelope keys qualify, so a JSON report
/// that happens to contain a `message` field is not mistaken for an error.
pub(crate) fn error_envelope_message(data: &[u8]) -> Option<String> {
    let value: Value = serde_json::from_slice(data).ok()?;
    let object = value.as_object()?;
    if object.is_empty() || !object.keys().all(|k| ENVELOPE_KEYS.contains(&k.as_str())) {
        return None;
    }
    message_from_value(&value)
}

fn message_from_value(value: &Value) -> Option<String> {
    let object = value.as_object()?;
    for key in ["detail", "message", "error"] {
        match object.get(key) {
            Some(Value::String(s)) if !s.trim().is_empty() => return Some(s.clone()),
            // FastAPI-style validation detail: [{"loc": [...], "msg": "..."}]
            Some(Value::Array(items)) => {
                let msgs: Vec<&str> = items
                    .iter()
                    .filter_map(|i| i.get("msg").and_then(Value::as_str))
                    .collect();
                if !msgs.is_empty() {
                    return Some(msgs.join("; "));
                }
            }
            Some(nested @ Value::Object(_)) => {
                if let Some(msg) = message_from_value(nested) {
                    return Some(msg);
                }
            }
            _ => {}
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_start_request_body() {
        let options = ProcessOptions {
            output_format: OutputFormat::Csv,
            column_profile: ColumnProfile::Custom,
            custom_columns: ["total".to_string(), "vendor".to_string()].into(),
            include_summary: false,
            include_items_sheet: true,
        };
        let body = serde_json::to_value(WireStartRequest::new("upl-1", &options)).unwrap();
        assert_eq!(
            body,
            serde_json::json!({
                "upload_id": "upl-1",
                "output_format": "csv",
                "column_profile": "custom",
                "custom_columns": ["total", "vendor"],
                "options": {"include_summary": false, "include_items_sheet": true}
            })
        );

        let body =
            serde_json::to_value(WireStartRequest::new("upl-1", &ProcessOptions::default()))
                .unwrap();
        assert!(body.get("custom_columns").is_none());
    }

    #[test]
    fn test_status_normalization() {
        let wire: WireStatusResponse = serde_json::from_str(
            r#"{"status": "Extracting", "progress": 42.6, "current_step": "Reading invoices"}"#,
        )
        .unwrap();
        let record = wire.into_status_record();
        assert_eq!(record.status, JobStatus::Extracting);
        assert_eq!(record.progress, 43);
        assert_eq!(record.current_step, "Reading invoices");
        assert!(record.result.is_none());
    }

    #[test]
    fn test_status_unknown_value_maps_to_processing() {
        let wire: WireStatusResponse =
            serde_json::from_str(r#"{"status": "warming_up", "progress": 5}"#).unwrap();
        assert_eq!(wire.into_status_record().status, JobStatus::Processing);
    }

    #[test]
    fn test_status_with_result_errors() {
        let wire: WireStatusResponse = serde_json::from_str(
            r#"{
                "status": "completed",
                "progress": 100,
                "current_step": "Done",
                "result": {
                    "output_file": "consolidated.xlsx",
                    "total_invoices": 12,
                    "errors": [
                        {"filename": "invalid.json", "message": "bad format"},
                        {"file_name": "scan.pdf", "error": "unreadable", "code": "OCR", "line": 3}
                    ]
                }
            }"#,
        )
        .unwrap();
        let record = wire.into_status_record();
        let result = record.result.as_ref().unwrap();
        assert_eq!(result.invoice_count, Some(12));
        assert_eq!(result.output_file.as_deref(), Some("consolidated.xlsx"));
        assert_eq!(record.file_errors().len(), 2);
        assert_eq!(record.file_errors()[0].code, "UNKNOWN");
        assert_eq!(record.file_errors()[1].line, Some(3));
    }

    #[test]
    fn test_clamp_progress() {
        assert_eq!(clamp_progress(None), 0);
        assert_eq!(clamp_progress(Some(-5.0)), 0);
        assert_eq!(clamp_progress(Some(250.0)), 100);
        assert_eq!(clamp_progress(Some(f64::NAN)), 0);
        assert_eq!(clamp_progress(Some(57.4)), 57);
    }

    #[test]
    fn test_upload_response_acceptance() {
        let wire: WireUploadResponse = serde_json::from_str(
            r#"{
                "upload_id": "upl-9",
                "file_count": 3,
                "files": [
                    {"filename": "a.json", "status": "accepted"},
                    {"filename": "b.pdf", "status": "rejected", "error": "not a PDF"},
                    {"name": "c.json"}
                ]
            }"#,
        )
        .unwrap();
        let result = wire.into_upload_result();
        assert_eq!(result.upload_id, "upl-9");
        assert_eq!(result.file_count, 3);
        assert!(result.files[0].accepted);
        assert!(!result.files[1].accepted);
        assert_eq!(result.files[1].message.as_deref(), Some("not a PDF"));
        assert!(result.files[2].accepted);
    }

    #[test]
    fn test_start_response() {
        let wire: WireStartResponse = serde_json::from_str(
            r#"{"job_id": "job-7", "status": "pending", "estimated_time": 12.4}"#,
        )
        .unwrap();
        let result = wire.into_start_result();
        assert_eq!(result.job_id, "job-7");
        assert_eq!(result.status, JobStatus::Pending);
        assert_eq!(result.estimated_time_secs, Some(12));
    }

    #[test]
    fn test_error_message_variants() {
        assert_eq!(
            error_message(r#"{"detail": "Upload not found"}"#).as_deref(),
            Some("Upload not found")
        );
        assert_eq!(
            error_message(r#"{"error": {"message": "quota exceeded"}}"#).as_deref(),
            Some("quota exceeded")
        );
        assert_eq!(
            error_message(r#"{"detail": [{"loc": ["body"], "msg": "field required"}]}"#)
                .as_deref(),
            Some("field required")
        );
        assert_eq!(error_message("Internal Server Error"), None);
    }

    #[test]
    fn test_error_envelope_detection() {
        assert_eq!(
            error_envelope_message(br#"{"detail": "Job not completed"}"#).as_deref(),
            Some("Job not completed")
        );
        assert_eq!(
            error_envelope_message(br#"{"error": "boom", "status_code": 500}"#).as_deref(),
            Some("boom")
        );
        // A report that happens to carry a message field is data.
        assert_eq!(
            error_envelope_message(br#"{"invoices": [], "message": "ok"}"#),
            None
        );
        assert_eq!(error_envelope_message(b"PK\x03\x04binary"), None);
        assert_eq!(error_envelope_message(b"[]"), None);
    }
}
