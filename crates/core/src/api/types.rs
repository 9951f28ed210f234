//! Collaborator contracts for the consolidation backend.

use std::collections::BTreeSet;
use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::job::{FileError, JobStatus, StatusRecord};

/// Errors that can occur when talking to the backend.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ApiError {
    /// Rejected client-side before any request was made.
    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Request timeout")]
    Timeout,

    /// A well-formed error response.
    #[error("Server returned {status}: {message}")]
    Server { status: u16, message: String },

    /// The response could not be decoded.
    #[error("Invalid response: {0}")]
    InvalidResponse(String),
}

impl ApiError {
    /// Transport failures that may succeed on a later attempt.
    pub fn is_transient(&self) -> bool {
        matches!(self, ApiError::Network(_) | ApiError::Timeout)
    }
}

/// Upload progress sink, called with a percentage in 0..=100.
pub type ProgressCallback = Arc<dyn Fn(u8) + Send + Sync>;

/// Report format produced by the backend.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutputFormat {
    #[default]
    Xlsx,
    Csv,
    Pdf,
    Json,
}

impl OutputFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            OutputFormat::Xlsx => "xlsx",
            OutputFormat::Csv => "csv",
            OutputFormat::Pdf => "pdf",
            OutputFormat::Json => "json",
        }
    }

    /// File extension used when the server does not name the artifact.
    pub fn extension(&self) -> &'static str {
        self.as_str()
    }

    pub fn mime_type(&self) -> &'static str {
        match self {
            OutputFormat::Xlsx => {
                "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet"
            }
            OutputFormat::Csv => "text/csv",
            OutputFormat::Pdf => "application/pdf",
            OutputFormat::Json => "application/json",
        }
    }
}

impl FromStr for OutputFormat {
    type Err = ApiError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "xlsx" => Ok(OutputFormat::Xlsx),
            "csv" => Ok(OutputFormat::Csv),
            "pdf" => Ok(OutputFormat::Pdf),
            "json" => Ok(OutputFormat::Json),
            other => Err(ApiError::Validation(format!(
                "unknown output format '{}'",
                other
            ))),
        }
    }
}

impl std::fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which columns the report contains.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ColumnProfile {
    Basic,
    #[default]
    Complete,
    Accountant,
    /// Only the columns listed in [`ProcessOptions::custom_columns`].
    Custom,
}

impl ColumnProfile {
    pub fn as_str(&self) -> &'static str {
        match self {
            ColumnProfile::Basic => "basic",
            ColumnProfile::Complete => "complete",
            ColumnProfile::Accountant => "accountant",
            ColumnProfile::Custom => "custom",
        }
    }
}

impl FromStr for ColumnProfile {
    type Err = ApiError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "basic" => Ok(ColumnProfile::Basic),
            "complete" => Ok(ColumnProfile::Complete),
            "accountant" => Ok(ColumnProfile::Accountant),
            "custom" => Ok(ColumnProfile::Custom),
            other => Err(ApiError::Validation(format!(
                "unknown column profile '{}'",
                other
            ))),
        }
    }
}

impl std::fmt::Display for ColumnProfile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Options sent with the start-processing request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessOptions {
    #[serde(default)]
    pub output_format: OutputFormat,
    #[serde(default)]
    pub column_profile: ColumnProfile,
    /// Required iff `column_profile` is `custom`.
    #[serde(default)]
    pub custom_columns: BTreeSet<String>,
    #[serde(default = "default_true")]
    pub include_summary: bool,
    #[serde(default = "default_true")]
    pub include_items_sheet: bool,
}

fn default_true() -> bool {
    true
}

impl Default for ProcessOptions {
    fn default() -> Self {
        Self {
            output_format: OutputFormat::default(),
            column_profile: ColumnProfile::default(),
            custom_columns: BTreeSet::new(),
            include_summary: true,
            include_items_sheet: true,
        }
    }
}

impl ProcessOptions {
    /// Check the option combination without touching the network.
    pub fn validate(&self) -> Result<(), ApiError> {
        match self.column_profile {
            ColumnProfile::Custom => {
                if self.custom_columns.is_empty() {
                    return Err(ApiError::Validation(
                        "custom column profile requires at least one custom column".to_string(),
                    ));
                }
                if self.custom_columns.iter().any(|c| c.trim().is_empty()) {
                    return Err(ApiError::Validation(
                        "custom column names cannot be blank".to_string(),
                    ));
                }
            }
            profile => {
                if !self.custom_columns.is_empty() {
                    return Err(ApiError::Validation(format!(
                        "custom columns are only allowed with the custom profile, got '{}'",
                        profile
                    )));
                }
            }
        }
        Ok(())
    }
}

/// One file to upload.
#[derive(Debug, Clone)]
pub struct UploadFile {
    pub file_name: String,
    pub content_type: String,
    pub data: Vec<u8>,
}

impl UploadFile {
    /// Create an upload, guessing the content type from the extension.
    pub fn new(file_name: impl Into<String>, data: Vec<u8>) -> Self {
        let file_name = file_name.into();
        let content_type = guess_content_type(&file_name).to_string();
        Self {
            file_name,
            content_type,
            data,
        }
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

fn guess_content_type(file_name: &str) -> &'static str {
    let ext = file_name
        .rsplit_once('.')
        .map(|(_, ext)| ext.to_ascii_lowercase())
        .unwrap_or_default();
    match ext.as_str() {
        "json" => "application/json",
        "pdf" => "application/pdf",
        _ => "application/octet-stream",
    }
}

/// Per-file verdict from the upload endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileAcceptance {
    pub file_name: String,
    pub accepted: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// Result of a successful upload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadResult {
    pub upload_id: String,
    pub file_count: u32,
    #[serde(default)]
    pub files: Vec<FileAcceptance>,
}

impl UploadResult {
    /// Number of files the server kept. Falls back to `file_count` when no
    /// per-file detail was returned.
    pub fn accepted_count(&self) -> usize {
        if self.files.is_empty() {
            self.file_count as usize
        } else {
            self.files.iter().filter(|f| f.accepted).count()
        }
    }

    /// Rejected files as job file errors.
    pub fn rejections(&self) -> Vec<FileError> {
        self.files
            .iter()
            .filter(|f| !f.accepted)
            .map(|f| {
                FileError::new(
                    f.file_name.clone(),
                    f.message.clone().unwrap_or_else(|| "file rejected".to_string()),
                    "REJECTED",
                )
            })
            .collect()
    }
}

/// Result of starting a processing job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StartResult {
    pub job_id: String,
    pub status: JobStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub estimated_time_secs: Option<u64>,
}

/// Raw download response before integrity checks.
#[derive(Debug, Clone)]
pub struct RawArtifact {
    pub content_type: Option<String>,
    pub file_name: Option<String>,
    pub data: Vec<u8>,
}

/// Uploads a file set and returns the upload id.
#[async_trait]
pub trait JobSubmitter: Send + Sync {
    /// Upload all files in one request. `progress` receives a
    /// non-decreasing percentage as bytes are handed to the transport.
    async fn submit(
        &self,
        files: Vec<UploadFile>,
        progress: ProgressCallback,
    ) -> Result<UploadResult, ApiError>;
}

/// Starts processing of a previous upload.
#[async_trait]
pub trait ProcessStarter: Send + Sync {
    async fn start(
        &self,
        upload_id: &str,
        options: &ProcessOptions,
    ) -> Result<StartResult, ApiError>;
}

/// Fetches the current status of a job with a single request.
#[async_trait]
pub trait StatusFetcher: Send + Sync {
    async fn fetch_status(&self, job_id: &str) -> Result<StatusRecord, ApiError>;
}

/// Fetches the generated report.
#[async_trait]
pub trait ArtifactFetcher: Send + Sync {
    async fn fetch_artifact(
        &self,
        job_id: &str,
        format: OutputFormat,
    ) -> Result<RawArtifact, ApiError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_options_are_valid() {
        let options = ProcessOptions::default();
        assert_eq!(options.output_format, OutputFormat::Xlsx);
        assert_eq!(options.column_profile, ColumnProfile::Complete);
        assert!(options.include_summary);
        assert!(options.include_items_sheet);
        assert!(options.validate().is_ok());
    }

    #[test]
    fn test_custom_profile_requires_columns() {
        let options = ProcessOptions {
            column_profile: ColumnProfile::Custom,
            ..Default::default()
        };
        assert!(matches!(options.validate(), Err(ApiError::Validation(_))));

        let options = ProcessOptions {
            column_profile: ColumnProfile::Custom,
            custom_columns: ["vendor".to_string(), "total".to_string()].into(),
            ..Default::default()
        };
        assert!(options.validate().is_ok());
    }

    #[test]
    fn test_custom_columns_rejected_without_custom_profile() {
        let options = ProcessOptions {
            column_profile: ColumnProfile::Basic,
            custom_columns: ["vendor".to_string()].into(),
            ..Default::default()
        };
        let err = options.validate().unwrap_err();
        assert!(err.to_string().contains("basic"));
    }

    #[test]
    fn test_blank_custom_column_rejected() {
        let options = ProcessOptions {
            column_profile: ColumnProfile::Custom,
            custom_columns: ["  ".to_string()].into(),
            ..Default::default()
        };
        assert!(options.validate().is_err());
    }

    #[test]
    fn test_parse_output_format() {
        assert_eq!("XLSX".parse::<OutputFormat>().unwrap(), OutputFormat::Xlsx);
        assert_eq!("csv".parse::<OutputFormat>().unwrap(), OutputFormat::Csv);
        assert!(matches!(
            "docx".parse::<OutputFormat>(),
            Err(ApiError::Validation(_))
        ));
    }

    #[test]
    fn test_parse_column_profile() {
        assert_eq!(
            "accountant".parse::<ColumnProfile>().unwrap(),
            ColumnProfile::Accountant
        );
        assert!("everything".parse::<ColumnProfile>().is_err());
    }

    #[test]
    fn test_options_deserialize_with_defaults() {
        let options: ProcessOptions = toml::from_str(r#"output_format = "pdf""#).unwrap();
        assert_eq!(options.output_format, OutputFormat::Pdf);
        assert_eq!(options.column_profile, ColumnProfile::Complete);
        assert!(options.include_summary);
    }

    #[test]
    fn test_upload_file_content_type() {
        assert_eq!(
            UploadFile::new("a.JSON", vec![]).content_type,
            "application/json"
        );
        assert_eq!(UploadFile::new("b.pdf", vec![]).content_type, "application/pdf");
        assert_eq!(
            UploadFile::new("README", vec![]).content_type,
            "application/octet-stream"
        );
    }

    #[test]
    fn test_upload_result_rejections() {
        let result = UploadResult {
            upload_id: "upl-1".to_string(),
            file_count: 2,
            files: vec![
                FileAcceptance {
                    file_name: "ok.json".to_string(),
                    accepted: true,
                    message: None,
                },
                FileAcceptance {
                    file_name: "huge.pdf".to_string(),
                    accepted: false,
                    message: Some("file too large".to_string()),
                },
            ],
        };

        assert_eq!(result.accepted_count(), 1);
        let rejections = result.rejections();
        assert_eq!(rejections.len(), 1);
        assert_eq!(rejections[0].file_name, "huge.pdf");
        assert_eq!(rejections[0].code, "REJECTED");
        assert_eq!(rejections[0].message, "file too large");
    }

    #[test]
    fn test_upload_result_without_detail_uses_file_count() {
        let result = UploadResult {
            upload_id: "upl-1".to_string(),
            file_count: 3,
            files: vec![],
        };
        assert_eq!(result.accepted_count(), 3);
        assert!(result.rejections().is_empty());
    }

    #[test]
    fn test_api_error_transient() {
        assert!(ApiError::Network("reset".to_string()).is_transient());
        assert!(ApiError::Timeout.is_transient());
        assert!(!ApiError::Validation("x".to_string()).is_transient());
        assert!(!ApiError::Server {
            status: 500,
            message: "boom".to_string()
        }
        .is_transient());
    }
}
