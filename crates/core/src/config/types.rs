use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::api::ProcessOptions;
use crate::poller::PollerConfig;
use crate::workflow::WorkflowConfig;

/// Root configuration
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub api: ApiConfig,
    #[serde(default)]
    pub polling: PollerConfig,
    #[serde(default)]
    pub workflow: WorkflowConfig,
    /// Default options for new processing jobs
    #[serde(default)]
    pub processing: ProcessOptions,
    #[serde(default)]
    pub download: DownloadConfig,
}

/// Backend API configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ApiConfig {
    /// Service URL (e.g., "http://localhost:8000")
    #[serde(default = "default_base_url")]
    pub base_url: String,
    /// Timeout for status, process and download requests (default: 30)
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,
    /// Timeout for the upload request (default: 300)
    #[serde(default = "default_upload_timeout")]
    pub upload_timeout_secs: u64,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            timeout_secs: default_timeout(),
            upload_timeout_secs: default_upload_timeout(),
        }
    }
}

fn default_base_url() -> String {
    "http://localhost:8000".to_string()
}

fn default_timeout() -> u64 {
    30
}

fn default_upload_timeout() -> u64 {
    300
}

/// Report download configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DownloadConfig {
    /// Directory reports are written to
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,
}

impl Default for DownloadConfig {
    fn default() -> Self {
        Self {
            output_dir: default_output_dir(),
        }
    }
}

fn default_output_dir() -> PathBuf {
    PathBuf::from(".")
}
