//! HTTP implementation of the backend collaborators.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use futures::StreamExt;
use reqwest::header::{CONTENT_DISPOSITION, CONTENT_TYPE};
use reqwest::{multipart, Body, Client, Response};
use serde::de::DeserializeOwned;
use tracing::{debug, warn};

use crate::config::ApiConfig;
use crate::job::StatusRecord;
use crate::metrics;

use super::wire::{
    self, WireStartRequest, WireStartResponse, WireStatusResponse, WireUploadResponse,
};
use super::{
    ApiError, ArtifactFetcher, JobSubmitter, OutputFormat, ProcessOptions, ProcessStarter,
    ProgressCallback, RawArtifact, StartResult, StatusFetcher, UploadFile, UploadResult,
};

/// Size of the chunks upload bodies are streamed in.
const UPLOAD_CHUNK_SIZE: usize = 64 * 1024;

/// Backend client speaking the consolidation service's REST API.
#[derive(Clone)]
pub struct HttpJobApi {
    client: Client,
    config: ApiConfig,
}

impl HttpJobApi {
    /// Create a new client.
    pub fn new(config: ApiConfig) -> Result<Self, ApiError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| ApiError::Network(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self { client, config })
    }

    /// Get the base URL without trailing slash.
    fn base_url(&self) -> &str {
        self.config.base_url.trim_end_matches('/')
    }

    fn url(&self, endpoint: &str) -> String {
        format!("{}{}", self.base_url(), endpoint)
    }
}

fn map_send_error(e: reqwest::Error) -> ApiError {
    if e.is_timeout() {
        ApiError::Timeout
    } else if e.is_decode() {
        ApiError::InvalidResponse(e.to_string())
    } else {
        ApiError::Network(e.to_string())
    }
}

/// Turn a non-2xx response into a server error carrying the backend message.
async fn ensure_success(response: Response) -> Result<Response, ApiError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response.text().await.unwrap_or_default();
    let message = wire::error_message(&body).unwrap_or_else(|| {
        if body.trim().is_empty() {
            status
                .canonical_reason()
                .unwrap_or("request failed")
                .to_string()
        } else {
            body.chars().take(200).collect()
        }
    });

    Err(ApiError::Server {
        status: status.as_u16(),
        message,
    })
}

async fn decode_json<T: DeserializeOwned>(response: Response) -> Result<T, ApiError> {
    let body = response.text().await.map_err(map_send_error)?;
    serde_json::from_str(&body)
        .map_err(|e| ApiError::InvalidResponse(format!("Failed to parse response: {}", e)))
}

fn observe(operation: &str, started: Instant, ok: bool) {
    metrics::BACKEND_REQUEST_DURATION
        .with_label_values(&[operation, if ok { "success" } else { "error" }])
        .observe(started.elapsed().as_secs_f64());
}

/// Upload percentage for `done` of `total` bytes. Capped at 99 until the
/// server has answered.
fn upload_percent(done: u64, total: u64) -> u8 {
    if total == 0 {
        return 99;
    }
    (done.saturating_mul(100) / total).min(99) as u8
}

/// Extract the file name from a `Content-Disposition` header value.
fn parse_content_disposition(value: &str) -> Option<String> {
    let mut plain = None;
    for param in value.split(';').map(str::trim) {
        if let Some(encoded) = param.strip_prefix("filename*=") {
            // RFC 5987: charset'lang'percent-encoded
            let raw = encoded.rsplit('\'').next().unwrap_or(encoded);
            if let Ok(decoded) = urlencoding::decode(raw.trim_matches('"')) {
                if !decoded.is_empty() {
                    return Some(decoded.into_owned());
                }
            }
        } else if let Some(name) = param.strip_prefix("filename=") {
            let name = name.trim_matches('"');
            if !name.is_empty() {
                plain = Some(name.to_string());
            }
        }
    }
    plain
}

#[async_trait]
impl JobSubmitter for HttpJobApi {
    async fn submit(
        &self,
        files: Vec<UploadFile>,
        progress: ProgressCallback,
    ) -> Result<UploadResult, ApiError> {
        if files.is_empty() {
            return Err(ApiError::Validation("no files to upload".to_string()));
        }

        let total: u64 = files.iter().map(|f| f.len() as u64).sum();
        let sent = Arc::new(AtomicU64::new(0));
        let mut form = multipart::Form::new();

        for file in files {
            let len = file.len() as u64;
            let chunks: Vec<Vec<u8>> = file
                .data
                .chunks(UPLOAD_CHUNK_SIZE)
                .map(<[u8]>::to_vec)
                .collect();

            let sent = Arc::clone(&sent);
            let progress = Arc::clone(&progress);
            let stream = futures::stream::iter(chunks).map(move |chunk| {
                let done = sent.fetch_add(chunk.len() as u64, Ordering::Relaxed)
                    + chunk.len() as u64;
                progress(upload_percent(done, total));
                Ok::<_, std::io::Error>(chunk)
            });

            let part = multipart::Part::stream_with_length(Body::wrap_stream(stream), len)
                .file_name(file.file_name)
                .mime_str(&file.content_type)
                .map_err(|e| ApiError::Validation(format!("invalid content type: {}", e)))?;
            form = form.part("files", part);
        }

        debug!(total_bytes = total, "Uploading invoice files");
        let started = Instant::now();
        let result = async {
            let response = self
                .client
                .post(self.url("/api/upload"))
                .timeout(Duration::from_secs(self.config.upload_timeout_secs))
                .multipart(form)
                .send()
                .await
                .map_err(map_send_error)?;
            let response = ensure_success(response).await?;
            decode_json::<WireUploadResponse>(response).await
        }
        .await;
        observe("upload", started, result.is_ok());

        let upload = result?.into_upload_result();
        metrics::UPLOAD_BYTES.inc_by(total);
        progress(100);
        Ok(upload)
    }
}

#[async_trait]
impl ProcessStarter for HttpJobApi {
    async fn start(
        &self,
        upload_id: &str,
        options: &ProcessOptions,
    ) -> Result<StartResult, ApiError> {
        options.validate()?;

        let started = Instant::now();
        let result = async {
            let response = self
                .client
                .post(self.url("/api/process"))
                .json(&WireStartRequest::new(upload_id, options))
                .send()
                .await
                .map_err(map_send_error)?;
            let response = ensure_success(response).await?;
            decode_json::<WireStartResponse>(response).await
        }
        .await;
        observe("start", started, result.is_ok());

        Ok(result?.into_start_result())
    }
}

#[async_trait]
impl StatusFetcher for HttpJobApi {
    async fn fetch_status(&self, job_id: &str) -> Result<StatusRecord, ApiError> {
        let endpoint = format!("/api/status/{}", urlencoding::encode(job_id));

        let started = Instant::now();
        let result = async {
            let response = self
                .client
                .get(self.url(&endpoint))
                .send()
                .await
                .map_err(map_send_error)?;
            let response = ensure_success(response).await?;
            decode_json::<WireStatusResponse>(response).await
        }
        .await;
        observe("status", started, result.is_ok());

        Ok(result?.into_status_record())
    }
}

#[async_trait]
impl ArtifactFetcher for HttpJobApi {
    async fn fetch_artifact(
        &self,
        job_id: &str,
        format: OutputFormat,
    ) -> Result<RawArtifact, ApiError> {
        let endpoint = format!(
            "/api/download/{}?format={}",
            urlencoding::encode(job_id),
            format.as_str()
        );

        let started = Instant::now();
        let result = async {
            let response = self
                .client
                .get(self.url(&endpoint))
                .send()
                .await
                .map_err(map_send_error)?;
            let response = ensure_success(response).await?;

            let headers = response.headers();
            let content_type = headers
                .get(CONTENT_TYPE)
                .and_then(|v| v.to_str().ok())
                .map(str::to_string);
            let file_name = headers
                .get(CONTENT_DISPOSITION)
                .and_then(|v| v.to_str().ok())
                .and_then(parse_content_disposition);
            if content_type.is_none() {
                warn!(job_id, "Download response has no content type");
            }

            let data = response.bytes().await.map_err(map_send_error)?.to_vec();
            Ok::<_, ApiError>(RawArtifact {
                content_type,
                file_name,
                data,
            })
        }
        .await;
        observe("download", started, result.is_ok());

        result
    }
}
