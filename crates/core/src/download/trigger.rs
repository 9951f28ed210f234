//! Download trigger implementation.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tempfile::NamedTempFile;
use tracing::{debug, info, warn};

use crate::api::{
    error_envelope_message, error_message, ArtifactFetcher, OutputFormat, RawArtifact,
};
use crate::metrics;

use super::types::{Artifact, DownloadError};

/// Fetches finished reports and stores them under an output directory.
#[derive(Clone)]
pub struct DownloadTrigger {
    fetcher: Arc<dyn ArtifactFetcher>,
    output_dir: PathBuf,
}

impl DownloadTrigger {
    pub fn new(fetcher: Arc<dyn ArtifactFetcher>, output_dir: impl Into<PathBuf>) -> Self {
        Self {
            fetcher,
            output_dir: output_dir.into(),
        }
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    /// Download the report for `job_id` and save it.
    ///
    /// Error payloads served in place of a report are surfaced as
    /// [`DownloadError::Integrity`] and nothing is written.
    pub async fn download(
        &self,
        job_id: &str,
        format: OutputFormat,
    ) -> Result<Artifact, DownloadError> {
        let result = self.fetch_and_store(job_id, format).await;

        let label = match &result {
            Ok(_) => "success",
            Err(DownloadError::Integrity { .. }) => "integrity_error",
            Err(_) => "error",
        };
        metrics::DOWNLOADS_TOTAL.with_label_values(&[label]).inc();

        result
    }

    async fn fetch_and_store(
        &self,
        job_id: &str,
        format: OutputFormat,
    ) -> Result<Artifact, DownloadError> {
        debug!(job_id = %job_id, format = %format, "Fetching report");
        let raw = self.fetcher.fetch_artifact(job_id, format).await?;

        if let Err(e) = check_integrity(&raw, format) {
            warn!(job_id = %job_id, error = %e, "Discarding error payload served as report");
            return Err(e);
        }

        let file_name = raw
            .file_name
            .as_deref()
            .and_then(sanitize_file_name)
            .unwrap_or_else(|| default_file_name(job_id, format));

        tokio::fs::create_dir_all(&self.output_dir).await?;
        let destination = self.output_dir.join(&file_name);
        let size_bytes = raw.data.len() as u64;

        let dir = self.output_dir.clone();
        let target = destination.clone();
        let data = raw.data;
        tokio::task::spawn_blocking(move || persist(&dir, &target, &data))
            .await
            .map_err(std::io::Error::other)??;

        info!(
            job_id = %job_id,
            path = %destination.display(),
            size_bytes,
            "Report saved"
        );

        Ok(Artifact {
            job_id: job_id.to_string(),
            format,
            path: destination,
            file_name,
            content_type: raw.content_type,
            size_bytes,
        })
    }
}

/// Write `data` through a temp file in `dir` and move it onto `target`.
/// The temp file is removed if any step fails.
fn persist(dir: &Path, target: &Path, data: &[u8]) -> std::io::Result<()> {
    let mut file = NamedTempFile::new_in(dir)?;
    file.write_all(data)?;
    file.as_file().sync_all()?;
    file.persist(target).map_err(|e| e.error)?;
    Ok(())
}

/// Reject bodies that are really error responses.
///
/// For binary formats any JSON content type is an error. For the JSON format
/// only a body consisting solely of an error envelope counts.
pub(crate) fn check_integrity(
    raw: &RawArtifact,
    format: OutputFormat,
) -> Result<(), DownloadError> {
    let is_json = raw
        .content_type
        .as_deref()
        .map(is_json_content_type)
        .unwrap_or(false);

    if format == OutputFormat::Json {
        if let Some(message) = error_envelope_message(&raw.data) {
            return Err(DownloadError::Integrity { message });
        }
    } else if is_json {
        let message = error_message(&String::from_utf8_lossy(&raw.data)).unwrap_or_else(|| {
            format!("expected a {} report but received JSON", format.as_str())
        });
        return Err(DownloadError::Integrity { message });
    }

    if raw.data.is_empty() {
        return Err(DownloadError::Integrity {
            message: "server returned an empty report".to_string(),
        });
    }

    Ok(())
}

fn is_json_content_type(content_type: &str) -> bool {
    let essence = content_type
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase();
    essence == "application/json" || essence.ends_with("+json")
}

/// Reduce a server-provided name to a safe single path component.
pub(crate) fn sanitize_file_name(name: &str) -> Option<String> {
    let base = name.rsplit(['/', '\\']).next().unwrap_or_default();
    let cleaned: String = base
        .chars()
        .map(|c| match c {
            '<' | '>' | ':' | '"' | '|' | '?' | '*' => '_',
            c if c.is_control() => '_',
            c => c,
        })
        .collect();
    let cleaned = cleaned.trim().trim_start_matches('.').trim();

    if cleaned.is_empty() {
        None
    } else {
        Some(cleaned.to_string())
    }
}

fn default_file_name(job_id: &str, format: OutputFormat) -> String {
    let id = sanitize_file_name(job_id).unwrap_or_else(|| "report".to_string());
    format!("consolidated_{}.{}", id, format.extension())
}
