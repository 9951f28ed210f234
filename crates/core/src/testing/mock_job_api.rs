//! Mock consolidation backend for testing.

use async_trait::async_trait;
use chrono::Utc;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::{Notify, RwLock, Semaphore};

use crate::api::{
    ApiError, ArtifactFetcher, FileAcceptance, JobSubmitter, OutputFormat, ProcessOptions,
    ProcessStarter, ProgressCallback, RawArtifact, StartResult, StatusFetcher, UploadFile,
    UploadResult,
};
use crate::job::{JobStatus, StatusRecord};

use super::fixtures;

/// A recorded upload for test assertions.
#[derive(Debug, Clone)]
pub struct RecordedUpload {
    /// Names of the uploaded files, in order.
    pub file_names: Vec<String>,
    /// Total payload size.
    pub total_bytes: usize,
    pub timestamp: chrono::DateTime<Utc>,
}

/// A recorded start-processing call.
#[derive(Debug, Clone)]
pub struct RecordedStart {
    pub upload_id: String,
    pub options: ProcessOptions,
    pub timestamp: chrono::DateTime<Utc>,
}

/// Pauses requests until the test lets them through.
#[derive(Debug)]
struct Gate {
    entered: Notify,
    permits: Semaphore,
}

impl Gate {
    fn new() -> Self {
        Self {
            entered: Notify::new(),
            permits: Semaphore::new(0),
        }
    }

    async fn pass(&self) {
        self.entered.notify_one();
        if let Ok(permit) = self.permits.acquire().await {
            permit.forget();
        }
    }
}

/// Mock implementation of every backend collaborator trait.
///
/// Provides controllable behavior for testing:
/// - Scripted status responses (the last one repeats once the script runs out)
/// - One-shot failures for upload and start
/// - Gates that hold requests in flight for race tests
///
/// # Example
///
/// ```rust,ignore
/// let api = Arc::new(MockJobApi::new());
/// api.push_status(fixtures::status(JobStatus::Extracting, 40)).await;
/// api.push_status(fixtures::completed(3)).await;
///
/// let orchestrator = WorkflowOrchestrator::new(
///     WorkflowConfig::default(),
///     PollerConfig::default(),
///     api.clone(),
///     api.clone(),
///     api.clone(),
/// );
/// ```
#[derive(Debug)]
pub struct MockJobApi {
    uploads: Arc<RwLock<Vec<RecordedUpload>>>,
    starts: Arc<RwLock<Vec<RecordedStart>>>,
    /// Per-file verdicts for the next uploads; all files accepted when empty.
    rejected_files: Arc<RwLock<Vec<(String, String)>>>,
    upload_progress_steps: Arc<RwLock<Vec<u8>>>,
    next_upload_error: Arc<RwLock<Option<ApiError>>>,
    next_start_error: Arc<RwLock<Option<ApiError>>>,
    statuses: Arc<RwLock<VecDeque<Result<StatusRecord, ApiError>>>>,
    last_status: Arc<RwLock<Option<Result<StatusRecord, ApiError>>>>,
    artifact: Arc<RwLock<Result<RawArtifact, ApiError>>>,
    status_calls: AtomicUsize,
    artifact_calls: AtomicUsize,
    id_counter: AtomicUsize,
    upload_gate: Arc<RwLock<Option<Arc<Gate>>>>,
    status_gate: Arc<RwLock<Option<Arc<Gate>>>>,
}

impl Default for MockJobApi {
    fn default() -> Self {
        Self::new()
    }
}

impl MockJobApi {
    pub fn new() -> Self {
        Self {
            uploads: Arc::new(RwLock::new(Vec::new())),
            starts: Arc::new(RwLock::new(Vec::new())),
            rejected_files: Arc::new(RwLock::new(Vec::new())),
            upload_progress_steps: Arc::new(RwLock::new(vec![25, 50, 75, 100])),
            next_upload_error: Arc::new(RwLock::new(None)),
            next_start_error: Arc::new(RwLock::new(None)),
            statuses: Arc::new(RwLock::new(VecDeque::new())),
            last_status: Arc::new(RwLock::new(None)),
            artifact: Arc::new(RwLock::new(Ok(fixtures::xlsx_artifact()))),
            status_calls: AtomicUsize::new(0),
            artifact_calls: AtomicUsize::new(0),
            id_counter: AtomicUsize::new(0),
            upload_gate: Arc::new(RwLock::new(None)),
            status_gate: Arc::new(RwLock::new(None)),
        }
    }

    // Scripting

    /// Queue a successful status response.
    pub async fn push_status(&self, record: StatusRecord) {
        self.statuses.write().await.push_back(Ok(record));
    }

    /// Queue a failed status poll.
    pub async fn push_status_error(&self, error: ApiError) {
        self.statuses.write().await.push_back(Err(error));
    }

    /// Reject `file_name` with `message` in upload responses.
    pub async fn reject_file(&self, file_name: impl Into<String>, message: impl Into<String>) {
        self.rejected_files
            .write()
            .await
            .push((file_name.into(), message.into()));
    }

    /// Percentages reported through the upload progress callback.
    pub async fn set_upload_progress(&self, steps: Vec<u8>) {
        *self.upload_progress_steps.write().await = steps;
    }

    /// Make the next upload fail.
    pub async fn fail_next_upload(&self, error: ApiError) {
        *self.next_upload_error.write().await = Some(error);
    }

    /// Make the next start-processing call fail.
    pub async fn fail_next_start(&self, error: ApiError) {
        *self.next_start_error.write().await = Some(error);
    }

    /// Response for every download request.
    pub async fn set_artifact(&self, artifact: Result<RawArtifact, ApiError>) {
        *self.artifact.write().await = artifact;
    }

    // Gates

    /// Hold uploads in flight until [`release_uploads`](Self::release_uploads).
    pub async fn hold_uploads(&self) {
        *self.upload_gate.write().await = Some(Arc::new(Gate::new()));
    }

    /// Let `n` held uploads through.
    pub async fn release_uploads(&self, n: usize) {
        if let Some(gate) = self.upload_gate.read().await.as_ref() {
            gate.permits.add_permits(n);
        }
    }

    /// Wait until an upload reaches the gate.
    pub async fn upload_in_flight(&self) {
        let gate = self.upload_gate.read().await.clone();
        if let Some(gate) = gate {
            gate.entered.notified().await;
        }
    }

    /// Hold status polls in flight until [`release_status`](Self::release_status).
    pub async fn hold_status(&self) {
        *self.status_gate.write().await = Some(Arc::new(Gate::new()));
    }

    /// Let `n` held status polls through.
    pub async fn release_status(&self, n: usize) {
        if let Some(gate) = self.status_gate.read().await.as_ref() {
            gate.permits.add_permits(n);
        }
    }

    /// Wait until a status poll reaches the gate.
    pub async fn status_in_flight(&self) {
        let gate = self.status_gate.read().await.clone();
        if let Some(gate) = gate {
            gate.entered.notified().await;
        }
    }

    // Assertions

    pub async fn uploads(&self) -> Vec<RecordedUpload> {
        self.uploads.read().await.clone()
    }

    pub async fn starts(&self) -> Vec<RecordedStart> {
        self.starts.read().await.clone()
    }

    /// Number of status polls issued, including ones still held at the gate.
    pub fn status_calls(&self) -> usize {
        self.status_calls.load(Ordering::SeqCst)
    }

    pub fn artifact_calls(&self) -> usize {
        self.artifact_calls.load(Ordering::SeqCst)
    }

    fn next_id(&self, prefix: &str) -> String {
        let n = self.id_counter.fetch_add(1, Ordering::SeqCst) + 1;
        format!("{}-{}", prefix, n)
    }
}

#[async_trait]
impl JobSubmitter for MockJobApi {
    async fn submit(
        &self,
        files: Vec<UploadFile>,
        progress: ProgressCallback,
    ) -> Result<UploadResult, ApiError> {
        self.uploads.write().await.push(RecordedUpload {
            file_names: files.iter().map(|f| f.file_name.clone()).collect(),
            total_bytes: files.iter().map(UploadFile::len).sum(),
            timestamp: Utc::now(),
        });

        let gate = self.upload_gate.read().await.clone();
        if let Some(gate) = gate {
            gate.pass().await;
        }

        if let Some(error) = self.next_upload_error.write().await.take() {
            return Err(error);
        }

        for step in self.upload_progress_steps.read().await.iter() {
            progress(*step);
        }

        let rejected = self.rejected_files.read().await;
        let verdicts = files
            .iter()
            .map(|f| {
                let rejection = rejected.iter().find(|(name, _)| *name == f.file_name);
                FileAcceptance {
                    file_name: f.file_name.clone(),
                    accepted: rejection.is_none(),
                    message: rejection.map(|(_, message)| message.clone()),
                }
            })
            .collect::<Vec<_>>();

        Ok(UploadResult {
            upload_id: uuid::Uuid::new_v4().to_string(),
            file_count: verdicts.iter().filter(|v| v.accepted).count() as u32,
            files: verdicts,
        })
    }
}

#[async_trait]
impl ProcessStarter for MockJobApi {
    async fn start(
        &self,
        upload_id: &str,
        options: &ProcessOptions,
    ) -> Result<StartResult, ApiError> {
        options.validate()?;

        self.starts.write().await.push(RecordedStart {
            upload_id: upload_id.to_string(),
            options: options.clone(),
            timestamp: Utc::now(),
        });

        if let Some(error) = self.next_start_error.write().await.take() {
            return Err(error);
        }

        Ok(StartResult {
            job_id: self.next_id("job"),
            status: JobStatus::Pending,
            estimated_time_secs: Some(30),
        })
    }
}

#[async_trait]
impl StatusFetcher for MockJobApi {
    async fn fetch_status(&self, _job_id: &str) -> Result<StatusRecord, ApiError> {
        self.status_calls.fetch_add(1, Ordering::SeqCst);

        let gate = self.status_gate.read().await.clone();
        if let Some(gate) = gate {
            gate.pass().await;
        }

        let next = self.statuses.write().await.pop_front();
        let mut last = self.last_status.write().await;
        match next {
            Some(response) => {
                *last = Some(response.clone());
                response
            }
            None => last
                .clone()
                .unwrap_or_else(|| Err(ApiError::Network("no scripted status".to_string()))),
        }
    }
}

#[async_trait]
impl ArtifactFetcher for MockJobApi {
    async fn fetch_artifact(
        &self,
        _job_id: &str,
        _format: OutputFormat,
    ) -> Result<RawArtifact, ApiError> {
        self.artifact_calls.fetch_add(1, Ordering::SeqCst);
        self.artifact.read().await.clone()
    }
}
