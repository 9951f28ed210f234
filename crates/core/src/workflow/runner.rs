//! Workflow orchestrator implementation.
//!
//! Drives one job at a time through upload, processing and polling:
//! - Upload and start are awaited inline by `submit()`
//! - Polling runs on the poller's task; its events are folded in by a
//!   consumer task bound to the attempt that started it
//!
//! Every mutation goes through one lock and is checked against the current
//! attempt, so work belonging to a cancelled or superseded attempt never
//! touches the state.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::api::{
    JobSubmitter, OutputFormat, ProcessOptions, ProcessStarter, ProgressCallback,
    StatusFetcher, UploadFile,
};
use crate::download::{Artifact, DownloadError, DownloadTrigger};
use crate::job::{JobHandle, JobStatus};
use crate::metrics;
use crate::poller::{PollEvent, PollEvents, PollerConfig, StatusPoller};

use super::config::WorkflowConfig;
use super::progress::aggregate_progress;
use super::types::{ErrorPhase, WorkflowError, WorkflowPhase, WorkflowState};

/// Runs upload, processing and polling for one job at a time.
///
/// Dropping the orchestrator stops any active poller.
pub struct WorkflowOrchestrator {
    inner: Arc<Inner>,
}

struct Inner {
    config: WorkflowConfig,
    poller_config: PollerConfig,
    submitter: Arc<dyn JobSubmitter>,
    starter: Arc<dyn ProcessStarter>,
    fetcher: Arc<dyn StatusFetcher>,
    slot: Mutex<Slot>,
    state_tx: watch::Sender<WorkflowState>,
}

/// Everything owned by the current attempt.
struct Slot {
    /// Bumped on every submit, cancel and reset.
    attempt: u64,
    token: CancellationToken,
    state: WorkflowState,
    job: Option<JobHandle>,
    poller: Option<StatusPoller>,
}

impl Slot {
    fn is_current(&self, attempt: u64) -> bool {
        self.attempt == attempt && !self.token.is_cancelled()
    }

    /// Release the attempt's poller and abort its in-flight calls.
    fn teardown(&mut self) {
        self.token.cancel();
        if let Some(poller) = self.poller.take() {
            poller.stop();
        }
    }

    /// Tear down and start a fresh attempt in `Idle`.
    fn clear(&mut self) {
        self.teardown();
        self.attempt += 1;
        self.token = CancellationToken::new();
        self.state = WorkflowState::default();
        self.job = None;
    }

    fn sync_from_job(&mut self) {
        if let Some(job) = &self.job {
            self.state.job_id = job.job_id().map(str::to_string);
            self.state.processing_progress = job.progress();
            self.state.current_step = job.current_step().to_string();
            self.state.errors = job.errors().to_vec();
            self.state.result = job.result().cloned();
        }
    }
}

impl WorkflowOrchestrator {
    /// Create an idle orchestrator.
    pub fn new(
        config: WorkflowConfig,
        poller_config: PollerConfig,
        submitter: Arc<dyn JobSubmitter>,
        starter: Arc<dyn ProcessStarter>,
        fetcher: Arc<dyn StatusFetcher>,
    ) -> Self {
        let (state_tx, _) = watch::channel(WorkflowState::default());

        Self {
            inner: Arc::new(Inner {
                config,
                poller_config,
                submitter,
                starter,
                fetcher,
                slot: Mutex::new(Slot {
                    attempt: 0,
                    token: CancellationToken::new(),
                    state: WorkflowState::default(),
                    job: None,
                    poller: None,
                }),
                state_tx,
            }),
        }
    }

    /// Upload `files`, start processing and begin polling.
    ///
    /// Returns the job id once polling has started; the rest of the job is
    /// observed through [`state`](Self::state) or [`subscribe`](Self::subscribe).
    /// Any previous attempt is torn down first. Returns
    /// [`WorkflowError::Cancelled`] if this attempt is superseded before
    /// polling starts.
    pub async fn submit(
        &self,
        files: Vec<UploadFile>,
        options: ProcessOptions,
    ) -> Result<String, WorkflowError> {
        let (attempt, token) = self.inner.begin_attempt();
        let file_count = files.len();

        if files.is_empty() {
            return Err(self.inner.fail_attempt(
                attempt,
                WorkflowError::Validation {
                    phase: ErrorPhase::Upload,
                    message: "no files to upload".to_string(),
                },
            ));
        }
        if let Err(e) = options.validate() {
            return Err(self
                .inner
                .fail_attempt(attempt, WorkflowError::from_api(ErrorPhase::Processing, e)));
        }

        info!(attempt, files = file_count, "Uploading invoices");

        let progress = self.inner.progress_callback(attempt);
        let uploaded = tokio::select! {
            biased;
            _ = token.cancelled() => return Err(WorkflowError::Cancelled),
            uploaded = self.inner.submitter.submit(files, progress) => uploaded,
        };

        let upload = match uploaded {
            Ok(upload) => upload,
            Err(e) => {
                return Err(self
                    .inner
                    .fail_attempt(attempt, WorkflowError::from_api(ErrorPhase::Upload, e)));
            }
        };

        let rejections = upload.rejections();
        let accepted = upload.accepted_count();
        {
            let mut slot = self.inner.lock();
            if !slot.is_current(attempt) {
                return Err(WorkflowError::Cancelled);
            }

            let mut job = JobHandle::new(upload.upload_id.clone());
            job.record_errors(&rejections);
            slot.job = Some(job);
            slot.sync_from_job();
            slot.state.upload_id = Some(upload.upload_id.clone());
            slot.state.upload_progress = 100;
            slot.state.current_step = "Starting processing".to_string();
            self.inner.refresh_progress(&mut slot);

            if accepted == 0 {
                let error = WorkflowError::Validation {
                    phase: ErrorPhase::Upload,
                    message: format!("all {} files were rejected", file_count),
                };
                self.inner.fail(&mut slot, error.clone());
                self.inner.publish(&slot);
                return Err(error);
            }
            self.inner.publish(&slot);
        }

        if !rejections.is_empty() {
            warn!(
                upload_id = %upload.upload_id,
                rejected = rejections.len(),
                accepted,
                "Some files were rejected by the server"
            );
        }
        info!(upload_id = %upload.upload_id, accepted, "Upload complete, starting processing");

        let started = tokio::select! {
            biased;
            _ = token.cancelled() => return Err(WorkflowError::Cancelled),
            started = self.inner.starter.start(&upload.upload_id, &options) => started,
        };

        let start = match started {
            Ok(start) => start,
            Err(e) => {
                return Err(self
                    .inner
                    .fail_attempt(attempt, WorkflowError::from_api(ErrorPhase::Processing, e)));
            }
        };

        self.inner.begin_polling(attempt, &start.job_id)?;

        info!(
            job_id = %start.job_id,
            estimated_secs = ?start.estimated_time_secs,
            "Processing started"
        );
        Ok(start.job_id)
    }

    /// Abort the current job and return to `Idle`.
    ///
    /// Idempotent and safe from any state. Nothing from the aborted attempt
    /// reaches the state afterwards, including responses already in flight.
    pub fn cancel(&self) {
        let mut slot = self.inner.lock();
        if slot.state.phase.is_active() {
            info!(job_id = ?slot.state.job_id, "Cancelling workflow");
            metrics::WORKFLOWS_TOTAL
                .with_label_values(&["cancelled"])
                .inc();
        }
        slot.clear();
        self.inner.publish(&slot);
    }

    /// Discard the current job, errors included, and return to `Idle`.
    ///
    /// Same teardown as [`cancel`](Self::cancel).
    pub fn reset(&self) {
        let mut slot = self.inner.lock();
        if slot.state.phase.is_active() {
            metrics::WORKFLOWS_TOTAL
                .with_label_values(&["cancelled"])
                .inc();
        }
        debug!(phase = %slot.state.phase, "Resetting workflow");
        slot.clear();
        self.inner.publish(&slot);
    }

    /// Acknowledge a failure. Returns `false` unless the workflow had failed.
    pub fn clear_error(&self) -> bool {
        let mut slot = self.inner.lock();
        if slot.state.phase != WorkflowPhase::Failed {
            return false;
        }
        slot.clear();
        self.inner.publish(&slot);
        true
    }

    /// Current state snapshot.
    pub fn state(&self) -> WorkflowState {
        self.inner.lock().state.clone()
    }

    /// The current job, once the upload has been accepted.
    pub fn job(&self) -> Option<JobHandle> {
        self.inner.lock().job.clone()
    }

    /// Receive every published state.
    pub fn subscribe(&self) -> watch::Receiver<WorkflowState> {
        self.inner.state_tx.subscribe()
    }

    /// Wait until nothing is in flight. Resolves immediately when idle.
    pub async fn wait_until_settled(&self) -> WorkflowState {
        let mut rx = self.subscribe();
        let settled = rx.wait_for(WorkflowState::is_settled).await.map(|s| (*s).clone());
        match settled {
            Ok(state) => state,
            Err(_) => self.state(),
        }
    }

    /// Download the completed job's report.
    ///
    /// Only available in `Completed`, partial successes included. Failures are
    /// tagged with the download phase and leave the workflow phase unchanged.
    pub async fn download(
        &self,
        trigger: &DownloadTrigger,
        format: OutputFormat,
    ) -> Result<Artifact, WorkflowError> {
        let job_id = {
            let slot = self.inner.lock();
            match (&slot.state.phase, &slot.state.job_id) {
                (WorkflowPhase::Completed, Some(job_id)) => job_id.clone(),
                (phase, _) => {
                    return Err(WorkflowError::Validation {
                        phase: ErrorPhase::Download,
                        message: format!("no completed job to download (workflow is {})", phase),
                    });
                }
            }
        };

        trigger
            .download(&job_id, format)
            .await
            .map_err(|e| match e {
                DownloadError::Api(e) => WorkflowError::from_api(ErrorPhase::Download, e),
                DownloadError::Integrity { message } => WorkflowError::DownloadIntegrity { message },
                DownloadError::Io(e) => WorkflowError::LocalIo {
                    message: e.to_string(),
                },
            })
    }
}

impl Drop for WorkflowOrchestrator {
    fn drop(&mut self) {
        self.inner.lock().teardown();
    }
}

impl Inner {
    fn lock(&self) -> MutexGuard<'_, Slot> {
        self.slot.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Publish under the slot lock so subscribers see states in order.
    fn publish(&self, slot: &Slot) {
        self.state_tx.send_replace(slot.state.clone());
    }

    fn begin_attempt(&self) -> (u64, CancellationToken) {
        let mut slot = self.lock();
        if slot.state.phase.is_active() {
            info!(job_id = ?slot.state.job_id, "Superseding active workflow");
            metrics::WORKFLOWS_TOTAL
                .with_label_values(&["cancelled"])
                .inc();
        }
        slot.clear();
        slot.state.phase = WorkflowPhase::Uploading;
        slot.state.current_step = "Uploading".to_string();
        self.publish(&slot);
        (slot.attempt, slot.token.clone())
    }

    fn refresh_progress(&self, slot: &mut Slot) {
        let next = aggregate_progress(
            slot.state.phase,
            slot.state.upload_progress,
            slot.state.processing_progress,
            self.config.weight(),
            slot.state.aggregate_progress,
        );
        slot.state.aggregate_progress = match slot.state.phase {
            WorkflowPhase::Uploading | WorkflowPhase::Processing => {
                next.max(slot.state.aggregate_progress)
            }
            _ => next,
        };
    }

    fn fail(&self, slot: &mut Slot, error: WorkflowError) {
        slot.teardown();
        warn!(
            job_id = ?slot.state.job_id,
            phase = ?error.phase(),
            error = %error,
            "Workflow failed"
        );
        slot.state.phase = WorkflowPhase::Failed;
        slot.state.error = Some(error);
        metrics::WORKFLOWS_TOTAL.with_label_values(&["failed"]).inc();
    }

    /// Fail `attempt` if it is still current. A superseded attempt gets
    /// [`WorkflowError::Cancelled`] and leaves the state alone.
    fn fail_attempt(&self, attempt: u64, error: WorkflowError) -> WorkflowError {
        let mut slot = self.lock();
        if !slot.is_current(attempt) {
            return WorkflowError::Cancelled;
        }
        self.fail(&mut slot, error.clone());
        self.publish(&slot);
        error
    }

    fn progress_callback(self: &Arc<Self>, attempt: u64) -> ProgressCallback {
        let inner = Arc::downgrade(self);
        Arc::new(move |percent| {
            if let Some(inner) = inner.upgrade() {
                inner.record_upload_progress(attempt, percent);
            }
        })
    }

    fn record_upload_progress(&self, attempt: u64, percent: u8) {
        let mut slot = self.lock();
        if !slot.is_current(attempt) || slot.state.phase != WorkflowPhase::Uploading {
            return;
        }
        let percent = percent.min(100);
        if percent <= slot.state.upload_progress {
            return;
        }
        slot.state.upload_progress = percent;
        self.refresh_progress(&mut slot);
        self.publish(&slot);
    }

    fn begin_polling(self: &Arc<Self>, attempt: u64, job_id: &str) -> Result<(), WorkflowError> {
        let mut slot = self.lock();
        if !slot.is_current(attempt) {
            return Err(WorkflowError::Cancelled);
        }

        if let Some(job) = slot.job.as_mut() {
            if let Err(e) = job.assign_job_id(job_id) {
                warn!(error = %e, "Ignoring second job id for the same upload");
            }
        }

        let mut poller = StatusPoller::new(self.poller_config.clone());
        let events = match poller.start(job_id, Arc::clone(&self.fetcher)) {
            Ok(events) => events,
            Err(e) => {
                let error = WorkflowError::Server {
                    phase: ErrorPhase::Processing,
                    status: None,
                    message: e.to_string(),
                };
                self.fail(&mut slot, error.clone());
                self.publish(&slot);
                return Err(error);
            }
        };

        slot.poller = Some(poller);
        slot.sync_from_job();
        slot.state.phase = WorkflowPhase::Processing;
        slot.state.current_step = JobStatus::Pending.as_str().to_string();
        self.refresh_progress(&mut slot);
        self.publish(&slot);

        tokio::spawn(consume_events(Arc::downgrade(self), attempt, events));
        Ok(())
    }

    fn handle_event(&self, attempt: u64, event: PollEvent) {
        let mut slot = self.lock();
        if !slot.is_current(attempt) {
            debug!(attempt, "Discarding event from superseded poller");
            return;
        }

        match event {
            PollEvent::StatusUpdate(record) => {
                if let Some(job) = slot.job.as_mut() {
                    job.apply(&record);
                }
                slot.sync_from_job();

                match record.status {
                    JobStatus::Completed => {
                        slot.teardown();
                        slot.state.phase = WorkflowPhase::Completed;
                        slot.state.aggregate_progress = 100;
                        metrics::WORKFLOWS_TOTAL
                            .with_label_values(&["completed"])
                            .inc();
                        info!(
                            job_id = ?slot.state.job_id,
                            file_errors = slot.state.errors.len(),
                            "Workflow completed"
                        );
                    }
                    JobStatus::Failed => {
                        let message = record
                            .error
                            .clone()
                            .unwrap_or_else(|| "the server reported the job as failed".to_string());
                        self.fail(&mut slot, WorkflowError::JobFailed { message });
                    }
                    _ => self.refresh_progress(&mut slot),
                }
            }
            PollEvent::ConnectionLost {
                attempts,
                last_error,
            } => {
                self.fail(
                    &mut slot,
                    WorkflowError::Connection {
                        attempts,
                        message: last_error.to_string(),
                    },
                );
            }
            PollEvent::TimedOut { .. } => {
                self.fail(
                    &mut slot,
                    WorkflowError::Timeout {
                        limit_secs: self.poller_config.max_total_duration_secs,
                    },
                );
            }
        }

        self.publish(&slot);
    }

    /// The event stream closed before a terminal event arrived.
    fn poller_exited(&self, attempt: u64) {
        let mut slot = self.lock();
        if !slot.is_current(attempt) || slot.state.phase != WorkflowPhase::Processing {
            return;
        }
        error!(job_id = ?slot.state.job_id, "Status poller exited without a result");
        self.fail(
            &mut slot,
            WorkflowError::Server {
                phase: ErrorPhase::Processing,
                status: None,
                message: "status polling stopped unexpectedly".to_string(),
            },
        );
        self.publish(&slot);
    }
}

/// Fold poller events into the orchestrator until the poller finishes.
async fn consume_events(inner: Weak<Inner>, attempt: u64, mut events: PollEvents) {
    while let Some(event) = events.recv().await {
        let Some(inner) = inner.upgrade() else {
            return;
        };
        let terminal = event.is_terminal();
        inner.handle_event(attempt, event);
        if terminal {
            return;
        }
    }

    if let Some(inner) = inner.upgrade() {
        inner.poller_exited(attempt);
    }
}
