//! Status poller implementation.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::api::StatusFetcher;
use crate::job::JobStatus;
use crate::metrics;

use super::config::PollerConfig;
use super::types::{PollEvent, PollerError, PollerState};

/// Receiving end of a poller's event channel.
///
/// Once the owning poller has been stopped, `recv` returns `None` even if
/// events were still buffered.
#[derive(Debug)]
pub struct PollEvents {
    rx: mpsc::UnboundedReceiver<PollEvent>,
    stop: CancellationToken,
}

impl PollEvents {
    /// Wait for the next event. `None` means the poller is finished.
    pub async fn recv(&mut self) -> Option<PollEvent> {
        if self.stop.is_cancelled() {
            return None;
        }

        let event = tokio::select! {
            biased;
            _ = self.stop.cancelled() => return None,
            event = self.rx.recv() => event,
        };

        if self.stop.is_cancelled() {
            return None;
        }
        event
    }
}

/// Polls one job's status until it settles.
///
/// The backing task is owned exclusively by this value: it is released on
/// every terminal outcome, on `stop()`, and when the poller is dropped.
pub struct StatusPoller {
    config: PollerConfig,
    state: Arc<Mutex<PollerState>>,
    stop: CancellationToken,
    task: Option<JoinHandle<()>>,
    job_id: Option<String>,
}

impl StatusPoller {
    /// Create an idle poller.
    pub fn new(config: PollerConfig) -> Self {
        Self {
            config,
            state: Arc::new(Mutex::new(PollerState::Idle)),
            stop: CancellationToken::new(),
            task: None,
            job_id: None,
        }
    }

    /// Start polling `job_id`. The first poll happens immediately.
    ///
    /// Must be called from within a tokio runtime.
    pub fn start(
        &mut self,
        job_id: impl Into<String>,
        fetcher: Arc<dyn StatusFetcher>,
    ) -> Result<PollEvents, PollerError> {
        {
            let mut state = lock(&self.state);
            if *state != PollerState::Idle {
                return Err(PollerError::AlreadyStarted(*state));
            }
            *state = PollerState::Polling;
        }

        let job_id = job_id.into();
        let (tx, rx) = mpsc::unbounded_channel();

        info!(job_id = %job_id, interval_ms = self.config.interval_ms, "Starting status poller");

        let run = PollRun {
            job_id: job_id.clone(),
            fetcher,
            config: self.config.clone(),
            state: Arc::clone(&self.state),
            stop: self.stop.clone(),
            tx,
        };
        self.task = Some(tokio::spawn(run.run()));
        self.job_id = Some(job_id);

        Ok(PollEvents {
            rx,
            stop: self.stop.clone(),
        })
    }

    /// Stop polling. Idempotent and safe from any state.
    ///
    /// Nothing is emitted after this returns, including the outcome of a
    /// fetch that is still in flight.
    pub fn stop(&self) {
        {
            let mut state = lock(&self.state);
            self.stop.cancel();
            if !state.is_terminal() {
                if *state == PollerState::Polling {
                    debug!(job_id = ?self.job_id, "Stopping status poller");
                    metrics::POLLER_TERMINATIONS
                        .with_label_values(&[PollerState::Stopped.as_str()])
                        .inc();
                }
                *state = PollerState::Stopped;
            }
        }

        if let Some(task) = &self.task {
            task.abort();
        }
    }

    pub fn state(&self) -> PollerState {
        *lock(&self.state)
    }

    /// Whether the poller is still polling.
    pub fn is_active(&self) -> bool {
        self.state() == PollerState::Polling
    }

    pub fn job_id(&self) -> Option<&str> {
        self.job_id.as_deref()
    }

    pub fn config(&self) -> &PollerConfig {
        &self.config
    }
}

impl Drop for StatusPoller {
    fn drop(&mut self) {
        self.stop();
    }
}

fn lock(state: &Mutex<PollerState>) -> MutexGuard<'_, PollerState> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

/// State moved into the polling task.
struct PollRun {
    job_id: String,
    fetcher: Arc<dyn StatusFetcher>,
    config: PollerConfig,
    state: Arc<Mutex<PollerState>>,
    stop: CancellationToken,
    tx: mpsc::UnboundedSender<PollEvent>,
}

impl PollRun {
    async fn run(self) {
        let started = Instant::now();
        let max_duration = self.config.max_total_duration();
        let deadline = started.checked_add(max_duration);
        let mut consecutive_errors: u32 = 0;

        loop {
            if started.elapsed() > max_duration {
                self.time_out(started);
                return;
            }

            debug!(job_id = %self.job_id, "Polling job status");
            let outcome = tokio::select! {
                biased;
                _ = self.stop.cancelled() => return,
                outcome = self.fetcher.fetch_status(&self.job_id) => outcome,
                _ = sleep_until_deadline(deadline) => {
                    self.time_out(started);
                    return;
                }
            };

            match outcome {
                Ok(record) => {
                    consecutive_errors = 0;
                    metrics::POLL_ATTEMPTS.with_label_values(&["success"]).inc();

                    let finished = match record.status {
                        JobStatus::Completed => Some(PollerState::Completed),
                        JobStatus::Failed => Some(PollerState::Failed),
                        _ => None,
                    };
                    debug!(
                        job_id = %self.job_id,
                        status = %record.status,
                        progress = record.progress,
                        "Job status received"
                    );

                    if !self.emit(PollEvent::StatusUpdate(record), finished) || finished.is_some() {
                        return;
                    }
                }
                Err(error) => {
                    consecutive_errors += 1;
                    metrics::POLL_ATTEMPTS.with_label_values(&["error"]).inc();

                    if consecutive_errors >= self.config.max_consecutive_errors {
                        warn!(
                            job_id = %self.job_id,
                            attempts = consecutive_errors,
                            error = %error,
                            "Giving up on status polling"
                        );
                        self.emit(
                            PollEvent::ConnectionLost {
                                attempts: consecutive_errors,
                                last_error: error,
                            },
                            Some(PollerState::ConnectionLost),
                        );
                        return;
                    }

                    warn!(
                        job_id = %self.job_id,
                        attempt = consecutive_errors,
                        max = self.config.max_consecutive_errors,
                        error = %error,
                        "Status poll failed, retrying"
                    );
                }
            }

            tokio::select! {
                biased;
                _ = self.stop.cancelled() => return,
                _ = sleep_until_deadline(deadline) => {
                    self.time_out(started);
                    return;
                }
                _ = tokio::time::sleep(self.config.interval()) => {}
            }
        }
    }

    fn time_out(&self, started: Instant) {
        let elapsed = started.elapsed();
        warn!(
            job_id = %self.job_id,
            elapsed_secs = elapsed.as_secs(),
            "Job did not finish within the polling budget"
        );
        self.emit(PollEvent::TimedOut { elapsed }, Some(PollerState::TimedOut));
    }

    /// Deliver `event`, moving to `next` first when it ends the run.
    ///
    /// Serialized with `StatusPoller::stop` through the state lock, so an
    /// event is either sent before the stop or not at all.
    fn emit(&self, event: PollEvent, next: Option<PollerState>) -> bool {
        let mut state = lock(&self.state);
        if self.stop.is_cancelled() || state.is_terminal() {
            debug!(job_id = %self.job_id, "Discarding poll event after stop");
            return false;
        }

        if let Some(next) = next {
            *state = next;
            metrics::POLLER_TERMINATIONS
                .with_label_values(&[next.as_str()])
                .inc();
        }
        self.tx.send(event).is_ok()
    }
}

/// Sleep until `deadline`. A budget too large for an `Instant` never expires.
async fn sleep_until_deadline(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}
