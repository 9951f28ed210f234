//! Prometheus metrics for core components.
//!
//! This module provides metrics for:
//! - Status polling (attempts, terminations)
//! - Workflows (outcomes, uploaded bytes)
//! - Backend calls and downloads

use once_cell::sync::Lazy;
use prometheus::{HistogramOpts, HistogramVec, IntCounter, IntCounterVec, Opts};

// =============================================================================
// Poller Metrics
// =============================================================================

/// Poll attempts by result.
pub static POLL_ATTEMPTS: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("consolidator_poll_attempts_total", "Total status poll attempts"),
        &["result"], // "success", "error"
    )
    .unwrap()
});

/// Poller terminations by reason.
pub static POLLER_TERMINATIONS: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new(
            "consolidator_poller_terminations_total",
            "Total pollers that reached a terminal state",
        ),
        &["reason"], // "completed", "failed", "stopped", "timed_out", "connection_lost"
    )
    .unwrap()
});

// =============================================================================
// Workflow Metrics
// =============================================================================

/// Workflows by outcome.
pub static WORKFLOWS_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("consolidator_workflows_total", "Total workflows by outcome"),
        &["outcome"], // "completed", "failed", "cancelled"
    )
    .unwrap()
});

/// Bytes handed to the transport by uploads.
pub static UPLOAD_BYTES: Lazy<IntCounter> = Lazy::new(|| {
    IntCounter::new("consolidator_upload_bytes_total", "Total bytes uploaded").unwrap()
});

// =============================================================================
// Backend Metrics
// =============================================================================

/// Backend request duration.
pub static BACKEND_REQUEST_DURATION: Lazy<HistogramVec> = Lazy::new(|| {
    HistogramVec::new(
        HistogramOpts::new(
            "consolidator_backend_request_duration_seconds",
            "Duration of backend calls",
        )
        .buckets(vec![0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 120.0]),
        &["operation", "status"], // status: "success", "error"
    )
    .unwrap()
});

/// Downloads by result.
pub static DOWNLOADS_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("consolidator_downloads_total", "Total report downloads"),
        &["result"], // "success", "integrity_error", "error"
    )
    .unwrap()
});

// =============================================================================
// Helper functions
// =============================================================================

/// Get all core metrics for registration in a registry.
pub fn all_metrics() -> Vec<Box<dyn prometheus::core::Collector>> {
    vec![
        Box::new(POLL_ATTEMPTS.clone()),
        Box::new(POLLER_TERMINATIONS.clone()),
        Box::new(WORKFLOWS_TOTAL.clone()),
        Box::new(UPLOAD_BYTES.clone()),
        Box::new(BACKEND_REQUEST_DURATION.clone()),
        Box::new(DOWNLOADS_TOTAL.clone()),
    ]
}
