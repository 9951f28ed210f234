//! Status poller integration tests.
//!
//! All tests run on a paused clock, so intervals and deadlines elapse
//! instantly and deterministically.

use std::sync::Arc;
use std::time::Duration;

use consolidator_core::{
    testing::{fixtures, MockJobApi},
    ApiError, JobStatus, PollEvent, PollEvents, PollerConfig, PollerState, StatusPoller,
};

fn config(max_consecutive_errors: u32, max_total_duration_secs: u64) -> PollerConfig {
    PollerConfig {
        interval_ms: 2000,
        max_consecutive_errors,
        max_total_duration_secs,
    }
}

async fn drain(events: &mut PollEvents) -> Vec<PollEvent> {
    let mut collected = Vec::new();
    while let Some(event) = events.recv().await {
        collected.push(event);
    }
    collected
}

fn status_updates(events: &[PollEvent]) -> usize {
    events
        .iter()
        .filter(|e| matches!(e, PollEvent::StatusUpdate(_)))
        .count()
}

#[tokio::test(start_paused = true)]
async fn test_processing_then_completed_emits_exactly_two_updates() {
    let api = Arc::new(MockJobApi::new());
    api.push_status(fixtures::status(JobStatus::Processing, 50)).await;
    api.push_status(fixtures::completed(3)).await;

    let mut poller = StatusPoller::new(PollerConfig::default());
    let mut events = poller.start("job-1", api.clone()).unwrap();
    let collected = drain(&mut events).await;

    assert_eq!(collected.len(), 2);
    assert_eq!(status_updates(&collected), 2);
    assert!(collected[1].is_terminal());
    assert_eq!(poller.state(), PollerState::Completed);

    // No third tick is ever scheduled.
    tokio::time::sleep(Duration::from_secs(60)).await;
    assert_eq!(api.status_calls(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_retry_cap_is_exact() {
    let api = Arc::new(MockJobApi::new());
    api.push_status_error(ApiError::Network("connection refused".to_string()))
        .await;

    let mut poller = StatusPoller::new(config(5, 3600));
    let mut events = poller.start("job-1", api.clone()).unwrap();
    let collected = drain(&mut events).await;

    assert_eq!(collected.len(), 1);
    match &collected[0] {
        PollEvent::ConnectionLost {
            attempts,
            last_error,
        } => {
            assert_eq!(*attempts, 5);
            assert!(matches!(last_error, ApiError::Network(_)));
        }
        other => panic!("expected ConnectionLost, got {:?}", other),
    }
    assert_eq!(poller.state(), PollerState::ConnectionLost);

    tokio::time::sleep(Duration::from_secs(60)).await;
    assert_eq!(api.status_calls(), 5);
}

#[tokio::test(start_paused = true)]
async fn test_deadline_wins_over_running_job() {
    let api = Arc::new(MockJobApi::new());
    api.push_status(fixtures::status(JobStatus::Generating, 90)).await;

    let mut poller = StatusPoller::new(config(5, 10));
    let mut events = poller.start("job-1", api.clone()).unwrap();
    let collected = drain(&mut events).await;

    let last = collected.last().unwrap();
    assert!(matches!(last, PollEvent::TimedOut { elapsed } if *elapsed >= Duration::from_secs(10)));
    assert_eq!(status_updates(&collected), collected.len() - 1);
    assert_eq!(poller.state(), PollerState::TimedOut);

    let calls = api.status_calls();
    tokio::time::sleep(Duration::from_secs(60)).await;
    assert_eq!(api.status_calls(), calls);
}

#[tokio::test(start_paused = true)]
async fn test_hung_fetch_cannot_outlive_deadline() {
    let api = Arc::new(MockJobApi::new());
    api.push_status(fixtures::status(JobStatus::Extracting, 10)).await;
    api.hold_status().await;

    let mut poller = StatusPoller::new(config(5, 10));
    let mut events = poller.start("job-1", api.clone()).unwrap();
    let collected = drain(&mut events).await;

    assert_eq!(collected.len(), 1);
    assert!(matches!(collected[0], PollEvent::TimedOut { .. }));
    assert_eq!(api.status_calls(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_errors_below_cap_are_invisible() {
    let api = Arc::new(MockJobApi::new());
    for _ in 0..4 {
        api.push_status_error(ApiError::Timeout).await;
    }
    api.push_status(fixtures::completed(1)).await;

    let mut poller = StatusPoller::new(config(5, 3600));
    let mut events = poller.start("job-1", api.clone()).unwrap();
    let collected = drain(&mut events).await;

    assert_eq!(collected.len(), 1);
    assert!(matches!(
        &collected[0],
        PollEvent::StatusUpdate(record) if record.status == JobStatus::Completed
    ));
    assert_eq!(api.status_calls(), 5);
}

#[tokio::test(start_paused = true)]
async fn test_stop_discards_in_flight_response() {
    let api = Arc::new(MockJobApi::new());
    api.push_status(fixtures::completed(1)).await;
    api.hold_status().await;

    let mut poller = StatusPoller::new(PollerConfig::default());
    let mut events = poller.start("job-1", api.clone()).unwrap();

    api.status_in_flight().await;
    poller.stop();
    api.release_status(1).await;

    assert!(events.recv().await.is_none());
    assert_eq!(poller.state(), PollerState::Stopped);
    assert_eq!(api.status_calls(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_stop_after_terminal_is_noop() {
    let api = Arc::new(MockJobApi::new());
    api.push_status(fixtures::failed("no invoices found")).await;

    let mut poller = StatusPoller::new(PollerConfig::default());
    let mut events = poller.start("job-1", api.clone()).unwrap();
    let collected = drain(&mut events).await;
    assert_eq!(collected.len(), 1);

    poller.stop();
    poller.stop();
    assert_eq!(poller.state(), PollerState::Failed);
    assert!(!poller.is_active());
    assert!(events.recv().await.is_none());
}

#[tokio::test(start_paused = true)]
async fn test_stop_discards_in_flight_failure_at_cap() {
    let api = Arc::new(MockJobApi::new());
    api.push_status_error(ApiError::Network("connection refused".to_string()))
        .await;

    let mut poller = StatusPoller::new(config(3, 3600));
    let mut events = poller.start("job-1", api.clone()).unwrap();

    // Two failures land, the third would hit the cap.
    tokio::time::sleep(Duration::from_secs(3)).await;
    assert_eq!(api.status_calls(), 2);
    api.hold_status().await;
    api.status_in_flight().await;

    poller.stop();
    api.release_status(1).await;

    assert!(events.recv().await.is_none());
    assert_eq!(poller.state(), PollerState::Stopped);
    tokio::time::sleep(Duration::from_secs(60)).await;
    assert_eq!(api.status_calls(), 3);
}

#[tokio::test(start_paused = true)]
async fn test_deadline_fires_between_ticks() {
    let api = Arc::new(MockJobApi::new());
    api.push_status(fixtures::status(JobStatus::Extracting, 30)).await;

    let slow = PollerConfig {
        interval_ms: 5000,
        max_consecutive_errors: 5,
        max_total_duration_secs: 7,
    };
    let mut poller = StatusPoller::new(slow);
    let mut events = poller.start("job-1", api.clone()).unwrap();
    let collected = drain(&mut events).await;

    match collected.last() {
        Some(PollEvent::TimedOut { elapsed }) => {
            assert!(*elapsed >= Duration::from_secs(7));
            assert!(*elapsed < Duration::from_secs(10));
        }
        other => panic!("expected TimedOut, got {:?}", other),
    }
    // Ticks at 0s and 5s; the deadline cuts the wait for the 10s tick.
    assert_eq!(api.status_calls(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_budget_beyond_clock_range_never_expires() {
    let api = Arc::new(MockJobApi::new());
    api.push_status(fixtures::status(JobStatus::Processing, 50)).await;
    api.push_status(fixtures::completed(1)).await;

    let mut poller = StatusPoller::new(config(5, u64::MAX));
    let mut events = poller.start("job-1", api.clone()).unwrap();
    let collected = drain(&mut events).await;

    assert_eq!(status_updates(&collected), 2);
    assert_eq!(poller.state(), PollerState::Completed);
}
