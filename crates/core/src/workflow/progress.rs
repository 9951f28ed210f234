//! Aggregate progress.

use super::types::WorkflowPhase;

/// Blend upload and processing progress into one 0..=100 value.
///
/// `previous` is returned unchanged for `Failed`, which freezes the bar
/// where the failure happened.
pub fn aggregate_progress(
    phase: WorkflowPhase,
    upload: u8,
    processing: u8,
    upload_weight: f64,
    previous: u8,
) -> u8 {
    let w = upload_weight.clamp(0.0, 1.0);
    let value = match phase {
        WorkflowPhase::Idle => 0.0,
        WorkflowPhase::Uploading => f64::from(upload.min(100)) * w,
        WorkflowPhase::Processing => 100.0 * w + f64::from(processing.min(100)) * (1.0 - w),
        WorkflowPhase::Completed => 100.0,
        WorkflowPhase::Failed => return previous,
    };
    value.round().clamp(0.0, 100.0) as u8
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_uploading_scales_by_weight() {
        assert_eq!(aggregate_progress(WorkflowPhase::Uploading, 50, 0, 0.3, 0), 15);
        assert_eq!(aggregate_progress(WorkflowPhase::Uploading, 100, 0, 0.3, 0), 30);
    }

    #[test]
    fn test_processing_starts_after_upload_share() {
        assert_eq!(aggregate_progress(WorkflowPhase::Processing, 100, 0, 0.3, 0), 30);
        assert_eq!(aggregate_progress(WorkflowPhase::Processing, 100, 40, 0.3, 0), 58);
        assert_eq!(aggregate_progress(WorkflowPhase::Processing, 100, 100, 0.3, 0), 100);
    }

    #[test]
    fn test_terminal_phases() {
        assert_eq!(aggregate_progress(WorkflowPhase::Completed, 0, 0, 0.3, 42), 100);
        assert_eq!(aggregate_progress(WorkflowPhase::Failed, 100, 90, 0.3, 42), 42);
        assert_eq!(aggregate_progress(WorkflowPhase::Idle, 100, 90, 0.3, 42), 0);
    }

    #[test]
    fn test_zero_weight_skips_upload() {
        assert_eq!(aggregate_progress(WorkflowPhase::Uploading, 80, 0, 0.0, 0), 0);
        assert_eq!(aggregate_progress(WorkflowPhase::Processing, 100, 25, 0.0, 0), 25);
    }
}
