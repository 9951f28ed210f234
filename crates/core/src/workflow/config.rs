//! Workflow configuration.

use serde::{Deserialize, Serialize};

/// Configuration for the workflow orchestrator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowConfig {
    /// Share of the aggregate progress bar given to the upload (0.0-1.0).
    /// Processing gets the remainder.
    #[serde(default = "default_upload_weight")]
    pub upload_weight: f64,
}

fn default_upload_weight() -> f64 {
    0.3
}

impl Default for WorkflowConfig {
    fn default() -> Self {
        Self {
            upload_weight: default_upload_weight(),
        }
    }
}

impl WorkflowConfig {
    /// Upload weight clamped into `[0, 1]`.
    pub fn weight(&self) -> f64 {
        if self.upload_weight.is_nan() {
            default_upload_weight()
        } else {
            self.upload_weight.clamp(0.0, 1.0)
        }
    }
}
