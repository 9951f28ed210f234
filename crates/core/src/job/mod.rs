//! Job data model shared by the poller and the workflow orchestrator.
//!
//! A [`JobHandle`] tracks one upload/process attempt from the moment the
//! backend hands out an upload id until the job reaches a terminal status.

mod types;

pub use types::{FileError, JobHandle, JobHandleError, JobResult, JobStatus, StatusRecord};
