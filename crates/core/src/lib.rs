pub mod api;
pub mod config;
pub mod download;
pub mod job;
pub mod metrics;
pub mod poller;
pub mod testing;
pub mod workflow;

pub use api::{
    ApiError, ArtifactFetcher, ColumnProfile, FileAcceptance, HttpJobApi, JobSubmitter,
    OutputFormat, ProcessOptions, ProcessStarter, ProgressCallback, RawArtifact, StartResult,
    StatusFetcher, UploadFile, UploadResult,
};
pub use config::{
    load_config, load_config_from_str, load_config_or_default, validate_config, ApiConfig, Config,
    ConfigError, DownloadConfig, MAX_TOTAL_DURATION_SECS,
};
pub use download::{Artifact, DownloadError, DownloadTrigger};
pub use job::{FileError, JobHandle, JobHandleError, JobResult, JobStatus, StatusRecord};
pub use poller::{PollEvent, PollEvents, PollerConfig, PollerError, PollerState, StatusPoller};
pub use workflow::{
    aggregate_progress, ErrorPhase, WorkflowConfig, WorkflowError, WorkflowOrchestrator,
    WorkflowPhase, WorkflowState,
};
