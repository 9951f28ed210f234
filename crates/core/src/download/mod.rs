//! Report download.
//!
//! [`DownloadTrigger`] fetches a finished job's report, rejects error payloads
//! served in its place, and writes it atomically into an output directory.

mod trigger;
mod types;

pub use trigger::DownloadTrigger;
pub use types::{Artifact, DownloadError};
