//! Consolidation backend abstraction.
//!
//! This module provides the collaborator traits the workflow is built from
//! ([`JobSubmitter`], [`ProcessStarter`], [`StatusFetcher`],
//! [`ArtifactFetcher`]) and [`HttpJobApi`], which implements all of them over
//! the service's REST API.

mod http;
mod types;
mod wire;

pub use http::HttpJobApi;
pub use types::*;

pub(crate) use wire::{error_envelope_message, error_message};
