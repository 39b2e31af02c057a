//! Error taxonomy for the extraction engine
//!
//! Oracle and probe-builder errors are local precondition violations and fail
//! fast. Pipeline errors have already been through the respawn-and-resume
//! policy by the time a caller sees them.

use thiserror::Error;

/// Errors produced by the probe builder, measurement pipeline and discriminator
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ProbeError {
    #[error("Invalid probe spec: {0}")]
    InvalidProbeSpec(String),

    #[error("Pipeline closed: no further requests may be issued")]
    PipelineClosed,

    #[error("Worker I/O failed: {0}")]
    WorkerIo(String),

    #[error("Worker could not be started: {0}")]
    WorkerSpawn(String),

    #[error("Inconclusive split: clusters have {high} and {low} members")]
    InconclusiveSplit { high: usize, low: usize },

    #[error("Invalid configuration: {0}")]
    Config(String),
}

impl ProbeError {
    /// Whether this error ends the whole run rather than a single call
    pub fn is_fatal(&self) -> bool {
        matches!(self, ProbeError::PipelineClosed | ProbeError::WorkerSpawn(_))
    }
}

pub type Result<T> = std::result::Result<T, ProbeError>;
