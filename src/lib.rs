//! hashprobe - timing side-channel extraction of hash-ordered keys
//!
//! This library reproduces a victim runtime's string hash and key ordering,
//! builds probe payloads whose parse time depends on where a probe key sorts
//! among a hidden target set, measures those payloads through a crash-tolerant
//! worker pipeline, and scores low/high picks against ground truth.

pub mod campaign;
pub mod cli;
pub mod config;
pub mod discriminator;
pub mod error;
pub mod oracle;
pub mod pipeline;
pub mod probe;
pub mod scorer;
pub mod transport;

pub use error::{ProbeError, Result};
