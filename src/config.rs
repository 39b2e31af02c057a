// Campaign configuration
//
// Every campaign constant lives here as a named, overridable value. Defaults
// match the constants of earlier campaigns.
//
// Files are TOML; every section and field is optional:
//
//   seed = 1
//   rounds = 48
//
//   [probe]
//   amplification = 32768
//
//   [pipeline]
//   request_timeout_ms = 5000

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;

use crate::oracle::AlphabetKind;

/// Probe material: target set, spoof set and body layout
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProbeConfig {
    /// Number of target keys (18 keys switch the victim to dictionary mode)
    pub target_count: usize,

    /// Spoof keys pushed before the timed section
    ///
    /// 1024 + 512 is the transition array limit of the victim.
    pub spoof_count: usize,

    /// Candidate keys measured per extraction round (2093 hits the transition limit)
    pub probe_count: usize,

    /// Repetitions of {probe + targets} per body
    pub amplification: usize,

    /// Re-emit the spoof segment every N repetitions (0 = only once)
    pub respoof_interval: usize,

    /// Key shared by every object in a body
    pub anchor_key: String,
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            target_count: 17,
            spoof_count: 1024 + 512,
            probe_count: 2093,
            amplification: 4096,
            respoof_interval: 8192,
            anchor_key: "@".to_string(),
        }
    }
}

/// Worker pipeline hardening knobs
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Round-trip timeout for one request; expiry respawns the worker
    pub request_timeout_ms: u64,

    /// Deliveries attempted per request before it fails with `WorkerIo`
    pub max_attempts: usize,

    /// Consecutive unproductive incarnations before the pipeline gives up
    pub respawn_limit: usize,

    /// Pause between a worker exit and the next spawn
    pub respawn_backoff_ms: u64,

    /// Time a worker gets to exit after SIGTERM before it is killed
    pub shutdown_grace_ms: u64,

    /// Measurements a round keeps submitted but not yet awaited
    ///
    /// Bodies are built on submission, so this also bounds body memory.
    pub max_in_flight: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            request_timeout_ms: 30_000,
            max_attempts: 3,
            respawn_limit: 5,
            respawn_backoff_ms: 100,
            shutdown_grace_ms: 500,
            max_in_flight: 32,
        }
    }
}

impl PipelineConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn respawn_backoff(&self) -> Duration {
        Duration::from_millis(self.respawn_backoff_ms)
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_millis(self.shutdown_grace_ms)
    }
}

/// Two-cluster split parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DiscriminatorConfig {
    /// Stop iterating once no center moves by this much (timing units)
    pub convergence_threshold: f64,

    /// Hard cap on k-means iterations
    pub max_iterations: usize,
}

impl Default for DiscriminatorConfig {
    fn default() -> Self {
        Self {
            convergence_threshold: 1.0,
            max_iterations: 100,
        }
    }
}

/// Complete configuration for one extraction campaign
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CampaignConfig {
    /// Hash seed of the victim runtime
    pub seed: u32,

    /// Alphabet used for every generated key
    pub alphabet: AlphabetKind,

    /// Timing trials per probe per round
    pub repeat: usize,

    /// Extraction rounds
    pub rounds: usize,

    /// Rounds in flight at once
    pub parallel: usize,

    /// Probe keys measured by `collect`
    pub samples: usize,

    /// Iterations of the `calibrate` loop
    pub iterations: usize,

    /// `calibrate` prints a line every N iterations
    pub report_every: usize,

    pub probe: ProbeConfig,
    pub pipeline: PipelineConfig,
    pub discriminator: DiscriminatorConfig,
}

impl Default for CampaignConfig {
    fn default() -> Self {
        Self {
            seed: 1,
            alphabet: AlphabetKind::Identifier,
            repeat: 10,
            rounds: 96,
            parallel: 10,
            samples: 1024,
            iterations: 10_000,
            report_every: 100,
            probe: ProbeConfig::default(),
            pipeline: PipelineConfig::default(),
            discriminator: DiscriminatorConfig::default(),
        }
    }
}

impl CampaignConfig {
    /// Preset for in-process measurement
    ///
    /// Without network overhead far less amplification is needed, and rounds
    /// run one at a time since they share the CPU being measured.
    pub fn local() -> Self {
        Self {
            repeat: 100,
            rounds: 48,
            parallel: 1,
            probe: ProbeConfig {
                amplification: 20,
                ..ProbeConfig::default()
            },
            ..Self::default()
        }
    }

    /// Load from a TOML file; missing fields keep their defaults
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path_ref = path.as_ref();

        if !path_ref.exists() {
            bail!("Config file not found: {}", path_ref.display());
        }

        let contents = fs::read_to_string(path_ref)
            .with_context(|| format!("Failed to read config file {}", path_ref.display()))?;

        Self::from_toml_str(&contents)
    }

    /// Parse TOML text and validate the result
    pub fn from_toml_str(contents: &str) -> Result<Self> {
        let config: CampaignConfig = toml::from_str(contents).context("Invalid config TOML")?;
        if let Err(reason) = config.validate() {
            bail!("Invalid configuration: {}", reason);
        }
        Ok(config)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), String> {
        if self.probe.target_count == 0 {
            return Err("probe.target_count must be >= 1".to_string());
        }

        if self.probe.amplification == 0 {
            return Err("probe.amplification must be >= 1".to_string());
        }

        if self.probe.probe_count == 0 {
            return Err("probe.probe_count must be >= 1".to_string());
        }

        if self.repeat == 0 {
            return Err("repeat must be >= 1".to_string());
        }

        if self.parallel == 0 {
            return Err("parallel must be >= 1".to_string());
        }

        if self.report_every == 0 {
            return Err("report_every must be >= 1".to_string());
        }

        let threshold = self.discriminator.convergence_threshold;
        if threshold.is_nan() || threshold <= 0.0 {
            return Err(format!(
                "discriminator.convergence_threshold must be positive, got {}",
                threshold
            ));
        }

        if self.discriminator.max_iterations == 0 {
            return Err("discriminator.max_iterations must be >= 1".to_string());
        }

        if self.pipeline.max_attempts == 0 {
            return Err("pipeline.max_attempts must be >= 1".to_string());
        }

        if self.pipeline.max_in_flight == 0 {
            return Err("pipeline.max_in_flight must be >= 1".to_string());
        }

        if self.pipeline.request_timeout_ms == 0 {
            return Err("pipeline.request_timeout_ms must be >= 1".to_string());
        }

        Ok(())
    }
}
