//! CLI argument parsing for hashprobe

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

use crate::config::CampaignConfig;

#[derive(Parser, Debug)]
#[command(name = "hashprobe")]
#[command(version)]
#[command(
    about = "Timing side-channel extraction of hash-ordered keys",
    long_about = None
)]
pub struct Cli {
    /// Campaign configuration file (TOML)
    #[arg(long, global = true, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Hash seed of the victim runtime
    #[arg(long, global = true, value_name = "N")]
    pub seed: Option<u32>,

    /// Enable debug tracing output to stderr
    #[arg(long, global = true)]
    pub debug: bool,

    #[command(subcommand)]
    pub command: Command,
}

/// Round and probe overrides shared by `extract` and `local`
#[derive(Args, Debug, Clone, Default, PartialEq, Eq)]
pub struct RoundArgs {
    /// Extraction rounds
    #[arg(long, value_name = "N")]
    pub rounds: Option<usize>,

    /// Timing trials per probe per round
    #[arg(long, value_name = "N")]
    pub repeat: Option<usize>,

    /// Probe keys per round
    #[arg(long, value_name = "N")]
    pub probes: Option<usize>,

    /// Repetitions of {probe + targets} per body
    #[arg(long, value_name = "N")]
    pub amplification: Option<usize>,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Run extraction rounds against a remote victim through a worker process
    Extract {
        port: u16,
        host: String,

        /// Worker program, started as `<PATH> <PORT> <HOST>` (default: own `worker` subcommand)
        #[arg(long, value_name = "PATH")]
        worker: Option<PathBuf>,

        /// Rounds in flight at once
        #[arg(long, value_name = "N")]
        parallel: Option<usize>,

        #[command(flatten)]
        overrides: RoundArgs,
    },

    /// Run extraction rounds against the in-process JSON parser
    Local {
        #[command(flatten)]
        overrides: RoundArgs,
    },

    /// Measure fresh probes against one random target and print `key,time` lines
    Collect {
        port: u16,
        host: String,

        /// Probe keys to measure
        #[arg(long, value_name = "N")]
        samples: Option<usize>,

        /// Worker program, started as `<PATH> <PORT> <HOST>` (default: own `worker` subcommand)
        #[arg(long, value_name = "PATH")]
        worker: Option<PathBuf>,
    },

    /// Compare a known-low and a known-high probe in-process
    Calibrate {
        /// Measurement iterations
        #[arg(long, value_name = "N")]
        iterations: Option<usize>,
    },

    /// Timing worker: read bodies on stdin, POST them to HOST:PORT, print nanoseconds
    Worker { port: u16, host: String },
}

impl RoundArgs {
    fn apply(&self, config: &mut CampaignConfig) {
        if let Some(rounds) = self.rounds {
            config.rounds = rounds;
        }
        if let Some(repeat) = self.repeat {
            config.repeat = repeat;
        }
        if let Some(probes) = self.probes {
            config.probe.probe_count = probes;
        }
        if let Some(amplification) = self.amplification {
            config.probe.amplification = amplification;
        }
    }
}

impl Cli {
    /// Apply command-line overrides on top of a loaded configuration
    pub fn apply_overrides(&self, config: &mut CampaignConfig) {
        if let Some(seed) = self.seed {
            config.seed = seed;
        }

        match &self.command {
            Command::Extract {
                parallel,
                overrides,
                ..
            } => {
                if let Some(parallel) = parallel {
                    config.parallel = *parallel;
                }
                overrides.apply(config);
            }
            Command::Local { overrides } => overrides.apply(config),
            Command::Collect { samples, .. } => {
                if let Some(samples) = samples {
                    config.samples = *samples;
                }
            }
            Command::Calibrate { iterations } => {
                if let Some(iterations) = iterations {
                    config.iterations = *iterations;
                }
            }
            Command::Worker { .. } => {}
        }
    }

    /// Configuration preset matching the subcommand
    pub fn base_config(&self) -> CampaignConfig {
        match self.command {
            Command::Local { .. } | Command::Calibrate { .. } => CampaignConfig::local(),
            _ => CampaignConfig::default(),
        }
    }
}
