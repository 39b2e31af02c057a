use std::path::Path;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::Parser;
use tracing_subscriber::EnvFilter;

use hashprobe::campaign;
use hashprobe::cli::{Cli, Command};
use hashprobe::config::CampaignConfig;
use hashprobe::pipeline::{InProcessSource, TimingSource, WorkerCommand, WorkerPipeline};
use hashprobe::transport;
use hashprobe::ProbeError;

/// Initialize tracing to stderr; `--debug` raises the level to trace
fn init_tracing(debug: bool) {
    let filter = if debug {
        EnvFilter::from_default_env().add_directive(tracing::Level::TRACE.into())
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

/// Config file (or the subcommand's preset), then command-line overrides
fn load_config(cli: &Cli) -> Result<CampaignConfig> {
    let mut config = match &cli.config {
        Some(path) => CampaignConfig::from_file(path)?,
        None => cli.base_config(),
    };
    cli.apply_overrides(&mut config);

    if let Err(reason) = config.validate() {
        return Err(ProbeError::Config(reason).into());
    }
    Ok(config)
}

fn worker_command(worker: Option<&Path>, port: u16, host: &str) -> Result<WorkerCommand> {
    match worker {
        Some(program) => Ok(WorkerCommand::external(program, port, host)),
        None => Ok(WorkerCommand::self_worker(port, host)?),
    }
}

async fn run(command: &Command, config: &CampaignConfig) -> Result<()> {
    let mut out = std::io::stdout();

    match command {
        Command::Extract {
            port, host, worker, ..
        } => {
            let command = worker_command(worker.as_deref(), *port, host)?;
            let pipeline = Arc::new(WorkerPipeline::start(command, config.pipeline.clone()));
            let source: Arc<dyn TimingSource> = pipeline.clone();

            let result = campaign::run_extraction(config, source, &mut out).await;
            pipeline.exit().await;
            tracing::info!(stats = ?pipeline.stats(), "worker pipeline closed");
            result.map(|_| ())
        }
        Command::Local { .. } => {
            let source: Arc<dyn TimingSource> = Arc::new(InProcessSource::default());
            campaign::run_extraction(config, source, &mut out).await?;
            Ok(())
        }
        Command::Collect {
            port, host, worker, ..
        } => {
            let command = worker_command(worker.as_deref(), *port, host)?;
            let pipeline = WorkerPipeline::start(command, config.pipeline.clone());

            let result = campaign::run_collection(config, &pipeline, &mut out).await;
            pipeline.exit().await;
            tracing::info!(stats = ?pipeline.stats(), "worker pipeline closed");
            result.map(|_| ())
        }
        Command::Calibrate { .. } => {
            let source = InProcessSource::default();
            campaign::run_calibration(config, &source, &mut rand::thread_rng(), &mut out).await?;
            Ok(())
        }
        Command::Worker { .. } => bail!("the worker runs outside the async runtime"),
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize tracing (stderr, so stdout stays machine-readable)
    init_tracing(cli.debug);

    if let Command::Worker { port, host } = &cli.command {
        return transport::serve_stdio(*port, host);
    }

    let config = load_config(&cli)?;

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("Failed to start async runtime")?;

    runtime.block_on(run(&cli.command, &config))
}
