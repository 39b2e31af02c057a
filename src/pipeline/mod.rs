// Measurement pipeline
//
// Turns "probe body -> elapsed time" into an ordered stream of samples. Callers
// submit as many bodies as they like before awaiting any of them: submission
// only enqueues, and each returned ticket resolves to one timing.
//
// Two realizations share the TimingSource contract:
// - InProcessSource times the measured operation directly (monotonic clock)
// - WorkerPipeline delegates to a long-lived child process over a newline
//   protocol and transparently replaces it when it dies

mod local;
mod worker;

pub use local::InProcessSource;
pub use worker::{PipelineStats, WorkerCommand, WorkerPipeline};

use tokio::sync::oneshot;

use crate::error::{ProbeError, Result};
use crate::probe::ProbeBody;

/// Anything that can time a probe body
pub trait TimingSource: Send + Sync {
    /// Enqueue one measurement of `body`
    ///
    /// Returns immediately; the timing arrives through the ticket.
    fn submit(&self, body: &ProbeBody) -> Result<Ticket>;
}

/// Pending result of one submitted measurement
#[derive(Debug)]
pub struct Ticket {
    inner: TicketInner,
}

#[derive(Debug)]
enum TicketInner {
    Ready(Result<f64>),
    Pending(oneshot::Receiver<Result<f64>>),
}

impl Ticket {
    /// A ticket that already holds its timing
    pub fn ready(timing: f64) -> Self {
        Self {
            inner: TicketInner::Ready(Ok(timing)),
        }
    }

    pub(crate) fn pending(receiver: oneshot::Receiver<Result<f64>>) -> Self {
        Self {
            inner: TicketInner::Pending(receiver),
        }
    }

    /// Wait for the timing in nanoseconds
    ///
    /// A ticket whose request was discarded by `exit()` resolves to
    /// `PipelineClosed`, never to a timing.
    pub async fn wait(self) -> Result<f64> {
        match self.inner {
            TicketInner::Ready(result) => result,
            TicketInner::Pending(receiver) => match receiver.await {
                Ok(result) => result,
                Err(_) => Err(ProbeError::PipelineClosed),
            },
        }
    }
}

/// Parse one worker response line into nanoseconds
pub fn parse_timing(line: &str) -> Result<f64> {
    let trimmed = line.trim();
    let value: f64 = trimmed
        .parse()
        .map_err(|_| ProbeError::WorkerIo(format!("unparseable response line {:?}", trimmed)))?;

    if !value.is_finite() || value < 0.0 {
        return Err(ProbeError::WorkerIo(format!(
            "response is not a valid elapsed time: {}",
            trimmed
        )));
    }
    Ok(value)
}
