// In-process timing source
//
// Measures the operation on the calling thread, so rounds sharing one CPU
// disturb each other; the local preset runs them one at a time.

use std::fmt;
use std::hint::black_box;
use std::time::Instant;

use super::{Ticket, TimingSource};
use crate::error::Result;
use crate::probe::ProbeBody;

type Operation = Box<dyn Fn(&str) + Send + Sync>;

/// Times a closure over the body text with `Instant`
pub struct InProcessSource {
    operation: Operation,
}

impl InProcessSource {
    pub fn new<F>(operation: F) -> Self
    where
        F: Fn(&str) + Send + Sync + 'static,
    {
        Self {
            operation: Box::new(operation),
        }
    }

    /// Measure JSON parsing into a generic value tree
    pub fn json_parse() -> Self {
        Self::new(|body| {
            let _ = black_box(serde_json::from_str::<serde_json::Value>(body));
        })
    }

    /// Elapsed nanoseconds of one run of the operation
    pub fn measure(&self, body: &str) -> f64 {
        let start = Instant::now();
        (self.operation)(black_box(body));
        start.elapsed().as_nanos() as f64
    }
}

impl Default for InProcessSource {
    fn default() -> Self {
        Self::json_parse()
    }
}

impl fmt::Debug for InProcessSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InProcessSource").finish_non_exhaustive()
    }
}

impl TimingSource for InProcessSource {
    fn submit(&self, body: &ProbeBody) -> Result<Ticket> {
        Ok(Ticket::ready(self.measure(body.as_str())))
    }
}
