// Running timing accumulator
//
// Keeps sum and sum of squares rather than Welford's update: results must match
// the E[X^2] - E[X]^2 form the existing result sets were produced with.

/// Running sum, sum of squares and count for one probe's samples
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct TimingStat {
    sum: f64,
    sum_sq: f64,
    count: u64,
}

impl TimingStat {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add one elapsed-time sample
    pub fn accumulate(&mut self, sample: f64) {
        self.sum += sample;
        self.sum_sq += sample * sample;
        self.count += 1;
    }

    pub fn count(&self) -> u64 {
        self.count
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    /// Mean of the samples, 0 when empty
    pub fn mean(&self) -> f64 {
        if self.count == 0 {
            return 0.0;
        }
        self.sum / self.count as f64
    }

    /// Population mean and standard deviation
    ///
    /// The variance is clamped to 0 before the square root: rounding can push
    /// E[X^2] - E[X]^2 slightly negative for near-constant samples.
    pub fn mean_stddev(&self) -> (f64, f64) {
        if self.count == 0 {
            return (0.0, 0.0);
        }
        let n = self.count as f64;
        let mean = self.sum / n;
        let variance = (self.sum_sq / n - mean * mean).max(0.0);
        (mean, variance.sqrt())
    }

    /// Standard deviation relative to the mean (0 when the mean is 0)
    pub fn relative_stddev(&self) -> f64 {
        let (mean, stddev) = self.mean_stddev();
        if mean == 0.0 {
            return 0.0;
        }
        stddev / mean
    }
}

impl Extend<f64> for TimingStat {
    fn extend<I: IntoIterator<Item = f64>>(&mut self, iter: I) {
        for sample in iter {
            self.accumulate(sample);
        }
    }
}

impl FromIterator<f64> for TimingStat {
    fn from_iter<I: IntoIterator<Item = f64>>(iter: I) -> Self {
        let mut stat = TimingStat::new();
        stat.extend(iter);
        stat
    }
}
