// Two-cluster split (1-D k-means, k = 2)
//
// Centers start at (max, min) of the samples. Each iteration assigns every
// sample to its nearest center (ties go to the high center) and moves each
// center to the mean of its members, until no center moves by
// `convergence_threshold` or more.

use crate::config::DiscriminatorConfig;
use crate::error::{ProbeError, Result};

/// Result of splitting samples into a high and a low cluster
#[derive(Debug, Clone, PartialEq)]
pub struct ClusterSplit {
    /// `centers[0] >= centers[1]`
    pub centers: [f64; 2],

    /// Indices into the input samples, high cluster first
    pub partitions: [Vec<usize>; 2],

    /// Iterations run before convergence (or the cap)
    pub iterations: usize,
}

impl ClusterSplit {
    pub fn high_center(&self) -> f64 {
        self.centers[0]
    }

    pub fn low_center(&self) -> f64 {
        self.centers[1]
    }

    pub fn high_members(&self) -> &[usize] {
        &self.partitions[0]
    }

    pub fn low_members(&self) -> &[usize] {
        &self.partitions[1]
    }

    /// Distance between the two centers
    pub fn separation(&self) -> f64 {
        self.centers[0] - self.centers[1]
    }

    /// Whether the sample at `index` landed in the high cluster
    pub fn is_high(&self, index: usize) -> bool {
        self.partitions[0].binary_search(&index).is_ok()
    }
}

/// Split `samples` into two clusters by nearest-centroid assignment
///
/// Returns `InconclusiveSplit` when a cluster ends up empty, which includes
/// empty input and input where every sample has the same value.
pub fn two_cluster_split(samples: &[f64], config: &DiscriminatorConfig) -> Result<ClusterSplit> {
    if samples.is_empty() {
        return Err(ProbeError::InconclusiveSplit { high: 0, low: 0 });
    }

    let min = samples.iter().copied().fold(f64::INFINITY, f64::min);
    let max = samples.iter().copied().fold(f64::NEG_INFINITY, f64::max);

    let mut centers = [max, min];
    let mut partitions: [Vec<usize>; 2] = [Vec::new(), Vec::new()];
    let cap = config.max_iterations.max(1);
    let mut iterations = 0;

    loop {
        iterations += 1;

        partitions[0].clear();
        partitions[1].clear();
        for (i, &x) in samples.iter().enumerate() {
            let nearest = if (x - centers[0]).abs() <= (x - centers[1]).abs() {
                0
            } else {
                1
            };
            partitions[nearest].push(i);
        }

        if partitions[0].is_empty() || partitions[1].is_empty() {
            return Err(ProbeError::InconclusiveSplit {
                high: partitions[0].len(),
                low: partitions[1].len(),
            });
        }

        let mut movement: f64 = 0.0;
        for (center, members) in centers.iter_mut().zip(&partitions) {
            let mean = members.iter().map(|&i| samples[i]).sum::<f64>() / members.len() as f64;
            movement = movement.max((mean - *center).abs());
            *center = mean;
        }

        if movement < config.convergence_threshold {
            break;
        }
        if iterations >= cap {
            tracing::debug!(iterations, movement, "two-cluster split hit the iteration cap");
            break;
        }
    }

    if centers[0] < centers[1] {
        centers.swap(0, 1);
        partitions.swap(0, 1);
    }

    Ok(ClusterSplit {
        centers,
        partitions,
        iterations,
    })
}
