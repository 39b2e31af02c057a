// Statistical discriminator
//
// Turns noisy per-probe timing samples into a low/high pick:
// - TimingStat: O(1) running mean and population standard deviation
// - two_cluster_split: 1-D k-means (k=2) seeded from (min, max), used to check
//   that a round's timings are actually bimodal before trusting its picks
// - score / pick_extremes: the stddev-penalized heuristic that chooses the most
//   confidently early ("low") and late ("high") probe of a round
//
// The scoring heuristic is adhoc. Its exact functional form is kept stable so
// new runs stay comparable with existing result sets.

mod cluster;
mod score;
mod timing_stat;

pub use cluster::{two_cluster_split, ClusterSplit};
pub use score::{pick_extremes, score, Picks, Scores};
pub use timing_stat::TimingStat;

#[cfg(test)]
mod tests;
