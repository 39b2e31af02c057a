// Tests for the statistical discriminator
//
// Synthetic timing data stands in for real measurements: bimodal sets model a
// probe population split by where the probe lands relative to the targets.

use super::*;
use crate::config::DiscriminatorConfig;
use crate::error::ProbeError;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Normally distributed samples via Box-Muller
fn normal_samples(rng: &mut StdRng, mean: f64, stddev: f64, count: usize) -> Vec<f64> {
    (0..count)
        .map(|_| {
            let u1: f64 = rng.gen_range(f64::EPSILON..1.0);
            let u2: f64 = rng.gen();
            let z = (-2.0 * u1.ln()).sqrt() * (2.0 * std::f64::consts::PI * u2).cos();
            mean + stddev * z
        })
        .collect()
}

fn stat_of(samples: &[f64]) -> TimingStat {
    samples.iter().copied().collect()
}

#[test]
fn test_mean_stddev_constant_samples_exact() {
    let stat = stat_of(&[250.0; 64]);
    assert_eq!(stat.mean_stddev(), (250.0, 0.0));
    assert_eq!(stat.count(), 64);
}

#[test]
fn test_mean_stddev_population_form() {
    // mean 5, population variance ((9 + 1 + 1 + 9) / 4) = 5
    let stat = stat_of(&[2.0, 4.0, 6.0, 8.0]);
    let (mean, stddev) = stat.mean_stddev();
    assert_eq!(mean, 5.0);
    assert!((stddev - 5.0f64.sqrt()).abs() < 1e-12);
}

#[test]
fn test_mean_stddev_clamps_rounding_artifacts() {
    // E[X^2] - E[X]^2 goes slightly negative in floating point here
    let stat = stat_of(&[0.1; 10]);
    let (_, stddev) = stat.mean_stddev();
    assert!(stddev >= 0.0);
    assert!(!stddev.is_nan());
}

#[test]
fn test_empty_stat() {
    let stat = TimingStat::new();
    assert!(stat.is_empty());
    assert_eq!(stat.mean_stddev(), (0.0, 0.0));
    assert_eq!(stat.relative_stddev(), 0.0);
}

#[test]
fn test_accumulate_is_incremental() {
    let mut stat = TimingStat::new();
    stat.accumulate(10.0);
    assert_eq!(stat.mean(), 10.0);
    stat.accumulate(30.0);
    assert_eq!(stat.mean_stddev(), (20.0, 10.0));
    assert_eq!(stat.relative_stddev(), 0.5);
}

#[test]
fn test_split_bimodal_converges_high_first() {
    let mut rng = StdRng::seed_from_u64(42);
    let mut samples = normal_samples(&mut rng, 100.0, 5.0, 500);
    samples.extend(normal_samples(&mut rng, 900.0, 5.0, 500));

    let split = two_cluster_split(&samples, &DiscriminatorConfig::default()).unwrap();

    assert!((split.high_center() - 900.0).abs() < 900.0 * 0.05);
    assert!((split.low_center() - 100.0).abs() < 100.0 * 0.05);
    assert!(split.centers[0] >= split.centers[1]);
    assert_eq!(split.high_members().len(), 500);
    assert_eq!(split.low_members().len(), 500);
    assert!(split.high_members().iter().all(|&i| i >= 500));
    assert!(split.iterations <= 5);
}

#[test]
fn test_split_interleaved_order_reports_membership() {
    let samples = [10.0, 1000.0, 12.0, 990.0, 11.0, 1010.0];
    let split = two_cluster_split(&samples, &DiscriminatorConfig::default()).unwrap();

    assert_eq!(split.high_members(), &[1, 3, 5]);
    assert_eq!(split.low_members(), &[0, 2, 4]);
    assert!(split.is_high(3));
    assert!(!split.is_high(2));
    assert!((split.separation() - 989.0).abs() < 1e-9);
}

#[test]
fn test_split_constant_samples_inconclusive() {
    let err = two_cluster_split(&[5.0; 20], &DiscriminatorConfig::default()).unwrap_err();
    assert_eq!(err, ProbeError::InconclusiveSplit { high: 20, low: 0 });
}

#[test]
fn test_split_empty_inconclusive() {
    let err = two_cluster_split(&[], &DiscriminatorConfig::default()).unwrap_err();
    assert!(matches!(err, ProbeError::InconclusiveSplit { .. }));
}

#[test]
fn test_split_single_outlier() {
    let mut samples = vec![100.0; 99];
    samples.push(5000.0);
    let split = two_cluster_split(&samples, &DiscriminatorConfig::default()).unwrap();
    assert_eq!(split.high_members(), &[99]);
    assert_eq!(split.high_center(), 5000.0);
    assert_eq!(split.low_center(), 100.0);
}

#[test]
fn test_split_respects_iteration_cap() {
    let config = DiscriminatorConfig {
        convergence_threshold: 1e-300,
        max_iterations: 2,
    };
    let samples: Vec<f64> = (0..100).map(|i| (i * i) as f64).collect();
    let split = two_cluster_split(&samples, &config).unwrap();
    assert!(split.iterations <= 2);
}

#[test]
fn test_score_zero_noise_collapses_to_mean() {
    let scores = score(100.0, 0.0);
    assert_eq!(scores.low, 100.0);
    assert_eq!(scores.high, 100.0);
}

#[test]
fn test_score_exact_form() {
    let scores = score(200.0, 50.0);
    let weight = (-0.25f64).exp();
    assert_eq!(scores.high, 200.0 * weight);
    assert_eq!(scores.low, 200.0 / weight);
    assert!(scores.low > 200.0 && scores.high < 200.0);
}

#[test]
fn test_pick_extremes_prefers_low_noise() {
    let stats = vec![
        stat_of(&[100.0, 100.0]), // quiet, fast
        stat_of(&[50.0, 150.0]),  // same mean, noisy
        stat_of(&[300.0, 300.0]), // quiet, slow
        stat_of(&[100.0, 500.0]), // same mean as slow one, noisy
    ];
    let picks = pick_extremes(&stats).unwrap();
    assert_eq!(picks.low, 0);
    assert_eq!(picks.high, 2);
    assert_eq!(picks.low_score, 100.0);
    assert_eq!(picks.high_score, 300.0);
}

#[test]
fn test_pick_extremes_first_wins_ties() {
    let stats = vec![stat_of(&[7.0]), stat_of(&[7.0]), stat_of(&[7.0])];
    let picks = pick_extremes(&stats).unwrap();
    assert_eq!(picks.low, 0);
    assert_eq!(picks.high, 0);
}

#[test]
fn test_pick_extremes_skips_empty() {
    let stats = vec![TimingStat::new(), stat_of(&[9.0]), TimingStat::new(), stat_of(&[3.0])];
    let picks = pick_extremes(&stats).unwrap();
    assert_eq!(picks.low, 3);
    assert_eq!(picks.high, 1);

    assert!(pick_extremes(&[TimingStat::new(), TimingStat::new()]).is_none());
    assert!(pick_extremes(&[]).is_none());
}
