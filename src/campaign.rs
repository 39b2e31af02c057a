//! Campaign drivers
//!
//! Wire the oracle, probe builder, a timing source, the discriminator and the
//! scorer into the three runs the CLI exposes:
//!
//! - `run_extraction`: many rounds of "which fresh probe sorts earliest/latest"
//! - `run_collection`: one random target, raw `key,time` samples
//! - `run_calibration`: a known-low and known-high probe measured side by side
//!
//! Progress and results go to the given writer (stdout in the binary).
//! Per-sample `WorkerIo` failures drop that sample; `PipelineClosed` and
//! `WorkerSpawn` abort the run after the totals so far are written.

use std::collections::VecDeque;
use std::io::Write;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use rand::Rng;
use tokio::task::JoinSet;

use crate::config::CampaignConfig;
use crate::discriminator::{pick_extremes, two_cluster_split, TimingStat};
use crate::error::ProbeError;
use crate::oracle::{hash, KeyAlphabet, KeyGenerator, KeySet};
use crate::pipeline::{Ticket, TimingSource};
use crate::probe::{BodyLayout, BodyTemplate, ProbeBody, ProbeBuilder};
use crate::scorer::{Observation, ScoreReport, Scorer};

/// Target set of a run: the first `count` keys of the alphabet, sorted by hash
pub fn target_set(seed: u32, alphabet: KeyAlphabet, count: usize) -> KeySet {
    KeySet::new(seed, (0..count as u64).map(|i| alphabet.key_at(i)).collect())
}

fn layout(config: &CampaignConfig) -> BodyLayout {
    BodyLayout {
        anchor_key: config.probe.anchor_key.clone(),
        respoof_interval: config.probe.respoof_interval,
    }
}

fn hash_list(targets: &KeySet) -> String {
    let hashes: Vec<String> = targets.hashes().iter().map(|h| h.to_string()).collect();
    format!("[{}]", hashes.join(","))
}

/// Await a ticket, turning non-fatal failures into a dropped sample
async fn settle(ticket: Ticket, key: &str) -> crate::error::Result<Option<f64>> {
    match ticket.wait().await {
        Ok(timing) => Ok(Some(timing)),
        Err(err) if err.is_fatal() => Err(err),
        Err(err) => {
            tracing::warn!(key, error = %err, "sample dropped");
            Ok(None)
        }
    }
}

/// Measure every probe `repeat` times, interleaved, keeping at most
/// `max_in_flight` measurements outstanding
///
/// A probe whose previous trial is still in flight reuses that trial's body.
async fn measure_round(
    source: Arc<dyn TimingSource>,
    template: Arc<BodyTemplate>,
    probes: Vec<String>,
    repeat: usize,
    max_in_flight: usize,
) -> crate::error::Result<(Vec<String>, Vec<TimingStat>)> {
    let mut stats = vec![TimingStat::new(); probes.len()];
    let mut in_flight: VecDeque<(usize, ProbeBody, Ticket)> =
        VecDeque::with_capacity(max_in_flight);

    for i in 0..repeat * probes.len() {
        let idx = i % probes.len();
        let body = in_flight
            .iter()
            .find(|(pending, _, _)| *pending == idx)
            .map(|(_, body, _)| body.clone())
            .unwrap_or_else(|| template.render(&probes[idx]));
        let ticket = source.submit(&body)?;
        in_flight.push_back((idx, body, ticket));

        if in_flight.len() >= max_in_flight {
            if let Some((idx, _, ticket)) = in_flight.pop_front() {
                if let Some(timing) = settle(ticket, &probes[idx]).await? {
                    stats[idx].accumulate(timing);
                }
            }
        }
    }

    while let Some((idx, _, ticket)) = in_flight.pop_front() {
        if let Some(timing) = settle(ticket, &probes[idx]).await? {
            stats[idx].accumulate(timing);
        }
    }

    Ok((probes, stats))
}

/// Gate, pick and record one finished round
fn score_round<W: Write>(
    config: &CampaignConfig,
    scorer: &mut Scorer,
    probes: &[String],
    stats: &[TimingStat],
    out: &mut W,
) -> Result<()> {
    let means: Vec<f64> = stats
        .iter()
        .filter(|s| !s.is_empty())
        .map(TimingStat::mean)
        .collect();

    match two_cluster_split(&means, &config.discriminator) {
        Ok(split) => tracing::debug!(
            high = split.high_center(),
            low = split.low_center(),
            iterations = split.iterations,
            "round split"
        ),
        Err(err) => {
            scorer.skip_round(&err.to_string());
            return Ok(());
        }
    }

    let Some(picks) = pick_extremes(stats) else {
        scorer.skip_round("no probe produced a sample");
        return Ok(());
    };

    let outcome = scorer.record_round(
        &Observation::new(probes[picks.low].clone(), stats[picks.low]),
        &Observation::new(probes[picks.high].clone(), stats[picks.high]),
    );

    writeln!(out, "{}", outcome)?;
    writeln!(out, "{}", scorer.progress_line())?;
    writeln!(out, "{}", scorer.hit_rate_line())?;
    Ok(())
}

/// Run the extraction campaign
///
/// At most `parallel` rounds are in flight. Rounds are scored in completion
/// order. On a fatal pipeline error the report so far is written before the
/// error is returned.
pub async fn run_extraction<W: Write>(
    config: &CampaignConfig,
    source: Arc<dyn TimingSource>,
    out: &mut W,
) -> Result<ScoreReport> {
    let alphabet = KeyAlphabet::from_kind(config.alphabet);
    let targets = target_set(config.seed, alphabet, config.probe.target_count);

    let reserved = config.probe.target_count as u64;
    let mut builder = ProbeBuilder::randomized(config.seed, alphabet, reserved, layout(config));
    let spoof = builder.build_spoof(config.probe.spoof_count);
    let template = Arc::new(BodyTemplate::new(
        &spoof,
        &targets,
        config.probe.amplification,
        builder.layout(),
    )?);

    writeln!(
        out,
        "number of tests {}",
        config.repeat * config.probe.probe_count
    )?;
    writeln!(out, "{}", hash_list(&targets))?;

    let mut scorer = Scorer::new(config.seed, targets);
    let mut rounds = JoinSet::new();
    let mut started = 0;
    let mut fatal: Option<ProbeError> = None;

    while started < config.rounds || !rounds.is_empty() {
        while started < config.rounds && rounds.len() < config.parallel.max(1) {
            let probes = builder.fresh_keys(config.probe.probe_count);
            rounds.spawn(measure_round(
                Arc::clone(&source),
                Arc::clone(&template),
                probes,
                config.repeat,
                config.pipeline.max_in_flight.max(1),
            ));
            started += 1;
        }

        let Some(joined) = rounds.join_next().await else {
            break;
        };

        match joined.context("extraction round panicked")? {
            Ok((probes, stats)) => score_round(config, &mut scorer, &probes, &stats, out)?,
            Err(err) if err.is_fatal() => {
                fatal = Some(err);
                rounds.abort_all();
                break;
            }
            Err(err) => scorer.skip_round(&err.to_string()),
        }
    }

    let report = scorer.report();
    writeln!(out, "{}", report)?;

    if let Some(err) = fatal {
        return Err(err).context(format!(
            "extraction aborted after {} scored rounds",
            report.rounds
        ));
    }
    Ok(report)
}

/// Ground-truth agreement of one timing cluster
#[derive(Debug, Clone, PartialEq)]
pub struct ClusterAgreement {
    pub center: f64,
    pub members: usize,
    /// Members hashing before the target
    pub before: usize,
    /// Members hashing at or after the target
    pub after: usize,
}

/// Result of a collection run
#[derive(Debug, Clone, PartialEq)]
pub struct CollectionSummary {
    pub target: String,
    pub samples: Vec<(String, f64)>,
    /// High cluster first; `None` when the split was inconclusive
    pub clusters: Option<[ClusterAgreement; 2]>,
}

/// Measure `samples` fresh probes once each against a single random target
pub async fn run_collection<W: Write>(
    config: &CampaignConfig,
    source: &dyn TimingSource,
    out: &mut W,
) -> Result<CollectionSummary> {
    let alphabet = KeyAlphabet::from_kind(config.alphabet);
    let mut builder = ProbeBuilder::randomized(config.seed, alphabet, 0, layout(config));

    let target_key = builder.generator_mut().next_key();
    let targets = KeySet::new(config.seed, vec![target_key.clone()]);
    let spoof = builder.build_spoof(config.probe.spoof_count);
    let template = BodyTemplate::new(
        &spoof,
        &targets,
        config.probe.amplification,
        builder.layout(),
    )?;
    writeln!(
        out,
        "target key={} hsh={}",
        target_key,
        hash(config.seed, &target_key)
    )?;

    let max_in_flight = config.pipeline.max_in_flight.max(1);
    let mut in_flight: VecDeque<(String, Ticket)> = VecDeque::with_capacity(max_in_flight);
    let mut samples = Vec::with_capacity(config.samples);

    for _ in 0..config.samples {
        let key = builder.generator_mut().next_key();
        let body = template.render(&key);
        in_flight.push_back((key, source.submit(&body)?));

        if in_flight.len() >= max_in_flight {
            if let Some((key, ticket)) = in_flight.pop_front() {
                if let Some(time) = settle(ticket, &key).await? {
                    writeln!(out, "{},{}", key, time)?;
                    samples.push((key, time));
                }
            }
        }
    }
    while let Some((key, ticket)) = in_flight.pop_front() {
        if let Some(time) = settle(ticket, &key).await? {
            writeln!(out, "{},{}", key, time)?;
            samples.push((key, time));
        }
    }

    let times: Vec<f64> = samples.iter().map(|(_, t)| *t).collect();
    let clusters = match two_cluster_split(&times, &config.discriminator) {
        Ok(split) => {
            let agreement = |center: f64, members: &[usize]| {
                let before = members
                    .iter()
                    .filter(|&&i| targets.position_of(hash(config.seed, &samples[i].0)) == 0)
                    .count();
                ClusterAgreement {
                    center,
                    members: members.len(),
                    before,
                    after: members.len() - before,
                }
            };
            Some([
                agreement(split.high_center(), split.high_members()),
                agreement(split.low_center(), split.low_members()),
            ])
        }
        Err(err) => {
            writeln!(out, "split inconclusive: {}", err)?;
            None
        }
    };

    if let Some([high, low]) = &clusters {
        for (name, cluster) in [("high", high), ("low", low)] {
            writeln!(
                out,
                "{} cluster: center={:.1} members={} before={} after={}",
                name, cluster.center, cluster.members, cluster.before, cluster.after
            )?;
        }
    }

    Ok(CollectionSummary {
        target: target_key,
        samples,
        clusters,
    })
}

/// Averages of a calibration run
#[derive(Debug, Clone, PartialEq)]
pub struct CalibrationSummary {
    pub low_key: String,
    pub high_key: String,
    /// Iterations where all four measurements succeeded
    pub count: u64,
    /// avg(low) - avg(high)
    pub delta: f64,
    /// Same difference over the reference pair
    pub reference: f64,
    pub high_stddev: f64,
    pub low_stddev: f64,
}

#[derive(Debug, Default)]
struct CalibrationStats {
    high: TimingStat,
    low: TimingStat,
    ref_high: TimingStat,
    ref_low: TimingStat,
}

impl CalibrationStats {
    fn summary(&self, low_key: &str, high_key: &str) -> CalibrationSummary {
        let (high_avg, high_stddev) = self.high.mean_stddev();
        let (low_avg, low_stddev) = self.low.mean_stddev();
        CalibrationSummary {
            low_key: low_key.to_string(),
            high_key: high_key.to_string(),
            count: self.high.count(),
            delta: low_avg - high_avg,
            reference: self.ref_low.mean() - self.ref_high.mean(),
            high_stddev,
            low_stddev,
        }
    }
}

async fn measure_once(
    source: &dyn TimingSource,
    body: &ProbeBody,
) -> crate::error::Result<Option<f64>> {
    let ticket = source.submit(body)?;
    settle(ticket, body.candidate()).await
}

/// Measure a known-low and a known-high probe against the target set
///
/// Each iteration times (high, low) and a reference (low, high) pair, with
/// the two pairs in random order. A line is written every `report_every`
/// iterations.
pub async fn run_calibration<W: Write, R: Rng>(
    config: &CampaignConfig,
    source: &dyn TimingSource,
    rng: &mut R,
    out: &mut W,
) -> Result<CalibrationSummary> {
    let alphabet = KeyAlphabet::from_kind(config.alphabet);
    let targets = target_set(config.seed, alphabet, config.probe.target_count);

    // Keys continue after the targets, as in the extraction layout
    let mut generator = KeyGenerator::new(alphabet, config.probe.target_count as u64);
    let builder_layout = layout(config);
    let spoof = KeySet::new(config.seed, generator.take_keys(config.probe.spoof_count));

    let Some(low_key) = generator.find_before(config.seed, &targets) else {
        bail!("no key can hash below the target set");
    };
    let Some(high_key) = generator.find_after(config.seed, &targets) else {
        bail!("no key can hash above the target set");
    };
    tracing::info!(low = %low_key, high = %high_key, "calibration probes chosen");

    let template = BodyTemplate::new(&spoof, &targets, config.probe.amplification, &builder_layout)?;
    let low_body = template.render(&low_key);
    let high_body = template.render(&high_key);

    let mut stats = CalibrationStats::default();
    let report_every = config.report_every.max(1) as u64;

    for _ in 0..config.iterations {
        let pairs_first = rng.gen_bool(0.5);
        let mut timings = [None; 4];
        // (high, low, ref_low, ref_high) in measurement order
        let order: [(usize, &ProbeBody); 4] = if pairs_first {
            [(0, &high_body), (1, &low_body), (2, &low_body), (3, &high_body)]
        } else {
            [(2, &low_body), (3, &high_body), (0, &high_body), (1, &low_body)]
        };

        for (slot, body) in order {
            timings[slot] = measure_once(source, body).await?;
        }

        let [Some(high), Some(low), Some(ref_low), Some(ref_high)] = timings else {
            continue;
        };
        stats.high.accumulate(high);
        stats.low.accumulate(low);
        stats.ref_low.accumulate(ref_low);
        stats.ref_high.accumulate(ref_high);

        if stats.high.count() % report_every == 0 {
            let summary = stats.summary(&low_key, &high_key);
            writeln!(
                out,
                "delta={:.1} reference={:.1} hdev={:.1} ldev={:.1} count={}",
                summary.delta,
                summary.reference,
                summary.high_stddev,
                summary.low_stddev,
                summary.count
            )?;
        }
    }

    Ok(stats.summary(&low_key, &high_key))
}
