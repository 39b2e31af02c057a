//! Scorer/reporter
//!
//! Checks the discriminator's low/high picks against ground-truth positions
//! and keeps the running totals of a campaign.
//!
//! A round is a *hit* when `position(low) > position(high)`. Read literally
//! that counts rounds where the early pick sorts after the late one, i.e.
//! disagreements. The comparison is kept as-is so totals stay comparable with
//! existing result corpora; the report states the rule next to the number.

use std::fmt;

use crate::discriminator::TimingStat;
use crate::oracle::{hash, HashValue, KeySet};

/// Rule used to count hits, printed with every report
pub const HIT_RULE: &str = "hit = pos(low) > pos(high)";

/// A probe key with the timings measured for it
#[derive(Debug, Clone, PartialEq)]
pub struct Observation {
    pub key: String,
    pub stat: TimingStat,
}

impl Observation {
    pub fn new(key: impl Into<String>, stat: TimingStat) -> Self {
        Self {
            key: key.into(),
            stat,
        }
    }
}

/// One chosen candidate with its ground truth
#[derive(Debug, Clone, PartialEq)]
pub struct Candidate {
    pub key: String,
    pub hash: HashValue,
    pub avg: f64,
    pub relative_stddev: f64,
    pub position: usize,
}

impl fmt::Display for Candidate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "key={} hsh={} std={:.2} avg={:.2} pos={}",
            self.key, self.hash, self.relative_stddev, self.avg, self.position
        )
    }
}

/// Record of one scored extraction round
#[derive(Debug, Clone, PartialEq)]
pub struct RoundOutcome {
    /// Completion order, starting at 0
    pub index: usize,
    pub low: Candidate,
    pub high: Candidate,
    pub hit: bool,
}

impl fmt::Display for RoundOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] min: {} || max: {}", self.index, self.low, self.high)
    }
}

/// Totals of a campaign, complete or aborted
#[derive(Debug, Clone, PartialEq)]
pub struct ScoreReport {
    pub rounds: usize,
    pub skipped: usize,
    pub hits: usize,
    pub targets: Vec<String>,
    pub results: Vec<String>,
}

impl ScoreReport {
    /// Hits as a percentage of scored rounds (0 when nothing was scored)
    pub fn hit_rate(&self) -> f64 {
        if self.rounds == 0 {
            return 0.0;
        }
        self.hits as f64 * 100.0 / self.rounds as f64
    }

    /// `target0:target1:...@low0:high0:low1:high1:...`
    pub fn candidate_list(&self) -> String {
        format!("{}@{}", self.targets.join(":"), self.results.join(":"))
    }
}

impl fmt::Display for ScoreReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{}", self.candidate_list())?;
        write!(
            f,
            "Hits {} of {} rounds ({:.1}%, {}), {} skipped",
            self.hits,
            self.rounds,
            self.hit_rate(),
            HIT_RULE,
            self.skipped
        )
    }
}

/// Running campaign totals, owned by the campaign driver
#[derive(Debug, Clone)]
pub struct Scorer {
    seed: u32,
    targets: KeySet,
    rounds: usize,
    skipped: usize,
    hits: usize,
    results: Vec<String>,
}

impl Scorer {
    pub fn new(seed: u32, targets: KeySet) -> Self {
        Self {
            seed,
            targets,
            rounds: 0,
            skipped: 0,
            hits: 0,
            results: Vec::new(),
        }
    }

    pub fn targets(&self) -> &KeySet {
        &self.targets
    }

    fn candidate(&self, observation: &Observation) -> Candidate {
        let (avg, _) = observation.stat.mean_stddev();
        let key_hash = hash(self.seed, &observation.key);
        Candidate {
            key: observation.key.clone(),
            hash: key_hash,
            avg,
            relative_stddev: observation.stat.relative_stddev(),
            position: self.targets.position_of(key_hash),
        }
    }

    /// Score one round's picks against the target set
    pub fn record_round(&mut self, low: &Observation, high: &Observation) -> RoundOutcome {
        let low = self.candidate(low);
        let high = self.candidate(high);

        let hit = low.position > high.position;
        if hit {
            self.hits += 1;
        }

        let outcome = RoundOutcome {
            index: self.rounds,
            low,
            high,
            hit,
        };

        self.rounds += 1;
        self.results.push(outcome.low.key.clone());
        self.results.push(outcome.high.key.clone());
        outcome
    }

    /// Count a round that produced no usable picks
    pub fn skip_round(&mut self, reason: &str) {
        self.skipped += 1;
        tracing::warn!(skipped = self.skipped, reason, "extraction round skipped");
    }

    pub fn rounds(&self) -> usize {
        self.rounds
    }

    pub fn skipped(&self) -> usize {
        self.skipped
    }

    pub fn hits(&self) -> usize {
        self.hits
    }

    /// Progress line printed after every round
    pub fn progress_line(&self) -> String {
        format!("{}@{}", self.targets.joined(), self.results.join(":"))
    }

    /// Running hit-rate line printed after every round
    pub fn hit_rate_line(&self) -> String {
        let report = self.report();
        format!(
            "hits={} rounds={} rate={:.1}% ({})",
            report.hits,
            report.rounds,
            report.hit_rate(),
            HIT_RULE
        )
    }

    pub fn report(&self) -> ScoreReport {
        ScoreReport {
            rounds: self.rounds,
            skipped: self.skipped,
            hits: self.hits,
            targets: self.targets.keys().to_vec(),
            results: self.results.clone(),
        }
    }
}
