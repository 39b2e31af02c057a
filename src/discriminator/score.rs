// Low/high scoring heuristic
//
// weight = exp(-stddev / avg)
// high   = avg * weight   (high mean, low relative noise)
// low    = avg / weight   (low mean, penalized by noise)
//
// Totally adhoc, but existing result sets were produced with exactly this
// form, so it must not be "improved" in place.

use super::timing_stat::TimingStat;

/// Low and high scores of one probe
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Scores {
    pub low: f64,
    pub high: f64,
}

/// Score one probe from its mean and standard deviation
pub fn score(avg: f64, stddev: f64) -> Scores {
    let weight = (-stddev / avg).exp();
    Scores {
        low: avg / weight,
        high: avg * weight,
    }
}

/// The chosen early (low) and late (high) probes of a round
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Picks {
    pub low: usize,
    pub high: usize,
    pub low_score: f64,
    pub high_score: f64,
}

/// Pick the probe minimizing the low score and the one maximizing the high score
///
/// Probes without samples are ignored. Comparisons are strict, so the first
/// probe wins ties; the low search starts from +inf and the high search from 0.
/// Returns `None` when no probe has samples.
pub fn pick_extremes(stats: &[TimingStat]) -> Option<Picks> {
    let first = stats.iter().position(|s| !s.is_empty())?;

    let mut picks = Picks {
        low: first,
        high: first,
        low_score: f64::INFINITY,
        high_score: 0.0,
    };

    for (i, stat) in stats.iter().enumerate().skip(first) {
        if stat.is_empty() {
            continue;
        }
        let (avg, stddev) = stat.mean_stddev();
        let scores = score(avg, stddev);

        if scores.low < picks.low_score {
            picks.low_score = scores.low;
            picks.low = i;
        }
        if scores.high > picks.high_score {
            picks.high_score = scores.high;
            picks.high = i;
        }
    }

    Some(picks)
}
