//! Logit-space committee over four probability sources with bootstrap uncertainty.
//!
//! The committee blends the score, Bradley–Terry, head-to-head and external estimates in
//! logit space, applies temperature scaling, and shrinks toward 0.5 when the sources disagree.
//! Uncertainty comes from resampling each source from a Beta posterior sized by its effective
//! sample count and re-running the same blend.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::{Beta, Distribution};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::calibration::{clamp_prob, logit, sigmoid, temperature_scale};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Source {
    Score,
    BradleyTerry,
    HeadToHead,
    External,
}

/// One source's probability for side A together with how much data stands behind it.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ProbabilityEstimate {
    pub source: Source,
    pub p: f64,
    pub n_eff: f64,
}

impl ProbabilityEstimate {
    pub fn new(source: Source, p: f64, n_eff: f64) -> Self {
        Self { source, p, n_eff }
    }

    /// Even estimate backed by a single pseudo-observation.
    pub fn neutral(source: Source) -> Self {
        Self::new(source, 0.5, 1.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CommitteeInputs {
    pub score: f64,
    pub bt: f64,
    pub h2h: f64,
    pub ext: f64,
}

impl CommitteeInputs {
    pub fn new(score: f64, bt: f64, h2h: f64, ext: f64) -> Self {
        Self { score, bt, h2h, ext }
    }

    /// Splits four tagged estimates into probabilities and their effective sizes.
    pub fn from_estimates(
        score: &ProbabilityEstimate,
        bt: &ProbabilityEstimate,
        h2h: &ProbabilityEstimate,
        ext: &ProbabilityEstimate,
    ) -> (Self, EffectiveSizes) {
        (
            Self::new(score.p, bt.p, h2h.p, ext.p),
            EffectiveSizes {
                score: score.n_eff,
                bt: bt.n_eff,
                h2h: h2h.n_eff,
                ext: ext.n_eff,
            },
        )
    }

    fn clamped(&self) -> [f64; 4] {
        [
            clamp_prob(self.score),
            clamp_prob(self.bt),
            clamp_prob(self.h2h),
            clamp_prob(self.ext),
        ]
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CommitteeWeights {
    pub bias: f64,
    pub score: f64,
    pub bt: f64,
    pub h2h: f64,
    pub ext: f64,
}

impl Default for CommitteeWeights {
    fn default() -> Self {
        Self {
            bias: 0.0,
            score: 0.9,
            bt: 0.6,
            h2h: 0.3,
            ext: 0.4,
        }
    }
}

/// Pseudo-observation counts used for the Beta resampling of each source.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EffectiveSizes {
    pub score: f64,
    pub bt: f64,
    pub h2h: f64,
    pub ext: f64,
}

impl Default for EffectiveSizes {
    fn default() -> Self {
        Self {
            score: 12.0,
            bt: 20.0,
            h2h: 10.0,
            ext: 8.0,
        }
    }
}

impl EffectiveSizes {
    pub fn uniform(n: f64) -> Self {
        Self {
            score: n,
            bt: n,
            h2h: n,
            ext: n,
        }
    }

    fn as_array(&self) -> [f64; 4] {
        [self.score, self.bt, self.h2h, self.ext]
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DecisionThresholds {
    pub no_bet_range: f64,
    pub no_bet_concordance: f64,
    pub no_bet_sigma: f64,
    pub lean_range: f64,
    pub lean_concordance: f64,
    pub green_value: f64,
    /// Minimum |pBT - pScore| for opposite-side sources to count as a conflict.
    pub conflict_gap: f64,
}

impl Default for DecisionThresholds {
    fn default() -> Self {
        Self {
            no_bet_range: 0.25,
            no_bet_concordance: 0.55,
            no_bet_sigma: 0.07,
            lean_range: 0.15,
            lean_concordance: 0.68,
            green_value: 0.03,
            conflict_gap: 0.12,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CommitteeOptions {
    pub weights: CommitteeWeights,
    pub temperature: f64,
    pub n_boot: usize,
    pub n_eff: EffectiveSizes,
    /// Skips resampling when set.
    pub sigma_hat: Option<f64>,
    /// Input std-dev at which the disagreement shrink reaches zero.
    pub shrink_scale: f64,
    pub thresholds: DecisionThresholds,
}

impl Default for CommitteeOptions {
    fn default() -> Self {
        Self {
            weights: CommitteeWeights::default(),
            temperature: 1.0,
            n_boot: 200,
            n_eff: EffectiveSizes::default(),
            sigma_hat: None,
            shrink_scale: 0.25,
            thresholds: DecisionThresholds::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum BetColor {
    Red,
    Yellow,
    Green,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Verdict {
    NoBet,
    Lean,
    Bet(BetColor),
}

impl Verdict {
    pub fn label(&self) -> &'static str {
        match self {
            Verdict::NoBet => "NO_BET",
            Verdict::Lean => "LEAN",
            Verdict::Bet(BetColor::Red) => "BET (red)",
            Verdict::Bet(BetColor::Yellow) => "BET (yellow)",
            Verdict::Bet(BetColor::Green) => "BET (green)",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ConsensusResult {
    /// Calibrated, disagreement-shrunk probability for side A.
    pub p: f64,
    pub committee: f64,
    pub p_cal: f64,
    pub shrink: f64,
    pub value: f64,
    pub utility: f64,
    pub range: f64,
    pub concordance: f64,
    pub sigma_hat: f64,
    pub sign_conflict: bool,
    pub verdict: Verdict,
    pub confidence_pct: u8,
}

struct Blend {
    committee: f64,
    p_cal: f64,
    shrink: f64,
    p_adj: f64,
}

fn blend(xs: &[f64; 4], opts: &CommitteeOptions) -> Blend {
    let w = &opts.weights;
    let z = w.bias
        + w.score * logit(xs[0])
        + w.bt * logit(xs[1])
        + w.h2h * logit(xs[2])
        + w.ext * logit(xs[3]);
    let committee = sigmoid(z);
    let p_cal = temperature_scale(committee, opts.temperature);

    let scale = if opts.shrink_scale > 0.0 {
        opts.shrink_scale
    } else {
        CommitteeOptions::default().shrink_scale
    };
    let shrink = 1.0 - (population_std(xs) / scale).min(1.0);
    Blend {
        committee,
        p_cal,
        shrink,
        p_adj: 0.5 + (p_cal - 0.5) * shrink,
    }
}

fn population_std(xs: &[f64]) -> f64 {
    if xs.is_empty() {
        return 0.0;
    }
    let n = xs.len() as f64;
    let mean = xs.iter().sum::<f64>() / n;
    (xs.iter().map(|x| (x - mean).powi(2)).sum::<f64>() / n).sqrt()
}

fn sample_std(xs: &[f64]) -> f64 {
    if xs.len() < 2 {
        return 0.0;
    }
    let n = xs.len() as f64;
    let mean = xs.iter().sum::<f64>() / n;
    (xs.iter().map(|x| (x - mean).powi(2)).sum::<f64>() / (n - 1.0)).sqrt()
}

/// Range R (max - min) and concordance K (1 - mean pairwise absolute difference).
pub fn consensus_stats(xs: &[f64]) -> (f64, f64) {
    if xs.is_empty() {
        return (0.0, 1.0);
    }
    let max = xs.iter().copied().fold(f64::MIN, f64::max);
    let min = xs.iter().copied().fold(f64::MAX, f64::min);
    let mut sum = 0.0;
    let mut pairs = 0usize;
    for i in 0..xs.len() {
        for j in (i + 1)..xs.len() {
            sum += (xs[i] - xs[j]).abs();
            pairs += 1;
        }
    }
    let mean_diff = if pairs > 0 { sum / pairs as f64 } else { 0.0 };
    (max - min, 1.0 - mean_diff)
}

pub fn confidence_pct(concordance: f64, range: f64, sigma_hat: f64) -> u8 {
    let c = 0.5 * concordance + 0.3 * (1.0 - range) + 0.2 * (1.0 - sigma_hat);
    (100.0 * c).round().clamp(0.0, 100.0) as u8
}

fn pseudo_count(n_eff: f64) -> f64 {
    if !n_eff.is_finite() || n_eff < 1.0 {
        return 1.0;
    }
    n_eff.round().max(1.0)
}

fn draw<R: Rng + ?Sized>(p: f64, n_eff: f64, rng: &mut R) -> f64 {
    let n = pseudo_count(n_eff);
    match Beta::new(1.0 + p * n, 1.0 + (1.0 - p) * n) {
        Ok(beta) => clamp_prob(beta.sample(rng)),
        Err(_) => p,
    }
}

/// Standard deviation of the adjusted probability under Beta resampling of every source.
pub fn bootstrap_sigma<R: Rng + ?Sized>(
    xs: &[f64; 4],
    opts: &CommitteeOptions,
    rng: &mut R,
) -> f64 {
    if opts.n_boot < 2 {
        return 0.0;
    }
    let sizes = opts.n_eff.as_array();
    let draws: Vec<f64> = (0..opts.n_boot)
        .map(|_| {
            let mut sampled = [0.0; 4];
            for (slot, (p, n)) in sampled.iter_mut().zip(xs.iter().zip(sizes.iter())) {
                *slot = draw(*p, *n, rng);
            }
            blend(&sampled, opts).p_adj
        })
        .collect();
    sample_std(&draws)
}

pub fn decide<R: Rng + ?Sized>(
    inputs: &CommitteeInputs,
    target_q: f64,
    opts: &CommitteeOptions,
    rng: &mut R,
) -> ConsensusResult {
    let xs = inputs.clamped();
    let b = blend(&xs, opts);
    let (range, concordance) = consensus_stats(&xs);

    let sigma_hat = match opts.sigma_hat {
        Some(s) if s.is_finite() => s.max(0.0),
        _ => bootstrap_sigma(&xs, opts, rng),
    };

    let unit = |v: f64| v.clamp(0.0, 1.0);
    let utility = unit(concordance) * unit(1.0 - range) * unit(1.0 - sigma_hat);
    let q = if target_q.is_finite() { target_q } else { 0.5 };
    let value = (b.p_adj - q) * utility;

    let t = &opts.thresholds;
    let (p_score, p_bt) = (xs[0], xs[1]);
    let sign_conflict =
        (p_bt - 0.5) * (p_score - 0.5) < 0.0 && (p_bt - p_score).abs() >= t.conflict_gap;

    let verdict = if range > t.no_bet_range
        || concordance < t.no_bet_concordance
        || sigma_hat > t.no_bet_sigma
        || sign_conflict
    {
        Verdict::NoBet
    } else if range > t.lean_range || concordance < t.lean_concordance {
        Verdict::Lean
    } else if value <= 0.0 {
        Verdict::Bet(BetColor::Red)
    } else if value >= t.green_value {
        Verdict::Bet(BetColor::Green)
    } else {
        Verdict::Bet(BetColor::Yellow)
    };

    debug!(
        committee = b.committee,
        p_adj = b.p_adj,
        range,
        concordance,
        sigma_hat,
        verdict = verdict.label(),
        "committee decision"
    );

    ConsensusResult {
        p: b.p_adj,
        committee: b.committee,
        p_cal: b.p_cal,
        shrink: b.shrink,
        value,
        utility,
        range,
        concordance,
        sigma_hat,
        sign_conflict,
        verdict,
        confidence_pct: confidence_pct(concordance, range, sigma_hat),
    }
}

pub fn decide_seeded(
    inputs: &CommitteeInputs,
    target_q: f64,
    opts: &CommitteeOptions,
    seed: u64,
) -> ConsensusResult {
    let mut rng = StdRng::seed_from_u64(seed);
    decide(inputs, target_q, opts, &mut rng)
}
