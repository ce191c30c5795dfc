//! End-to-end forecast: every estimator, the committee, risk flags and the meta layer for one
//! pair, plus a parallel batch runner.

use std::env;

use chrono::{DateTime, Utc};
use once_cell::sync::OnceCell;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::bradley_terry::{self, StrengthRatings, TopScores};
use crate::committee::{
    self, CommitteeInputs, CommitteeOptions, ConsensusResult, ProbabilityEstimate, Source,
};
use crate::config::EngineConfig;
use crate::history::{self, HeadToHead, MatchRecord};
use crate::markov::{self, MarkovForecast};
use crate::meta::{self, MetaFeatures, MetaPrediction};
use crate::patterns::PatternSummary;
use crate::risk::{self, RiskFlagSet, RiskInputs};
use crate::window_prob::WindowedProbabilities;

static BATCH_POOL: OnceCell<Option<rayon::ThreadPool>> = OnceCell::new();

/// One side of a pairing: its id and most-recent-first records oriented to itself.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CompetitorHistory {
    pub id: String,
    #[serde(default)]
    pub recent: Vec<MatchRecord>,
    /// Strength on a 0..=100 scale; derived from recent form when absent.
    #[serde(default)]
    pub strength: Option<f64>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ForecastRequest {
    pub a: CompetitorHistory,
    pub b: CompetitorHistory,
    #[serde(default)]
    pub h2h: Vec<MatchRecord>,
    /// Reference time for workload and rematch checks; the wall clock when absent.
    #[serde(default)]
    pub now: Option<DateTime<Utc>>,
    #[serde(default)]
    pub target_q: Option<f64>,
    /// Caller-supplied probability for A, e.g. from a market.
    #[serde(default)]
    pub external: Option<f64>,
    #[serde(default)]
    pub seed: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct SideSummary {
    pub id: String,
    pub strength: f64,
    pub effective_strength: f64,
    pub stability: Option<f64>,
    pub extension: f64,
    pub matches_today: usize,
    pub patterns: PatternSummary,
}

#[derive(Debug, Clone, Serialize)]
pub struct Forecast {
    pub a: SideSummary,
    pub b: SideSummary,
    pub now: DateTime<Utc>,
    pub ratings: StrengthRatings,
    pub bt: TopScores,
    pub markov: MarkovForecast,
    pub windows: WindowedProbabilities,
    pub estimates: Vec<ProbabilityEstimate>,
    pub consensus: ConsensusResult,
    pub risk: RiskFlagSet,
    pub meta_features: MetaFeatures,
    pub meta: MetaPrediction,
}

impl Forecast {
    pub fn estimate(&self, source: Source) -> Option<f64> {
        self.estimates.iter().find(|e| e.source == source).map(|e| e.p)
    }
}

/// Laplace-smoothed share of meetings won by the reference side.
pub fn h2h_estimate(h2h: &HeadToHead, n_eff: f64) -> ProbabilityEstimate {
    let t = h2h.match_tally();
    if t.total() == 0 {
        return ProbabilityEstimate::neutral(Source::HeadToHead);
    }
    let p = (t.reference as f64 + 1.0) / (t.total() as f64 + 2.0);
    ProbabilityEstimate::new(Source::HeadToHead, p, n_eff)
}

fn has_decided(records: &[MatchRecord]) -> bool {
    records.iter().any(MatchRecord::is_decided)
}

fn side_summary(
    side: &CompetitorHistory,
    form_score: f64,
    now: DateTime<Utc>,
) -> SideSummary {
    let patterns = PatternSummary::from_matches(&side.recent);
    let stability = patterns.stability();
    let strength = side
        .strength
        .filter(|s| s.is_finite())
        .unwrap_or(100.0 * form_score)
        .clamp(0.0, 100.0);
    let matches_today = history::matches_on_day(&side.recent, now);
    SideSummary {
        id: side.id.clone(),
        strength,
        effective_strength: risk::effective_strength(
            strength,
            stability.unwrap_or(0.5),
            matches_today as u32,
        ),
        stability,
        extension: patterns.extension_score(),
        matches_today,
        patterns,
    }
}

pub fn run_forecast(req: &ForecastRequest, cfg: &EngineConfig) -> Forecast {
    let now = req.now.unwrap_or_else(Utc::now);
    let (a_id, b_id) = (req.a.id.as_str(), req.b.id.as_str());
    let h2h = HeadToHead::from_records(a_id, b_id, &req.h2h);
    let sizes = &cfg.committee.n_eff;

    let (ratings, bt) = bradley_terry::top_scores(
        a_id,
        b_id,
        &bradley_terry::pairs_from_records(&req.a.recent),
        &bradley_terry::pairs_from_records(&req.b.recent),
        &h2h.to_pairs(),
        &cfg.mm,
    );
    debug!(p_bt = bt.p_match, competitors = ratings.len(), "strengths fitted");

    let markov = markov::forecast(&req.a.recent, &req.b.recent, now, &cfg.markov);
    let windows = WindowedProbabilities::compute(&req.a.recent, &req.b.recent, &h2h);
    debug!(p_score = markov.match_win, p10 = windows.p10, "form estimates ready");

    // Estimates with nothing behind them carry the minimum weight.
    let score = if markov.window_fav + markov.window_opp == 0 {
        ProbabilityEstimate::new(Source::Score, markov.match_win, 1.0)
    } else {
        ProbabilityEstimate::new(Source::Score, markov.match_win, sizes.score)
    };
    let bt_est = if ratings.contains(a_id) && ratings.contains(b_id) {
        ProbabilityEstimate::new(Source::BradleyTerry, bt.p_match, sizes.bt)
    } else {
        ProbabilityEstimate::new(Source::BradleyTerry, bt.p_match, 1.0)
    };
    let h2h_est = h2h_estimate(&h2h, sizes.h2h);
    let ext = match req.external.filter(|p| p.is_finite()) {
        Some(p) => ProbabilityEstimate::new(Source::External, p, sizes.ext),
        None if has_decided(&req.a.recent) || has_decided(&req.b.recent) => {
            ProbabilityEstimate::new(Source::External, windows.p10_h2h, sizes.ext)
        }
        None => ProbabilityEstimate::new(Source::External, windows.p10_h2h, 1.0),
    };

    let (inputs, n_eff) = CommitteeInputs::from_estimates(&score, &bt_est, &h2h_est, &ext);
    let opts = CommitteeOptions {
        n_eff,
        ..cfg.committee
    };
    let target_q = req.target_q.unwrap_or(cfg.target_q);
    let consensus = committee::decide_seeded(&inputs, target_q, &opts, req.seed);

    let a = side_summary(&req.a, windows.form_a, now);
    let b = side_summary(&req.b, windows.form_b, now);

    let sets = h2h.set_tally();
    let third = h2h.third_set_tally();
    let risk_inputs = RiskInputs {
        strength_a: a.strength,
        strength_b: b.strength,
        stability_a: a.stability.unwrap_or(0.5),
        stability_b: b.stability.unwrap_or(0.5),
        games_today_a: a.matches_today as u32,
        games_today_b: b.matches_today as u32,
        p_bt_a: bt.p_match,
        h2h_sets_a: sets.reference,
        h2h_sets_b: sets.other,
        h2h_set3_a: third.reference,
        h2h_set3_b: third.other,
        tb_lose_a: a.patterns.tiebreak_loss_rate().unwrap_or(0.5),
        tb_lose_b: b.patterns.tiebreak_loss_rate().unwrap_or(0.5),
        p5_base: Some(markov.decider),
        p5_h2h: h2h.decider_rate(),
        rematch: h2h.is_rematch_within(now, cfg.rematch_hours),
    };
    let risk = risk::evaluate(&risk_inputs, &cfg.risk, cfg.locale);

    let meta_features = MetaFeatures::build(
        &windows,
        &a.patterns,
        &b.patterns,
        a.effective_strength,
        b.effective_strength,
        &req.a.recent,
        &req.b.recent,
        consensus.p,
        &cfg.meta,
    );
    let meta = meta::predict(&meta_features, &cfg.meta);
    debug!(
        verdict = consensus.verdict.label(),
        flags = risk.active.len(),
        meta_winner = meta.winner,
        "forecast done"
    );

    Forecast {
        a,
        b,
        now,
        ratings,
        bt,
        markov,
        windows,
        estimates: vec![score, bt_est, h2h_est, ext],
        consensus,
        risk,
        meta_features,
        meta,
    }
}

/// Runs independent requests in parallel; output order follows input order.
pub fn run_batch(requests: &[ForecastRequest], cfg: &EngineConfig) -> Vec<Forecast> {
    let pool = BATCH_POOL.get_or_init(build_batch_pool);
    with_batch_pool(pool, || {
        requests
            .par_iter()
            .map(|req| run_forecast(req, cfg))
            .collect()
    })
}

fn build_batch_pool() -> Option<rayon::ThreadPool> {
    rayon::ThreadPoolBuilder::new()
        .num_threads(batch_parallelism())
        .build()
        .ok()
}

fn with_batch_pool<T>(pool: &Option<rayon::ThreadPool>, action: impl FnOnce() -> T + Send) -> T
where
    T: Send,
{
    if let Some(pool) = pool.as_ref() {
        pool.install(action)
    } else {
        action()
    }
}

fn batch_parallelism() -> usize {
    env::var("FORECAST_THREADS")
        .ok()
        .and_then(|val| val.parse::<usize>().ok())
        .unwrap_or(4)
        .clamp(1, 64)
}
