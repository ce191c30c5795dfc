use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::calibration::{safe_ratio, sigmoid};
use crate::history::{self, MatchRecord};
use crate::score_dist::{Bo5Distribution, ScoreLine};

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct MarkovConfig {
    /// Divisor applied to a set's point differential before the sigmoid.
    pub squash_k: f64,
    pub burst_hours: i64,
    pub burst_matches: usize,
    pub short_window: usize,
    pub long_window: usize,
}

impl Default for MarkovConfig {
    fn default() -> Self {
        Self {
            squash_k: 7.0,
            burst_hours: 48,
            burst_matches: 5,
            short_window: 3,
            long_window: 5,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct MarkovForecast {
    /// Mean per-set win probability from the favored side's window.
    pub p_fav_set: f64,
    pub p_opp_set: f64,
    /// Combined set probability p1 / (p1 + p2).
    pub p_set: f64,
    pub window_fav: usize,
    pub window_opp: usize,
    pub distribution: Bo5Distribution,
    pub match_win: f64,
    pub top_score: ScoreLine,
    pub at_least_two_sets: f64,
    pub decider: f64,
}

/// Matches to average for one side: a short window after a burst of recent play.
pub fn window_len(records: &[MatchRecord], now: DateTime<Utc>, cfg: &MarkovConfig) -> usize {
    if history::matches_within(records, now, cfg.burst_hours) >= cfg.burst_matches {
        cfg.short_window
    } else {
        cfg.long_window
    }
}

/// Mean of sigmoid(diff / k) over every set in the window; 0.5 without sets.
pub fn mean_set_prob(window: &[MatchRecord], squash_k: f64) -> f64 {
    let k = if squash_k.is_finite() && squash_k > 0.0 {
        squash_k
    } else {
        MarkovConfig::default().squash_k
    };
    let probs: Vec<f64> = window
        .iter()
        .flat_map(|m| m.point_diffs())
        .map(|d| sigmoid(d as f64 / k))
        .collect();
    if probs.is_empty() {
        return 0.5;
    }
    probs.iter().sum::<f64>() / probs.len() as f64
}

/// `fav` and `opp` are most-recent-first and oriented to their own side.
pub fn forecast(
    fav: &[MatchRecord],
    opp: &[MatchRecord],
    now: DateTime<Utc>,
    cfg: &MarkovConfig,
) -> MarkovForecast {
    let window_fav = window_len(fav, now, cfg).min(fav.len());
    let window_opp = window_len(opp, now, cfg).min(opp.len());

    let p1 = mean_set_prob(&fav[..window_fav], cfg.squash_k);
    let p2 = mean_set_prob(&opp[..window_opp], cfg.squash_k);
    let p = safe_ratio(p1, p1 + p2, 0.5);

    let distribution = Bo5Distribution::from_set_prob(p);
    let match_win = safe_ratio(distribution.win_prob(), distribution.total(), 0.5);

    MarkovForecast {
        p_fav_set: p1,
        p_opp_set: p2,
        p_set: p,
        window_fav,
        window_opp,
        distribution,
        match_win,
        top_score: distribution.most_likely(),
        at_least_two_sets: distribution.at_least_two_sets(),
        decider: distribution.decider_prob(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration as ChronoDuration, TimeZone};

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 5, 2, 20, 0, 0).unwrap()
    }

    fn rec(sets: &[(u16, u16)], hours_ago: i64) -> MatchRecord {
        MatchRecord::new("P", "X", sets).at(now() - ChronoDuration::hours(hours_ago))
    }

    #[test]
    fn burst_of_play_shortens_window() {
        let cfg = MarkovConfig::default();
        let busy: Vec<MatchRecord> = (0..6).map(|i| rec(&[(11, 7)], i * 3)).collect();
        let calm: Vec<MatchRecord> = (0..6).map(|i| rec(&[(11, 7)], 24 * (i + 3))).collect();
        assert_eq!(window_len(&busy, now(), &cfg), 3);
        assert_eq!(window_len(&calm, now(), &cfg), 5);
    }

    #[test]
    fn symmetric_form_is_even() {
        let a = vec![rec(&[(11, 7), (8, 11), (11, 9)], 50)];
        let b = vec![rec(&[(11, 7), (8, 11), (11, 9)], 50)];
        let f = forecast(&a, &b, now(), &MarkovConfig::default());
        assert!((f.p_set - 0.5).abs() < 1e-12);
        assert!((f.match_win - 0.5).abs() < 1e-12);
    }

    #[test]
    fn dominant_side_is_favored() {
        let a: Vec<MatchRecord> = (0..5)
            .map(|i| rec(&[(11, 4), (11, 6), (11, 5)], 24 * (i + 3)))
            .collect();
        let b: Vec<MatchRecord> = (0..5)
            .map(|i| rec(&[(6, 11), (11, 9), (7, 11), (9, 11)], 24 * (i + 3)))
            .collect();
        let f = forecast(&a, &b, now(), &MarkovConfig::default());
        assert!(f.p_fav_set > 0.5 && f.p_opp_set < 0.5);
        assert!(f.match_win > f.p_set);
        assert!(f.top_score.is_win());
        assert!(f.at_least_two_sets > f.match_win);
    }

    #[test]
    fn empty_history_is_neutral() {
        let f = forecast(&[], &[], now(), &MarkovConfig::default());
        assert_eq!(f.p_set, 0.5);
        assert_eq!(f.window_fav, 0);
        assert!((f.match_win - 0.5).abs() < 1e-12);
    }
}
