//! Bradley–Terry strengths fitted with Hunter's MM iterations over win/loss pairs.
//!
//! P(A beats B) = π_A / (π_A + π_B). Strengths start at 1.0, are updated from the
//! previous iterate (all denominators first, then all numerators) and normalized to sum
//! to one once iteration stops.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::history::MatchRecord;
use crate::score_dist::{self, Bo5Distribution, ScoreLine};

const MIN_STRENGTH: f64 = 1e-15;

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct MmConfig {
    pub max_iter: usize,
    pub tol: f64,
    /// L2 pull toward π = 1.0; 0 disables it.
    pub l2: f64,
}

impl Default for MmConfig {
    fn default() -> Self {
        Self {
            max_iter: 10_000,
            tol: 1e-10,
            l2: 0.0,
        }
    }
}

impl MmConfig {
    pub fn with_l2(l2: f64) -> Self {
        Self {
            l2,
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StrengthRatings {
    pub ratings: BTreeMap<String, f64>,
    #[serde(default)]
    pub iterations: usize,
    #[serde(default)]
    pub final_delta: f64,
    #[serde(default)]
    pub converged: bool,
}

impl StrengthRatings {
    pub fn strength(&self, id: &str) -> Option<f64> {
        self.ratings.get(id).copied()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.ratings.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.ratings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ratings.is_empty()
    }

    pub fn prob_match_win(&self, a: &str, b: &str) -> f64 {
        let (Some(pa), Some(pb)) = (self.strength(a), self.strength(b)) else {
            return 0.5;
        };
        let den = pa + pb;
        if den <= 0.0 || !den.is_finite() {
            return 0.5;
        }
        pa / den
    }
}

/// Fits Bradley–Terry strengths. Self-pairs and blank ids are skipped.
pub fn fit<S: AsRef<str>>(pairs: &[(S, S)], cfg: &MmConfig) -> StrengthRatings {
    let mut index: BTreeMap<String, usize> = BTreeMap::new();
    let mut observed: Vec<(String, String)> = Vec::with_capacity(pairs.len());
    for (w, l) in pairs {
        let w = w.as_ref().trim();
        let l = l.as_ref().trim();
        if w.is_empty() || l.is_empty() || w == l {
            continue;
        }
        index.entry(w.to_string()).or_insert(0);
        index.entry(l.to_string()).or_insert(0);
        observed.push((w.to_string(), l.to_string()));
    }
    // Sorted ids give a stable iteration order.
    for (i, slot) in index.values_mut().enumerate() {
        *slot = i;
    }
    let names: Vec<String> = index.keys().cloned().collect();
    let n = names.len();

    let mut wins = vec![0.0_f64; n];
    let mut games: Vec<BTreeMap<usize, f64>> = vec![BTreeMap::new(); n];
    for (w, l) in &observed {
        let (wi, li) = (index[w], index[l]);
        wins[wi] += 1.0;
        *games[wi].entry(li).or_insert(0.0) += 1.0;
        *games[li].entry(wi).or_insert(0.0) += 1.0;
    }

    let l2 = if cfg.l2.is_finite() { cfg.l2.max(0.0) } else { 0.0 };
    let mut pi = vec![1.0_f64; n];
    let mut denom = vec![0.0_f64; n];
    let mut iterations = 0usize;
    let mut final_delta = 0.0_f64;
    let mut converged = n == 0;

    for _ in 0..cfg.max_iter {
        if n == 0 {
            break;
        }
        iterations += 1;
        for i in 0..n {
            let mut s: f64 = games[i]
                .iter()
                .filter(|(_, nij)| **nij > 0.0)
                .map(|(j, nij)| nij / (pi[i] + pi[*j]))
                .sum();
            if l2 > 0.0 {
                s += 2.0 * l2;
            }
            denom[i] = s;
        }

        let mut max_delta = 0.0_f64;
        for i in 0..n {
            let numer = wins[i] + 2.0 * l2;
            let next = if denom[i] > 0.0 {
                (numer / denom[i]).max(MIN_STRENGTH)
            } else {
                pi[i]
            };
            max_delta = max_delta.max((next - pi[i]).abs());
            pi[i] = next;
        }
        final_delta = max_delta;
        if max_delta < cfg.tol {
            converged = true;
            break;
        }
    }

    if !converged {
        warn!(
            iterations,
            final_delta, "bradley-terry fit hit the iteration cap; returning current estimate"
        );
    }

    let total: f64 = pi.iter().sum();
    if total > 0.0 && total.is_finite() {
        for v in &mut pi {
            *v /= total;
        }
    }

    debug!(competitors = n, pairs = observed.len(), iterations, "bradley-terry fit done");

    StrengthRatings {
        ratings: names.into_iter().zip(pi).collect(),
        iterations,
        final_delta,
        converged,
    }
}

/// Winner/loser pairs for every decided record.
pub fn pairs_from_records(records: &[MatchRecord]) -> Vec<(String, String)> {
    records
        .iter()
        .filter_map(|m| m.winner_loser())
        .map(|(w, l)| (w.to_string(), l.to_string()))
        .collect()
}

#[derive(Debug, Clone, Serialize)]
pub struct TopScores {
    pub p_match: f64,
    pub p_set: f64,
    pub distribution: Bo5Distribution,
    pub top3: Vec<(ScoreLine, f64)>,
}

impl TopScores {
    /// Best-of-5 lines implied by a match win probability.
    pub fn from_match_prob(p_match: f64) -> Self {
        let p_set = score_dist::invert_match_prob_to_set_prob(p_match, 3);
        let distribution = Bo5Distribution::from_set_prob(p_set);
        Self {
            p_match,
            p_set,
            distribution,
            top3: distribution.top(3),
        }
    }
}

/// Fits on all three pair lists, converts A's match probability into a set probability and
/// ranks the resulting best-of-5 lines. The fitted ratings are returned alongside.
pub fn top_scores(
    a: &str,
    b: &str,
    recent_a: &[(String, String)],
    recent_b: &[(String, String)],
    h2h: &[(String, String)],
    cfg: &MmConfig,
) -> (StrengthRatings, TopScores) {
    let data: Vec<(String, String)> = recent_a
        .iter()
        .chain(recent_b)
        .chain(h2h)
        .cloned()
        .collect();
    let ratings = fit(&data, cfg);
    let scores = TopScores::from_match_prob(ratings.prob_match_win(a, b));
    (ratings, scores)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pairs(raw: &[(&str, &str)]) -> Vec<(String, String)> {
        raw.iter()
            .map(|(w, l)| (w.to_string(), l.to_string()))
            .collect()
    }

    #[test]
    fn two_of_three_favors_a() {
        let r = fit(&[("A", "B"), ("A", "B"), ("B", "A")], &MmConfig::default());
        let p = r.prob_match_win("A", "B");
        assert!(p > 0.5);
        // Closed form for two players: wins_A / total.
        assert!((p - 2.0 / 3.0).abs() < 1e-6);
        assert!(r.converged);
    }

    #[test]
    fn strengths_positive_and_normalized() {
        let data = pairs(&[
            ("A", "B"),
            ("B", "C"),
            ("C", "A"),
            ("A", "C"),
            ("D", "A"),
            ("B", "D"),
            ("A", "B"),
        ]);
        let r = fit(&data, &MmConfig::default());
        let sum: f64 = r.ratings.values().sum();
        assert!((sum - 1.0).abs() < 1e-6);
        assert!(r.ratings.values().all(|v| *v > 0.0));
        for a in ["A", "B", "C", "D"] {
            for b in ["A", "B", "C", "D"] {
                if a != b {
                    let s = r.prob_match_win(a, b) + r.prob_match_win(b, a);
                    assert!((s - 1.0).abs() < 1e-12);
                }
            }
        }
    }

    #[test]
    fn unseen_and_self_pairs_are_neutral() {
        let r = fit(&[("A", "A"), ("", "B"), ("A", "B")], &MmConfig::default());
        assert_eq!(r.len(), 2);
        assert_eq!(r.prob_match_win("A", "Z"), 0.5);
        assert_eq!(fit::<&str>(&[], &MmConfig::default()).prob_match_win("A", "B"), 0.5);
    }

    #[test]
    fn regularization_pulls_toward_even() {
        let data = pairs(&[("A", "B"), ("A", "B"), ("A", "B"), ("B", "A")]);
        let plain = fit(&data, &MmConfig::default()).prob_match_win("A", "B");
        let reg = fit(&data, &MmConfig::with_l2(1.0)).prob_match_win("A", "B");
        assert!(reg > 0.5 && reg < plain);
    }

    #[test]
    fn iteration_cap_is_not_fatal() {
        let cfg = MmConfig {
            max_iter: 1,
            tol: 0.0,
            l2: 0.0,
        };
        let r = fit(&[("A", "B"), ("A", "C"), ("B", "C")], &cfg);
        assert!(!r.converged);
        assert_eq!(r.iterations, 1);
        assert!(r.final_delta > 0.0);
        assert!(r.prob_match_win("A", "C") > 0.5);
    }

    #[test]
    fn top_scores_ranks_three_lines() {
        let a = pairs(&[("A", "X"), ("A", "Y"), ("A", "Z")]);
        let b = pairs(&[("X", "B"), ("B", "Y")]);
        let h2h = pairs(&[("A", "B")]);
        let (ratings, out) = top_scores("A", "B", &a, &b, &h2h, &MmConfig::with_l2(1e-3));
        assert_eq!(ratings.len(), 5);
        assert!(out.p_match > 0.5);
        assert!(out.p_set > 0.5 && out.p_set < out.p_match);
        assert_eq!(out.top3.len(), 3);
        assert!(out.top3[0].0.is_win());
    }
}
