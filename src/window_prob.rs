use serde::{Deserialize, Serialize};

use crate::calibration::{logit, sigmoid};
use crate::history::{HeadToHead, MatchRecord};

/// Laplace-smoothed form rates for one side over a window of its own records.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FormRates {
    pub matches: f64,
    pub sets: f64,
    pub deciders: f64,
    pub tiebreaks: f64,
    pub n_matches: usize,
}

impl FormRates {
    pub fn from_matches(records: &[MatchRecord]) -> Self {
        let (mut mw, mut ml) = (0u32, 0u32);
        let (mut sw, mut sl) = (0u32, 0u32);
        let (mut dw, mut dl, mut dt) = (0u32, 0u32, 0u32);
        let (mut tw, mut tl, mut tt) = (0u32, 0u32, 0u32);

        for m in records {
            if m.sets.is_empty() {
                continue;
            }
            if m.own_won() {
                mw += 1;
            } else {
                ml += 1;
            }
            for s in &m.sets {
                if s.own_won() {
                    sw += 1;
                } else if s.own_lost() {
                    sl += 1;
                }
                if s.is_tiebreak_like() {
                    tt += 1;
                    if s.own_won() {
                        tw += 1;
                    } else if s.own_lost() {
                        tl += 1;
                    }
                }
            }
            // Only full-distance matches have a decider.
            if matches!(m.sets.len(), 3 | 5) {
                dt += 1;
                if let Some(last) = m.sets.last() {
                    if last.own_won() {
                        dw += 1;
                    } else if last.own_lost() {
                        dl += 1;
                    }
                }
            }
        }

        let laplace = |w: u32, l: u32, prior: f64| (w as f64 + prior) / ((w + l) as f64 + 2.0 * prior);
        Self {
            matches: laplace(mw, ml, 1.0),
            sets: laplace(sw, sl, 2.0),
            deciders: if dt > 0 { laplace(dw, dl, 1.0) } else { 0.5 },
            tiebreaks: if tt > 0 { laplace(tw, tl, 1.0) } else { 0.5 },
            n_matches: (mw + ml) as usize,
        }
    }

    pub fn score(&self) -> f64 {
        0.40 * self.matches + 0.30 * self.sets + 0.20 * self.deciders + 0.10 * self.tiebreaks
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct WindowEstimate {
    pub p: f64,
    /// Logistic slope, grows with the number of matches behind the estimate.
    pub k: f64,
    pub score_gap: f64,
}

pub fn window_estimate(a: &[MatchRecord], b: &[MatchRecord]) -> WindowEstimate {
    let fa = FormRates::from_matches(a);
    let fb = FormRates::from_matches(b);
    let d = fa.score() - fb.score();
    let eff_n = (fa.n_matches + fb.n_matches).min(20) as f64;
    let k = 5.5 * (0.5 + 0.5 * (eff_n / 20.0));
    let p = sigmoid(k * d).clamp(0.01, 0.99);
    WindowEstimate { p, k, score_gap: d }
}

/// Signed H2H lean in [-0.5, 0.5] for the reference side, and its weight.
pub fn h2h_lean(h2h: &HeadToHead) -> (f64, f64) {
    if h2h.is_empty() {
        return (0.0, 0.0);
    }
    let m = h2h.match_tally();
    let s = h2h.set_tally();
    let hm = (m.reference as f64 + 1.0) / (m.total() as f64 + 2.0);
    let hs = (s.reference as f64 + 2.0) / (s.total() as f64 + 4.0);
    let diff = 0.6 * hm + 0.4 * hs - 0.5;
    let conf = (m.total() as f64 / 6.0).min(1.0);
    (diff, 0.6 * conf)
}

fn with_h2h(est: &WindowEstimate, lean: f64, weight: f64) -> f64 {
    if weight <= 0.0 {
        return est.p;
    }
    sigmoid(logit(est.p) + est.k * weight * lean).clamp(0.0, 1.0)
}

/// Empirical win probabilities for side A over the last 3, 5 and 10 matches.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct WindowedProbabilities {
    pub p3: f64,
    pub p5: f64,
    pub p10: f64,
    pub p3_h2h: f64,
    pub p5_h2h: f64,
    pub p10_h2h: f64,
    /// Window score of A over its last 10 matches, 0..=1.
    pub form_a: f64,
    pub form_b: f64,
}

impl WindowedProbabilities {
    /// `recent_a` / `recent_b` are most-recent-first; `h2h` is oriented to A.
    pub fn compute(recent_a: &[MatchRecord], recent_b: &[MatchRecord], h2h: &HeadToHead) -> Self {
        let take = |r: &[MatchRecord], n: usize| r[..n.min(r.len())].to_vec();
        let e10 = window_estimate(&take(recent_a, 10), &take(recent_b, 10));
        let e5 = window_estimate(&take(recent_a, 5), &take(recent_b, 5));
        let e3 = window_estimate(&take(recent_a, 3), &take(recent_b, 3));
        let (lean, weight) = h2h_lean(h2h);
        Self {
            p3: e3.p,
            p5: e5.p,
            p10: e10.p,
            p3_h2h: with_h2h(&e3, lean, weight),
            p5_h2h: with_h2h(&e5, lean, weight),
            p10_h2h: with_h2h(&e10, lean, weight),
            form_a: FormRates::from_matches(&take(recent_a, 10)).score(),
            form_b: FormRates::from_matches(&take(recent_b, 10)).score(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn win(own: &str) -> MatchRecord {
        MatchRecord::new(own, "X", &[(11, 6), (11, 8), (11, 9)])
    }

    fn loss(own: &str) -> MatchRecord {
        MatchRecord::new(own, "Y", &[(6, 11), (11, 8), (9, 11), (7, 11)])
    }

    #[test]
    fn empty_windows_are_even() {
        let e = window_estimate(&[], &[]);
        assert!((e.p - 0.5).abs() < 1e-12);
        assert!((e.k - 2.75).abs() < 1e-12);
    }

    #[test]
    fn better_form_wins_more() {
        let a: Vec<_> = (0..10).map(|_| win("A")).collect();
        let b: Vec<_> = (0..10).map(|_| loss("B")).collect();
        let w = WindowedProbabilities::compute(&a, &b, &HeadToHead::default());
        assert!(w.p10 > w.p5 && w.p5 > w.p3 && w.p3 > 0.5);
        assert_eq!(w.p10, w.p10_h2h);
        assert!(w.form_a > w.form_b);
    }

    #[test]
    fn h2h_shifts_toward_dominant_side() {
        let a: Vec<_> = (0..5).map(|_| win("A")).collect();
        let b: Vec<_> = (0..5).map(|_| win("B")).collect();
        let h2h = HeadToHead::from_records(
            "A",
            "B",
            &[
                MatchRecord::new("A", "B", &[(11, 3), (11, 4), (11, 5)]),
                MatchRecord::new("B", "A", &[(4, 11), (11, 9), (5, 11), (8, 11)]),
            ],
        );
        let w = WindowedProbabilities::compute(&a, &b, &h2h);
        assert!(w.p5_h2h > w.p5);
        let (lean, weight) = h2h_lean(&h2h);
        assert!(lean > 0.0);
        assert!((weight - 0.2).abs() < 1e-12);
    }
}
