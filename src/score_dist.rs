use serde::{Deserialize, Serialize};

const SET_PROB_EPS: f64 = 1e-9;
const INVERT_LO: f64 = 1e-6;
const INVERT_TOL: f64 = 1e-9;
const INVERT_MAX_ITER: usize = 200;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ScoreLine {
    #[serde(rename = "3:0")]
    ThreeZero,
    #[serde(rename = "3:1")]
    ThreeOne,
    #[serde(rename = "3:2")]
    ThreeTwo,
    #[serde(rename = "0:3")]
    ZeroThree,
    #[serde(rename = "1:3")]
    OneThree,
    #[serde(rename = "2:3")]
    TwoThree,
}

impl ScoreLine {
    pub const ALL: [ScoreLine; 6] = [
        ScoreLine::ThreeZero,
        ScoreLine::ThreeOne,
        ScoreLine::ThreeTwo,
        ScoreLine::ZeroThree,
        ScoreLine::OneThree,
        ScoreLine::TwoThree,
    ];

    pub fn label(self) -> &'static str {
        match self {
            ScoreLine::ThreeZero => "3:0",
            ScoreLine::ThreeOne => "3:1",
            ScoreLine::ThreeTwo => "3:2",
            ScoreLine::ZeroThree => "0:3",
            ScoreLine::OneThree => "1:3",
            ScoreLine::TwoThree => "2:3",
        }
    }

    pub fn is_win(self) -> bool {
        matches!(
            self,
            ScoreLine::ThreeZero | ScoreLine::ThreeOne | ScoreLine::ThreeTwo
        )
    }
}

/// Best-of-5 outcome probabilities for the side whose set win probability was given.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Bo5Distribution {
    pub p_set: f64,
    pub three_zero: f64,
    pub three_one: f64,
    pub three_two: f64,
    pub zero_three: f64,
    pub one_three: f64,
    pub two_three: f64,
}

impl Bo5Distribution {
    pub fn from_set_prob(p_set: f64) -> Self {
        let p = clamp_set_prob(p_set);
        let q = 1.0 - p;
        Self {
            p_set: p,
            three_zero: p.powi(3),
            three_one: n_choose_r(3, 1) * p.powi(3) * q,
            three_two: n_choose_r(4, 2) * p.powi(3) * q.powi(2),
            zero_three: q.powi(3),
            one_three: n_choose_r(3, 1) * q.powi(3) * p,
            two_three: n_choose_r(4, 2) * q.powi(3) * p.powi(2),
        }
    }

    pub fn prob(&self, line: ScoreLine) -> f64 {
        match line {
            ScoreLine::ThreeZero => self.three_zero,
            ScoreLine::ThreeOne => self.three_one,
            ScoreLine::ThreeTwo => self.three_two,
            ScoreLine::ZeroThree => self.zero_three,
            ScoreLine::OneThree => self.one_three,
            ScoreLine::TwoThree => self.two_three,
        }
    }

    pub fn win_prob(&self) -> f64 {
        self.three_zero + self.three_one + self.three_two
    }

    pub fn loss_prob(&self) -> f64 {
        self.zero_three + self.one_three + self.two_three
    }

    pub fn total(&self) -> f64 {
        self.win_prob() + self.loss_prob()
    }

    /// Probability the match reaches a fifth set.
    pub fn decider_prob(&self) -> f64 {
        self.three_two + self.two_three
    }

    /// Probability of taking at least two sets.
    pub fn at_least_two_sets(&self) -> f64 {
        self.win_prob() + self.two_three
    }

    /// Probability of four or more sets being played.
    pub fn long_match_prob(&self) -> f64 {
        self.three_one + self.three_two + self.one_three + self.two_three
    }

    /// All six lines, most likely first. Ties keep the canonical order.
    pub fn ranked(&self) -> Vec<(ScoreLine, f64)> {
        let mut out: Vec<(ScoreLine, f64)> =
            ScoreLine::ALL.iter().map(|l| (*l, self.prob(*l))).collect();
        out.sort_by(|a, b| b.1.total_cmp(&a.1));
        out
    }

    pub fn top(&self, k: usize) -> Vec<(ScoreLine, f64)> {
        let mut ranked = self.ranked();
        ranked.truncate(k);
        ranked
    }

    pub fn most_likely(&self) -> ScoreLine {
        self.ranked()
            .first()
            .map(|(l, _)| *l)
            .unwrap_or(ScoreLine::ThreeTwo)
    }
}

/// Probability of winning a best-of-(2k-1) contest, negative-binomial form.
pub fn match_win_prob_best_of(p_set: f64, k: u32) -> f64 {
    let k = k.max(1);
    let p = clamp_set_prob(p_set);
    let q = 1.0 - p;
    (0..k)
        .map(|r| n_choose_r(k - 1 + r, r) * p.powi(k as i32) * q.powi(r as i32))
        .sum()
}

/// Set win probability that reproduces `target` as a best-of-(2k-1) match probability.
pub fn invert_match_prob_to_set_prob(target: f64, k: u32) -> f64 {
    invert_match_prob_with(target, k, INVERT_TOL, INVERT_MAX_ITER)
}

pub fn invert_match_prob_with(target: f64, k: u32, tol: f64, max_iter: usize) -> f64 {
    let target = clamp_set_prob(target);
    let mut lo = INVERT_LO;
    let mut hi = 1.0 - INVERT_LO;
    for _ in 0..max_iter {
        let mid = 0.5 * (lo + hi);
        let val = match_win_prob_best_of(mid, k);
        if (val - target).abs() < tol {
            return mid;
        }
        if val < target {
            lo = mid;
        } else {
            hi = mid;
        }
    }
    0.5 * (lo + hi)
}

pub fn n_choose_r(n: u32, r: u32) -> f64 {
    if r > n {
        return 0.0;
    }
    let r = r.min(n - r);
    let mut num = 1.0_f64;
    let mut den = 1.0_f64;
    for i in 1..=r {
        num *= (n - (r - i)) as f64;
        den *= i as f64;
    }
    num / den
}

fn clamp_set_prob(p: f64) -> f64 {
    if !p.is_finite() {
        return 0.5;
    }
    p.clamp(SET_PROB_EPS, 1.0 - SET_PROB_EPS)
}
