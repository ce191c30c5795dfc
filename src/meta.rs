//! Secondary calibrated layer: a winner logistic over windowed probabilities, a long-match
//! (over 3.5 sets) logistic over pair texture, and a coupling term between the two.

use serde::{Deserialize, Serialize};

use crate::calibration::{logit, sigmoid};
use crate::history::MatchRecord;
use crate::patterns::PatternSummary;
use crate::window_prob::WindowedProbabilities;

const HORIZON_EPS: f64 = 1e-3;
const PAIR_WINDOW: usize = 10;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WinnerParams {
    pub w10: f64,
    pub w5: f64,
    pub w3: f64,
    pub lambda_h2h: f64,
    /// Cap on the blended H2H logit shift.
    pub c_h2h: f64,
    pub beta: [f64; 4],
    pub rho_disp: f64,
    pub phi_upset: f64,
}

impl Default for WinnerParams {
    fn default() -> Self {
        Self {
            w10: 0.56,
            w5: 0.28,
            w3: 0.16,
            lambda_h2h: 0.61,
            c_h2h: 0.22,
            beta: [0.032, 0.027, 0.11, 0.09],
            rho_disp: 0.88,
            phi_upset: 0.93,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LongMatchParams {
    pub intercept: f64,
    pub ext_mean: f64,
    pub stab_min: f64,
    pub tiebreak_rate: f64,
    pub long_fraction: f64,
    pub strength_gap: f64,
    pub dry_rate: f64,
    pub ext_gap: f64,
    pub coin_flip: f64,
    pub recent_sweep: f64,
    pub score_skew: f64,
}

impl Default for LongMatchParams {
    fn default() -> Self {
        Self {
            intercept: -5.71,
            ext_mean: 0.038,
            stab_min: 0.023,
            tiebreak_rate: 0.62,
            long_fraction: 0.49,
            strength_gap: 1.05,
            dry_rate: 0.54,
            ext_gap: 0.38,
            coin_flip: 0.67,
            recent_sweep: 0.46,
            score_skew: 0.91,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct UpsetRadarParams {
    pub band_lo: f64,
    pub band_hi: f64,
    pub confidence: f64,
    pub ext_lead: f64,
    pub stab_lead: f64,
}

impl Default for UpsetRadarParams {
    fn default() -> Self {
        Self {
            band_lo: 0.40,
            band_hi: 0.60,
            confidence: 0.80,
            ext_lead: 15.0,
            stab_lead: 15.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MetaParams {
    pub winner: WinnerParams,
    pub long_match: LongMatchParams,
    pub kappa: f64,
    pub upset_radar: UpsetRadarParams,
    pub clamp_lo: f64,
    pub clamp_hi: f64,
}

impl Default for MetaParams {
    fn default() -> Self {
        Self {
            winner: WinnerParams::default(),
            long_match: LongMatchParams::default(),
            kappa: 0.22,
            upset_radar: UpsetRadarParams::default(),
            clamp_lo: 0.05,
            clamp_hi: 0.95,
        }
    }
}

/// Features for side A. Extension and stability are on a 0..=100 scale.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MetaFeatures {
    pub p10: f64,
    pub p5: f64,
    pub p3: f64,
    pub p10_h2h: Option<f64>,
    pub p5_h2h: Option<f64>,
    pub p3_h2h: Option<f64>,
    pub ext_a: f64,
    pub ext_b: f64,
    pub stab_a: f64,
    pub stab_b: f64,
    /// Difference of strengths mapped to [-1, 1] around 50, A minus B.
    pub strength_gap: f64,
    pub upset_radar: bool,
    pub coin_flip: bool,
    pub tiebreak_rate: f64,
    pub long_fraction: f64,
    pub dry_rate: f64,
    pub recent_sweep: bool,
    pub score_skew: f64,
}

impl Default for MetaFeatures {
    fn default() -> Self {
        Self {
            p10: 0.5,
            p5: 0.5,
            p3: 0.5,
            p10_h2h: None,
            p5_h2h: None,
            p3_h2h: None,
            ext_a: 0.0,
            ext_b: 0.0,
            stab_a: 50.0,
            stab_b: 50.0,
            strength_gap: 0.0,
            upset_radar: false,
            coin_flip: false,
            tiebreak_rate: 0.0,
            long_fraction: 0.0,
            dry_rate: 0.0,
            recent_sweep: false,
            score_skew: 0.0,
        }
    }
}

/// Texture of the two latest-ten windows taken together.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct PairTexture {
    pub tiebreak_rate: f64,
    pub long_fraction: f64,
    pub dry_rate: f64,
    pub recent_sweep: bool,
    pub score_skew: f64,
}

impl PairTexture {
    pub fn from_recents(recent_a: &[MatchRecord], recent_b: &[MatchRecord]) -> Self {
        let a = &recent_a[..recent_a.len().min(PAIR_WINDOW)];
        let b = &recent_b[..recent_b.len().min(PAIR_WINDOW)];

        let (mut tb, mut sets, mut long, mut matches, mut dry) = (0u32, 0u32, 0u32, 0u32, 0u32);
        let mut skew = 0i64;
        for m in a.iter().chain(b) {
            if !m.sets.is_empty() {
                matches += 1;
                if m.sets.len() >= 4 {
                    long += 1;
                }
            }
            if m.is_sweep() {
                dry += 1;
            }
            for s in &m.sets {
                if s.is_tiebreak_like() {
                    tb += 1;
                }
                sets += 1;
            }
            skew += m.points_for() as i64 - m.points_against() as i64;
        }

        let swept_lately = |r: &[MatchRecord]| r.iter().take(2).any(|m| m.is_sweep());
        let ratio = |n: u32, d: u32| if d > 0 { n as f64 / d as f64 } else { 0.0 };
        Self {
            tiebreak_rate: ratio(tb, sets),
            long_fraction: ratio(long, matches),
            dry_rate: ratio(dry, matches),
            recent_sweep: swept_lately(a) || swept_lately(b),
            score_skew: if sets > 0 { skew as f64 / sets as f64 } else { 0.0 },
        }
    }
}

/// Maps a 0..=100 strength to [-1, 1] around 50.
pub fn strength_unit(v: f64) -> f64 {
    if !v.is_finite() {
        return 0.0;
    }
    ((v - 50.0) / 50.0).clamp(-1.0, 1.0)
}

pub fn is_coin_flip(p10: f64) -> bool {
    (0.47..=0.53).contains(&p10)
}

/// Flags a near-even base window that conflicts with a confident call for A or with an
/// underdog who holds up better in long matches.
pub fn upset_radar(
    p10: f64,
    confidence_a: f64,
    ext: (f64, f64),
    stab: (f64, f64),
    params: &UpsetRadarParams,
) -> bool {
    if !(params.band_lo..=params.band_hi).contains(&p10) {
        return false;
    }
    let (ext_fav, ext_dog, stab_fav, stab_dog) = if p10 >= 0.5 {
        (ext.0, ext.1, stab.0, stab.1)
    } else {
        (ext.1, ext.0, stab.1, stab.0)
    };
    confidence_a >= params.confidence
        || ext_dog - ext_fav >= params.ext_lead
        || stab_dog - stab_fav >= params.stab_lead
}

impl MetaFeatures {
    /// Builds the vector from window probabilities, per-side patterns and strengths.
    /// `recent_*` are most-recent-first and oriented to their own side; `confidence_a` is the
    /// committee's probability for A.
    #[allow(clippy::too_many_arguments)]
    pub fn build(
        windows: &WindowedProbabilities,
        patterns_a: &PatternSummary,
        patterns_b: &PatternSummary,
        strength_a: f64,
        strength_b: f64,
        recent_a: &[MatchRecord],
        recent_b: &[MatchRecord],
        confidence_a: f64,
        params: &MetaParams,
    ) -> Self {
        let ext_a = patterns_a.extension_score();
        let ext_b = patterns_b.extension_score();
        let stab_a = (100.0 * patterns_a.stability().unwrap_or(0.5)).round();
        let stab_b = (100.0 * patterns_b.stability().unwrap_or(0.5)).round();
        let texture = PairTexture::from_recents(recent_a, recent_b);

        Self {
            p10: windows.p10,
            p5: windows.p5,
            p3: windows.p3,
            p10_h2h: Some(windows.p10_h2h),
            p5_h2h: Some(windows.p5_h2h),
            p3_h2h: Some(windows.p3_h2h),
            ext_a,
            ext_b,
            stab_a,
            stab_b,
            strength_gap: strength_unit(strength_a) - strength_unit(strength_b),
            upset_radar: upset_radar(
                windows.p10,
                confidence_a,
                (ext_a, ext_b),
                (stab_a, stab_b),
                &params.upset_radar,
            ),
            coin_flip: is_coin_flip(windows.p10),
            tiebreak_rate: texture.tiebreak_rate,
            long_fraction: texture.long_fraction,
            dry_rate: texture.dry_rate,
            recent_sweep: texture.recent_sweep,
            score_skew: texture.score_skew,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MetaPrediction {
    pub winner_raw: f64,
    pub winner: f64,
    pub long_match_raw: f64,
    pub long_match: f64,
    pub coupling: f64,
}

fn horizon(p: f64) -> f64 {
    if p.is_finite() {
        p.clamp(HORIZON_EPS, 1.0 - HORIZON_EPS)
    } else {
        0.5
    }
}

fn bound(v: f64, params: &MetaParams) -> f64 {
    v.clamp(params.clamp_lo, params.clamp_hi)
}

/// Winner probability for A before coupling, already clamped.
pub fn winner_prob(x: &MetaFeatures, params: &MetaParams) -> f64 {
    let w = &params.winner;
    let sum = w.w10 + w.w5 + w.w3;
    let sum = if sum > 0.0 { sum } else { 1.0 };
    let (w10, w5, w3) = (w.w10 / sum, w.w5 / sum, w.w3 / sum);

    let (p10, p5, p3) = (horizon(x.p10), horizon(x.p5), horizon(x.p3));
    let with = |h: Option<f64>, base: f64| h.map(horizon).unwrap_or(base);
    let (q10, q5, q3) = (with(x.p10_h2h, p10), with(x.p5_h2h, p5), with(x.p3_h2h, p3));

    let base = w10 * logit(p10) + w5 * logit(p5) + w3 * logit(p3);
    let shift = w10 * (logit(q10) - logit(p10))
        + w5 * (logit(q5) - logit(p5))
        + w3 * (logit(q3) - logit(p3));
    let shift = shift.clamp(-w.c_h2h, w.c_h2h);

    let radar = if x.upset_radar { 1.0 } else { 0.0 };
    let z = base
        + w.lambda_h2h * shift
        + w.beta[0] * (x.stab_a - x.stab_b) / 100.0
        + w.beta[1] * (x.ext_a - x.ext_b) / 100.0
        - w.beta[2] * x.strength_gap.abs()
        - w.beta[3] * radar;
    let raw = sigmoid(z);

    let disp = ((x.p10 - 0.5).abs()).clamp(0.0, 0.5) / 0.5;
    let upset = if x.upset_radar { w.phi_upset } else { 1.0 };
    let shrink = (1.0 - w.rho_disp * disp) * upset;
    bound(0.5 + (raw - 0.5) * shrink, params)
}

/// Probability of four or more sets, already clamped.
pub fn long_match_prob(x: &MetaFeatures, params: &MetaParams) -> f64 {
    let a = &params.long_match;
    let flag = |b: bool| if b { 1.0 } else { 0.0 };
    let z = a.intercept
        + a.ext_mean * (x.ext_a + x.ext_b) / 2.0
        + a.stab_min * x.stab_a.min(x.stab_b)
        + a.tiebreak_rate * x.tiebreak_rate
        + a.long_fraction * x.long_fraction
        - a.strength_gap * x.strength_gap.abs()
        - a.dry_rate * x.dry_rate
        - a.ext_gap * (x.ext_a - x.ext_b).abs()
        + a.coin_flip * flag(x.coin_flip)
        - a.recent_sweep * flag(x.recent_sweep)
        - a.score_skew * x.score_skew;
    bound(sigmoid(z), params)
}

pub fn predict(x: &MetaFeatures, params: &MetaParams) -> MetaPrediction {
    let winner_raw = winner_prob(x, params);
    let long_match_raw = long_match_prob(x, params);
    let coupling = (params.kappa * (0.5 - (winner_raw - 0.5).abs())).clamp(0.0, 0.25);
    MetaPrediction {
        winner_raw,
        winner: bound(winner_raw * (1.0 - coupling), params),
        long_match_raw,
        long_match: bound(long_match_raw + coupling * (1.0 - long_match_raw), params),
        coupling,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn favored() -> MetaFeatures {
        MetaFeatures {
            p10: 0.58,
            p5: 0.62,
            p3: 0.6,
            p10_h2h: Some(0.6),
            p5_h2h: Some(0.64),
            p3_h2h: Some(0.61),
            ext_a: 78.0,
            ext_b: 70.0,
            stab_a: 72.0,
            stab_b: 60.0,
            strength_gap: 0.2,
            ..MetaFeatures::default()
        }
    }

    #[test]
    fn final_winner_stays_in_band() {
        let params = MetaParams::default();
        for p in [0.0, 0.001, 0.3, 0.5, 0.97, 1.0] {
            let x = MetaFeatures {
                p10: p,
                p5: p,
                p3: p,
                ..MetaFeatures::default()
            };
            let out = predict(&x, &params);
            assert!((0.05..=0.95).contains(&out.winner), "p={p} -> {}", out.winner);
            assert!((0.05..=0.95).contains(&out.long_match));
        }
    }

    #[test]
    fn upset_radar_lowers_favored_vector() {
        let params = MetaParams::default();
        let calm = predict(&favored(), &params);
        let flagged = predict(
            &MetaFeatures {
                upset_radar: true,
                ..favored()
            },
            &params,
        );
        assert!(calm.winner > 0.5);
        assert!(flagged.winner < calm.winner);
    }

    #[test]
    fn upset_radar_pulls_underdog_toward_even() {
        let params = MetaParams::default();
        let underdog = MetaFeatures {
            p10: 0.4,
            p5: 0.05,
            p3: 0.05,
            ext_a: 80.0,
            ext_b: 60.0,
            ..MetaFeatures::default()
        };
        let calm = predict(&underdog, &params);
        let flagged = predict(
            &MetaFeatures {
                upset_radar: true,
                ..underdog
            },
            &params,
        );
        assert!(calm.winner_raw < 0.5);
        // Damping shrinks toward 0.5, which outweighs the radar penalty below even.
        assert!(flagged.winner_raw > calm.winner_raw);
        assert!(flagged.winner > calm.winner);
        assert!((calm.winner_raw - 0.2362).abs() < 1e-3);
        assert!((flagged.winner_raw - 0.2448).abs() < 1e-3);
    }

    #[test]
    fn coupling_is_largest_near_even() {
        let params = MetaParams::default();
        let even = predict(&MetaFeatures::default(), &params);
        assert!((even.winner_raw - 0.5).abs() < 1e-12);
        assert!((even.coupling - 0.11).abs() < 1e-12);
        assert!(even.long_match > even.long_match_raw);
        let lopsided = predict(&favored(), &params);
        assert!(lopsided.coupling < even.coupling);
    }

    #[test]
    fn h2h_shift_is_capped() {
        let params = MetaParams::default();
        let base = MetaFeatures::default();
        let huge = MetaFeatures {
            p10_h2h: Some(0.99),
            p5_h2h: Some(0.99),
            p3_h2h: Some(0.99),
            ..base
        };
        let capped = winner_prob(&huge, &params);
        let expected = bound(sigmoid(0.61 * 0.22), &params);
        assert!((capped - expected).abs() < 1e-12);
    }

    #[test]
    fn radar_rule() {
        let r = UpsetRadarParams::default();
        assert!(upset_radar(0.55, 0.85, (70.0, 70.0), (60.0, 60.0), &r));
        assert!(upset_radar(0.55, 0.6, (60.0, 80.0), (60.0, 60.0), &r));
        assert!(!upset_radar(0.55, 0.6, (70.0, 75.0), (60.0, 70.0), &r));
        assert!(!upset_radar(0.75, 0.95, (60.0, 90.0), (60.0, 60.0), &r));
    }

    #[test]
    fn pair_texture_counts() {
        let a = vec![
            MatchRecord::new("A", "X", &[(11, 5), (11, 7), (11, 9)]),
            MatchRecord::new("A", "Y", &[(12, 10), (9, 11), (11, 8), (11, 6)]),
        ];
        let b = vec![MatchRecord::new("B", "Z", &[(5, 11), (11, 13), (8, 11)])];
        let t = PairTexture::from_recents(&a, &b);
        assert!((t.tiebreak_rate - 2.0 / 10.0).abs() < 1e-12);
        assert!((t.long_fraction - 1.0 / 3.0).abs() < 1e-12);
        assert!((t.dry_rate - 2.0 / 3.0).abs() < 1e-12);
        assert!(t.recent_sweep);
        assert!(is_coin_flip(0.5) && !is_coin_flip(0.54));
        assert_eq!(strength_unit(100.0), 1.0);
        assert_eq!(strength_unit(25.0), -0.5);
    }
}
