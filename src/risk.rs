use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

const GAP_EPS: f64 = 1e-6;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Locale {
    #[default]
    Ru,
    En,
}

impl Locale {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "ru" => Some(Locale::Ru),
            "en" => Some(Locale::En),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Side {
    A,
    B,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum RiskFlag {
    StabUnderdog,
    BtNarrowVsLong,
    TbRisk,
    Set3Against,
    Rematch,
    Load,
    H2hSetsNegative,
}

impl RiskFlag {
    pub const ALL: [RiskFlag; 7] = [
        RiskFlag::StabUnderdog,
        RiskFlag::BtNarrowVsLong,
        RiskFlag::TbRisk,
        RiskFlag::Set3Against,
        RiskFlag::Rematch,
        RiskFlag::Load,
        RiskFlag::H2hSetsNegative,
    ];

    pub fn key(self) -> &'static str {
        match self {
            RiskFlag::StabUnderdog => "stabUnderdog",
            RiskFlag::BtNarrowVsLong => "btNarrowVsLong",
            RiskFlag::TbRisk => "tbRisk",
            RiskFlag::Set3Against => "set3Against",
            RiskFlag::Rematch => "rematch",
            RiskFlag::Load => "load",
            RiskFlag::H2hSetsNegative => "h2hSetsNegative",
        }
    }

    pub fn message(self, locale: Locale) -> &'static str {
        match (locale, self) {
            (Locale::Ru, RiskFlag::StabUnderdog) => {
                "Аутсайдер стабильнее: +EV против фаворита падает"
            }
            (Locale::Ru, RiskFlag::BtNarrowVsLong) => {
                "BT ожидает ровный счёт; матч тянет к 5-му, риск апсета"
            }
            (Locale::Ru, RiskFlag::TbRisk) => "Фаворит плох в концовках, а их будет много",
            (Locale::Ru, RiskFlag::Set3Against) => {
                "Аутсайдер сильнее на 3-м сете (поворотный момент)"
            }
            (Locale::Ru, RiskFlag::Rematch) => "Свежая адаптация соперника. Не завышай фаворита",
            (Locale::Ru, RiskFlag::Load) => "Фаворит тяжелее нагружен сегодня",
            (Locale::Ru, RiskFlag::H2hSetsNegative) => {
                "Лёгкое преимущество силы съедает H2H-структура"
            }
            (Locale::En, RiskFlag::StabUnderdog) => {
                "Underdog is more stable: edge against the favorite shrinks"
            }
            (Locale::En, RiskFlag::BtNarrowVsLong) => {
                "BT expects a clear result but the match leans to a fifth set: upset risk"
            }
            (Locale::En, RiskFlag::TbRisk) => "Favorite struggles in close finishes and many are expected",
            (Locale::En, RiskFlag::Set3Against) => "Underdog is stronger in the third set",
            (Locale::En, RiskFlag::Rematch) => "Opponent has just adapted in a fresh rematch",
            (Locale::En, RiskFlag::Load) => "Favorite carries the heavier load today",
            (Locale::En, RiskFlag::H2hSetsNegative) => {
                "Small strength edge is eaten by the H2H set record"
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RiskThresholds {
    pub stab_gap: f64,
    pub bt_clear: f64,
    pub bt_decider: f64,
    pub tb_loss: f64,
    pub tb_decider: f64,
    pub set3_edge: f64,
    pub load_games: u32,
    pub load_gap: i64,
    pub eff_gap: f64,
    pub avoid_at: usize,
}

impl Default for RiskThresholds {
    fn default() -> Self {
        Self {
            stab_gap: 0.10,
            bt_clear: 0.65,
            bt_decider: 0.35,
            tb_loss: 0.60,
            tb_decider: 0.40,
            set3_edge: -0.20,
            load_games: 4,
            load_gap: 2,
            eff_gap: 0.10,
            avoid_at: 2,
        }
    }
}

/// Inputs for one pair, all from A's point of view. Stabilities accept 0..=1 or 0..=100.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RiskInputs {
    pub strength_a: f64,
    pub strength_b: f64,
    pub stability_a: f64,
    pub stability_b: f64,
    pub games_today_a: u32,
    pub games_today_b: u32,
    pub p_bt_a: f64,
    pub h2h_sets_a: u32,
    pub h2h_sets_b: u32,
    pub h2h_set3_a: u32,
    pub h2h_set3_b: u32,
    pub tb_lose_a: f64,
    pub tb_lose_b: f64,
    pub p5_base: Option<f64>,
    pub p5_h2h: Option<f64>,
    pub rematch: bool,
}

impl Default for RiskInputs {
    fn default() -> Self {
        Self {
            strength_a: 0.0,
            strength_b: 0.0,
            stability_a: 0.0,
            stability_b: 0.0,
            games_today_a: 0,
            games_today_b: 0,
            p_bt_a: 0.5,
            h2h_sets_a: 0,
            h2h_sets_b: 0,
            h2h_set3_a: 0,
            h2h_set3_b: 0,
            tb_lose_a: 0.5,
            tb_lose_b: 0.5,
            p5_base: None,
            p5_h2h: None,
            rematch: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskFlagSet {
    pub favorite: Side,
    pub flags: BTreeMap<RiskFlag, bool>,
    pub active: Vec<RiskFlag>,
    pub messages: Vec<String>,
    pub risk_score: f64,
    pub avoid_favorite: bool,
}

impl RiskFlagSet {
    pub fn is_active(&self, flag: RiskFlag) -> bool {
        self.flags.get(&flag).copied().unwrap_or(false)
    }

    pub fn active_keys(&self) -> Vec<&'static str> {
        self.active.iter().map(|f| f.key()).collect()
    }
}

/// Maps 0..=1 or 0..=100 stability to 0..=1.
pub fn normalize_stability(s: f64) -> f64 {
    if !s.is_finite() || s < 0.0 {
        return 0.0;
    }
    if s > 1.0 + 1e-9 {
        return (s / 100.0).clamp(0.0, 1.0);
    }
    s.clamp(0.0, 1.0)
}

pub fn fatigue_factor(games_today: u32) -> f64 {
    let extra = games_today.saturating_sub(2) as f64;
    (1.0 - 0.04 * extra).max(0.0)
}

/// Strength (0..=100) discounted by instability and today's workload.
pub fn effective_strength(strength: f64, stability: f64, games_today: u32) -> f64 {
    let s = if strength.is_finite() {
        strength.clamp(0.0, 100.0)
    } else {
        0.0
    };
    let stab = normalize_stability(stability);
    (s * (0.6 + 0.4 * stab) * fatigue_factor(games_today)).clamp(0.0, 100.0)
}

fn safe_gap(num: f64, den: f64) -> f64 {
    if !den.is_finite() || den.abs() < GAP_EPS {
        return 0.0;
    }
    (num / den).clamp(-1.0, 1.0)
}

fn pick_p5(base: Option<f64>, h2h: Option<f64>) -> f64 {
    base.filter(|p| p.is_finite())
        .or(h2h.filter(|p| p.is_finite()))
        .map(|p| p.clamp(0.0, 1.0))
        .unwrap_or(0.0)
}

pub fn evaluate(inputs: &RiskInputs, thresholds: &RiskThresholds, locale: Locale) -> RiskFlagSet {
    let t = thresholds;
    let p_bt = if inputs.p_bt_a.is_finite() {
        inputs.p_bt_a.clamp(0.0, 1.0)
    } else {
        0.5
    };
    let a_fav = p_bt >= 0.5;
    let p_fav = if a_fav { p_bt } else { 1.0 - p_bt };
    // Orients an (A, B) pair to (favorite, underdog).
    let fav_dog = |a: f64, b: f64| if a_fav { (a, b) } else { (b, a) };

    let (stab_fav, stab_dog) = fav_dog(
        normalize_stability(inputs.stability_a),
        normalize_stability(inputs.stability_b),
    );
    let stab_gap_fav = (stab_fav - stab_dog).clamp(-1.0, 1.0);

    let (eff_fav, eff_dog) = fav_dog(
        effective_strength(inputs.strength_a, inputs.stability_a, inputs.games_today_a),
        effective_strength(inputs.strength_b, inputs.stability_b, inputs.games_today_b),
    );
    let eff_gap_fav = ((eff_fav - eff_dog) / 100.0).clamp(-1.0, 1.0);

    let (games_fav, games_dog) = fav_dog(inputs.games_today_a as f64, inputs.games_today_b as f64);
    let load_gap_fav = games_fav - games_dog;

    let (sets_fav, sets_dog) = fav_dog(inputs.h2h_sets_a as f64, inputs.h2h_sets_b as f64);
    let h2h_sets_gap_fav = safe_gap(sets_fav - sets_dog, sets_fav + sets_dog);

    let (s3_fav, s3_dog) = fav_dog(inputs.h2h_set3_a as f64, inputs.h2h_set3_b as f64);
    let set3_edge_fav = safe_gap(s3_fav - s3_dog, s3_fav + s3_dog + GAP_EPS);

    let (tb_fav, _) = fav_dog(inputs.tb_lose_a, inputs.tb_lose_b);
    let tb_fav = if tb_fav.is_finite() {
        tb_fav.clamp(0.0, 1.0)
    } else {
        0.0
    };
    let p5 = pick_p5(inputs.p5_base, inputs.p5_h2h);

    let flags: BTreeMap<RiskFlag, bool> = RiskFlag::ALL
        .iter()
        .map(|flag| {
            let on = match flag {
                RiskFlag::StabUnderdog => stab_gap_fav <= -t.stab_gap,
                RiskFlag::BtNarrowVsLong => p_fav.max(1.0 - p_fav) >= t.bt_clear && p5 >= t.bt_decider,
                RiskFlag::TbRisk => tb_fav >= t.tb_loss && p5 >= t.tb_decider,
                RiskFlag::Set3Against => set3_edge_fav < t.set3_edge,
                RiskFlag::Rematch => inputs.rematch,
                RiskFlag::Load => {
                    games_fav >= t.load_games as f64 && load_gap_fav >= t.load_gap as f64
                }
                RiskFlag::H2hSetsNegative => eff_gap_fav <= t.eff_gap && h2h_sets_gap_fav < 0.0,
            };
            (*flag, on)
        })
        .collect();

    let active: Vec<RiskFlag> = RiskFlag::ALL
        .iter()
        .copied()
        .filter(|f| flags.get(f).copied().unwrap_or(false))
        .collect();
    let messages = active.iter().map(|f| f.message(locale).to_string()).collect();

    RiskFlagSet {
        favorite: if a_fav { Side::A } else { Side::B },
        risk_score: active.len() as f64 / RiskFlag::ALL.len() as f64,
        avoid_favorite: active.len() >= t.avoid_at,
        flags,
        active,
        messages,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quiet_inputs_raise_nothing() {
        let inputs = RiskInputs {
            strength_a: 70.0,
            strength_b: 50.0,
            stability_a: 0.7,
            stability_b: 0.6,
            p_bt_a: 0.6,
            tb_lose_a: 0.3,
            p5_base: Some(0.2),
            ..RiskInputs::default()
        };
        let set = evaluate(&inputs, &RiskThresholds::default(), Locale::En);
        assert!(set.active.is_empty());
        assert_eq!(set.risk_score, 0.0);
        assert!(!set.avoid_favorite);
        assert_eq!(set.favorite, Side::A);
    }

    #[test]
    fn two_flags_avoid_favorite() {
        let inputs = RiskInputs {
            strength_a: 70.0,
            strength_b: 50.0,
            stability_a: 40.0,
            stability_b: 80.0,
            p_bt_a: 0.7,
            p5_base: Some(0.2),
            rematch: true,
            ..RiskInputs::default()
        };
        let set = evaluate(&inputs, &RiskThresholds::default(), Locale::Ru);
        assert!(set.is_active(RiskFlag::StabUnderdog));
        assert!(set.is_active(RiskFlag::Rematch));
        assert_eq!(set.active.len(), 2);
        assert!(set.avoid_favorite);
        assert_eq!(set.messages[1], "Свежая адаптация соперника. Не завышай фаворита");
    }

    #[test]
    fn orientation_follows_bt() {
        let inputs = RiskInputs {
            p_bt_a: 0.3,
            h2h_set3_a: 3,
            h2h_set3_b: 0,
            games_today_a: 1,
            games_today_b: 5,
            p5_h2h: Some(0.5),
            tb_lose_b: 0.7,
            ..RiskInputs::default()
        };
        let set = evaluate(&inputs, &RiskThresholds::default(), Locale::En);
        assert_eq!(set.favorite, Side::B);
        assert!(set.is_active(RiskFlag::Set3Against));
        assert!(set.is_active(RiskFlag::Load));
        assert!(set.is_active(RiskFlag::BtNarrowVsLong));
        assert!(set.is_active(RiskFlag::TbRisk));
        assert_eq!(set.active_keys(), vec!["btNarrowVsLong", "tbRisk", "set3Against", "load"]);
    }

    #[test]
    fn h2h_sets_against_a_narrow_favorite() {
        let inputs = RiskInputs {
            strength_a: 55.0,
            strength_b: 52.0,
            stability_a: 0.5,
            stability_b: 0.5,
            p_bt_a: 0.55,
            h2h_sets_a: 2,
            h2h_sets_b: 6,
            ..RiskInputs::default()
        };
        let set = evaluate(&inputs, &RiskThresholds::default(), Locale::En);
        assert!(set.is_active(RiskFlag::H2hSetsNegative));
        assert!(!set.avoid_favorite);
    }

    #[test]
    fn effective_strength_and_normalization() {
        assert_eq!(normalize_stability(75.0), 0.75);
        assert_eq!(normalize_stability(-3.0), 0.0);
        assert_eq!(fatigue_factor(2), 1.0);
        assert!((fatigue_factor(5) - 0.88).abs() < 1e-12);
        assert!((effective_strength(80.0, 1.0, 0) - 80.0).abs() < 1e-12);
        assert!((effective_strength(80.0, 0.0, 0) - 48.0).abs() < 1e-12);
        assert_eq!(pick_p5(None, None), 0.0);
        assert_eq!(pick_p5(Some(0.3), Some(0.9)), 0.3);
    }
}
