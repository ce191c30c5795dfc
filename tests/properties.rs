use rand::SeedableRng;
use rand::rngs::StdRng;

use tt_forecast::bradley_terry::{MmConfig, fit};
use tt_forecast::committee::{
    CommitteeInputs, CommitteeOptions, EffectiveSizes, Verdict, decide, decide_seeded,
};
use tt_forecast::meta::{MetaFeatures, MetaParams, predict};
use tt_forecast::risk::{Locale, RiskInputs, RiskThresholds, evaluate};
use tt_forecast::score_dist::{
    Bo5Distribution, invert_match_prob_to_set_prob, match_win_prob_best_of,
};

fn league_pairs() -> Vec<(String, String)> {
    let raw = [
        ("Kravets", "Moroz"),
        ("Moroz", "Lysenko"),
        ("Lysenko", "Kravets"),
        ("Kravets", "Lysenko"),
        ("Bondar", "Kravets"),
        ("Moroz", "Bondar"),
        ("Bondar", "Lysenko"),
        ("Kravets", "Moroz"),
        ("Lysenko", "Bondar"),
    ];
    raw.iter()
        .map(|(w, l)| (w.to_string(), l.to_string()))
        .collect()
}

#[test]
fn strengths_are_positive_and_sum_to_one() {
    let r = fit(&league_pairs(), &MmConfig::default());
    assert!(r.converged);
    assert!(r.ratings.values().all(|v| *v > 0.0));
    let sum: f64 = r.ratings.values().sum();
    assert!((sum - 1.0).abs() < 1e-6);
}

#[test]
fn pairwise_probabilities_are_complementary() {
    let r = fit(&league_pairs(), &MmConfig::with_l2(1e-3));
    let ids: Vec<&String> = r.ratings.keys().collect();
    for a in &ids {
        for b in &ids {
            if a != b {
                let s = r.prob_match_win(a, b) + r.prob_match_win(b, a);
                assert!((s - 1.0).abs() < 1e-12);
            }
        }
    }
}

#[test]
fn two_wins_of_three_favor_the_winner() {
    let r = fit(&[("A", "B"), ("A", "B"), ("B", "A")], &MmConfig::default());
    assert!(r.prob_match_win("A", "B") > 0.5);
}

#[test]
fn score_lines_sum_to_one() {
    let mut p = 0.0;
    while p <= 1.0 {
        let d = Bo5Distribution::from_set_prob(p);
        assert!((d.total() - 1.0).abs() < 1e-9, "p={p}");
        p += 0.05;
    }
    let even = Bo5Distribution::from_set_prob(0.5);
    assert!((even.three_zero + even.three_one + even.three_two - 0.5).abs() < 1e-12);
}

#[test]
fn inversion_round_trips() {
    for i in 1..20 {
        let p = i as f64 / 20.0;
        let back = invert_match_prob_to_set_prob(match_win_prob_best_of(p, 3), 3);
        assert!((back - p).abs() < 1e-5, "p={p} back={back}");
    }
}

#[test]
fn unanimous_well_supported_committee_bets() {
    let opts = CommitteeOptions {
        n_eff: EffectiveSizes::uniform(400.0),
        ..CommitteeOptions::default()
    };
    for p in [0.62, 0.7, 0.8] {
        let r = decide_seeded(&CommitteeInputs::new(p, p, p, p), 0.5, &opts, 99);
        assert_eq!(r.range, 0.0);
        assert!((r.concordance - 1.0).abs() < 1e-12);
        assert!(r.p >= p, "p={p} adj={}", r.p);
        assert!(matches!(r.verdict, Verdict::Bet(_)), "p={p} {:?}", r.verdict);
    }
}

#[test]
fn split_committee_never_bets() {
    let mut rng = StdRng::seed_from_u64(3);
    let r = decide(
        &CommitteeInputs::new(0.8, 0.8, 0.2, 0.2),
        0.5,
        &CommitteeOptions::default(),
        &mut rng,
    );
    assert!(r.range > 0.25);
    assert_eq!(r.verdict, Verdict::NoBet);
}

#[test]
fn avoid_favorite_tracks_flag_count() {
    let t = RiskThresholds::default();
    let calm = evaluate(
        &RiskInputs {
            strength_a: 80.0,
            strength_b: 40.0,
            stability_a: 0.8,
            stability_b: 0.5,
            p_bt_a: 0.6,
            tb_lose_a: 0.2,
            p5_base: Some(0.1),
            ..RiskInputs::default()
        },
        &t,
        Locale::Ru,
    );
    assert!(calm.active.is_empty());
    assert!(!calm.avoid_favorite);

    let loaded = evaluate(
        &RiskInputs {
            strength_a: 80.0,
            strength_b: 40.0,
            stability_a: 0.8,
            stability_b: 0.5,
            p_bt_a: 0.6,
            tb_lose_a: 0.2,
            p5_base: Some(0.1),
            games_today_a: 5,
            games_today_b: 1,
            rematch: true,
            ..RiskInputs::default()
        },
        &t,
        Locale::Ru,
    );
    assert_eq!(loaded.active.len(), 2);
    assert!(loaded.avoid_favorite);
    assert!((loaded.risk_score - 2.0 / 7.0).abs() < 1e-12);
}

#[test]
fn meta_winner_is_bounded_and_radar_lowers_it() {
    let params = MetaParams::default();
    let favored = MetaFeatures {
        p10: 0.57,
        p5: 0.6,
        p3: 0.63,
        p10_h2h: Some(0.58),
        p5_h2h: Some(0.61),
        p3_h2h: Some(0.64),
        ext_a: 80.0,
        ext_b: 74.0,
        stab_a: 70.0,
        stab_b: 62.0,
        strength_gap: 0.1,
        ..MetaFeatures::default()
    };
    let plain = predict(&favored, &params);
    let radar = predict(
        &MetaFeatures {
            upset_radar: true,
            ..favored
        },
        &params,
    );
    assert!((0.05..=0.95).contains(&plain.winner));
    assert!((0.05..=0.95).contains(&radar.winner));
    assert!(radar.winner < plain.winner);
}
