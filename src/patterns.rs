use serde::{Deserialize, Serialize};

use crate::history::MatchRecord;

/// `hits` out of `total` occurrences of a match situation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rate {
    pub hits: u32,
    pub total: u32,
}

impl Rate {
    pub fn rate(&self) -> Option<f64> {
        if self.total == 0 {
            None
        } else {
            Some(self.hits as f64 / self.total as f64)
        }
    }

    fn record(&mut self, hit: bool) {
        self.total += 1;
        if hit {
            self.hits += 1;
        }
    }
}

/// Situational counters for one competitor, built from records oriented to that competitor.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PatternSummary {
    pub win_after_1_0: Rate,
    pub win_after_0_1: Rate,
    pub loss_after_2_1: Rate,
    pub win_after_1_2: Rate,
    pub win_after_two_set_run: Rate,
    pub loss_after_two_set_run: Rate,
    pub win_at_2_2: Rate,
    pub win_from_0_2: Rate,
    pub win_after_two_set_slump: Rate,
    pub tiebreak_losses: Rate,
}

impl PatternSummary {
    pub fn from_matches(matches: &[MatchRecord]) -> Self {
        let mut out = Self::default();
        for m in matches {
            let sets = &m.sets;
            let won = m.own_won();

            if let Some(first) = sets.first() {
                if first.own_won() {
                    out.win_after_1_0.record(won);
                }
                if first.own_lost() {
                    out.win_after_0_1.record(won);
                }
            }

            if sets.len() >= 3 {
                let (a3, b3) = running_score(&sets[..3]);
                if a3 == 2 && b3 == 1 {
                    out.loss_after_2_1.record(!won);
                }
                if a3 == 1 && b3 == 2 {
                    out.win_after_1_2.record(won);
                }
            }

            if sets.windows(2).any(|w| w[0].own_won() && w[1].own_won()) {
                out.win_after_two_set_run.record(won);
                out.loss_after_two_set_run.record(!won);
            }

            if sets.len() >= 5 {
                let (a4, b4) = running_score(&sets[..4]);
                if a4 == 2 && b4 == 2 {
                    out.win_at_2_2.record(won);
                }
            }

            if sets.len() >= 2 && sets[0].own_lost() && sets[1].own_lost() {
                out.win_from_0_2.record(won);
            }

            if sets.windows(2).any(|w| w[0].own_lost() && w[1].own_lost()) {
                out.win_after_two_set_slump.record(won);
            }

            for s in sets.iter().filter(|s| s.is_extra_points()) {
                out.tiebreak_losses.record(s.own_lost());
            }
        }
        out
    }

    /// Reliability under pressure in 0..=1; `None` when no pattern was observed.
    ///
    /// Bad patterns (tie-break losses, blown 2:1 leads, losses after a two-set run, lost
    /// deciders) are penalized with fixed weights, comebacks from 1:2 earn a small bonus.
    /// Patterns seen at most twice use a Laplace-smoothed rate at 35% of their weight.
    pub fn stability(&self) -> Option<f64> {
        let decider_fail = smoothed_rate(&self.win_at_2_2).map(|r| 1.0 - r);
        let bad = [
            (smoothed_rate(&self.tiebreak_losses), self.tiebreak_losses.total, 0.32),
            (smoothed_rate(&self.loss_after_2_1), self.loss_after_2_1.total, 0.28),
            (
                smoothed_rate(&self.loss_after_two_set_run),
                self.loss_after_two_set_run.total,
                0.20,
            ),
            (decider_fail, self.win_at_2_2.total, 0.12),
        ];
        let good = [(smoothed_rate(&self.win_after_1_2), self.win_after_1_2.total, 0.08)];

        let weighted = |parts: &[(Option<f64>, u32, f64)]| -> (f64, usize) {
            let mut sum = 0.0;
            let mut used = 0;
            for (r, n, w) in parts {
                let Some(r) = r else { continue };
                let w = if *n > 0 && *n <= 2 { w * 0.35 } else { *w };
                sum += r.clamp(0.0, 1.0) * w;
                used += 1;
            }
            (sum, used)
        };
        let (bad_sum, bad_n) = weighted(&bad);
        let (good_sum, good_n) = weighted(&good);
        if bad_n == 0 && good_n == 0 {
            return None;
        }
        Some((1.0 - bad_sum + 0.5 * good_sum).clamp(0.0, 1.0))
    }

    /// Extension score 0..=100: how well a side holds up once a match runs long.
    pub fn extension_score(&self) -> f64 {
        let c1 = 1.0 - self.loss_after_2_1.rate().unwrap_or(0.0);
        let c2 = 1.0 - self.loss_after_two_set_run.rate().unwrap_or(0.0);
        let c3 = 1.0 - self.tiebreak_losses.rate().unwrap_or(0.0);
        let c4 = self.win_at_2_2.rate().unwrap_or(0.0);
        (100.0 * (0.30 * c1 + 0.30 * c2 + 0.20 * c3 + 0.20 * c4)).round()
    }

    pub fn tiebreak_loss_rate(&self) -> Option<f64> {
        self.tiebreak_losses.rate()
    }
}

fn running_score(sets: &[crate::history::SetScore]) -> (u32, u32) {
    sets.iter().fold((0, 0), |(a, b), s| {
        if s.own_won() {
            (a + 1, b)
        } else if s.own_lost() {
            (a, b + 1)
        } else {
            (a, b)
        }
    })
}

fn smoothed_rate(r: &Rate) -> Option<f64> {
    if r.total == 0 {
        return None;
    }
    if r.total <= 2 {
        let misses = r.total - r.hits;
        return Some((r.hits as f64 + 1.0) / (r.hits as f64 + misses as f64 + 2.0));
    }
    r.rate()
}
