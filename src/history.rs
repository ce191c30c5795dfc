use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::{Deserialize, Serialize};

/// Points scored in one set, oriented to the record's own side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SetScore {
    pub own: u16,
    pub opponent: u16,
}

impl SetScore {
    pub fn new(own: u16, opponent: u16) -> Self {
        Self { own, opponent }
    }

    pub fn own_won(&self) -> bool {
        self.own > self.opponent
    }

    pub fn own_lost(&self) -> bool {
        self.own < self.opponent
    }

    pub fn point_diff(&self) -> i32 {
        self.own as i32 - self.opponent as i32
    }

    pub fn flipped(&self) -> Self {
        Self {
            own: self.opponent,
            opponent: self.own,
        }
    }

    /// Set played past 10:10 and closed out by two.
    pub fn is_extra_points(&self) -> bool {
        self.own >= 10
            && self.opponent >= 10
            && self.own.abs_diff(self.opponent) >= 2
            && self.own.max(self.opponent) >= 12
    }

    /// Both sides reached 10 points; looser than `is_extra_points`, used for pair features.
    pub fn is_tiebreak_like(&self) -> bool {
        self.own >= 10 && self.opponent >= 10
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchRecord {
    pub own: String,
    pub opponent: String,
    #[serde(default)]
    pub sets: Vec<SetScore>,
    #[serde(default)]
    pub played_at: Option<DateTime<Utc>>,
}

impl MatchRecord {
    pub fn new(own: impl Into<String>, opponent: impl Into<String>, sets: &[(u16, u16)]) -> Self {
        Self {
            own: own.into(),
            opponent: opponent.into(),
            sets: sets.iter().map(|(a, b)| SetScore::new(*a, *b)).collect(),
            played_at: None,
        }
    }

    pub fn at(mut self, played_at: DateTime<Utc>) -> Self {
        self.played_at = Some(played_at);
        self
    }

    pub fn sets_won(&self) -> usize {
        self.sets.iter().filter(|s| s.own_won()).count()
    }

    pub fn sets_lost(&self) -> usize {
        self.sets.iter().filter(|s| s.own_lost()).count()
    }

    pub fn own_won(&self) -> bool {
        self.sets_won() > self.sets_lost()
    }

    pub fn is_decided(&self) -> bool {
        self.sets_won() != self.sets_lost()
    }

    pub fn is_sweep(&self) -> bool {
        matches!((self.sets_won(), self.sets_lost()), (3, 0) | (0, 3))
    }

    pub fn went_to_decider(&self) -> bool {
        self.sets.len() >= 5
    }

    pub fn point_diffs(&self) -> impl Iterator<Item = i32> + '_ {
        self.sets.iter().map(SetScore::point_diff)
    }

    pub fn points_for(&self) -> u32 {
        self.sets.iter().map(|s| s.own as u32).sum()
    }

    pub fn points_against(&self) -> u32 {
        self.sets.iter().map(|s| s.opponent as u32).sum()
    }

    /// Same match seen from the opponent's side.
    pub fn flipped(&self) -> Self {
        Self {
            own: self.opponent.clone(),
            opponent: self.own.clone(),
            sets: self.sets.iter().map(SetScore::flipped).collect(),
            played_at: self.played_at,
        }
    }

    pub fn winner_loser(&self) -> Option<(&str, &str)> {
        if !self.is_decided() {
            return None;
        }
        if self.own_won() {
            Some((self.own.as_str(), self.opponent.as_str()))
        } else {
            Some((self.opponent.as_str(), self.own.as_str()))
        }
    }

    pub fn involves(&self, a: &str, b: &str) -> bool {
        (self.own == a && self.opponent == b) || (self.own == b && self.opponent == a)
    }
}

/// Number of records played within `hours` before `now`. Undated records never count.
pub fn matches_within(records: &[MatchRecord], now: DateTime<Utc>, hours: i64) -> usize {
    let cutoff = now - ChronoDuration::hours(hours);
    records
        .iter()
        .filter_map(|m| m.played_at)
        .filter(|t| *t >= cutoff && *t <= now)
        .count()
}

/// Number of records played on the calendar day (UTC) of `now`.
pub fn matches_on_day(records: &[MatchRecord], now: DateTime<Utc>) -> usize {
    let today = now.date_naive();
    records
        .iter()
        .filter_map(|m| m.played_at)
        .filter(|t| t.date_naive() == today && *t <= now)
        .count()
}

/// Meetings between two competitors, every record oriented to `reference`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HeadToHead {
    pub reference: String,
    pub other: String,
    pub matches: Vec<MatchRecord>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tally {
    pub reference: u32,
    pub other: u32,
}

impl Tally {
    pub fn total(&self) -> u32 {
        self.reference + self.other
    }
}

impl HeadToHead {
    pub fn from_records(reference: &str, other: &str, records: &[MatchRecord]) -> Self {
        let matches = records
            .iter()
            .filter(|m| m.involves(reference, other))
            .map(|m| {
                if m.own == reference {
                    m.clone()
                } else {
                    m.flipped()
                }
            })
            .collect();
        Self {
            reference: reference.to_string(),
            other: other.to_string(),
            matches,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.matches.is_empty()
    }

    pub fn len(&self) -> usize {
        self.matches.len()
    }

    pub fn match_tally(&self) -> Tally {
        let mut t = Tally::default();
        for m in &self.matches {
            if !m.is_decided() {
                continue;
            }
            if m.own_won() {
                t.reference += 1;
            } else {
                t.other += 1;
            }
        }
        t
    }

    pub fn set_tally(&self) -> Tally {
        let mut t = Tally::default();
        for s in self.matches.iter().flat_map(|m| m.sets.iter()) {
            if s.own_won() {
                t.reference += 1;
            } else if s.own_lost() {
                t.other += 1;
            }
        }
        t
    }

    pub fn third_set_tally(&self) -> Tally {
        let mut t = Tally::default();
        for s in self.matches.iter().filter_map(|m| m.sets.get(2)) {
            if s.own_won() {
                t.reference += 1;
            } else if s.own_lost() {
                t.other += 1;
            }
        }
        t
    }

    pub fn decider_rate(&self) -> Option<f64> {
        if self.matches.is_empty() {
            return None;
        }
        let deciders = self.matches.iter().filter(|m| m.went_to_decider()).count();
        Some(deciders as f64 / self.matches.len() as f64)
    }

    pub fn latest_meeting(&self) -> Option<DateTime<Utc>> {
        self.matches.iter().filter_map(|m| m.played_at).max()
    }

    pub fn is_rematch_within(&self, now: DateTime<Utc>, hours: i64) -> bool {
        self.latest_meeting()
            .map(|t| (now - t).num_minutes().abs() <= hours * 60)
            .unwrap_or(false)
    }

    pub fn to_pairs(&self) -> Vec<(String, String)> {
        self.matches
            .iter()
            .filter_map(|m| m.winner_loser())
            .map(|(w, l)| (w.to_string(), l.to_string()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn extra_points_needs_both_past_ten() {
        assert!(SetScore::new(12, 10).is_extra_points());
        assert!(SetScore::new(14, 16).is_extra_points());
        assert!(!SetScore::new(11, 9).is_extra_points());
        assert!(SetScore::new(11, 10).is_tiebreak_like());
    }

    #[test]
    fn head_to_head_orients_records() {
        let recs = vec![
            MatchRecord::new("A", "B", &[(11, 5), (11, 7), (11, 9)]),
            MatchRecord::new("B", "A", &[(11, 5), (9, 11), (11, 8), (11, 6)]),
            MatchRecord::new("A", "C", &[(11, 5), (11, 7), (11, 9)]),
        ];
        let h2h = HeadToHead::from_records("A", "B", &recs);
        assert_eq!(h2h.len(), 2);
        assert!(h2h.matches.iter().all(|m| m.own == "A"));
        assert_eq!(h2h.match_tally(), Tally { reference: 1, other: 1 });
        assert_eq!(h2h.set_tally(), Tally { reference: 4, other: 3 });
        assert_eq!(h2h.third_set_tally(), Tally { reference: 1, other: 1 });
    }

    #[test]
    fn counts_recent_matches() {
        let now = Utc.with_ymd_and_hms(2025, 3, 10, 18, 0, 0).unwrap();
        let recs = vec![
            MatchRecord::new("A", "B", &[(11, 5)]).at(now - ChronoDuration::hours(2)),
            MatchRecord::new("A", "C", &[(11, 5)]).at(now - ChronoDuration::hours(30)),
            MatchRecord::new("A", "D", &[(11, 5)]).at(now - ChronoDuration::hours(60)),
            MatchRecord::new("A", "E", &[(11, 5)]),
        ];
        assert_eq!(matches_within(&recs, now, 48), 2);
        assert_eq!(matches_on_day(&recs, now), 1);
    }
}
