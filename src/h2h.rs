use std::collections::{HashMap, VecDeque};

use crate::calibration::Outcome;

pub const H2H_WINDOW: usize = 5;

/// Unordered team pair, stored with the lexicographically smaller name first.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PairKey {
    first: String,
    second: String,
}

impl PairKey {
    pub fn new(a: &str, b: &str) -> Self {
        if a <= b {
            Self {
                first: a.to_string(),
                second: b.to_string(),
            }
        } else {
            Self {
                first: b.to_string(),
                second: a.to_string(),
            }
        }
    }

    pub fn first(&self) -> &str {
        &self.first
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PairResult {
    WinFirst,
    Draw,
    WinSecond,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct H2hEntry {
    pub result: PairResult,
    pub goals_first: u32,
    pub goals_second: u32,
}

/// Meeting ratios and goal means oriented to the `(a, b)` argument order.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct H2hSummary {
    pub win_ratio_a: f64,
    pub win_ratio_b: f64,
    pub draw_ratio: f64,
    pub avg_goals_a: f64,
    pub avg_goals_b: f64,
    pub meetings: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub struct H2hTracker {
    window: usize,
    pairs: HashMap<PairKey, VecDeque<H2hEntry>>,
}

impl H2hTracker {
    pub fn new(window: usize) -> Self {
        Self {
            window: window.max(1),
            pairs: HashMap::new(),
        }
    }

    pub fn window(&self) -> usize {
        self.window
    }

    pub fn read_h2h(&self, a: &str, b: &str) -> H2hSummary {
        let key = PairKey::new(a, b);
        let Some(entries) = self.pairs.get(&key).filter(|e| !e.is_empty()) else {
            return H2hSummary::default();
        };

        let mut wins_first = 0usize;
        let mut wins_second = 0usize;
        let mut draws = 0usize;
        let mut goals_first = 0u64;
        let mut goals_second = 0u64;
        for e in entries {
            match e.result {
                PairResult::WinFirst => wins_first += 1,
                PairResult::WinSecond => wins_second += 1,
                PairResult::Draw => draws += 1,
            }
            goals_first += u64::from(e.goals_first);
            goals_second += u64::from(e.goals_second);
        }

        let n = entries.len() as f64;
        let first = (wins_first as f64 / n, goals_first as f64 / n);
        let second = (wins_second as f64 / n, goals_second as f64 / n);
        let (a_side, b_side) = if key.first() == a {
            (first, second)
        } else {
            (second, first)
        };
        H2hSummary {
            win_ratio_a: a_side.0,
            win_ratio_b: b_side.0,
            draw_ratio: draws as f64 / n,
            avg_goals_a: a_side.1,
            avg_goals_b: b_side.1,
            meetings: entries.len(),
        }
    }

    pub fn update_h2h(
        &mut self,
        home: &str,
        away: &str,
        outcome: Outcome,
        home_goals: u32,
        away_goals: u32,
    ) {
        let key = PairKey::new(home, away);
        let home_is_first = key.first() == home;
        let result = match (outcome, home_is_first) {
            (Outcome::Draw, _) => PairResult::Draw,
            (Outcome::Home, true) | (Outcome::Away, false) => PairResult::WinFirst,
            (Outcome::Home, false) | (Outcome::Away, true) => PairResult::WinSecond,
        };
        let (goals_first, goals_second) = if home_is_first {
            (home_goals, away_goals)
        } else {
            (away_goals, home_goals)
        };

        let window = self.window;
        let entries = self
            .pairs
            .entry(key)
            .or_insert_with(|| VecDeque::with_capacity(window));
        if entries.len() == window {
            entries.pop_front();
        }
        entries.push_back(H2hEntry {
            result,
            goals_first,
            goals_second,
        });
    }

    pub fn pair_count(&self) -> usize {
        self.pairs.len()
    }
}
