use std::collections::{HashMap, VecDeque};

pub const SIMPLE_WINDOW: usize = 5;
pub const EXTENDED_WINDOW: usize = 20;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FormEntry {
    pub points: u8,
    pub goals_scored: u32,
    pub goals_conceded: u32,
}

/// Window means for one team. All zeros when the team has no history.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct FormSummary {
    pub avg_points: f64,
    pub avg_goals_scored: f64,
    pub avg_goals_conceded: f64,
    pub avg_goal_diff: f64,
    pub matches: usize,
}

impl FormSummary {
    pub fn is_empty(&self) -> bool {
        self.matches == 0
    }
}

/// Per-team FIFO of the last `window` results.
#[derive(Debug, Clone, PartialEq)]
pub struct FormTracker {
    window: usize,
    teams: HashMap<String, VecDeque<FormEntry>>,
}

impl FormTracker {
    pub fn new(window: usize) -> Self {
        Self {
            window: window.max(1),
            teams: HashMap::new(),
        }
    }

    pub fn window(&self) -> usize {
        self.window
    }

    pub fn read_form(&self, team: &str) -> FormSummary {
        let Some(entries) = self.teams.get(team).filter(|e| !e.is_empty()) else {
            return FormSummary::default();
        };
        let n = entries.len() as f64;
        let (points, scored, conceded) = entries.iter().fold((0u64, 0u64, 0u64), |acc, e| {
            (
                acc.0 + u64::from(e.points),
                acc.1 + u64::from(e.goals_scored),
                acc.2 + u64::from(e.goals_conceded),
            )
        });
        let avg_goals_scored = scored as f64 / n;
        let avg_goals_conceded = conceded as f64 / n;
        FormSummary {
            avg_points: points as f64 / n,
            avg_goals_scored,
            avg_goals_conceded,
            avg_goal_diff: avg_goals_scored - avg_goals_conceded,
            matches: entries.len(),
        }
    }

    pub fn update_form(&mut self, team: &str, points: u8, goals_scored: u32, goals_conceded: u32) {
        let window = self.window;
        let entries = self
            .teams
            .entry(team.to_string())
            .or_insert_with(|| VecDeque::with_capacity(window));
        if entries.len() == window {
            entries.pop_front();
        }
        entries.push_back(FormEntry {
            points,
            goals_scored,
            goals_conceded,
        });
    }

    pub fn team_count(&self) -> usize {
        self.teams.len()
    }
}

#[cfg(test)]
mod tests {
    use super::{FormSummary, FormTracker};

    #[test]
    fn unseen_team_reads_all_zero() {
        let tracker = FormTracker::new(5);
        assert_eq!(tracker.read_form("Nobody"), FormSummary::default());
    }

    #[test]
    fn window_evicts_oldest_first() {
        let mut tracker = FormTracker::new(5);
        tracker.update_form("A", 0, 0, 4);
        for _ in 0..5 {
            tracker.update_form("A", 3, 3, 0);
        }
        let form = tracker.read_form("A");
        assert_eq!(form.matches, 5);
        assert_eq!(form.avg_points, 3.0);
        assert_eq!(form.avg_goals_scored, 3.0);
        assert_eq!(form.avg_goals_conceded, 0.0);
        assert_eq!(form.avg_goal_diff, 3.0);
    }

    #[test]
    fn means_cover_a_partial_window() {
        let mut tracker = FormTracker::new(20);
        tracker.update_form("A", 3, 2, 1);
        tracker.update_form("A", 0, 0, 2);
        let form = tracker.read_form("A");
        assert_eq!(form.matches, 2);
        assert_eq!(form.avg_points, 1.5);
        assert_eq!(form.avg_goals_scored, 1.0);
        assert_eq!(form.avg_goals_conceded, 1.5);
        assert_eq!(form.avg_goal_diff, -0.5);
    }

    #[test]
    fn window_is_at_least_one() {
        let mut tracker = FormTracker::new(0);
        tracker.update_form("A", 3, 1, 0);
        tracker.update_form("A", 1, 2, 2);
        assert_eq!(tracker.window(), 1);
        assert_eq!(tracker.read_form("A").avg_points, 1.0);
    }
}
