use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

use crate::calibration::Outcome;
use crate::error::{PipelineError, Result};
use crate::form::{EXTENDED_WINDOW, FormSummary, FormTracker, SIMPLE_WINDOW};
use crate::h2h::{H2H_WINDOW, H2hSummary, H2hTracker};
use crate::historical_dataset::MatchRecord;
use crate::odds::{ImpliedProbs, normalize};

pub const FORM_COLUMNS: [&str; 8] = [
    "home_form_pts",
    "home_form_gs",
    "home_form_ga",
    "home_form_gd",
    "away_form_pts",
    "away_form_gs",
    "away_form_ga",
    "away_form_gd",
];

pub const DIFF_COLUMNS: [&str; 4] = [
    "diff_form_pts",
    "diff_form_gs",
    "diff_form_ga",
    "diff_form_gd",
];

pub const H2H_COLUMNS: [&str; 5] = [
    "h2h_home_win_ratio",
    "h2h_away_win_ratio",
    "h2h_draw_ratio",
    "h2h_avg_goals_for_home",
    "h2h_avg_goals_for_away",
];

pub const ODDS_COLUMNS: [&str; 3] = ["odds_p_home", "odds_p_draw", "odds_p_away"];

pub fn is_known_column(name: &str) -> bool {
    FORM_COLUMNS
        .iter()
        .chain(DIFF_COLUMNS.iter())
        .chain(H2H_COLUMNS.iter())
        .chain(ODDS_COLUMNS.iter())
        .any(|c| *c == name)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeatureConfig {
    pub window_size: usize,
    pub h2h_window: usize,
    pub include_h2h: bool,
    pub include_odds: bool,
}

impl Default for FeatureConfig {
    fn default() -> Self {
        Self::simple()
    }
}

impl FeatureConfig {
    pub fn simple() -> Self {
        Self {
            window_size: SIMPLE_WINDOW,
            h2h_window: H2H_WINDOW,
            include_h2h: true,
            include_odds: false,
        }
    }

    pub fn extended() -> Self {
        Self {
            window_size: EXTENDED_WINDOW,
            ..Self::simple()
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.window_size == 0 {
            return Err(PipelineError::Config("form window must be at least 1".into()));
        }
        if self.h2h_window == 0 {
            return Err(PipelineError::Config("h2h window must be at least 1".into()));
        }
        Ok(())
    }

    /// Column order emitted for this configuration.
    pub fn columns(&self) -> Vec<String> {
        let mut cols: Vec<String> = FORM_COLUMNS
            .iter()
            .chain(DIFF_COLUMNS.iter())
            .map(|c| c.to_string())
            .collect();
        if self.include_h2h {
            cols.extend(H2H_COLUMNS.iter().map(|c| c.to_string()));
        }
        if self.include_odds {
            cols.extend(ODDS_COLUMNS.iter().map(|c| c.to_string()));
        }
        cols
    }
}

/// Everything known about a matchup before kickoff.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MatchupFeatures {
    pub home_form: FormSummary,
    pub away_form: FormSummary,
    pub h2h: H2hSummary,
    pub odds: Option<ImpliedProbs>,
}

impl MatchupFeatures {
    /// Value of a named column; `None` for names outside the catalog.
    /// Odds columns read 0.0 when no odds are attached.
    pub fn value(&self, column: &str) -> Option<f64> {
        let h = &self.home_form;
        let a = &self.away_form;
        let odds = self.odds.as_ref();
        let v = match column {
            "home_form_pts" => h.avg_points,
            "home_form_gs" => h.avg_goals_scored,
            "home_form_ga" => h.avg_goals_conceded,
            "home_form_gd" => h.avg_goal_diff,
            "away_form_pts" => a.avg_points,
            "away_form_gs" => a.avg_goals_scored,
            "away_form_ga" => a.avg_goals_conceded,
            "away_form_gd" => a.avg_goal_diff,
            "diff_form_pts" => h.avg_points - a.avg_points,
            "diff_form_gs" => h.avg_goals_scored - a.avg_goals_scored,
            "diff_form_ga" => h.avg_goals_conceded - a.avg_goals_conceded,
            "diff_form_gd" => h.avg_goal_diff - a.avg_goal_diff,
            "h2h_home_win_ratio" => self.h2h.win_ratio_a,
            "h2h_away_win_ratio" => self.h2h.win_ratio_b,
            "h2h_draw_ratio" => self.h2h.draw_ratio,
            "h2h_avg_goals_for_home" => self.h2h.avg_goals_a,
            "h2h_avg_goals_for_away" => self.h2h.avg_goals_b,
            "odds_p_home" => odds.map_or(0.0, |o| o.p_home),
            "odds_p_draw" => odds.map_or(0.0, |o| o.p_draw),
            "odds_p_away" => odds.map_or(0.0, |o| o.p_away),
            _ => return None,
        };
        Some(v)
    }

    pub fn row(&self, columns: &[String]) -> Result<Vec<f64>> {
        columns
            .iter()
            .map(|c| {
                self.value(c)
                    .ok_or_else(|| PipelineError::SchemaMismatch(format!("unknown column `{c}`")))
            })
            .collect()
    }
}

/// Both trackers, advanced together one match at a time.
#[derive(Debug, Clone, PartialEq)]
pub struct TrackerState {
    pub form: FormTracker,
    pub h2h: H2hTracker,
    matches_seen: usize,
}

impl TrackerState {
    pub fn new(config: &FeatureConfig) -> Self {
        Self {
            form: FormTracker::new(config.window_size),
            h2h: H2hTracker::new(config.h2h_window),
            matches_seen: 0,
        }
    }

    /// Replays `history` in order. Callers check ordering with
    /// [`check_chronological`] first.
    pub fn replay<'a, I>(config: &FeatureConfig, history: I) -> Self
    where
        I: IntoIterator<Item = &'a MatchRecord>,
    {
        let mut state = Self::new(config);
        for record in history {
            state.observe(record);
        }
        state
    }

    pub fn matches_seen(&self) -> usize {
        self.matches_seen
    }

    /// Pre-match view of `home` vs `away`. Reads only; never advances state.
    pub fn matchup(&self, home: &str, away: &str) -> MatchupFeatures {
        MatchupFeatures {
            home_form: self.form.read_form(home),
            away_form: self.form.read_form(away),
            h2h: self.h2h.read_h2h(home, away),
            odds: None,
        }
    }

    /// Folds a finished match into both trackers.
    pub fn observe(&mut self, record: &MatchRecord) {
        let outcome = record.outcome();
        self.form.update_form(
            &record.home_team,
            outcome.points_for(true),
            record.home_goals,
            record.away_goals,
        );
        self.form.update_form(
            &record.away_team,
            outcome.points_for(false),
            record.away_goals,
            record.home_goals,
        );
        self.h2h.update_h2h(
            &record.home_team,
            &record.away_team,
            outcome,
            record.home_goals,
            record.away_goals,
        );
        self.matches_seen += 1;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RowSkip {
    ColdStart,
    MissingOdds,
}

/// Result of reading one record against the current state.
#[derive(Debug, Clone, PartialEq)]
pub enum RowFeatures {
    Emit {
        row: Vec<f64>,
        odds: Option<ImpliedProbs>,
    },
    Skip(RowSkip),
}

pub fn record_features(
    state: &TrackerState,
    record: &MatchRecord,
    config: &FeatureConfig,
    columns: &[String],
) -> Result<RowFeatures> {
    let mut matchup = state.matchup(&record.home_team, &record.away_team);
    if matchup.home_form.is_empty() {
        return Ok(RowFeatures::Skip(RowSkip::ColdStart));
    }
    if config.include_odds {
        let Some(quote) = record.odds.as_ref() else {
            return Ok(RowFeatures::Skip(RowSkip::MissingOdds));
        };
        match normalize(quote) {
            Ok(probs) => matchup.odds = Some(probs),
            Err(err) => {
                tracing::debug!(
                    home = %record.home_team,
                    away = %record.away_team,
                    error = %err,
                    "odds unusable, excluding row"
                );
                return Ok(RowFeatures::Skip(RowSkip::MissingOdds));
            }
        }
    }
    Ok(RowFeatures::Emit {
        row: matchup.row(columns)?,
        odds: matchup.odds,
    })
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct AssemblyReport {
    pub records: usize,
    pub emitted: usize,
    pub dropped_cold_start: usize,
    pub dropped_missing_odds: usize,
    /// Mean bookmaker margin over emitted rows; `None` without odds.
    pub mean_overround: Option<f64>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TrainingSet {
    pub config: FeatureConfig,
    pub columns: Vec<String>,
    pub features: Vec<Vec<f64>>,
    pub labels: Vec<Outcome>,
    pub home_goals: Vec<u32>,
    pub away_goals: Vec<u32>,
    pub dates: Vec<NaiveDateTime>,
    /// Position of each row's source record in the assembled history.
    pub record_indices: Vec<usize>,
}

impl TrainingSet {
    fn empty(config: FeatureConfig) -> Self {
        Self {
            config,
            columns: config.columns(),
            features: Vec::new(),
            labels: Vec::new(),
            home_goals: Vec::new(),
            away_goals: Vec::new(),
            dates: Vec::new(),
            record_indices: Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == name)
    }

    /// Rows at `indices`, in the order given.
    pub fn subset(&self, indices: &[usize]) -> TrainingSet {
        let mut out = TrainingSet::empty(self.config);
        out.columns = self.columns.clone();
        for &i in indices {
            out.features.push(self.features[i].clone());
            out.labels.push(self.labels[i]);
            out.home_goals.push(self.home_goals[i]);
            out.away_goals.push(self.away_goals[i]);
            out.dates.push(self.dates[i]);
            out.record_indices.push(self.record_indices[i]);
        }
        out
    }
}

/// First record whose date precedes its predecessor's is an error. Equal
/// dates keep their stored order.
pub fn check_chronological(history: &[MatchRecord]) -> Result<()> {
    match history.windows(2).position(|w| w[1].date < w[0].date) {
        Some(pos) => Err(PipelineError::UnorderedHistory { index: pos + 1 }),
        None => Ok(()),
    }
}

/// One forward pass over chronologically ordered history. Each record's
/// features are read before the record is folded into the trackers, and the
/// trackers advance even for rows that are not emitted.
pub fn assemble(
    history: &[MatchRecord],
    config: &FeatureConfig,
) -> Result<(TrainingSet, AssemblyReport)> {
    config.validate()?;

    let mut set = TrainingSet::empty(*config);
    let columns = set.columns.clone();
    let mut report = AssemblyReport {
        records: history.len(),
        ..AssemblyReport::default()
    };
    check_chronological(history)?;
    let mut state = TrackerState::new(config);
    let mut overround_sum = 0.0;
    let mut priced = 0usize;

    for (index, record) in history.iter().enumerate() {
        match record_features(&state, record, config, &columns)? {
            RowFeatures::Emit { row, odds } => {
                if let Some(probs) = odds {
                    overround_sum += probs.overround;
                    priced += 1;
                }
                set.features.push(row);
                set.labels.push(record.outcome());
                set.home_goals.push(record.home_goals);
                set.away_goals.push(record.away_goals);
                set.dates.push(record.date);
                set.record_indices.push(index);
                report.emitted += 1;
            }
            RowFeatures::Skip(RowSkip::ColdStart) => report.dropped_cold_start += 1,
            RowFeatures::Skip(RowSkip::MissingOdds) => report.dropped_missing_odds += 1,
        }

        state.observe(record);
    }

    report.mean_overround = (priced > 0).then(|| overround_sum / priced as f64);

    tracing::debug!(
        records = report.records,
        emitted = report.emitted,
        cold_start = report.dropped_cold_start,
        missing_odds = report.dropped_missing_odds,
        mean_overround = ?report.mean_overround,
        "assembled training set"
    );
    Ok((set, report))
}

#[cfg(test)]
mod tests {
    use chrono::NaiveDate;

    use super::{FeatureConfig, assemble, is_known_column};
    use crate::calibration::Outcome;
    use crate::error::PipelineError;
    use crate::historical_dataset::{Bookmaker, MatchRecord, OddsQuote};

    fn record(day: u32, home: &str, away: &str, hg: u32, ag: u32) -> MatchRecord {
        MatchRecord {
            date: NaiveDate::from_ymd_opt(2024, 1, day)
                .unwrap()
                .and_hms_opt(15, 0, 0)
                .unwrap(),
            home_team: home.to_string(),
            away_team: away.to_string(),
            home_goals: hg,
            away_goals: ag,
            competition: "E0".to_string(),
            season: "2023-2024".to_string(),
            odds: None,
        }
    }

    #[test]
    fn columns_follow_configuration() {
        let simple = FeatureConfig::simple().columns();
        assert_eq!(simple.len(), 17);
        assert_eq!(simple[0], "home_form_pts");
        assert_eq!(simple[12], "h2h_home_win_ratio");

        let no_h2h = FeatureConfig {
            include_h2h: false,
            include_odds: true,
            ..FeatureConfig::simple()
        };
        let cols = no_h2h.columns();
        assert_eq!(cols.len(), 15);
        assert_eq!(cols.last().map(String::as_str), Some("odds_p_away"));
        assert!(cols.iter().all(|c| is_known_column(c)));
    }

    #[test]
    fn first_appearance_is_dropped_and_later_rows_read_prior_state() {
        let history = vec![
            record(1, "A", "B", 2, 0),
            record(8, "A", "C", 1, 1),
            record(15, "B", "A", 0, 3),
        ];
        let (set, report) = assemble(&history, &FeatureConfig::simple()).unwrap();
        assert_eq!(report.dropped_cold_start, 1);
        assert_eq!(set.len(), 2);

        // row for A v C sees only A's 2-0 win
        let pts = set.column_index("home_form_pts").unwrap();
        let away_pts = set.column_index("away_form_pts").unwrap();
        assert_eq!(set.features[0][pts], 3.0);
        assert_eq!(set.features[0][away_pts], 0.0);
        assert_eq!(set.labels[0], Outcome::Draw);

        // B v A: B lost once, A has W then D; H2H from B's side is one loss
        let row = &set.features[1];
        assert_eq!(row[pts], 0.0);
        assert_eq!(row[away_pts], 2.0);
        let h2h_away = set.column_index("h2h_away_win_ratio").unwrap();
        assert_eq!(row[h2h_away], 1.0);
        assert_eq!(set.labels[1], Outcome::Away);
    }

    #[test]
    fn odds_rows_without_prices_are_excluded() {
        let mut priced = record(8, "A", "B", 1, 0);
        priced.odds = Some(OddsQuote {
            bookmaker: Bookmaker::Bet365,
            home_price: 2.0,
            draw_price: 3.0,
            away_price: 4.0,
        });
        let history = vec![
            record(1, "A", "B", 2, 0),
            priced,
            record(15, "A", "B", 0, 0),
        ];
        let config = FeatureConfig {
            include_odds: true,
            ..FeatureConfig::simple()
        };
        let (set, report) = assemble(&history, &config).unwrap();
        assert_eq!(report.dropped_cold_start, 1);
        assert_eq!(report.dropped_missing_odds, 1);
        assert_eq!(set.len(), 1);
        let p = set.column_index("odds_p_home").unwrap();
        assert!((set.features[0][p] - 0.4615).abs() < 1e-4);
        // 1/2 + 1/3 + 1/4 - 1
        let margin = report.mean_overround.unwrap();
        assert!((margin - 1.0 / 12.0).abs() < 1e-9);

        let (_, plain) = assemble(&history, &FeatureConfig::simple()).unwrap();
        assert_eq!(plain.mean_overround, None);
    }

    #[test]
    fn unordered_history_is_rejected() {
        let history = vec![record(8, "A", "B", 1, 0), record(1, "A", "B", 2, 0)];
        let err = assemble(&history, &FeatureConfig::simple()).unwrap_err();
        assert_eq!(err, PipelineError::UnorderedHistory { index: 1 });
    }

    #[test]
    fn zero_window_is_a_config_error() {
        let config = FeatureConfig {
            window_size: 0,
            ..FeatureConfig::simple()
        };
        assert!(matches!(
            assemble(&[], &config),
            Err(PipelineError::Config(_))
        ));
    }
}
