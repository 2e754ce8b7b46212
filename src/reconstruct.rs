use serde::Serialize;

use crate::error::Result;
use crate::features::{FeatureConfig, MatchupFeatures, TrackerState, check_chronological};
use crate::historical_dataset::MatchRecord;
use crate::schema::{ModelSchema, validate_columns};

/// Named feature values in model column order.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FeatureVector {
    entries: Vec<(String, f64)>,
}

impl FeatureVector {
    /// Aligns a matchup to `columns`. Columns must already be validated.
    pub fn from_matchup(matchup: &MatchupFeatures, columns: &[String]) -> Result<Self> {
        let values = matchup.row(columns)?;
        Ok(Self {
            entries: columns.iter().cloned().zip(values).collect(),
        })
    }

    /// Wraps an assembled row; `values` is in `columns` order.
    pub fn from_pairs(columns: &[String], values: &[f64]) -> Self {
        Self {
            entries: columns.iter().cloned().zip(values.iter().copied()).collect(),
        }
    }

    pub fn get(&self, name: &str) -> Option<f64> {
        self.entries.iter().find(|(n, _)| n == name).map(|(_, v)| *v)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(n, _)| n.as_str())
    }

    pub fn values(&self) -> Vec<f64> {
        self.entries.iter().map(|(_, v)| *v).collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, f64)> {
        self.entries.iter().map(|(n, v)| (n.as_str(), *v))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Rebuilds pre-match features for `home` v `away` from the full history.
///
/// Only records involving either team are replayed: form for a team depends
/// only on its own matches and the pair window only on their meetings, so the
/// result equals a full replay of the assembler. Odds columns read 0.0.
/// Unsorted history is rejected exactly as the assembler rejects it.
pub fn build_features(
    home: &str,
    away: &str,
    history: &[MatchRecord],
    columns: &[String],
    config: &FeatureConfig,
) -> Result<FeatureVector> {
    config.validate()?;
    validate_columns(columns)?;
    check_chronological(history)?;

    let scoped = history
        .iter()
        .filter(|m| m.involves(home) || m.involves(away));
    let state = TrackerState::replay(config, scoped);
    tracing::debug!(
        replayed = state.matches_seen(),
        teams = state.form.team_count(),
        pairs = state.h2h.pair_count(),
        "replayed scoped history"
    );
    matchup_vector(&state, home, away, columns)
}

pub fn build_features_for_schema(
    home: &str,
    away: &str,
    history: &[MatchRecord],
    schema: &ModelSchema,
) -> Result<FeatureVector> {
    schema.validate()?;
    build_features(home, away, history, &schema.columns, &schema.features)
}

/// Reads a matchup from an already-replayed state.
pub fn matchup_vector(
    state: &TrackerState,
    home: &str,
    away: &str,
    columns: &[String],
) -> Result<FeatureVector> {
    let matchup = state.matchup(home, away);
    for (team, form) in [(home, &matchup.home_form), (away, &matchup.away_form)] {
        if form.is_empty() {
            tracing::warn!(team = %team, "no history for team, form features default to zero");
        }
    }
    FeatureVector::from_matchup(&matchup, columns)
}
