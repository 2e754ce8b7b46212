use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::calibration::{
    MAX_GOALS, Outcome, Prob3, evaluate_probs, fit_dc_rho, outcome_probs_poisson_dc,
};
use crate::error::{PipelineError, Result};
use crate::features::{ODDS_COLUMNS, TrackerState, TrainingSet, check_chronological};
use crate::historical_dataset::MatchRecord;
use crate::reconstruct::{FeatureVector, build_features, matchup_vector};
use crate::schema::ModelSchema;

const LAMBDA_MIN: f64 = 0.20;
const LAMBDA_MAX: f64 = 3.80;
const DEFAULT_RHO: f64 = -0.10;

/// Anything that can be fitted on an assembled training set.
pub trait TrainableEstimator {
    type Model: OutcomeModel;

    fn fit(&self, data: &TrainingSet) -> Result<Self::Model>;
}

/// A fitted model consuming reconstructed feature vectors.
pub trait OutcomeModel {
    fn predict_proba(&self, features: &FeatureVector) -> Result<Prob3>;

    fn predict(&self, features: &FeatureVector) -> Result<Outcome> {
        Ok(self.predict_proba(features)?.argmax())
    }

    /// Expected scoreline `(home, away)`: each side's expected goals, rounded.
    fn predict_score(&self, features: &FeatureVector) -> Result<(u32, u32)>;
}

/// Form inputs the Poisson model reads from a row.
#[derive(Debug, Clone, Copy)]
struct FormInputs {
    home_gs: f64,
    home_ga: f64,
    away_gs: f64,
    away_ga: f64,
    market: Option<Prob3>,
}

impl FormInputs {
    fn from_lookup(get: impl Fn(&str) -> Option<f64>) -> Result<Self> {
        let need = |name: &str| {
            get(name).ok_or_else(|| {
                PipelineError::SchemaMismatch(format!("model requires column `{name}`"))
            })
        };
        let market = match (get(ODDS_COLUMNS[0]), get(ODDS_COLUMNS[1]), get(ODDS_COLUMNS[2])) {
            (Some(home), Some(draw), Some(away)) if home + draw + away > 0.5 => {
                Some(Prob3 { home, draw, away })
            }
            _ => None,
        };
        Ok(Self {
            home_gs: need("home_form_gs")?,
            home_ga: need("home_form_ga")?,
            away_gs: need("away_form_gs")?,
            away_ga: need("away_form_ga")?,
            market,
        })
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct PoissonFormEstimator;

/// League-average Poisson rates scaled by recent attack and defence form.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PoissonFormModel {
    pub league_home_goals: f64,
    pub league_away_goals: f64,
    pub mean_form_goals: f64,
    pub form_weight: f64,
    pub rho: f64,
    pub market_weight: f64,
}

impl PoissonFormModel {
    fn lambdas(&self, x: &FormInputs) -> (f64, f64) {
        let m = self.mean_form_goals.max(1e-6);
        let w = self.form_weight;
        let home_strength = (x.home_gs / m + x.away_ga / m) / 2.0;
        let away_strength = (x.away_gs / m + x.home_ga / m) / 2.0;
        let lh = self.league_home_goals * ((1.0 - w) + w * home_strength);
        let la = self.league_away_goals * ((1.0 - w) + w * away_strength);
        (
            lh.clamp(LAMBDA_MIN, LAMBDA_MAX),
            la.clamp(LAMBDA_MIN, LAMBDA_MAX),
        )
    }

    fn probs(&self, x: &FormInputs) -> Prob3 {
        let (lh, la) = self.lambdas(x);
        let base = outcome_probs_poisson_dc(lh, la, MAX_GOALS, self.rho);
        match x.market {
            Some(market) if self.market_weight > 0.0 => base.blend(&market, self.market_weight),
            _ => base,
        }
    }

    pub fn expected_goals(&self, features: &FeatureVector) -> Result<(f64, f64)> {
        let x = FormInputs::from_lookup(|n| features.get(n))?;
        Ok(self.lambdas(&x))
    }
}

impl OutcomeModel for PoissonFormModel {
    fn predict_proba(&self, features: &FeatureVector) -> Result<Prob3> {
        let x = FormInputs::from_lookup(|n| features.get(n))?;
        Ok(self.probs(&x))
    }

    fn predict_score(&self, features: &FeatureVector) -> Result<(u32, u32)> {
        let (lh, la) = self.expected_goals(features)?;
        Ok((lh.round() as u32, la.round() as u32))
    }
}

impl TrainableEstimator for PoissonFormEstimator {
    type Model = PoissonFormModel;

    fn fit(&self, data: &TrainingSet) -> Result<PoissonFormModel> {
        if data.is_empty() {
            return Err(PipelineError::EmptyTrainingSet);
        }

        let mut inputs = Vec::with_capacity(data.len());
        for row in &data.features {
            inputs.push(FormInputs::from_lookup(|n| {
                data.column_index(n).map(|i| row[i])
            })?);
        }

        let n = data.len() as f64;
        let league_home_goals = data.home_goals.iter().map(|g| f64::from(*g)).sum::<f64>() / n;
        let league_away_goals = data.away_goals.iter().map(|g| f64::from(*g)).sum::<f64>() / n;
        let mean_form_goals =
            inputs.iter().map(|x| (x.home_gs + x.away_gs) / 2.0).sum::<f64>() / n;

        let mut model = PoissonFormModel {
            league_home_goals: league_home_goals.max(LAMBDA_MIN),
            league_away_goals: league_away_goals.max(LAMBDA_MIN),
            mean_form_goals: if mean_form_goals > 0.0 { mean_form_goals } else { 1.0 },
            form_weight: 0.0,
            rho: DEFAULT_RHO,
            market_weight: 0.0,
        };

        let labels = &data.labels;
        let loss = |m: &PoissonFormModel| {
            let preds: Vec<Prob3> = inputs.iter().map(|x| m.probs(x)).collect();
            evaluate_probs(&preds, labels).log_loss
        };

        model.form_weight = best_on_grid(20, |w| {
            loss(&PoissonFormModel {
                form_weight: w,
                ..model
            })
        });

        let lambdas: Vec<(f64, f64)> = inputs.iter().map(|x| model.lambdas(x)).collect();
        model.rho = fit_dc_rho(&lambdas, labels);

        if inputs.iter().any(|x| x.market.is_some()) {
            model.market_weight = best_on_grid(10, |w| {
                loss(&PoissonFormModel {
                    market_weight: w,
                    ..model
                })
            });
        }

        tracing::info!(
            rows = data.len(),
            form_weight = model.form_weight,
            rho = model.rho,
            market_weight = model.market_weight,
            "fitted poisson form model"
        );
        Ok(model)
    }
}

/// Value in `{0, 1/steps, ..., 1}` with the lowest loss; ties keep the smaller.
fn best_on_grid(steps: u32, loss: impl Fn(f64) -> f64) -> f64 {
    let mut best = 0.0;
    let mut best_loss = f64::INFINITY;
    for i in 0..=steps {
        let w = f64::from(i) / f64::from(steps);
        let l = loss(w);
        if l < best_loss {
            best_loss = l;
            best = w;
        }
    }
    best
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MatchPrediction {
    pub home_team: String,
    pub away_team: String,
    pub outcome: Outcome,
    pub probabilities: Prob3,
    pub home_goals: u32,
    pub away_goals: u32,
    pub confidence: f64,
}

fn prediction_from<M: OutcomeModel>(
    model: &M,
    home: &str,
    away: &str,
    features: &FeatureVector,
) -> Result<MatchPrediction> {
    let probabilities = model.predict_proba(features)?;
    let outcome = probabilities.argmax();
    let (home_goals, away_goals) = model.predict_score(features)?;
    Ok(MatchPrediction {
        home_team: home.to_string(),
        away_team: away.to_string(),
        outcome,
        probabilities,
        home_goals,
        away_goals,
        confidence: probabilities.get(outcome),
    })
}

pub fn predict_match<M: OutcomeModel>(
    model: &M,
    schema: &ModelSchema,
    history: &[MatchRecord],
    home: &str,
    away: &str,
) -> Result<MatchPrediction> {
    schema.validate()?;
    let features = build_features(home, away, history, &schema.columns, &schema.features)?;
    prediction_from(model, home, away, &features)
}

/// Replays history once, then scores every fixture in parallel against the
/// shared read-only state.
pub fn predict_batch<M: OutcomeModel + Sync>(
    model: &M,
    schema: &ModelSchema,
    history: &[MatchRecord],
    fixtures: &[(String, String)],
) -> Result<Vec<Result<MatchPrediction>>> {
    schema.validate()?;
    check_chronological(history)?;
    let state = TrackerState::replay(&schema.features, history);
    Ok(fixtures
        .par_iter()
        .map(|(home, away)| {
            let features = matchup_vector(&state, home, away, &schema.columns)?;
            prediction_from(model, home, away, &features)
        })
        .collect())
}

/// Probabilities for every row of an assembled set, used for evaluation.
pub fn predict_rows<M: OutcomeModel>(model: &M, data: &TrainingSet) -> Result<Vec<Prob3>> {
    data.features
        .iter()
        .map(|row| {
            let features = FeatureVector::from_pairs(&data.columns, row);
            model.predict_proba(&features)
        })
        .collect()
}
