use rand::{Rng, SeedableRng};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;

use crate::calibration::{
    CalibrationBin, Metrics, Outcome, Prob3, calibration_bins, empirical_outcome_probs,
    evaluate_probs,
};
use crate::error::Result;
use crate::estimator::{OutcomeModel, predict_rows};
use crate::features::TrainingSet;

pub const DEFAULT_SPLIT_SEED: u64 = 42;

/// Oldest rows train, newest `test_fraction` evaluate. Both sides keep at
/// least one row when the set has two or more.
pub fn chronological_split(data: &TrainingSet, test_fraction: f64) -> (TrainingSet, TrainingSet) {
    let n = data.len();
    let idx = train_split_index(n, test_fraction);
    let train: Vec<usize> = (0..idx).collect();
    let test: Vec<usize> = (idx..n).collect();
    (data.subset(&train), data.subset(&test))
}

fn train_split_index(n: usize, test_fraction: f64) -> usize {
    if n < 2 {
        return n;
    }
    let frac = test_fraction.clamp(0.0, 1.0);
    let idx = ((n as f64) * (1.0 - frac)).round() as usize;
    idx.clamp(1, n - 1)
}

/// Shuffled split that keeps the H/D/A mix of each side close to the whole.
/// Rows inside each side stay in chronological order. As with the
/// chronological split, both sides keep at least one row when the set has two
/// or more, even when per-class rounding would leave one side empty.
pub fn stratified_split(
    data: &TrainingSet,
    test_fraction: f64,
    seed: u64,
) -> (TrainingSet, TrainingSet) {
    let mut rng = StdRng::seed_from_u64(seed);
    let frac = test_fraction.clamp(0.0, 1.0);
    let mut train = Vec::new();
    let mut test = Vec::new();
    for class in Outcome::ALL {
        let mut idx: Vec<usize> = (0..data.len())
            .filter(|&i| data.labels[i] == class)
            .collect();
        idx.shuffle(&mut rng);
        let n_test = ((idx.len() as f64) * frac).round() as usize;
        test.extend_from_slice(&idx[..n_test]);
        train.extend_from_slice(&idx[n_test..]);
    }
    if data.len() >= 2 {
        if test.is_empty() {
            let pick = rng.gen_range(0..train.len());
            test.push(train.swap_remove(pick));
        } else if train.is_empty() {
            let pick = rng.gen_range(0..test.len());
            train.push(test.swap_remove(pick));
        }
    }
    train.sort_unstable();
    test.sort_unstable();
    (data.subset(&train), data.subset(&test))
}

#[derive(Debug, Clone)]
pub struct EvaluationReport {
    pub model: Metrics,
    pub uniform: Metrics,
    pub empirical: Metrics,
    pub empirical_probs: Prob3,
    pub home_bins: Vec<CalibrationBin>,
    pub draw_bins: Vec<CalibrationBin>,
}

/// Scores `model` on `test` against uniform and train-frequency baselines.
pub fn evaluate<M: OutcomeModel>(
    model: &M,
    train: &TrainingSet,
    test: &TrainingSet,
    bins: usize,
) -> Result<EvaluationReport> {
    let preds = predict_rows(model, test)?;
    let empirical_probs = empirical_outcome_probs(&train.labels);

    let uniform_preds = vec![Prob3::uniform(); test.len()];
    let empirical_preds = vec![empirical_probs; test.len()];

    Ok(EvaluationReport {
        model: evaluate_probs(&preds, &test.labels),
        uniform: evaluate_probs(&uniform_preds, &test.labels),
        empirical: evaluate_probs(&empirical_preds, &test.labels),
        empirical_probs,
        home_bins: calibration_bins(&preds, &test.labels, Outcome::Home, bins),
        draw_bins: calibration_bins(&preds, &test.labels, Outcome::Draw, bins),
    })
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, NaiveDate};

    use super::{chronological_split, stratified_split};
    use crate::calibration::Outcome;
    use crate::features::{FeatureConfig, TrainingSet};

    fn synthetic(n: usize) -> TrainingSet {
        let start = NaiveDate::from_ymd_opt(2022, 1, 1)
            .unwrap()
            .and_hms_opt(0, 0, 0)
            .unwrap();
        let config = FeatureConfig::simple();
        let width = config.columns().len();
        TrainingSet {
            config,
            columns: config.columns(),
            features: (0..n).map(|i| vec![i as f64; width]).collect(),
            labels: (0..n).map(|i| Outcome::ALL[i % 3]).collect(),
            home_goals: vec![1; n],
            away_goals: vec![1; n],
            dates: (0..n).map(|i| start + Duration::days(i as i64)).collect(),
            record_indices: (0..n).collect(),
        }
    }

    #[test]
    fn chronological_split_holds_out_the_latest_rows() {
        let data = synthetic(10);
        let (train, test) = chronological_split(&data, 0.2);
        assert_eq!(train.len(), 8);
        assert_eq!(test.len(), 2);
        assert!(train.dates.last().unwrap() < test.dates.first().unwrap());
    }

    #[test]
    fn chronological_split_keeps_both_sides_non_empty() {
        let (train, test) = chronological_split(&synthetic(2), 0.01);
        assert_eq!((train.len(), test.len()), (1, 1));
    }

    #[test]
    fn stratified_split_is_seeded_and_balanced() {
        let data = synthetic(30);
        let (train_a, test_a) = stratified_split(&data, 0.2, 42);
        let (_, test_b) = stratified_split(&data, 0.2, 42);
        assert_eq!(test_a.dates, test_b.dates);
        assert_eq!(train_a.len() + test_a.len(), 30);
        for class in Outcome::ALL {
            assert_eq!(test_a.labels.iter().filter(|o| **o == class).count(), 2);
        }
    }

    #[test]
    fn stratified_split_never_leaves_a_side_empty() {
        let data = synthetic(6);
        let (train, test) = stratified_split(&data, 0.2, 42);
        assert_eq!((train.len(), test.len()), (5, 1));

        let (train, test) = stratified_split(&data, 0.95, 42);
        assert_eq!((train.len(), test.len()), (1, 5));

        let (train, test) = stratified_split(&synthetic(1), 0.2, 42);
        assert_eq!((train.len(), test.len()), (1, 0));
    }
}
