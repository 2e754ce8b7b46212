use chrono::{Duration, NaiveDate};
use criterion::{Criterion, criterion_group, criterion_main};
use std::hint::black_box;

use fixture_forecast::estimator::{PoissonFormEstimator, TrainableEstimator, predict_batch};
use fixture_forecast::features::{FeatureConfig, assemble};
use fixture_forecast::historical_dataset::MatchRecord;
use fixture_forecast::reconstruct::build_features;
use fixture_forecast::schema::ModelSchema;

const TEAM_COUNT: usize = 40;

fn synthetic_history(matches: usize) -> Vec<MatchRecord> {
    let start = NaiveDate::from_ymd_opt(2000, 8, 1)
        .unwrap()
        .and_hms_opt(15, 0, 0)
        .unwrap();
    (0..matches)
        .map(|i| {
            let home = i % TEAM_COUNT;
            let away = (home + 1 + (i / TEAM_COUNT) % (TEAM_COUNT - 1)) % TEAM_COUNT;
            MatchRecord {
                date: start + Duration::hours(i as i64 * 6),
                home_team: format!("Team {home:02}"),
                away_team: format!("Team {away:02}"),
                home_goals: ((i * 7 + home) % 5) as u32,
                away_goals: ((i * 3 + away) % 4) as u32,
                competition: "SYN".to_string(),
                season: "synthetic".to_string(),
                odds: None,
            }
        })
        .collect()
}

fn bench_assemble(c: &mut Criterion) {
    let history = synthetic_history(20_000);
    c.bench_function("assemble_20k_simple", |b| {
        b.iter(|| {
            let (set, _) = assemble(black_box(&history), &FeatureConfig::simple()).unwrap();
            black_box(set.len());
        })
    });
    c.bench_function("assemble_20k_extended", |b| {
        b.iter(|| {
            let (set, _) = assemble(black_box(&history), &FeatureConfig::extended()).unwrap();
            black_box(set.len());
        })
    });
}

fn bench_reconstruct(c: &mut Criterion) {
    let history = synthetic_history(20_000);
    let config = FeatureConfig::simple();
    let columns = config.columns();
    c.bench_function("build_features_20k", |b| {
        b.iter(|| {
            let v = build_features(
                black_box("Team 03"),
                black_box("Team 17"),
                &history,
                &columns,
                &config,
            )
            .unwrap();
            black_box(v.len());
        })
    });
}

fn bench_predict_batch(c: &mut Criterion) {
    let history = synthetic_history(20_000);
    let config = FeatureConfig::simple();
    let (set, _) = assemble(&history, &config).unwrap();
    let model = PoissonFormEstimator.fit(&set).unwrap();
    let schema = ModelSchema::for_config(config);
    let fixtures: Vec<(String, String)> = (0..TEAM_COUNT)
        .map(|i| {
            (
                format!("Team {i:02}"),
                format!("Team {:02}", (i + 5) % TEAM_COUNT),
            )
        })
        .collect();
    c.bench_function("predict_batch_40", |b| {
        b.iter(|| {
            let out = predict_batch(&model, &schema, black_box(&history), &fixtures).unwrap();
            black_box(out.len());
        })
    });
}

criterion_group!(benches, bench_assemble, bench_reconstruct, bench_predict_batch);
criterion_main!(benches);
