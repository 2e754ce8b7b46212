use std::path::PathBuf;

use anyhow::{Context, Result};
use chrono::Utc;

use fixture_forecast::calibration::Metrics;
use fixture_forecast::config::{Settings, SplitMode, load_env_files};
use fixture_forecast::estimator::{PoissonFormEstimator, TrainableEstimator};
use fixture_forecast::evaluation::{chronological_split, evaluate, stratified_split};
use fixture_forecast::features::assemble;
use fixture_forecast::historical_dataset;
use fixture_forecast::logging::init_logging;
use fixture_forecast::schema::{ModelBundle, ModelSchema};

fn main() -> Result<()> {
    load_env_files();
    init_logging();

    let mut settings = Settings::load(parse_path_arg("--config").as_deref())?;
    if let Some(window) = parse_usize_arg("--window") {
        settings.features.window_size = window;
    }
    if has_flag("--extended") {
        settings.features.window_size = fixture_forecast::form::EXTENDED_WINDOW;
    }
    if has_flag("--odds") {
        settings.features.include_odds = true;
    }
    if has_flag("--stratified") {
        settings.training.split = SplitMode::Stratified;
    }
    settings.validate()?;

    let db_path = parse_path_arg("--db")
        .or_else(|| settings.resolve_db_path())
        .context("unable to resolve sqlite path")?;
    let model_path = parse_path_arg("--model")
        .or_else(|| settings.resolve_model_path())
        .context("unable to resolve model path")?;

    let conn = historical_dataset::open_db(&db_path)?;
    let history = historical_dataset::load_matches(&conn)?;
    let config = settings.feature_config();
    let (data, report) = assemble(&history, &config)?;

    println!("Training set");
    println!("DB: {}", db_path.display());
    println!(
        "Records={} rows={} cold_start_dropped={} missing_odds_dropped={}",
        report.records, report.emitted, report.dropped_cold_start, report.dropped_missing_odds
    );
    if let Some(margin) = report.mean_overround {
        println!("Mean bookmaker overround: {:.2}%", margin * 100.0);
    }
    println!(
        "Features: window={} h2h_window={} h2h={} odds={} columns={}",
        config.window_size,
        config.h2h_window,
        config.include_h2h,
        config.include_odds,
        data.columns.len()
    );

    let training = &settings.training;
    let (train, test) = match training.split {
        SplitMode::Chronological => chronological_split(&data, training.test_fraction),
        SplitMode::Stratified => stratified_split(&data, training.test_fraction, training.seed),
    };
    println!(
        "Split: {:?} train={} test={}",
        training.split,
        train.len(),
        test.len()
    );

    let estimator = PoissonFormEstimator;
    let holdout_model = estimator.fit(&train)?;
    let eval = evaluate(&holdout_model, &train, &test, training.calibration_bins)?;
    println!();
    print_metrics("Holdout model", eval.model);
    print_metrics("Uniform baseline", eval.uniform);
    print_metrics("Empirical baseline", eval.empirical);

    let model = estimator.fit(&data)?;
    println!();
    println!(
        "Final fit on all rows: league_home={:.3} league_away={:.3} form_weight={:.2} rho={:+.2} market_weight={:.1}",
        model.league_home_goals,
        model.league_away_goals,
        model.form_weight,
        model.rho,
        model.market_weight
    );

    let bundle = ModelBundle {
        schema: ModelSchema::new(config, data.columns.clone()),
        trained_at: Utc::now().to_rfc3339(),
        training_rows: data.len(),
        model,
    };
    bundle.save(&model_path)?;
    println!("Saved model: {}", model_path.display());
    Ok(())
}

fn print_metrics(label: &str, metrics: Metrics) {
    println!("{label}:");
    println!(
        "  samples={} brier={:.4} log_loss={:.4} accuracy={:.3}",
        metrics.samples, metrics.brier, metrics.log_loss, metrics.accuracy
    );
}

fn parse_path_arg(name: &str) -> Option<PathBuf> {
    let args = std::env::args().skip(1).collect::<Vec<_>>();
    for (idx, arg) in args.iter().enumerate() {
        if let Some(path) = arg.strip_prefix(&format!("{name}=")) {
            let trimmed = path.trim();
            if !trimmed.is_empty() {
                return Some(PathBuf::from(trimmed));
            }
        }
        if arg == name {
            let Some(next) = args.get(idx + 1) else {
                continue;
            };
            if !next.trim().is_empty() {
                return Some(PathBuf::from(next));
            }
        }
    }
    None
}

fn parse_usize_arg(name: &str) -> Option<usize> {
    let args = std::env::args().skip(1).collect::<Vec<_>>();
    for (idx, arg) in args.iter().enumerate() {
        if let Some(raw) = arg.strip_prefix(&format!("{name}="))
            && let Ok(v) = raw.trim().parse::<usize>()
        {
            return Some(v);
        }
        if arg == name
            && let Some(next) = args.get(idx + 1)
            && let Ok(v) = next.trim().parse::<usize>()
        {
            return Some(v);
        }
    }
    None
}

fn has_flag(name: &str) -> bool {
    std::env::args().skip(1).any(|arg| arg == name)
}
