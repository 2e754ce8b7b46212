use std::path::PathBuf;

use anyhow::{Context, Result, anyhow};

use fixture_forecast::calibration::{CalibrationBin, Metrics};
use fixture_forecast::config::{Settings, load_env_files};
use fixture_forecast::estimator::{PoissonFormEstimator, TrainableEstimator};
use fixture_forecast::evaluation::{EvaluationReport, chronological_split, evaluate};
use fixture_forecast::features::{FeatureConfig, assemble};
use fixture_forecast::historical_dataset::{self, MatchRecord};
use fixture_forecast::logging::init_logging;

fn main() -> Result<()> {
    load_env_files();
    init_logging();

    let settings = Settings::load(parse_path_arg("--config").as_deref())?;
    let db_path = parse_path_arg("--db")
        .or_else(|| settings.resolve_db_path())
        .context("unable to resolve sqlite path")?;
    let test_fraction = parse_f64_arg("--test-fraction").unwrap_or(settings.training.test_fraction);
    let bins = settings.training.calibration_bins;

    let conn = historical_dataset::open_db(&db_path)?;
    let history = historical_dataset::load_matches(&conn)?;
    if history.is_empty() {
        return Err(anyhow!("no matches in {}", db_path.display()));
    }

    println!("Chronological holdout backtest");
    println!("DB: {}", db_path.display());
    println!("Matches: {}", history.len());
    if let (Some(first), Some(last)) = (history.first(), history.last()) {
        println!("Range: {} -> {}", first.date, last.date);
    }

    let mut configs = vec![("configured", settings.feature_config())];
    if has_flag("--compare") {
        configs.push(("simple", FeatureConfig::simple()));
        configs.push(("extended", FeatureConfig::extended()));
        configs.push((
            "simple+odds",
            FeatureConfig {
                include_odds: true,
                ..FeatureConfig::simple()
            },
        ));
    }

    for (label, config) in configs {
        println!();
        match run_config(&history, &config, test_fraction, bins) {
            Ok(report) => print_report(label, &config, &report),
            Err(err) => println!("{label}: skipped ({err:#})"),
        }
    }
    Ok(())
}

fn run_config(
    history: &[MatchRecord],
    config: &FeatureConfig,
    test_fraction: f64,
    bins: usize,
) -> Result<EvaluationReport> {
    let (data, _) = assemble(history, config)?;
    let (train, test) = chronological_split(&data, test_fraction);
    let model = PoissonFormEstimator.fit(&train)?;
    Ok(evaluate(&model, &train, &test, bins)?)
}

fn print_report(label: &str, config: &FeatureConfig, report: &EvaluationReport) {
    println!(
        "== {label} (window={} h2h={} odds={}) ==",
        config.window_size, config.include_h2h, config.include_odds
    );
    print_metrics("Model", report.model);
    print_metrics("Uniform baseline", report.uniform);
    print_metrics("Empirical baseline", report.empirical);
    let e = report.empirical_probs;
    println!(
        "Empirical outcome probs: H={:.3} D={:.3} A={:.3}",
        e.home, e.draw, e.away
    );
    print_bins("Home-win calibration bins", &report.home_bins);
    print_bins("Draw calibration bins", &report.draw_bins);
}

fn print_bins(title: &str, bins: &[CalibrationBin]) {
    println!("{title}:");
    for bin in bins {
        if bin.count == 0 {
            continue;
        }
        println!(
            "  [{:.1},{:.1}) n={:<4} pred={:.3} actual={:.3}",
            bin.bucket_start, bin.bucket_end, bin.count, bin.avg_pred, bin.actual_rate
        );
    }
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

fn parse_f64_arg(name: &str) -> Option<f64> {
    let args = std::env::args().skip(1).collect::<Vec<_>>();
    for (idx, arg) in args.iter().enumerate() {
        if let Some(raw) = arg.strip_prefix(&format!("{name}="))
            && let Ok(v) = raw.trim().parse::<f64>()
        {
            return Some(v);
        }
        if arg == name
            && let Some(next) = args.get(idx + 1)
            && let Ok(v) = next.trim().parse::<f64>()
        {
            return Some(v);
        }
    }
    None
}

fn has_flag(name: &str) -> bool {
    std::env::args().skip(1).any(|arg| arg == name)
}
