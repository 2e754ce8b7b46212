use std::path::PathBuf;

use anyhow::{Context, Result, anyhow};

use fixture_forecast::config::{Settings, load_env_files};
use fixture_forecast::estimator::{PoissonFormModel, predict_match};
use fixture_forecast::historical_dataset;
use fixture_forecast::logging::init_logging;
use fixture_forecast::reconstruct::build_features_for_schema;
use fixture_forecast::schema::ModelBundle;

const VALUE_FLAGS: &[&str] = &["--db", "--model", "--config", "--window"];

fn main() -> Result<()> {
    load_env_files();
    init_logging();

    let settings = Settings::load(parse_path_arg("--config").as_deref())?;
    let db_path = parse_path_arg("--db")
        .or_else(|| settings.resolve_db_path())
        .context("unable to resolve sqlite path")?;
    let conn = historical_dataset::open_db(&db_path)?;

    if has_flag("--teams") {
        for team in historical_dataset::list_teams(&conn)? {
            println!("{team}");
        }
        return Ok(());
    }

    let teams = positional_args();
    let [home, away] = teams.as_slice() else {
        return Err(anyhow!(
            "usage: fixture_forecast <home> <away> [--db PATH] [--model PATH] [--json] [--features] | --teams"
        ));
    };

    let model_path = parse_path_arg("--model")
        .or_else(|| settings.resolve_model_path())
        .context("unable to resolve model path")?;
    let bundle: ModelBundle<PoissonFormModel> = ModelBundle::load(&model_path)?;
    if let Some(window) = parse_usize_arg("--window") {
        let mut runtime = bundle.schema.features;
        runtime.window_size = window;
        bundle.schema.check_config(&runtime)?;
    }

    let history = historical_dataset::load_matches(&conn)?;
    tracing::debug!(matches = history.len(), "loaded history");
    let prediction = predict_match(&bundle.model, &bundle.schema, &history, home, away)?;

    if has_flag("--features") {
        let features = build_features_for_schema(home, away, &history, &bundle.schema)?;
        for (name, value) in features.iter() {
            println!("{name:<28} {value:.4}");
        }
    }

    if has_flag("--json") {
        println!(
            "{}",
            serde_json::to_string_pretty(&prediction).context("serialize prediction")?
        );
        return Ok(());
    }

    let p = prediction.probabilities;
    println!("{} vs {}", prediction.home_team, prediction.away_team);
    println!(
        "Prediction: {} ({:.1}% confidence)",
        prediction.outcome,
        prediction.confidence * 100.0
    );
    println!(
        "Probabilities: H={:.3} D={:.3} A={:.3}",
        p.home, p.draw, p.away
    );
    println!(
        "Expected score: {}-{}",
        prediction.home_goals, prediction.away_goals
    );
    Ok(())
}

fn positional_args() -> Vec<String> {
    let args = std::env::args().skip(1).collect::<Vec<_>>();
    let mut out = Vec::new();
    let mut skip_next = false;
    for arg in args {
        if skip_next {
            skip_next = false;
            continue;
        }
        if VALUE_FLAGS.contains(&arg.as_str()) {
            skip_next = true;
            continue;
        }
        if arg.starts_with("--") {
            continue;
        }
        out.push(arg);
    }
    out
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
