use std::path::PathBuf;

use anyhow::{Context, Result, anyhow};
use chrono::Utc;

use fixture_forecast::config::{Settings, load_env_files};
use fixture_forecast::historical_dataset::{self, IngestRun};
use fixture_forecast::ingest::{self, TeamAliases};
use fixture_forecast::logging::init_logging;

const VALUE_FLAGS: &[&str] = &["--db", "--odds", "--aliases", "--config"];

fn main() -> Result<()> {
    load_env_files();
    init_logging();

    let settings = Settings::load(parse_path_arg("--config").as_deref())?;
    let files = positional_args();
    if files.is_empty() {
        return Err(anyhow!(
            "usage: ingest <results.csv>... [--odds odds.csv]... [--aliases teams.json] [--db PATH]"
        ));
    }

    let aliases = match parse_path_arg("--aliases").or_else(|| settings.aliases_path.clone()) {
        Some(path) => {
            let aliases = TeamAliases::load(&path)?;
            tracing::info!(path = %path.display(), aliases = aliases.len(), "loaded team aliases");
            aliases
        }
        None => TeamAliases::default(),
    };

    let db_path = parse_path_arg("--db")
        .or_else(|| settings.resolve_db_path())
        .context("unable to resolve sqlite path")?;
    let mut conn = historical_dataset::open_db(&db_path)?;

    let started_at = Utc::now().to_rfc3339();
    let mut batches = Vec::new();
    let mut rejected = 0usize;
    let mut duplicates = 0usize;
    let mut errors = Vec::new();
    for file in &files {
        let report = ingest::read_matches_file(file, &aliases)?;
        println!(
            "{}: accepted={} rejected={} duplicates={} odds_dropped={}",
            file.display(),
            report.accepted.len(),
            report.rejected.len(),
            report.duplicates,
            report.odds_dropped
        );
        for rejection in &report.rejected {
            tracing::warn!(
                file = %file.display(),
                line = rejection.line,
                reason = %rejection.reason,
                "rejected row"
            );
        }
        rejected += report.rejected.len();
        duplicates += report.duplicates;
        errors.extend(
            report
                .errors()
                .into_iter()
                .map(|e| format!("{}: {e}", file.display())),
        );
        batches.push(report.accepted);
    }

    let (mut matches, cross_file_dupes) = ingest::combine(batches);
    duplicates += cross_file_dupes;

    for odds_path in parse_path_list_arg("--odds") {
        let file = std::fs::File::open(&odds_path)
            .with_context(|| format!("open odds csv {}", odds_path.display()))?;
        let rows = ingest::read_odds_rows(file)?;
        let merged = ingest::merge_odds(&mut matches, &rows, &aliases);
        println!(
            "{}: odds rows={} merged={}",
            odds_path.display(),
            rows.len(),
            merged
        );
    }

    let summary = historical_dataset::upsert_matches(&mut conn, &matches)?;
    historical_dataset::record_ingest_run(
        &conn,
        &IngestRun {
            started_at,
            source: files
                .iter()
                .map(|f| f.display().to_string())
                .collect::<Vec<_>>()
                .join(","),
            accepted: matches.len(),
            rejected,
            duplicates,
            errors,
        },
    )?;

    println!("Ingest complete");
    println!("DB: {}", db_path.display());
    println!(
        "Matches: inserted={} updated={} rejected={} duplicates={}",
        summary.inserted, summary.updated, rejected, duplicates
    );
    println!(
        "Stored total: {}",
        historical_dataset::match_count(&conn)?
    );
    Ok(())
}

fn positional_args() -> Vec<PathBuf> {
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
        out.push(PathBuf::from(arg));
    }
    out
}

fn parse_path_arg(name: &str) -> Option<PathBuf> {
    parse_path_list_arg(name).into_iter().next()
}

fn parse_path_list_arg(name: &str) -> Vec<PathBuf> {
    let args = std::env::args().skip(1).collect::<Vec<_>>();
    let mut out = Vec::new();
    for (idx, arg) in args.iter().enumerate() {
        if let Some(path) = arg.strip_prefix(&format!("{name}=")) {
            let trimmed = path.trim();
            if !trimmed.is_empty() {
                out.push(PathBuf::from(trimmed));
            }
        }
        if arg == name
            && let Some(next) = args.get(idx + 1)
            && !next.trim().is_empty()
        {
            out.push(PathBuf::from(next));
        }
    }
    out
}
