use std::collections::{HashMap, HashSet};
use std::io::Read;
use std::path::Path;

use anyhow::{Context, Result};
use chrono::{DateTime, NaiveDate, NaiveDateTime};
use serde::Deserialize;

use crate::error::PipelineError;
use crate::historical_dataset::{Bookmaker, MatchRecord, OddsQuote, sort_chronologically};

const UNKNOWN_SEASON: &str = "Unknown";
const MAX_GOALS_PER_SIDE: u32 = 99;

/// One CSV row before validation. Every field is optional so that a bad cell
/// becomes a line-numbered rejection instead of a reader error.
#[derive(Debug, Default, Deserialize)]
pub struct RawMatchRow {
    #[serde(alias = "Date")]
    pub date: Option<String>,
    #[serde(alias = "Time")]
    pub time: Option<String>,
    #[serde(alias = "HomeTeam")]
    pub home_team: Option<String>,
    #[serde(alias = "AwayTeam")]
    pub away_team: Option<String>,
    #[serde(alias = "FTHG")]
    pub home_goals: Option<String>,
    #[serde(alias = "FTAG")]
    pub away_goals: Option<String>,
    #[serde(alias = "Div")]
    pub competition: Option<String>,
    #[serde(alias = "Season")]
    pub season: Option<String>,
    #[serde(rename = "B365H")]
    pub b365_home: Option<String>,
    #[serde(rename = "B365D")]
    pub b365_draw: Option<String>,
    #[serde(rename = "B365A")]
    pub b365_away: Option<String>,
    #[serde(rename = "PSH")]
    pub ps_home: Option<String>,
    #[serde(rename = "PSD")]
    pub ps_draw: Option<String>,
    #[serde(rename = "PSA")]
    pub ps_away: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RowRejection {
    pub line: usize,
    pub reason: String,
}

#[derive(Debug, Clone, Default)]
pub struct IngestReport {
    pub accepted: Vec<MatchRecord>,
    pub rejected: Vec<RowRejection>,
    pub duplicates: usize,
    pub odds_dropped: usize,
}

impl IngestReport {
    pub fn errors(&self) -> Vec<String> {
        self.rejected
            .iter()
            .map(|r| format!("line {}: {}", r.line, r.reason))
            .collect()
    }
}

/// Fallbacks for columns a file may not carry.
#[derive(Debug, Clone)]
pub struct SourceDefaults {
    pub competition: String,
    pub season: String,
}

impl SourceDefaults {
    /// Competition from the file stem, season from a `YYZZ` token in the name
    /// (`E0_1920.csv` is 2019-2020).
    pub fn from_path(path: &Path) -> Self {
        let stem = path
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or_default();
        let competition = stem.split('_').next().unwrap_or(stem).to_string();
        Self {
            competition: if competition.is_empty() {
                "unknown".to_string()
            } else {
                competition
            },
            season: season_from_file_name(stem),
        }
    }
}

pub fn season_from_file_name(name: &str) -> String {
    let bytes = name.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        if !bytes[i].is_ascii_digit() {
            i += 1;
            continue;
        }
        let start = i;
        while i < bytes.len() && bytes[i].is_ascii_digit() {
            i += 1;
        }
        if i - start != 4 {
            continue;
        }
        let token = &name[start..i];
        let (Ok(first), Ok(second)) = (token[..2].parse::<u32>(), token[2..].parse::<u32>())
        else {
            continue;
        };
        if (first + 1) % 100 == second {
            return format!("{}-{}", 2000 + first, 2000 + second);
        }
    }
    UNKNOWN_SEASON.to_string()
}

/// Map of alternate spellings to one canonical team name.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(transparent)]
pub struct TeamAliases {
    map: HashMap<String, String>,
}

impl TeamAliases {
    pub fn new(map: HashMap<String, String>) -> Self {
        Self { map }
    }

    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("read team aliases {}", path.display()))?;
        serde_json::from_str(&raw)
            .with_context(|| format!("parse team aliases {}", path.display()))
    }

    pub fn canonical<'a>(&'a self, name: &'a str) -> &'a str {
        self.map.get(name).map(String::as_str).unwrap_or(name)
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }
}

pub fn parse_match_date(raw: &str) -> Option<NaiveDateTime> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    if let Ok(dt) = NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S") {
        return Some(dt);
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.naive_utc());
    }
    // chrono's %Y also takes two digits, so the year width picks the format
    let fmt = match raw.rsplit_once('/') {
        Some((_, year)) if year.len() == 2 => "%d/%m/%y",
        Some((_, year)) if year.len() == 4 => "%d/%m/%Y",
        Some(_) => return None,
        None => "%Y-%m-%d",
    };
    NaiveDate::parse_from_str(raw, fmt).ok()?.and_hms_opt(0, 0, 0)
}

fn parse_kickoff_time(raw: Option<&str>) -> Option<(u32, u32)> {
    let raw = raw?.trim();
    let (h, m) = raw.split_once(':')?;
    let h = h.parse::<u32>().ok()?;
    let m = m.parse::<u32>().ok()?;
    (h < 24 && m < 60).then_some((h, m))
}

fn parse_goals(raw: Option<&str>, side: &str) -> std::result::Result<u32, String> {
    let raw = raw.map(str::trim).unwrap_or_default();
    if raw.is_empty() {
        return Err(format!("missing {side} goals"));
    }
    // football-data exports goals as "2.0" in some seasons
    let value = raw
        .parse::<f64>()
        .map_err(|_| format!("non-numeric {side} goals `{raw}`"))?;
    if !value.is_finite() || value.fract() != 0.0 {
        return Err(format!("non-integer {side} goals `{raw}`"));
    }
    if value < 0.0 {
        return Err(format!("negative {side} goals `{raw}`"));
    }
    if value > f64::from(MAX_GOALS_PER_SIDE) {
        return Err(format!("{side} goals `{raw}` above {MAX_GOALS_PER_SIDE}"));
    }
    Ok(value as u32)
}

fn parse_price(raw: Option<&str>) -> Option<f64> {
    raw.map(str::trim)
        .filter(|s| !s.is_empty())
        .and_then(|s| s.parse::<f64>().ok())
}

enum OddsCell {
    Absent,
    Valid(OddsQuote),
    Invalid,
}

fn quote_from(
    bookmaker: Bookmaker,
    home: Option<&str>,
    draw: Option<&str>,
    away: Option<&str>,
) -> OddsCell {
    let cells = [home, draw, away];
    let present = cells
        .iter()
        .filter(|c| c.is_some_and(|s| !s.trim().is_empty()))
        .count();
    if present == 0 {
        return OddsCell::Absent;
    }
    let prices: Vec<Option<f64>> = cells.iter().map(|c| parse_price(*c)).collect();
    match prices.as_slice() {
        [Some(h), Some(d), Some(a)] if [*h, *d, *a].iter().all(|p| p.is_finite() && *p > 1.0) => {
            OddsCell::Valid(OddsQuote {
                bookmaker,
                home_price: *h,
                draw_price: *d,
                away_price: *a,
            })
        }
        _ => OddsCell::Invalid,
    }
}

/// Bet365 first, Pinnacle as the fallback. The flag reports odds that were
/// present but unusable.
fn select_odds(row: &RawMatchRow) -> (Option<OddsQuote>, bool) {
    let b365 = quote_from(
        Bookmaker::Bet365,
        row.b365_home.as_deref(),
        row.b365_draw.as_deref(),
        row.b365_away.as_deref(),
    );
    let ps = quote_from(
        Bookmaker::Pinnacle,
        row.ps_home.as_deref(),
        row.ps_draw.as_deref(),
        row.ps_away.as_deref(),
    );
    match (b365, ps) {
        (OddsCell::Valid(q), _) | (_, OddsCell::Valid(q)) => (Some(q), false),
        (OddsCell::Invalid, _) | (_, OddsCell::Invalid) => (None, true),
        (OddsCell::Absent, OddsCell::Absent) => (None, false),
    }
}

fn non_empty(raw: Option<&str>) -> Option<String> {
    raw.map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

/// Validates one row. `line` is the 1-based file line (header is line 1).
pub fn validate_row(
    row: &RawMatchRow,
    line: usize,
    defaults: &SourceDefaults,
    aliases: &TeamAliases,
) -> std::result::Result<(MatchRecord, bool), PipelineError> {
    let reject = |reason: String| PipelineError::InvalidRecord { line, reason };

    let date_raw = row.date.as_deref().unwrap_or_default();
    let mut date =
        parse_match_date(date_raw).ok_or_else(|| reject(format!("unparseable date `{date_raw}`")))?;
    if let Some((h, m)) = parse_kickoff_time(row.time.as_deref())
        && let Some(with_time) = date.date().and_hms_opt(h, m, 0)
    {
        date = with_time;
    }

    let home = non_empty(row.home_team.as_deref()).ok_or_else(|| reject("empty home team".into()))?;
    let away = non_empty(row.away_team.as_deref()).ok_or_else(|| reject("empty away team".into()))?;
    let home_team = aliases.canonical(&home).to_string();
    let away_team = aliases.canonical(&away).to_string();
    if home_team == away_team {
        return Err(reject(format!("home and away are both `{home_team}`")));
    }

    let home_goals = parse_goals(row.home_goals.as_deref(), "home").map_err(reject)?;
    let away_goals = parse_goals(row.away_goals.as_deref(), "away").map_err(reject)?;

    let (odds, odds_dropped) = select_odds(row);

    Ok((
        MatchRecord {
            date,
            home_team,
            away_team,
            home_goals,
            away_goals,
            competition: non_empty(row.competition.as_deref())
                .unwrap_or_else(|| defaults.competition.clone()),
            season: non_empty(row.season.as_deref()).unwrap_or_else(|| defaults.season.clone()),
            odds,
        },
        odds_dropped,
    ))
}

/// Reads a results CSV. Structural problems (missing required header,
/// unreadable input) are errors; bad rows are collected in the report.
pub fn read_matches<R: Read>(
    reader: R,
    defaults: &SourceDefaults,
    aliases: &TeamAliases,
) -> Result<IngestReport> {
    let mut csv = csv::ReaderBuilder::new()
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(reader);

    let headers = csv.headers().context("read csv header")?.clone();
    check_required_columns(&headers)?;

    let mut report = IngestReport::default();
    let mut seen = HashSet::new();
    for (idx, row) in csv.deserialize::<RawMatchRow>().enumerate() {
        let line = idx + 2;
        let row = match row {
            Ok(row) => row,
            Err(err) => {
                report.rejected.push(RowRejection {
                    line,
                    reason: err.to_string(),
                });
                continue;
            }
        };
        match validate_row(&row, line, defaults, aliases) {
            Ok((record, odds_dropped)) => {
                let key = (record.date, record.home_team.clone(), record.away_team.clone());
                if !seen.insert(key) {
                    report.duplicates += 1;
                    continue;
                }
                if odds_dropped {
                    report.odds_dropped += 1;
                }
                report.accepted.push(record);
            }
            Err(PipelineError::InvalidRecord { line, reason }) => {
                report.rejected.push(RowRejection { line, reason });
            }
            Err(other) => return Err(other.into()),
        }
    }

    sort_chronologically(&mut report.accepted);
    Ok(report)
}

pub fn read_matches_file(path: &Path, aliases: &TeamAliases) -> Result<IngestReport> {
    let file =
        std::fs::File::open(path).with_context(|| format!("open csv {}", path.display()))?;
    let defaults = SourceDefaults::from_path(path);
    read_matches(file, &defaults, aliases).with_context(|| format!("ingest {}", path.display()))
}

fn check_required_columns(headers: &csv::StringRecord) -> Result<()> {
    let required: [(&str, &[&str]); 5] = [
        ("date", &["date", "Date"]),
        ("home_team", &["home_team", "HomeTeam"]),
        ("away_team", &["away_team", "AwayTeam"]),
        ("home_goals", &["home_goals", "FTHG"]),
        ("away_goals", &["away_goals", "FTAG"]),
    ];
    for (name, accepted) in required {
        if !headers.iter().any(|h| accepted.contains(&h)) {
            return Err(PipelineError::MissingColumn(name.to_string()).into());
        }
    }
    Ok(())
}

/// Merges several already-validated batches, dropping fixtures seen in an
/// earlier batch, and restores chronological order.
pub fn combine(batches: Vec<Vec<MatchRecord>>) -> (Vec<MatchRecord>, usize) {
    let mut seen = HashSet::new();
    let mut out = Vec::new();
    let mut duplicates = 0usize;
    for batch in batches {
        for record in batch {
            let key = (record.date, record.home_team.clone(), record.away_team.clone());
            if seen.insert(key) {
                out.push(record);
            } else {
                duplicates += 1;
            }
        }
    }
    sort_chronologically(&mut out);
    (out, duplicates)
}

/// A row of a standalone odds file, joined onto results by fixture.
#[derive(Debug, Clone, Deserialize)]
pub struct OddsRow {
    #[serde(alias = "Date")]
    pub date: String,
    #[serde(alias = "HomeTeam")]
    pub home_team: String,
    #[serde(alias = "AwayTeam")]
    pub away_team: String,
    #[serde(rename = "B365H", default)]
    pub b365_home: Option<String>,
    #[serde(rename = "B365D", default)]
    pub b365_draw: Option<String>,
    #[serde(rename = "B365A", default)]
    pub b365_away: Option<String>,
    #[serde(rename = "PSH", default)]
    pub ps_home: Option<String>,
    #[serde(rename = "PSD", default)]
    pub ps_draw: Option<String>,
    #[serde(rename = "PSA", default)]
    pub ps_away: Option<String>,
}

impl OddsRow {
    fn quote(&self) -> Option<OddsQuote> {
        let raw = RawMatchRow {
            b365_home: self.b365_home.clone(),
            b365_draw: self.b365_draw.clone(),
            b365_away: self.b365_away.clone(),
            ps_home: self.ps_home.clone(),
            ps_draw: self.ps_draw.clone(),
            ps_away: self.ps_away.clone(),
            ..RawMatchRow::default()
        };
        select_odds(&raw).0
    }
}

pub fn read_odds_rows<R: Read>(reader: R) -> Result<Vec<OddsRow>> {
    let mut csv = csv::ReaderBuilder::new()
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(reader);
    let mut out = Vec::new();
    for row in csv.deserialize::<OddsRow>() {
        match row {
            Ok(row) => out.push(row),
            Err(err) => tracing::warn!(error = %err, "skipping unreadable odds row"),
        }
    }
    Ok(out)
}

/// Left join of odds onto matches keyed by calendar day and aliased team
/// names. Matches that already carry odds are left alone. Returns how many
/// matches gained odds.
pub fn merge_odds(matches: &mut [MatchRecord], odds: &[OddsRow], aliases: &TeamAliases) -> usize {
    let mut index: HashMap<(NaiveDate, String, String), OddsQuote> = HashMap::new();
    for row in odds {
        let Some(date) = parse_match_date(&row.date) else {
            continue;
        };
        let Some(quote) = row.quote() else {
            continue;
        };
        let key = (
            date.date(),
            aliases.canonical(row.home_team.trim()).to_string(),
            aliases.canonical(row.away_team.trim()).to_string(),
        );
        index.entry(key).or_insert(quote);
    }

    let mut merged = 0usize;
    for m in matches.iter_mut().filter(|m| m.odds.is_none()) {
        let key = (m.date.date(), m.home_team.clone(), m.away_team.clone());
        if let Some(quote) = index.get(&key) {
            m.odds = Some(*quote);
            merged += 1;
        }
    }
    merged
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::path::Path;

    use super::{
        SourceDefaults, TeamAliases, merge_odds, parse_match_date, read_matches, read_odds_rows,
        season_from_file_name,
    };
    use crate::historical_dataset::Bookmaker;

    fn defaults() -> SourceDefaults {
        SourceDefaults {
            competition: "E0".to_string(),
            season: "Unknown".to_string(),
        }
    }

    #[test]
    fn season_is_read_from_file_name() {
        assert_eq!(season_from_file_name("E0_1920"), "2019-2020");
        assert_eq!(season_from_file_name("SP1-2324"), "2023-2024");
        assert_eq!(season_from_file_name("E0_2020_archive"), "Unknown");
        assert_eq!(season_from_file_name("results"), "Unknown");
    }

    #[test]
    fn source_defaults_use_file_stem() {
        let d = SourceDefaults::from_path(Path::new("/data/E0_1920.csv"));
        assert_eq!(d.competition, "E0");
        assert_eq!(d.season, "2019-2020");
    }

    #[test]
    fn dates_are_day_first() {
        let d = parse_match_date("03/02/2021").unwrap();
        assert_eq!(d.format("%Y-%m-%d").to_string(), "2021-02-03");
        let d = parse_match_date("03/02/21").unwrap();
        assert_eq!(d.format("%Y-%m-%d").to_string(), "2021-02-03");
        let d = parse_match_date("19/08/00").unwrap();
        assert_eq!(d.format("%Y-%m-%d").to_string(), "2000-08-19");
        assert!(parse_match_date("03/02/021").is_none());
        assert!(parse_match_date("2021-02-03T15:00:00Z").is_some());
        assert!(parse_match_date("yesterday").is_none());
    }

    #[test]
    fn bad_rows_are_rejected_with_line_numbers() {
        let csv = "\
Date,HomeTeam,AwayTeam,FTHG,FTAG
12/08/2023,Arsenal,Forest,2,1
12/08/2023,,Burnley,0,3
13/08/2023,Brentford,Spurs,-1,2
14/08/2023,Chelsea,Liverpool,x,1
not-a-date,Everton,Fulham,0,1
15/08/2023,Leeds,Leeds,0,0
";
        let report = read_matches(csv.as_bytes(), &defaults(), &TeamAliases::default()).unwrap();
        assert_eq!(report.accepted.len(), 1);
        let lines: Vec<usize> = report.rejected.iter().map(|r| r.line).collect();
        assert_eq!(lines, vec![3, 4, 5, 6, 7]);
        assert!(report.rejected[1].reason.contains("negative"));
    }

    #[test]
    fn two_digit_years_sort_with_four_digit_years() {
        let csv = "\
Date,HomeTeam,AwayTeam,FTHG,FTAG
20/08/2021,Spurs,Chelsea,1,0
14/08/21,Arsenal,Forest,2,1
";
        let report = read_matches(csv.as_bytes(), &defaults(), &TeamAliases::default()).unwrap();
        let dates: Vec<String> = report
            .accepted
            .iter()
            .map(|m| m.date.format("%Y-%m-%d").to_string())
            .collect();
        assert_eq!(dates, vec!["2021-08-14", "2021-08-20"]);
    }

    #[test]
    fn implausible_goal_counts_are_rejected() {
        let csv = "\
Date,HomeTeam,AwayTeam,FTHG,FTAG
12/08/2023,Arsenal,Forest,1e12,0
13/08/2023,Spurs,Chelsea,100,0
14/08/2023,Leeds,Fulham,99,0
";
        let report = read_matches(csv.as_bytes(), &defaults(), &TeamAliases::default()).unwrap();
        assert_eq!(report.accepted.len(), 1);
        assert_eq!(report.accepted[0].home_goals, 99);
        let lines: Vec<usize> = report.rejected.iter().map(|r| r.line).collect();
        assert_eq!(lines, vec![2, 3]);
        assert!(report.rejected[0].reason.contains("above 99"));
    }

    #[test]
    fn missing_required_column_is_an_error() {
        let csv = "Date,HomeTeam,AwayTeam,FTHG\n12/08/2023,Arsenal,Forest,2\n";
        let err = read_matches(csv.as_bytes(), &defaults(), &TeamAliases::default()).unwrap_err();
        assert!(err.to_string().contains("away_goals"));
    }

    #[test]
    fn duplicates_keep_first_and_rows_are_sorted() {
        let csv = "\
date,home_team,away_team,home_goals,away_goals
2023-08-20,Spurs,Chelsea,1,0
2023-08-12,Arsenal,Forest,2,1
2023-08-12,Arsenal,Forest,5,5
";
        let report = read_matches(csv.as_bytes(), &defaults(), &TeamAliases::default()).unwrap();
        assert_eq!(report.duplicates, 1);
        assert_eq!(report.accepted[0].home_team, "Arsenal");
        assert_eq!(report.accepted[0].home_goals, 2);
        assert_eq!(report.accepted[1].home_team, "Spurs");
    }

    #[test]
    fn odds_prefer_bet365_and_fall_back_to_pinnacle() {
        let csv = "\
Date,HomeTeam,AwayTeam,FTHG,FTAG,B365H,B365D,B365A,PSH,PSD,PSA
12/08/2023,Arsenal,Forest,2,1,1.2,6.5,13,1.22,6.8,14
12/08/2023,Bournemouth,West Ham,1,1,,,,2.5,3.4,2.9
12/08/2023,Everton,Fulham,0,1,0.9,3.2,3.1,,,
";
        let report = read_matches(csv.as_bytes(), &defaults(), &TeamAliases::default()).unwrap();
        let by_home = |name: &str| {
            report
                .accepted
                .iter()
                .find(|m| m.home_team == name)
                .unwrap()
                .clone()
        };
        assert_eq!(by_home("Arsenal").odds.unwrap().bookmaker, Bookmaker::Bet365);
        assert_eq!(
            by_home("Bournemouth").odds.unwrap().bookmaker,
            Bookmaker::Pinnacle
        );
        assert!(by_home("Everton").odds.is_none());
        assert_eq!(report.odds_dropped, 1);
    }

    #[test]
    fn merge_odds_joins_on_aliased_fixture() {
        let aliases = TeamAliases::new(HashMap::from([(
            "Man United".to_string(),
            "Manchester United".to_string(),
        )]));
        let results = "\
Date,HomeTeam,AwayTeam,FTHG,FTAG
14/08/2023,Man United,Wolves,1,0
";
        let mut report = read_matches(results.as_bytes(), &defaults(), &aliases).unwrap();
        assert_eq!(report.accepted[0].home_team, "Manchester United");

        let odds = "\
Date,HomeTeam,AwayTeam,PSH,PSD,PSA
2023-08-14,Man United,Wolves,1.4,5.0,8.0
2023-08-15,Spurs,Chelsea,2.0,3.0,4.0
";
        let rows = read_odds_rows(odds.as_bytes()).unwrap();
        let merged = merge_odds(&mut report.accepted, &rows, &aliases);
        assert_eq!(merged, 1);
        assert_eq!(report.accepted[0].odds.unwrap().home_price, 1.4);
    }
}
