use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{NaiveDateTime, Utc};
use rusqlite::types::Type;
use rusqlite::{Connection, OptionalExtension, params};
use serde::{Deserialize, Serialize};

use crate::calibration::Outcome;
use crate::config::app_cache_dir;

pub const DATE_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Bookmaker {
    Bet365,
    Pinnacle,
}

impl Bookmaker {
    pub fn as_str(self) -> &'static str {
        match self {
            Bookmaker::Bet365 => "bet365",
            Bookmaker::Pinnacle => "pinnacle",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "bet365" | "b365" => Some(Bookmaker::Bet365),
            "pinnacle" | "ps" => Some(Bookmaker::Pinnacle),
            _ => None,
        }
    }
}

/// Decimal 1X2 prices from a single bookmaker.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct OddsQuote {
    pub bookmaker: Bookmaker,
    pub home_price: f64,
    pub draw_price: f64,
    pub away_price: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchRecord {
    pub date: NaiveDateTime,
    pub home_team: String,
    pub away_team: String,
    pub home_goals: u32,
    pub away_goals: u32,
    pub competition: String,
    pub season: String,
    pub odds: Option<OddsQuote>,
}

impl MatchRecord {
    pub fn outcome(&self) -> Outcome {
        Outcome::from_goals(self.home_goals, self.away_goals)
    }

    pub fn involves(&self, team: &str) -> bool {
        self.home_team == team || self.away_team == team
    }
}

/// Stable sort by kickoff; same-day fixtures keep their source order.
pub fn sort_chronologically(records: &mut [MatchRecord]) {
    records.sort_by(|a, b| a.date.cmp(&b.date));
}

#[derive(Debug, Clone)]
pub struct UpsertSummary {
    pub inserted: usize,
    pub updated: usize,
}

pub fn default_db_path() -> Option<PathBuf> {
    app_cache_dir().map(|dir| dir.join("match_history.sqlite"))
}

pub fn open_db(path: &Path) -> Result<Connection> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).ok();
    }
    let conn =
        Connection::open(path).with_context(|| format!("open sqlite db {}", path.display()))?;
    init_schema(&conn)?;
    Ok(conn)
}

pub fn open_in_memory() -> Result<Connection> {
    let conn = Connection::open_in_memory().context("open in-memory sqlite db")?;
    init_schema(&conn)?;
    Ok(conn)
}

pub fn init_schema(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        r#"
        PRAGMA journal_mode = WAL;
        CREATE TABLE IF NOT EXISTS matches (
            seq INTEGER PRIMARY KEY AUTOINCREMENT,
            match_date TEXT NOT NULL,
            home_team TEXT NOT NULL,
            away_team TEXT NOT NULL,
            home_goals INTEGER NOT NULL,
            away_goals INTEGER NOT NULL,
            competition TEXT NOT NULL,
            season TEXT NOT NULL,
            bookmaker TEXT NULL,
            home_price REAL NULL,
            draw_price REAL NULL,
            away_price REAL NULL,
            outcome TEXT NOT NULL,
            updated_at TEXT NOT NULL,
            UNIQUE(match_date, home_team, away_team)
        );
        CREATE INDEX IF NOT EXISTS idx_matches_date ON matches(match_date);
        CREATE INDEX IF NOT EXISTS idx_matches_home ON matches(home_team);
        CREATE INDEX IF NOT EXISTS idx_matches_away ON matches(away_team);
        CREATE INDEX IF NOT EXISTS idx_matches_season ON matches(season);

        CREATE TABLE IF NOT EXISTS ingest_runs (
            run_id INTEGER PRIMARY KEY AUTOINCREMENT,
            started_at TEXT NOT NULL,
            finished_at TEXT NOT NULL,
            source TEXT NOT NULL,
            accepted INTEGER NOT NULL,
            rejected INTEGER NOT NULL,
            duplicates INTEGER NOT NULL,
            errors_json TEXT NOT NULL
        );
        "#,
    )
    .context("create sqlite schema")?;
    Ok(())
}

/// Writes all records in one transaction. Re-ingesting a fixture updates the
/// row in place so its `seq` (and with it the tie-break order) is preserved.
pub fn upsert_matches(conn: &mut Connection, records: &[MatchRecord]) -> Result<UpsertSummary> {
    let tx = conn.transaction().context("begin ingest transaction")?;
    let mut inserted = 0usize;
    let mut updated = 0usize;
    for record in records {
        let date = record.date.format(DATE_FORMAT).to_string();
        let existing: Option<i64> = tx
            .query_row(
                "SELECT seq FROM matches WHERE match_date = ?1 AND home_team = ?2 AND away_team = ?3",
                params![date, record.home_team, record.away_team],
                |row| row.get(0),
            )
            .optional()
            .context("lookup existing match")?;
        upsert_match(&tx, record, &date)?;
        if existing.is_some() {
            updated += 1;
        } else {
            inserted += 1;
        }
    }
    tx.commit().context("commit ingest transaction")?;
    Ok(UpsertSummary { inserted, updated })
}

fn upsert_match(tx: &rusqlite::Transaction<'_>, m: &MatchRecord, date: &str) -> Result<()> {
    let odds = m.odds.as_ref();
    tx.execute(
        r#"
        INSERT INTO matches (
            match_date, home_team, away_team, home_goals, away_goals,
            competition, season, bookmaker, home_price, draw_price, away_price,
            outcome, updated_at
        ) VALUES (
            ?1, ?2, ?3, ?4, ?5,
            ?6, ?7, ?8, ?9, ?10, ?11,
            ?12, ?13
        )
        ON CONFLICT(match_date, home_team, away_team) DO UPDATE SET
            home_goals = excluded.home_goals,
            away_goals = excluded.away_goals,
            competition = excluded.competition,
            season = excluded.season,
            bookmaker = excluded.bookmaker,
            home_price = excluded.home_price,
            draw_price = excluded.draw_price,
            away_price = excluded.away_price,
            outcome = excluded.outcome,
            updated_at = excluded.updated_at
        "#,
        params![
            date,
            m.home_team,
            m.away_team,
            m.home_goals as i64,
            m.away_goals as i64,
            m.competition,
            m.season,
            odds.map(|o| o.bookmaker.as_str()),
            odds.map(|o| o.home_price),
            odds.map(|o| o.draw_price),
            odds.map(|o| o.away_price),
            m.outcome().label().to_string(),
            Utc::now().to_rfc3339(),
        ],
    )
    .context("upsert match")?;
    Ok(())
}

/// Full history in fold order: kickoff ascending, insertion order on ties.
pub fn load_matches(conn: &Connection) -> Result<Vec<MatchRecord>> {
    let mut stmt = conn
        .prepare(
            r#"
            SELECT
                match_date, home_team, away_team, home_goals, away_goals,
                competition, season, bookmaker, home_price, draw_price, away_price
            FROM matches
            ORDER BY match_date ASC, seq ASC
            "#,
        )
        .context("prepare load matches query")?;

    let rows = stmt
        .query_map([], |row| {
            let raw_date: String = row.get(0)?;
            let date = NaiveDateTime::parse_from_str(&raw_date, DATE_FORMAT).map_err(|err| {
                rusqlite::Error::FromSqlConversionFailure(0, Type::Text, Box::new(err))
            })?;
            let bookmaker: Option<String> = row.get(7)?;
            let prices: (Option<f64>, Option<f64>, Option<f64>) =
                (row.get(8)?, row.get(9)?, row.get(10)?);
            Ok(MatchRecord {
                date,
                home_team: row.get(1)?,
                away_team: row.get(2)?,
                home_goals: row.get::<_, u32>(3)?,
                away_goals: row.get::<_, u32>(4)?,
                competition: row.get(5)?,
                season: row.get(6)?,
                odds: decode_odds(bookmaker.as_deref(), prices),
            })
        })
        .context("query load matches")?;

    let mut out = Vec::new();
    for row in rows {
        out.push(row.context("decode match row")?);
    }
    Ok(out)
}

fn decode_odds(
    bookmaker: Option<&str>,
    prices: (Option<f64>, Option<f64>, Option<f64>),
) -> Option<OddsQuote> {
    let bookmaker = Bookmaker::parse(bookmaker?)?;
    let (Some(home_price), Some(draw_price), Some(away_price)) = prices else {
        return None;
    };
    Some(OddsQuote {
        bookmaker,
        home_price,
        draw_price,
        away_price,
    })
}

pub fn list_teams(conn: &Connection) -> Result<Vec<String>> {
    let mut stmt = conn
        .prepare(
            r#"
            SELECT home_team FROM matches
            UNION
            SELECT away_team FROM matches
            ORDER BY 1 ASC
            "#,
        )
        .context("prepare list teams query")?;
    let rows = stmt
        .query_map([], |row| row.get::<_, String>(0))
        .context("query list teams")?;
    let mut out = Vec::new();
    for row in rows {
        out.push(row.context("decode team row")?);
    }
    Ok(out)
}

pub fn match_count(conn: &Connection) -> Result<usize> {
    let n: i64 = conn
        .query_row("SELECT COUNT(*) FROM matches", [], |row| row.get(0))
        .context("count matches")?;
    Ok(n.max(0) as usize)
}

#[derive(Debug, Clone)]
pub struct IngestRun {
    pub started_at: String,
    pub source: String,
    pub accepted: usize,
    pub rejected: usize,
    pub duplicates: usize,
    pub errors: Vec<String>,
}

pub fn record_ingest_run(conn: &Connection, run: &IngestRun) -> Result<i64> {
    let errors_json = serde_json::to_string(&run.errors).unwrap_or_else(|_| "[]".to_string());
    conn.execute(
        "INSERT INTO ingest_runs(started_at, finished_at, source, accepted, rejected, duplicates, errors_json)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        params![
            run.started_at,
            Utc::now().to_rfc3339(),
            run.source,
            run.accepted as i64,
            run.rejected as i64,
            run.duplicates as i64,
            errors_json,
        ],
    )
    .context("insert ingest run")?;
    Ok(conn.last_insert_rowid())
}
