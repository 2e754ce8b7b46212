use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::Deserialize;

use crate::error::PipelineError;
use crate::evaluation::DEFAULT_SPLIT_SEED;
use crate::features::FeatureConfig;
use crate::form::SIMPLE_WINDOW;
use crate::h2h::H2H_WINDOW;

const CACHE_DIR: &str = "fixture_forecast";
pub const CONFIG_FILE: &str = "forecast.toml";

/// `$XDG_CACHE_HOME/fixture_forecast`, else `~/.cache/fixture_forecast`.
pub fn app_cache_dir() -> Option<PathBuf> {
    if let Ok(base) = std::env::var("XDG_CACHE_HOME")
        && !base.trim().is_empty()
    {
        return Some(PathBuf::from(base).join(CACHE_DIR));
    }
    let home = std::env::var("HOME").ok()?;
    if home.trim().is_empty() {
        return None;
    }
    Some(PathBuf::from(home).join(".cache").join(CACHE_DIR))
}

/// `.env.local` first so it wins over `.env`; real env vars win over both.
pub fn load_env_files() {
    let _ = dotenvy::from_filename(".env.local");
    let _ = dotenvy::from_filename(".env");
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SplitMode {
    Chronological,
    Stratified,
}

impl SplitMode {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "chronological" | "time" => Some(SplitMode::Chronological),
            "stratified" | "shuffle" => Some(SplitMode::Stratified),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct FeatureSettings {
    #[serde(default = "default_window")]
    pub window_size: usize,
    #[serde(default = "default_h2h_window")]
    pub h2h_window: usize,
    #[serde(default = "default_true")]
    pub include_h2h: bool,
    #[serde(default)]
    pub include_odds: bool,
}

impl Default for FeatureSettings {
    fn default() -> Self {
        Self {
            window_size: default_window(),
            h2h_window: default_h2h_window(),
            include_h2h: true,
            include_odds: false,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct TrainingSettings {
    #[serde(default = "default_test_fraction")]
    pub test_fraction: f64,
    #[serde(default = "default_split")]
    pub split: SplitMode,
    #[serde(default = "default_seed")]
    pub seed: u64,
    #[serde(default = "default_bins")]
    pub calibration_bins: usize,
}

impl Default for TrainingSettings {
    fn default() -> Self {
        Self {
            test_fraction: default_test_fraction(),
            split: default_split(),
            seed: default_seed(),
            calibration_bins: default_bins(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub db_path: Option<PathBuf>,
    #[serde(default)]
    pub model_path: Option<PathBuf>,
    #[serde(default)]
    pub aliases_path: Option<PathBuf>,
    #[serde(default)]
    pub features: FeatureSettings,
    #[serde(default)]
    pub training: TrainingSettings,
}

fn default_window() -> usize {
    SIMPLE_WINDOW
}

fn default_h2h_window() -> usize {
    H2H_WINDOW
}

fn default_true() -> bool {
    true
}

fn default_test_fraction() -> f64 {
    0.2
}

fn default_split() -> SplitMode {
    SplitMode::Chronological
}

fn default_seed() -> u64 {
    DEFAULT_SPLIT_SEED
}

fn default_bins() -> usize {
    10
}

impl Settings {
    pub fn from_toml(raw: &str) -> Result<Self> {
        toml::from_str(raw).context("parse settings toml")
    }

    /// File (explicit path, else `forecast.toml` when present), then env.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut settings = match path {
            Some(path) => {
                let raw = std::fs::read_to_string(path)
                    .with_context(|| format!("read settings {}", path.display()))?;
                Self::from_toml(&raw)?
            }
            None => match std::fs::read_to_string(CONFIG_FILE) {
                Ok(raw) => Self::from_toml(&raw)?,
                Err(_) => Self::default(),
            },
        };
        settings.apply_env(|key| std::env::var(key).ok())?;
        settings.validate()?;
        Ok(settings)
    }

    /// Overrides from `FORECAST_*` variables read through `lookup`.
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<()> {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        if let Some(v) = get("FORECAST_DB") {
            self.db_path = Some(PathBuf::from(v));
        }
        if let Some(v) = get("FORECAST_MODEL") {
            self.model_path = Some(PathBuf::from(v));
        }
        if let Some(v) = get("FORECAST_ALIASES") {
            self.aliases_path = Some(PathBuf::from(v));
        }
        if let Some(v) = get("FORECAST_WINDOW") {
            self.features.window_size = parse_env("FORECAST_WINDOW", &v)?;
        }
        if let Some(v) = get("FORECAST_H2H_WINDOW") {
            self.features.h2h_window = parse_env("FORECAST_H2H_WINDOW", &v)?;
        }
        if let Some(v) = get("FORECAST_INCLUDE_H2H") {
            self.features.include_h2h = parse_bool("FORECAST_INCLUDE_H2H", &v)?;
        }
        if let Some(v) = get("FORECAST_INCLUDE_ODDS") {
            self.features.include_odds = parse_bool("FORECAST_INCLUDE_ODDS", &v)?;
        }
        if let Some(v) = get("FORECAST_TEST_FRACTION") {
            self.training.test_fraction = parse_env("FORECAST_TEST_FRACTION", &v)?;
        }
        if let Some(v) = get("FORECAST_SPLIT") {
            self.training.split = SplitMode::parse(&v).ok_or_else(|| {
                PipelineError::Config(format!("FORECAST_SPLIT: unknown split `{v}`"))
            })?;
        }
        if let Some(v) = get("FORECAST_SEED") {
            self.training.seed = parse_env("FORECAST_SEED", &v)?;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        self.feature_config().validate()?;
        let frac = self.training.test_fraction;
        if !(frac > 0.0 && frac < 1.0) {
            return Err(PipelineError::Config(format!(
                "test_fraction must be in (0, 1), got {frac}"
            ))
            .into());
        }
        Ok(())
    }

    pub fn feature_config(&self) -> FeatureConfig {
        FeatureConfig {
            window_size: self.features.window_size,
            h2h_window: self.features.h2h_window,
            include_h2h: self.features.include_h2h,
            include_odds: self.features.include_odds,
        }
    }

    pub fn resolve_db_path(&self) -> Option<PathBuf> {
        self.db_path
            .clone()
            .or_else(crate::historical_dataset::default_db_path)
    }

    pub fn resolve_model_path(&self) -> Option<PathBuf> {
        self.model_path
            .clone()
            .or_else(crate::schema::default_model_path)
    }
}

fn parse_env<T: std::str::FromStr>(key: &str, raw: &str) -> Result<T> {
    raw.parse::<T>()
        .map_err(|_| PipelineError::Config(format!("{key}: cannot parse `{raw}`")).into())
}

fn parse_bool(key: &str, raw: &str) -> Result<bool> {
    match raw.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(PipelineError::Config(format!("{key}: expected a boolean, got `{raw}`")).into()),
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::{Settings, SplitMode};

    #[test]
    fn empty_toml_gives_defaults() {
        let s = Settings::from_toml("").unwrap();
        assert_eq!(s.features.window_size, 5);
        assert_eq!(s.features.h2h_window, 5);
        assert!(s.features.include_h2h);
        assert!(!s.features.include_odds);
        assert_eq!(s.training.split, SplitMode::Chronological);
        assert_eq!(s.training.seed, 42);
        assert!(s.validate().is_ok());
    }

    #[test]
    fn toml_sections_override_defaults() {
        let s = Settings::from_toml(
            r#"
            db_path = "/tmp/matches.sqlite"

            [features]
            window_size = 20
            include_odds = true

            [training]
            split = "stratified"
            test_fraction = 0.25
            "#,
        )
        .unwrap();
        assert_eq!(s.features.window_size, 20);
        assert!(s.features.include_odds);
        assert_eq!(s.training.split, SplitMode::Stratified);
        assert_eq!(s.feature_config().window_size, 20);
        assert_eq!(s.db_path.unwrap().to_str(), Some("/tmp/matches.sqlite"));
    }

    #[test]
    fn env_overrides_file_values() {
        let env = HashMap::from([
            ("FORECAST_WINDOW", "20"),
            ("FORECAST_INCLUDE_ODDS", "yes"),
            ("FORECAST_SPLIT", "shuffle"),
        ]);
        let mut s = Settings::default();
        s.apply_env(|k| env.get(k).map(|v| v.to_string())).unwrap();
        assert_eq!(s.features.window_size, 20);
        assert!(s.features.include_odds);
        assert_eq!(s.training.split, SplitMode::Stratified);
    }

    #[test]
    fn bad_env_values_are_config_errors() {
        let mut s = Settings::default();
        let err = s
            .apply_env(|k| (k == "FORECAST_WINDOW").then(|| "many".to_string()))
            .unwrap_err();
        assert!(err.to_string().contains("FORECAST_WINDOW"));

        let mut s = Settings::default();
        s.apply_env(|k| (k == "FORECAST_WINDOW").then(|| "0".to_string()))
            .unwrap();
        assert!(s.validate().is_err());
    }
}
