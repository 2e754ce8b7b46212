use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::config::app_cache_dir;
use crate::error::PipelineError;
use crate::features::{FeatureConfig, is_known_column};

pub const SCHEMA_VERSION: u32 = 1;

/// Feature layout a model was trained on.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelSchema {
    pub version: u32,
    pub features: FeatureConfig,
    pub columns: Vec<String>,
}

impl ModelSchema {
    pub fn new(features: FeatureConfig, columns: Vec<String>) -> Self {
        Self {
            version: SCHEMA_VERSION,
            features,
            columns,
        }
    }

    pub fn for_config(features: FeatureConfig) -> Self {
        Self::new(features, features.columns())
    }

    pub fn validate(&self) -> crate::error::Result<()> {
        if self.version != SCHEMA_VERSION {
            return Err(PipelineError::SchemaMismatch(format!(
                "schema version {} (expected {SCHEMA_VERSION})",
                self.version
            )));
        }
        self.features
            .validate()
            .map_err(|e| PipelineError::SchemaMismatch(e.to_string()))?;
        validate_columns(&self.columns)
    }

    /// The windows a model was trained with must match the ones used to
    /// rebuild its inputs.
    pub fn check_config(&self, runtime: &FeatureConfig) -> crate::error::Result<()> {
        if self.features.window_size != runtime.window_size
            || self.features.h2h_window != runtime.h2h_window
        {
            return Err(PipelineError::SchemaMismatch(format!(
                "model trained with form window {} / h2h window {}, runtime uses {} / {}",
                self.features.window_size,
                self.features.h2h_window,
                runtime.window_size,
                runtime.h2h_window
            )));
        }
        Ok(())
    }
}

pub fn validate_columns(columns: &[String]) -> crate::error::Result<()> {
    if columns.is_empty() {
        return Err(PipelineError::SchemaMismatch("no columns".into()));
    }
    let mut seen = HashSet::new();
    for c in columns {
        if !seen.insert(c.as_str()) {
            return Err(PipelineError::SchemaMismatch(format!(
                "duplicate column `{c}`"
            )));
        }
        if !is_known_column(c) {
            return Err(PipelineError::SchemaMismatch(format!(
                "unknown column `{c}`"
            )));
        }
    }
    Ok(())
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelBundle<M> {
    pub schema: ModelSchema,
    pub trained_at: String,
    pub training_rows: usize,
    pub model: M,
}

impl<M: Serialize + DeserializeOwned> ModelBundle<M> {
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("create model dir {}", parent.display()))?;
        }
        let tmp = path.with_extension("json.tmp");
        let json = serde_json::to_string_pretty(self).context("serialize model bundle")?;
        fs::write(&tmp, json).context("write model bundle")?;
        fs::rename(&tmp, path).context("swap model bundle")?;
        Ok(())
    }

    pub fn load(path: &Path) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .with_context(|| format!("read model bundle {}", path.display()))?;
        let bundle: Self = serde_json::from_str(&raw)
            .with_context(|| format!("parse model bundle {}", path.display()))?;
        bundle.schema.validate()?;
        Ok(bundle)
    }
}

pub fn default_model_path() -> Option<PathBuf> {
    app_cache_dir().map(|dir| dir.join("outcome_model.json"))
}

#[cfg(test)]
mod tests {
    use super::{ModelBundle, ModelSchema, SCHEMA_VERSION, validate_columns};
    use crate::error::PipelineError;
    use crate::features::FeatureConfig;

    fn cols(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn schema_rejects_bad_column_lists() {
        assert!(matches!(
            validate_columns(&[]),
            Err(PipelineError::SchemaMismatch(_))
        ));
        assert!(validate_columns(&cols(&["home_form_pts", "home_form_pts"])).is_err());
        assert!(validate_columns(&cols(&["home_form_pts", "home_elo"])).is_err());
        assert!(validate_columns(&cols(&["odds_p_draw", "home_form_pts"])).is_ok());
    }

    #[test]
    fn config_windows_must_match() {
        let schema = ModelSchema::for_config(FeatureConfig::simple());
        assert!(schema.check_config(&FeatureConfig::simple()).is_ok());
        assert!(schema.check_config(&FeatureConfig::extended()).is_err());
    }

    #[test]
    fn bundle_round_trips_through_disk() {
        let dir = std::env::temp_dir().join(format!("fixture_forecast_schema_{}", std::process::id()));
        let path = dir.join("model.json");
        let bundle = ModelBundle {
            schema: ModelSchema::for_config(FeatureConfig::extended()),
            trained_at: "2024-05-01T00:00:00Z".to_string(),
            training_rows: 42,
            model: vec![1.0_f64, 2.0],
        };
        bundle.save(&path).unwrap();
        let loaded: ModelBundle<Vec<f64>> = ModelBundle::load(&path).unwrap();
        assert_eq!(loaded.schema, bundle.schema);
        assert_eq!(loaded.model, vec![1.0, 2.0]);
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn save_reports_an_unusable_parent_dir() {
        let blocker = std::env::temp_dir().join(format!(
            "fixture_forecast_blocker_{}",
            std::process::id()
        ));
        std::fs::write(&blocker, b"not a directory").unwrap();
        let bundle = ModelBundle {
            schema: ModelSchema::for_config(FeatureConfig::simple()),
            trained_at: "2024-05-01T00:00:00Z".to_string(),
            training_rows: 1,
            model: 0.5_f64,
        };
        let err = bundle.save(&blocker.join("nested").join("model.json")).unwrap_err();
        assert!(err.to_string().contains("create model dir"));
        let _ = std::fs::remove_file(&blocker);
    }

    #[test]
    fn stale_version_fails_validation() {
        let mut schema = ModelSchema::for_config(FeatureConfig::simple());
        schema.version = SCHEMA_VERSION + 1;
        assert!(schema.validate().is_err());
    }
}
