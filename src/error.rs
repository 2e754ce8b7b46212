use thiserror::Error;

/// Typed failures raised by the feature pipeline.
///
/// I/O edges (files, SQLite) wrap these in `anyhow` with context; the
/// variants here are the ones callers are expected to match on.
#[derive(Debug, Error, PartialEq)]
pub enum PipelineError {
    #[error("invalid match record at line {line}: {reason}")]
    InvalidRecord { line: usize, reason: String },

    #[error("missing required column `{0}`")]
    MissingColumn(String),

    #[error("invalid odds: {0}")]
    InvalidOdds(String),

    #[error("schema mismatch: {0}")]
    SchemaMismatch(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("history out of chronological order at record {index}")]
    UnorderedHistory { index: usize },

    #[error("training set is empty after feature assembly")]
    EmptyTrainingSet,
}

pub type Result<T> = std::result::Result<T, PipelineError>;
