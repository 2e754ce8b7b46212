pub mod calibration;
pub mod config;
pub mod error;
pub mod estimator;
pub mod evaluation;
pub mod features;
pub mod form;
pub mod h2h;
pub mod historical_dataset;
pub mod ingest;
pub mod logging;
pub mod odds;
pub mod reconstruct;
pub mod schema;

pub use error::{PipelineError, Result};
