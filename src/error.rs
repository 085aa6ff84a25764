use thiserror::Error;

use crate::writers::StoreError;

pub type Result<T> = std::result::Result<T, PipelineError>;

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("File I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV parsing error: {0}")]
    Csv(#[from] csv::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Configuration load error: {0}")]
    ConfigLoad(#[from] config::ConfigError),

    #[error("Validation error: {0}")]
    Validation(#[from] validator::ValidationErrors),

    #[error("Invalid coordinate format: {0}")]
    InvalidCoordinate(String),

    #[error("Malformed {dataset} input: required field '{field}' is absent from every record")]
    InputShape { dataset: String, field: String },

    #[error("Invalid data format: {0}")]
    InvalidFormat(String),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Store unreachable after {attempts} attempts: {message}")]
    StoreUnavailable { attempts: u32, message: String },

    #[error("Time budget of {budget_secs}s exceeded after {stage} stage")]
    TimeoutExceeded { stage: String, budget_secs: u64 },

    #[error("Parquet write error: {0}")]
    Parquet(#[from] parquet::errors::ParquetError),

    #[error("Arrow error: {0}")]
    Arrow(#[from] arrow::error::ArrowError),

    #[error("Async task error: {0}")]
    TaskJoin(#[from] tokio::task::JoinError),
}
