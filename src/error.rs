use chrono::NaiveDate;
use thiserror::Error;

use crate::reference::ResolutionError;

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("spreadsheet error: {0}")]
    Excel(#[from] calamine::Error),

    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("TOML deserialization failed: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("JSON serialization failed: {0}")]
    Json(#[from] serde_json::Error),

    #[error("configuration error: {0}")]
    Config(String),

    #[error(transparent)]
    Resolution(#[from] ResolutionError),

    #[error("source table is missing a column for field '{field}' (accepted names: {aliases:?})")]
    MissingColumn {
        field: &'static str,
        aliases: Vec<String>,
    },

    #[error("malformed value '{value}' in column '{column}': {reason}")]
    MalformedValue {
        column: String,
        value: String,
        reason: String,
    },

    #[error("conflicting duplicate measurements for ({origin}, {destination}, {date}): values {values:?} disagree")]
    DuplicateConflict {
        origin: String,
        destination: String,
        date: NaiveDate,
        values: Vec<u64>,
    },

    #[error("integrity violation: {0}")]
    Integrity(String),

    #[error("aggregation precondition violated: {0}")]
    Precondition(String),

    #[error("Stata file error: {0}")]
    Stata(String),
}

pub type Result<T> = std::result::Result<T, PipelineError>;
