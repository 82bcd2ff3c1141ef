//! Error types for page load timing reconciliation

use thiserror::Error;

/// Errors that can occur while reading, reconciling or computing timings
#[derive(Debug, Error)]
pub enum TimingsError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid JSON: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("CSV error: {0}")]
    CsvError(#[from] csv::Error),

    #[error("Invalid hex payload: {0}")]
    HexError(#[from] hex::FromHexError),

    #[error("Invalid pattern: {0}")]
    RegexError(#[from] regex::Error),

    #[error("Missing required field: {0}")]
    MissingField(String),

    #[error("Missing timing {field} for {url}, but there was a reply")]
    MissingTiming { field: String, url: String },

    #[error("Date parse error: {0}")]
    DateParseError(String),

    #[error("Invalid HTTP status code {0}")]
    InvalidStatus(i32),

    #[error("Malformed record: {0}")]
    MalformedRecord(String),

    #[error("External tool failed: {0}")]
    ExternalTool(String),
}
