//! Error types for netgauge-core

use thiserror::Error;

/// Main error type for the netgauge-core library
#[derive(Error, Debug)]
pub enum Error {
    /// Database error
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON parsing error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// Rejected request parameter (unknown sort key, period, metric focus)
    #[error("validation error: {0}")]
    Validation(String),

    /// Snapshot import error
    #[error("import error in {path}: {message}")]
    Ingest { path: String, message: String },

    /// Domain not found
    #[error("domain not found: {0}")]
    DomainNotFound(String),

    /// Report not found
    #[error("report not found: {0}")]
    ReportNotFound(String),
}

/// Result type alias for netgauge-core
pub type Result<T> = std::result::Result<T, Error>;
