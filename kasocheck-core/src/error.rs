//! Error types for kasocheck-core

use thiserror::Error;

/// Main error type for the kasocheck-core library
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

    /// Storage failure not covered by a more specific variant
    #[error("storage error: {0}")]
    Storage(String),

    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// Stored or imported timestamp could not be parsed
    #[error("invalid timestamp: {0}")]
    Timestamp(String),

    /// History fetch from the external message source failed
    #[error("history fetch failed for channel {scope_id}: {message}")]
    Source { scope_id: String, message: String },
}

/// Result type alias for kasocheck-core
pub type Result<T> = std::result::Result<T, Error>;
