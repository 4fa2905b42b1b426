//! Error types for history access
//!
//! Absence of data is never an error: backends return empty maps or `None`.

use thiserror::Error;

/// Result type alias for history operations
pub type HistoryResult<T> = std::result::Result<T, HistoryError>;

#[derive(Error, Debug)]
pub enum HistoryError {
    /// Missing or malformed configuration
    #[error("Configuration error: {0}")]
    Config(String),

    /// SQL statement failure
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Transport failure talking to the document store
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// The document store answered with an error body
    #[error("Document store error ({status}): {reason}")]
    Store { status: u16, reason: String },

    /// Unparseable document store response
    #[error("JSON parsing error: {0}")]
    Json(#[from] serde_json::Error),

    /// A backend partition exceeded its deadline
    #[error("Operation timed out: {0}")]
    Timeout(String),

    /// The request was cancelled before the backend answered
    #[error("Operation cancelled: {0}")]
    Cancelled(String),

    /// Caller supplied arguments that cannot be queried
    #[error("Invalid input: {0}")]
    InvalidInput(String),
}

impl HistoryError {
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    pub fn invalid_input(msg: impl Into<String>) -> Self {
        Self::InvalidInput(msg.into())
    }

    /// Transport-level failures worth retrying.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Http(e) => e.is_connect() || e.is_timeout(),
            Self::Store { status, .. } => *status == 429 || *status >= 500,
            _ => false,
        }
    }

    /// Short label used for metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Config(_) => "config",
            Self::Database(_) => "database",
            Self::Http(_) => "http",
            Self::Store { .. } => "store",
            Self::Json(_) => "json",
            Self::Timeout(_) => "timeout",
            Self::Cancelled(_) => "cancelled",
            Self::InvalidInput(_) => "invalid_input",
        }
    }
}
