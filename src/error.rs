//! Error types for granary

use thiserror::Error;

#[derive(Error, Debug)]
pub enum GranaryError {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Insufficient funds: needed {needed}, available {available}")]
    InsufficientFunds { needed: String, available: String },

    #[error("Database error: {0}")]
    Database(String),

    #[error("Duplicate batch: {0}")]
    IdempotencyConflict(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<rusqlite::Error> for GranaryError {
    fn from(e: rusqlite::Error) -> Self {
        GranaryError::Database(e.to_string())
    }
}

impl GranaryError {
    /// Whether the coordinator retry policy applies to this error.
    ///
    /// Validation, not-found and funds failures are deterministic and
    /// abort immediately; only storage failures are worth re-driving.
    pub fn is_retryable(&self) -> bool {
        matches!(self, GranaryError::Database(_) | GranaryError::Internal(_))
    }
}

pub type Result<T> = std::result::Result<T, GranaryError>;
