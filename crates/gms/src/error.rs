//! GMS error types.

use thiserror::Error;

/// Round coordinator errors.
#[derive(Debug, Error)]
pub enum Error {
    /// Round row missing on update.
    #[error("round not found: {0}")]
    RoundNotFound(String),

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Internal error.
    #[error("internal error: {0}")]
    Internal(String),
}

/// Result type for GMS operations.
pub type Result<T> = std::result::Result<T, Error>;
