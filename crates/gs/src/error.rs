//! GS error types.

use thiserror::Error;

/// Player engine and repository errors.
#[derive(Debug, Error)]
pub enum Error {
    /// Redis error from the distributed bet store.
    #[error("redis error: {0}")]
    Redis(#[from] redis::RedisError),

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Bet id not present in the store.
    #[error("bet not found: {0}")]
    BetNotFound(String),

    /// Node id outside the 10-bit range.
    #[error("invalid node id {0}, must be < 1024")]
    InvalidNodeId(u16),

    /// Internal error.
    #[error("internal error: {0}")]
    Internal(String),
}

/// Result type for GS operations.
pub type Result<T> = std::result::Result<T, Error>;
