//! Cross-service error type.

use protocol::ErrorCode;
use thiserror::Error;

/// Error crossing a service boundary. Each variant maps onto exactly one
/// wire [`ErrorCode`] so adapters translate losslessly in both directions.
#[derive(Debug, Clone, Error)]
pub enum Error {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("invalid bet option: {0}")]
    InvalidBetOption(String),

    #[error("unauthorized")]
    Unauthorized,

    #[error("invalid credentials")]
    InvalidCredentials,

    #[error("betting closed")]
    BettingClosed,

    #[error("round mismatch: {0}")]
    RoundMismatch(String),

    #[error("insufficient funds")]
    InsufficientFunds,

    #[error("wallet error: {0}")]
    Wallet(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl Error {
    /// The wire code for this error.
    pub fn code(&self) -> ErrorCode {
        match self {
            Error::InvalidArgument(_) => ErrorCode::InvalidArgument,
            Error::InvalidBetOption(_) => ErrorCode::InvalidBetOption,
            Error::Unauthorized => ErrorCode::Unauthorized,
            Error::InvalidCredentials => ErrorCode::InvalidCredentials,
            Error::BettingClosed => ErrorCode::BettingClosed,
            Error::RoundMismatch(_) => ErrorCode::RoundMismatch,
            Error::InsufficientFunds => ErrorCode::InsufficientFunds,
            Error::Wallet(_) => ErrorCode::WalletError,
            Error::Internal(_) => ErrorCode::InternalError,
        }
    }

    /// Rebuild an error from a wire code + message. Returns `None` for
    /// [`ErrorCode::Success`].
    pub fn from_code(code: ErrorCode, message: &str) -> Option<Self> {
        match code {
            ErrorCode::Success => None,
            ErrorCode::InvalidArgument => Some(Error::InvalidArgument(message.to_string())),
            ErrorCode::InvalidBetOption => Some(Error::InvalidBetOption(message.to_string())),
            ErrorCode::Unauthorized => Some(Error::Unauthorized),
            ErrorCode::InvalidCredentials => Some(Error::InvalidCredentials),
            ErrorCode::BettingClosed => Some(Error::BettingClosed),
            ErrorCode::RoundMismatch => Some(Error::RoundMismatch(message.to_string())),
            ErrorCode::InsufficientFunds => Some(Error::InsufficientFunds),
            ErrorCode::WalletError => Some(Error::Wallet(message.to_string())),
            ErrorCode::InternalError => Some(Error::Internal(message.to_string())),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_code_mapping_is_lossless() {
        let errors = [
            Error::InvalidArgument("x".into()),
            Error::InvalidBetOption("x".into()),
            Error::Unauthorized,
            Error::InvalidCredentials,
            Error::BettingClosed,
            Error::RoundMismatch("x".into()),
            Error::InsufficientFunds,
            Error::Wallet("x".into()),
            Error::Internal("x".into()),
        ];
        for err in errors {
            let code = err.code();
            let back = Error::from_code(code, "x").unwrap();
            assert_eq!(back.code(), code);
        }
        assert!(Error::from_code(ErrorCode::Success, "").is_none());
    }
}
