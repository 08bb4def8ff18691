//! Core wire types shared by every service.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// A bettable color. One of the four round outcomes.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Color {
    Red,
    Green,
    Blue,
    Yellow,
}

impl Color {
    /// All four colors, in draw order.
    pub const ALL: [Color; 4] = [Color::Red, Color::Green, Color::Blue, Color::Yellow];

    /// The lowercase wire string for this color.
    pub fn as_str(&self) -> &'static str {
        match self {
            Color::Red => "red",
            Color::Green => "green",
            Color::Blue => "blue",
            Color::Yellow => "yellow",
        }
    }
}

impl fmt::Display for Color {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Color {
    type Err = UnknownColor;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "red" => Ok(Color::Red),
            "green" => Ok(Color::Green),
            "blue" => Ok(Color::Blue),
            "yellow" => Ok(Color::Yellow),
            other => Err(UnknownColor(other.to_string())),
        }
    }
}

/// Error returned when parsing a color string that is not one of the four
/// bettable colors.
#[derive(Debug, Clone, thiserror::Error)]
#[error("unknown color: {0}")]
pub struct UnknownColor(pub String);

/// Round lifecycle state as it appears on the wire.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum GameState {
    #[serde(rename = "GAME_STATE_ROUND_STARTED")]
    RoundStarted,
    #[serde(rename = "GAME_STATE_BETTING")]
    Betting,
    #[serde(rename = "GAME_STATE_DRAWING")]
    Drawing,
    #[serde(rename = "GAME_STATE_RESULT")]
    Result,
    #[serde(rename = "GAME_STATE_ROUND_ENDED")]
    RoundEnded,
    #[serde(rename = "GAME_STATE_STOPPED")]
    Stopped,
}

impl GameState {
    /// The wire string for this state.
    pub fn as_str(&self) -> &'static str {
        match self {
            GameState::RoundStarted => "GAME_STATE_ROUND_STARTED",
            GameState::Betting => "GAME_STATE_BETTING",
            GameState::Drawing => "GAME_STATE_DRAWING",
            GameState::Result => "GAME_STATE_RESULT",
            GameState::RoundEnded => "GAME_STATE_ROUND_ENDED",
            GameState::Stopped => "GAME_STATE_STOPPED",
        }
    }
}

impl fmt::Display for GameState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error taxonomy shared by every RPC and client response.
///
/// Code 0 is success; everything else is a typed failure. Serialized as a
/// bare number on the wire.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(into = "i32", try_from = "i32")]
pub enum ErrorCode {
    Success,
    InvalidArgument,
    InvalidBetOption,
    Unauthorized,
    InvalidCredentials,
    BettingClosed,
    RoundMismatch,
    InsufficientFunds,
    WalletError,
    InternalError,
}

impl From<ErrorCode> for i32 {
    fn from(code: ErrorCode) -> i32 {
        match code {
            ErrorCode::Success => 0,
            ErrorCode::InvalidArgument => 1,
            ErrorCode::InvalidBetOption => 2,
            ErrorCode::Unauthorized => 3,
            ErrorCode::InvalidCredentials => 4,
            ErrorCode::BettingClosed => 5,
            ErrorCode::RoundMismatch => 6,
            ErrorCode::InsufficientFunds => 7,
            ErrorCode::WalletError => 8,
            ErrorCode::InternalError => 9,
        }
    }
}

impl TryFrom<i32> for ErrorCode {
    type Error = String;

    fn try_from(value: i32) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(ErrorCode::Success),
            1 => Ok(ErrorCode::InvalidArgument),
            2 => Ok(ErrorCode::InvalidBetOption),
            3 => Ok(ErrorCode::Unauthorized),
            4 => Ok(ErrorCode::InvalidCredentials),
            5 => Ok(ErrorCode::BettingClosed),
            6 => Ok(ErrorCode::RoundMismatch),
            7 => Ok(ErrorCode::InsufficientFunds),
            8 => Ok(ErrorCode::WalletError),
            9 => Ok(ErrorCode::InternalError),
            other => Err(format!("unknown error code: {}", other)),
        }
    }
}

impl ErrorCode {
    /// Whether this code means success.
    pub fn is_success(&self) -> bool {
        matches!(self, ErrorCode::Success)
    }
}

/// One of a player's accumulated bets, as returned in state responses.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PlayerBet {
    pub color: Color,
    pub amount: i64,
}

/// Read-only snapshot of the current round.
///
/// `round_id` is empty when no round is active. `player_bets` is populated
/// only when the snapshot was requested for a specific user.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoundSnapshot {
    pub round_id: String,
    pub state: GameState,
    pub betting_end_timestamp: i64,
    pub left_time: i64,
    #[serde(default)]
    pub player_bets: Vec<PlayerBet>,
}

impl RoundSnapshot {
    /// Snapshot representing "no active round".
    pub fn idle() -> Self {
        Self {
            round_id: String::new(),
            state: GameState::Stopped,
            betting_end_timestamp: 0,
            left_time: 0,
            player_bets: Vec::new(),
        }
    }
}
