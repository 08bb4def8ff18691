//! Shared wire contract for the color game services.
//!
//! Every service speaks the same JSON envelopes:
//! - client → gateway: `{"game", "command", "data"}`
//! - gateway → client: `{"game_code", "command", "data"}`
//! - service → service: typed RPC bodies plus a self-describing
//!   [`EventEnvelope`] for broadcast fan-out, so new event types can be
//!   added without touching the broadcast interface.

pub mod envelope;
pub mod events;
pub mod rpc;
pub mod types;

pub use envelope::{EventEnvelope, PushEnvelope, RequestEnvelope, ResponseEnvelope};
pub use events::{BroadcastEvent, RoundStateBrc, SettlementBrc};
pub use types::{Color, ErrorCode, GameState, PlayerBet, RoundSnapshot};

/// Game code used by the color game on every envelope.
pub const GAME_CODE: &str = "color_game";

/// Client commands.
pub const CMD_PLACE_BET_REQ: &str = "ColorGamePlaceBetREQ";
pub const CMD_PLACE_BET_RSP: &str = "ColorGamePlaceBetRSP";
pub const CMD_GET_STATE_REQ: &str = "ColorGameGetStateREQ";
pub const CMD_GET_STATE_RSP: &str = "ColorGameGetStateRSP";

/// Server-initiated frame commands.
pub const CMD_ROUND_STATE_BRC: &str = "ColorGameRoundStateBRC";
pub const CMD_SETTLEMENT_BRC: &str = "ColorGameSettlementBRC";
