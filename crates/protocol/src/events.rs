//! Server-initiated broadcast frames and the event tagging scheme.

use crate::envelope::EventEnvelope;
use crate::types::{Color, GameState};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

/// An event that can travel inside an [`EventEnvelope`].
///
/// `TYPE_URL` identifies the payload across service boundaries; `COMMAND`
/// is the client-facing frame command the gateway rehydrates it into.
pub trait BroadcastEvent: Serialize + DeserializeOwned {
    const TYPE_URL: &'static str;
    const COMMAND: &'static str;
}

/// Round lifecycle broadcast, pushed to every connected client on each
/// state transition.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RoundStateBrc {
    pub round_id: String,
    pub state: GameState,
    pub betting_end_timestamp: i64,
    pub left_time: i64,
}

impl BroadcastEvent for RoundStateBrc {
    const TYPE_URL: &'static str = "colorgame/RoundStateBRC";
    const COMMAND: &'static str = crate::CMD_ROUND_STATE_BRC;
}

/// Settlement notification.
///
/// Bettors receive a personal frame carrying their `bet_id`, then everyone
/// receives one final broadcast frame with an empty `bet_id`. Clients
/// deduplicate on `bet_id` presence.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SettlementBrc {
    pub round_id: String,
    pub winning_color: Color,
    /// Empty on the aggregate broadcast frame.
    pub bet_id: String,
    /// Lowercase color text; empty when `bet_id` is empty.
    pub bet_color: String,
    pub bet_amount: i64,
    pub win_amount: i64,
    pub is_winner: bool,
}

impl SettlementBrc {
    /// The aggregate frame broadcast to every client (including non-bettors)
    /// once a round has fully settled.
    pub fn broadcast(round_id: &str, winning_color: Color) -> Self {
        Self {
            round_id: round_id.to_string(),
            winning_color,
            bet_id: String::new(),
            bet_color: String::new(),
            bet_amount: 0,
            win_amount: 0,
            is_winner: false,
        }
    }
}

impl BroadcastEvent for SettlementBrc {
    const TYPE_URL: &'static str = "colorgame/SettlementBRC";
    const COMMAND: &'static str = crate::CMD_SETTLEMENT_BRC;
}

/// Map a type URL back to the client frame command it renders as.
pub fn command_for_type_url(type_url: &str) -> Option<&'static str> {
    match type_url {
        RoundStateBrc::TYPE_URL => Some(RoundStateBrc::COMMAND),
        SettlementBrc::TYPE_URL => Some(SettlementBrc::COMMAND),
        _ => None,
    }
}

impl EventEnvelope {
    /// The client frame command for this envelope, if the type is known.
    pub fn command(&self) -> Option<&'static str> {
        command_for_type_url(&self.type_url)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_settlement_broadcast_frame_is_anonymous() {
        let brc = SettlementBrc::broadcast("20250101120000", Color::Red);
        assert_eq!(brc.bet_id, "");
        assert_eq!(brc.bet_color, "");
        assert!(!brc.is_winner);
        assert_eq!(brc.win_amount, 0);
    }

    #[test]
    fn test_command_lookup() {
        assert_eq!(
            command_for_type_url(RoundStateBrc::TYPE_URL),
            Some("ColorGameRoundStateBRC")
        );
        assert_eq!(
            command_for_type_url(SettlementBrc::TYPE_URL),
            Some("ColorGameSettlementBRC")
        );
        assert_eq!(command_for_type_url("colorgame/Nope"), None);
    }
}
