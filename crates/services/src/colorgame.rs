//! Contracts between the color game's own services.

use crate::error::Result;
use async_trait::async_trait;
use protocol::{Color, PlayerBet, RoundSnapshot};

/// Round coordinator operations the player engine depends on.
#[async_trait]
pub trait GmsApi: Send + Sync {
    /// Snapshot of the current round. With a user id, the snapshot carries
    /// that user's accumulated bets. `round_id` is empty when no round is
    /// active.
    async fn current_round(&self, user_id: Option<i64>) -> Result<RoundSnapshot>;

    /// Record one bet in the round aggregates. `BettingClosed` outside the
    /// betting window, `RoundMismatch` for a stale round id. This is the
    /// authoritative bet gate.
    async fn record_bet(&self, round_id: &str, user_id: i64, amount: i64) -> Result<()>;
}

/// Player engine operations the gateway routes client commands to.
#[async_trait]
pub trait GsApi: Send + Sync {
    /// Place (or top up) a bet. Returns the bet id.
    async fn place_bet(&self, user_id: i64, color: Color, amount: i64) -> Result<String>;

    /// Current round merged with the user's own bets.
    async fn get_state(&self, user_id: i64) -> Result<RoundSnapshot>;
}

/// Receives the round outcome from the coordinator. Implementations must
/// return promptly; settlement runs detached.
#[async_trait]
pub trait RoundResultReceiver: Send + Sync {
    async fn round_result(&self, round_id: &str, winning_color: Color) -> Result<()>;
}

/// Per-user bet lookup the coordinator delegates to when a snapshot is
/// requested with a user id.
#[async_trait]
pub trait PlayerBetLookup: Send + Sync {
    async fn user_bets(&self, round_id: &str, user_id: i64) -> Result<Vec<PlayerBet>>;
}
