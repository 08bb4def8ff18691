//! Persistent round aggregate rows.

use crate::error::{Error, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use protocol::Color;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Mutex;

/// Status of a round aggregate row.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RoundStatus {
    InProgress,
    Ended,
}

/// One row of the `game_rounds` table, keyed by `round_id`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GameRound {
    pub round_id: String,
    pub game_code: String,
    pub status: RoundStatus,
    pub total_bets: i64,
    pub total_players: i64,
    pub total_bet_amount: i64,
    pub result: Option<Color>,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
}

impl GameRound {
    /// Fresh in-progress row created at ROUND_STARTED.
    pub fn started(round_id: &str, game_code: &str) -> Self {
        Self {
            round_id: round_id.to_string(),
            game_code: game_code.to_string(),
            status: RoundStatus::InProgress,
            total_bets: 0,
            total_players: 0,
            total_bet_amount: 0,
            result: None,
            start_time: Utc::now(),
            end_time: None,
        }
    }
}

/// Round aggregate store.
#[async_trait]
pub trait GameRoundRepository: Send + Sync {
    async fn create(&self, round: GameRound) -> Result<()>;

    /// Finalize a round: status ENDED, winning color, end time, totals.
    async fn update_result(
        &self,
        round_id: &str,
        result: Color,
        end_time: DateTime<Utc>,
        total_bets: i64,
        total_players: i64,
        total_bet_amount: i64,
    ) -> Result<()>;

    async fn get(&self, round_id: &str) -> Result<Option<GameRound>>;
}

/// In-memory reference implementation.
pub struct MemoryGameRoundRepository {
    rounds: Mutex<HashMap<String, GameRound>>,
}

impl MemoryGameRoundRepository {
    pub fn new() -> Self {
        Self {
            rounds: Mutex::new(HashMap::new()),
        }
    }
}

impl Default for MemoryGameRoundRepository {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl GameRoundRepository for MemoryGameRoundRepository {
    async fn create(&self, round: GameRound) -> Result<()> {
        let mut rounds = self.rounds.lock().expect("round map poisoned");
        rounds.insert(round.round_id.clone(), round);
        Ok(())
    }

    async fn update_result(
        &self,
        round_id: &str,
        result: Color,
        end_time: DateTime<Utc>,
        total_bets: i64,
        total_players: i64,
        total_bet_amount: i64,
    ) -> Result<()> {
        let mut rounds = self.rounds.lock().expect("round map poisoned");
        let round = rounds
            .get_mut(round_id)
            .ok_or_else(|| Error::RoundNotFound(round_id.to_string()))?;
        round.status = RoundStatus::Ended;
        round.result = Some(result);
        round.end_time = Some(end_time);
        round.total_bets = total_bets;
        round.total_players = total_players;
        round.total_bet_amount = total_bet_amount;
        Ok(())
    }

    async fn get(&self, round_id: &str) -> Result<Option<GameRound>> {
        let rounds = self.rounds.lock().expect("round map poisoned");
        Ok(rounds.get(round_id).cloned())
    }
}
