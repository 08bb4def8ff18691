//! Per-round bet storage with a settlement-queue primitive.
//!
//! Two implementations share one contract: the in-memory store below for
//! single-process deployments and tests, and the Redis store in
//! [`crate::redis_repo`] for the mesh.

use crate::domain::Bet;
use crate::error::{Error, Result};
use async_trait::async_trait;
use protocol::Color;
use std::collections::HashMap;
use std::sync::Mutex;

/// Bet store contract.
///
/// `save_bet` feeds both a lookup index and the settlement queue;
/// `get_bets_for_settlement` drains the queue in batches until empty.
#[async_trait]
pub trait BetRepository: Send + Sync {
    async fn save_bet(&self, bet: &Bet) -> Result<()>;

    async fn get_user_bets(&self, round_id: &str, user_id: i64) -> Result<Vec<Bet>>;

    async fn get_user_bet(
        &self,
        round_id: &str,
        user_id: i64,
        color: Color,
    ) -> Result<Option<Bet>>;

    /// Add `delta` to an existing bet's amount in place, preserving the
    /// bet id. Atomic with respect to concurrent readers. Returns the
    /// updated bet.
    async fn update_bet_amount(&self, bet: &Bet, delta: i64) -> Result<Bet>;

    /// Pop a non-empty batch from the settlement queue, or an empty vec
    /// once the queue is drained.
    async fn get_bets_for_settlement(&self, round_id: &str) -> Result<Vec<Bet>>;

    /// Remove all state for a round. Idempotent.
    async fn clear_bets(&self, round_id: &str) -> Result<()>;
}

#[derive(Default)]
struct RoundBets {
    /// bet_id → bet
    bets: HashMap<String, Bet>,
    /// (user_id, color) → bet_id, for O(1) merge of repeat placements
    user_index: HashMap<(i64, Color), String>,
    /// Settlement queue of bet ids
    queue: Vec<String>,
}

/// In-memory bet store: one lock, history and queue per round.
pub struct MemoryBetRepository {
    rounds: Mutex<HashMap<String, RoundBets>>,
}

impl MemoryBetRepository {
    pub fn new() -> Self {
        Self {
            rounds: Mutex::new(HashMap::new()),
        }
    }
}

impl Default for MemoryBetRepository {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl BetRepository for MemoryBetRepository {
    async fn save_bet(&self, bet: &Bet) -> Result<()> {
        let mut rounds = self.rounds.lock().expect("bet store poisoned");
        let round = rounds.entry(bet.round_id.clone()).or_default();
        round.bets.insert(bet.bet_id.clone(), bet.clone());
        round
            .user_index
            .insert((bet.user_id, bet.color), bet.bet_id.clone());
        round.queue.push(bet.bet_id.clone());
        Ok(())
    }

    async fn get_user_bets(&self, round_id: &str, user_id: i64) -> Result<Vec<Bet>> {
        let rounds = self.rounds.lock().expect("bet store poisoned");
        let Some(round) = rounds.get(round_id) else {
            return Ok(Vec::new());
        };
        Ok(round
            .bets
            .values()
            .filter(|bet| bet.user_id == user_id)
            .cloned()
            .collect())
    }

    async fn get_user_bet(
        &self,
        round_id: &str,
        user_id: i64,
        color: Color,
    ) -> Result<Option<Bet>> {
        let rounds = self.rounds.lock().expect("bet store poisoned");
        let Some(round) = rounds.get(round_id) else {
            return Ok(None);
        };
        Ok(round
            .user_index
            .get(&(user_id, color))
            .and_then(|bet_id| round.bets.get(bet_id))
            .cloned())
    }

    async fn update_bet_amount(&self, bet: &Bet, delta: i64) -> Result<Bet> {
        let mut rounds = self.rounds.lock().expect("bet store poisoned");
        let round = rounds
            .get_mut(&bet.round_id)
            .ok_or_else(|| Error::BetNotFound(bet.bet_id.clone()))?;
        let stored = round
            .bets
            .get_mut(&bet.bet_id)
            .ok_or_else(|| Error::BetNotFound(bet.bet_id.clone()))?;
        stored.amount += delta;
        Ok(stored.clone())
    }

    async fn get_bets_for_settlement(&self, round_id: &str) -> Result<Vec<Bet>> {
        let mut rounds = self.rounds.lock().expect("bet store poisoned");
        let Some(round) = rounds.get_mut(round_id) else {
            return Ok(Vec::new());
        };
        // Pop the whole queue in one batch
        let ids: Vec<String> = round.queue.drain(..).collect();
        Ok(ids
            .iter()
            .filter_map(|id| round.bets.get(id))
            .cloned()
            .collect())
    }

    async fn clear_bets(&self, round_id: &str) -> Result<()> {
        let mut rounds = self.rounds.lock().expect("bet store poisoned");
        rounds.remove(round_id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::BetIdGenerator;

    fn make_bet(gen: &BetIdGenerator, round: &str, user: i64, color: Color, amount: i64) -> Bet {
        Bet::new(gen.next_id(), round, user, color, amount)
    }

    #[tokio::test]
    async fn test_save_and_lookup() {
        let repo = MemoryBetRepository::new();
        let gen = BetIdGenerator::new(1).unwrap();

        let bet = make_bet(&gen, "r1", 1001, Color::Red, 100);
        repo.save_bet(&bet).await.unwrap();

        let found = repo.get_user_bet("r1", 1001, Color::Red).await.unwrap().unwrap();
        assert_eq!(found.bet_id, bet.bet_id);
        assert_eq!(found.amount, 100);

        assert!(repo.get_user_bet("r1", 1001, Color::Blue).await.unwrap().is_none());
        assert!(repo.get_user_bet("r2", 1001, Color::Red).await.unwrap().is_none());

        let bets = repo.get_user_bets("r1", 1001).await.unwrap();
        assert_eq!(bets.len(), 1);
    }

    #[tokio::test]
    async fn test_update_preserves_bet_id_and_is_visible_to_queue() {
        let repo = MemoryBetRepository::new();
        let gen = BetIdGenerator::new(1).unwrap();

        let bet = make_bet(&gen, "r1", 1001, Color::Red, 100);
        repo.save_bet(&bet).await.unwrap();
        let updated = repo.update_bet_amount(&bet, 50).await.unwrap();
        assert_eq!(updated.bet_id, bet.bet_id);
        assert_eq!(updated.amount, 150);

        // The settlement drain sees the merged amount
        let drained = repo.get_bets_for_settlement("r1").await.unwrap();
        assert_eq!(drained.len(), 1);
        assert_eq!(drained[0].amount, 150);
    }

    #[tokio::test]
    async fn test_settlement_drain_empties_queue_but_keeps_history() {
        let repo = MemoryBetRepository::new();
        let gen = BetIdGenerator::new(1).unwrap();

        repo.save_bet(&make_bet(&gen, "r1", 1001, Color::Red, 100)).await.unwrap();
        repo.save_bet(&make_bet(&gen, "r1", 1002, Color::Green, 200)).await.unwrap();

        let first = repo.get_bets_for_settlement("r1").await.unwrap();
        assert_eq!(first.len(), 2);
        let second = repo.get_bets_for_settlement("r1").await.unwrap();
        assert!(second.is_empty());

        // History still answers until the round is cleared
        assert_eq!(repo.get_user_bets("r1", 1001).await.unwrap().len(), 1);

        repo.clear_bets("r1").await.unwrap();
        assert!(repo.get_user_bets("r1", 1001).await.unwrap().is_empty());

        // Clearing again is a no-op
        repo.clear_bets("r1").await.unwrap();
    }
}
