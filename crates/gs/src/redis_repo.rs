//! Redis-backed bet store for multi-instance deployments.
//!
//! Key schema, all entries expiring after [`BET_TTL`] so an abandoned
//! round cleans itself up:
//! - `bet_data:{round}` - hash of bet_id → bet JSON
//! - `user_index:{round}:{user}` - hash of color → bet_id
//! - `settlement_queue:{round}:{shard}` - list of bet ids, sharded by
//!   `user_id % SHARD_COUNT` so parallel writers spread out

use crate::bet_repo::BetRepository;
use crate::domain::Bet;
use crate::error::Result;
use async_trait::async_trait;
use protocol::Color;
use rand::Rng;
use redis::AsyncCommands;
use std::sync::Arc;
use std::time::Duration;

/// Settlement queue shard count.
pub const SHARD_COUNT: i64 = 16;

/// Retention for all per-round keys. Long enough to survive an abandoned
/// round.
pub const BET_TTL: Duration = Duration::from_secs(24 * 60 * 60);

/// Bet ids popped from one shard per drain call.
const DRAIN_BATCH: usize = 100;

fn data_key(round_id: &str) -> String {
    format!("bet_data:{}", round_id)
}

fn index_key(round_id: &str, user_id: i64) -> String {
    format!("user_index:{}:{}", round_id, user_id)
}

fn queue_key(round_id: &str, shard: i64) -> String {
    format!("settlement_queue:{}:{}", round_id, shard)
}

/// Distributed bet store on Redis.
pub struct RedisBetRepository {
    client: Arc<redis::Client>,
    ttl: Duration,
}

impl RedisBetRepository {
    pub fn new(redis_url: &str) -> Result<Self> {
        let client = redis::Client::open(redis_url)?;
        Ok(Self {
            client: Arc::new(client),
            ttl: BET_TTL,
        })
    }

    async fn connection(&self) -> Result<redis::aio::MultiplexedConnection> {
        Ok(self.client.get_multiplexed_async_connection().await?)
    }

    async fn bets_by_ids(
        &self,
        conn: &mut redis::aio::MultiplexedConnection,
        round_id: &str,
        bet_ids: &[String],
    ) -> Result<Vec<Bet>> {
        if bet_ids.is_empty() {
            return Ok(Vec::new());
        }
        let data: Vec<Option<String>> = redis::cmd("HMGET")
            .arg(data_key(round_id))
            .arg(bet_ids)
            .query_async(conn)
            .await?;
        let mut bets = Vec::with_capacity(data.len());
        for json in data.into_iter().flatten() {
            match serde_json::from_str::<Bet>(&json) {
                Ok(bet) => bets.push(bet),
                // A corrupt entry loses one bet, not the whole drain
                Err(_) => continue,
            }
        }
        Ok(bets)
    }
}

#[async_trait]
impl BetRepository for RedisBetRepository {
    async fn save_bet(&self, bet: &Bet) -> Result<()> {
        let mut conn = self.connection().await?;
        let json = serde_json::to_string(bet)?;
        let ttl = self.ttl.as_secs() as i64;
        let shard = bet.user_id % SHARD_COUNT;

        let mut pipe = redis::pipe();
        pipe.hset(data_key(&bet.round_id), &bet.bet_id, json)
            .expire(data_key(&bet.round_id), ttl)
            .rpush(queue_key(&bet.round_id, shard), &bet.bet_id)
            .expire(queue_key(&bet.round_id, shard), ttl)
            .hset(
                index_key(&bet.round_id, bet.user_id),
                bet.color.as_str(),
                &bet.bet_id,
            )
            .expire(index_key(&bet.round_id, bet.user_id), ttl);
        pipe.query_async::<()>(&mut conn).await?;
        Ok(())
    }

    async fn get_user_bets(&self, round_id: &str, user_id: i64) -> Result<Vec<Bet>> {
        let mut conn = self.connection().await?;
        let bet_ids: Vec<String> = conn.hvals(index_key(round_id, user_id)).await?;
        self.bets_by_ids(&mut conn, round_id, &bet_ids).await
    }

    async fn get_user_bet(
        &self,
        round_id: &str,
        user_id: i64,
        color: Color,
    ) -> Result<Option<Bet>> {
        let mut conn = self.connection().await?;
        let bet_id: Option<String> = conn
            .hget(index_key(round_id, user_id), color.as_str())
            .await?;
        let Some(bet_id) = bet_id else {
            return Ok(None);
        };
        let json: Option<String> = conn.hget(data_key(round_id), &bet_id).await?;
        match json {
            Some(json) => Ok(Some(serde_json::from_str(&json)?)),
            None => Ok(None),
        }
    }

    async fn update_bet_amount(&self, bet: &Bet, delta: i64) -> Result<Bet> {
        let mut updated = bet.clone();
        updated.amount += delta;
        let json = serde_json::to_string(&updated)?;

        let mut conn = self.connection().await?;
        // Single HSET keeps the entry atomic for concurrent readers
        conn.hset::<_, _, _, ()>(data_key(&bet.round_id), &bet.bet_id, json)
            .await?;
        Ok(updated)
    }

    async fn get_bets_for_settlement(&self, round_id: &str) -> Result<Vec<Bet>> {
        let mut conn = self.connection().await?;
        let start_shard = { rand::thread_rng().gen_range(0..SHARD_COUNT) };

        // Sample a random shard and fall through the rest so callers can
        // loop until every shard is empty.
        for i in 0..SHARD_COUNT {
            let shard = (start_shard + i) % SHARD_COUNT;
            let bet_ids: Option<Vec<String>> = redis::cmd("LPOP")
                .arg(queue_key(round_id, shard))
                .arg(DRAIN_BATCH)
                .query_async(&mut conn)
                .await?;
            let bet_ids = bet_ids.unwrap_or_default();
            if !bet_ids.is_empty() {
                return self.bets_by_ids(&mut conn, round_id, &bet_ids).await;
            }
        }

        Ok(Vec::new())
    }

    async fn clear_bets(&self, round_id: &str) -> Result<()> {
        let mut conn = self.connection().await?;
        let mut pipe = redis::pipe();
        pipe.del(data_key(round_id));
        for shard in 0..SHARD_COUNT {
            pipe.del(queue_key(round_id, shard));
        }
        // user_index keys are left to their TTL; deleting them all would
        // require a scan
        pipe.query_async::<()>(&mut conn).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_schema() {
        assert_eq!(data_key("20250101120000"), "bet_data:20250101120000");
        assert_eq!(
            index_key("20250101120000", 1001),
            "user_index:20250101120000:1001"
        );
        assert_eq!(
            queue_key("20250101120000", 3),
            "settlement_queue:20250101120000:3"
        );
    }

    #[test]
    fn test_shard_assignment_is_stable() {
        assert_eq!(1001 % SHARD_COUNT, 9);
        assert_eq!(1017 % SHARD_COUNT, 9);
        assert_eq!(1002 % SHARD_COUNT, 10);
    }
}
