//! Bet domain model and the bet id generator.

use crate::error::{Error, Result};
use chrono::{DateTime, Utc};
use protocol::Color;
use serde::{Deserialize, Serialize};
use std::sync::Mutex;

/// A player's bet on one color in one round.
///
/// At most one `Bet` exists per `(round_id, user_id, color)`; repeat
/// placements add to `amount` in place and keep the original `bet_id`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Bet {
    pub bet_id: String,
    pub round_id: String,
    pub user_id: i64,
    pub color: Color,
    pub amount: i64,
    pub time: DateTime<Utc>,
}

impl Bet {
    pub fn new(bet_id: String, round_id: &str, user_id: i64, color: Color, amount: i64) -> Self {
        Self {
            bet_id,
            round_id: round_id.to_string(),
            user_id,
            color,
            amount,
            time: Utc::now(),
        }
    }
}

/// Settlement status of a bet order row.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum BetOrderStatus {
    Pending,
    Settled,
}

/// One row of the immutable `bet_orders` audit trail, keyed by `order_id`
/// (= the bet id). Never mutated after insert.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BetOrder {
    pub order_id: String,
    pub user_id: i64,
    pub round_id: String,
    pub game_code: String,
    /// Bet area as text, e.g. `"red"`.
    pub bet_area: String,
    pub amount: i64,
    pub payout: i64,
    pub status: BetOrderStatus,
    pub created_at: DateTime<Utc>,
    pub settled_at: Option<DateTime<Utc>>,
}

// Custom epoch for bet ids: 2024-01-01T00:00:00Z.
const ID_EPOCH_MS: i64 = 1_704_067_200_000;
const NODE_MAX: u16 = 1 << 10;
const SEQ_MAX: u16 = 1 << 12;

struct GeneratorState {
    last_ms: i64,
    seq: u16,
}

/// Snowflake-style bet id generator: 41 bits of milliseconds, 10 bits of
/// node id, 12 bits of sequence.
///
/// Each service instance must run with a distinct node id to keep ids
/// globally unique; multi-instance deployments fail fast when the node id
/// is missing from configuration.
pub struct BetIdGenerator {
    node_id: u16,
    state: Mutex<GeneratorState>,
}

impl BetIdGenerator {
    pub fn new(node_id: u16) -> Result<Self> {
        if node_id >= NODE_MAX {
            return Err(Error::InvalidNodeId(node_id));
        }
        Ok(Self {
            node_id,
            state: Mutex::new(GeneratorState { last_ms: 0, seq: 0 }),
        })
    }

    /// Allocate the next globally unique bet id.
    pub fn next_id(&self) -> String {
        let mut state = self.state.lock().expect("id generator poisoned");
        let mut now = Utc::now().timestamp_millis() - ID_EPOCH_MS;
        if now == state.last_ms {
            state.seq += 1;
            if state.seq >= SEQ_MAX {
                // Sequence exhausted within one millisecond: wait it out
                while now <= state.last_ms {
                    now = Utc::now().timestamp_millis() - ID_EPOCH_MS;
                }
                state.last_ms = now;
                state.seq = 0;
            }
        } else {
            state.last_ms = now;
            state.seq = 0;
        }
        let id =
            ((state.last_ms as u64) << 22) | ((self.node_id as u64) << 12) | state.seq as u64;
        id.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_node_id_range() {
        assert!(BetIdGenerator::new(1023).is_ok());
        assert!(matches!(
            BetIdGenerator::new(1024),
            Err(Error::InvalidNodeId(1024))
        ));
    }

    #[test]
    fn test_ids_are_unique_and_increasing() {
        let gen = BetIdGenerator::new(1).unwrap();
        let mut seen = HashSet::new();
        let mut last: u64 = 0;
        for _ in 0..10_000 {
            let id: u64 = gen.next_id().parse().unwrap();
            assert!(seen.insert(id));
            assert!(id > last);
            last = id;
        }
    }

    #[test]
    fn test_distinct_nodes_never_collide() {
        let a = BetIdGenerator::new(1).unwrap();
        let b = BetIdGenerator::new(2).unwrap();
        let mut seen = HashSet::new();
        for _ in 0..1000 {
            assert!(seen.insert(a.next_id()));
            assert!(seen.insert(b.next_id()));
        }
    }
}
