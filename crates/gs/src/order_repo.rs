//! Bet order audit trail.

use crate::domain::BetOrder;
use crate::error::Result;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Mutex;

/// Store for settled order rows. `batch_create` commits each batch as one
/// transaction; settlement aborts on failure rather than leaving a round
/// half-settled.
#[async_trait]
pub trait BetOrderRepository: Send + Sync {
    async fn batch_create(&self, orders: &[BetOrder]) -> Result<()>;

    async fn get_by_round(&self, round_id: &str) -> Result<Vec<BetOrder>>;

    async fn get_by_user(&self, user_id: i64) -> Result<Vec<BetOrder>>;
}

/// In-memory reference implementation, keyed by order id.
pub struct MemoryBetOrderRepository {
    orders: Mutex<HashMap<String, BetOrder>>,
}

impl MemoryBetOrderRepository {
    pub fn new() -> Self {
        Self {
            orders: Mutex::new(HashMap::new()),
        }
    }
}

impl Default for MemoryBetOrderRepository {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl BetOrderRepository for MemoryBetOrderRepository {
    async fn batch_create(&self, orders: &[BetOrder]) -> Result<()> {
        let mut stored = self.orders.lock().expect("order store poisoned");
        for order in orders {
            stored.insert(order.order_id.clone(), order.clone());
        }
        Ok(())
    }

    async fn get_by_round(&self, round_id: &str) -> Result<Vec<BetOrder>> {
        let stored = self.orders.lock().expect("order store poisoned");
        Ok(stored
            .values()
            .filter(|order| order.round_id == round_id)
            .cloned()
            .collect())
    }

    async fn get_by_user(&self, user_id: i64) -> Result<Vec<BetOrder>> {
        let stored = self.orders.lock().expect("order store poisoned");
        Ok(stored
            .values()
            .filter(|order| order.user_id == user_id)
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::BetOrderStatus;
    use chrono::Utc;

    fn make_order(order_id: &str, user_id: i64, round_id: &str, payout: i64) -> BetOrder {
        BetOrder {
            order_id: order_id.to_string(),
            user_id,
            round_id: round_id.to_string(),
            game_code: "color_game".to_string(),
            bet_area: "red".to_string(),
            amount: 100,
            payout,
            status: BetOrderStatus::Settled,
            created_at: Utc::now(),
            settled_at: Some(Utc::now()),
        }
    }

    #[tokio::test]
    async fn test_batch_create_and_query() {
        let repo = MemoryBetOrderRepository::new();
        repo.batch_create(&[
            make_order("o1", 1001, "r1", 200),
            make_order("o2", 1002, "r1", 0),
            make_order("o3", 1001, "r2", 0),
        ])
        .await
        .unwrap();

        assert_eq!(repo.get_by_round("r1").await.unwrap().len(), 2);
        assert_eq!(repo.get_by_user(1001).await.unwrap().len(), 2);
        assert!(repo.get_by_round("r9").await.unwrap().is_empty());
    }
}
