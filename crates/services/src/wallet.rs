//! Wallet accounting contract and a reference in-memory ledger.

use crate::error::{Error, Result};
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::Mutex;
use tracing::debug;

/// Player balance operations.
///
/// Credits are idempotent by transaction id: replaying an `add_balance`
/// with a tx id already applied is a no-op that returns the current
/// balance. Debits treat the tx id as an audit reason only, so repeated
/// bets within one round each deduct.
#[async_trait]
pub trait WalletService: Send + Sync {
    /// Deduct a bet stake. Tx id is derived as `bet:{user}:{round}`.
    async fn place_bet(&self, user_id: i64, amount: i64, round_id: &str) -> Result<i64>;

    /// Deduct an arbitrary amount. Returns the new balance.
    async fn deduct_balance(&self, user_id: i64, amount: i64, tx_id: &str) -> Result<i64>;

    /// Credit an amount, at most once per tx id. Returns the new balance.
    async fn add_balance(&self, user_id: i64, amount: i64, tx_id: &str) -> Result<i64>;
}

#[derive(Default)]
struct Ledger {
    balances: HashMap<i64, i64>,
    applied_credits: HashSet<String>,
}

/// In-memory wallet for the monolith deployment and tests.
pub struct MockWalletService {
    ledger: Mutex<Ledger>,
}

impl MockWalletService {
    pub fn new() -> Self {
        Self {
            ledger: Mutex::new(Ledger::default()),
        }
    }

    /// Seed a user's balance.
    pub fn set_balance(&self, user_id: i64, balance: i64) {
        let mut ledger = self.ledger.lock().expect("wallet ledger poisoned");
        ledger.balances.insert(user_id, balance);
    }

    /// Current balance, zero for unknown users.
    pub fn balance(&self, user_id: i64) -> i64 {
        let ledger = self.ledger.lock().expect("wallet ledger poisoned");
        ledger.balances.get(&user_id).copied().unwrap_or(0)
    }
}

impl Default for MockWalletService {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl WalletService for MockWalletService {
    async fn place_bet(&self, user_id: i64, amount: i64, round_id: &str) -> Result<i64> {
        self.deduct_balance(user_id, amount, &format!("bet:{}:{}", user_id, round_id))
            .await
    }

    async fn deduct_balance(&self, user_id: i64, amount: i64, tx_id: &str) -> Result<i64> {
        let mut ledger = self.ledger.lock().expect("wallet ledger poisoned");
        let balance = ledger.balances.entry(user_id).or_insert(0);
        if *balance < amount {
            return Err(Error::InsufficientFunds);
        }
        *balance -= amount;
        let new_balance = *balance;
        debug!(user_id, amount, tx_id, new_balance, "wallet debit");
        Ok(new_balance)
    }

    async fn add_balance(&self, user_id: i64, amount: i64, tx_id: &str) -> Result<i64> {
        let mut ledger = self.ledger.lock().expect("wallet ledger poisoned");
        if !ledger.applied_credits.insert(tx_id.to_string()) {
            // Replay of an already-applied credit
            let balance = ledger.balances.get(&user_id).copied().unwrap_or(0);
            debug!(user_id, tx_id, "wallet credit replayed, ignoring");
            return Ok(balance);
        }
        let balance = ledger.balances.entry(user_id).or_insert(0);
        *balance += amount;
        let new_balance = *balance;
        debug!(user_id, amount, tx_id, new_balance, "wallet credit");
        Ok(new_balance)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_debit_and_credit() {
        let wallet = MockWalletService::new();
        wallet.set_balance(1001, 2000);

        let balance = wallet.place_bet(1001, 100, "r1").await.unwrap();
        assert_eq!(balance, 1900);

        let balance = wallet.add_balance(1001, 200, "win-a").await.unwrap();
        assert_eq!(balance, 2100);
    }

    #[tokio::test]
    async fn test_insufficient_funds() {
        let wallet = MockWalletService::new();
        wallet.set_balance(7, 50);
        let err = wallet.place_bet(7, 100, "r1").await.unwrap_err();
        assert!(matches!(err, Error::InsufficientFunds));
        assert_eq!(wallet.balance(7), 50);
    }

    #[tokio::test]
    async fn test_credits_are_idempotent_by_tx_id() {
        let wallet = MockWalletService::new();
        wallet.set_balance(9, 0);

        assert_eq!(wallet.add_balance(9, 300, "bet-55").await.unwrap(), 300);
        // Replay with the same tx id does not double-credit
        assert_eq!(wallet.add_balance(9, 300, "bet-55").await.unwrap(), 300);
        // Different tx id applies
        assert_eq!(wallet.add_balance(9, 300, "bet-56").await.unwrap(), 600);
    }

    #[tokio::test]
    async fn test_repeated_bets_each_deduct() {
        let wallet = MockWalletService::new();
        wallet.set_balance(1001, 2000);
        wallet.place_bet(1001, 100, "r1").await.unwrap();
        let balance = wallet.place_bet(1001, 50, "r1").await.unwrap();
        assert_eq!(balance, 1850);
    }
}
