//! The player engine: bet intake and round settlement.

use crate::bet_repo::BetRepository;
use crate::domain::{Bet, BetIdGenerator, BetOrder, BetOrderStatus};
use crate::order_repo::BetOrderRepository;
use async_trait::async_trait;
use chrono::Utc;
use metrics::counter;
use protocol::{Color, EventEnvelope, PlayerBet, RoundSnapshot, SettlementBrc, GAME_CODE};
use services::{
    Error, GatewayBroadcaster, GmsApi, GsApi, PlayerBetLookup, Result, RoundResultReceiver,
    WalletService,
};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info, warn};

/// Orders persisted per database transaction during settlement.
const SETTLEMENT_BATCH_SIZE: usize = 500;

/// Every bet and every payout flows through here.
///
/// Cheap to clone; all state lives behind `Arc`s so settlement can run on
/// a detached task that outlives the request that triggered it.
#[derive(Clone)]
pub struct PlayerEngine {
    bet_repo: Arc<dyn BetRepository>,
    order_repo: Arc<dyn BetOrderRepository>,
    gms: Arc<dyn GmsApi>,
    wallet: Arc<dyn WalletService>,
    broadcaster: Arc<dyn GatewayBroadcaster>,
    ids: Arc<BetIdGenerator>,
}

impl PlayerEngine {
    pub fn new(
        bet_repo: Arc<dyn BetRepository>,
        order_repo: Arc<dyn BetOrderRepository>,
        gms: Arc<dyn GmsApi>,
        wallet: Arc<dyn WalletService>,
        broadcaster: Arc<dyn GatewayBroadcaster>,
        ids: Arc<BetIdGenerator>,
    ) -> Self {
        Self {
            bet_repo,
            order_repo,
            gms,
            wallet,
            broadcaster,
            ids,
        }
    }

    fn internal(e: crate::error::Error) -> Error {
        Error::Internal(e.to_string())
    }

    /// Place (or top up) a bet. The GMS gate is authoritative: the engine
    /// never decides locally whether betting is open.
    pub async fn place_bet(&self, user_id: i64, color: Color, amount: i64) -> Result<Bet> {
        info!(user_id, color = %color, amount, "place bet requested");

        // 1. Validate against the current round
        let snapshot = self.gms.current_round(None).await?;
        if snapshot.round_id.is_empty() {
            return Err(Error::InvalidArgument("no active round".to_string()));
        }
        if amount <= 0 {
            return Err(Error::InvalidArgument(format!(
                "amount must be positive, got {}",
                amount
            )));
        }
        let round_id = snapshot.round_id;

        // 2. Deduct the stake before any bet state exists
        self.wallet.place_bet(user_id, amount, &round_id).await?;
        debug!(user_id, amount, round_id = %round_id, "stake deducted");

        // 3. Record with the coordinator; compensate the debit on rejection
        if let Err(gms_err) = self.gms.record_bet(&round_id, user_id, amount).await {
            let reason = format!("rollback:{}:{}", round_id, user_id);
            match self.wallet.add_balance(user_id, amount, &reason).await {
                Ok(_) => {
                    info!(user_id, amount, round_id = %round_id, "stake refunded after gms rejection")
                }
                Err(comp_err) => {
                    // Never silently discard: this line is the input to
                    // offline reconciliation.
                    counter!("gs_reconciliation_events_total").increment(1);
                    error!(
                        user_id,
                        amount,
                        round_id = %round_id,
                        gms_error = %gms_err,
                        compensation_error = %comp_err,
                        "compensation credit failed, manual reconciliation required"
                    );
                }
            }
            return Err(gms_err);
        }

        // 4. Merge into an existing bet on the same color, or create one
        let existing = self
            .bet_repo
            .get_user_bet(&round_id, user_id, color)
            .await
            .map_err(Self::internal)?;

        let bet = match existing {
            Some(existing) => {
                let updated = self
                    .bet_repo
                    .update_bet_amount(&existing, amount)
                    .await
                    .map_err(Self::internal)?;
                info!(
                    user_id,
                    bet_id = %updated.bet_id,
                    total_amount = updated.amount,
                    "bet amount accumulated"
                );
                updated
            }
            None => {
                let bet = Bet::new(self.ids.next_id(), &round_id, user_id, color, amount);
                self.bet_repo.save_bet(&bet).await.map_err(Self::internal)?;
                info!(user_id, bet_id = %bet.bet_id, "bet saved");
                bet
            }
        };

        counter!("gs_bets_placed_total").increment(1);
        Ok(bet)
    }

    /// Current round merged with the user's accumulated bets.
    pub async fn current_state(&self, user_id: i64) -> Result<RoundSnapshot> {
        let mut snapshot = self.gms.current_round(None).await?;
        if snapshot.round_id.is_empty() {
            return Ok(snapshot);
        }
        match self.bet_repo.get_user_bets(&snapshot.round_id, user_id).await {
            Ok(bets) => {
                snapshot.player_bets = bets
                    .into_iter()
                    .map(|bet| PlayerBet {
                        color: bet.color,
                        amount: bet.amount,
                    })
                    .collect();
            }
            Err(e) => {
                // The state response still serves without the bet list
                warn!(user_id, round_id = %snapshot.round_id, error = %e, "user bet lookup failed");
            }
        }
        Ok(snapshot)
    }

    /// Settle a finished round: drain the queue, persist order batches,
    /// credit winners, notify bettors, then broadcast the round outcome.
    ///
    /// The persistence batch commits before any wallet credit and before
    /// any notification, making `bet_orders` the system of record a
    /// reconciler can replay from.
    pub async fn settle_round(&self, round_id: &str, winning_color: Color) -> Result<()> {
        let started = Instant::now();
        info!(round_id, winning_color = %winning_color, "starting settlement");

        let mut total_bets = 0usize;
        let mut win_count = 0usize;
        let mut total_payout = 0i64;
        let mut batch_number = 0usize;

        loop {
            let bets = self
                .bet_repo
                .get_bets_for_settlement(round_id)
                .await
                .map_err(Self::internal)?;
            if bets.is_empty() {
                break;
            }

            for chunk in bets.chunks(SETTLEMENT_BATCH_SIZE) {
                batch_number += 1;
                self.process_batch(round_id, winning_color, chunk, batch_number)
                    .await?;
                total_bets += chunk.len();
                for bet in chunk {
                    if bet.color == winning_color {
                        win_count += 1;
                        total_payout += bet.amount * 2;
                    }
                }
            }
        }

        // Clearing is explicit for the memory store and idempotent for Redis
        if let Err(e) = self.bet_repo.clear_bets(round_id).await {
            warn!(round_id, error = %e, "failed to clear round bets");
        }

        info!(
            round_id,
            winning_color = %winning_color,
            total_bets,
            batches = batch_number,
            win_count,
            lose_count = total_bets - win_count,
            total_payout,
            duration_ms = started.elapsed().as_millis() as u64,
            "settlement completed"
        );
        counter!("gs_rounds_settled_total").increment(1);

        // Bettors already got a personal frame; this single broadcast frame
        // (empty bet_id) closes the round for non-bettors. Clients dedupe on
        // bet_id presence.
        let brc = SettlementBrc::broadcast(round_id, winning_color);
        match EventEnvelope::pack(&brc) {
            Ok(envelope) => self.broadcaster.broadcast(GAME_CODE, envelope).await,
            Err(e) => error!(round_id, error = %e, "failed to pack settlement broadcast"),
        }

        Ok(())
    }

    async fn process_batch(
        &self,
        round_id: &str,
        winning_color: Color,
        bets: &[Bet],
        batch_number: usize,
    ) -> Result<()> {
        let now = Utc::now();
        let orders: Vec<BetOrder> = bets
            .iter()
            .map(|bet| {
                let payout = if bet.color == winning_color {
                    bet.amount * 2
                } else {
                    0
                };
                BetOrder {
                    order_id: bet.bet_id.clone(),
                    user_id: bet.user_id,
                    round_id: round_id.to_string(),
                    game_code: GAME_CODE.to_string(),
                    bet_area: bet.color.as_str().to_string(),
                    amount: bet.amount,
                    payout,
                    status: BetOrderStatus::Settled,
                    created_at: bet.time,
                    settled_at: Some(now),
                }
            })
            .collect();

        // 1. Persist the batch. A failure aborts the whole settlement so
        // the round is never half-settled at the database level.
        if let Err(e) = self.order_repo.batch_create(&orders).await {
            error!(
                round_id,
                batch = batch_number,
                count = orders.len(),
                error = %e,
                "failed to persist bet order batch"
            );
            return Err(Error::Internal(format!(
                "failed to persist bet orders batch {}: {}",
                batch_number, e
            )));
        }
        debug!(round_id, batch = batch_number, count = orders.len(), "order batch persisted");

        // 2. Credit winners and notify, per bet
        for (bet, order) in bets.iter().zip(&orders) {
            let mut should_notify = true;

            if order.payout > 0 {
                // Idempotency key carries the bet id: a replayed settlement
                // cannot double-credit
                let tx_id = format!("win:{}:{}", round_id, bet.bet_id);
                if let Err(e) = self
                    .wallet
                    .add_balance(bet.user_id, order.payout, &tx_id)
                    .await
                {
                    counter!("gs_reconciliation_events_total").increment(1);
                    error!(
                        user_id = bet.user_id,
                        bet_id = %bet.bet_id,
                        win_amount = order.payout,
                        error = %e,
                        "failed to deposit winnings, player will NOT be notified"
                    );
                    should_notify = false;
                }
            }

            if should_notify {
                let brc = SettlementBrc {
                    round_id: round_id.to_string(),
                    winning_color,
                    bet_id: bet.bet_id.clone(),
                    bet_color: bet.color.as_str().to_string(),
                    bet_amount: bet.amount,
                    win_amount: order.payout,
                    is_winner: order.payout > 0,
                };
                match EventEnvelope::pack(&brc) {
                    Ok(envelope) => {
                        self.broadcaster
                            .send_to_user(bet.user_id, GAME_CODE, envelope)
                            .await
                    }
                    Err(e) => {
                        error!(bet_id = %bet.bet_id, error = %e, "failed to pack settlement frame")
                    }
                }
            }
        }

        Ok(())
    }
}

#[async_trait]
impl GsApi for PlayerEngine {
    async fn place_bet(&self, user_id: i64, color: Color, amount: i64) -> Result<String> {
        self.place_bet(user_id, color, amount)
            .await
            .map(|bet| bet.bet_id)
    }

    async fn get_state(&self, user_id: i64) -> Result<RoundSnapshot> {
        self.current_state(user_id).await
    }
}

#[async_trait]
impl RoundResultReceiver for PlayerEngine {
    /// Fire-and-forget settlement trigger: acknowledge immediately and run
    /// the drain loop on a detached task, so a GMS shutdown cannot abort
    /// an in-flight settlement.
    async fn round_result(&self, round_id: &str, winning_color: Color) -> Result<()> {
        let engine = self.clone();
        let round_id = round_id.to_string();
        tokio::spawn(async move {
            if let Err(e) = engine.settle_round(&round_id, winning_color).await {
                error!(round_id = %round_id, error = %e, "settlement failed");
            }
        });
        Ok(())
    }
}

#[async_trait]
impl PlayerBetLookup for PlayerEngine {
    async fn user_bets(&self, round_id: &str, user_id: i64) -> Result<Vec<PlayerBet>> {
        let bets = self
            .bet_repo
            .get_user_bets(round_id, user_id)
            .await
            .map_err(Self::internal)?;
        Ok(bets
            .into_iter()
            .map(|bet| PlayerBet {
                color: bet.color,
                amount: bet.amount,
            })
            .collect())
    }
}
