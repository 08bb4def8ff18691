//! Round coordinator: aggregates bets per round, persists outcomes, and
//! bridges machine events into the gateway broadcast and the player engine.

use crate::machine::{EventSubscriber, RoundEvent, StateMachine};
use crate::repository::{GameRound, GameRoundRepository};
use async_trait::async_trait;
use chrono::Utc;
use metrics::counter;
use protocol::{EventEnvelope, GameState, RoundSnapshot, RoundStateBrc, GAME_CODE};
use services::{Error, GatewayBroadcaster, GmsApi, PlayerBetLookup, Result, RoundResultReceiver};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, RwLock};
use tracing::{error, info, warn};

#[derive(Default)]
struct RoundStats {
    bets: i64,
    players: HashSet<i64>,
    amount: i64,
}

/// Owns the per-round aggregates and reacts to machine lifecycle events.
///
/// The GS result receiver is injected after construction to break the
/// GMS → GS → Gateway → GMS broadcast cycle.
pub struct RoundCoordinator {
    machine: Arc<StateMachine>,
    stats: RwLock<HashMap<String, RoundStats>>,
    broadcaster: Arc<dyn GatewayBroadcaster>,
    round_repo: Arc<dyn GameRoundRepository>,
    result_receiver: RwLock<Option<Arc<dyn RoundResultReceiver>>>,
    bet_lookup: RwLock<Option<Arc<dyn PlayerBetLookup>>>,
}

impl RoundCoordinator {
    pub fn new(
        machine: Arc<StateMachine>,
        broadcaster: Arc<dyn GatewayBroadcaster>,
        round_repo: Arc<dyn GameRoundRepository>,
    ) -> Arc<Self> {
        Arc::new(Self {
            machine,
            stats: RwLock::new(HashMap::new()),
            broadcaster,
            round_repo,
            result_receiver: RwLock::new(None),
            bet_lookup: RwLock::new(None),
        })
    }

    /// Inject the player engine's result receiver (post-construction).
    pub fn set_result_receiver(&self, receiver: Arc<dyn RoundResultReceiver>) {
        *self
            .result_receiver
            .write()
            .expect("result receiver poisoned") = Some(receiver);
    }

    /// Inject the per-user bet lookup used to enrich snapshots.
    pub fn set_bet_lookup(&self, lookup: Arc<dyn PlayerBetLookup>) {
        *self.bet_lookup.write().expect("bet lookup poisoned") = Some(lookup);
    }

    fn totals(&self, round_id: &str) -> (i64, i64, i64) {
        let stats = self.stats.read().expect("round stats poisoned");
        stats
            .get(round_id)
            .map(|s| (s.bets, s.players.len() as i64, s.amount))
            .unwrap_or((0, 0, 0))
    }

    async fn handle_result(&self, event: &RoundEvent) {
        let Some(color) = event.result else {
            error!(round_id = %event.round_id, "RESULT event without a drawn color");
            return;
        };

        let (total_bets, total_players, total_amount) = self.totals(&event.round_id);
        if let Err(e) = self
            .round_repo
            .update_result(
                &event.round_id,
                color,
                Utc::now(),
                total_bets,
                total_players,
                total_amount,
            )
            .await
        {
            error!(round_id = %event.round_id, error = %e, "failed to finalize round row");
        }

        self.stats
            .write()
            .expect("round stats poisoned")
            .remove(&event.round_id);

        info!(
            round_id = %event.round_id,
            result = %color,
            total_bets,
            total_players,
            total_amount,
            "round finalized"
        );

        // Settlement trigger is fire-and-forget on a detached task: a
        // coordinator shutdown must not abort an in-flight settlement.
        let receiver = {
            self.result_receiver
                .read()
                .expect("result receiver poisoned")
                .clone()
        };
        if let Some(receiver) = receiver {
            let round_id = event.round_id.clone();
            tokio::spawn(async move {
                if let Err(e) = receiver.round_result(&round_id, color).await {
                    error!(round_id = %round_id, error = %e, "round result delivery failed");
                }
            });
        }
    }
}

#[async_trait]
impl EventSubscriber for RoundCoordinator {
    async fn on_round_event(&self, event: RoundEvent) {
        // Every state event becomes a gateway broadcast frame.
        let brc = RoundStateBrc {
            round_id: event.round_id.clone(),
            state: event.state,
            betting_end_timestamp: event.betting_end_timestamp,
            left_time: event.left_time,
        };
        match EventEnvelope::pack(&brc) {
            Ok(envelope) => self.broadcaster.broadcast(GAME_CODE, envelope).await,
            Err(e) => error!(error = %e, "failed to pack round state broadcast"),
        }

        match event.state {
            GameState::RoundStarted => {
                if let Err(e) = self
                    .round_repo
                    .create(GameRound::started(&event.round_id, GAME_CODE))
                    .await
                {
                    error!(round_id = %event.round_id, error = %e, "failed to create round row");
                }
            }
            GameState::Result => self.handle_result(&event).await,
            _ => {}
        }
    }
}

#[async_trait]
impl GmsApi for RoundCoordinator {
    async fn current_round(&self, user_id: Option<i64>) -> Result<RoundSnapshot> {
        let Some(view) = self.machine.current_round() else {
            return Ok(RoundSnapshot::idle());
        };

        let mut snapshot = RoundSnapshot {
            round_id: view.round_id.clone(),
            state: view.state,
            betting_end_timestamp: view.betting_end.map(|end| end.timestamp()).unwrap_or(0),
            left_time: view.left_time,
            player_bets: Vec::new(),
        };

        if let Some(user_id) = user_id {
            let lookup = { self.bet_lookup.read().expect("bet lookup poisoned").clone() };
            if let Some(lookup) = lookup {
                match lookup.user_bets(&view.round_id, user_id).await {
                    Ok(bets) => snapshot.player_bets = bets,
                    Err(e) => {
                        // Snapshot still serves without the user's bets.
                        warn!(user_id, round_id = %view.round_id, error = %e, "user bet lookup failed");
                    }
                }
            }
        }

        Ok(snapshot)
    }

    async fn record_bet(&self, round_id: &str, user_id: i64, amount: i64) -> Result<()> {
        if !self.machine.can_accept_bet() {
            warn!(round_id, user_id, "bet rejected, betting closed");
            return Err(Error::BettingClosed);
        }

        let current = self
            .machine
            .current_round()
            .ok_or(Error::BettingClosed)?;
        if current.round_id != round_id {
            warn!(
                round_id,
                current_round_id = %current.round_id,
                user_id,
                "bet rejected, round mismatch"
            );
            return Err(Error::RoundMismatch(format!(
                "bet for round {} but current round is {}",
                round_id, current.round_id
            )));
        }

        let total = {
            let mut stats = self.stats.write().expect("round stats poisoned");
            let entry = stats.entry(round_id.to_string()).or_default();
            entry.bets += 1;
            entry.players.insert(user_id);
            entry.amount += amount;
            entry.bets
        };

        counter!("gms_bets_recorded_total").increment(1);
        info!(round_id, user_id, amount, total_bets = total, "bet recorded");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::machine::MachineConfig;
    use crate::repository::{MemoryGameRoundRepository, RoundStatus};
    use protocol::Color;
    use std::sync::Mutex;
    use std::time::Duration;

    struct NullBroadcaster {
        broadcasts: Mutex<Vec<EventEnvelope>>,
    }

    impl NullBroadcaster {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                broadcasts: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl GatewayBroadcaster for NullBroadcaster {
        async fn broadcast(&self, _game_code: &str, event: EventEnvelope) {
            self.broadcasts.lock().unwrap().push(event);
        }

        async fn send_to_user(&self, _user_id: i64, _game_code: &str, _event: EventEnvelope) {}
    }

    fn fast_machine() -> Arc<StateMachine> {
        Arc::new(StateMachine::with_seed(
            MachineConfig {
                wait: Duration::from_millis(30),
                betting: Duration::from_millis(150),
                drawing: Duration::from_millis(30),
                result: Duration::from_millis(30),
                rest: Duration::from_millis(30),
            },
            5,
        ))
    }

    #[tokio::test]
    async fn test_record_bet_rejected_when_idle() {
        let machine = fast_machine();
        let coordinator = RoundCoordinator::new(
            machine,
            NullBroadcaster::new(),
            Arc::new(MemoryGameRoundRepository::new()),
        );
        let err = coordinator.record_bet("r1", 1001, 100).await.unwrap_err();
        assert!(matches!(err, Error::BettingClosed));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_record_bet_aggregates_during_betting() {
        let machine = fast_machine();
        let repo = Arc::new(MemoryGameRoundRepository::new());
        let coordinator =
            RoundCoordinator::new(machine.clone(), NullBroadcaster::new(), repo.clone());
        machine.subscribe(coordinator.clone());

        let runner = machine.clone();
        let handle = tokio::spawn(async move { runner.run().await });

        // Land inside the betting window
        tokio::time::sleep(Duration::from_millis(70)).await;
        let round_id = machine.current_round().unwrap().round_id;

        coordinator.record_bet(&round_id, 1001, 100).await.unwrap();
        coordinator.record_bet(&round_id, 1001, 50).await.unwrap();
        coordinator.record_bet(&round_id, 1002, 200).await.unwrap();

        // Stale round id is rejected
        let err = coordinator
            .record_bet("19990101000000", 1003, 10)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::RoundMismatch(_)));

        let (bets, players, amount) = coordinator.totals(&round_id);
        assert_eq!((bets, players, amount), (3, 2, 350));

        // Wait for RESULT to finalize the row
        tokio::time::sleep(Duration::from_millis(250)).await;
        machine.stop();
        handle.await.unwrap();

        let row = repo.get(&round_id).await.unwrap().unwrap();
        assert_eq!(row.status, RoundStatus::Ended);
        assert_eq!(row.total_bets, 3);
        assert_eq!(row.total_players, 2);
        assert_eq!(row.total_bet_amount, 350);
        assert!(row.result.is_some());

        // Aggregates for the finished round were dropped
        let (bets, _, _) = coordinator.totals(&round_id);
        assert_eq!(bets, 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_result_triggers_receiver_and_broadcasts_states() {
        struct Receiver {
            seen: Mutex<Vec<(String, Color)>>,
        }

        #[async_trait]
        impl RoundResultReceiver for Receiver {
            async fn round_result(&self, round_id: &str, winning_color: Color) -> Result<()> {
                self.seen
                    .lock()
                    .unwrap()
                    .push((round_id.to_string(), winning_color));
                Ok(())
            }
        }

        let machine = fast_machine();
        let broadcaster = NullBroadcaster::new();
        let coordinator = RoundCoordinator::new(
            machine.clone(),
            broadcaster.clone(),
            Arc::new(MemoryGameRoundRepository::new()),
        );
        let receiver = Arc::new(Receiver {
            seen: Mutex::new(Vec::new()),
        });
        coordinator.set_result_receiver(receiver.clone());
        machine.subscribe(coordinator.clone());

        let runner = machine.clone();
        let handle = tokio::spawn(async move { runner.run().await });
        tokio::time::sleep(Duration::from_millis(320)).await;
        machine.stop();
        handle.await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert_eq!(receiver.seen.lock().unwrap().len(), 1);

        // Every lifecycle event was broadcast as a RoundStateBrc
        let broadcasts = broadcaster.broadcasts.lock().unwrap();
        assert!(broadcasts.len() >= 5);
        assert!(broadcasts
            .iter()
            .all(|e| e.type_url == "colorgame/RoundStateBRC"));
    }
}
