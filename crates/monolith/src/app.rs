//! Single-process wiring of the whole engine.
//!
//! Construction order resolves the broadcast cycle: GMS gets the gateway
//! broadcaster only, GS gets the GMS handle plus the broadcaster, and GS
//! is injected into GMS as the result receiver afterwards.

use gateway::{AppState, CommandRouter, Hub, LocalBroadcaster};
use gms::{MachineConfig, MemoryGameRoundRepository, RoundCoordinator, StateMachine};
use gs::{BetIdGenerator, MemoryBetOrderRepository, MemoryBetRepository, PlayerEngine};
use services::{AuthService, MockAuthService, MockWalletService};
use std::sync::Arc;

/// Everything one process needs to run the color game.
pub struct App {
    pub hub: Arc<Hub>,
    pub machine: Arc<StateMachine>,
    pub coordinator: Arc<RoundCoordinator>,
    pub engine: PlayerEngine,
    pub router: Arc<CommandRouter>,
    pub auth: Arc<MockAuthService>,
    pub wallet: Arc<MockWalletService>,
}

impl App {
    /// Wire all components in-process.
    pub fn build(machine_config: MachineConfig, node_id: u16) -> App {
        let hub = Hub::new();
        let broadcaster = LocalBroadcaster::new(hub.clone());

        let machine = Arc::new(StateMachine::new(machine_config));
        let coordinator = RoundCoordinator::new(
            machine.clone(),
            broadcaster.clone(),
            Arc::new(MemoryGameRoundRepository::new()),
        );

        let wallet = Arc::new(MockWalletService::new());
        let engine = PlayerEngine::new(
            Arc::new(MemoryBetRepository::new()),
            Arc::new(MemoryBetOrderRepository::new()),
            coordinator.clone(),
            wallet.clone(),
            broadcaster,
            Arc::new(BetIdGenerator::new(node_id).expect("node id out of range")),
        );

        // Post-construction injection breaks the GMS → GS → Gateway → GMS
        // cycle
        coordinator.set_result_receiver(Arc::new(engine.clone()));
        coordinator.set_bet_lookup(Arc::new(engine.clone()));
        machine.subscribe(coordinator.clone());

        let router = CommandRouter::new(Arc::new(engine.clone()));
        let auth = Arc::new(MockAuthService::new());

        App {
            hub,
            machine,
            coordinator,
            engine,
            router,
            auth,
            wallet,
        }
    }

    /// The HTTP router serving `/ws`, `/health`, and the internal fan-in
    /// endpoints.
    pub fn http_router(&self) -> axum::Router {
        let auth: Arc<dyn AuthService> = self.auth.clone();
        gateway::create_router(Arc::new(AppState {
            hub: self.hub.clone(),
            router: self.router.clone(),
            auth,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gateway::Connection;
    use protocol::GameState;
    use serde_json::Value;
    use std::time::Duration;

    fn fast_config() -> MachineConfig {
        MachineConfig {
            wait: Duration::from_millis(100),
            betting: Duration::from_millis(600),
            drawing: Duration::from_millis(100),
            result: Duration::from_millis(100),
            rest: Duration::from_millis(200),
        }
    }

    fn parse_frames(frames: &[Vec<u8>]) -> Vec<Value> {
        frames
            .iter()
            .map(|f| serde_json::from_slice(f).unwrap())
            .collect()
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_full_round_with_bet_and_settlement() {
        let app = App::build(fast_config(), 1);
        app.wallet.set_balance(1001, 2000);

        // A connected client
        let (conn, mut rx) = Connection::channel(1001, app.hub.outbound_capacity());
        app.hub.register(conn);
        tokio::time::sleep(Duration::from_millis(30)).await;

        let machine = app.machine.clone();
        let machine_task = tokio::spawn(async move { machine.run().await });

        // Land inside the betting window and place a bet through the
        // client envelope path
        tokio::time::sleep(Duration::from_millis(300)).await;
        let rsp = app
            .router
            .handle_message(
                1001,
                br#"{"game":"color_game","command":"ColorGamePlaceBetREQ","data":{"color":"red","amount":100}}"#,
            )
            .await
            .unwrap();
        let rsp: Value = serde_json::from_slice(&rsp).unwrap();
        assert_eq!(rsp["data"]["error_code"], 0);
        let bet_id = rsp["data"]["bet_id"].as_str().unwrap().to_string();
        assert!(!bet_id.is_empty());
        assert_eq!(app.wallet.balance(1001), 1900);

        // State read merges the player's bet
        let state = app.engine.current_state(1001).await.unwrap();
        assert_eq!(state.state, GameState::Betting);
        assert_eq!(state.player_bets.len(), 1);
        assert_eq!(state.player_bets[0].amount, 100);

        // Wait through drawing + result: settlement runs detached
        tokio::time::sleep(Duration::from_millis(900)).await;
        app.machine.stop();
        let _ = machine_task.await;
        tokio::time::sleep(Duration::from_millis(100)).await;

        // Drain everything the client saw
        let mut frames = Vec::new();
        while let Ok(frame) = rx.try_recv() {
            frames.push(frame);
        }
        let frames = parse_frames(&frames);

        // Round state broadcasts arrived in timeline order
        let states: Vec<String> = frames
            .iter()
            .filter(|f| f["command"] == "ColorGameRoundStateBRC")
            .map(|f| f["data"]["state"].as_str().unwrap().to_string())
            .collect();
        assert!(states.contains(&"GAME_STATE_BETTING".to_string()));
        assert!(states.contains(&"GAME_STATE_RESULT".to_string()));
        let betting_pos = states.iter().position(|s| s == "GAME_STATE_BETTING").unwrap();
        let result_pos = states.iter().position(|s| s == "GAME_STATE_RESULT").unwrap();
        assert!(betting_pos < result_pos);

        // Settlement: one personal frame (our bet id), one broadcast frame
        let settlements: Vec<&Value> = frames
            .iter()
            .filter(|f| f["command"] == "ColorGameSettlementBRC")
            .collect();
        assert_eq!(settlements.len(), 2);
        let personal = settlements
            .iter()
            .find(|f| f["data"]["bet_id"] == bet_id.as_str())
            .expect("personal settlement frame");
        let broadcast = settlements
            .iter()
            .find(|f| f["data"]["bet_id"] == "")
            .expect("broadcast settlement frame");

        // Payout law ties the frame to the wallet
        let is_winner = personal["data"]["is_winner"].as_bool().unwrap();
        if is_winner {
            assert_eq!(personal["data"]["win_amount"], 200);
            assert_eq!(app.wallet.balance(1001), 2100);
        } else {
            assert_eq!(personal["data"]["win_amount"], 0);
            assert_eq!(app.wallet.balance(1001), 1900);
        }
        assert_eq!(
            personal["data"]["winning_color"],
            broadcast["data"]["winning_color"]
        );
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_bet_outside_betting_window_is_rejected() {
        let app = App::build(fast_config(), 1);
        app.wallet.set_balance(2000, 500);

        let machine = app.machine.clone();
        let machine_task = tokio::spawn(async move { machine.run().await });

        // During the ROUND_STARTED wait the gate is closed
        tokio::time::sleep(Duration::from_millis(30)).await;
        let rsp = app
            .router
            .handle_message(
                2000,
                br#"{"game":"color_game","command":"ColorGamePlaceBetREQ","data":{"color":"red","amount":10}}"#,
            )
            .await
            .unwrap();
        let rsp: Value = serde_json::from_slice(&rsp).unwrap();
        assert_eq!(rsp["data"]["error_code"], 5);
        // Net wallet effect is zero (debit was compensated)
        assert_eq!(app.wallet.balance(2000), 500);

        app.machine.stop();
        let _ = machine_task.await;
    }

    #[tokio::test]
    async fn test_dev_token_auth_round_trip() {
        let app = App::build(fast_config(), 1);
        app.auth.issue_token("tok-alice", 1001, "alice");

        let claims = app.auth.validate_token("tok-alice").await.unwrap();
        assert_eq!(claims.user_id, 1001);
        assert!(app.auth.validate_token("tok-bob").await.is_err());
    }
}
