//! Command router: decodes client envelopes and dispatches to the player
//! engine.
//!
//! Every REQ frame gets a matching RSP frame, success or typed error; a
//! malformed frame never kills the connection.

use crate::error::Result;
use metrics::counter;
use protocol::{
    Color, ErrorCode, RequestEnvelope, ResponseEnvelope, CMD_GET_STATE_REQ, CMD_GET_STATE_RSP,
    CMD_PLACE_BET_REQ, CMD_PLACE_BET_RSP, GAME_CODE,
};
use serde::{Deserialize, Serialize};
use services::GsApi;
use std::sync::Arc;
use tracing::{debug, info_span, warn, Instrument};
use uuid::Uuid;

#[derive(Debug, Deserialize)]
struct PlaceBetPayload {
    color: String,
    amount: i64,
}

#[derive(Debug, Serialize)]
struct PlaceBetRspData {
    error_code: ErrorCode,
    bet_id: String,
    error: String,
}

/// Routes decoded envelopes to the game service.
pub struct CommandRouter {
    gs: Arc<dyn GsApi>,
}

impl CommandRouter {
    pub fn new(gs: Arc<dyn GsApi>) -> Arc<Self> {
        Arc::new(Self { gs })
    }

    /// Handle one inbound frame. The returned bytes go back to the sending
    /// user only.
    pub async fn handle_message(&self, user_id: i64, raw: &[u8]) -> Option<Vec<u8>> {
        let request_id = Uuid::new_v4();
        let span = info_span!("ws_message", user_id, request_id = %request_id);
        async move {
            counter!("gateway_messages_total").increment(1);

            let req: RequestEnvelope = match serde_json::from_slice(raw) {
                Ok(req) => req,
                Err(e) => {
                    warn!(error = %e, "malformed request envelope");
                    return error_frame(&format!("invalid message format: {}", e));
                }
            };

            if req.game != GAME_CODE {
                warn!(game = %req.game, "unknown game");
                return error_frame(&format!("unknown game: {}", req.game));
            }

            debug!(command = %req.command, "dispatching command");
            match req.command.as_str() {
                CMD_PLACE_BET_REQ => self.handle_place_bet(user_id, req.data).await,
                CMD_GET_STATE_REQ => self.handle_get_state(user_id).await,
                other => {
                    warn!(command = %other, "unknown command");
                    error_frame(&format!("unknown command for {}: {}", GAME_CODE, other))
                }
            }
        }
        .instrument(span)
        .await
    }

    async fn handle_place_bet(&self, user_id: i64, data: serde_json::Value) -> Option<Vec<u8>> {
        let payload: PlaceBetPayload = match serde_json::from_value(data) {
            Ok(payload) => payload,
            Err(e) => {
                return place_bet_rsp(
                    ErrorCode::InvalidArgument,
                    "",
                    &format!("invalid place_bet payload: {}", e),
                )
            }
        };

        // Color strings are validated at the edge; the engine only ever
        // sees one of the four colors.
        let color: Color = match payload.color.parse() {
            Ok(color) => color,
            Err(_) => {
                warn!(color = %payload.color, "invalid bet option");
                return place_bet_rsp(
                    ErrorCode::InvalidBetOption,
                    "",
                    &format!("invalid color: {}", payload.color),
                );
            }
        };

        match self.gs.place_bet(user_id, color, payload.amount).await {
            Ok(bet_id) => place_bet_rsp(ErrorCode::Success, &bet_id, ""),
            Err(e) => {
                warn!(error_code = ?e.code(), error = %e, "place bet failed");
                place_bet_rsp(e.code(), "", &e.to_string())
            }
        }
    }

    async fn handle_get_state(&self, user_id: i64) -> Option<Vec<u8>> {
        match self.gs.get_state(user_id).await {
            Ok(snapshot) => frame(CMD_GET_STATE_RSP, &snapshot).ok(),
            Err(e) => {
                warn!(error = %e, "get state failed");
                error_frame(&e.to_string())
            }
        }
    }
}

fn frame<T: Serialize>(command: &str, data: &T) -> Result<Vec<u8>> {
    Ok(ResponseEnvelope::new(GAME_CODE, command, data)?.to_bytes()?)
}

fn place_bet_rsp(error_code: ErrorCode, bet_id: &str, error: &str) -> Option<Vec<u8>> {
    frame(
        CMD_PLACE_BET_RSP,
        &PlaceBetRspData {
            error_code,
            bet_id: bet_id.to_string(),
            error: error.to_string(),
        },
    )
    .ok()
}

fn error_frame(message: &str) -> Option<Vec<u8>> {
    frame("error", &serde_json::json!({ "error": message })).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use protocol::{GameState, RoundSnapshot};
    use serde_json::Value;
    use services::Error;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct StubGs {
        calls: AtomicUsize,
        fail_with: Option<Error>,
    }

    impl StubGs {
        fn ok() -> Arc<Self> {
            Arc::new(Self {
                calls: AtomicUsize::new(0),
                fail_with: None,
            })
        }

        fn failing(err: Error) -> Arc<Self> {
            Arc::new(Self {
                calls: AtomicUsize::new(0),
                fail_with: Some(err),
            })
        }
    }

    #[async_trait]
    impl GsApi for StubGs {
        async fn place_bet(
            &self,
            _user_id: i64,
            _color: Color,
            _amount: i64,
        ) -> services::Result<String> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            match &self.fail_with {
                Some(err) => Err(err.clone()),
                None => Ok("554433".to_string()),
            }
        }

        async fn get_state(&self, _user_id: i64) -> services::Result<RoundSnapshot> {
            Ok(RoundSnapshot {
                round_id: "20250101120000".to_string(),
                state: GameState::Betting,
                betting_end_timestamp: 1735732810,
                left_time: 7,
                player_bets: Vec::new(),
            })
        }
    }

    async fn dispatch(router: &CommandRouter, raw: &str) -> Value {
        let bytes = router.handle_message(1001, raw.as_bytes()).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_place_bet_success_envelope() {
        let router = CommandRouter::new(StubGs::ok());
        let rsp = dispatch(
            &router,
            r#"{"game":"color_game","command":"ColorGamePlaceBetREQ","data":{"color":"red","amount":100}}"#,
        )
        .await;
        assert_eq!(rsp["game_code"], "color_game");
        assert_eq!(rsp["command"], "ColorGamePlaceBetRSP");
        assert_eq!(rsp["data"]["error_code"], 0);
        assert_eq!(rsp["data"]["bet_id"], "554433");
        assert_eq!(rsp["data"]["error"], "");
    }

    #[tokio::test]
    async fn test_invalid_color_never_reaches_engine() {
        let gs = StubGs::ok();
        let router = CommandRouter::new(gs.clone());
        let rsp = dispatch(
            &router,
            r#"{"game":"color_game","command":"ColorGamePlaceBetREQ","data":{"color":"purple","amount":100}}"#,
        )
        .await;
        assert_eq!(rsp["command"], "ColorGamePlaceBetRSP");
        assert_eq!(rsp["data"]["error_code"], 2);
        assert_eq!(rsp["data"]["bet_id"], "");
        // No wallet activity: the engine was never called
        assert_eq!(gs.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_engine_errors_map_to_typed_rsp() {
        let router = CommandRouter::new(StubGs::failing(Error::BettingClosed));
        let rsp = dispatch(
            &router,
            r#"{"game":"color_game","command":"ColorGamePlaceBetREQ","data":{"color":"red","amount":10}}"#,
        )
        .await;
        assert_eq!(rsp["data"]["error_code"], 5);
        assert_eq!(rsp["data"]["bet_id"], "");
    }

    #[tokio::test]
    async fn test_get_state_envelope() {
        let router = CommandRouter::new(StubGs::ok());
        let rsp = dispatch(
            &router,
            r#"{"game":"color_game","command":"ColorGameGetStateREQ","data":{}}"#,
        )
        .await;
        assert_eq!(rsp["command"], "ColorGameGetStateRSP");
        assert_eq!(rsp["data"]["round_id"], "20250101120000");
        assert_eq!(rsp["data"]["state"], "GAME_STATE_BETTING");
        assert_eq!(rsp["data"]["left_time"], 7);
    }

    #[tokio::test]
    async fn test_malformed_and_unknown_frames() {
        let router = CommandRouter::new(StubGs::ok());

        let rsp = dispatch(&router, "not json at all").await;
        assert_eq!(rsp["command"], "error");

        let rsp = dispatch(
            &router,
            r#"{"game":"poker","command":"ColorGamePlaceBetREQ","data":{}}"#,
        )
        .await;
        assert_eq!(rsp["command"], "error");

        let rsp = dispatch(
            &router,
            r#"{"game":"color_game","command":"ColorGameNopeREQ","data":{}}"#,
        )
        .await;
        assert_eq!(rsp["command"], "error");
    }
}
