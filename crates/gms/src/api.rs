//! HTTP RPC surface for the GMS service.
//!
//! Endpoints:
//! - `POST /rpc/current_round` - round snapshot, optionally with one user's bets
//! - `POST /rpc/record_bet` - aggregate a bet into the current round
//! - `GET /health` - health check

use crate::coordinator::RoundCoordinator;
use axum::{
    extract::State,
    http::HeaderMap,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use protocol::rpc::{CurrentRoundRequest, RecordBetRequest, RpcAck, REQUEST_ID_HEADER};
use serde_json::json;
use services::GmsApi;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tracing::{error, info_span, Instrument};

/// Shared application state.
pub struct AppState {
    pub coordinator: Arc<RoundCoordinator>,
}

/// Create the RPC router.
pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/rpc/current_round", post(current_round_handler))
        .route("/rpc/record_bet", post(record_bet_handler))
        .route("/health", get(health_handler))
        .with_state(state)
        .layer(CorsLayer::permissive())
}

fn request_id(headers: &HeaderMap) -> String {
    headers
        .get(REQUEST_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("-")
        .to_string()
}

async fn health_handler() -> impl IntoResponse {
    Json(json!({"status": "ok"}))
}

async fn current_round_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(req): Json<CurrentRoundRequest>,
) -> impl IntoResponse {
    let span = info_span!("rpc_current_round", request_id = %request_id(&headers));
    async move {
        match state.coordinator.current_round(req.user_id).await {
            Ok(snapshot) => Json(json!({"error_code": 0, "round": snapshot})),
            Err(e) => {
                error!(error = %e, "current_round failed");
                Json(json!({
                    "error_code": i32::from(e.code()),
                    "error": e.to_string(),
                }))
            }
        }
    }
    .instrument(span)
    .await
}

async fn record_bet_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(req): Json<RecordBetRequest>,
) -> impl IntoResponse {
    let span = info_span!(
        "rpc_record_bet",
        request_id = %request_id(&headers),
        user_id = req.user_id,
    );
    async move {
        match state
            .coordinator
            .record_bet(&req.round_id, req.user_id, req.amount)
            .await
        {
            Ok(()) => Json(RpcAck::ok()),
            Err(e) => Json(RpcAck::err(e.code(), e.to_string())),
        }
    }
    .instrument(span)
    .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use protocol::ErrorCode;

    #[test]
    fn test_ack_error_shape() {
        let ack = RpcAck::err(ErrorCode::RoundMismatch, "stale round");
        let v = serde_json::to_value(&ack).unwrap();
        assert_eq!(v["error_code"], 6);
        assert_eq!(v["error"], "stale round");
    }
}
