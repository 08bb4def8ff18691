//! HTTP RPC surface for the GS service.
//!
//! Endpoints:
//! - `POST /rpc/place_bet` - bet intake
//! - `POST /rpc/get_state` - round snapshot merged with the user's bets
//! - `POST /rpc/round_result` - settlement trigger from GMS
//! - `GET /health` - health check

use crate::engine::PlayerEngine;
use axum::{
    extract::State,
    http::HeaderMap,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use protocol::rpc::{
    GetStateRequest, PlaceBetRequest, PlaceBetResponse, RoundResultRequest, RpcAck,
    REQUEST_ID_HEADER,
};
use protocol::ErrorCode;
use serde_json::json;
use services::RoundResultReceiver;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tracing::{error, info_span, Instrument};

/// Shared application state.
pub struct AppState {
    pub engine: PlayerEngine,
}

/// Create the RPC router.
pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/rpc/place_bet", post(place_bet_handler))
        .route("/rpc/get_state", post(get_state_handler))
        .route("/rpc/round_result", post(round_result_handler))
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

async fn place_bet_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(req): Json<PlaceBetRequest>,
) -> impl IntoResponse {
    let span = info_span!(
        "rpc_place_bet",
        request_id = %request_id(&headers),
        user_id = req.user_id,
    );
    async move {
        match state.engine.place_bet(req.user_id, req.color, req.amount).await {
            Ok(bet) => Json(PlaceBetResponse {
                error_code: ErrorCode::Success,
                bet_id: bet.bet_id,
                error: String::new(),
            }),
            Err(e) => Json(PlaceBetResponse {
                error_code: e.code(),
                bet_id: String::new(),
                error: e.to_string(),
            }),
        }
    }
    .instrument(span)
    .await
}

async fn get_state_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(req): Json<GetStateRequest>,
) -> impl IntoResponse {
    let span = info_span!(
        "rpc_get_state",
        request_id = %request_id(&headers),
        user_id = req.user_id,
    );
    async move {
        match state.engine.current_state(req.user_id).await {
            Ok(snapshot) => Json(json!({"error_code": 0, "round": snapshot})),
            Err(e) => {
                error!(error = %e, "get_state failed");
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

async fn round_result_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(req): Json<RoundResultRequest>,
) -> impl IntoResponse {
    let span = info_span!(
        "rpc_round_result",
        request_id = %request_id(&headers),
        round_id = %req.round_id,
    );
    async move {
        // Acknowledges immediately; settlement runs detached
        match state
            .engine
            .round_result(&req.round_id, req.winning_color)
            .await
        {
            Ok(()) => Json(RpcAck::ok()),
            Err(e) => Json(RpcAck::err(e.code(), e.to_string())),
        }
    }
    .instrument(span)
    .await
}
