//! Internal fan-in API.
//!
//! The cluster broadcast client posts events here; the gateway rehydrates
//! them into client push frames and ships them through the hub. Unknown
//! event types are acknowledged with an error rather than forwarded blind.

use crate::ws_server::AppState;
use axum::{extract::State, Json};
use metrics::counter;
use protocol::rpc::{FanoutRequest, RpcAck};
use protocol::{ErrorCode, PushEnvelope};
use std::sync::Arc;
use tracing::{debug, warn};

/// `POST /internal/broadcast`
pub async fn broadcast_handler(
    State(state): State<Arc<AppState>>,
    Json(req): Json<FanoutRequest>,
) -> Json<RpcAck> {
    let Some(frame) = PushEnvelope::render(&req.game_code, &req.event) else {
        warn!(type_url = %req.event.type_url, "unknown broadcast event type");
        return Json(RpcAck::err(
            ErrorCode::InvalidArgument,
            format!("unknown event type: {}", req.event.type_url),
        ));
    };

    counter!("gateway_fanin_broadcasts_total").increment(1);
    debug!(type_url = %req.event.type_url, "broadcasting event");
    state.hub.broadcast(&frame).await;
    Json(RpcAck::ok())
}

/// `POST /internal/send_to_user`
pub async fn send_to_user_handler(
    State(state): State<Arc<AppState>>,
    Json(req): Json<FanoutRequest>,
) -> Json<RpcAck> {
    let Some(user_id) = req.user_id else {
        return Json(RpcAck::err(
            ErrorCode::InvalidArgument,
            "user_id is required",
        ));
    };

    let Some(frame) = PushEnvelope::render(&req.game_code, &req.event) else {
        warn!(type_url = %req.event.type_url, "unknown unicast event type");
        return Json(RpcAck::err(
            ErrorCode::InvalidArgument,
            format!("unknown event type: {}", req.event.type_url),
        ));
    };

    counter!("gateway_fanin_unicasts_total").increment(1);
    // The user may be connected to a sibling gateway; delivery here is
    // best effort and a miss is normal
    state.hub.send_to_user(user_id, frame).await;
    Json(RpcAck::ok())
}
