//! WebSocket front door using Axum.
//!
//! `GET /ws?token=…` authenticates before upgrading, registers the
//! connection with the hub, then runs the read pump in-handler while a
//! spawned task runs the write pump.

use crate::hub::{
    CloseReason, Connection, Hub, PING_PERIOD, READ_DEADLINE, READ_LIMIT, WRITE_DEADLINE,
};
use crate::internal_api;
use crate::router::CommandRouter;
use axum::{
    extract::{
        ws::{Message, WebSocket},
        Query, State, WebSocketUpgrade,
    },
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use metrics::counter;
use serde::Deserialize;
use serde_json::json;
use services::AuthService;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::time::{interval_at, timeout, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

/// Shared application state.
pub struct AppState {
    pub hub: Arc<Hub>,
    pub router: Arc<CommandRouter>,
    pub auth: Arc<dyn AuthService>,
}

/// Create the gateway HTTP router: the public WebSocket endpoint plus the
/// internal fan-in API used by the cluster broadcast client.
pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/ws", get(ws_handler))
        .route("/health", get(health_handler))
        .route("/internal/broadcast", post(internal_api::broadcast_handler))
        .route(
            "/internal/send_to_user",
            post(internal_api::send_to_user_handler),
        )
        .with_state(state)
        .layer(tower_http::cors::CorsLayer::permissive())
}

async fn health_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(json!({
        "status": "ok",
        "connections": state.hub.connection_count(),
    }))
}

#[derive(Debug, Deserialize)]
struct WsParams {
    token: Option<String>,
}

/// WebSocket upgrade handler. Token validation happens before the upgrade;
/// a bad token gets a plain 401.
async fn ws_handler(
    ws: WebSocketUpgrade,
    Query(params): Query<WsParams>,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    let Some(token) = params.token else {
        warn!("websocket upgrade without token");
        return StatusCode::UNAUTHORIZED.into_response();
    };

    let claims = match state.auth.validate_token(&token).await {
        Ok(claims) => claims,
        Err(e) => {
            warn!(error = %e, "token validation failed");
            counter!("gateway_auth_failures_total").increment(1);
            return StatusCode::UNAUTHORIZED.into_response();
        }
    };

    info!(user_id = claims.user_id, username = %claims.username, "websocket authenticated");
    ws.max_message_size(READ_LIMIT)
        .on_upgrade(move |socket| handle_socket(socket, state, claims.user_id))
}

async fn handle_socket(socket: WebSocket, state: Arc<AppState>, user_id: i64) {
    let (ws_tx, ws_rx) = socket.split();

    let (conn, out_rx) = Connection::channel(user_id, state.hub.outbound_capacity());
    state.hub.register(conn.clone());
    info!(user_id, conn_id = %conn.conn_id(), "client connected");

    let write_conn = conn.clone();
    let write_task = tokio::spawn(write_pump(ws_tx, out_rx, write_conn));

    read_pump(ws_rx, &state, &conn).await;

    // The read side is done; tear down this exact connection
    state.hub.unregister(user_id, conn.conn_id());
    let _ = write_task.await;
    info!(user_id, conn_id = %conn.conn_id(), "client disconnected");
}

/// Read pump: enforces the idle deadline (any frame, pongs included,
/// refreshes it) and feeds complete messages to the command router.
async fn read_pump(mut ws_rx: SplitStream<WebSocket>, state: &Arc<AppState>, conn: &Connection) {
    loop {
        let msg = match timeout(READ_DEADLINE, ws_rx.next()).await {
            Err(_) => {
                warn!(user_id = conn.user_id, "read deadline exceeded");
                conn.close(CloseReason::ReadError);
                return;
            }
            Ok(None) => {
                conn.close(CloseReason::ReadError);
                return;
            }
            Ok(Some(Err(e))) => {
                debug!(user_id = conn.user_id, error = %e, "websocket read error");
                conn.close(CloseReason::ReadError);
                return;
            }
            Ok(Some(Ok(msg))) => msg,
        };

        match msg {
            Message::Text(text) => {
                handle_inbound(state, conn.user_id, text.as_bytes()).await;
            }
            Message::Binary(data) => {
                handle_inbound(state, conn.user_id, &data).await;
            }
            // The socket layer answers pings; both directions refresh the
            // deadline simply by arriving
            Message::Ping(_) | Message::Pong(_) => {}
            Message::Close(_) => {
                conn.close(CloseReason::ReadError);
                return;
            }
        }
    }
}

async fn handle_inbound(state: &Arc<AppState>, user_id: i64, raw: &[u8]) {
    if let Some(response) = state.router.handle_message(user_id, raw).await {
        // The response goes back to this user only
        state.hub.send_to_user(user_id, response).await;
    }
}

/// Write pump: sole consumer of the outbound queue. Applies the write
/// deadline to every frame, pings on the keepalive period, exits on the
/// first error or when the close latch fires.
async fn write_pump(
    mut ws_tx: SplitSink<WebSocket, Message>,
    mut out_rx: mpsc::Receiver<Vec<u8>>,
    conn: Arc<Connection>,
) {
    let mut ping = interval_at(Instant::now() + PING_PERIOD, PING_PERIOD);
    ping.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let mut closed = conn.close_watch();

    loop {
        tokio::select! {
            frame = out_rx.recv() => {
                match frame {
                    Some(frame) => {
                        let text = match String::from_utf8(frame) {
                            Ok(text) => text,
                            Err(_) => {
                                warn!(user_id = conn.user_id, "dropping non-utf8 frame");
                                continue;
                            }
                        };
                        match timeout(WRITE_DEADLINE, ws_tx.send(Message::Text(text.into()))).await {
                            Ok(Ok(())) => {}
                            _ => {
                                conn.close(CloseReason::WriteError);
                                return;
                            }
                        }
                    }
                    None => {
                        conn.close(CloseReason::SendChanClosed);
                        return;
                    }
                }
            }

            _ = ping.tick() => {
                match timeout(WRITE_DEADLINE, ws_tx.send(Message::Ping(Vec::new().into()))).await {
                    Ok(Ok(())) => {}
                    _ => {
                        conn.close(CloseReason::PingError);
                        return;
                    }
                }
            }

            _ = async {
                if closed.borrow().is_some() {
                    return;
                }
                loop {
                    if closed.changed().await.is_err() {
                        return;
                    }
                    if closed.borrow().is_some() {
                        return;
                    }
                }
            } => {
                // Best effort close frame; the latch already logged why
                let _ = ws_tx.send(Message::Close(None)).await;
                return;
            }
        }
    }
}
