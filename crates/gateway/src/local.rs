//! In-process broadcaster for single-process deployments.

use crate::hub::Hub;
use async_trait::async_trait;
use protocol::{EventEnvelope, PushEnvelope};
use services::GatewayBroadcaster;
use std::sync::Arc;
use tracing::warn;

/// Direct hub adapter: same contract as the cluster broadcast client, no
/// network hop.
pub struct LocalBroadcaster {
    hub: Arc<Hub>,
}

impl LocalBroadcaster {
    pub fn new(hub: Arc<Hub>) -> Arc<Self> {
        Arc::new(Self { hub })
    }
}

#[async_trait]
impl GatewayBroadcaster for LocalBroadcaster {
    async fn broadcast(&self, game_code: &str, event: EventEnvelope) {
        match PushEnvelope::render(game_code, &event) {
            Some(frame) => self.hub.broadcast(&frame).await,
            None => warn!(type_url = %event.type_url, "unknown broadcast event type"),
        }
    }

    async fn send_to_user(&self, user_id: i64, game_code: &str, event: EventEnvelope) {
        match PushEnvelope::render(game_code, &event) {
            Some(frame) => self.hub.send_to_user(user_id, frame).await,
            None => warn!(type_url = %event.type_url, "unknown unicast event type"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hub::Connection;
    use protocol::{Color, SettlementBrc, GAME_CODE};
    use serde_json::Value;

    #[tokio::test]
    async fn test_events_render_as_client_frames() {
        let hub = Hub::new();
        let (conn, mut rx) = Connection::channel(1001, hub.outbound_capacity());
        hub.register(conn);
        tokio::time::sleep(std::time::Duration::from_millis(30)).await;

        let broadcaster = LocalBroadcaster::new(hub);
        let brc = SettlementBrc::broadcast("20250101120000", Color::Yellow);
        broadcaster
            .broadcast(GAME_CODE, EventEnvelope::pack(&brc).unwrap())
            .await;

        let frame = rx.recv().await.unwrap();
        let v: Value = serde_json::from_slice(&frame).unwrap();
        assert_eq!(v["command"], "ColorGameSettlementBRC");
        assert_eq!(v["data"]["winning_color"], "yellow");
    }
}
