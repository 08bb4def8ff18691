//! Gateway fan-out contract.

use async_trait::async_trait;
use protocol::EventEnvelope;

/// Pushes events at connected players.
///
/// Fire-and-forget: delivery problems are logged and counted by the
/// implementation, never surfaced to the game logic. Implemented by the
/// in-process hub adapter for single-process deployments and by the
/// cluster broadcast client for the mesh.
#[async_trait]
pub trait GatewayBroadcaster: Send + Sync {
    /// Deliver an event to every connected player of a game.
    async fn broadcast(&self, game_code: &str, event: EventEnvelope);

    /// Deliver an event to one player, wherever their socket lives.
    async fn send_to_user(&self, user_id: i64, game_code: &str, event: EventEnvelope);
}
