//! JSON envelopes for the client protocol and inter-service events.

use crate::events::BroadcastEvent;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Client → server request envelope.
#[derive(Debug, Clone, Deserialize)]
pub struct RequestEnvelope {
    pub game: String,
    pub command: String,
    #[serde(default)]
    pub data: Value,
}

/// Server → client response/push envelope.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResponseEnvelope {
    pub game_code: String,
    pub command: String,
    pub data: Value,
}

impl ResponseEnvelope {
    /// Build an envelope from a serializable payload.
    pub fn new<T: Serialize>(game_code: &str, command: &str, data: &T) -> serde_json::Result<Self> {
        Ok(Self {
            game_code: game_code.to_string(),
            command: command.to_string(),
            data: serde_json::to_value(data)?,
        })
    }

    /// Serialize to the frame bytes shipped over the socket.
    pub fn to_bytes(&self) -> serde_json::Result<Vec<u8>> {
        serde_json::to_vec(self)
    }
}

/// Self-describing event container for broadcast fan-out.
///
/// Carries a type URL plus the JSON payload so intermediaries forward
/// events they do not understand and new event types never break the
/// broadcast interface.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventEnvelope {
    pub type_url: String,
    pub value: Value,
}

impl EventEnvelope {
    /// Pack a typed event.
    pub fn pack<E: BroadcastEvent>(event: &E) -> serde_json::Result<Self> {
        Ok(Self {
            type_url: E::TYPE_URL.to_string(),
            value: serde_json::to_value(event)?,
        })
    }

    /// Unpack into a typed event. Returns `None` when the type URL does not
    /// match `E`.
    pub fn unpack<E: BroadcastEvent>(&self) -> Option<serde_json::Result<E>> {
        if self.type_url != E::TYPE_URL {
            return None;
        }
        Some(serde_json::from_value(self.value.clone()))
    }
}

/// A push frame rendered from an [`EventEnvelope`], ready for the hub.
pub struct PushEnvelope;

impl PushEnvelope {
    /// Render an event envelope as client frame bytes.
    ///
    /// Returns `None` for unknown event types: the gateway drops what it
    /// cannot name rather than forwarding an unframed payload.
    pub fn render(game_code: &str, event: &EventEnvelope) -> Option<Vec<u8>> {
        let command = event.command()?;
        let envelope = ResponseEnvelope {
            game_code: game_code.to_string(),
            command: command.to_string(),
            data: event.value.clone(),
        };
        envelope.to_bytes().ok()
    }
}
