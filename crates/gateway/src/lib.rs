//! Gateway service: the WebSocket front door.
//!
//! This service:
//! - Authenticates and upgrades client WebSocket connections
//! - Owns every socket through the per-process hub (bounded queues,
//!   keepalive, slow-client eviction)
//! - Routes client command envelopes to the player engine
//! - Accepts fan-in from the cluster broadcast client and pushes round
//!   state and settlement frames to players
//!
//! ## Architecture
//!
//! ```text
//! client ── /ws ──> read pump ──> CommandRouter ──> GS
//!                                                    │
//! GMS/GS ── /internal/* ──> PushEnvelope ──> Hub ──> write pumps
//! ```

pub mod error;
pub mod hub;
pub mod internal_api;
pub mod local;
pub mod router;
pub mod ws_server;

pub use error::{GatewayError, Result};
pub use hub::{CloseReason, Connection, Hub, HubConfig};
pub use local::LocalBroadcaster;
pub use router::CommandRouter;
pub use ws_server::{create_router, AppState};
