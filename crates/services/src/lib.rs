//! Service contracts between the color game core and its collaborators.
//!
//! The core consumes accounts, wallets, and service discovery through the
//! narrow traits defined here; reference in-memory implementations back the
//! monolith deployment and the test suites. The game-facing traits
//! ([`GmsApi`], [`GsApi`], [`RoundResultReceiver`], [`GatewayBroadcaster`])
//! are the seams that let one contract serve both the single-process and
//! the service-mesh deployment.

pub mod auth;
pub mod colorgame;
pub mod error;
pub mod gateway;
pub mod registry;
pub mod wallet;

pub use auth::{AuthClaims, AuthService, MockAuthService};
pub use colorgame::{GmsApi, GsApi, PlayerBetLookup, RoundResultReceiver};
pub use error::{Error, Result};
pub use gateway::GatewayBroadcaster;
pub use registry::{MemoryRegistry, Registry};
pub use wallet::{MockWalletService, WalletService};

/// Service name gateways register under and broadcast clients resolve.
pub const GATEWAY_SERVICE: &str = "gateway-service";
