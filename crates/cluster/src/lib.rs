//! Cross-instance communication for the service-mesh deployment.
//!
//! No gateway knows which instance holds a given user's socket, so the
//! [`BroadcastClient`] fans every broadcast and unicast out to all current
//! gateway instances resolved from the registry. The HTTP clients in
//! [`rpc`] let GS and GMS call each other across processes through the
//! same traits the monolith wires in-process.

pub mod broadcast;
pub mod rpc;

pub use broadcast::BroadcastClient;
pub use rpc::{correlation_id, HttpGmsClient, HttpGsClient};
