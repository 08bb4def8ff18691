//! GMS: the round coordinator service.
//!
//! Owns the round state machine (the phase clock that drives every round)
//! and the per-round bet aggregates, persists round outcomes, and fans
//! lifecycle events out to the gateway and the player engine.

pub mod api;
pub mod coordinator;
pub mod domain;
pub mod error;
pub mod machine;
pub mod repository;

pub use coordinator::RoundCoordinator;
pub use domain::Round;
pub use error::{Error, Result};
pub use machine::{EventSubscriber, MachineConfig, RoundEvent, StateMachine};
pub use repository::{GameRound, GameRoundRepository, MemoryGameRoundRepository, RoundStatus};
