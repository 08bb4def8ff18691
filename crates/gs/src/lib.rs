//! GS: the player engine.
//!
//! Every bet and every payout flows through this crate: bet validation and
//! wallet coordination on the way in, batched settlement with per-user and
//! broadcast notifications on the way out.

pub mod api;
pub mod bet_repo;
pub mod domain;
pub mod engine;
pub mod error;
pub mod order_repo;
pub mod redis_repo;

pub use bet_repo::{BetRepository, MemoryBetRepository};
pub use domain::{Bet, BetIdGenerator, BetOrder, BetOrderStatus};
pub use engine::PlayerEngine;
pub use error::{Error, Result};
pub use order_repo::{BetOrderRepository, MemoryBetOrderRepository};
pub use redis_repo::RedisBetRepository;
