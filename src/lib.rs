//! # granary
//!
//! Farming accrual and referral reward distribution engine.
//!
//! Participants hold time-yielding deposits; accrued yield moves through a
//! sub-threshold accumulator into a main balance, and every transfer emits a
//! reward event. Events are logged durably, batched, and distributed up the
//! inviter chain (up to 20 levels) with per-level shares, committed
//! atomically against an append-only ledger.
//!
//! ## Core pieces
//!
//! - [`farming::FarmingEngine`] - elapsed-time yield per deposit
//! - [`referral::ChainResolver`] - bounded ancestor chain resolution
//! - [`rewards::DistributionEngine`] - atomic multi-level crediting
//! - [`batch::BatchCoordinator`] - durable batch log, retry, recovery
//! - [`scheduler::FarmingScheduler`] - chunked periodic accrual fan-out
//! - [`service::GranaryService`] - facade exposed to collaborators

pub mod batch;
pub mod config;
pub mod db;
pub mod error;
pub mod farming;
pub mod referral;
pub mod rewards;
pub mod scheduler;
pub mod service;
pub mod types;

pub use batch::{BatchCoordinator, FlushSummary};
pub use config::{BatchMode, Config, ResolverStrategy};
pub use db::{BatchStatus, Db, DbStats};
pub use error::{GranaryError, Result};
pub use farming::{AccrualOutcome, FarmingEngine, FarmingInfo};
pub use referral::{ChainResolver, LevelSummary};
pub use rewards::{DistributionEngine, DistributionOutcome};
pub use scheduler::FarmingScheduler;
pub use service::GranaryService;
pub use types::{Currency, ParticipantId, RewardEvent, MAX_CHAIN_DEPTH};
