//! Farming accrual domain

pub mod engine;
pub mod guard;

pub use engine::{AccrualOutcome, AccrualReceipt, DepositReceipt, FarmingEngine, FarmingInfo};
pub use guard::InFlightGuard;
