//! Referral reward distribution domain

pub mod levels;
pub mod distribution;

pub use distribution::{DistributionEngine, DistributionOutcome};
pub use levels::{level_share, LEVEL_BPS};
