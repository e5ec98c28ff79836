//! Reward batch coordination

pub mod coordinator;

pub use coordinator::{BatchCoordinator, FlushSummary};
