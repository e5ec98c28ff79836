//! Referral graph domain
//!
//! The invitation graph is pointer-style: each participant stores the public
//! code of its inviter. Everything else (ancestor chains, downline summaries)
//! is derived by walking those pointers, always bounded by
//! [`crate::types::MAX_CHAIN_DEPTH`] because the graph is not guaranteed
//! acyclic.

pub mod resolver;
pub mod structure;

pub use resolver::{resolver_for, ChainResolver, IterativeResolver, RecursiveResolver};
pub use structure::{referral_structure, LevelSummary};
