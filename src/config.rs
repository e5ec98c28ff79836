//! Daemon configuration

use std::path::{Path, PathBuf};

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

use crate::error::{GranaryError, Result};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub farming: FarmingConfig,
    #[serde(default)]
    pub referral: ReferralConfig,
    #[serde(default)]
    pub batch: BatchConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Data directory holding the SQLite database
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FarmingConfig {
    /// Daily yield rate in basis points (50 = 0.5% per day)
    #[serde(default = "default_daily_rate_bps")]
    pub daily_rate_bps: u32,

    /// Accumulator value at which yield is moved to the main balance
    #[serde(default = "default_min_change_threshold")]
    pub min_change_threshold: Decimal,

    /// Smallest accepted deposit amount
    #[serde(default = "default_min_deposit")]
    pub min_deposit: Decimal,

    /// Scheduler tick width in seconds; also the elapsed-time ceiling
    /// for a single accrual
    #[serde(default = "default_tick_secs")]
    pub tick_secs: u64,

    /// How many participants are accrued concurrently per group
    #[serde(default = "default_group_size")]
    pub group_size: usize,

    /// Pause between scheduler groups in milliseconds
    #[serde(default = "default_group_pause_ms")]
    pub group_pause_ms: u64,
}

/// Chain resolution strategy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResolverStrategy {
    /// Per-hop lookups, one query per level
    Standard,
    /// Single recursive-closure query
    Optimized,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReferralConfig {
    #[serde(default = "default_strategy")]
    pub strategy: ResolverStrategy,

    /// Rewards below this amount are dropped instead of written to the ledger
    #[serde(default = "default_min_reward")]
    pub min_reward: Decimal,
}

/// Reward flush mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BatchMode {
    /// Flush synchronously right after enqueue
    Standard,
    /// Flush on buffer threshold or timer
    Batched,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchConfig {
    #[serde(default = "default_batch_mode")]
    pub mode: BatchMode,

    /// Maximum events processed per flush group; also the buffer threshold
    /// that triggers a flush in batched mode
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// Timer-driven flush interval in milliseconds (batched mode)
    #[serde(default = "default_flush_interval_ms")]
    pub flush_interval_ms: u64,

    /// How often the recovery sweep re-drives failed and stuck batches
    #[serde(default = "default_recovery_interval_secs")]
    pub recovery_interval_secs: u64,

    /// Attempts per event before the batch is marked failed
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Base backoff delay in milliseconds, doubled on each attempt
    #[serde(default = "default_retry_base_delay_ms")]
    pub retry_base_delay_ms: u64,

    /// A `processing` batch older than this is considered stuck
    #[serde(default = "default_stale_processing_secs")]
    pub stale_processing_secs: u64,
}

impl Config {
    /// Load configuration from a TOML file.
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .map_err(|e| GranaryError::Config(format!("Failed to read {:?}: {}", path, e)))?;
        toml::from_str(&raw)
            .map_err(|e| GranaryError::Config(format!("Failed to parse {:?}: {}", path, e)))
    }
}

// Defaults
fn default_data_dir() -> PathBuf { PathBuf::from("/var/lib/granary") }
fn default_daily_rate_bps() -> u32 { 50 }
fn default_min_change_threshold() -> Decimal { dec!(0.01) }
fn default_min_deposit() -> Decimal { dec!(1) }
fn default_tick_secs() -> u64 { 60 }
fn default_group_size() -> usize { 10 }
fn default_group_pause_ms() -> u64 { 200 }
fn default_strategy() -> ResolverStrategy { ResolverStrategy::Standard }
fn default_min_reward() -> Decimal { dec!(0.0001) }
fn default_batch_mode() -> BatchMode { BatchMode::Standard }
fn default_batch_size() -> usize { 50 }
fn default_flush_interval_ms() -> u64 { 5000 }
fn default_recovery_interval_secs() -> u64 { 300 }
fn default_max_attempts() -> u32 { 3 }
fn default_retry_base_delay_ms() -> u64 { 100 }
fn default_stale_processing_secs() -> u64 { 600 }

impl Default for StorageConfig {
    fn default() -> Self {
        Self { data_dir: default_data_dir() }
    }
}

impl Default for FarmingConfig {
    fn default() -> Self {
        Self {
            daily_rate_bps: default_daily_rate_bps(),
            min_change_threshold: default_min_change_threshold(),
            min_deposit: default_min_deposit(),
            tick_secs: default_tick_secs(),
            group_size: default_group_size(),
            group_pause_ms: default_group_pause_ms(),
        }
    }
}

impl Default for ReferralConfig {
    fn default() -> Self {
        Self {
            strategy: default_strategy(),
            min_reward: default_min_reward(),
        }
    }
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            mode: default_batch_mode(),
            batch_size: default_batch_size(),
            flush_interval_ms: default_flush_interval_ms(),
            recovery_interval_secs: default_recovery_interval_secs(),
            max_attempts: default_max_attempts(),
            retry_base_delay_ms: default_retry_base_delay_ms(),
            stale_processing_secs: default_stale_processing_secs(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            storage: StorageConfig::default(),
            farming: FarmingConfig::default(),
            referral: ReferralConfig::default(),
            batch: BatchConfig::default(),
        }
    }
}
