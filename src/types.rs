//! Shared identifiers and small value types

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Participant identifier (database row id)
pub type ParticipantId = i64;

/// Deposit identifier (database row id)
pub type DepositId = i64;

/// Maximum inviter-chain depth. The parent-code graph is not guaranteed
/// acyclic, so every traversal is bounded by this constant.
pub const MAX_CHAIN_DEPTH: usize = 20;

/// Currency of a balance, deposit or reward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Currency {
    /// In-game farming coin
    Coin,
    /// TON
    Ton,
}

impl Currency {
    pub fn as_str(&self) -> &'static str {
        match self {
            Currency::Coin => "coin",
            Currency::Ton => "ton",
        }
    }

    pub fn parse(s: &str) -> Option<Currency> {
        match s {
            "coin" => Some(Currency::Coin),
            "ton" => Some(Currency::Ton),
            _ => None,
        }
    }
}

impl std::fmt::Display for Currency {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A reward event emitted when yield lands on a main balance (or is queued
/// directly by a collaborator). Carries everything distribution needs; the
/// batch id is the unit of deduplication.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RewardEvent {
    pub batch_id: String,
    pub source_participant_id: ParticipantId,
    pub amount: Decimal,
    pub currency: Currency,
}

/// Current wall-clock time in unix milliseconds.
pub fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}
