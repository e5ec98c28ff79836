//! Reward distribution engine
//!
//! Walks the resolved ancestor chain of a source participant and credits
//! each ancestor its level share of the event amount. All ledger inserts and
//! balance updates for one call are committed as a single transaction; a
//! failure at any step rolls the whole unit back.

use std::collections::HashMap;
use std::sync::Arc;

use rust_decimal::Decimal;
use tracing::{debug, info};

use crate::db::{ledger, Db};
use crate::error::{GranaryError, Result};
use crate::referral::ChainResolver;
use crate::rewards::levels;
use crate::types::{Currency, ParticipantId};

/// Result of one distribution call
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DistributionOutcome {
    /// Chain levels walked (credited or not)
    pub levels_processed: u32,
    /// Distinct ancestors that received a credit
    pub inviter_count: u32,
    /// Sum of all credited rewards
    pub total_distributed: Decimal,
}

impl DistributionOutcome {
    pub fn empty() -> Self {
        Self {
            levels_processed: 0,
            inviter_count: 0,
            total_distributed: Decimal::ZERO,
        }
    }
}

/// Distributes per-level shares of reward events up the inviter chain
pub struct DistributionEngine {
    db: Arc<Db>,
    resolver: Box<dyn ChainResolver>,
    min_reward: Decimal,
}

impl DistributionEngine {
    pub fn new(db: Arc<Db>, resolver: Box<dyn ChainResolver>, min_reward: Decimal) -> Self {
        Self { db, resolver, min_reward }
    }

    /// Distribute `amount` of `currency` up the source's inviter chain.
    ///
    /// The batch id is recorded as the source of every ledger entry written
    /// by this call, which makes a batch's footprint fully auditable.
    pub fn distribute(
        &self,
        source_participant_id: ParticipantId,
        amount: Decimal,
        currency: Currency,
        batch_id: &str,
    ) -> Result<DistributionOutcome> {
        if amount <= Decimal::ZERO {
            return Err(GranaryError::Validation(format!(
                "Distribution amount must be positive, got {}",
                amount
            )));
        }

        let chain = self
            .db
            .with_conn(|conn| self.resolver.resolve_chain(conn, source_participant_id))?;

        if chain.is_empty() {
            debug!(source_participant_id, batch_id, "No inviter chain, nothing to distribute");
            return Ok(DistributionOutcome::empty());
        }

        // Aggregate per ancestor before touching storage. A participant that
        // appears at two chain positions (cycle remnants in old data) must
        // end up with one ledger entry and one balance delta.
        let mut order: Vec<ParticipantId> = Vec::new();
        let mut credits: HashMap<ParticipantId, (Decimal, u32)> = HashMap::new();

        for (i, &ancestor_id) in chain.iter().enumerate() {
            let level = i as u32 + 1;
            let reward = amount * levels::level_share(level);

            if reward < self.min_reward {
                continue;
            }

            match credits.get_mut(&ancestor_id) {
                Some((sum, _)) => *sum += reward,
                None => {
                    order.push(ancestor_id);
                    credits.insert(ancestor_id, (reward, level));
                }
            }
        }

        if order.is_empty() {
            debug!(
                source_participant_id,
                batch_id,
                chain_len = chain.len(),
                "All level shares below the reward floor"
            );
            return Ok(DistributionOutcome {
                levels_processed: chain.len() as u32,
                inviter_count: 0,
                total_distributed: Decimal::ZERO,
            });
        }

        let mut entries = Vec::with_capacity(order.len());
        let mut deltas = Vec::with_capacity(order.len());
        let mut total = Decimal::ZERO;

        for &ancestor_id in &order {
            let (reward, level) = credits[&ancestor_id];
            total += reward;
            entries.push(ledger::NewLedgerEntry {
                participant_id: ancestor_id,
                entry_type: ledger::entry_type::REFERRAL_REWARD,
                currency,
                amount: reward,
                source: Some(batch_id.to_string()),
                category: Some("referral".to_string()),
                ref_level: Some(level),
            });
            deltas.push(ledger::BalanceDelta {
                participant_id: ancestor_id,
                currency,
                delta: reward,
            });
        }

        self.db.with_conn_mut(|conn| {
            let tx = conn
                .transaction()
                .map_err(|e| GranaryError::Database(format!("Begin transaction failed: {}", e)))?;

            ledger::bulk_insert_entries(&tx, &entries)?;
            ledger::apply_balance_deltas(&tx, &deltas)?;

            tx.commit()
                .map_err(|e| GranaryError::Database(format!("Commit failed: {}", e)))
        })?;

        info!(
            source_participant_id,
            batch_id,
            inviter_count = order.len(),
            %total,
            "Distributed referral rewards"
        );

        Ok(DistributionOutcome {
            levels_processed: chain.len() as u32,
            inviter_count: order.len() as u32,
            total_distributed: total,
        })
    }
}
