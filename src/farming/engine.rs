//! Farming accrual engine
//!
//! Computes elapsed-time yield for a participant's active deposits and
//! moves it through the accumulator into the main balance. Small amounts
//! park in the accumulator until they clear the change threshold, so the
//! ledger is not written on every sub-cent tick; every transfer into main
//! emits exactly one reward event for referral distribution.

use std::sync::Arc;

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::Serialize;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::batch::BatchCoordinator;
use crate::config::FarmingConfig;
use crate::db::{batches, deposits, ledger, participants, DepositRow, Db};
use crate::error::{GranaryError, Result};
use crate::farming::guard::InFlightGuard;
use crate::types::{now_ms, Currency, DepositId, ParticipantId, RewardEvent};

/// Farming yield is denominated in the in-game coin
const FARMING_CURRENCY: Currency = Currency::Coin;

/// Result of creating a deposit
#[derive(Debug, Clone, Serialize)]
pub struct DepositReceipt {
    pub deposit_id: DepositId,
    pub rate_per_second: Decimal,
}

/// One accrual tick's effect on the balance fields
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AccrualReceipt {
    /// Yield computed this tick across all active deposits
    pub earned_this_tick: Decimal,
    /// Accumulator value after the tick
    pub accumulator: Decimal,
    /// Amount moved into main this tick (zero below the threshold)
    pub transferred: Decimal,
    /// Main balance after the tick
    pub main_balance: Decimal,
}

/// Outcome of an accrual invocation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AccrualOutcome {
    /// No active deposit exists
    Idle,
    /// Another accrual for this participant is in flight; nothing applied
    Busy,
    Accrued(AccrualReceipt),
}

/// Read-only farming summary
#[derive(Debug, Clone, Serialize)]
pub struct FarmingInfo {
    pub is_active: bool,
    pub total_deposited: Decimal,
    pub rate_per_second: Decimal,
    pub daily_income: Decimal,
    pub deposits: Vec<DepositRow>,
}

/// Computes and commits time-based yield for active deposits
pub struct FarmingEngine {
    db: Arc<Db>,
    cfg: FarmingConfig,
    guard: InFlightGuard,
    coordinator: Arc<BatchCoordinator>,
}

impl FarmingEngine {
    pub fn new(db: Arc<Db>, cfg: FarmingConfig, coordinator: Arc<BatchCoordinator>) -> Self {
        Self {
            db,
            cfg,
            guard: InFlightGuard::new(),
            coordinator,
        }
    }

    /// Per-second yield rate for a deposit amount
    pub fn rate_per_second(&self, amount: Decimal) -> Decimal {
        amount * Decimal::from(self.cfg.daily_rate_bps) / dec!(10000) / dec!(86400)
    }

    /// Open a deposit for the owner, funded from the main balance.
    pub async fn create_deposit(
        &self,
        owner_id: ParticipantId,
        amount: Decimal,
    ) -> Result<DepositReceipt> {
        if amount < self.cfg.min_deposit {
            return Err(GranaryError::Validation(format!(
                "Deposit amount {} is below the minimum {}",
                amount, self.cfg.min_deposit
            )));
        }

        let rate = self.rate_per_second(amount);
        let now = now_ms();

        let deposit = self.db.with_conn_mut(|conn| {
            if participants::get_participant(conn, owner_id)?.is_none() {
                return Err(GranaryError::NotFound(format!("Participant {}", owner_id)));
            }

            let tx = conn
                .transaction()
                .map_err(|e| GranaryError::Database(format!("Begin transaction failed: {}", e)))?;

            participants::debit_main(&tx, owner_id, FARMING_CURRENCY, amount)?;
            let deposit =
                deposits::create_deposit(&tx, owner_id, amount, rate, FARMING_CURRENCY, now)?;
            ledger::insert_entry(
                &tx,
                &ledger::NewLedgerEntry {
                    participant_id: owner_id,
                    entry_type: ledger::entry_type::DEPOSIT,
                    currency: FARMING_CURRENCY,
                    amount,
                    source: None,
                    category: Some("farming".to_string()),
                    ref_level: None,
                },
            )?;

            tx.commit()
                .map_err(|e| GranaryError::Database(format!("Commit failed: {}", e)))?;
            Ok(deposit)
        })?;

        info!(owner_id, deposit_id = deposit.id, %amount, rate = %rate, "Opened deposit");

        Ok(DepositReceipt {
            deposit_id: deposit.id,
            rate_per_second: deposit.rate_per_second,
        })
    }

    /// Accrue yield for the owner using the current wall clock.
    pub async fn accrue(&self, owner_id: ParticipantId) -> Result<AccrualOutcome> {
        self.accrue_at(owner_id, now_ms()).await
    }

    /// Accrue yield using an explicit `now` timestamp.
    pub async fn accrue_at(&self, owner_id: ParticipantId, now_ms: i64) -> Result<AccrualOutcome> {
        let (outcome, pending) = {
            let Some(_token) = self.guard.try_begin(owner_id) else {
                debug!(owner_id, "Accrual already in flight, skipping");
                return Ok(AccrualOutcome::Busy);
            };

            match self.apply_accrual(owner_id, now_ms, false)? {
                None => return Ok(AccrualOutcome::Idle),
                Some((receipt, event)) => (AccrualOutcome::Accrued(receipt), event),
            }
        };

        if let Some(event) = pending {
            if let Err(e) = self.coordinator.submit(event).await {
                // The batch row is queued; the recovery sweep will drive it
                warn!(owner_id, error = %e, "Reward event submission failed");
            }
        }

        Ok(outcome)
    }

    /// Transfer all accumulated yield to the main balance immediately,
    /// bypassing the change threshold.
    pub async fn harvest(&self, owner_id: ParticipantId) -> Result<AccrualOutcome> {
        self.db.with_conn(|conn| {
            participants::get_participant(conn, owner_id)?
                .ok_or_else(|| GranaryError::NotFound(format!("Participant {}", owner_id)))
                .map(|_| ())
        })?;

        let (outcome, pending) = {
            let Some(_token) = self.guard.try_begin(owner_id) else {
                debug!(owner_id, "Accrual already in flight, skipping harvest");
                return Ok(AccrualOutcome::Busy);
            };

            match self.apply_accrual(owner_id, now_ms(), true)? {
                None => (AccrualOutcome::Idle, None),
                Some((receipt, event)) => (AccrualOutcome::Accrued(receipt), event),
            }
        };

        if let Some(event) = pending {
            if let Err(e) = self.coordinator.submit(event).await {
                warn!(owner_id, error = %e, "Reward event submission failed");
            }
        }

        Ok(outcome)
    }

    /// Farming summary for the owner. Runs an accrual tick as a side effect
    /// so the reported accumulator is current.
    pub async fn farming_info(&self, owner_id: ParticipantId) -> Result<FarmingInfo> {
        self.db.with_conn(|conn| {
            participants::get_participant(conn, owner_id)?
                .ok_or_else(|| GranaryError::NotFound(format!("Participant {}", owner_id)))
                .map(|_| ())
        })?;

        // Busy just means another tick is updating the same numbers
        let _ = self.accrue(owner_id).await?;

        self.db.with_conn(|conn| {
            let deposits = deposits::active_deposits(conn, owner_id)?;
            let total_deposited: Decimal = deposits.iter().map(|d| d.amount).sum();
            let rate_per_second: Decimal = deposits.iter().map(|d| d.rate_per_second).sum();

            Ok(FarmingInfo {
                is_active: !deposits.is_empty(),
                total_deposited,
                rate_per_second,
                daily_income: rate_per_second * dec!(86400),
                deposits,
            })
        })
    }

    /// Compute and persist one accrual tick in a single transaction.
    ///
    /// Returns None when there is nothing to do (no active deposits and,
    /// unless forced, nothing pending). When the accumulator moves into
    /// main, the reward event's batch row is written in the same
    /// transaction, so the transfer and its event are atomic.
    fn apply_accrual(
        &self,
        owner_id: ParticipantId,
        now_ms: i64,
        force_transfer: bool,
    ) -> Result<Option<(AccrualReceipt, Option<RewardEvent>)>> {
        let threshold = self.cfg.min_change_threshold;
        let tick_ceiling = Decimal::from(self.cfg.tick_secs);

        self.db.with_conn_mut(|conn| {
            let tx = conn
                .transaction()
                .map_err(|e| GranaryError::Database(format!("Begin transaction failed: {}", e)))?;

            let active = deposits::active_deposits(&tx, owner_id)?;
            if active.is_empty() && !force_transfer {
                return Ok(None);
            }

            let mut earned = Decimal::ZERO;
            for deposit in &active {
                let elapsed = clamp_elapsed(now_ms - deposit.last_updated_at_ms, tick_ceiling);
                earned += deposit.rate_per_second * elapsed;
                deposits::touch_deposit(&tx, deposit.id, now_ms)?;
            }

            let balance = participants::get_balance(&tx, owner_id, FARMING_CURRENCY)?;
            let pending = balance.accumulator + earned;

            let transfer = pending > Decimal::ZERO && (force_transfer || pending >= threshold);
            let (receipt, event) = if transfer {
                participants::set_accumulator(&tx, owner_id, FARMING_CURRENCY, Decimal::ZERO)?;
                participants::credit_main(&tx, owner_id, FARMING_CURRENCY, pending)?;

                let event = RewardEvent {
                    batch_id: Uuid::new_v4().to_string(),
                    source_participant_id: owner_id,
                    amount: pending,
                    currency: FARMING_CURRENCY,
                };

                ledger::insert_entry(
                    &tx,
                    &ledger::NewLedgerEntry {
                        participant_id: owner_id,
                        entry_type: ledger::entry_type::FARMING_INCOME,
                        currency: FARMING_CURRENCY,
                        amount: pending,
                        source: Some(event.batch_id.clone()),
                        category: Some("farming".to_string()),
                        ref_level: None,
                    },
                )?;
                batches::insert_batch(&tx, &event, now_ms)?;

                (
                    AccrualReceipt {
                        earned_this_tick: earned,
                        accumulator: Decimal::ZERO,
                        transferred: pending,
                        main_balance: balance.main + pending,
                    },
                    Some(event),
                )
            } else {
                participants::set_accumulator(&tx, owner_id, FARMING_CURRENCY, pending)?;
                (
                    AccrualReceipt {
                        earned_this_tick: earned,
                        accumulator: pending,
                        transferred: Decimal::ZERO,
                        main_balance: balance.main,
                    },
                    None,
                )
            };

            tx.commit()
                .map_err(|e| GranaryError::Database(format!("Commit failed: {}", e)))?;

            Ok(Some((receipt, event)))
        })
    }
}

/// Clamp an elapsed window to `[0.1s, tick ceiling]`.
///
/// The floor keeps every invocation from rounding to nothing; the ceiling
/// keeps a delayed scheduler from crediting an unbounded backlog in one tick.
fn clamp_elapsed(elapsed_ms: i64, tick_ceiling_secs: Decimal) -> Decimal {
    let secs = Decimal::from(elapsed_ms.max(0)) / dec!(1000);
    secs.max(dec!(0.1)).min(tick_ceiling_secs)
}
