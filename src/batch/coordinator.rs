//! Batch coordinator
//!
//! Buffers reward events, records each one durably in the batch log, and
//! drives distribution with bounded retries. The batch id is the unit of
//! deduplication: a completed batch re-driven through any path returns its
//! stored outcome without touching the ledger again.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use rust_decimal::Decimal;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::config::{BatchConfig, BatchMode};
use crate::db::{batches, BatchStatus, Db};
use crate::error::{GranaryError, Result};
use crate::rewards::{DistributionEngine, DistributionOutcome};
use crate::types::{now_ms, Currency, ParticipantId, RewardEvent};

/// Backoff never sleeps longer than this, regardless of attempt count
const MAX_BACKOFF_MS: u64 = 30_000;

/// Counters from one flush pass
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FlushSummary {
    pub processed: usize,
    pub completed: usize,
    pub failed: usize,
}

/// Buffers reward events and drives their distribution
pub struct BatchCoordinator {
    db: Arc<Db>,
    distribution: DistributionEngine,
    cfg: BatchConfig,
    buffer: Mutex<Vec<RewardEvent>>,
}

impl BatchCoordinator {
    pub fn new(db: Arc<Db>, distribution: DistributionEngine, cfg: BatchConfig) -> Self {
        Self {
            db,
            distribution,
            cfg,
            buffer: Mutex::new(Vec::new()),
        }
    }

    /// Queue a reward event for distribution. Returns the durable batch id.
    ///
    /// The event is logged as `queued` before anything else happens, so a
    /// crash between enqueue and flush loses nothing: the recovery sweep
    /// picks the row back up. In standard mode the buffer is flushed
    /// immediately; in batched mode it waits for the size threshold or the
    /// flush timer.
    pub async fn enqueue(
        &self,
        source_participant_id: ParticipantId,
        amount: Decimal,
        currency: Currency,
    ) -> Result<String> {
        if amount <= Decimal::ZERO {
            return Err(GranaryError::Validation(format!(
                "Reward amount must be positive, got {}",
                amount
            )));
        }

        let event = RewardEvent {
            batch_id: Uuid::new_v4().to_string(),
            source_participant_id,
            amount,
            currency,
        };

        self.db
            .with_conn_mut(|conn| batches::insert_batch(conn, &event, now_ms()))?;

        self.submit(event).await
    }

    /// Buffer an event whose batch row is already durable (written by the
    /// caller, possibly inside a larger transaction), then flush according
    /// to the configured mode.
    pub async fn submit(&self, event: RewardEvent) -> Result<String> {
        let buffered = {
            let mut buffer = self
                .buffer
                .lock()
                .map_err(|e| GranaryError::Internal(format!("Lock poisoned: {}", e)))?;
            buffer.push(event.clone());
            buffer.len()
        };

        debug!(
            batch_id = %event.batch_id,
            source_participant_id = event.source_participant_id,
            amount = %event.amount,
            buffered,
            "Queued reward event"
        );

        let flush_now = match self.cfg.mode {
            BatchMode::Standard => true,
            BatchMode::Batched => buffered >= self.cfg.batch_size,
        };

        if flush_now {
            if let Err(e) = self.flush().await {
                // The row is durable; recovery will re-drive it
                warn!(batch_id = %event.batch_id, error = %e, "Flush after enqueue failed");
            }
        }

        Ok(event.batch_id)
    }

    /// Drain the buffer and process every event, in groups of `batch_size`.
    ///
    /// Per-event distribution failures are recorded in the batch log and
    /// counted in the summary; they do not fail the flush.
    pub async fn flush(&self) -> Result<FlushSummary> {
        let drained: Vec<RewardEvent> = {
            let mut buffer = self
                .buffer
                .lock()
                .map_err(|e| GranaryError::Internal(format!("Lock poisoned: {}", e)))?;
            std::mem::take(&mut *buffer)
        };

        if drained.is_empty() {
            return Ok(FlushSummary::default());
        }

        let mut summary = FlushSummary::default();
        for group in drained.chunks(self.cfg.batch_size.max(1)) {
            for event in group {
                summary.processed += 1;
                match self.process_event(event).await {
                    Ok(_) => summary.completed += 1,
                    Err(e) => {
                        summary.failed += 1;
                        error!(
                            batch_id = %event.batch_id,
                            source_participant_id = event.source_participant_id,
                            amount = %event.amount,
                            currency = %event.currency,
                            error = %e,
                            "Reward batch failed"
                        );
                    }
                }
            }
        }

        info!(
            processed = summary.processed,
            completed = summary.completed,
            failed = summary.failed,
            "Flushed reward buffer"
        );
        Ok(summary)
    }

    /// Re-drive a batch by id, e.g. from recovery or operator tooling.
    ///
    /// A `completed` batch returns its stored outcome untouched.
    pub async fn drive_batch(&self, batch_id: &str) -> Result<DistributionOutcome> {
        let row = self
            .db
            .with_conn(|conn| batches::get_batch(conn, batch_id))?
            .ok_or_else(|| GranaryError::NotFound(format!("Batch {}", batch_id)))?;

        self.process_event(&row.event()).await
    }

    /// Process one event through `queued → processing → completed|failed`,
    /// retrying transient failures with exponential backoff.
    async fn process_event(&self, event: &RewardEvent) -> Result<DistributionOutcome> {
        // Deduplication point: a batch completes at most once
        if let Some(row) = self
            .db
            .with_conn(|conn| batches::get_batch(conn, &event.batch_id))?
        {
            if row.status == BatchStatus::Completed {
                debug!(batch_id = %event.batch_id, "Batch already completed, returning stored result");
                return Ok(DistributionOutcome {
                    levels_processed: row.levels_processed,
                    inviter_count: row.inviter_count,
                    total_distributed: row.total_distributed,
                });
            }
        }

        let mut attempt: u32 = 0;
        loop {
            self.db
                .with_conn_mut(|conn| batches::mark_processing(conn, &event.batch_id, now_ms()))?;

            match self.distribution.distribute(
                event.source_participant_id,
                event.amount,
                event.currency,
                &event.batch_id,
            ) {
                Ok(outcome) => {
                    self.db.with_conn_mut(|conn| {
                        batches::mark_completed(
                            conn,
                            &event.batch_id,
                            outcome.levels_processed,
                            outcome.inviter_count,
                            outcome.total_distributed,
                            now_ms(),
                        )
                    })?;
                    return Ok(outcome);
                }
                Err(e) if e.is_retryable() && attempt + 1 < self.cfg.max_attempts => {
                    let delay = self.backoff_delay(attempt);
                    warn!(
                        batch_id = %event.batch_id,
                        attempt = attempt + 1,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "Distribution attempt failed, backing off"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => {
                    self.db.with_conn_mut(|conn| {
                        batches::mark_failed(conn, &event.batch_id, &e.to_string(), now_ms())
                    })?;
                    return Err(e);
                }
            }
        }
    }

    fn backoff_delay(&self, attempt: u32) -> Duration {
        let ms = self
            .cfg
            .retry_base_delay_ms
            .saturating_mul(1u64 << attempt.min(16))
            .min(MAX_BACKOFF_MS);
        Duration::from_millis(ms)
    }

    /// Recovery sweep: re-drive every failed batch and every queued or
    /// processing row that has not moved since the stale cutoff.
    ///
    /// Idempotent and safe to run at any time, including alongside live
    /// traffic: completed batches are skipped by the deduplication check.
    pub async fn recover(&self) -> Result<usize> {
        let cutoff = now_ms() - (self.cfg.stale_processing_secs as i64) * 1000;
        let rows = self
            .db
            .with_conn(|conn| batches::recoverable_batches(conn, cutoff, 500))?;

        if rows.is_empty() {
            return Ok(0);
        }

        info!(count = rows.len(), "Recovery sweep re-driving batches");

        let mut recovered = 0;
        for row in rows {
            match self.process_event(&row.event()).await {
                Ok(_) => recovered += 1,
                Err(e) => {
                    warn!(batch_id = %row.batch_id, error = %e, "Recovery attempt failed");
                }
            }
        }

        Ok(recovered)
    }

    /// Coordinator loop: timer-driven flush and periodic recovery.
    ///
    /// Runs until the shutdown signal resolves. A recovery sweep runs
    /// immediately on startup to pick up batches left over from a crash.
    pub async fn run(&self, mut shutdown: tokio::sync::watch::Receiver<bool>) {
        if let Err(e) = self.recover().await {
            error!(error = %e, "Startup recovery sweep failed");
        }

        let mut flush_timer = tokio::time::interval(Duration::from_millis(self.cfg.flush_interval_ms));
        let mut recovery_timer =
            tokio::time::interval(Duration::from_secs(self.cfg.recovery_interval_secs));
        // First tick of an interval fires immediately; skip both
        flush_timer.tick().await;
        recovery_timer.tick().await;

        loop {
            tokio::select! {
                _ = flush_timer.tick() => {
                    if let Err(e) = self.flush().await {
                        error!(error = %e, "Timer flush failed");
                    }
                }
                _ = recovery_timer.tick() => {
                    if let Err(e) = self.recover().await {
                        error!(error = %e, "Recovery sweep failed");
                    }
                }
                _ = shutdown.changed() => {
                    info!("Batch coordinator shutting down");
                    // Final drain so buffered events land in the log as processed
                    if let Err(e) = self.flush().await {
                        error!(error = %e, "Final flush failed");
                    }
                    return;
                }
            }
        }
    }
}
