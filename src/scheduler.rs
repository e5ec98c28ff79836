//! Accrual scheduler
//!
//! Periodically drives the farming engine across every participant holding
//! an active deposit. Participants are processed in small concurrent groups
//! with a pause in between, bounding database load instead of fanning out
//! to the whole population at once.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, error, info};

use crate::config::FarmingConfig;
use crate::db::{deposits, Db};
use crate::error::Result;
use crate::farming::{AccrualOutcome, FarmingEngine};

/// Counters from one scheduler pass
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TickSummary {
    pub participants: usize,
    pub accrued: usize,
    pub skipped_busy: usize,
    pub errors: usize,
}

/// Drives periodic accrual over all active farmers
pub struct FarmingScheduler {
    db: Arc<Db>,
    engine: Arc<FarmingEngine>,
    cfg: FarmingConfig,
}

impl FarmingScheduler {
    pub fn new(db: Arc<Db>, engine: Arc<FarmingEngine>, cfg: FarmingConfig) -> Self {
        Self { db, engine, cfg }
    }

    /// Scheduler loop; runs until the shutdown signal resolves.
    pub async fn run(&self, mut shutdown: tokio::sync::watch::Receiver<bool>) {
        let mut timer = tokio::time::interval(Duration::from_secs(self.cfg.tick_secs));
        timer.tick().await;

        loop {
            tokio::select! {
                _ = timer.tick() => {
                    match self.tick().await {
                        Ok(summary) if summary.participants > 0 => {
                            info!(
                                participants = summary.participants,
                                accrued = summary.accrued,
                                skipped_busy = summary.skipped_busy,
                                errors = summary.errors,
                                "Accrual pass finished"
                            );
                        }
                        Ok(_) => debug!("Accrual pass found no active farmers"),
                        Err(e) => error!(error = %e, "Accrual pass failed"),
                    }
                }
                _ = shutdown.changed() => {
                    info!("Farming scheduler shutting down");
                    return;
                }
            }
        }
    }

    /// One pass over every owner with an active deposit.
    pub async fn tick(&self) -> Result<TickSummary> {
        let owners = self
            .db
            .with_conn(|conn| deposits::owners_with_active_deposits(conn))?;

        let mut summary = TickSummary {
            participants: owners.len(),
            ..Default::default()
        };

        let group_size = self.cfg.group_size.max(1);
        let mut groups = owners.chunks(group_size).peekable();

        while let Some(group) = groups.next() {
            let results =
                futures::future::join_all(group.iter().map(|&id| self.engine.accrue(id))).await;

            for (id, result) in group.iter().zip(results) {
                match result {
                    Ok(AccrualOutcome::Accrued(_)) => summary.accrued += 1,
                    Ok(AccrualOutcome::Busy) => summary.skipped_busy += 1,
                    Ok(AccrualOutcome::Idle) => {}
                    Err(e) => {
                        summary.errors += 1;
                        error!(participant_id = id, error = %e, "Accrual failed");
                    }
                }
            }

            if groups.peek().is_some() {
                tokio::time::sleep(Duration::from_millis(self.cfg.group_pause_ms)).await;
            }
        }

        Ok(summary)
    }
}
