//! Service facade
//!
//! Wires the engines together and exposes the operations collaborators
//! call: deposits, farming info, harvest, reward queueing and the referral
//! structure view, plus participant registration and invitation binding.

use std::sync::Arc;

use rust_decimal::Decimal;
use tracing::info;
use uuid::Uuid;

use crate::batch::BatchCoordinator;
use crate::config::Config;
use crate::db::{participants, Db, DbStats, ParticipantRow};
use crate::error::{GranaryError, Result};
use crate::farming::{AccrualOutcome, DepositReceipt, FarmingEngine, FarmingInfo};
use crate::referral::{self, LevelSummary};
use crate::rewards::DistributionEngine;
use crate::types::{Currency, ParticipantId};

/// Facade over the farming and referral engines
pub struct GranaryService {
    db: Arc<Db>,
    farming: Arc<FarmingEngine>,
    coordinator: Arc<BatchCoordinator>,
}

impl GranaryService {
    /// Wire the full engine stack over an already-open database.
    pub fn new(db: Arc<Db>, config: &Config) -> Self {
        let resolver = referral::resolver_for(config.referral.strategy);
        let distribution =
            DistributionEngine::new(Arc::clone(&db), resolver, config.referral.min_reward);
        let coordinator = Arc::new(BatchCoordinator::new(
            Arc::clone(&db),
            distribution,
            config.batch.clone(),
        ));
        let farming = Arc::new(FarmingEngine::new(
            Arc::clone(&db),
            config.farming.clone(),
            Arc::clone(&coordinator),
        ));

        Self { db, farming, coordinator }
    }

    /// Open the database under the configured data directory and wire the
    /// engine stack on top of it.
    pub fn open(config: &Config) -> Result<Self> {
        std::fs::create_dir_all(&config.storage.data_dir).map_err(|e| {
            GranaryError::Config(format!(
                "Cannot create data dir {:?}: {}",
                config.storage.data_dir, e
            ))
        })?;
        let db = Arc::new(Db::open(&config.storage.data_dir)?);
        Ok(Self::new(db, config))
    }

    pub fn db(&self) -> Arc<Db> {
        Arc::clone(&self.db)
    }

    pub fn farming_engine(&self) -> Arc<FarmingEngine> {
        Arc::clone(&self.farming)
    }

    pub fn coordinator(&self) -> Arc<BatchCoordinator> {
        Arc::clone(&self.coordinator)
    }

    // =========================================================================
    // Participants
    // =========================================================================

    /// Register a participant, optionally bound to an inviter's code.
    pub fn register_participant(&self, parent_code: Option<&str>) -> Result<ParticipantRow> {
        self.db.with_conn_mut(|conn| {
            if let Some(code) = parent_code {
                if participants::get_by_public_code(conn, code)?.is_none() {
                    return Err(GranaryError::NotFound(format!("Invitation code {}", code)));
                }
            }

            // Short uppercase codes; regenerate on the rare collision
            for _ in 0..5 {
                let code = generate_public_code();
                if participants::get_by_public_code(conn, &code)?.is_none() {
                    let row = participants::create_participant(conn, &code, parent_code)?;
                    info!(id = row.id, public_code = %row.public_code, "Registered participant");
                    return Ok(row);
                }
            }

            Err(GranaryError::Internal("Could not generate a unique invitation code".into()))
        })
    }

    /// Look up a participant by id.
    pub fn participant(&self, id: ParticipantId) -> Result<ParticipantRow> {
        self.db
            .with_conn(|conn| participants::get_participant(conn, id))?
            .ok_or_else(|| GranaryError::NotFound(format!("Participant {}", id)))
    }

    /// Bind a participant to an inviter's public code (write-once).
    pub fn bind_parent_code(
        &self,
        id: ParticipantId,
        parent_code: &str,
    ) -> Result<participants::BindOutcome> {
        self.db
            .with_conn_mut(|conn| participants::bind_parent_code(conn, id, parent_code))
    }

    // =========================================================================
    // Farming
    // =========================================================================

    pub async fn create_deposit(
        &self,
        owner_id: ParticipantId,
        amount: Decimal,
    ) -> Result<DepositReceipt> {
        self.farming.create_deposit(owner_id, amount).await
    }

    pub async fn farming_info(&self, owner_id: ParticipantId) -> Result<FarmingInfo> {
        self.farming.farming_info(owner_id).await
    }

    pub async fn harvest(&self, owner_id: ParticipantId) -> Result<AccrualOutcome> {
        self.farming.harvest(owner_id).await
    }

    // =========================================================================
    // Rewards
    // =========================================================================

    pub async fn queue_reward(
        &self,
        source_participant_id: ParticipantId,
        amount: Decimal,
        currency: Currency,
    ) -> Result<String> {
        self.coordinator
            .enqueue(source_participant_id, amount, currency)
            .await
    }

    pub fn referral_structure(&self, owner_id: ParticipantId) -> Result<Vec<LevelSummary>> {
        self.db
            .with_conn(|conn| referral::referral_structure(conn, owner_id))
    }

    // =========================================================================
    // Operator tooling
    // =========================================================================

    pub fn stats(&self) -> Result<DbStats> {
        self.db.stats()
    }
}

fn generate_public_code() -> String {
    let raw = Uuid::new_v4().simple().to_string();
    raw[..8].to_uppercase()
}
