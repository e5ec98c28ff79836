//! Reward batch log operations
//!
//! The batch log is the durable side of the coordinator: every queued reward
//! event gets a row here before anything else happens, and the row's status
//! drives retry and recovery. `batch_id` is the unit of deduplication.

use rusqlite::{params, Connection, OptionalExtension, Row};
use rust_decimal::Decimal;
use serde::Serialize;

use crate::error::{GranaryError, Result};
use crate::types::{Currency, ParticipantId, RewardEvent};

/// Lifecycle of a reward batch
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum BatchStatus {
    Queued,
    Processing,
    Completed,
    Failed,
}

impl BatchStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            BatchStatus::Queued => "queued",
            BatchStatus::Processing => "processing",
            BatchStatus::Completed => "completed",
            BatchStatus::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<BatchStatus> {
        match s {
            "queued" => Some(BatchStatus::Queued),
            "processing" => Some(BatchStatus::Processing),
            "completed" => Some(BatchStatus::Completed),
            "failed" => Some(BatchStatus::Failed),
            _ => None,
        }
    }
}

/// Reward batch row from database
#[derive(Debug, Clone, Serialize)]
pub struct RewardBatchRow {
    pub batch_id: String,
    pub source_participant_id: ParticipantId,
    pub amount: Decimal,
    pub currency: Currency,
    pub status: BatchStatus,
    pub levels_processed: u32,
    pub inviter_count: u32,
    pub total_distributed: Decimal,
    pub error_message: Option<String>,
    pub attempts: u32,
    pub created_at: String,
    pub updated_at_ms: i64,
    pub completed_at: Option<String>,
}

impl RewardBatchRow {
    fn from_row(row: &Row) -> std::result::Result<Self, rusqlite::Error> {
        let status_raw: String = row.get("status")?;
        let currency_raw: String = row.get("currency")?;
        let amount_raw: String = row.get("amount")?;
        let total_raw: String = row.get("total_distributed")?;

        let conversion = |msg: String| {
            rusqlite::Error::FromSqlConversionFailure(
                0,
                rusqlite::types::Type::Text,
                msg.into(),
            )
        };

        Ok(Self {
            batch_id: row.get("batch_id")?,
            source_participant_id: row.get("source_participant_id")?,
            amount: amount_raw
                .parse::<Decimal>()
                .map_err(|e| conversion(format!("bad amount: {}", e)))?,
            currency: Currency::parse(&currency_raw)
                .ok_or_else(|| conversion(format!("unknown currency {:?}", currency_raw)))?,
            status: BatchStatus::parse(&status_raw)
                .ok_or_else(|| conversion(format!("unknown status {:?}", status_raw)))?,
            levels_processed: row.get("levels_processed")?,
            inviter_count: row.get("inviter_count")?,
            total_distributed: total_raw
                .parse::<Decimal>()
                .map_err(|e| conversion(format!("bad total: {}", e)))?,
            error_message: row.get("error_message")?,
            attempts: row.get("attempts")?,
            created_at: row.get("created_at")?,
            updated_at_ms: row.get("updated_at_ms")?,
            completed_at: row.get("completed_at")?,
        })
    }

    /// Reconstruct the source event this batch was created from
    pub fn event(&self) -> RewardEvent {
        RewardEvent {
            batch_id: self.batch_id.clone(),
            source_participant_id: self.source_participant_id,
            amount: self.amount,
            currency: self.currency,
        }
    }
}

/// Insert a new queued batch row for a reward event
pub fn insert_batch(conn: &Connection, event: &RewardEvent, now_ms: i64) -> Result<()> {
    let inserted = conn
        .execute(
            "INSERT OR IGNORE INTO reward_batches
                (batch_id, source_participant_id, amount, currency, updated_at_ms)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                event.batch_id,
                event.source_participant_id,
                event.amount.to_string(),
                event.currency.as_str(),
                now_ms
            ],
        )
        .map_err(|e| GranaryError::Database(format!("Insert batch failed: {}", e)))?;

    if inserted == 0 {
        return Err(GranaryError::IdempotencyConflict(event.batch_id.clone()));
    }
    Ok(())
}

/// Get batch by ID
pub fn get_batch(conn: &Connection, batch_id: &str) -> Result<Option<RewardBatchRow>> {
    conn.query_row(
        "SELECT * FROM reward_batches WHERE batch_id = ?1",
        params![batch_id],
        RewardBatchRow::from_row,
    )
    .optional()
    .map_err(|e| GranaryError::Database(format!("Query batch failed: {}", e)))
}

/// Move a batch into `processing` and count the attempt.
///
/// Refuses to touch a `completed` row, which keeps re-drives of finished
/// batches from ever re-entering the state machine.
pub fn mark_processing(conn: &Connection, batch_id: &str, now_ms: i64) -> Result<()> {
    let updated = conn
        .execute(
            "UPDATE reward_batches
             SET status = 'processing', attempts = attempts + 1, updated_at_ms = ?1
             WHERE batch_id = ?2 AND status != 'completed'",
            params![now_ms, batch_id],
        )
        .map_err(|e| GranaryError::Database(format!("Mark processing failed: {}", e)))?;

    if updated == 0 {
        return Err(GranaryError::IdempotencyConflict(batch_id.to_string()));
    }
    Ok(())
}

/// Record a successful distribution outcome
pub fn mark_completed(
    conn: &Connection,
    batch_id: &str,
    levels_processed: u32,
    inviter_count: u32,
    total_distributed: Decimal,
    now_ms: i64,
) -> Result<()> {
    conn.execute(
        "UPDATE reward_batches
         SET status = 'completed', levels_processed = ?1, inviter_count = ?2,
             total_distributed = ?3, error_message = NULL, updated_at_ms = ?4,
             completed_at = datetime('now')
         WHERE batch_id = ?5",
        params![
            levels_processed,
            inviter_count,
            total_distributed.to_string(),
            now_ms,
            batch_id
        ],
    )
    .map_err(|e| GranaryError::Database(format!("Mark completed failed: {}", e)))?;
    Ok(())
}

/// Record a failed distribution attempt
pub fn mark_failed(conn: &Connection, batch_id: &str, error: &str, now_ms: i64) -> Result<()> {
    conn.execute(
        "UPDATE reward_batches
         SET status = 'failed', error_message = ?1, updated_at_ms = ?2
         WHERE batch_id = ?3 AND status != 'completed'",
        params![error, now_ms, batch_id],
    )
    .map_err(|e| GranaryError::Database(format!("Mark failed failed: {}", e)))?;
    Ok(())
}

/// Batches the recovery sweep should re-drive: every `failed` row, plus
/// `queued`/`processing` rows that have not moved since the stale cutoff
/// (orphaned by a crash or a stuck worker).
pub fn recoverable_batches(
    conn: &Connection,
    stale_before_ms: i64,
    limit: u32,
) -> Result<Vec<RewardBatchRow>> {
    let mut stmt = conn
        .prepare(
            "SELECT * FROM reward_batches
             WHERE status = 'failed'
                OR (status IN ('queued', 'processing') AND updated_at_ms < ?1)
             ORDER BY created_at
             LIMIT ?2",
        )
        .map_err(|e| GranaryError::Database(format!("Prepare failed: {}", e)))?;

    let rows = stmt
        .query_map(params![stale_before_ms, limit], RewardBatchRow::from_row)
        .map_err(|e| GranaryError::Database(format!("Query failed: {}", e)))?
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(|e| GranaryError::Database(format!("Row parse failed: {}", e)))?;

    Ok(rows)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Db;
    use rust_decimal_macros::dec;

    fn event(batch_id: &str) -> RewardEvent {
        RewardEvent {
            batch_id: batch_id.to_string(),
            source_participant_id: 1,
            amount: dec!(1000),
            currency: Currency::Coin,
        }
    }

    #[test]
    fn test_batch_state_machine() {
        let db = Db::open_in_memory().unwrap();
        db.with_conn(|conn| {
            insert_batch(conn, &event("b-1"), 100)?;
            let row = get_batch(conn, "b-1")?.unwrap();
            assert_eq!(row.status, BatchStatus::Queued);
            assert_eq!(row.attempts, 0);

            mark_processing(conn, "b-1", 200)?;
            mark_completed(conn, "b-1", 3, 3, dec!(100), 300)?;

            let row = get_batch(conn, "b-1")?.unwrap();
            assert_eq!(row.status, BatchStatus::Completed);
            assert_eq!(row.attempts, 1);
            assert_eq!(row.total_distributed, dec!(100));
            assert!(row.completed_at.is_some());

            // A completed batch never re-enters processing
            let err = mark_processing(conn, "b-1", 400);
            assert!(matches!(err, Err(GranaryError::IdempotencyConflict(_))));
            Ok(())
        })
        .unwrap();
    }

    #[test]
    fn test_duplicate_batch_id_rejected() {
        let db = Db::open_in_memory().unwrap();
        db.with_conn(|conn| {
            insert_batch(conn, &event("b-dup"), 100)?;
            let err = insert_batch(conn, &event("b-dup"), 200);
            assert!(matches!(err, Err(GranaryError::IdempotencyConflict(_))));
            Ok(())
        })
        .unwrap();
    }

    #[test]
    fn test_recoverable_selection() {
        let db = Db::open_in_memory().unwrap();
        db.with_conn(|conn| {
            insert_batch(conn, &event("b-failed"), 100)?;
            mark_processing(conn, "b-failed", 100)?;
            mark_failed(conn, "b-failed", "boom", 100)?;

            insert_batch(conn, &event("b-stuck"), 100)?;
            mark_processing(conn, "b-stuck", 100)?;

            insert_batch(conn, &event("b-fresh"), 10_000)?;
            mark_processing(conn, "b-fresh", 10_000)?;

            insert_batch(conn, &event("b-done"), 100)?;
            mark_processing(conn, "b-done", 100)?;
            mark_completed(conn, "b-done", 0, 0, dec!(0), 100)?;

            let recoverable = recoverable_batches(conn, 5_000, 100)?;
            let ids: Vec<_> = recoverable.iter().map(|b| b.batch_id.as_str()).collect();
            assert!(ids.contains(&"b-failed"));
            assert!(ids.contains(&"b-stuck"));
            assert!(!ids.contains(&"b-fresh"));
            assert!(!ids.contains(&"b-done"));
            Ok(())
        })
        .unwrap();
    }
}
