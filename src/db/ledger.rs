//! Append-only ledger operations
//!
//! Every balance mutation leaves exactly one ledger entry. Distribution
//! writes entries and balance deltas through the bulk helpers below inside
//! a single caller-held transaction, so a partial level is never credited.

use rusqlite::{params, Connection, Row};
use rust_decimal::Decimal;
use serde::Serialize;

use crate::db::participants::{ensure_balance_row, get_balance, parse_decimal};
use crate::error::{GranaryError, Result};
use crate::types::{Currency, ParticipantId};

/// Entry types written by the engines
pub mod entry_type {
    /// Deposit principal leaving the main balance
    pub const DEPOSIT: &str = "deposit";
    /// Accumulated yield landing on the main balance
    pub const FARMING_INCOME: &str = "farming_income";
    /// Referral share credited to an ancestor
    pub const REFERRAL_REWARD: &str = "referral_reward";
}

/// Ledger entry row from database
#[derive(Debug, Clone, Serialize)]
pub struct LedgerEntryRow {
    pub id: i64,
    pub participant_id: ParticipantId,
    pub entry_type: String,
    pub currency: Currency,
    pub amount: Decimal,
    pub status: String,
    pub source: Option<String>,
    pub category: Option<String>,
    pub ref_level: Option<u32>,
    pub created_at: String,
}

impl LedgerEntryRow {
    fn from_row(row: &Row) -> std::result::Result<Self, rusqlite::Error> {
        let amount_raw: String = row.get("amount")?;
        let currency_raw: String = row.get("currency")?;
        Ok(Self {
            id: row.get("id")?,
            participant_id: row.get("participant_id")?,
            entry_type: row.get("entry_type")?,
            currency: Currency::parse(&currency_raw).ok_or_else(|| {
                rusqlite::Error::FromSqlConversionFailure(
                    0,
                    rusqlite::types::Type::Text,
                    format!("unknown currency {:?}", currency_raw).into(),
                )
            })?,
            amount: amount_raw.parse::<Decimal>().map_err(|e| {
                rusqlite::Error::FromSqlConversionFailure(
                    0,
                    rusqlite::types::Type::Text,
                    Box::new(e),
                )
            })?,
            status: row.get("status")?,
            source: row.get("source")?,
            category: row.get("category")?,
            ref_level: row.get("ref_level")?,
            created_at: row.get("created_at")?,
        })
    }
}

/// Input for a new ledger entry
#[derive(Debug, Clone)]
pub struct NewLedgerEntry {
    pub participant_id: ParticipantId,
    pub entry_type: &'static str,
    pub currency: Currency,
    pub amount: Decimal,
    pub source: Option<String>,
    pub category: Option<String>,
    pub ref_level: Option<u32>,
}

/// A signed change to one participant's main balance
#[derive(Debug, Clone)]
pub struct BalanceDelta {
    pub participant_id: ParticipantId,
    pub currency: Currency,
    pub delta: Decimal,
}

/// Insert a single ledger entry
pub fn insert_entry(conn: &Connection, entry: &NewLedgerEntry) -> Result<i64> {
    conn.execute(
        "INSERT INTO ledger_entries
            (participant_id, entry_type, currency, amount, source, category, ref_level)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        params![
            entry.participant_id,
            entry.entry_type,
            entry.currency.as_str(),
            entry.amount.to_string(),
            entry.source,
            entry.category,
            entry.ref_level,
        ],
    )
    .map_err(|e| GranaryError::Database(format!("Insert ledger entry failed: {}", e)))?;

    Ok(conn.last_insert_rowid())
}

/// Bulk insert ledger entries through one prepared statement
pub fn bulk_insert_entries(conn: &Connection, entries: &[NewLedgerEntry]) -> Result<usize> {
    let mut stmt = conn
        .prepare(
            "INSERT INTO ledger_entries
                (participant_id, entry_type, currency, amount, source, category, ref_level)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        )
        .map_err(|e| GranaryError::Database(format!("Prepare failed: {}", e)))?;

    for entry in entries {
        stmt.execute(params![
            entry.participant_id,
            entry.entry_type,
            entry.currency.as_str(),
            entry.amount.to_string(),
            entry.source,
            entry.category,
            entry.ref_level,
        ])
        .map_err(|e| GranaryError::Database(format!("Insert ledger entry failed: {}", e)))?;
    }

    Ok(entries.len())
}

/// Apply a set of main-balance deltas.
///
/// Negative deltas that would take a balance below zero fail the whole
/// call; run inside a transaction so the caller's unit rolls back intact.
pub fn apply_balance_deltas(conn: &Connection, deltas: &[BalanceDelta]) -> Result<()> {
    for delta in deltas {
        ensure_balance_row(conn, delta.participant_id, delta.currency)?;
        let balance = get_balance(conn, delta.participant_id, delta.currency)?;
        let new_main = balance.main + delta.delta;

        if new_main < Decimal::ZERO {
            return Err(GranaryError::InsufficientFunds {
                needed: (-delta.delta).to_string(),
                available: balance.main.to_string(),
            });
        }

        conn.execute(
            "UPDATE balances SET main = ?1 WHERE participant_id = ?2 AND currency = ?3",
            params![
                new_main.to_string(),
                delta.participant_id,
                delta.currency.as_str()
            ],
        )
        .map_err(|e| GranaryError::Database(format!("Balance update failed: {}", e)))?;
    }
    Ok(())
}

/// Entries for one participant, newest first
pub fn entries_for_participant(
    conn: &Connection,
    participant_id: ParticipantId,
    limit: u32,
) -> Result<Vec<LedgerEntryRow>> {
    let mut stmt = conn
        .prepare(
            "SELECT * FROM ledger_entries WHERE participant_id = ?1
             ORDER BY id DESC LIMIT ?2",
        )
        .map_err(|e| GranaryError::Database(format!("Prepare failed: {}", e)))?;

    let rows = stmt
        .query_map(params![participant_id, limit], LedgerEntryRow::from_row)
        .map_err(|e| GranaryError::Database(format!("Query failed: {}", e)))?
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(|e| GranaryError::Database(format!("Row parse failed: {}", e)))?;

    Ok(rows)
}

/// Entries attributed to a source (e.g. one batch id)
pub fn entries_for_source(conn: &Connection, source: &str) -> Result<Vec<LedgerEntryRow>> {
    let mut stmt = conn
        .prepare("SELECT * FROM ledger_entries WHERE source = ?1 ORDER BY id")
        .map_err(|e| GranaryError::Database(format!("Prepare failed: {}", e)))?;

    let rows = stmt
        .query_map(params![source], LedgerEntryRow::from_row)
        .map_err(|e| GranaryError::Database(format!("Query failed: {}", e)))?
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(|e| GranaryError::Database(format!("Row parse failed: {}", e)))?;

    Ok(rows)
}

/// Sum of referral rewards a participant earned from one chain level
pub fn referral_reward_sum_at_level(
    conn: &Connection,
    participant_id: ParticipantId,
    level: u32,
) -> Result<Decimal> {
    let mut stmt = conn
        .prepare(
            "SELECT amount FROM ledger_entries
             WHERE participant_id = ?1 AND entry_type = ?2 AND ref_level = ?3",
        )
        .map_err(|e| GranaryError::Database(format!("Prepare failed: {}", e)))?;

    let amounts = stmt
        .query_map(
            params![participant_id, entry_type::REFERRAL_REWARD, level],
            |row| row.get::<_, String>(0),
        )
        .map_err(|e| GranaryError::Database(format!("Query failed: {}", e)))?
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(|e| GranaryError::Database(format!("Row parse failed: {}", e)))?;

    let mut total = Decimal::ZERO;
    for raw in amounts {
        total += parse_decimal(&raw, "referral reward amount")?;
    }
    Ok(total)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{participants, Db};
    use rust_decimal_macros::dec;

    #[test]
    fn test_bulk_insert_and_deltas() {
        let db = Db::open_in_memory().unwrap();
        db.with_conn(|conn| {
            let a = participants::create_participant(conn, "LEDGER0A", None)?;
            let b = participants::create_participant(conn, "LEDGER0B", None)?;

            bulk_insert_entries(
                conn,
                &[
                    NewLedgerEntry {
                        participant_id: a.id,
                        entry_type: entry_type::REFERRAL_REWARD,
                        currency: Currency::Coin,
                        amount: dec!(50),
                        source: Some("batch-1".into()),
                        category: Some("referral".into()),
                        ref_level: Some(1),
                    },
                    NewLedgerEntry {
                        participant_id: b.id,
                        entry_type: entry_type::REFERRAL_REWARD,
                        currency: Currency::Coin,
                        amount: dec!(30),
                        source: Some("batch-1".into()),
                        category: Some("referral".into()),
                        ref_level: Some(2),
                    },
                ],
            )?;

            apply_balance_deltas(
                conn,
                &[
                    BalanceDelta { participant_id: a.id, currency: Currency::Coin, delta: dec!(50) },
                    BalanceDelta { participant_id: b.id, currency: Currency::Coin, delta: dec!(30) },
                ],
            )?;

            assert_eq!(entries_for_source(conn, "batch-1")?.len(), 2);
            assert_eq!(
                participants::get_balance(conn, a.id, Currency::Coin)?.main,
                dec!(50)
            );
            assert_eq!(referral_reward_sum_at_level(conn, b.id, 2)?, dec!(30));
            Ok(())
        })
        .unwrap();
    }

    #[test]
    fn test_negative_delta_cannot_overdraw() {
        let db = Db::open_in_memory().unwrap();
        db.with_conn(|conn| {
            let a = participants::create_participant(conn, "LEDGER0C", None)?;
            let err = apply_balance_deltas(
                conn,
                &[BalanceDelta {
                    participant_id: a.id,
                    currency: Currency::Coin,
                    delta: dec!(-1),
                }],
            );
            assert!(matches!(err, Err(GranaryError::InsufficientFunds { .. })));
            Ok(())
        })
        .unwrap();
    }
}
