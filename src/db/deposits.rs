//! Deposit operations

use rusqlite::{params, Connection, OptionalExtension, Row};
use rust_decimal::Decimal;
use serde::Serialize;
use tracing::debug;

use crate::error::{GranaryError, Result};
use crate::types::{Currency, DepositId, ParticipantId};

/// Deposit row from database
#[derive(Debug, Clone, Serialize)]
pub struct DepositRow {
    pub id: DepositId,
    pub owner_id: ParticipantId,
    pub amount: Decimal,
    pub rate_per_second: Decimal,
    pub currency: Currency,
    pub created_at: String,
    pub last_updated_at_ms: i64,
    pub is_active: bool,
}

impl DepositRow {
    fn from_row(row: &Row) -> std::result::Result<Self, rusqlite::Error> {
        Ok(Self {
            id: row.get("id")?,
            owner_id: row.get("owner_id")?,
            amount: raw_decimal(row, "amount")?,
            rate_per_second: raw_decimal(row, "rate_per_second")?,
            currency: raw_currency(row)?,
            created_at: row.get("created_at")?,
            last_updated_at_ms: row.get("last_updated_at_ms")?,
            is_active: row.get::<_, i64>("is_active")? != 0,
        })
    }
}

fn raw_decimal(row: &Row, col: &str) -> std::result::Result<Decimal, rusqlite::Error> {
    let raw: String = row.get(col)?;
    raw.parse::<Decimal>().map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(
            0,
            rusqlite::types::Type::Text,
            Box::new(e),
        )
    })
}

fn raw_currency(row: &Row) -> std::result::Result<Currency, rusqlite::Error> {
    let raw: String = row.get("currency")?;
    Currency::parse(&raw).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            0,
            rusqlite::types::Type::Text,
            format!("unknown currency {:?}", raw).into(),
        )
    })
}

/// Insert a new active deposit
pub fn create_deposit(
    conn: &Connection,
    owner_id: ParticipantId,
    amount: Decimal,
    rate_per_second: Decimal,
    currency: Currency,
    now_ms: i64,
) -> Result<DepositRow> {
    conn.execute(
        "INSERT INTO deposits (owner_id, amount, rate_per_second, currency, last_updated_at_ms)
         VALUES (?1, ?2, ?3, ?4, ?5)",
        params![
            owner_id,
            amount.to_string(),
            rate_per_second.to_string(),
            currency.as_str(),
            now_ms
        ],
    )
    .map_err(|e| GranaryError::Database(format!("Insert deposit failed: {}", e)))?;

    let id = conn.last_insert_rowid();
    debug!(id, owner_id, %amount, "Created deposit");

    get_deposit(conn, id)?
        .ok_or_else(|| GranaryError::Internal(format!("Deposit {} vanished after insert", id)))
}

/// Get deposit by ID
pub fn get_deposit(conn: &Connection, id: DepositId) -> Result<Option<DepositRow>> {
    conn.query_row(
        "SELECT * FROM deposits WHERE id = ?1",
        params![id],
        DepositRow::from_row,
    )
    .optional()
    .map_err(|e| GranaryError::Database(format!("Query deposit failed: {}", e)))
}

/// All active deposits for an owner
pub fn active_deposits(conn: &Connection, owner_id: ParticipantId) -> Result<Vec<DepositRow>> {
    let mut stmt = conn
        .prepare("SELECT * FROM deposits WHERE owner_id = ?1 AND is_active = 1 ORDER BY id")
        .map_err(|e| GranaryError::Database(format!("Prepare failed: {}", e)))?;

    let rows = stmt
        .query_map(params![owner_id], DepositRow::from_row)
        .map_err(|e| GranaryError::Database(format!("Query failed: {}", e)))?
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(|e| GranaryError::Database(format!("Row parse failed: {}", e)))?;

    Ok(rows)
}

/// Stamp a deposit's accrual point after a successful tick
pub fn touch_deposit(conn: &Connection, id: DepositId, now_ms: i64) -> Result<()> {
    conn.execute(
        "UPDATE deposits SET last_updated_at_ms = ?1 WHERE id = ?2",
        params![now_ms, id],
    )
    .map_err(|e| GranaryError::Database(format!("Touch deposit failed: {}", e)))?;
    Ok(())
}

/// Logically deactivate a deposit. Rows are never deleted.
pub fn deactivate_deposit(conn: &Connection, id: DepositId) -> Result<()> {
    let updated = conn
        .execute("UPDATE deposits SET is_active = 0 WHERE id = ?1", params![id])
        .map_err(|e| GranaryError::Database(format!("Deactivate deposit failed: {}", e)))?;

    if updated == 0 {
        return Err(GranaryError::NotFound(format!("Deposit {}", id)));
    }
    Ok(())
}

/// Owners that currently hold at least one active deposit, for the scheduler
pub fn owners_with_active_deposits(conn: &Connection) -> Result<Vec<ParticipantId>> {
    let mut stmt = conn
        .prepare("SELECT DISTINCT owner_id FROM deposits WHERE is_active = 1 ORDER BY owner_id")
        .map_err(|e| GranaryError::Database(format!("Prepare failed: {}", e)))?;

    let ids = stmt
        .query_map([], |row| row.get(0))
        .map_err(|e| GranaryError::Database(format!("Query failed: {}", e)))?
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(|e| GranaryError::Database(format!("Row parse failed: {}", e)))?;

    Ok(ids)
}
