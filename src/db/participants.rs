//! Participant and balance operations

use rusqlite::{params, Connection, OptionalExtension, Row};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{GranaryError, Result};
use crate::types::{Currency, ParticipantId};

/// Participant row from database
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParticipantRow {
    pub id: ParticipantId,
    pub public_code: String,
    pub parent_code: Option<String>,
    pub created_at: String,
}

impl ParticipantRow {
    fn from_row(row: &Row) -> std::result::Result<Self, rusqlite::Error> {
        Ok(Self {
            id: row.get("id")?,
            public_code: row.get("public_code")?,
            parent_code: row.get("parent_code")?,
            created_at: row.get("created_at")?,
        })
    }
}

/// Per-currency balance fields
#[derive(Debug, Clone, Serialize)]
pub struct BalanceRow {
    pub participant_id: ParticipantId,
    pub currency: Currency,
    pub main: Decimal,
    pub accumulator: Decimal,
}

/// Outcome of a parent-code bind attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BindOutcome {
    /// The effective parent code after the call
    pub parent_code: String,
    /// False when the participant was already bound and the call was a no-op
    pub newly_bound: bool,
}

pub(crate) fn parse_decimal(raw: &str, field: &str) -> Result<Decimal> {
    raw.parse::<Decimal>()
        .map_err(|e| GranaryError::Database(format!("Corrupt {} value {:?}: {}", field, raw, e)))
}

/// Create a participant with the given public code
pub fn create_participant(
    conn: &Connection,
    public_code: &str,
    parent_code: Option<&str>,
) -> Result<ParticipantRow> {
    conn.execute(
        "INSERT INTO participants (public_code, parent_code) VALUES (?1, ?2)",
        params![public_code, parent_code],
    )
    .map_err(|e| GranaryError::Database(format!("Insert participant failed: {}", e)))?;

    let id = conn.last_insert_rowid();
    debug!(id, public_code, "Created participant");

    get_participant(conn, id)?
        .ok_or_else(|| GranaryError::Internal(format!("Participant {} vanished after insert", id)))
}

/// Get participant by ID
pub fn get_participant(conn: &Connection, id: ParticipantId) -> Result<Option<ParticipantRow>> {
    conn.query_row(
        "SELECT id, public_code, parent_code, created_at FROM participants WHERE id = ?1",
        params![id],
        ParticipantRow::from_row,
    )
    .optional()
    .map_err(|e| GranaryError::Database(format!("Query participant failed: {}", e)))
}

/// Get participant by public invitation code
pub fn get_by_public_code(conn: &Connection, code: &str) -> Result<Option<ParticipantRow>> {
    conn.query_row(
        "SELECT id, public_code, parent_code, created_at FROM participants WHERE public_code = ?1",
        params![code],
        ParticipantRow::from_row,
    )
    .optional()
    .map_err(|e| GranaryError::Database(format!("Query participant failed: {}", e)))
}

/// Bind a participant to its inviter's public code.
///
/// The binding is write-once: if a parent code is already set, the call is a
/// no-op reporting the existing binding. Self-invites are rejected.
pub fn bind_parent_code(
    conn: &Connection,
    id: ParticipantId,
    parent_code: &str,
) -> Result<BindOutcome> {
    let participant = get_participant(conn, id)?
        .ok_or_else(|| GranaryError::NotFound(format!("Participant {}", id)))?;

    if let Some(existing) = participant.parent_code {
        return Ok(BindOutcome { parent_code: existing, newly_bound: false });
    }

    if participant.public_code == parent_code {
        return Err(GranaryError::Validation("Cannot bind own invitation code".into()));
    }

    let inviter = get_by_public_code(conn, parent_code)?
        .ok_or_else(|| GranaryError::NotFound(format!("Invitation code {}", parent_code)))?;

    // Guard against a lost race on the same row: only bind while still unset
    let updated = conn
        .execute(
            "UPDATE participants SET parent_code = ?1 WHERE id = ?2 AND parent_code IS NULL",
            params![parent_code, id],
        )
        .map_err(|e| GranaryError::Database(format!("Bind parent code failed: {}", e)))?;

    if updated == 0 {
        let current = get_participant(conn, id)?
            .and_then(|p| p.parent_code)
            .unwrap_or_else(|| parent_code.to_string());
        return Ok(BindOutcome { parent_code: current, newly_bound: false });
    }

    debug!(id, inviter_id = inviter.id, parent_code, "Bound parent code");
    Ok(BindOutcome { parent_code: parent_code.to_string(), newly_bound: true })
}

/// Get the balance fields for a participant and currency.
///
/// A participant with no balance row yet reads as zero.
pub fn get_balance(
    conn: &Connection,
    id: ParticipantId,
    currency: Currency,
) -> Result<BalanceRow> {
    let row = conn
        .query_row(
            "SELECT main, accumulator FROM balances WHERE participant_id = ?1 AND currency = ?2",
            params![id, currency.as_str()],
            |row| {
                let main: String = row.get(0)?;
                let accumulator: String = row.get(1)?;
                Ok((main, accumulator))
            },
        )
        .optional()
        .map_err(|e| GranaryError::Database(format!("Query balance failed: {}", e)))?;

    match row {
        Some((main, accumulator)) => Ok(BalanceRow {
            participant_id: id,
            currency,
            main: parse_decimal(&main, "main balance")?,
            accumulator: parse_decimal(&accumulator, "accumulator")?,
        }),
        None => Ok(BalanceRow {
            participant_id: id,
            currency,
            main: Decimal::ZERO,
            accumulator: Decimal::ZERO,
        }),
    }
}

/// Make sure a balance row exists for the participant and currency
pub fn ensure_balance_row(conn: &Connection, id: ParticipantId, currency: Currency) -> Result<()> {
    conn.execute(
        "INSERT OR IGNORE INTO balances (participant_id, currency) VALUES (?1, ?2)",
        params![id, currency.as_str()],
    )
    .map_err(|e| GranaryError::Database(format!("Ensure balance row failed: {}", e)))?;
    Ok(())
}

/// Credit the main balance
pub fn credit_main(
    conn: &Connection,
    id: ParticipantId,
    currency: Currency,
    amount: Decimal,
) -> Result<()> {
    ensure_balance_row(conn, id, currency)?;
    let balance = get_balance(conn, id, currency)?;
    let new_main = balance.main + amount;

    conn.execute(
        "UPDATE balances SET main = ?1 WHERE participant_id = ?2 AND currency = ?3",
        params![new_main.to_string(), id, currency.as_str()],
    )
    .map_err(|e| GranaryError::Database(format!("Credit main failed: {}", e)))?;
    Ok(())
}

/// Debit the main balance, refusing to take it negative
pub fn debit_main(
    conn: &Connection,
    id: ParticipantId,
    currency: Currency,
    amount: Decimal,
) -> Result<()> {
    ensure_balance_row(conn, id, currency)?;
    let balance = get_balance(conn, id, currency)?;

    if balance.main < amount {
        return Err(GranaryError::InsufficientFunds {
            needed: amount.to_string(),
            available: balance.main.to_string(),
        });
    }

    let new_main = balance.main - amount;
    conn.execute(
        "UPDATE balances SET main = ?1 WHERE participant_id = ?2 AND currency = ?3",
        params![new_main.to_string(), id, currency.as_str()],
    )
    .map_err(|e| GranaryError::Database(format!("Debit main failed: {}", e)))?;
    Ok(())
}

/// Overwrite the accumulator field
pub fn set_accumulator(
    conn: &Connection,
    id: ParticipantId,
    currency: Currency,
    value: Decimal,
) -> Result<()> {
    ensure_balance_row(conn, id, currency)?;
    conn.execute(
        "UPDATE balances SET accumulator = ?1 WHERE participant_id = ?2 AND currency = ?3",
        params![value.to_string(), id, currency.as_str()],
    )
    .map_err(|e| GranaryError::Database(format!("Set accumulator failed: {}", e)))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Db;
    use rust_decimal_macros::dec;

    #[test]
    fn test_bind_parent_code_once() {
        let db = Db::open_in_memory().unwrap();
        db.with_conn(|conn| {
            let inviter = create_participant(conn, "INVITER1", None)?;
            let second = create_participant(conn, "INVITER2", None)?;
            let invitee = create_participant(conn, "INVITEE1", None)?;

            let first = bind_parent_code(conn, invitee.id, &inviter.public_code)?;
            assert!(first.newly_bound);
            assert_eq!(first.parent_code, "INVITER1");

            // Second bind is a no-op reporting the existing binding
            let repeat = bind_parent_code(conn, invitee.id, &second.public_code)?;
            assert!(!repeat.newly_bound);
            assert_eq!(repeat.parent_code, "INVITER1");
            Ok(())
        })
        .unwrap();
    }

    #[test]
    fn test_bind_rejects_self_and_unknown_code() {
        let db = Db::open_in_memory().unwrap();
        db.with_conn(|conn| {
            let p = create_participant(conn, "SOLO0001", None)?;

            let self_bind = bind_parent_code(conn, p.id, "SOLO0001");
            assert!(matches!(self_bind, Err(GranaryError::Validation(_))));

            let unknown = bind_parent_code(conn, p.id, "MISSING0");
            assert!(matches!(unknown, Err(GranaryError::NotFound(_))));
            Ok(())
        })
        .unwrap();
    }

    #[test]
    fn test_debit_refuses_negative_main() {
        let db = Db::open_in_memory().unwrap();
        db.with_conn(|conn| {
            let p = create_participant(conn, "BAL00001", None)?;
            credit_main(conn, p.id, Currency::Coin, dec!(10))?;

            let err = debit_main(conn, p.id, Currency::Coin, dec!(10.01));
            assert!(matches!(err, Err(GranaryError::InsufficientFunds { .. })));

            debit_main(conn, p.id, Currency::Coin, dec!(10))?;
            let balance = get_balance(conn, p.id, Currency::Coin)?;
            assert_eq!(balance.main, Decimal::ZERO);
            Ok(())
        })
        .unwrap();
    }
}
