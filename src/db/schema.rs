//! Database schema definitions

use rusqlite::Connection;
use tracing::info;

use crate::error::{GranaryError, Result};

/// Current schema version for migrations
pub const SCHEMA_VERSION: i32 = 1;

/// Initialize the database schema
pub fn init_schema(conn: &Connection) -> Result<()> {
    let current_version = get_schema_version(conn)?;

    if current_version == 0 {
        info!("Creating new database schema v{}", SCHEMA_VERSION);
        create_tables(conn)?;
        set_schema_version(conn, SCHEMA_VERSION)?;
    } else if current_version < SCHEMA_VERSION {
        info!("Migrating schema from v{} to v{}", current_version, SCHEMA_VERSION);
        migrate_schema(conn, current_version)?;
    } else {
        info!("Database schema is up to date (v{})", current_version);
    }

    Ok(())
}

/// Get current schema version (0 if not initialized)
fn get_schema_version(conn: &Connection) -> Result<i32> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS schema_version (version INTEGER NOT NULL)",
        [],
    ).map_err(|e| GranaryError::Database(format!("Failed to create schema_version table: {}", e)))?;

    let version: i32 = conn
        .query_row("SELECT version FROM schema_version LIMIT 1", [], |row| row.get(0))
        .unwrap_or(0);

    Ok(version)
}

/// Set schema version
fn set_schema_version(conn: &Connection, version: i32) -> Result<()> {
    conn.execute("DELETE FROM schema_version", [])
        .map_err(|e| GranaryError::Database(format!("Failed to clear schema_version: {}", e)))?;
    conn.execute("INSERT INTO schema_version (version) VALUES (?)", [version])
        .map_err(|e| GranaryError::Database(format!("Failed to set schema_version: {}", e)))?;
    Ok(())
}

/// Create all tables
fn create_tables(conn: &Connection) -> Result<()> {
    conn.execute_batch(ACCOUNTS_SCHEMA)
        .map_err(|e| GranaryError::Database(format!("Failed to create account tables: {}", e)))?;

    conn.execute_batch(LEDGER_SCHEMA)
        .map_err(|e| GranaryError::Database(format!("Failed to create ledger tables: {}", e)))?;

    conn.execute_batch(INDEXES_SCHEMA)
        .map_err(|e| GranaryError::Database(format!("Failed to create indexes: {}", e)))?;

    Ok(())
}

/// Migrate schema from older version
fn migrate_schema(conn: &Connection, from_version: i32) -> Result<()> {
    match from_version {
        // Migration steps go here as the schema evolves
        _ => {}
    }

    set_schema_version(conn, SCHEMA_VERSION)?;
    Ok(())
}

/// Participants, balances and deposits
const ACCOUNTS_SCHEMA: &str = r#"
-- Participant identity and invitation graph pointers.
-- parent_code references another participant's public_code; it is bound
-- at most once and never rewritten.
CREATE TABLE IF NOT EXISTS participants (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    public_code TEXT NOT NULL UNIQUE,
    parent_code TEXT,
    created_at TEXT NOT NULL DEFAULT (datetime('now'))
);

-- Per-currency balance fields. Amounts are canonical decimal strings.
-- main is never allowed to go negative (conditional updates only).
CREATE TABLE IF NOT EXISTS balances (
    participant_id INTEGER NOT NULL,
    currency TEXT NOT NULL,
    main TEXT NOT NULL DEFAULT '0',
    accumulator TEXT NOT NULL DEFAULT '0',
    PRIMARY KEY (participant_id, currency),
    FOREIGN KEY (participant_id) REFERENCES participants(id)
);

-- Farming deposits. Never hard-deleted; is_active = 0 deactivates.
-- last_updated_at_ms drives elapsed-time accrual.
CREATE TABLE IF NOT EXISTS deposits (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    owner_id INTEGER NOT NULL,
    amount TEXT NOT NULL,
    rate_per_second TEXT NOT NULL,
    currency TEXT NOT NULL DEFAULT 'coin',
    created_at TEXT NOT NULL DEFAULT (datetime('now')),
    last_updated_at_ms INTEGER NOT NULL,
    is_active INTEGER NOT NULL DEFAULT 1,
    FOREIGN KEY (owner_id) REFERENCES participants(id)
);
"#;

/// Ledger and batch log
const LEDGER_SCHEMA: &str = r#"
-- Append-only ledger. The sole evidence of every balance mutation.
-- ref_level is set for referral rewards only (chain level of the credit).
CREATE TABLE IF NOT EXISTS ledger_entries (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    participant_id INTEGER NOT NULL,
    entry_type TEXT NOT NULL,
    currency TEXT NOT NULL,
    amount TEXT NOT NULL,
    status TEXT NOT NULL DEFAULT 'completed',
    source TEXT,
    category TEXT,
    ref_level INTEGER,
    created_at TEXT NOT NULL DEFAULT (datetime('now')),
    FOREIGN KEY (participant_id) REFERENCES participants(id)
);

-- Durable batch log. batch_id is the unit of deduplication: a batch reaches
-- 'completed' at most once; failed or stuck rows are re-driven by recovery.
CREATE TABLE IF NOT EXISTS reward_batches (
    batch_id TEXT PRIMARY KEY NOT NULL,
    source_participant_id INTEGER NOT NULL,
    amount TEXT NOT NULL,
    currency TEXT NOT NULL,
    status TEXT NOT NULL DEFAULT 'queued',
    levels_processed INTEGER NOT NULL DEFAULT 0,
    inviter_count INTEGER NOT NULL DEFAULT 0,
    total_distributed TEXT NOT NULL DEFAULT '0',
    error_message TEXT,
    attempts INTEGER NOT NULL DEFAULT 0,
    created_at TEXT NOT NULL DEFAULT (datetime('now')),
    updated_at_ms INTEGER NOT NULL DEFAULT 0,
    completed_at TEXT
);
"#;

/// Index definitions for fast queries
const INDEXES_SCHEMA: &str = r#"
CREATE INDEX IF NOT EXISTS idx_participants_parent_code ON participants(parent_code);
CREATE INDEX IF NOT EXISTS idx_deposits_owner_active ON deposits(owner_id, is_active);
CREATE INDEX IF NOT EXISTS idx_ledger_participant_type ON ledger_entries(participant_id, entry_type);
CREATE INDEX IF NOT EXISTS idx_ledger_source ON ledger_entries(source);
CREATE INDEX IF NOT EXISTS idx_batches_status ON reward_batches(status);
"#;
