//! SQLite database module for the granary ledger
//!
//! Single source of truth for participants, balances, deposits, the
//! append-only ledger and the reward batch log. Both engines read and
//! mutate state exclusively through this module.
//!
//! ## Tables
//!
//! - `participants` - identity, public invitation code, parent code
//! - `balances` - per-currency main + accumulator fields
//! - `deposits` - farming deposits with per-second rates
//! - `ledger_entries` - append-only record of every balance mutation
//! - `reward_batches` - durable batch log driving distribution and retry

pub mod schema;
pub mod participants;
pub mod deposits;
pub mod ledger;
pub mod batches;

use std::path::Path;
use std::sync::Mutex;

use rusqlite::Connection;
use tracing::{debug, info};

use crate::error::{GranaryError, Result};

/// SQLite database handle shared by the engines
pub struct Db {
    conn: Mutex<Connection>,
}

impl Db {
    /// Open or create the database under the data directory
    pub fn open(data_dir: &Path) -> Result<Self> {
        let db_path = data_dir.join("granary.db");
        info!("Opening SQLite database at {:?}", db_path);

        let conn = Connection::open(&db_path)
            .map_err(|e| GranaryError::Database(format!("Failed to open SQLite: {}", e)))?;

        // WAL mode for better concurrent read performance
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL; PRAGMA foreign_keys=ON;")
            .map_err(|e| GranaryError::Database(format!("Failed to set PRAGMA: {}", e)))?;

        let db = Self { conn: Mutex::new(conn) };
        db.init_schema()?;

        Ok(db)
    }

    /// Open an in-memory database (for testing)
    pub fn open_in_memory() -> Result<Self> {
        debug!("Opening in-memory SQLite database");

        let conn = Connection::open_in_memory()
            .map_err(|e| GranaryError::Database(format!("Failed to open in-memory SQLite: {}", e)))?;
        conn.execute_batch("PRAGMA foreign_keys=ON;")
            .map_err(|e| GranaryError::Database(format!("Failed to set PRAGMA: {}", e)))?;

        let db = Self { conn: Mutex::new(conn) };
        db.init_schema()?;

        Ok(db)
    }

    fn init_schema(&self) -> Result<()> {
        let conn = self.conn.lock()
            .map_err(|e| GranaryError::Internal(format!("Lock poisoned: {}", e)))?;
        schema::init_schema(&conn)
    }

    /// Run a read-only operation against the connection
    pub fn with_conn<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Connection) -> Result<T>,
    {
        let conn = self.conn.lock()
            .map_err(|e| GranaryError::Internal(format!("Lock poisoned: {}", e)))?;
        f(&conn)
    }

    /// Run a write operation with exclusive access (transactions)
    pub fn with_conn_mut<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut Connection) -> Result<T>,
    {
        let mut conn = self.conn.lock()
            .map_err(|e| GranaryError::Internal(format!("Lock poisoned: {}", e)))?;
        f(&mut conn)
    }

    /// Row counts for operator tooling
    pub fn stats(&self) -> Result<DbStats> {
        self.with_conn(|conn| {
            let count = |sql: &str| -> Result<u64> {
                let n: i64 = conn
                    .query_row(sql, [], |row| row.get(0))
                    .map_err(|e| GranaryError::Database(format!("Query failed: {}", e)))?;
                Ok(n as u64)
            };

            Ok(DbStats {
                participant_count: count("SELECT COUNT(*) FROM participants")?,
                active_deposit_count: count("SELECT COUNT(*) FROM deposits WHERE is_active = 1")?,
                ledger_entry_count: count("SELECT COUNT(*) FROM ledger_entries")?,
                pending_batch_count: count(
                    "SELECT COUNT(*) FROM reward_batches WHERE status IN ('queued', 'processing')",
                )?,
            })
        })
    }
}

/// Database statistics
#[derive(Debug, Clone, serde::Serialize)]
pub struct DbStats {
    pub participant_count: u64,
    pub active_deposit_count: u64,
    pub ledger_entry_count: u64,
    pub pending_batch_count: u64,
}

// Re-exports
pub use participants::{ParticipantRow, BalanceRow};
pub use deposits::DepositRow;
pub use ledger::{LedgerEntryRow, NewLedgerEntry, BalanceDelta};
pub use batches::{RewardBatchRow, BatchStatus};
