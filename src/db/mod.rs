//! SQLite persistence for ingested ledger state
//!
//! ## Tables
//!
//! - `application_status` - checkpoint status codes per stream
//! - `record_files` - one row per ingested record file, unique by name
//! - `entities` - accounts, contracts and files, unique by shard.realm.num
//! - `transactions` - keyed by consensus timestamp
//! - `crypto_transfers`, `file_data` - per-transaction detail rows
//! - `address_book_contents` - address book file bytes accumulated so far
//! - `account_balance_sets`, `account_balances` - balance snapshots
//!
//! Repository functions take a `&Connection` so they compose inside a single
//! `rusqlite::Transaction` opened by the ingester.

pub mod address_book;
pub mod balances;
pub mod entities;
pub mod file_data;
pub mod record_files;
pub mod schema;
pub mod transactions;

use std::path::Path;
use std::sync::Mutex;

use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension};
use serde::Serialize;
use tracing::{debug, info};

use crate::checkpoint::StatusStore;
use crate::domain::ApplicationStatusCode;
use crate::error::ImporterError;

/// Wall-clock nanoseconds for load bookkeeping columns
pub(crate) fn now_ns() -> i64 {
    Utc::now().timestamp_nanos_opt().unwrap_or(i64::MAX)
}

/// Mirror database
pub struct MirrorDb {
    conn: Mutex<Connection>,
}

impl MirrorDb {
    /// Open or create the database file
    pub fn open(db_path: &Path) -> Result<Self, ImporterError> {
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        info!("Opening SQLite database at {:?}", db_path);

        let conn = Connection::open(db_path)?;
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL; PRAGMA foreign_keys=ON;")?;

        let db = Self {
            conn: Mutex::new(conn),
        };
        db.init_schema()?;
        Ok(db)
    }

    /// Open an in-memory database (for testing)
    pub fn open_in_memory() -> Result<Self, ImporterError> {
        debug!("Opening in-memory SQLite database");

        let conn = Connection::open_in_memory()?;
        conn.execute_batch("PRAGMA foreign_keys=ON;")?;

        let db = Self {
            conn: Mutex::new(conn),
        };
        db.init_schema()?;
        Ok(db)
    }

    fn init_schema(&self) -> Result<(), ImporterError> {
        self.with_conn(schema::init_schema)
    }

    pub fn with_conn<F, T>(&self, f: F) -> Result<T, ImporterError>
    where
        F: FnOnce(&Connection) -> Result<T, ImporterError>,
    {
        let conn = self
            .conn
            .lock()
            .map_err(|e| ImporterError::Internal(format!("Lock poisoned: {}", e)))?;
        f(&conn)
    }

    /// Execute a write operation with exclusive access
    pub fn with_conn_mut<F, T>(&self, f: F) -> Result<T, ImporterError>
    where
        F: FnOnce(&mut Connection) -> Result<T, ImporterError>,
    {
        let mut conn = self
            .conn
            .lock()
            .map_err(|e| ImporterError::Internal(format!("Lock poisoned: {}", e)))?;
        f(&mut conn)
    }

    /// Row counts per table
    pub fn stats(&self) -> Result<DbStats, ImporterError> {
        self.with_conn(|conn| {
            let count = |table: &str| -> Result<u64, ImporterError> {
                let n: i64 =
                    conn.query_row(&format!("SELECT COUNT(*) FROM {}", table), [], |row| row.get(0))?;
                Ok(n as u64)
            };
            Ok(DbStats {
                record_files: count("record_files")?,
                transactions: count("transactions")?,
                entities: count("entities")?,
                crypto_transfers: count("crypto_transfers")?,
                file_data: count("file_data")?,
                balance_sets: count("account_balance_sets")?,
                balances: count("account_balances")?,
            })
        })
    }
}

impl StatusStore for MirrorDb {
    fn get(&self, code: ApplicationStatusCode) -> Result<Option<String>, ImporterError> {
        self.with_conn(|conn| {
            Ok(conn
                .query_row(
                    "SELECT status_value FROM application_status WHERE status_code = ?1",
                    [code.as_str()],
                    |row| row.get(0),
                )
                .optional()?)
        })
    }

    fn set(&self, code: ApplicationStatusCode, value: &str) -> Result<(), ImporterError> {
        self.with_conn(|conn| upsert_status(conn, code, value))
    }

    fn set_all(&self, values: &[(ApplicationStatusCode, &str)]) -> Result<(), ImporterError> {
        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;
            for (code, value) in values {
                upsert_status(&tx, *code, value)?;
            }
            tx.commit()?;
            Ok(())
        })
    }
}

fn upsert_status(conn: &Connection, code: ApplicationStatusCode, value: &str) -> Result<(), ImporterError> {
    conn.execute(
        "INSERT INTO application_status (status_code, status_value, updated_at)
         VALUES (?1, ?2, ?3)
         ON CONFLICT(status_code) DO UPDATE SET
             status_value = excluded.status_value,
             updated_at = excluded.updated_at",
        params![code.as_str(), value, Utc::now().to_rfc3339()],
    )?;
    Ok(())
}

/// Database statistics
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DbStats {
    pub record_files: u64,
    pub transactions: u64,
    pub entities: u64,
    pub crypto_transfers: u64,
    pub file_data: u64,
    pub balance_sets: u64,
    pub balances: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_store_round_trip() {
        let db = MirrorDb::open_in_memory().unwrap();
        let code = ApplicationStatusCode::LastValidDownloadedRecordFile;
        assert_eq!(db.get(code).unwrap(), None);

        db.set(code, "2019-08-30T18_10_00.419072Z.rcd").unwrap();
        db.set(code, "2019-08-30T18_10_05.249678Z.rcd").unwrap();
        assert_eq!(
            db.get(code).unwrap().as_deref(),
            Some("2019-08-30T18_10_05.249678Z.rcd")
        );
    }

    #[test]
    fn test_open_creates_parent_dirs() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("nested").join("mirror.db");
        let db = MirrorDb::open(&path).unwrap();
        assert_eq!(db.stats().unwrap(), DbStats::default());
        assert!(path.exists());
    }
}
