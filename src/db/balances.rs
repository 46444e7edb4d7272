//! Account balance snapshot rows

use rusqlite::{params, Connection, OptionalExtension};

use crate::domain::EntityId;
use crate::error::ImporterError;

/// Has a complete set been stored for this snapshot timestamp?
pub fn set_complete(conn: &Connection, consensus_ns: i64) -> Result<bool, ImporterError> {
    let complete: Option<bool> = conn
        .query_row(
            "SELECT is_complete FROM account_balance_sets WHERE consensus_ns = ?1",
            [consensus_ns],
            |row| row.get(0),
        )
        .optional()?;
    Ok(complete.unwrap_or(false))
}

/// Open a set, discarding any partial set left at the same timestamp.
pub fn insert_set(
    conn: &Connection,
    consensus_ns: i64,
    file_name: &str,
    processing_start: i64,
) -> Result<(), ImporterError> {
    conn.execute("DELETE FROM account_balances WHERE consensus_ns = ?1", [consensus_ns])?;
    conn.execute("DELETE FROM account_balance_sets WHERE consensus_ns = ?1", [consensus_ns])?;
    conn.execute(
        "INSERT INTO account_balance_sets (consensus_ns, file_name, is_complete, processing_start)
         VALUES (?1, ?2, 0, ?3)",
        params![consensus_ns, file_name, processing_start],
    )?;
    Ok(())
}

pub fn insert_balance(
    conn: &Connection,
    consensus_ns: i64,
    account: EntityId,
    balance: i64,
) -> Result<(), ImporterError> {
    conn.execute(
        "INSERT INTO account_balances (consensus_ns, shard, realm, num, balance)
         VALUES (?1, ?2, ?3, ?4, ?5)",
        params![consensus_ns, account.shard, account.realm, account.num, balance],
    )?;
    Ok(())
}

pub fn complete_set(conn: &Connection, consensus_ns: i64, processing_end: i64) -> Result<(), ImporterError> {
    conn.execute(
        "UPDATE account_balance_sets SET is_complete = 1, processing_end = ?1 WHERE consensus_ns = ?2",
        params![processing_end, consensus_ns],
    )?;
    Ok(())
}

/// Snapshot timestamps with complete sets, oldest first
pub fn list_sets(conn: &Connection) -> Result<Vec<i64>, ImporterError> {
    let mut stmt = conn.prepare(
        "SELECT consensus_ns FROM account_balance_sets WHERE is_complete = 1 ORDER BY consensus_ns",
    )?;
    let rows = stmt
        .query_map([], |row| row.get(0))?
        .collect::<Result<Vec<i64>, _>>()?;
    Ok(rows)
}

pub fn balance_of(
    conn: &Connection,
    consensus_ns: i64,
    account: EntityId,
) -> Result<Option<i64>, ImporterError> {
    Ok(conn
        .query_row(
            "SELECT balance FROM account_balances
             WHERE consensus_ns = ?1 AND shard = ?2 AND realm = ?3 AND num = ?4",
            params![consensus_ns, account.shard, account.realm, account.num],
            |row| row.get(0),
        )
        .optional()?)
}
