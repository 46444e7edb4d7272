//! Transaction and crypto transfer rows

use rusqlite::{params, Connection, OptionalExtension, Row};

use crate::error::ImporterError;

/// Transaction row, keyed by consensus timestamp
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransactionRow {
    pub consensus_ns: i64,
    pub type_code: i32,
    pub result: i32,
    pub payer_account_id: i64,
    pub node_account_id: i64,
    pub entity_id: Option<i64>,
    pub charged_fee: i64,
    pub max_fee: i64,
    pub valid_start_ns: i64,
    pub valid_duration_seconds: i64,
    pub memo: Vec<u8>,
    pub transaction_hash: Vec<u8>,
    pub record_file_id: i64,
}

impl TransactionRow {
    fn from_row(row: &Row) -> Result<Self, rusqlite::Error> {
        Ok(Self {
            consensus_ns: row.get("consensus_ns")?,
            type_code: row.get("type")?,
            result: row.get("result")?,
            payer_account_id: row.get("payer_account_id")?,
            node_account_id: row.get("node_account_id")?,
            entity_id: row.get("entity_id")?,
            charged_fee: row.get("charged_fee")?,
            max_fee: row.get("max_fee")?,
            valid_start_ns: row.get("valid_start_ns")?,
            valid_duration_seconds: row.get("valid_duration_seconds")?,
            memo: row.get("memo")?,
            transaction_hash: row.get("transaction_hash")?,
            record_file_id: row.get("record_file_id")?,
        })
    }
}

/// Insert a transaction; a duplicate consensus timestamp is an error.
pub fn insert(conn: &Connection, tx: &TransactionRow) -> Result<(), ImporterError> {
    conn.execute(
        "INSERT INTO transactions (
             consensus_ns, type, result, payer_account_id, node_account_id, entity_id,
             charged_fee, max_fee, valid_start_ns, valid_duration_seconds, memo,
             transaction_hash, record_file_id
         ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)",
        params![
            tx.consensus_ns,
            tx.type_code,
            tx.result,
            tx.payer_account_id,
            tx.node_account_id,
            tx.entity_id,
            tx.charged_fee,
            tx.max_fee,
            tx.valid_start_ns,
            tx.valid_duration_seconds,
            tx.memo,
            tx.transaction_hash,
            tx.record_file_id,
        ],
    )?;
    Ok(())
}

pub fn find(conn: &Connection, consensus_ns: i64) -> Result<Option<TransactionRow>, ImporterError> {
    Ok(conn
        .query_row(
            "SELECT * FROM transactions WHERE consensus_ns = ?1",
            [consensus_ns],
            TransactionRow::from_row,
        )
        .optional()?)
}

pub fn count(conn: &Connection) -> Result<i64, ImporterError> {
    Ok(conn.query_row("SELECT COUNT(*) FROM transactions", [], |row| row.get(0))?)
}

pub fn insert_transfer(
    conn: &Connection,
    consensus_ns: i64,
    entity_id: i64,
    amount: i64,
) -> Result<(), ImporterError> {
    conn.execute(
        "INSERT INTO crypto_transfers (consensus_ns, entity_id, amount) VALUES (?1, ?2, ?3)",
        params![consensus_ns, entity_id, amount],
    )?;
    Ok(())
}

/// (entity row id, amount) pairs of one transaction
pub fn transfers_for(conn: &Connection, consensus_ns: i64) -> Result<Vec<(i64, i64)>, ImporterError> {
    let mut stmt = conn.prepare(
        "SELECT entity_id, amount FROM crypto_transfers WHERE consensus_ns = ?1 ORDER BY rowid",
    )?;
    let rows = stmt
        .query_map([consensus_ns], |row| Ok((row.get(0)?, row.get(1)?)))?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

pub fn count_transfers(conn: &Connection) -> Result<i64, ImporterError> {
    Ok(conn.query_row("SELECT COUNT(*) FROM crypto_transfers", [], |row| row.get(0))?)
}
