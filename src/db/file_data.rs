//! File contents written by file create, append and update transactions

use rusqlite::{params, Connection};

use crate::error::ImporterError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileDataRow {
    pub consensus_ns: i64,
    pub entity_id: i64,
    pub contents: Vec<u8>,
}

pub fn insert(
    conn: &Connection,
    consensus_ns: i64,
    entity_id: i64,
    contents: &[u8],
) -> Result<(), ImporterError> {
    conn.execute(
        "INSERT INTO file_data (consensus_ns, entity_id, contents) VALUES (?1, ?2, ?3)",
        params![consensus_ns, entity_id, contents],
    )?;
    Ok(())
}

/// Content rows of one file entity in consensus order
pub fn list_for_entity(conn: &Connection, entity_id: i64) -> Result<Vec<FileDataRow>, ImporterError> {
    let mut stmt = conn.prepare(
        "SELECT consensus_ns, entity_id, contents FROM file_data
         WHERE entity_id = ?1 ORDER BY consensus_ns",
    )?;
    let rows = stmt
        .query_map([entity_id], |row| {
            Ok(FileDataRow {
                consensus_ns: row.get(0)?,
                entity_id: row.get(1)?,
                contents: row.get(2)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

pub fn count(conn: &Connection) -> Result<i64, ImporterError> {
    Ok(conn.query_row("SELECT COUNT(*) FROM file_data", [], |row| row.get(0))?)
}
