//! Record file bookkeeping
//!
//! The unique `name` column is what makes re-ingesting a file a no-op.

use rusqlite::{params, Connection, OptionalExtension, Row};

use crate::error::ImporterError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordFileRow {
    pub id: i64,
    pub name: String,
    pub file_hash: String,
    pub prev_hash: Option<String>,
    pub format_version: i32,
    pub hapi_version: i32,
    pub consensus_start: Option<i64>,
    pub consensus_end: Option<i64>,
    pub entry_count: i64,
    pub load_start: i64,
    pub load_end: Option<i64>,
}

impl RecordFileRow {
    fn from_row(row: &Row) -> Result<Self, rusqlite::Error> {
        Ok(Self {
            id: row.get("id")?,
            name: row.get("name")?,
            file_hash: row.get("file_hash")?,
            prev_hash: row.get("prev_hash")?,
            format_version: row.get("format_version")?,
            hapi_version: row.get("hapi_version")?,
            consensus_start: row.get("consensus_start")?,
            consensus_end: row.get("consensus_end")?,
            entry_count: row.get("entry_count")?,
            load_start: row.get("load_start")?,
            load_end: row.get("load_end")?,
        })
    }
}

/// Input for opening a record file row
#[derive(Debug, Clone)]
pub struct NewRecordFile<'a> {
    pub name: &'a str,
    pub file_hash: &'a str,
    pub prev_hash: Option<&'a str>,
    pub format_version: i32,
    pub hapi_version: i32,
    pub load_start: i64,
}

pub fn exists(conn: &Connection, name: &str) -> Result<bool, ImporterError> {
    let found: Option<i64> = conn
        .query_row("SELECT id FROM record_files WHERE name = ?1", [name], |row| row.get(0))
        .optional()?;
    Ok(found.is_some())
}

/// Insert the row for a file being loaded and return its id.
pub fn insert(conn: &Connection, file: &NewRecordFile<'_>) -> Result<i64, ImporterError> {
    conn.execute(
        "INSERT INTO record_files (name, file_hash, prev_hash, format_version, hapi_version, load_start)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        params![
            file.name,
            file.file_hash,
            file.prev_hash,
            file.format_version,
            file.hapi_version,
            file.load_start
        ],
    )?;
    Ok(conn.last_insert_rowid())
}

pub fn complete(
    conn: &Connection,
    id: i64,
    consensus_start: Option<i64>,
    consensus_end: Option<i64>,
    entry_count: i64,
    load_end: i64,
) -> Result<(), ImporterError> {
    conn.execute(
        "UPDATE record_files SET consensus_start = ?1, consensus_end = ?2, entry_count = ?3, load_end = ?4
         WHERE id = ?5",
        params![consensus_start, consensus_end, entry_count, load_end, id],
    )?;
    Ok(())
}

pub fn find(conn: &Connection, name: &str) -> Result<Option<RecordFileRow>, ImporterError> {
    Ok(conn
        .query_row(
            "SELECT * FROM record_files WHERE name = ?1",
            [name],
            RecordFileRow::from_row,
        )
        .optional()?)
}

/// Highest consensus timestamp persisted so far
pub fn latest_consensus_end(conn: &Connection) -> Result<Option<i64>, ImporterError> {
    Ok(conn.query_row("SELECT MAX(consensus_end) FROM record_files", [], |row| row.get(0))?)
}
