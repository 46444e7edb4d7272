//! Accumulated address book file contents
//!
//! Written in the same transaction as the record file that changed them, so a
//! restart between an update and its appends resumes from the stored bytes.

use rusqlite::{params, Connection, OptionalExtension};

use crate::domain::EntityId;
use crate::error::ImporterError;

pub fn contents(conn: &Connection, file: EntityId) -> Result<Option<Vec<u8>>, ImporterError> {
    Ok(conn
        .query_row(
            "SELECT contents FROM address_book_contents
             WHERE shard = ?1 AND realm = ?2 AND num = ?3",
            params![file.shard, file.realm, file.num],
            |row| row.get(0),
        )
        .optional()?)
}

pub fn save(
    conn: &Connection,
    file: EntityId,
    contents: &[u8],
    consensus_ns: i64,
) -> Result<(), ImporterError> {
    conn.execute(
        "INSERT INTO address_book_contents (shard, realm, num, contents, consensus_ns)
         VALUES (?1, ?2, ?3, ?4, ?5)
         ON CONFLICT(shard, realm, num) DO UPDATE SET
             contents = excluded.contents,
             consensus_ns = excluded.consensus_ns",
        params![file.shard, file.realm, file.num, contents, consensus_ns],
    )?;
    Ok(())
}
