//! Database schema definitions

use rusqlite::Connection;
use tracing::info;

use crate::error::ImporterError;

/// Current schema version for migrations
pub const SCHEMA_VERSION: i32 = 1;

/// Initialize the database schema
pub fn init_schema(conn: &Connection) -> Result<(), ImporterError> {
    let current_version = get_schema_version(conn)?;

    if current_version == 0 {
        info!("Creating new database schema v{}", SCHEMA_VERSION);
        conn.execute_batch(STATUS_SCHEMA)?;
        conn.execute_batch(LEDGER_SCHEMA)?;
        conn.execute_batch(BALANCE_SCHEMA)?;
        conn.execute_batch(INDEXES_SCHEMA)?;
        set_schema_version(conn, SCHEMA_VERSION)?;
    } else if current_version > SCHEMA_VERSION {
        return Err(ImporterError::Internal(format!(
            "Database schema v{} is newer than supported v{}",
            current_version, SCHEMA_VERSION
        )));
    } else {
        info!("Database schema is up to date (v{})", current_version);
    }

    Ok(())
}

/// Get current schema version (0 if not initialized)
fn get_schema_version(conn: &Connection) -> Result<i32, ImporterError> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS schema_version (version INTEGER NOT NULL)",
        [],
    )?;

    let version: i32 = conn
        .query_row("SELECT version FROM schema_version LIMIT 1", [], |row| row.get(0))
        .unwrap_or(0);

    Ok(version)
}

fn set_schema_version(conn: &Connection, version: i32) -> Result<(), ImporterError> {
    conn.execute("DELETE FROM schema_version", [])?;
    conn.execute("INSERT INTO schema_version (version) VALUES (?)", [version])?;
    Ok(())
}

/// Checkpoint status codes
const STATUS_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS application_status (
    status_code TEXT PRIMARY KEY,
    status_value TEXT NOT NULL,
    updated_at TEXT NOT NULL
);
"#;

/// Record files and the ledger state decoded from them
const LEDGER_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS record_files (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    name TEXT NOT NULL UNIQUE,
    file_hash TEXT NOT NULL,
    prev_hash TEXT,
    format_version INTEGER NOT NULL,
    hapi_version INTEGER NOT NULL,
    consensus_start INTEGER,
    consensus_end INTEGER,
    entry_count INTEGER NOT NULL DEFAULT 0,
    load_start INTEGER NOT NULL,
    load_end INTEGER
);

CREATE TABLE IF NOT EXISTS entities (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    shard INTEGER NOT NULL,
    realm INTEGER NOT NULL,
    num INTEGER NOT NULL,
    type_id INTEGER NOT NULL,
    key BLOB,
    exp_time_seconds INTEGER,
    exp_time_nanos INTEGER,
    exp_time_ns INTEGER,
    auto_renew_period INTEGER,
    proxy_account_id INTEGER REFERENCES entities(id),
    deleted INTEGER NOT NULL DEFAULT 0,
    UNIQUE(shard, realm, num)
);

CREATE TABLE IF NOT EXISTS transactions (
    consensus_ns INTEGER PRIMARY KEY,
    type INTEGER NOT NULL,
    result INTEGER NOT NULL,
    payer_account_id INTEGER NOT NULL REFERENCES entities(id),
    node_account_id INTEGER NOT NULL REFERENCES entities(id),
    entity_id INTEGER REFERENCES entities(id),
    charged_fee INTEGER NOT NULL,
    max_fee INTEGER NOT NULL,
    valid_start_ns INTEGER NOT NULL,
    valid_duration_seconds INTEGER,
    memo BLOB,
    transaction_hash BLOB,
    record_file_id INTEGER NOT NULL REFERENCES record_files(id)
);

CREATE TABLE IF NOT EXISTS crypto_transfers (
    consensus_ns INTEGER NOT NULL REFERENCES transactions(consensus_ns),
    entity_id INTEGER NOT NULL REFERENCES entities(id),
    amount INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS file_data (
    consensus_ns INTEGER NOT NULL REFERENCES transactions(consensus_ns),
    entity_id INTEGER NOT NULL REFERENCES entities(id),
    contents BLOB NOT NULL
);

CREATE TABLE IF NOT EXISTS address_book_contents (
    shard INTEGER NOT NULL,
    realm INTEGER NOT NULL,
    num INTEGER NOT NULL,
    contents BLOB NOT NULL,
    consensus_ns INTEGER NOT NULL,
    PRIMARY KEY (shard, realm, num)
);
"#;

/// Account balance snapshots
const BALANCE_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS account_balance_sets (
    consensus_ns INTEGER PRIMARY KEY,
    file_name TEXT NOT NULL,
    is_complete INTEGER NOT NULL DEFAULT 0,
    processing_start INTEGER NOT NULL,
    processing_end INTEGER
);

CREATE TABLE IF NOT EXISTS account_balances (
    consensus_ns INTEGER NOT NULL REFERENCES account_balance_sets(consensus_ns),
    shard INTEGER NOT NULL,
    realm INTEGER NOT NULL,
    num INTEGER NOT NULL,
    balance INTEGER NOT NULL,
    PRIMARY KEY (consensus_ns, shard, realm, num)
);
"#;

const INDEXES_SCHEMA: &str = r#"
CREATE INDEX IF NOT EXISTS idx_transactions_payer ON transactions(payer_account_id);
CREATE INDEX IF NOT EXISTS idx_transactions_record_file ON transactions(record_file_id);
CREATE INDEX IF NOT EXISTS idx_crypto_transfers_ts ON crypto_transfers(consensus_ns);
CREATE INDEX IF NOT EXISTS idx_file_data_entity ON file_data(entity_id, consensus_ns);
"#;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_is_repeatable() {
        let conn = Connection::open_in_memory().unwrap();
        init_schema(&conn).unwrap();
        init_schema(&conn).unwrap();
        let version: i32 = conn
            .query_row("SELECT version FROM schema_version", [], |row| row.get(0))
            .unwrap();
        assert_eq!(version, SCHEMA_VERSION);
    }
}
