//! Entity operations
//!
//! Entities are created on first reference and never removed; deletion only
//! sets the `deleted` flag.

use rusqlite::{params, Connection, OptionalExtension, Row};

use crate::domain::{EntityId, EntityType, Timestamp};
use crate::error::ImporterError;

/// Entity row from database
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntityRow {
    pub id: i64,
    pub entity: EntityId,
    pub entity_type: Option<EntityType>,
    pub key: Option<Vec<u8>>,
    pub exp_time_seconds: Option<i64>,
    pub exp_time_nanos: Option<i32>,
    pub exp_time_ns: Option<i64>,
    pub auto_renew_period: Option<i64>,
    pub proxy_account_id: Option<i64>,
    pub deleted: bool,
}

impl EntityRow {
    fn from_row(row: &Row) -> Result<Self, rusqlite::Error> {
        Ok(Self {
            id: row.get("id")?,
            entity: EntityId::new(row.get("shard")?, row.get("realm")?, row.get("num")?),
            entity_type: EntityType::from_id(row.get("type_id")?),
            key: row.get("key")?,
            exp_time_seconds: row.get("exp_time_seconds")?,
            exp_time_nanos: row.get("exp_time_nanos")?,
            exp_time_ns: row.get("exp_time_ns")?,
            auto_renew_period: row.get("auto_renew_period")?,
            proxy_account_id: row.get("proxy_account_id")?,
            deleted: row.get("deleted")?,
        })
    }
}

/// Field changes applied to an existing entity; `None` leaves a column as is
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EntityChanges {
    pub key: Option<Vec<u8>>,
    pub expiration: Option<Timestamp>,
    pub auto_renew_period: Option<i64>,
    pub proxy_account_id: Option<i64>,
    pub deleted: Option<bool>,
}

impl EntityChanges {
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

/// Return the row id of an entity, inserting it on first reference.
pub fn get_or_create(
    conn: &Connection,
    entity: EntityId,
    entity_type: EntityType,
) -> Result<i64, ImporterError> {
    conn.execute(
        "INSERT INTO entities (shard, realm, num, type_id) VALUES (?1, ?2, ?3, ?4)
         ON CONFLICT(shard, realm, num) DO NOTHING",
        params![entity.shard, entity.realm, entity.num, entity_type.id()],
    )?;
    let id = conn.query_row(
        "SELECT id FROM entities WHERE shard = ?1 AND realm = ?2 AND num = ?3",
        params![entity.shard, entity.realm, entity.num],
        |row| row.get(0),
    )?;
    Ok(id)
}

pub fn find(conn: &Connection, entity: EntityId) -> Result<Option<EntityRow>, ImporterError> {
    Ok(conn
        .query_row(
            "SELECT * FROM entities WHERE shard = ?1 AND realm = ?2 AND num = ?3",
            params![entity.shard, entity.realm, entity.num],
            EntityRow::from_row,
        )
        .optional()?)
}

pub fn update(conn: &Connection, id: i64, changes: &EntityChanges) -> Result<(), ImporterError> {
    if changes.is_empty() {
        return Ok(());
    }
    let (seconds, nanos, total) = match changes.expiration {
        Some(exp) => (Some(exp.seconds), Some(exp.nanos), Some(exp.to_nanos())),
        None => (None, None, None),
    };
    conn.execute(
        "UPDATE entities SET
             key = COALESCE(?1, key),
             exp_time_seconds = COALESCE(?2, exp_time_seconds),
             exp_time_nanos = COALESCE(?3, exp_time_nanos),
             exp_time_ns = COALESCE(?4, exp_time_ns),
             auto_renew_period = COALESCE(?5, auto_renew_period),
             proxy_account_id = COALESCE(?6, proxy_account_id),
             deleted = COALESCE(?7, deleted)
         WHERE id = ?8",
        params![
            changes.key,
            seconds,
            nanos,
            total,
            changes.auto_renew_period,
            changes.proxy_account_id,
            changes.deleted,
            id
        ],
    )?;
    Ok(())
}

pub fn count(conn: &Connection) -> Result<i64, ImporterError> {
    Ok(conn.query_row("SELECT COUNT(*) FROM entities", [], |row| row.get(0))?)
}
