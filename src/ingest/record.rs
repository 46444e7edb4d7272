//! Record file ingestion
//!
//! A record file moves through `Started -> FileOpen -> Apply* -> Committed`, or
//! `Aborted` when anything fails, in which case the SQLite transaction rolls
//! back and the checkpoint stays where it was.
//!
//! Each entry is classified into one `EntityChange` and applied by a single
//! match. Failed transactions keep their transaction and transfer rows but
//! change no entity, content or address book state.

use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use rusqlite::Connection;
use tracing::{debug, error, info, warn};

use super::{ProcessOutcome, StagedFile, StreamFileProcessor};
use crate::addressbook::{AddressBookUpdate, NetworkAddressBook};
use crate::config::ParserConfig;
use crate::db::entities::{self, EntityChanges};
use crate::db::record_files::{self, NewRecordFile};
use crate::db::transactions::{self, TransactionRow};
use crate::db::{address_book, file_data, now_ns, MirrorDb};
use crate::domain::{EntityId, EntityType, Timestamp, TransactionData};
use crate::error::ImporterError;
use crate::parser::record_file::{self, RecordEntry};

/// Entity effect of one successful transaction
#[derive(Debug, Clone, PartialEq, Eq)]
enum EntityChange<'a> {
    Create {
        entity: EntityId,
        entity_type: EntityType,
        fields: Fields<'a>,
        contents: Option<&'a [u8]>,
    },
    Update {
        entity: EntityId,
        entity_type: EntityType,
        fields: Fields<'a>,
        contents: Option<&'a [u8]>,
    },
    Append {
        file: EntityId,
        contents: &'a [u8],
    },
    Delete {
        entity: EntityId,
        entity_type: EntityType,
    },
    SystemDelete {
        entity: EntityId,
        entity_type: EntityType,
        expiration: Option<Timestamp>,
    },
    SystemUndelete {
        entity: EntityId,
        entity_type: EntityType,
    },
    Freeze,
    /// Referenced without changing any field
    Touch {
        entity: EntityId,
        entity_type: EntityType,
    },
    None,
}

/// Optional entity fields carried by create and update transactions
#[derive(Debug, Clone, Default, PartialEq, Eq)]
struct Fields<'a> {
    key: Option<&'a [u8]>,
    expiration: Option<Timestamp>,
    auto_renew_period: Option<i64>,
    proxy_account: Option<EntityId>,
}

impl<'a> EntityChange<'a> {
    fn classify(entry: &'a RecordEntry) -> Self {
        let receipt = &entry.record.receipt;
        match &entry.transaction.body.data {
            TransactionData::CryptoCreate {
                key,
                auto_renew_period_seconds,
                proxy_account,
                ..
            } => match receipt.account {
                Some(entity) => EntityChange::Create {
                    entity,
                    entity_type: EntityType::Account,
                    fields: Fields {
                        key: Some(key),
                        expiration: None,
                        auto_renew_period: *auto_renew_period_seconds,
                        proxy_account: *proxy_account,
                    },
                    contents: None,
                },
                None => EntityChange::None,
            },
            TransactionData::CryptoUpdate {
                account,
                key,
                expiration,
                auto_renew_period_seconds,
                proxy_account,
            } => EntityChange::Update {
                entity: *account,
                entity_type: EntityType::Account,
                fields: Fields {
                    key: key.as_deref(),
                    expiration: *expiration,
                    auto_renew_period: *auto_renew_period_seconds,
                    proxy_account: *proxy_account,
                },
                contents: None,
            },
            TransactionData::CryptoDelete { account, .. } => EntityChange::Delete {
                entity: *account,
                entity_type: EntityType::Account,
            },
            TransactionData::CryptoTransfer => EntityChange::None,
            TransactionData::FileCreate {
                contents,
                keys,
                expiration,
            } => match receipt.file {
                Some(entity) => EntityChange::Create {
                    entity,
                    entity_type: EntityType::File,
                    fields: Fields {
                        key: keys.as_deref(),
                        expiration: *expiration,
                        ..Default::default()
                    },
                    contents: Some(contents),
                },
                None => EntityChange::None,
            },
            TransactionData::FileAppend { file, contents } => EntityChange::Append {
                file: *file,
                contents,
            },
            TransactionData::FileUpdate {
                file,
                contents,
                keys,
                expiration,
            } => EntityChange::Update {
                entity: *file,
                entity_type: EntityType::File,
                fields: Fields {
                    key: keys.as_deref(),
                    expiration: *expiration,
                    ..Default::default()
                },
                // An update without new contents still records an empty row
                contents: Some(contents.as_deref().unwrap_or_default()),
            },
            TransactionData::FileDelete { file } => EntityChange::Delete {
                entity: *file,
                entity_type: EntityType::File,
            },
            TransactionData::ContractCreate {
                admin_key,
                auto_renew_period_seconds,
                proxy_account,
                ..
            } => match receipt.contract {
                Some(entity) => EntityChange::Create {
                    entity,
                    entity_type: EntityType::Contract,
                    fields: Fields {
                        key: admin_key.as_deref(),
                        expiration: None,
                        auto_renew_period: *auto_renew_period_seconds,
                        proxy_account: *proxy_account,
                    },
                    contents: None,
                },
                None => EntityChange::None,
            },
            TransactionData::ContractUpdate {
                contract,
                admin_key,
                expiration,
                auto_renew_period_seconds,
                proxy_account,
            } => EntityChange::Update {
                entity: *contract,
                entity_type: EntityType::Contract,
                fields: Fields {
                    key: admin_key.as_deref(),
                    expiration: *expiration,
                    auto_renew_period: *auto_renew_period_seconds,
                    proxy_account: *proxy_account,
                },
                contents: None,
            },
            TransactionData::ContractCall { contract, .. } => EntityChange::Touch {
                entity: *contract,
                entity_type: EntityType::Contract,
            },
            TransactionData::ContractDelete { contract } => EntityChange::Delete {
                entity: *contract,
                entity_type: EntityType::Contract,
            },
            TransactionData::SystemDelete {
                target,
                expiration_seconds,
            } => {
                let (entity, entity_type) = target.entity();
                EntityChange::SystemDelete {
                    entity,
                    entity_type,
                    expiration: expiration_seconds.map(|s| Timestamp::new(s, 0)),
                }
            }
            TransactionData::SystemUndelete { target } => {
                let (entity, entity_type) = target.entity();
                EntityChange::SystemUndelete { entity, entity_type }
            }
            TransactionData::Freeze { .. } => EntityChange::Freeze,
        }
    }

    /// Entity the transaction row points at
    fn target(&self) -> Option<(EntityId, EntityType)> {
        match *self {
            EntityChange::Create { entity, entity_type, .. }
            | EntityChange::Update { entity, entity_type, .. }
            | EntityChange::Delete { entity, entity_type }
            | EntityChange::SystemDelete { entity, entity_type, .. }
            | EntityChange::SystemUndelete { entity, entity_type }
            | EntityChange::Touch { entity, entity_type } => Some((entity, entity_type)),
            EntityChange::Append { file, .. } => Some((file, EntityType::File)),
            EntityChange::Freeze | EntityChange::None => None,
        }
    }
}

pub struct RecordFileProcessor {
    db: Arc<MirrorDb>,
    settings: ParserConfig,
    address_book_file: EntityId,
    address_book: Arc<NetworkAddressBook>,
}

impl RecordFileProcessor {
    pub fn new(
        db: Arc<MirrorDb>,
        settings: ParserConfig,
        address_book: Arc<NetworkAddressBook>,
    ) -> Result<Self, ImporterError> {
        let address_book_file = settings.address_book_entity()?;

        // Contents committed before a restart may never have been published
        if let Some(stored) = db.with_conn(|conn| address_book::contents(conn, address_book_file))? {
            if address_book.publish_contents(&stored)? {
                info!(file = %address_book_file, "Address book restored from ingested contents");
            }
        }

        Ok(Self {
            db,
            settings,
            address_book_file,
            address_book,
        })
    }

    /// Parse and persist one record file in a single transaction.
    pub fn ingest(&self, filename: &str, bytes: &[u8]) -> Result<ProcessOutcome, ImporterError> {
        let started = Instant::now();
        let file = record_file::decode(bytes).map_err(|source| ImporterError::Parse {
            filename: filename.to_string(),
            source,
        })?;
        debug!(filename, entries = file.entries.len(), version = file.version.tag(), "Record file started");

        let result = self.db.with_conn_mut(|conn| {
            if record_files::exists(conn, filename)? {
                return Ok(None);
            }

            let tx = conn.transaction()?;
            let previous_hash = file.previous_hash.map(|h| h.to_hex());
            let file_id = record_files::insert(
                &tx,
                &NewRecordFile {
                    name: filename,
                    file_hash: &file.file_hash.to_hex(),
                    prev_hash: previous_hash.as_deref(),
                    format_version: file.version.tag(),
                    hapi_version: file.hapi_version,
                    load_start: now_ns(),
                },
            )?;
            debug!(filename, file_id, "Record file open");

            let mut book_contents: Option<Vec<u8>> = None;
            let mut last_ns: Option<i64> = None;
            for (index, entry) in file.entries.iter().enumerate() {
                let consensus_ns = entry.consensus_ns();
                if last_ns.is_some_and(|last| consensus_ns <= last) {
                    return Err(ImporterError::Persistence {
                        filename: filename.to_string(),
                        reason: format!(
                            "entry {} consensus timestamp {} does not follow {}",
                            index,
                            consensus_ns,
                            last_ns.unwrap_or_default()
                        ),
                    });
                }
                last_ns = Some(consensus_ns);

                if let Some(update) = self.apply_entry(&tx, file_id, entry)? {
                    let mut contents = match book_contents.take() {
                        Some(contents) => contents,
                        None => self.stored_book_contents(&tx)?,
                    };
                    update.apply_to(&mut contents);
                    address_book::save(&tx, self.address_book_file, &contents, consensus_ns)?;
                    book_contents = Some(contents);
                }
            }

            record_files::complete(
                &tx,
                file_id,
                file.consensus_start(),
                file.consensus_end(),
                file.entries.len() as i64,
                now_ns(),
            )?;
            tx.commit()?;
            Ok(Some(book_contents))
        });

        let book_contents = match result {
            Ok(Some(book_contents)) => book_contents,
            Ok(None) => {
                info!(filename, "Record file already ingested, skipping");
                return Ok(ProcessOutcome::AlreadyIngested);
            }
            Err(e) => {
                warn!(filename, "Record file aborted: {}", e);
                return Err(match e {
                    ImporterError::Persistence { .. } => e,
                    other => ImporterError::Persistence {
                        filename: filename.to_string(),
                        reason: other.to_string(),
                    },
                });
            }
        };

        // The stored contents are republished on the next start if this fails
        if let Some(contents) = book_contents {
            if let Err(e) = self.address_book.publish_contents(&contents) {
                error!(filename, "Failed to publish address book: {}", e);
            }
        }

        info!(
            filename,
            entries = file.entries.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Record file committed"
        );
        Ok(ProcessOutcome::Committed {
            entries: file.entries.len(),
        })
    }

    fn stored_book_contents(&self, conn: &Connection) -> Result<Vec<u8>, ImporterError> {
        match address_book::contents(conn, self.address_book_file)? {
            Some(contents) => Ok(contents),
            None => self.address_book.contents(),
        }
    }

    fn persist_contents(&self, file: EntityId) -> bool {
        if file.num >= self.settings.system_file_threshold {
            self.settings.persist_files
        } else {
            self.settings.persist_system_files
        }
    }

    fn apply_entry(
        &self,
        conn: &Connection,
        record_file_id: i64,
        entry: &RecordEntry,
    ) -> Result<Option<AddressBookUpdate>, ImporterError> {
        let body = &entry.transaction.body;
        let record = &entry.record;
        let consensus_ns = entry.consensus_ns();

        let payer_id = entities::get_or_create(conn, body.transaction_id.payer, EntityType::Account)?;
        let node_id = entities::get_or_create(conn, body.node_account, EntityType::Account)?;

        let change = EntityChange::classify(entry);
        let target_id = change
            .target()
            .map(|(entity, entity_type)| entities::get_or_create(conn, entity, entity_type))
            .transpose()?;

        transactions::insert(
            conn,
            &TransactionRow {
                consensus_ns,
                type_code: body.data.transaction_type().code(),
                result: record.receipt.status.0,
                payer_account_id: payer_id,
                node_account_id: node_id,
                entity_id: target_id,
                charged_fee: record.transaction_fee as i64,
                max_fee: body.transaction_fee as i64,
                valid_start_ns: body.transaction_id.valid_start.to_nanos(),
                valid_duration_seconds: body.valid_duration_seconds,
                memo: body.memo.as_bytes().to_vec(),
                transaction_hash: record.transaction_hash.clone(),
                record_file_id,
            },
        )?;

        if self.settings.persist_crypto_transfer_amounts {
            for transfer in &record.transfer_list {
                let account_id = entities::get_or_create(conn, transfer.account, EntityType::Account)?;
                transactions::insert_transfer(conn, consensus_ns, account_id, transfer.amount)?;
            }
        }

        if !record.receipt.status.is_success() {
            return Ok(None);
        }

        let Some(target_id) = target_id else {
            return Ok(None);
        };
        self.apply_change(conn, consensus_ns, target_id, change)
    }

    fn apply_change(
        &self,
        conn: &Connection,
        consensus_ns: i64,
        target_id: i64,
        change: EntityChange<'_>,
    ) -> Result<Option<AddressBookUpdate>, ImporterError> {
        match change {
            EntityChange::Create {
                entity,
                fields,
                contents,
                ..
            }
            | EntityChange::Update {
                entity,
                fields,
                contents,
                ..
            } => {
                let proxy_account_id = fields
                    .proxy_account
                    .map(|proxy| entities::get_or_create(conn, proxy, EntityType::Account))
                    .transpose()?;
                entities::update(
                    conn,
                    target_id,
                    &EntityChanges {
                        key: fields.key.map(<[u8]>::to_vec),
                        expiration: fields.expiration,
                        auto_renew_period: fields.auto_renew_period,
                        proxy_account_id,
                        deleted: None,
                    },
                )?;

                let Some(contents) = contents else {
                    return Ok(None);
                };
                if self.persist_contents(entity) {
                    file_data::insert(conn, consensus_ns, target_id, contents)?;
                }
                // An update that leaves contents unchanged carries no address book data
                if entity == self.address_book_file && !contents.is_empty() {
                    return Ok(Some(AddressBookUpdate::Replace(contents.to_vec())));
                }
                Ok(None)
            }
            EntityChange::Append { file, contents } => {
                if self.persist_contents(file) {
                    file_data::insert(conn, consensus_ns, target_id, contents)?;
                }
                if file == self.address_book_file {
                    return Ok(Some(AddressBookUpdate::Append(contents.to_vec())));
                }
                Ok(None)
            }
            EntityChange::Delete { .. } => {
                entities::update(
                    conn,
                    target_id,
                    &EntityChanges {
                        deleted: Some(true),
                        ..Default::default()
                    },
                )?;
                Ok(None)
            }
            EntityChange::SystemDelete { expiration, .. } => {
                entities::update(
                    conn,
                    target_id,
                    &EntityChanges {
                        expiration,
                        deleted: Some(true),
                        ..Default::default()
                    },
                )?;
                Ok(None)
            }
            EntityChange::SystemUndelete { .. } => {
                entities::update(
                    conn,
                    target_id,
                    &EntityChanges {
                        deleted: Some(false),
                        ..Default::default()
                    },
                )?;
                Ok(None)
            }
            EntityChange::Freeze | EntityChange::Touch { .. } | EntityChange::None => Ok(None),
        }
    }
}

#[async_trait]
impl StreamFileProcessor for RecordFileProcessor {
    async fn process(&self, file: &StagedFile) -> Result<ProcessOutcome, ImporterError> {
        let bytes = tokio::fs::read(&file.path).await?;
        self.ingest(&file.filename, &bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{
        ResponseCode, SystemTarget, Transaction, TransactionBody, TransactionId, TransactionReceipt,
        TransactionRecord,
    };

    fn entry(data: TransactionData, receipt_file: Option<EntityId>) -> RecordEntry {
        RecordEntry {
            transaction: Transaction {
                body: TransactionBody {
                    transaction_id: TransactionId {
                        payer: EntityId::new(0, 0, 2),
                        valid_start: Timestamp::new(1, 0),
                    },
                    node_account: EntityId::new(0, 0, 3),
                    transaction_fee: 10,
                    valid_duration_seconds: 120,
                    memo: String::new(),
                    data,
                },
                signatures: vec![],
            },
            record: TransactionRecord {
                receipt: TransactionReceipt {
                    status: ResponseCode::SUCCESS,
                    account: None,
                    file: receipt_file,
                    contract: None,
                },
                consensus_timestamp: Timestamp::new(2, 0),
                transaction_hash: vec![],
                memo: String::new(),
                transaction_fee: 5,
                transfer_list: vec![],
            },
        }
    }

    #[test]
    fn test_file_update_without_contents_writes_empty_row() {
        let file = EntityId::new(0, 0, 1001);
        let e = entry(
            TransactionData::FileUpdate {
                file,
                contents: None,
                keys: None,
                expiration: Some(Timestamp::new(100, 0)),
            },
            None,
        );
        match EntityChange::classify(&e) {
            EntityChange::Update { contents, fields, .. } => {
                assert_eq!(contents, Some(&[][..]));
                assert_eq!(fields.expiration, Some(Timestamp::new(100, 0)));
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_create_without_receipt_entity_changes_nothing() {
        let e = entry(
            TransactionData::FileCreate {
                contents: vec![1],
                keys: None,
                expiration: None,
            },
            None,
        );
        assert_eq!(EntityChange::classify(&e), EntityChange::None);
        assert_eq!(EntityChange::classify(&e).target(), None);
    }

    #[test]
    fn test_system_targets() {
        let contract = EntityId::new(0, 0, 1002);
        let e = entry(
            TransactionData::SystemDelete {
                target: SystemTarget::Contract(contract),
                expiration_seconds: Some(1_600_000_000),
            },
            None,
        );
        assert_eq!(
            EntityChange::classify(&e).target(),
            Some((contract, EntityType::Contract))
        );
        let freeze = entry(
            TransactionData::Freeze {
                start_hour: 1,
                start_min: 0,
                end_hour: 2,
                end_min: 0,
            },
            None,
        );
        assert_eq!(EntityChange::classify(&freeze), EntityChange::Freeze);
    }
}
