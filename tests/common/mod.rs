//! Shared fixtures: a simulated network of signing nodes writing stream files
//! into a local bucket, plus builders for record file entries.

#![allow(dead_code)]

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

use ed25519_dalek::{Signer, SigningKey};
use tempfile::TempDir;

use mirror_importer::addressbook::{AddressBook, NetworkAddressBook, NodePublicKey};
use mirror_importer::config::Config;
use mirror_importer::db::MirrorDb;
use mirror_importer::domain::{
    AccountAmount, EntityId, FileHash, ResponseCode, StreamType, Timestamp, Transaction,
    TransactionBody, TransactionData, TransactionId, TransactionReceipt, TransactionRecord,
};
use mirror_importer::downloader::{Downloader, DownloaderSettings, FsObjectStore, SignatureFile};
use mirror_importer::ingest::{BalanceFileProcessor, RecordFileProcessor};
use mirror_importer::parser::record_file::{self, FormatVersion, RecordEntry};

pub const BUCKET: &str = "test-streams";

pub const PAYER: EntityId = EntityId::new(0, 0, 2);
pub const NODE: EntityId = EntityId::new(0, 0, 3);
pub const FEE_COLLECTOR: EntityId = EntityId::new(0, 0, 98);

/// Nodes `0.0.3`, `0.0.4`, ... with deterministic Ed25519 keys
pub struct Network {
    pub dir: TempDir,
    pub keys: Vec<SigningKey>,
}

impl Network {
    pub fn new(nodes: u8) -> Self {
        let keys = (0..nodes)
            .map(|i| SigningKey::from_bytes(&[i + 1; 32]))
            .collect();
        Self {
            dir: TempDir::new().unwrap(),
            keys,
        }
    }

    pub fn node_id(&self, index: usize) -> String {
        format!("0.0.{}", index + 3)
    }

    pub fn bucket_root(&self) -> PathBuf {
        self.dir.path().join("buckets")
    }

    pub fn data_path(&self) -> PathBuf {
        self.dir.path().join("data")
    }

    pub fn address_book(&self) -> AddressBook {
        let nodes: BTreeMap<String, NodePublicKey> = self
            .keys
            .iter()
            .enumerate()
            .map(|(i, key)| (self.node_id(i), NodePublicKey::ed25519(key.verifying_key())))
            .collect();
        AddressBook::new(1, nodes)
    }

    pub fn network_address_book(&self) -> Arc<NetworkAddressBook> {
        Arc::new(NetworkAddressBook::in_memory(self.address_book()))
    }

    pub fn config(&self) -> Config {
        let mut config = Config::default();
        config.importer.data_path = self.data_path();
        config.importer.db_path = self.data_path().join("mirror.db");
        config.importer.address_book_path = self.data_path().join("addressbook.json");
        config.downloader.bucket_name = BUCKET.to_string();
        config.downloader.bucket_root = self.bucket_root();
        config.downloader.fetch_retry_backoff_ms = 0;
        config
    }

    pub fn store(&self) -> Arc<FsObjectStore> {
        Arc::new(FsObjectStore::new(self.bucket_root()))
    }

    fn stream_dir(&self, node: usize, stream_type: StreamType) -> PathBuf {
        let dir = self
            .bucket_root()
            .join(BUCKET)
            .join(self.node_id(node))
            .join(stream_type.path());
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    pub fn signature(&self, node: usize, data: &[u8]) -> Vec<u8> {
        let hash = FileHash::digest(data);
        SignatureFile {
            file_hash: hash,
            signature: self.keys[node].sign(hash.as_bytes()).to_bytes().to_vec(),
        }
        .encode()
    }

    /// Upload the data file and a valid signature from each signer.
    pub fn upload(&self, stream_type: StreamType, filename: &str, data: &[u8], signers: &[usize]) {
        for &node in signers {
            self.put(node, stream_type, filename, data);
            self.put(node, stream_type, &format!("{}_sig", filename), &self.signature(node, data));
        }
    }

    pub fn upload_all(&self, stream_type: StreamType, filename: &str, data: &[u8]) {
        let all: Vec<usize> = (0..self.keys.len()).collect();
        self.upload(stream_type, filename, data, &all);
    }

    pub fn put(&self, node: usize, stream_type: StreamType, name: &str, bytes: &[u8]) {
        std::fs::write(self.stream_dir(node, stream_type).join(name), bytes).unwrap();
    }

    pub fn object_path(&self, node: usize, stream_type: StreamType, name: &str) -> PathBuf {
        self.stream_dir(node, stream_type).join(name)
    }

    pub fn downloader(
        &self,
        config: &Config,
        stream_type: StreamType,
        db: Arc<MirrorDb>,
        book: Arc<NetworkAddressBook>,
    ) -> Downloader {
        Downloader::new(
            DownloaderSettings::from_config(config, stream_type),
            self.store(),
            db,
            book,
        )
        .unwrap()
    }
}

pub fn record_processor(
    db: Arc<MirrorDb>,
    config: &Config,
    book: Arc<NetworkAddressBook>,
) -> RecordFileProcessor {
    RecordFileProcessor::new(db, config.parser.clone(), book).unwrap()
}

pub fn balance_processor(db: Arc<MirrorDb>) -> BalanceFileProcessor {
    BalanceFileProcessor::new(db)
}

pub fn record_filename(second: u32) -> String {
    format!("2019-08-30T18_10_{:02}.000000Z.rcd", second)
}

pub fn balance_filename(minute: u32) -> String {
    format!("2019-08-30T18_{:02}_00.000000Z_Balances.csv", minute)
}

pub fn balance_snapshot(minute: u32, balances: &[(i64, i64)]) -> Vec<u8> {
    let mut out = format!(
        "TimeStamp:2019-08-30T18:{:02}:00.000000Z\nshardNum,realmNum,accountNum,balance\n",
        minute
    );
    for (num, balance) in balances {
        out.push_str(&format!("0,0,{},{}\n", num, balance));
    }
    out.into_bytes()
}

/// Builder for one (transaction, record) pair
pub struct EntryBuilder {
    data: TransactionData,
    consensus: Timestamp,
    status: ResponseCode,
    receipt_account: Option<EntityId>,
    receipt_file: Option<EntityId>,
    receipt_contract: Option<EntityId>,
    transfers: Vec<AccountAmount>,
    memo: String,
}

impl EntryBuilder {
    pub fn new(data: TransactionData, consensus_seconds: i64) -> Self {
        Self {
            data,
            consensus: Timestamp::new(consensus_seconds, 0),
            status: ResponseCode::SUCCESS,
            receipt_account: None,
            receipt_file: None,
            receipt_contract: None,
            transfers: vec![
                AccountAmount { account: PAYER, amount: -100 },
                AccountAmount { account: NODE, amount: 20 },
                AccountAmount { account: FEE_COLLECTOR, amount: 80 },
            ],
            memo: String::new(),
        }
    }

    pub fn consensus(mut self, timestamp: Timestamp) -> Self {
        self.consensus = timestamp;
        self
    }

    pub fn status(mut self, status: ResponseCode) -> Self {
        self.status = status;
        self
    }

    pub fn created_account(mut self, id: EntityId) -> Self {
        self.receipt_account = Some(id);
        self
    }

    pub fn created_file(mut self, id: EntityId) -> Self {
        self.receipt_file = Some(id);
        self
    }

    pub fn created_contract(mut self, id: EntityId) -> Self {
        self.receipt_contract = Some(id);
        self
    }

    pub fn transfers(mut self, transfers: Vec<AccountAmount>) -> Self {
        self.transfers = transfers;
        self
    }

    pub fn memo(mut self, memo: &str) -> Self {
        self.memo = memo.to_string();
        self
    }

    pub fn build(self) -> RecordEntry {
        RecordEntry {
            transaction: Transaction {
                body: TransactionBody {
                    transaction_id: TransactionId {
                        payer: PAYER,
                        valid_start: Timestamp::new(self.consensus.seconds - 10, 0),
                    },
                    node_account: NODE,
                    transaction_fee: 1_000,
                    valid_duration_seconds: 120,
                    memo: self.memo.clone(),
                    data: self.data,
                },
                signatures: vec![vec![0xAB; 64]],
            },
            record: TransactionRecord {
                receipt: TransactionReceipt {
                    status: self.status,
                    account: self.receipt_account,
                    file: self.receipt_file,
                    contract: self.receipt_contract,
                },
                consensus_timestamp: self.consensus,
                transaction_hash: vec![0xCD; 48],
                memo: self.memo,
                transaction_fee: 100,
                transfer_list: self.transfers,
            },
        }
    }
}

pub fn transfer_entry(consensus_seconds: i64) -> RecordEntry {
    EntryBuilder::new(TransactionData::CryptoTransfer, consensus_seconds).build()
}

pub fn v2_file(previous: Option<FileHash>, entries: &[RecordEntry]) -> Vec<u8> {
    record_file::encode(FormatVersion::V2, 3, previous, entries).unwrap()
}

pub fn v1_file(entries: &[RecordEntry]) -> Vec<u8> {
    record_file::encode(FormatVersion::V1, 2, None, entries).unwrap()
}
