//! Ledger domain types shared by the downloader, parser and ingester
//!
//! Handles:
//! - Entity identifiers and timestamps as they appear in stream files
//! - Stream types, their storage layout and checkpoint status codes
//! - Stream filenames, which encode the consensus instant they cover

pub mod transaction;

use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

use chrono::DateTime;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha384};

pub use transaction::{
    AccountAmount, ResponseCode, SystemTarget, Transaction, TransactionBody, TransactionData,
    TransactionId, TransactionReceipt, TransactionRecord, TransactionType,
};

/// Size of a stream file digest (SHA-384)
pub const HASH_SIZE: usize = 48;

/// Suffix appended to a data filename to name its signature file
pub const SIGNATURE_SUFFIX: &str = "_sig";

/// SHA-384 digest of a stream file
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FileHash(pub [u8; HASH_SIZE]);

impl FileHash {
    pub const ZERO: FileHash = FileHash([0u8; HASH_SIZE]);

    /// Digest of the full byte content, independent of format version
    pub fn digest(data: &[u8]) -> Self {
        let mut hasher = Sha384::new();
        hasher.update(data);
        let mut out = [0u8; HASH_SIZE];
        out.copy_from_slice(&hasher.finalize());
        FileHash(out)
    }

    pub fn from_slice(bytes: &[u8]) -> Option<Self> {
        let arr: [u8; HASH_SIZE] = bytes.try_into().ok()?;
        Some(FileHash(arr))
    }

    pub fn from_hex(s: &str) -> Option<Self> {
        let bytes = hex::decode(s.trim()).ok()?;
        Self::from_slice(&bytes)
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Debug for FileHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "FileHash({}...)", &self.to_hex()[..12])
    }
}

impl fmt::Display for FileHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

/// Shard.realm.num identifier of an account, file or contract
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EntityId {
    pub shard: i64,
    pub realm: i64,
    pub num: i64,
}

impl EntityId {
    pub const fn new(shard: i64, realm: i64, num: i64) -> Self {
        Self { shard, realm, num }
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.shard, self.realm, self.num)
    }
}

impl FromStr for EntityId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parts: Vec<&str> = s.trim().split('.').collect();
        if parts.len() != 3 {
            return Err(format!("Invalid entity id '{}': expected shard.realm.num", s));
        }
        let parse = |p: &str| {
            p.parse::<i64>()
                .map_err(|e| format!("Invalid entity id '{}': {}", s, e))
        };
        Ok(Self {
            shard: parse(parts[0])?,
            realm: parse(parts[1])?,
            num: parse(parts[2])?,
        })
    }
}

/// Kind of ledger entity, stored as the entity type id
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EntityType {
    Account = 1,
    Contract = 2,
    File = 3,
}

impl EntityType {
    pub fn id(self) -> i64 {
        self as i64
    }

    pub fn from_id(id: i64) -> Option<Self> {
        match id {
            1 => Some(EntityType::Account),
            2 => Some(EntityType::Contract),
            3 => Some(EntityType::File),
            _ => None,
        }
    }
}

/// Seconds + nanos instant as carried in transactions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Timestamp {
    pub seconds: i64,
    pub nanos: i32,
}

impl Timestamp {
    pub const fn new(seconds: i64, nanos: i32) -> Self {
        Self { seconds, nanos }
    }

    /// Nanoseconds since the epoch, saturating instead of wrapping.
    pub fn to_nanos(&self) -> i64 {
        self.seconds
            .checked_mul(1_000_000_000)
            .and_then(|ns| ns.checked_add(i64::from(self.nanos)))
            .unwrap_or(if self.seconds < 0 { i64::MIN } else { i64::MAX })
    }

    pub fn from_nanos(ns: i64) -> Self {
        Self {
            seconds: ns.div_euclid(1_000_000_000),
            nanos: ns.rem_euclid(1_000_000_000) as i32,
        }
    }
}

/// Stream of files uploaded by every node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StreamType {
    Record,
    Balance,
}

impl StreamType {
    /// Directory under each node prefix, and under the data path
    pub fn path(self) -> &'static str {
        match self {
            StreamType::Record => "recordstreams",
            StreamType::Balance => "accountBalances",
        }
    }

    pub fn data_suffix(self) -> &'static str {
        match self {
            StreamType::Record => ".rcd",
            StreamType::Balance => "_Balances.csv",
        }
    }

    pub fn last_valid_file_code(self) -> ApplicationStatusCode {
        match self {
            StreamType::Record => ApplicationStatusCode::LastValidDownloadedRecordFile,
            StreamType::Balance => ApplicationStatusCode::LastValidDownloadedBalanceFile,
        }
    }

    pub fn last_valid_hash_code(self) -> ApplicationStatusCode {
        match self {
            StreamType::Record => ApplicationStatusCode::LastValidDownloadedRecordFileHash,
            StreamType::Balance => ApplicationStatusCode::LastValidDownloadedBalanceFileHash,
        }
    }

    pub fn bypass_code(self) -> ApplicationStatusCode {
        match self {
            StreamType::Record => ApplicationStatusCode::RecordHashMismatchBypassUntilAfter,
            StreamType::Balance => ApplicationStatusCode::BalanceHashMismatchBypassUntilAfter,
        }
    }
}

impl fmt::Display for StreamType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StreamType::Record => write!(f, "record"),
            StreamType::Balance => write!(f, "balance"),
        }
    }
}

impl FromStr for StreamType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "record" | "records" | "recordstreams" => Ok(StreamType::Record),
            "balance" | "balances" | "accountbalances" => Ok(StreamType::Balance),
            other => Err(format!("Unknown stream type '{}'", other)),
        }
    }
}

/// Well-known keys of the checkpoint store
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ApplicationStatusCode {
    LastValidDownloadedRecordFile,
    LastValidDownloadedRecordFileHash,
    RecordHashMismatchBypassUntilAfter,
    LastValidDownloadedBalanceFile,
    LastValidDownloadedBalanceFileHash,
    BalanceHashMismatchBypassUntilAfter,
}

impl ApplicationStatusCode {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::LastValidDownloadedRecordFile => "LAST_VALID_DOWNLOADED_RECORD_FILE",
            Self::LastValidDownloadedRecordFileHash => "LAST_VALID_DOWNLOADED_RECORD_FILE_HASH",
            Self::RecordHashMismatchBypassUntilAfter => "RECORD_HASH_MISMATCH_BYPASS_UNTIL_AFTER",
            Self::LastValidDownloadedBalanceFile => "LAST_VALID_DOWNLOADED_BALANCE_FILE",
            Self::LastValidDownloadedBalanceFileHash => "LAST_VALID_DOWNLOADED_BALANCE_FILE_HASH",
            Self::BalanceHashMismatchBypassUntilAfter => "BALANCE_HASH_MISMATCH_BYPASS_UNTIL_AFTER",
        }
    }
}

impl fmt::Display for ApplicationStatusCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Parse the instant at the start of a stream filename, or a bare instant.
///
/// Accepts both `2019-07-01T14:13:00.317763Z` and the storage-safe
/// `2019-08-30T18_10_00.419072Z` spelling, followed by anything.
pub fn parse_instant_nanos(s: &str) -> Option<i64> {
    let end = s.find('Z')?;
    let instant = s[..=end].replace('_', ":");
    DateTime::parse_from_rfc3339(&instant)
        .ok()?
        .timestamp_nanos_opt()
}

/// Name of a data file in a stream, ordered by the instant it encodes
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct StreamFilename {
    name: String,
    timestamp_ns: i64,
}

impl StreamFilename {
    /// Parse a data filename; signature names and foreign files yield `None`.
    pub fn parse(stream_type: StreamType, name: &str) -> Option<Self> {
        if !name.ends_with(stream_type.data_suffix()) {
            return None;
        }
        let timestamp_ns = parse_instant_nanos(name)?;
        Some(Self {
            name: name.to_string(),
            timestamp_ns,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn timestamp_ns(&self) -> i64 {
        self.timestamp_ns
    }

    pub fn signature_name(&self) -> String {
        format!("{}{}", self.name, SIGNATURE_SUFFIX)
    }

    /// Is this file strictly newer than a checkpointed filename?
    pub fn is_after(&self, other: &str) -> bool {
        match parse_instant_nanos(other) {
            Some(ts) => (self.timestamp_ns, self.name.as_str()) > (ts, other),
            None => self.name.as_str() > other,
        }
    }
}

impl Ord for StreamFilename {
    fn cmp(&self, other: &Self) -> Ordering {
        self.timestamp_ns
            .cmp(&other.timestamp_ns)
            .then_with(|| self.name.cmp(&other.name))
    }
}

impl PartialOrd for StreamFilename {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for StreamFilename {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}
