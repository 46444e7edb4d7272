//! Transactions and transaction records carried in record stream files
//!
//! Both halves of a record file entry are MessagePack-encoded structures.

use serde::{Deserialize, Serialize};

use super::{EntityId, EntityType, Timestamp};

/// Result status reported in a transaction receipt
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResponseCode(pub i32);

impl ResponseCode {
    pub const OK: ResponseCode = ResponseCode(0);
    pub const INSUFFICIENT_PAYER_BALANCE: ResponseCode = ResponseCode(10);
    pub const SUCCESS: ResponseCode = ResponseCode(22);
    pub const INSUFFICIENT_ACCOUNT_BALANCE: ResponseCode = ResponseCode(28);

    pub fn is_success(self) -> bool {
        self == Self::SUCCESS
    }
}

/// Transaction type codes stored with each transaction row
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionType {
    ContractCall = 7,
    ContractCreate = 8,
    ContractUpdate = 9,
    CryptoCreate = 11,
    CryptoDelete = 12,
    CryptoTransfer = 14,
    CryptoUpdate = 15,
    FileAppend = 16,
    FileCreate = 17,
    FileDelete = 18,
    FileUpdate = 19,
    SystemDelete = 20,
    SystemUndelete = 21,
    ContractDelete = 22,
    Freeze = 23,
}

impl TransactionType {
    pub fn code(self) -> i32 {
        self as i32
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionId {
    pub payer: EntityId,
    pub valid_start: Timestamp,
}

/// Signed transaction as submitted to the network
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    pub body: TransactionBody,
    #[serde(default)]
    pub signatures: Vec<Vec<u8>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionBody {
    pub transaction_id: TransactionId,
    pub node_account: EntityId,
    /// Maximum fee the payer is willing to pay
    pub transaction_fee: u64,
    pub valid_duration_seconds: i64,
    #[serde(default)]
    pub memo: String,
    pub data: TransactionData,
}

/// Target of a privileged delete or undelete
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SystemTarget {
    File(EntityId),
    Contract(EntityId),
}

impl SystemTarget {
    pub fn entity(self) -> (EntityId, EntityType) {
        match self {
            SystemTarget::File(id) => (id, EntityType::File),
            SystemTarget::Contract(id) => (id, EntityType::Contract),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransactionData {
    CryptoCreate {
        key: Vec<u8>,
        initial_balance: u64,
        auto_renew_period_seconds: Option<i64>,
        proxy_account: Option<EntityId>,
    },
    CryptoUpdate {
        account: EntityId,
        key: Option<Vec<u8>>,
        expiration: Option<Timestamp>,
        auto_renew_period_seconds: Option<i64>,
        proxy_account: Option<EntityId>,
    },
    CryptoDelete {
        account: EntityId,
        transfer_account: EntityId,
    },
    CryptoTransfer,
    FileCreate {
        contents: Vec<u8>,
        keys: Option<Vec<u8>>,
        expiration: Option<Timestamp>,
    },
    FileAppend {
        file: EntityId,
        contents: Vec<u8>,
    },
    FileUpdate {
        file: EntityId,
        contents: Option<Vec<u8>>,
        keys: Option<Vec<u8>>,
        expiration: Option<Timestamp>,
    },
    FileDelete {
        file: EntityId,
    },
    ContractCreate {
        admin_key: Option<Vec<u8>>,
        initial_balance: u64,
        auto_renew_period_seconds: Option<i64>,
        proxy_account: Option<EntityId>,
    },
    ContractUpdate {
        contract: EntityId,
        admin_key: Option<Vec<u8>>,
        expiration: Option<Timestamp>,
        auto_renew_period_seconds: Option<i64>,
        proxy_account: Option<EntityId>,
    },
    ContractCall {
        contract: EntityId,
        amount: u64,
    },
    ContractDelete {
        contract: EntityId,
    },
    SystemDelete {
        target: SystemTarget,
        expiration_seconds: Option<i64>,
    },
    SystemUndelete {
        target: SystemTarget,
    },
    Freeze {
        start_hour: u8,
        start_min: u8,
        end_hour: u8,
        end_min: u8,
    },
}

impl TransactionData {
    pub fn transaction_type(&self) -> TransactionType {
        match self {
            TransactionData::CryptoCreate { .. } => TransactionType::CryptoCreate,
            TransactionData::CryptoUpdate { .. } => TransactionType::CryptoUpdate,
            TransactionData::CryptoDelete { .. } => TransactionType::CryptoDelete,
            TransactionData::CryptoTransfer => TransactionType::CryptoTransfer,
            TransactionData::FileCreate { .. } => TransactionType::FileCreate,
            TransactionData::FileAppend { .. } => TransactionType::FileAppend,
            TransactionData::FileUpdate { .. } => TransactionType::FileUpdate,
            TransactionData::FileDelete { .. } => TransactionType::FileDelete,
            TransactionData::ContractCreate { .. } => TransactionType::ContractCreate,
            TransactionData::ContractUpdate { .. } => TransactionType::ContractUpdate,
            TransactionData::ContractCall { .. } => TransactionType::ContractCall,
            TransactionData::ContractDelete { .. } => TransactionType::ContractDelete,
            TransactionData::SystemDelete { .. } => TransactionType::SystemDelete,
            TransactionData::SystemUndelete { .. } => TransactionType::SystemUndelete,
            TransactionData::Freeze { .. } => TransactionType::Freeze,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionReceipt {
    pub status: ResponseCode,
    #[serde(default)]
    pub account: Option<EntityId>,
    #[serde(default)]
    pub file: Option<EntityId>,
    #[serde(default)]
    pub contract: Option<EntityId>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountAmount {
    pub account: EntityId,
    pub amount: i64,
}

/// Network's record of a transaction outcome
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionRecord {
    pub receipt: TransactionReceipt,
    pub consensus_timestamp: Timestamp,
    #[serde(default)]
    pub transaction_hash: Vec<u8>,
    #[serde(default)]
    pub memo: String,
    /// Fee actually charged
    pub transaction_fee: u64,
    #[serde(default)]
    pub transfer_list: Vec<AccountAmount>,
}

impl Transaction {
    pub fn to_bytes(&self) -> Result<Vec<u8>, rmp_serde::encode::Error> {
        rmp_serde::to_vec_named(self)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, rmp_serde::decode::Error> {
        rmp_serde::from_slice(bytes)
    }
}

impl TransactionRecord {
    pub fn to_bytes(&self) -> Result<Vec<u8>, rmp_serde::encode::Error> {
        rmp_serde::to_vec_named(self)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, rmp_serde::decode::Error> {
        rmp_serde::from_slice(bytes)
    }
}
