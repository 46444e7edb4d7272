//! Network address book
//!
//! Maps node identities to the public keys their signature files are checked
//! against. The book is published as immutable, versioned snapshots: readers
//! hold an `Arc<AddressBook>` for the duration of a verification pass while an
//! update from the ledger swaps in a new snapshot.
//!
//! ## Document format
//!
//! ```json
//! {"nodes": [{"node_id": "0.0.3", "key_algorithm": "ed25519", "public_key": "<hex>"}]}
//! ```

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, RwLock};

use ed25519_dalek::{Signature, VerifyingKey};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::ImporterError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KeyAlgorithm {
    Ed25519,
}

/// Public key of one node with its declared algorithm
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodePublicKey {
    pub algorithm: KeyAlgorithm,
    key: VerifyingKey,
}

impl NodePublicKey {
    pub fn ed25519(key: VerifyingKey) -> Self {
        Self {
            algorithm: KeyAlgorithm::Ed25519,
            key,
        }
    }

    pub fn from_hex(algorithm: KeyAlgorithm, hex_key: &str) -> Result<Self, ImporterError> {
        let bytes = hex::decode(hex_key.trim())
            .map_err(|e| ImporterError::AddressBook(format!("Invalid key hex: {}", e)))?;
        match algorithm {
            KeyAlgorithm::Ed25519 => {
                let arr: [u8; 32] = bytes.as_slice().try_into().map_err(|_| {
                    ImporterError::AddressBook(format!(
                        "Ed25519 key must be 32 bytes, got {}",
                        bytes.len()
                    ))
                })?;
                let key = VerifyingKey::from_bytes(&arr)
                    .map_err(|e| ImporterError::AddressBook(format!("Invalid Ed25519 key: {}", e)))?;
                Ok(Self::ed25519(key))
            }
        }
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.key.as_bytes())
    }

    /// Verify a signature over `message` with this key.
    pub fn verify(&self, message: &[u8], signature: &[u8]) -> bool {
        match self.algorithm {
            KeyAlgorithm::Ed25519 => {
                let Ok(signature) = Signature::from_slice(signature) else {
                    return false;
                };
                self.key.verify_strict(message, &signature).is_ok()
            }
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct AddressBookDocument {
    nodes: Vec<NodeEntry>,
}

#[derive(Debug, Serialize, Deserialize)]
struct NodeEntry {
    node_id: String,
    key_algorithm: KeyAlgorithm,
    public_key: String,
}

/// Immutable snapshot of the address book
#[derive(Debug, Clone, Default)]
pub struct AddressBook {
    version: u64,
    nodes: BTreeMap<String, NodePublicKey>,
}

impl AddressBook {
    pub fn new(version: u64, nodes: BTreeMap<String, NodePublicKey>) -> Self {
        Self { version, nodes }
    }

    pub fn from_json(bytes: &[u8], version: u64) -> Result<Self, ImporterError> {
        let doc: AddressBookDocument = serde_json::from_slice(bytes)
            .map_err(|e| ImporterError::AddressBook(format!("Invalid address book: {}", e)))?;

        let mut nodes = BTreeMap::new();
        for entry in doc.nodes {
            let key = NodePublicKey::from_hex(entry.key_algorithm, &entry.public_key)?;
            if nodes.insert(entry.node_id.clone(), key).is_some() {
                return Err(ImporterError::AddressBook(format!(
                    "Duplicate node {}",
                    entry.node_id
                )));
            }
        }
        Ok(Self { version, nodes })
    }

    pub fn to_json(&self) -> Result<Vec<u8>, ImporterError> {
        let doc = AddressBookDocument {
            nodes: self
                .nodes
                .iter()
                .map(|(node_id, key)| NodeEntry {
                    node_id: node_id.clone(),
                    key_algorithm: key.algorithm,
                    public_key: key.to_hex(),
                })
                .collect(),
        };
        serde_json::to_vec_pretty(&doc).map_err(|e| ImporterError::AddressBook(e.to_string()))
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn get(&self, node_id: &str) -> Option<&NodePublicKey> {
        self.nodes.get(node_id)
    }

    pub fn contains(&self, node_id: &str) -> bool {
        self.nodes.contains_key(node_id)
    }

    pub fn node_ids(&self) -> impl Iterator<Item = &str> {
        self.nodes.keys().map(String::as_str)
    }
}

/// Change to the address book file observed in the ledger
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AddressBookUpdate {
    /// File contents replaced
    Replace(Vec<u8>),
    /// Bytes appended to the file contents
    Append(Vec<u8>),
}

impl AddressBookUpdate {
    /// Apply the change to accumulated file contents.
    pub fn apply_to(self, contents: &mut Vec<u8>) {
        match self {
            AddressBookUpdate::Replace(bytes) => *contents = bytes,
            AddressBookUpdate::Append(bytes) => contents.extend_from_slice(&bytes),
        }
    }
}

/// Shared, versioned address book
pub struct NetworkAddressBook {
    current: RwLock<Arc<AddressBook>>,
    /// Address book file contents last seen, complete or not
    contents: Mutex<Vec<u8>>,
    path: Option<PathBuf>,
}

impl NetworkAddressBook {
    /// Load the address book from disk; a missing file yields an empty book.
    pub fn load(path: &Path) -> Result<Self, ImporterError> {
        let (book, contents) = if path.exists() {
            let bytes = fs::read(path)?;
            let book = AddressBook::from_json(&bytes, 1)?;
            info!(path = %path.display(), nodes = book.len(), "Loaded address book");
            (book, bytes)
        } else {
            warn!(path = %path.display(), "Address book not found, no files can be certified");
            (AddressBook::default(), Vec::new())
        };

        Ok(Self {
            current: RwLock::new(Arc::new(book)),
            contents: Mutex::new(contents),
            path: Some(path.to_path_buf()),
        })
    }

    /// Address book that is never persisted
    pub fn in_memory(book: AddressBook) -> Self {
        Self {
            current: RwLock::new(Arc::new(book)),
            contents: Mutex::new(Vec::new()),
            path: None,
        }
    }

    /// Current snapshot
    pub fn current(&self) -> Arc<AddressBook> {
        match self.current.read() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    /// File contents the next ledger update builds on
    pub fn contents(&self) -> Result<Vec<u8>, ImporterError> {
        self.contents
            .lock()
            .map(|guard| guard.clone())
            .map_err(|e| ImporterError::Internal(format!("Lock poisoned: {}", e)))
    }

    /// Adopt accumulated address book file contents.
    ///
    /// A new snapshot is published only once the contents parse as a complete
    /// address book. Contents identical to the last ones seen change nothing.
    /// Returns whether a snapshot was published.
    pub fn publish_contents(&self, accumulated: &[u8]) -> Result<bool, ImporterError> {
        let mut contents = self
            .contents
            .lock()
            .map_err(|e| ImporterError::Internal(format!("Lock poisoned: {}", e)))?;
        if contents.as_slice() == accumulated {
            return Ok(false);
        }
        *contents = accumulated.to_vec();

        let next_version = self.current().version() + 1;
        let book = match AddressBook::from_json(accumulated, next_version) {
            Ok(book) => book,
            Err(e) => {
                debug!(bytes = accumulated.len(), "Address book contents incomplete: {}", e);
                return Ok(false);
            }
        };

        if let Some(path) = &self.path {
            persist(path, accumulated)?;
        }

        let nodes = book.len();
        let mut current = self
            .current
            .write()
            .map_err(|e| ImporterError::Internal(format!("Lock poisoned: {}", e)))?;
        *current = Arc::new(book);
        info!(version = next_version, nodes, "Published new address book");
        Ok(true)
    }
}

fn persist(path: &Path, contents: &[u8]) -> Result<(), ImporterError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let tmp = path.with_extension("tmp");
    fs::write(&tmp, contents)?;
    fs::rename(&tmp, path)?;
    Ok(())
}
