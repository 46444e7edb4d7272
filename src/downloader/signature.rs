//! Node signature files and their verification
//!
//! Layout: `0x04 | 48-byte file hash | 0x03 | i32 length | signature`.
//! The signature covers the 48 hash bytes, and the hash must equal the SHA-384
//! of the data file as fetched.

use std::fmt;

use crate::addressbook::NodePublicKey;
use crate::domain::{FileHash, HASH_SIZE};
use crate::parser::reader::ByteReader;
use crate::parser::ParseError;

const TYPE_SIGNATURE: u8 = 3;
const TYPE_FILE_HASH: u8 = 4;

const ED25519_SIGNATURE_SIZE: usize = 64;

/// Decoded signature file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignatureFile {
    pub file_hash: FileHash,
    pub signature: Vec<u8>,
}

impl SignatureFile {
    pub fn decode(bytes: &[u8]) -> Result<Self, ParseError> {
        if bytes.is_empty() {
            return Err(ParseError::Empty);
        }
        let mut reader = ByteReader::new(bytes);

        expect_marker(&mut reader, TYPE_FILE_HASH)?;
        let file_hash = FileHash::from_slice(reader.read_bytes(HASH_SIZE)?)
            .ok_or(ParseError::Truncated { offset: 1, needed: HASH_SIZE })?;

        expect_marker(&mut reader, TYPE_SIGNATURE)?;
        let signature = reader.read_length_prefixed()?.to_vec();

        if !reader.is_empty() {
            return Err(ParseError::TrailingBytes {
                offset: reader.position(),
                count: reader.remaining(),
            });
        }
        Ok(Self { file_hash, signature })
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(1 + HASH_SIZE + 1 + 4 + self.signature.len());
        out.push(TYPE_FILE_HASH);
        out.extend_from_slice(self.file_hash.as_bytes());
        out.push(TYPE_SIGNATURE);
        out.extend_from_slice(&(self.signature.len() as i32).to_be_bytes());
        out.extend_from_slice(&self.signature);
        out
    }
}

fn expect_marker(reader: &mut ByteReader<'_>, expected: u8) -> Result<(), ParseError> {
    let offset = reader.position();
    let marker = reader.read_u8()?;
    if marker != expected {
        return Err(ParseError::UnexpectedMarker { offset, marker });
    }
    Ok(())
}

/// Why a node's signature does or does not count
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SignatureStatus {
    Valid,
    /// Data or signature file could not be fetched
    FetchFailed(String),
    /// Signature file did not decode
    Malformed(String),
    /// Declared hash differs from the digest of the fetched data
    HashMismatch,
    InvalidSignature,
    /// Node is not in the current address book
    UnknownNode,
}

impl fmt::Display for SignatureStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SignatureStatus::Valid => write!(f, "valid"),
            SignatureStatus::FetchFailed(reason) => write!(f, "fetch failed: {}", reason),
            SignatureStatus::Malformed(reason) => write!(f, "malformed signature file: {}", reason),
            SignatureStatus::HashMismatch => write!(f, "declared hash does not match data"),
            SignatureStatus::InvalidSignature => write!(f, "signature does not verify"),
            SignatureStatus::UnknownNode => write!(f, "node not in address book"),
        }
    }
}

/// One node's signature over one candidate file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignatureRecord {
    pub node_id: String,
    pub filename: String,
    pub declared_hash: Option<FileHash>,
    /// SHA-384 of the fetched data file
    pub digest: Option<FileHash>,
    pub signature: Vec<u8>,
    pub status: SignatureStatus,
}

impl SignatureRecord {
    pub fn failed(node_id: &str, filename: &str, status: SignatureStatus) -> Self {
        Self {
            node_id: node_id.to_string(),
            filename: filename.to_string(),
            declared_hash: None,
            digest: None,
            signature: Vec::new(),
            status,
        }
    }

    pub fn is_valid(&self) -> bool {
        self.status == SignatureStatus::Valid
    }
}

pub struct SignatureVerifier;

impl SignatureVerifier {
    /// Check one node's signature file against the data it fetched.
    ///
    /// Never fails: every problem is reported through the record status.
    pub fn verify(
        node_id: &str,
        filename: &str,
        data: &[u8],
        signature_file: &[u8],
        key: Option<&NodePublicKey>,
    ) -> SignatureRecord {
        let digest = FileHash::digest(data);
        let mut record = SignatureRecord {
            node_id: node_id.to_string(),
            filename: filename.to_string(),
            declared_hash: None,
            digest: Some(digest),
            signature: Vec::new(),
            status: SignatureStatus::Valid,
        };

        let Some(key) = key else {
            record.status = SignatureStatus::UnknownNode;
            return record;
        };

        let parsed = match SignatureFile::decode(signature_file) {
            Ok(parsed) => parsed,
            Err(e) => {
                record.status = SignatureStatus::Malformed(e.to_string());
                return record;
            }
        };
        record.declared_hash = Some(parsed.file_hash);
        record.signature = parsed.signature;

        record.status = if parsed.file_hash != digest {
            SignatureStatus::HashMismatch
        } else if record.signature.len() != ED25519_SIGNATURE_SIZE {
            SignatureStatus::Malformed(format!(
                "signature is {} bytes, expected {}",
                record.signature.len(),
                ED25519_SIGNATURE_SIZE
            ))
        } else if !key.verify(digest.as_bytes(), &record.signature) {
            SignatureStatus::InvalidSignature
        } else {
            SignatureStatus::Valid
        };
        record
    }
}
