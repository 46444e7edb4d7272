//! Record stream file codec
//!
//! Two layouts exist, selected by the leading big-endian version tag:
//!
//! ```text
//! V1: version=1 | hapi | { 0x02 | len | transaction | len | record }*
//! V2: version=2 | hapi | 0x01 | prev hash (48) | { 0x02 | ... }* | 0x04 | file hash (48)
//! ```
//!
//! The V2 footer is the SHA-384 of every byte before its marker. The chaining
//! hash of either version is the SHA-384 of the whole file.

use crate::domain::{FileHash, Transaction, TransactionRecord, HASH_SIZE};

use super::reader::ByteReader;
use super::ParseError;

pub const TYPE_PREV_HASH: u8 = 1;
pub const TYPE_RECORD: u8 = 2;
pub const TYPE_FILE_HASH: u8 = 4;

/// Record file layout versions
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FormatVersion {
    V1,
    V2,
}

impl FormatVersion {
    pub fn from_tag(tag: i32) -> Result<Self, ParseError> {
        match tag {
            1 => Ok(FormatVersion::V1),
            2 => Ok(FormatVersion::V2),
            other => Err(ParseError::UnsupportedVersion(other)),
        }
    }

    pub fn tag(self) -> i32 {
        match self {
            FormatVersion::V1 => 1,
            FormatVersion::V2 => 2,
        }
    }

    fn decode_body(
        self,
        reader: &mut ByteReader<'_>,
        bytes: &[u8],
    ) -> Result<(Option<FileHash>, Vec<RecordEntry>), ParseError> {
        match self {
            FormatVersion::V1 => Ok((None, decode_v1_body(reader)?)),
            FormatVersion::V2 => {
                let (previous, entries) = decode_v2_body(reader, bytes)?;
                Ok((Some(previous), entries))
            }
        }
    }

    fn encode_body(
        self,
        out: &mut Vec<u8>,
        previous_hash: Option<FileHash>,
        entries: &[RecordEntry],
    ) -> Result<(), ParseError> {
        match self {
            FormatVersion::V1 => encode_entries(out, entries),
            FormatVersion::V2 => {
                out.push(TYPE_PREV_HASH);
                out.extend_from_slice(previous_hash.unwrap_or(FileHash::ZERO).as_bytes());
                encode_entries(out, entries)?;
                let footer = FileHash::digest(out);
                out.push(TYPE_FILE_HASH);
                out.extend_from_slice(footer.as_bytes());
                Ok(())
            }
        }
    }
}

/// One (transaction, record) pair
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordEntry {
    pub transaction: Transaction,
    pub record: TransactionRecord,
}

impl RecordEntry {
    pub fn consensus_ns(&self) -> i64 {
        self.record.consensus_timestamp.to_nanos()
    }
}

/// Decoded record stream file
#[derive(Debug, Clone)]
pub struct RecordStreamFile {
    pub version: FormatVersion,
    pub hapi_version: i32,
    /// Hash of the preceding file, as declared by this one (V2 only)
    pub previous_hash: Option<FileHash>,
    /// SHA-384 of the whole file
    pub file_hash: FileHash,
    pub entries: Vec<RecordEntry>,
}

impl RecordStreamFile {
    pub fn consensus_start(&self) -> Option<i64> {
        self.entries.first().map(RecordEntry::consensus_ns)
    }

    pub fn consensus_end(&self) -> Option<i64> {
        self.entries.last().map(RecordEntry::consensus_ns)
    }
}

/// Decode a record stream file of any supported version.
pub fn decode(bytes: &[u8]) -> Result<RecordStreamFile, ParseError> {
    if bytes.is_empty() {
        return Err(ParseError::Empty);
    }

    let mut reader = ByteReader::new(bytes);
    let version = FormatVersion::from_tag(reader.read_i32()?)?;
    let hapi_version = reader.read_i32()?;
    let (previous_hash, entries) = version.decode_body(&mut reader, bytes)?;

    Ok(RecordStreamFile {
        version,
        hapi_version,
        previous_hash,
        file_hash: FileHash::digest(bytes),
        entries,
    })
}

/// Encode entries in the given layout. `previous_hash` is ignored by V1.
pub fn encode(
    version: FormatVersion,
    hapi_version: i32,
    previous_hash: Option<FileHash>,
    entries: &[RecordEntry],
) -> Result<Vec<u8>, ParseError> {
    let mut out = Vec::new();
    out.extend_from_slice(&version.tag().to_be_bytes());
    out.extend_from_slice(&hapi_version.to_be_bytes());
    version.encode_body(&mut out, previous_hash, entries)?;
    Ok(out)
}

fn decode_v1_body(reader: &mut ByteReader<'_>) -> Result<Vec<RecordEntry>, ParseError> {
    let mut entries = Vec::new();
    while !reader.is_empty() {
        let offset = reader.position();
        match reader.read_u8()? {
            TYPE_RECORD => entries.push(read_entry(reader, entries.len())?),
            marker => return Err(ParseError::UnexpectedMarker { offset, marker }),
        }
    }
    Ok(entries)
}

fn decode_v2_body(
    reader: &mut ByteReader<'_>,
    bytes: &[u8],
) -> Result<(FileHash, Vec<RecordEntry>), ParseError> {
    let offset = reader.position();
    let marker = reader.read_u8()?;
    if marker != TYPE_PREV_HASH {
        return Err(ParseError::UnexpectedMarker { offset, marker });
    }
    let previous = read_hash(reader)?;

    let mut entries = Vec::new();
    loop {
        let offset = reader.position();
        match reader.read_u8()? {
            TYPE_RECORD => entries.push(read_entry(reader, entries.len())?),
            TYPE_FILE_HASH => {
                let declared = read_hash(reader)?;
                let computed = FileHash::digest(&bytes[..offset]);
                if declared != computed {
                    return Err(ParseError::DigestMismatch {
                        declared: declared.to_hex(),
                        computed: computed.to_hex(),
                    });
                }
                if !reader.is_empty() {
                    return Err(ParseError::TrailingBytes {
                        offset: reader.position(),
                        count: reader.remaining(),
                    });
                }
                return Ok((previous, entries));
            }
            marker => return Err(ParseError::UnexpectedMarker { offset, marker }),
        }
    }
}

fn read_hash(reader: &mut ByteReader<'_>) -> Result<FileHash, ParseError> {
    let bytes = reader.read_bytes(HASH_SIZE)?;
    // read_bytes returned exactly HASH_SIZE bytes
    FileHash::from_slice(bytes).ok_or(ParseError::Truncated {
        offset: reader.position(),
        needed: HASH_SIZE,
    })
}

fn read_entry(reader: &mut ByteReader<'_>, index: usize) -> Result<RecordEntry, ParseError> {
    let transaction_bytes = reader.read_length_prefixed()?;
    let record_bytes = reader.read_length_prefixed()?;

    let transaction = Transaction::from_bytes(transaction_bytes).map_err(|e| ParseError::Entry {
        index,
        reason: format!("transaction: {}", e),
    })?;
    let record = TransactionRecord::from_bytes(record_bytes).map_err(|e| ParseError::Entry {
        index,
        reason: format!("record: {}", e),
    })?;

    Ok(RecordEntry { transaction, record })
}

fn encode_entries(out: &mut Vec<u8>, entries: &[RecordEntry]) -> Result<(), ParseError> {
    for (index, entry) in entries.iter().enumerate() {
        let transaction = entry.transaction.to_bytes().map_err(|e| ParseError::Entry {
            index,
            reason: e.to_string(),
        })?;
        let record = entry.record.to_bytes().map_err(|e| ParseError::Entry {
            index,
            reason: e.to_string(),
        })?;
        out.push(TYPE_RECORD);
        out.extend_from_slice(&(transaction.len() as i32).to_be_bytes());
        out.extend_from_slice(&transaction);
        out.extend_from_slice(&(record.len() as i32).to_be_bytes());
        out.extend_from_slice(&record);
    }
    Ok(())
}
