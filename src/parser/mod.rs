//! Stream file parsing
//!
//! Decoding is pure: bytes in, a decoded file or a `ParseError` out. Nothing is
//! partially returned from a structurally invalid file.

pub mod balance_file;
pub mod record_file;
pub(crate) mod reader;

use thiserror::Error;

use crate::domain::{FileHash, StreamType};

pub use balance_file::{AccountBalance, BalanceFile};
pub use record_file::{FormatVersion, RecordEntry, RecordStreamFile};

#[derive(Error, Debug)]
pub enum ParseError {
    #[error("File is empty")]
    Empty,

    #[error("Truncated at offset {offset}: {needed} more bytes needed")]
    Truncated { offset: usize, needed: usize },

    #[error("Unsupported record file version {0}")]
    UnsupportedVersion(i32),

    #[error("Unexpected marker {marker:#04x} at offset {offset}")]
    UnexpectedMarker { offset: usize, marker: u8 },

    #[error("Invalid length {length} at offset {offset}")]
    InvalidLength { offset: usize, length: i32 },

    #[error("Entry {index} could not be decoded: {reason}")]
    Entry { index: usize, reason: String },

    #[error("File hash footer mismatch: declared {declared}, computed {computed}")]
    DigestMismatch { declared: String, computed: String },

    #[error("{count} trailing bytes after offset {offset}")]
    TrailingBytes { offset: usize, count: usize },

    #[error("Balance file line {line}: {reason}")]
    Balance { line: usize, reason: String },
}

/// Structurally validate a candidate and return the previous-file hash it declares.
///
/// Record V1 files and balance files carry no previous hash.
pub fn previous_file_hash(
    stream_type: StreamType,
    bytes: &[u8],
) -> Result<Option<FileHash>, ParseError> {
    match stream_type {
        StreamType::Record => Ok(record_file::decode(bytes)?.previous_hash),
        StreamType::Balance => {
            balance_file::decode(bytes)?;
            Ok(None)
        }
    }
}
