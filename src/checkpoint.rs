//! Per-stream checkpoint
//!
//! The checkpoint records the last file that was fully persisted and its hash.
//! It is the resume point for listing and the anchor of the hash chain.

use tracing::{info, warn};

use crate::domain::{parse_instant_nanos, ApplicationStatusCode, FileHash, StreamFilename, StreamType};
use crate::error::ImporterError;

/// Durable key-value store for checkpoint status codes
pub trait StatusStore: Send + Sync {
    fn get(&self, code: ApplicationStatusCode) -> Result<Option<String>, ImporterError>;

    fn set(&self, code: ApplicationStatusCode, value: &str) -> Result<(), ImporterError>;

    /// Write several codes so that either all of them or none are stored.
    fn set_all(&self, values: &[(ApplicationStatusCode, &str)]) -> Result<(), ImporterError>;
}

/// Outcome of the hash chain check for one file
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Continuity {
    /// Declared previous hash matches the checkpoint
    Verified,
    /// Nothing to compare: no declared hash or no checkpoint hash yet
    Skipped,
    /// Mismatch tolerated by the operator bypass
    Bypassed,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Checkpoint {
    pub last_valid_filename: Option<String>,
    pub last_valid_hash: Option<FileHash>,
    pub bypass_until: Option<String>,
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

impl Checkpoint {
    pub fn load(store: &dyn StatusStore, stream_type: StreamType) -> Result<Self, ImporterError> {
        let last_valid_filename = non_empty(store.get(stream_type.last_valid_file_code())?);
        let last_valid_hash = match non_empty(store.get(stream_type.last_valid_hash_code())?) {
            Some(hex) => Some(FileHash::from_hex(&hex).ok_or_else(|| {
                ImporterError::Internal(format!(
                    "Stored {} is not a valid hash: {}",
                    stream_type.last_valid_hash_code(),
                    hex
                ))
            })?),
            None => None,
        };
        let bypass_until = non_empty(store.get(stream_type.bypass_code())?);

        Ok(Self {
            last_valid_filename,
            last_valid_hash,
            bypass_until,
        })
    }

    /// Does the operator bypass cover a file at this position?
    pub fn bypass_applies(&self, file: &StreamFilename) -> bool {
        let Some(until) = &self.bypass_until else {
            return false;
        };
        match parse_instant_nanos(until) {
            Some(ts) => file.timestamp_ns() >= ts,
            None => file.name() >= until.as_str(),
        }
    }

    /// Compare a file's declared previous hash with the checkpoint hash.
    pub fn verify_continuity(
        &self,
        stream_type: StreamType,
        file: &StreamFilename,
        declared: Option<FileHash>,
    ) -> Result<Continuity, ImporterError> {
        let (Some(declared), Some(expected)) = (declared, self.last_valid_hash) else {
            return Ok(Continuity::Skipped);
        };
        if declared == expected {
            return Ok(Continuity::Verified);
        }
        if self.bypass_applies(file) {
            warn!(
                stream = %stream_type,
                filename = %file,
                expected = %expected,
                actual = %declared,
                bypass_until = self.bypass_until.as_deref().unwrap_or_default(),
                "Hash mismatch bypassed"
            );
            return Ok(Continuity::Bypassed);
        }
        Err(ImporterError::ContinuityViolation {
            filename: file.name().to_string(),
            expected: expected.to_hex(),
            actual: declared.to_hex(),
        })
    }

    /// Record a fully persisted file as the new resume point.
    pub fn advance(
        &mut self,
        store: &dyn StatusStore,
        stream_type: StreamType,
        filename: &str,
        hash: &FileHash,
    ) -> Result<(), ImporterError> {
        let hash_hex = hash.to_hex();
        store.set_all(&[
            (stream_type.last_valid_hash_code(), hash_hex.as_str()),
            (stream_type.last_valid_file_code(), filename),
        ])?;
        self.last_valid_filename = Some(filename.to_string());
        self.last_valid_hash = Some(*hash);
        Ok(())
    }
}

/// Let files at or after `until` through a hash mismatch.
pub fn set_bypass(
    store: &dyn StatusStore,
    stream_type: StreamType,
    until: &str,
) -> Result<(), ImporterError> {
    if parse_instant_nanos(until).is_none() {
        return Err(ImporterError::Config(format!(
            "Bypass value '{}' is neither an instant nor a stream filename",
            until
        )));
    }
    store.set(stream_type.bypass_code(), until)?;
    info!(stream = %stream_type, until, "Hash mismatch bypass set");
    Ok(())
}
