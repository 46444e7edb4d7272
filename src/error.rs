//! Error types for mirror-importer

use thiserror::Error;

use crate::parser::ParseError;

#[derive(Error, Debug)]
pub enum ImporterError {
    #[error("Consensus pending for {filename}: best hash has {agreeing} of {required} required signatures")]
    ConsensusPending {
        filename: String,
        agreeing: usize,
        required: usize,
    },

    #[error("Hash chain broken at {filename}: checkpoint hash {expected}, file declares {actual}")]
    ContinuityViolation {
        filename: String,
        expected: String,
        actual: String,
    },

    #[error("Failed to parse {filename}: {source}")]
    Parse {
        filename: String,
        #[source]
        source: ParseError,
    },

    #[error("Persistence failed for {filename}: {reason}")]
    Persistence { filename: String, reason: String },

    #[error("Staging failed for {filename}: {source}")]
    Staging {
        filename: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Address book error: {0}")]
    AddressBook(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl ImporterError {
    /// Errors that require an operator to look at the importer.
    pub fn is_alerting(&self) -> bool {
        matches!(self, ImporterError::ContinuityViolation { .. })
    }
}
