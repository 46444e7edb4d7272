//! Ingestion of certified stream files
//!
//! A processor receives a file already staged in the valid directory and
//! persists it in one atomic unit. Re-processing a file that was already
//! ingested is a successful no-op, which is what makes re-downloads safe.

pub mod balance;
pub mod record;

use std::path::PathBuf;

use async_trait::async_trait;

use crate::domain::{FileHash, StreamType};
use crate::error::ImporterError;

pub use balance::BalanceFileProcessor;
pub use record::RecordFileProcessor;

/// Certified file written to the valid directory
#[derive(Debug, Clone)]
pub struct StagedFile {
    pub stream_type: StreamType,
    pub filename: String,
    pub path: PathBuf,
    pub file_hash: FileHash,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProcessOutcome {
    Committed { entries: usize },
    AlreadyIngested,
}

#[async_trait]
pub trait StreamFileProcessor: Send + Sync {
    async fn process(&self, file: &StagedFile) -> Result<ProcessOutcome, ImporterError>;
}
