//! Balance snapshot ingestion
//!
//! One snapshot is one set keyed by its timestamp. A timestamp that already
//! has a complete set is skipped.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, info, warn};

use super::{ProcessOutcome, StagedFile, StreamFileProcessor};
use crate::db::{balances, now_ns, MirrorDb};
use crate::domain::parse_instant_nanos;
use crate::error::ImporterError;
use crate::parser::balance_file;

pub struct BalanceFileProcessor {
    db: Arc<MirrorDb>,
}

impl BalanceFileProcessor {
    pub fn new(db: Arc<MirrorDb>) -> Self {
        Self { db }
    }

    pub fn ingest(&self, filename: &str, bytes: &[u8]) -> Result<ProcessOutcome, ImporterError> {
        let file = balance_file::decode(bytes).map_err(|source| ImporterError::Parse {
            filename: filename.to_string(),
            source,
        })?;

        // The preamble timestamp wins; older files only carry it in the name
        let consensus_ns = file
            .timestamp_ns
            .or_else(|| parse_instant_nanos(filename))
            .ok_or_else(|| ImporterError::Persistence {
                filename: filename.to_string(),
                reason: "no snapshot timestamp in file or name".to_string(),
            })?;
        debug!(filename, consensus_ns, accounts = file.balances.len(), "Balance file started");

        let committed = self
            .db
            .with_conn_mut(|conn| {
                if balances::set_complete(conn, consensus_ns)? {
                    return Ok(false);
                }
                let tx = conn.transaction()?;
                balances::insert_set(&tx, consensus_ns, filename, now_ns())?;
                for balance in &file.balances {
                    balances::insert_balance(&tx, consensus_ns, balance.account, balance.balance)?;
                }
                balances::complete_set(&tx, consensus_ns, now_ns())?;
                tx.commit()?;
                Ok(true)
            })
            .map_err(|e| {
                warn!(filename, "Balance file aborted: {}", e);
                ImporterError::Persistence {
                    filename: filename.to_string(),
                    reason: e.to_string(),
                }
            })?;

        if !committed {
            info!(filename, consensus_ns, "Balance snapshot already ingested, skipping");
            return Ok(ProcessOutcome::AlreadyIngested);
        }
        info!(filename, accounts = file.balances.len(), "Balance file committed");
        Ok(ProcessOutcome::Committed {
            entries: file.balances.len(),
        })
    }
}

#[async_trait]
impl StreamFileProcessor for BalanceFileProcessor {
    async fn process(&self, file: &StagedFile) -> Result<ProcessOutcome, ImporterError> {
        let bytes = tokio::fs::read(&file.path).await?;
        self.ingest(&file.filename, &bytes)
    }
}
