//! Signature-consensus downloader
//!
//! One `Downloader` serves one stream type. Each cycle:
//!
//! 1. Lists signature files newer than the checkpoint under every known node
//! 2. Fetches data + signature per node and verifies them (barrier per file)
//! 3. Certifies a winning hash per file by two-thirds consensus
//! 4. Checks the hash chain against the checkpoint
//! 5. Stages the canonical copy into the valid directory
//! 6. Hands it to the processor and advances the checkpoint on success
//!
//! Files are verified concurrently but staged, processed and checkpointed in
//! filename order. The first file that cannot complete halts the batch.

pub mod consensus;
pub mod object_store;
pub mod signature;
pub mod staging;

use std::collections::{BTreeSet, HashMap};
use std::path::PathBuf;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use futures::stream::{self, StreamExt};
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::addressbook::{AddressBook, NetworkAddressBook};
use crate::checkpoint::{Checkpoint, StatusStore};
use crate::config::Config;
use crate::domain::{FileHash, StreamFilename, StreamType, SIGNATURE_SUFFIX};
use crate::error::ImporterError;
use crate::ingest::{ProcessOutcome, StagedFile, StreamFileProcessor};
use crate::parser;

pub use consensus::{ConsensusOutcome, ConsensusResult, ConsensusSelector};
pub use object_store::{FsObjectStore, ListPage, ObjectStore, ObjectStoreError};
pub use signature::{SignatureFile, SignatureRecord, SignatureStatus, SignatureVerifier};
pub use staging::Staging;

/// Settings for one stream's downloader
#[derive(Debug, Clone)]
pub struct DownloaderSettings {
    pub stream_type: StreamType,
    pub bucket_name: String,
    pub data_path: PathBuf,
    pub batch_size: usize,
    pub max_concurrent_files: usize,
    pub list_page_size: usize,
    pub fetch_retries: u32,
    pub fetch_retry_backoff: Duration,
    pub persistence_failure_alert_threshold: u32,
}

impl DownloaderSettings {
    pub fn from_config(config: &Config, stream_type: StreamType) -> Self {
        let downloader = &config.downloader;
        Self {
            stream_type,
            bucket_name: downloader.bucket_name.clone(),
            data_path: config.importer.data_path.clone(),
            batch_size: downloader.stream(stream_type).batch_size,
            max_concurrent_files: downloader.max_concurrent_files.max(1),
            // A store that echoes the marker needs room for one new key per page
            list_page_size: downloader.list_page_size.max(2),
            fetch_retries: downloader.fetch_retries,
            fetch_retry_backoff: Duration::from_millis(downloader.fetch_retry_backoff_ms),
            persistence_failure_alert_threshold: downloader.persistence_failure_alert_threshold,
        }
    }
}

/// What one download cycle did
#[derive(Debug, Default)]
pub struct CycleReport {
    /// Candidate filenames selected for this cycle
    pub listed: usize,
    /// Files processed and checkpointed, in order
    pub processed: Vec<String>,
    /// Signatures that did not count toward consensus
    pub rejected_signatures: Vec<SignatureRecord>,
    /// Why the batch stopped before its end
    pub halted: Option<ImporterError>,
    pub interrupted: bool,
}

/// Outcome of fetching and verifying one filename across all nodes
struct VerifiedCandidate {
    filename: StreamFilename,
    records: Vec<SignatureRecord>,
    outcome: ConsensusOutcome,
    /// One copy of the data per distinct verified digest
    data: HashMap<FileHash, Vec<u8>>,
}

pub struct Downloader {
    settings: DownloaderSettings,
    store: Arc<dyn ObjectStore>,
    status: Arc<dyn StatusStore>,
    address_book: Arc<NetworkAddressBook>,
    staging: Staging,
    consecutive_failures: AtomicU32,
    shutdown: Option<watch::Receiver<bool>>,
}

impl Downloader {
    /// Create a downloader; the stream's valid directory is created here.
    pub fn new(
        settings: DownloaderSettings,
        store: Arc<dyn ObjectStore>,
        status: Arc<dyn StatusStore>,
        address_book: Arc<NetworkAddressBook>,
    ) -> Result<Self, ImporterError> {
        let staging = Staging::new(&settings.data_path, settings.stream_type)?;
        Ok(Self {
            settings,
            store,
            status,
            address_book,
            staging,
            consecutive_failures: AtomicU32::new(0),
            shutdown: None,
        })
    }

    /// Stop between files once the receiver reads `true`.
    pub fn with_shutdown(mut self, shutdown: watch::Receiver<bool>) -> Self {
        self.shutdown = Some(shutdown);
        self
    }

    /// Processing failures since the last file that was persisted
    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures.load(Ordering::Relaxed)
    }

    pub fn stream_type(&self) -> StreamType {
        self.settings.stream_type
    }

    pub fn staging(&self) -> &Staging {
        &self.staging
    }

    fn shutdown_requested(&self) -> bool {
        self.shutdown.as_ref().is_some_and(|rx| *rx.borrow())
    }

    /// Run one download cycle.
    pub async fn download(
        &self,
        processor: &dyn StreamFileProcessor,
    ) -> Result<CycleReport, ImporterError> {
        let stream_type = self.settings.stream_type;
        let mut report = CycleReport::default();

        let book = self.address_book.current();
        if book.is_empty() {
            warn!(stream = %stream_type, "Address book is empty, skipping download");
            return Ok(report);
        }

        let mut checkpoint = Checkpoint::load(self.status.as_ref(), stream_type)?;
        let candidates = self.list_candidates(&book, &checkpoint).await;
        report.listed = candidates.len();
        if candidates.is_empty() {
            debug!(stream = %stream_type, "No new files");
            return Ok(report);
        }
        info!(stream = %stream_type, count = candidates.len(), "Downloading candidate files");

        let snapshot: &AddressBook = &book;
        let verified = stream::iter(candidates)
            .map(move |filename| self.verify_candidate(snapshot, filename))
            .buffered(self.settings.max_concurrent_files);
        futures::pin_mut!(verified);

        while let Some(mut candidate) = verified.next().await {
            if self.shutdown_requested() {
                info!(stream = %stream_type, "Shutdown requested, stopping batch");
                report.interrupted = true;
                break;
            }

            report
                .rejected_signatures
                .extend(candidate.records.iter().filter(|r| !r.is_valid()).cloned());

            let result = match candidate.outcome {
                ConsensusOutcome::Certified(result) => result,
                ConsensusOutcome::Pending { filename, best, required } => {
                    info!(
                        stream = %stream_type,
                        filename = %filename,
                        agreeing = best,
                        required,
                        "Consensus not reached, waiting for more signatures"
                    );
                    report.halted = Some(ImporterError::ConsensusPending {
                        filename,
                        agreeing: best,
                        required,
                    });
                    break;
                }
            };

            let Some(bytes) = candidate.data.remove(&result.winning_hash) else {
                report.halted = Some(ImporterError::Internal(format!(
                    "No verified copy of {} with hash {}",
                    result.filename, result.winning_hash
                )));
                break;
            };

            match self
                .complete_file(&mut checkpoint, &candidate.filename, &result, bytes, processor)
                .await
            {
                Ok(()) => report.processed.push(result.filename),
                Err(e) => {
                    if e.is_alerting() {
                        error!(alert = true, stream = %stream_type, filename = %candidate.filename, "{}", e);
                    } else {
                        warn!(stream = %stream_type, filename = %candidate.filename, "Batch halted: {}", e);
                    }
                    report.halted = Some(e);
                    break;
                }
            }
        }

        Ok(report)
    }

    /// Continuity check, staging, processing and checkpoint for one certified file.
    async fn complete_file(
        &self,
        checkpoint: &mut Checkpoint,
        filename: &StreamFilename,
        result: &ConsensusResult,
        bytes: Vec<u8>,
        processor: &dyn StreamFileProcessor,
    ) -> Result<(), ImporterError> {
        let stream_type = self.settings.stream_type;

        let declared = parser::previous_file_hash(stream_type, &bytes).map_err(|source| {
            ImporterError::Parse {
                filename: filename.name().to_string(),
                source,
            }
        })?;
        checkpoint.verify_continuity(stream_type, filename, declared)?;

        let path = self.staging.stage(filename.name(), &bytes).await?;
        let staged = StagedFile {
            stream_type,
            filename: filename.name().to_string(),
            path,
            file_hash: result.winning_hash,
        };

        match processor.process(&staged).await {
            Ok(outcome) => {
                self.consecutive_failures.store(0, Ordering::Relaxed);
                checkpoint.advance(self.status.as_ref(), stream_type, filename.name(), &result.winning_hash)?;
                match outcome {
                    ProcessOutcome::Committed { entries } => info!(
                        stream = %stream_type,
                        filename = %filename,
                        hash = %result.winning_hash,
                        nodes = result.agreeing_nodes.len(),
                        entries,
                        "Processed certified file"
                    ),
                    ProcessOutcome::AlreadyIngested => info!(
                        stream = %stream_type,
                        filename = %filename,
                        "File already ingested, checkpoint advanced"
                    ),
                }
                Ok(())
            }
            Err(e) => {
                let failures = self.consecutive_failures.fetch_add(1, Ordering::Relaxed) + 1;
                if failures >= self.settings.persistence_failure_alert_threshold {
                    error!(
                        alert = true,
                        stream = %stream_type,
                        filename = %filename,
                        failures,
                        "Repeated failures processing stream file: {}",
                        e
                    );
                }
                Err(e)
            }
        }
    }

    /// Union of new filenames across nodes, oldest first, limited to the batch size.
    async fn list_candidates(&self, book: &AddressBook, checkpoint: &Checkpoint) -> Vec<StreamFilename> {
        let last = checkpoint.last_valid_filename.as_deref();
        let listings = join_all(book.node_ids().map(|node| self.list_node(node, last))).await;

        let mut names = BTreeSet::new();
        for (node, listing) in book.node_ids().zip(listings) {
            match listing {
                Ok(found) => names.extend(found),
                Err(e) => warn!(stream = %self.settings.stream_type, node, "Listing failed: {}", e),
            }
        }
        names.into_iter().take(self.settings.batch_size).collect()
    }

    async fn list_node(
        &self,
        node: &str,
        last: Option<&str>,
    ) -> Result<Vec<StreamFilename>, ObjectStoreError> {
        let stream_type = self.settings.stream_type;
        let prefix = format!("{}/{}/", node, stream_type.path());
        let mut marker = last.map(|name| format!("{}{}", prefix, name));
        let mut found = Vec::new();

        loop {
            let page = self
                .store
                .list(
                    &self.settings.bucket_name,
                    &prefix,
                    marker.as_deref(),
                    self.settings.list_page_size,
                )
                .await?;

            for key in &page.keys {
                let Some(data_name) = key
                    .strip_prefix(&prefix)
                    .and_then(|name| name.strip_suffix(SIGNATURE_SUFFIX))
                else {
                    continue;
                };
                let Some(filename) = StreamFilename::parse(stream_type, data_name) else {
                    continue;
                };
                if last.map_or(true, |l| filename.is_after(l)) {
                    found.push(filename);
                }
            }

            if found.len() >= self.settings.batch_size {
                break;
            }
            match page.next_marker {
                Some(next) if marker.as_deref() != Some(next.as_str()) => marker = Some(next),
                _ => break,
            }
        }
        Ok(found)
    }

    /// Fetch and verify one filename from every known node, then select consensus.
    async fn verify_candidate(&self, book: &AddressBook, filename: StreamFilename) -> VerifiedCandidate {
        let results = join_all(
            book.node_ids()
                .map(|node| self.fetch_and_verify(book, node, &filename)),
        )
        .await;

        let mut records = Vec::with_capacity(results.len());
        let mut data = HashMap::new();
        for (record, bytes) in results {
            if let (true, Some(digest), Some(bytes)) = (record.is_valid(), record.digest, bytes) {
                data.entry(digest).or_insert(bytes);
            }
            if !record.is_valid() {
                debug!(
                    stream = %self.settings.stream_type,
                    filename = %filename,
                    node = %record.node_id,
                    "Signature rejected: {}",
                    record.status
                );
            }
            records.push(record);
        }

        let outcome = ConsensusSelector::select(filename.name(), &records, book);
        VerifiedCandidate {
            filename,
            records,
            outcome,
            data,
        }
    }

    async fn fetch_and_verify(
        &self,
        book: &AddressBook,
        node: &str,
        filename: &StreamFilename,
    ) -> (SignatureRecord, Option<Vec<u8>>) {
        let dir = format!("{}/{}", node, self.settings.stream_type.path());
        let data_key = format!("{}/{}", dir, filename.name());
        let sig_key = format!("{}/{}", dir, filename.signature_name());

        let (data, sig) = tokio::join!(self.fetch(&data_key), self.fetch(&sig_key));
        let (data, sig) = match (data, sig) {
            (Ok(data), Ok(sig)) => (data, sig),
            (Err(e), _) | (_, Err(e)) => {
                let status = SignatureStatus::FetchFailed(e.to_string());
                return (SignatureRecord::failed(node, filename.name(), status), None);
            }
        };

        let record = SignatureVerifier::verify(node, filename.name(), &data, &sig, book.get(node));
        (record, Some(data))
    }

    /// Get an object, retrying transient failures with linear backoff.
    async fn fetch(&self, key: &str) -> Result<Vec<u8>, ObjectStoreError> {
        let mut attempt = 0;
        loop {
            match self.store.get(&self.settings.bucket_name, key).await {
                Ok(bytes) => return Ok(bytes),
                Err(e) if e.is_transient() && attempt < self.settings.fetch_retries => {
                    attempt += 1;
                    debug!(key, attempt, "Retrying fetch: {}", e);
                    tokio::time::sleep(self.settings.fetch_retry_backoff * attempt).await;
                }
                Err(e) => return Err(e),
            }
        }
    }
}
