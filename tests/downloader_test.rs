//! Download cycle tests over a simulated four-node network

mod common;

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use async_trait::async_trait;

use mirror_importer::addressbook::NetworkAddressBook;
use mirror_importer::checkpoint::{self, Checkpoint, StatusStore};
use mirror_importer::db::MirrorDb;
use mirror_importer::domain::{FileHash, StreamType};
use mirror_importer::downloader::{Downloader, FsObjectStore, SignatureStatus};
use mirror_importer::error::ImporterError;
use mirror_importer::ingest::{ProcessOutcome, RecordFileProcessor, StagedFile, StreamFileProcessor};

use common::*;

struct Harness {
    network: Network,
    db: Arc<MirrorDb>,
    book: Arc<NetworkAddressBook>,
    config: mirror_importer::Config,
}

impl Harness {
    fn new(nodes: u8) -> Self {
        let network = Network::new(nodes);
        let db = Arc::new(MirrorDb::open_in_memory().unwrap());
        let book = network.network_address_book();
        let config = network.config();
        Self {
            network,
            db,
            book,
            config,
        }
    }

    fn record_downloader(&self) -> Downloader {
        self.network
            .downloader(&self.config, StreamType::Record, self.db.clone(), self.book.clone())
    }

    fn checkpoint(&self, stream_type: StreamType) -> Checkpoint {
        Checkpoint::load(self.db.as_ref(), stream_type).unwrap()
    }

    /// Two chained V2 record files with two transfers each
    fn upload_record_chain(&self) -> (Vec<u8>, Vec<u8>) {
        let first = v2_file(Some(FileHash::ZERO), &[transfer_entry(100), transfer_entry(101)]);
        let second = v2_file(
            Some(FileHash::digest(&first)),
            &[transfer_entry(102), transfer_entry(103)],
        );
        self.network.upload_all(StreamType::Record, &record_filename(0), &first);
        self.network.upload_all(StreamType::Record, &record_filename(5), &second);
        (first, second)
    }
}

/// Fails the first files handed to it, then ingests normally
struct FlakyProcessor {
    inner: RecordFileProcessor,
    failures_left: AtomicU32,
}

impl FlakyProcessor {
    fn new(inner: RecordFileProcessor, failures: u32) -> Self {
        Self {
            inner,
            failures_left: AtomicU32::new(failures),
        }
    }
}

#[async_trait]
impl StreamFileProcessor for FlakyProcessor {
    async fn process(&self, file: &StagedFile) -> Result<ProcessOutcome, ImporterError> {
        let left = self.failures_left.load(Ordering::SeqCst);
        if left > 0 {
            self.failures_left.store(left - 1, Ordering::SeqCst);
            return Err(ImporterError::Persistence {
                filename: file.filename.clone(),
                reason: "database is locked".to_string(),
            });
        }
        self.inner.process(file).await
    }
}

#[tokio::test]
async fn test_certified_files_are_ingested_in_order() {
    let h = Harness::new(4);
    let (_, second) = h.upload_record_chain();

    let processor = record_processor(h.db.clone(), &h.config, h.book.clone());
    let report = h.record_downloader().download(&processor).await.unwrap();

    assert_eq!(report.processed, vec![record_filename(0), record_filename(5)]);
    assert!(report.halted.is_none());
    assert!(report.rejected_signatures.is_empty());

    let checkpoint = h.checkpoint(StreamType::Record);
    assert_eq!(checkpoint.last_valid_filename, Some(record_filename(5)));
    assert_eq!(checkpoint.last_valid_hash, Some(FileHash::digest(&second)));

    let stats = h.db.stats().unwrap();
    assert_eq!(stats.record_files, 2);
    assert_eq!(stats.transactions, 4);
    assert_eq!(stats.crypto_transfers, 12);
    assert_eq!(stats.entities, 3);

    // Staged copies are byte-identical to the certified data
    let staged = h
        .config
        .importer
        .data_path
        .join("recordstreams/valid")
        .join(record_filename(5));
    assert_eq!(std::fs::read(staged).unwrap(), second);

    // Nothing new on the next cycle
    let report = h.record_downloader().download(&processor).await.unwrap();
    assert_eq!(report.listed, 0);
}

#[tokio::test]
async fn test_fewer_than_two_thirds_signatures_is_pending() {
    let h = Harness::new(4);
    let data = v2_file(None, &[transfer_entry(100)]);
    h.network.upload(StreamType::Record, &record_filename(0), &data, &[0, 1]);

    let processor = record_processor(h.db.clone(), &h.config, h.book.clone());
    let report = h.record_downloader().download(&processor).await.unwrap();

    assert!(report.processed.is_empty());
    match report.halted {
        Some(ImporterError::ConsensusPending { agreeing, required, .. }) => {
            assert_eq!(agreeing, 2);
            assert_eq!(required, 3);
        }
        other => panic!("expected pending consensus, got {:?}", other),
    }
    assert_eq!(h.checkpoint(StreamType::Record), Checkpoint::default());
    assert_eq!(h.db.stats().unwrap().transactions, 0);

    // A late third signature certifies the file on the next cycle
    h.network.upload(StreamType::Record, &record_filename(0), &data, &[2]);
    let report = h.record_downloader().download(&processor).await.unwrap();
    assert_eq!(report.processed, vec![record_filename(0)]);
}

#[tokio::test]
async fn test_corrupted_signature_excluded_but_majority_certifies() {
    let h = Harness::new(4);
    let data = v2_file(None, &[transfer_entry(100)]);
    h.network.upload_all(StreamType::Record, &record_filename(0), &data);

    let sig_path = h
        .network
        .object_path(0, StreamType::Record, &format!("{}_sig", record_filename(0)));
    let mut sig = std::fs::read(&sig_path).unwrap();
    let last = sig.len() - 1;
    sig[last] ^= 0x01;
    std::fs::write(&sig_path, sig).unwrap();

    let processor = record_processor(h.db.clone(), &h.config, h.book.clone());
    let report = h.record_downloader().download(&processor).await.unwrap();

    assert_eq!(report.processed, vec![record_filename(0)]);
    assert_eq!(report.rejected_signatures.len(), 1);
    assert_eq!(report.rejected_signatures[0].node_id, "0.0.3");
    assert_eq!(report.rejected_signatures[0].status, SignatureStatus::InvalidSignature);
}

#[tokio::test]
async fn test_corrupted_data_blocks_certification() {
    let h = Harness::new(4);
    let data = v2_file(None, &[transfer_entry(100)]);
    h.network.upload_all(StreamType::Record, &record_filename(0), &data);

    let mut corrupted = data.clone();
    corrupted[20] ^= 0xff;
    for node in 0..4 {
        h.network.put(node, StreamType::Record, &record_filename(0), &corrupted);
    }

    let processor = record_processor(h.db.clone(), &h.config, h.book.clone());
    let report = h.record_downloader().download(&processor).await.unwrap();

    assert!(report.processed.is_empty());
    assert!(matches!(report.halted, Some(ImporterError::ConsensusPending { agreeing: 0, .. })));
    assert!(report
        .rejected_signatures
        .iter()
        .all(|r| r.status == SignatureStatus::HashMismatch));
    assert_eq!(h.db.stats().unwrap().transactions, 0);
}

#[tokio::test]
async fn test_missing_files_from_one_node_tolerated() {
    let h = Harness::new(4);
    let data = v2_file(None, &[transfer_entry(100)]);
    h.network.upload(StreamType::Record, &record_filename(0), &data, &[0, 1, 2]);
    // Node 3 has a signature but no data file
    h.network.put(
        3,
        StreamType::Record,
        &format!("{}_sig", record_filename(0)),
        &h.network.signature(3, &data),
    );

    let processor = record_processor(h.db.clone(), &h.config, h.book.clone());
    let report = h.record_downloader().download(&processor).await.unwrap();

    assert_eq!(report.processed, vec![record_filename(0)]);
    assert!(matches!(
        report.rejected_signatures[0].status,
        SignatureStatus::FetchFailed(_)
    ));
}

#[tokio::test]
async fn test_balance_batch_size_one_takes_one_file_per_cycle() {
    let mut h = Harness::new(4);
    h.config.downloader.balance.batch_size = 1;
    h.network.upload_all(
        StreamType::Balance,
        &balance_filename(15),
        &balance_snapshot(15, &[(2, 100), (3, 200)]),
    );
    h.network.upload_all(
        StreamType::Balance,
        &balance_filename(30),
        &balance_snapshot(30, &[(2, 90), (3, 210)]),
    );

    let downloader =
        h.network
            .downloader(&h.config, StreamType::Balance, h.db.clone(), h.book.clone());
    let processor = balance_processor(h.db.clone());

    let report = downloader.download(&processor).await.unwrap();
    assert_eq!(report.processed, vec![balance_filename(15)]);
    assert_eq!(h.db.stats().unwrap().balance_sets, 1);

    let report = downloader.download(&processor).await.unwrap();
    assert_eq!(report.processed, vec![balance_filename(30)]);
    assert_eq!(h.db.stats().unwrap().balance_sets, 2);
    assert_eq!(h.db.stats().unwrap().balances, 4);
}

#[tokio::test]
async fn test_hash_mismatch_halts_until_bypassed() {
    let h = Harness::new(4);
    let first = v2_file(None, &[transfer_entry(100)]);
    let broken = v2_file(Some(FileHash::digest(b"not the first file")), &[transfer_entry(101)]);
    h.network.upload_all(StreamType::Record, &record_filename(0), &first);
    h.network.upload_all(StreamType::Record, &record_filename(5), &broken);

    let processor = record_processor(h.db.clone(), &h.config, h.book.clone());
    let report = h.record_downloader().download(&processor).await.unwrap();

    assert_eq!(report.processed, vec![record_filename(0)]);
    match &report.halted {
        Some(e @ ImporterError::ContinuityViolation { filename, .. }) => {
            assert_eq!(filename, &record_filename(5));
            assert!(e.is_alerting());
        }
        other => panic!("expected continuity violation, got {:?}", other),
    }
    assert_eq!(
        h.checkpoint(StreamType::Record).last_valid_filename,
        Some(record_filename(0))
    );
    assert_eq!(h.db.stats().unwrap().transactions, 1);

    // A bypass after the file does not apply
    checkpoint::set_bypass(h.db.as_ref(), StreamType::Record, &record_filename(6)).unwrap();
    let report = h.record_downloader().download(&processor).await.unwrap();
    assert!(report.processed.is_empty());

    // A bypass at the file's timestamp lets it through
    checkpoint::set_bypass(h.db.as_ref(), StreamType::Record, &record_filename(5)).unwrap();
    let report = h.record_downloader().download(&processor).await.unwrap();
    assert_eq!(report.processed, vec![record_filename(5)]);
    assert_eq!(h.db.stats().unwrap().transactions, 2);
}

#[tokio::test]
async fn test_v1_files_skip_continuity() {
    let h = Harness::new(4);
    h.db
        .set(
            StreamType::Record.last_valid_hash_code(),
            &FileHash::digest(b"anything").to_hex(),
        )
        .unwrap();
    h.network
        .upload_all(StreamType::Record, &record_filename(0), &v1_file(&[transfer_entry(100)]));

    let processor = record_processor(h.db.clone(), &h.config, h.book.clone());
    let report = h.record_downloader().download(&processor).await.unwrap();
    assert_eq!(report.processed, vec![record_filename(0)]);
}

#[tokio::test]
async fn test_redownload_from_older_checkpoint_is_idempotent() {
    let h = Harness::new(4);
    h.upload_record_chain();
    let processor = record_processor(h.db.clone(), &h.config, h.book.clone());

    h.record_downloader().download(&processor).await.unwrap();
    let before = h.db.stats().unwrap();

    // Rewind the checkpoint so both files are listed, verified and staged again
    h.db.set(StreamType::Record.last_valid_file_code(), "").unwrap();
    h.db.set(StreamType::Record.last_valid_hash_code(), "").unwrap();

    let downloader = Downloader::new(
        mirror_importer::downloader::DownloaderSettings::from_config(&h.config, StreamType::Record),
        Arc::new(FsObjectStore::new(h.network.bucket_root()).echo_marker(true)),
        h.db.clone(),
        h.book.clone(),
    )
    .unwrap();
    let report = downloader.download(&processor).await.unwrap();

    assert_eq!(report.processed.len(), 2);
    assert_eq!(h.db.stats().unwrap(), before);
    assert_eq!(
        h.checkpoint(StreamType::Record).last_valid_filename,
        Some(record_filename(5))
    );
}

#[tokio::test]
async fn test_small_pages_without_marker_echo() {
    let mut h = Harness::new(4);
    h.config.downloader.list_page_size = 2;
    h.upload_record_chain();
    let processor = record_processor(h.db.clone(), &h.config, h.book.clone());

    let report = h.record_downloader().download(&processor).await.unwrap();
    assert_eq!(report.processed, vec![record_filename(0), record_filename(5)]);
}

#[tokio::test]
async fn test_listing_resumes_after_checkpoint_with_echoing_store() {
    let mut h = Harness::new(4);
    h.config.downloader.list_page_size = 2;
    h.upload_record_chain();
    let processor = record_processor(h.db.clone(), &h.config, h.book.clone());

    let downloader = Downloader::new(
        mirror_importer::downloader::DownloaderSettings::from_config(&h.config, StreamType::Record),
        Arc::new(FsObjectStore::new(h.network.bucket_root()).echo_marker(true)),
        h.db.clone(),
        h.book.clone(),
    )
    .unwrap();

    let report = downloader.download(&processor).await.unwrap();
    assert_eq!(report.processed, vec![record_filename(0), record_filename(5)]);

    let report = downloader.download(&processor).await.unwrap();
    assert_eq!(report.listed, 0);
}

#[tokio::test]
async fn test_empty_address_book_downloads_nothing() {
    let h = Harness::new(4);
    h.upload_record_chain();
    let book = Arc::new(
        NetworkAddressBook::load(&h.network.data_path().join("missing-addressbook.json")).unwrap(),
    );

    let processor = record_processor(h.db.clone(), &h.config, book.clone());
    let downloader = h
        .network
        .downloader(&h.config, StreamType::Record, h.db.clone(), book);
    let report = downloader.download(&processor).await.unwrap();

    assert_eq!(report.listed, 0);
    let valid_dir = downloader.staging().valid_dir().to_path_buf();
    assert_eq!(std::fs::read_dir(valid_dir).unwrap().count(), 0);
    assert_eq!(h.db.stats().unwrap().record_files, 0);
}

#[tokio::test]
async fn test_staging_failure_halts_without_checkpoint() {
    let h = Harness::new(4);
    h.upload_record_chain();
    let downloader = h.record_downloader();
    std::fs::remove_dir_all(downloader.staging().valid_dir()).unwrap();

    let processor = record_processor(h.db.clone(), &h.config, h.book.clone());
    let report = downloader.download(&processor).await.unwrap();

    assert!(report.processed.is_empty());
    assert!(matches!(report.halted, Some(ImporterError::Staging { .. })));
    assert_eq!(h.checkpoint(StreamType::Record), Checkpoint::default());
}

#[tokio::test]
async fn test_unparseable_certified_file_is_rejected() {
    let h = Harness::new(4);
    h.network
        .upload_all(StreamType::Record, &record_filename(0), b"definitely not a record file");

    let processor = record_processor(h.db.clone(), &h.config, h.book.clone());
    let report = h.record_downloader().download(&processor).await.unwrap();

    assert!(report.processed.is_empty());
    assert!(matches!(report.halted, Some(ImporterError::Parse { .. })));
    assert_eq!(h.checkpoint(StreamType::Record), Checkpoint::default());
}

#[tokio::test]
async fn test_shutdown_stops_between_files() {
    let h = Harness::new(4);
    h.upload_record_chain();
    let (tx, rx) = tokio::sync::watch::channel(true);

    let processor = record_processor(h.db.clone(), &h.config, h.book.clone());
    let report = h
        .record_downloader()
        .with_shutdown(rx)
        .download(&processor)
        .await
        .unwrap();

    assert!(report.interrupted);
    assert!(report.processed.is_empty());
    drop(tx);
}

#[tokio::test]
async fn test_persistence_failure_halts_and_file_retried_next_cycle() {
    let mut h = Harness::new(4);
    h.config.downloader.persistence_failure_alert_threshold = 2;
    let (_, second) = h.upload_record_chain();

    let processor = FlakyProcessor::new(record_processor(h.db.clone(), &h.config, h.book.clone()), 2);
    let downloader = h.record_downloader();

    for failures in 1..=2 {
        let report = downloader.download(&processor).await.unwrap();
        assert!(report.processed.is_empty());
        match &report.halted {
            Some(ImporterError::Persistence { filename, .. }) => assert_eq!(filename, &record_filename(0)),
            other => panic!("expected persistence failure, got {:?}", other),
        }
        assert_eq!(h.checkpoint(StreamType::Record), Checkpoint::default());
        assert_eq!(h.db.stats().unwrap().transactions, 0);
        assert_eq!(downloader.consecutive_failures(), failures);
    }

    let report = downloader.download(&processor).await.unwrap();
    assert_eq!(report.processed, vec![record_filename(0), record_filename(5)]);
    assert!(report.halted.is_none());
    assert_eq!(downloader.consecutive_failures(), 0);

    let checkpoint = h.checkpoint(StreamType::Record);
    assert_eq!(checkpoint.last_valid_filename, Some(record_filename(5)));
    assert_eq!(checkpoint.last_valid_hash, Some(FileHash::digest(&second)));
    assert_eq!(h.db.stats().unwrap().transactions, 4);
}
