//! Importer wiring
//!
//! Owns one downloader + processor pair per enabled stream and drives their
//! download cycles on a fixed interval until shutdown.

use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use tokio::sync::watch;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{error, info};

use crate::addressbook::NetworkAddressBook;
use crate::config::Config;
use crate::db::MirrorDb;
use crate::domain::StreamType;
use crate::downloader::{CycleReport, Downloader, DownloaderSettings, ObjectStore};
use crate::error::ImporterError;
use crate::ingest::{BalanceFileProcessor, RecordFileProcessor, StreamFileProcessor};

struct Pipeline {
    downloader: Downloader,
    processor: Box<dyn StreamFileProcessor>,
}

pub struct Importer {
    pipelines: Vec<Pipeline>,
    frequency: Duration,
    db: Arc<MirrorDb>,
    address_book: Arc<NetworkAddressBook>,
    shutdown_tx: watch::Sender<bool>,
}

impl Importer {
    /// Open the database and address book named in the config.
    pub fn new(config: &Config, store: Arc<dyn ObjectStore>) -> Result<Self, ImporterError> {
        let db = Arc::new(MirrorDb::open(&config.importer.db_path)?);
        let address_book = Arc::new(NetworkAddressBook::load(&config.importer.address_book_path)?);
        Self::from_parts(config, db, address_book, store)
    }

    pub fn from_parts(
        config: &Config,
        db: Arc<MirrorDb>,
        address_book: Arc<NetworkAddressBook>,
        store: Arc<dyn ObjectStore>,
    ) -> Result<Self, ImporterError> {
        config.validate()?;
        let (shutdown_tx, _) = watch::channel(false);

        let mut pipelines = Vec::new();
        for stream_type in [StreamType::Record, StreamType::Balance] {
            if !config.downloader.stream(stream_type).enabled {
                info!(stream = %stream_type, "Stream disabled");
                continue;
            }
            let downloader = Downloader::new(
                DownloaderSettings::from_config(config, stream_type),
                store.clone(),
                db.clone(),
                address_book.clone(),
            )?
            .with_shutdown(shutdown_tx.subscribe());

            let processor: Box<dyn StreamFileProcessor> = match stream_type {
                StreamType::Record => Box::new(RecordFileProcessor::new(
                    db.clone(),
                    config.parser.clone(),
                    address_book.clone(),
                )?),
                StreamType::Balance => Box::new(BalanceFileProcessor::new(db.clone())),
            };
            pipelines.push(Pipeline {
                downloader,
                processor,
            });
        }

        Ok(Self {
            pipelines,
            frequency: config.downloader.frequency(),
            db,
            address_book,
            shutdown_tx,
        })
    }

    pub fn db(&self) -> &Arc<MirrorDb> {
        &self.db
    }

    pub fn address_book(&self) -> &Arc<NetworkAddressBook> {
        &self.address_book
    }

    /// Ask a running loop and any in-flight batch to stop.
    pub fn shutdown(&self) {
        self.shutdown_tx.send_replace(true);
    }

    /// One download cycle for every enabled stream.
    pub async fn run_once(&self) -> Vec<(StreamType, Result<CycleReport, ImporterError>)> {
        let cycles = self.pipelines.iter().map(|pipeline| async move {
            let stream_type = pipeline.downloader.stream_type();
            let result = pipeline.downloader.download(pipeline.processor.as_ref()).await;
            (stream_type, result)
        });
        join_all(cycles).await
    }

    /// Run download cycles until `shutdown` is called.
    pub async fn run(&self) {
        let mut shutdown_rx = self.shutdown_tx.subscribe();
        if *shutdown_rx.borrow() {
            return;
        }
        let mut tick = interval(self.frequency);
        tick.set_missed_tick_behavior(MissedTickBehavior::Delay);

        info!(
            streams = self.pipelines.len(),
            frequency_ms = self.frequency.as_millis() as u64,
            "Importer started"
        );

        loop {
            tokio::select! {
                _ = tick.tick() => {
                    for (stream_type, result) in self.run_once().await {
                        log_cycle(stream_type, result);
                    }
                }
                _ = shutdown_rx.changed() => {
                    info!("Importer shutting down");
                    break;
                }
            }
        }
    }
}

fn log_cycle(stream_type: StreamType, result: Result<CycleReport, ImporterError>) {
    match result {
        Ok(report) if report.listed > 0 => info!(
            stream = %stream_type,
            listed = report.listed,
            processed = report.processed.len(),
            rejected_signatures = report.rejected_signatures.len(),
            halted = report.halted.is_some(),
            "Download cycle finished"
        ),
        Ok(_) => {}
        Err(e) => error!(stream = %stream_type, error = %e, "Download cycle failed"),
    }
}
