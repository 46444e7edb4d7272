//! Importer configuration

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::domain::{EntityId, StreamType};
use crate::error::ImporterError;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub importer: ImporterConfig,
    #[serde(default)]
    pub downloader: DownloaderConfig,
    #[serde(default)]
    pub parser: ParserConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImporterConfig {
    /// Root of the staging area; `<data_path>/<streamDir>/valid` per stream
    #[serde(default = "default_data_path")]
    pub data_path: PathBuf,

    /// SQLite database file
    #[serde(default = "default_db_path")]
    pub db_path: PathBuf,

    /// Initial address book document
    #[serde(default = "default_address_book_path")]
    pub address_book_path: PathBuf,
}

impl Default for ImporterConfig {
    fn default() -> Self {
        Self {
            data_path: default_data_path(),
            db_path: default_db_path(),
            address_book_path: default_address_book_path(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DownloaderConfig {
    #[serde(default = "default_bucket_name")]
    pub bucket_name: String,

    /// Directory standing in for the object store; buckets are subdirectories
    #[serde(default = "default_bucket_root")]
    pub bucket_root: PathBuf,

    /// Interval between download cycles
    #[serde(default = "default_frequency_ms")]
    pub frequency_ms: u64,

    /// Candidate files verified concurrently
    #[serde(default = "default_max_concurrent_files")]
    pub max_concurrent_files: usize,

    #[serde(default = "default_list_page_size")]
    pub list_page_size: usize,

    /// Retries of a transient fetch failure within one cycle
    #[serde(default = "default_fetch_retries")]
    pub fetch_retries: u32,

    #[serde(default = "default_fetch_retry_backoff_ms")]
    pub fetch_retry_backoff_ms: u64,

    /// Consecutive processing failures before an alert is raised
    #[serde(default = "default_persistence_failure_alert_threshold")]
    pub persistence_failure_alert_threshold: u32,

    #[serde(default = "StreamConfig::record_default")]
    pub record: StreamConfig,

    #[serde(default = "StreamConfig::balance_default")]
    pub balance: StreamConfig,
}

impl Default for DownloaderConfig {
    fn default() -> Self {
        Self {
            bucket_name: default_bucket_name(),
            bucket_root: default_bucket_root(),
            frequency_ms: default_frequency_ms(),
            max_concurrent_files: default_max_concurrent_files(),
            list_page_size: default_list_page_size(),
            fetch_retries: default_fetch_retries(),
            fetch_retry_backoff_ms: default_fetch_retry_backoff_ms(),
            persistence_failure_alert_threshold: default_persistence_failure_alert_threshold(),
            record: StreamConfig::record_default(),
            balance: StreamConfig::balance_default(),
        }
    }
}

impl DownloaderConfig {
    pub fn stream(&self, stream_type: StreamType) -> &StreamConfig {
        match stream_type {
            StreamType::Record => &self.record,
            StreamType::Balance => &self.balance,
        }
    }

    pub fn frequency(&self) -> Duration {
        Duration::from_millis(self.frequency_ms)
    }
}

/// Per-stream downloader settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Files processed per cycle
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
}

impl StreamConfig {
    fn record_default() -> Self {
        Self {
            enabled: true,
            batch_size: default_batch_size(),
        }
    }

    fn balance_default() -> Self {
        Self {
            enabled: true,
            batch_size: 15,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParserConfig {
    /// Persist contents of files numbered at or above `system_file_threshold`
    #[serde(default = "default_true")]
    pub persist_files: bool,

    /// Persist contents of files numbered below `system_file_threshold`
    #[serde(default = "default_true")]
    pub persist_system_files: bool,

    #[serde(default = "default_true")]
    pub persist_crypto_transfer_amounts: bool,

    #[serde(default = "default_system_file_threshold")]
    pub system_file_threshold: i64,

    /// File entity holding the network address book
    #[serde(default = "default_address_book_file")]
    pub address_book_file: String,
}

impl Default for ParserConfig {
    fn default() -> Self {
        Self {
            persist_files: true,
            persist_system_files: true,
            persist_crypto_transfer_amounts: true,
            system_file_threshold: default_system_file_threshold(),
            address_book_file: default_address_book_file(),
        }
    }
}

impl ParserConfig {
    pub fn address_book_entity(&self) -> Result<EntityId, ImporterError> {
        self.address_book_file
            .parse()
            .map_err(ImporterError::Config)
    }
}

// Defaults
fn default_data_path() -> PathBuf { PathBuf::from("./data") }
fn default_db_path() -> PathBuf { PathBuf::from("./data/mirror.db") }
fn default_address_book_path() -> PathBuf { PathBuf::from("./data/addressbook.json") }
fn default_bucket_name() -> String { "hedera-demo-streams".to_string() }
fn default_bucket_root() -> PathBuf { PathBuf::from("./buckets") }
fn default_frequency_ms() -> u64 { 500 }
fn default_max_concurrent_files() -> usize { 5 }
fn default_list_page_size() -> usize { 1000 }
fn default_fetch_retries() -> u32 { 2 }
fn default_fetch_retry_backoff_ms() -> u64 { 200 }
fn default_persistence_failure_alert_threshold() -> u32 { 3 }
fn default_batch_size() -> usize { 100 }
fn default_system_file_threshold() -> i64 { 1000 }
fn default_address_book_file() -> String { "0.0.102".to_string() }
fn default_true() -> bool { true }

impl Config {
    /// Load from a TOML file, falling back to defaults when it does not exist.
    pub fn load(path: &Path) -> Result<Self, ImporterError> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> Result<Self, ImporterError> {
        let config: Config = toml::from_str(content)
            .map_err(|e| ImporterError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ImporterError> {
        self.parser.address_book_entity()?;
        if self.downloader.max_concurrent_files == 0 {
            return Err(ImporterError::Config("max_concurrent_files must be at least 1".into()));
        }
        if self.downloader.list_page_size < 2 {
            return Err(ImporterError::Config("list_page_size must be at least 2".into()));
        }
        for stream_type in [StreamType::Record, StreamType::Balance] {
            if self.downloader.stream(stream_type).batch_size == 0 {
                return Err(ImporterError::Config(format!(
                    "{} batch_size must be at least 1",
                    stream_type
                )));
            }
        }
        Ok(())
    }
}
