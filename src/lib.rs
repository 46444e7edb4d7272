//! mirror-importer: ingestion core of a hashgraph mirror node
//!
//! Network nodes each upload stream files (transaction records and account
//! balance snapshots) with a signature file to shared object storage. This
//! crate decides which files a two-thirds majority of nodes agree on, checks
//! the hash chain, and persists the decoded ledger state incrementally and
//! idempotently.

pub mod addressbook;
pub mod checkpoint;
pub mod config;
pub mod db;
pub mod domain;
pub mod downloader;
pub mod error;
pub mod importer;
pub mod ingest;
pub mod parser;

pub use config::Config;
pub use error::ImporterError;
pub use importer::Importer;
