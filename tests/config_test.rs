use std::path::PathBuf;

use mirror_importer::config::Config;
use mirror_importer::domain::{EntityId, StreamType};
use mirror_importer::error::ImporterError;
use tempfile::TempDir;

#[test]
fn test_defaults() {
    let config = Config::default();
    assert!(config.validate().is_ok());
    assert_eq!(config.importer.data_path, PathBuf::from("./data"));
    assert_eq!(config.downloader.bucket_name, "hedera-demo-streams");
    assert_eq!(config.downloader.stream(StreamType::Record).batch_size, 100);
    assert_eq!(config.downloader.stream(StreamType::Balance).batch_size, 15);
    assert_eq!(config.downloader.frequency().as_millis(), 500);
    assert!(config.parser.persist_files);
    assert!(config.parser.persist_system_files);
    assert!(config.parser.persist_crypto_transfer_amounts);
    assert_eq!(config.parser.address_book_entity().unwrap(), EntityId::new(0, 0, 102));
}

#[test]
fn test_partial_toml_keeps_defaults() {
    let config = Config::from_toml(
        r#"
        [importer]
        data_path = "/var/lib/mirror"

        [downloader]
        bucket_name = "mainnet-streams"
        max_concurrent_files = 2

        [downloader.balance]
        enabled = false

        [parser]
        persist_files = false
        "#,
    )
    .unwrap();

    assert_eq!(config.importer.data_path, PathBuf::from("/var/lib/mirror"));
    assert_eq!(config.importer.db_path, PathBuf::from("./data/mirror.db"));
    assert_eq!(config.downloader.bucket_name, "mainnet-streams");
    assert_eq!(config.downloader.max_concurrent_files, 2);
    assert_eq!(config.downloader.list_page_size, 1000);
    assert!(config.downloader.record.enabled);
    assert!(!config.downloader.balance.enabled);
    assert!(!config.parser.persist_files);
    assert!(config.parser.persist_system_files);
}

#[test]
fn test_invalid_address_book_file_rejected() {
    let err = Config::from_toml(
        r#"
        [parser]
        address_book_file = "not-an-entity"
        "#,
    )
    .unwrap_err();
    assert!(matches!(err, ImporterError::Config(_)));
}

#[test]
fn test_zero_batch_size_rejected() {
    let err = Config::from_toml(
        r#"
        [downloader.record]
        batch_size = 0
        "#,
    )
    .unwrap_err();
    assert!(matches!(err, ImporterError::Config(_)));
}

#[test]
fn test_load_missing_file_uses_defaults() {
    let dir = TempDir::new().unwrap();
    let config = Config::load(&dir.path().join("absent.toml")).unwrap();
    assert_eq!(config.downloader.max_concurrent_files, 5);
}

#[test]
fn test_load_from_file() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("mirror-importer.toml");
    std::fs::write(&path, "[downloader]\nfrequency_ms = 2000\n").unwrap();

    let config = Config::load(&path).unwrap();
    assert_eq!(config.downloader.frequency().as_secs(), 2);
}
