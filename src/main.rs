//! mirror-importer: downloads, verifies and ingests node stream files

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tracing::{error, info};

use mirror_importer::checkpoint::{self, Checkpoint};
use mirror_importer::db::MirrorDb;
use mirror_importer::domain::StreamType;
use mirror_importer::downloader::FsObjectStore;
use mirror_importer::{Config, Importer};

#[derive(Parser)]
#[command(name = "mirror-importer")]
#[command(about = "Downloads, verifies and ingests hashgraph stream files")]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "mirror-importer.toml")]
    config: String,

    /// Data directory (overrides config file)
    #[arg(short, long, env = "MIRROR_IMPORTER_DATA_DIR")]
    data_dir: Option<String>,

    /// Local directory holding the stream buckets (overrides config file)
    #[arg(long, env = "MIRROR_IMPORTER_BUCKET_ROOT")]
    bucket_root: Option<String>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Run download cycles until interrupted (default)
    Run,

    /// Run a single download cycle per stream
    Once,

    /// Print checkpoints and row counts
    Status,

    /// Let files at or after an instant through a hash chain mismatch
    Bypass {
        /// Stream type (record or balance)
        #[arg(long)]
        stream: StreamType,

        /// Instant or stream filename
        #[arg(long)]
        until: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("mirror_importer=info".parse()?),
        )
        .init();

    let cli = Cli::parse();

    info!("Config file: {}", cli.config);
    let mut config = Config::load(std::path::Path::new(&cli.config))?;

    if let Some(data_dir) = cli.data_dir {
        let data_dir = PathBuf::from(data_dir);
        config.importer.db_path = data_dir.join("mirror.db");
        config.importer.address_book_path = data_dir.join("addressbook.json");
        config.importer.data_path = data_dir;
    }
    if let Some(bucket_root) = cli.bucket_root {
        config.downloader.bucket_root = PathBuf::from(bucket_root);
    }

    info!("Data dir: {}", config.importer.data_path.display());
    info!("Bucket: {}/{}", config.downloader.bucket_root.display(), config.downloader.bucket_name);

    match cli.command.unwrap_or(Command::Run) {
        Command::Status => {
            let db = MirrorDb::open(&config.importer.db_path)?;
            for stream_type in [StreamType::Record, StreamType::Balance] {
                let checkpoint = Checkpoint::load(&db, stream_type)?;
                println!(
                    "{:<8} last file: {}  hash: {}  bypass until: {}",
                    stream_type,
                    checkpoint.last_valid_filename.as_deref().unwrap_or("-"),
                    checkpoint
                        .last_valid_hash
                        .map(|h| h.to_hex())
                        .unwrap_or_else(|| "-".to_string()),
                    checkpoint.bypass_until.as_deref().unwrap_or("-"),
                );
            }
            println!("{}", serde_json::to_string_pretty(&db.stats()?)?);
            Ok(())
        }
        Command::Bypass { stream, until } => {
            let db = MirrorDb::open(&config.importer.db_path)?;
            checkpoint::set_bypass(&db, stream, &until)?;
            println!("{} hash mismatch bypass set until {}", stream, until);
            Ok(())
        }
        Command::Once => {
            let store = Arc::new(FsObjectStore::new(&config.downloader.bucket_root));
            let importer = Importer::new(&config, store)?;
            let mut failed = false;
            for (stream_type, result) in importer.run_once().await {
                match result {
                    Ok(report) => {
                        println!(
                            "{}: {} listed, {} processed{}",
                            stream_type,
                            report.listed,
                            report.processed.len(),
                            report
                                .halted
                                .map(|e| format!(", halted: {}", e))
                                .unwrap_or_default()
                        );
                    }
                    Err(e) => {
                        error!(stream = %stream_type, error = %e, "Download cycle failed");
                        failed = true;
                    }
                }
            }
            if failed {
                std::process::exit(1);
            }
            Ok(())
        }
        Command::Run => {
            let store = Arc::new(FsObjectStore::new(&config.downloader.bucket_root));
            let importer = Arc::new(Importer::new(&config, store)?);

            let signal_importer = importer.clone();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    info!("Received Ctrl-C");
                    signal_importer.shutdown();
                }
            });

            importer.run().await;
            info!("mirror-importer stopped");
            Ok(())
        }
    }
}
