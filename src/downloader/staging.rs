//! Valid-file staging area
//!
//! Certified files land in `<data_path>/<streamDir>/valid/`. Each write goes to
//! a hidden temp file first and is renamed into place, so readers never see a
//! partial file.

use std::path::{Path, PathBuf};

use tracing::debug;

use crate::domain::StreamType;
use crate::error::ImporterError;

pub struct Staging {
    valid_dir: PathBuf,
}

impl Staging {
    /// Create the valid directory for a stream.
    pub fn new(data_path: &Path, stream_type: StreamType) -> Result<Self, ImporterError> {
        let valid_dir = data_path.join(stream_type.path()).join("valid");
        std::fs::create_dir_all(&valid_dir)?;
        Ok(Self { valid_dir })
    }

    pub fn valid_dir(&self) -> &Path {
        &self.valid_dir
    }

    /// Write a certified file, replacing any earlier copy.
    pub async fn stage(&self, filename: &str, bytes: &[u8]) -> Result<PathBuf, ImporterError> {
        let target = self.valid_dir.join(filename);
        let tmp = self.valid_dir.join(format!(".{}.tmp", filename));

        let staging_error = |source| ImporterError::Staging {
            filename: filename.to_string(),
            source,
        };
        tokio::fs::write(&tmp, bytes).await.map_err(staging_error)?;
        if let Err(source) = tokio::fs::rename(&tmp, &target).await {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(staging_error(source));
        }

        debug!(filename, path = %target.display(), "Staged certified file");
        Ok(target)
    }
}
