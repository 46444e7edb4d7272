//! Object storage access
//!
//! Keys follow the bucket layout `nodeId/streamDir/filename[_sig]`. Listing is
//! paged and ordered by key, starting strictly after a marker.

use std::io;
use std::path::PathBuf;

use async_trait::async_trait;
use thiserror::Error;
use tracing::debug;

#[derive(Error, Debug)]
pub enum ObjectStoreError {
    #[error("Object not found: {0}")]
    NotFound(String),

    #[error("I/O error on {key}: {source}")]
    Io {
        key: String,
        #[source]
        source: io::Error,
    },

    #[error("Invalid key: {0}")]
    InvalidKey(String),
}

impl ObjectStoreError {
    /// Worth retrying within the same cycle
    pub fn is_transient(&self) -> bool {
        matches!(self, ObjectStoreError::Io { .. })
    }
}

/// One page of a listing
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ListPage {
    pub keys: Vec<String>,
    /// Marker for the next page; `None` when the listing is exhausted
    pub next_marker: Option<String>,
}

#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// List keys under `prefix` that sort after `start_after`.
    async fn list(
        &self,
        bucket: &str,
        prefix: &str,
        start_after: Option<&str>,
        max_keys: usize,
    ) -> Result<ListPage, ObjectStoreError>;

    async fn get(&self, bucket: &str, key: &str) -> Result<Vec<u8>, ObjectStoreError>;
}

/// Local directory laid out like a bucket: `root/bucket/key`
pub struct FsObjectStore {
    root: PathBuf,
    echo_marker: bool,
}

impl FsObjectStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            echo_marker: false,
        }
    }

    /// Include the marker key itself at the head of each page, as some
    /// S3-compatible stores do.
    pub fn echo_marker(mut self, echo: bool) -> Self {
        self.echo_marker = echo;
        self
    }

    fn object_path(&self, bucket: &str, key: &str) -> Result<PathBuf, ObjectStoreError> {
        if key.split('/').any(|part| part == "..") || key.starts_with('/') {
            return Err(ObjectStoreError::InvalidKey(key.to_string()));
        }
        Ok(self.root.join(bucket).join(key))
    }
}

#[async_trait]
impl ObjectStore for FsObjectStore {
    async fn list(
        &self,
        bucket: &str,
        prefix: &str,
        start_after: Option<&str>,
        max_keys: usize,
    ) -> Result<ListPage, ObjectStoreError> {
        let dir = self.object_path(bucket, prefix)?;
        let mut entries = match tokio::fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(ListPage::default()),
            Err(source) => {
                return Err(ObjectStoreError::Io {
                    key: prefix.to_string(),
                    source,
                })
            }
        };

        let mut keys = Vec::new();
        loop {
            let entry = entries.next_entry().await.map_err(|source| ObjectStoreError::Io {
                key: prefix.to_string(),
                source,
            })?;
            let Some(entry) = entry else { break };
            let Ok(name) = entry.file_name().into_string() else {
                continue;
            };
            if name.starts_with('.') {
                continue;
            }
            keys.push(format!("{}{}", prefix, name));
        }
        keys.sort();

        let mut page: Vec<String> = keys
            .into_iter()
            .filter(|key| match start_after {
                Some(marker) if self.echo_marker => key.as_str() >= marker,
                Some(marker) => key.as_str() > marker,
                None => true,
            })
            .collect();

        let next_marker = if page.len() > max_keys {
            page.truncate(max_keys);
            page.last().cloned()
        } else {
            None
        };

        debug!(bucket, prefix, count = page.len(), "Listed objects");
        Ok(ListPage {
            keys: page,
            next_marker,
        })
    }

    async fn get(&self, bucket: &str, key: &str) -> Result<Vec<u8>, ObjectStoreError> {
        let path = self.object_path(bucket, key)?;
        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(bytes),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                Err(ObjectStoreError::NotFound(key.to_string()))
            }
            Err(source) => Err(ObjectStoreError::Io {
                key: key.to_string(),
                source,
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    async fn store_with(names: &[&str]) -> (TempDir, FsObjectStore) {
        let dir = TempDir::new().unwrap();
        let node_dir = dir.path().join("bucket").join("0.0.3").join("recordstreams");
        tokio::fs::create_dir_all(&node_dir).await.unwrap();
        for name in names {
            tokio::fs::write(node_dir.join(name), name.as_bytes()).await.unwrap();
        }
        let store = FsObjectStore::new(dir.path());
        (dir, store)
    }

    #[tokio::test]
    async fn test_list_pages_after_marker() {
        let (_dir, store) = store_with(&["a.rcd", "a.rcd_sig", "b.rcd", "b.rcd_sig"]).await;
        let prefix = "0.0.3/recordstreams/";

        let first = store.list("bucket", prefix, None, 3).await.unwrap();
        assert_eq!(first.keys.len(), 3);
        assert_eq!(first.next_marker.as_deref(), Some("0.0.3/recordstreams/b.rcd"));

        let second = store
            .list("bucket", prefix, first.next_marker.as_deref(), 3)
            .await
            .unwrap();
        assert_eq!(second.keys, vec!["0.0.3/recordstreams/b.rcd_sig".to_string()]);
        assert!(second.next_marker.is_none());
    }

    #[tokio::test]
    async fn test_echo_marker_repeats_marker_key() {
        let (_dir, store) = store_with(&["a.rcd", "b.rcd"]).await;
        let store = store.echo_marker(true);
        let page = store
            .list("bucket", "0.0.3/recordstreams/", Some("0.0.3/recordstreams/a.rcd"), 10)
            .await
            .unwrap();
        assert_eq!(page.keys[0], "0.0.3/recordstreams/a.rcd");
    }

    #[tokio::test]
    async fn test_missing_prefix_and_object() {
        let (_dir, store) = store_with(&[]).await;
        let page = store.list("bucket", "0.0.9/recordstreams/", None, 10).await.unwrap();
        assert!(page.keys.is_empty());
        assert!(matches!(
            store.get("bucket", "0.0.3/recordstreams/none.rcd").await,
            Err(ObjectStoreError::NotFound(_))
        ));
        assert!(matches!(
            store.get("bucket", "../escape").await,
            Err(ObjectStoreError::InvalidKey(_))
        ));
    }
}
