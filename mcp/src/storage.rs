//! Blob storage for oversized tool results.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use tracing::debug;
use uuid::Uuid;

use crate::{
    core::config::StorageConfig,
    error::{McpError, McpResult},
};

/// External store for full payloads. Returns a URL for the stored object.
#[async_trait]
pub trait BlobStore: Send + Sync {
    async fn put(&self, bucket: &str, bytes: Vec<u8>, content_type: &str) -> McpResult<String>;
}

fn extension_for(content_type: &str) -> &'static str {
    match content_type.split(';').next().map(str::trim) {
        Some("application/json") => "json",
        Some("text/plain") => "txt",
        _ => "bin",
    }
}

/// Writes blobs under `<root>/<bucket>/<yyyymmdd>/<uuid>.<ext>`.
#[derive(Debug, Clone)]
pub struct LocalBlobStore {
    root: PathBuf,
    public_base_url: Option<String>,
}

impl LocalBlobStore {
    pub fn new(root: impl Into<PathBuf>, public_base_url: Option<String>) -> Self {
        Self {
            root: root.into(),
            public_base_url: public_base_url.map(|u| u.trim_end_matches('/').to_string()),
        }
    }

    /// Store described by configuration, if a directory is set.
    pub fn from_config(config: &StorageConfig) -> Option<Self> {
        config
            .directory
            .as_ref()
            .map(|dir| Self::new(dir.clone(), config.public_base_url.clone()))
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

#[async_trait]
impl BlobStore for LocalBlobStore {
    async fn put(&self, bucket: &str, bytes: Vec<u8>, content_type: &str) -> McpResult<String> {
        let day = Utc::now().format("%Y%m%d").to_string();
        let file = format!("{}.{}", Uuid::new_v4(), extension_for(content_type));
        let dir = self.root.join(bucket).join(&day);

        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|e| McpError::Storage(format!("create {}: {}", dir.display(), e)))?;
        let path = dir.join(&file);
        tokio::fs::write(&path, &bytes)
            .await
            .map_err(|e| McpError::Storage(format!("write {}: {}", path.display(), e)))?;

        debug!(path = %path.display(), bytes = bytes.len(), "Stored blob");

        Ok(match &self.public_base_url {
            Some(base) => format!("{base}/{bucket}/{day}/{file}"),
            None => {
                let abs = tokio::fs::canonicalize(&path).await.unwrap_or(path);
                format!("file://{}", abs.display())
            }
        })
    }
}

/// Stored object in a [`MemoryBlobStore`].
#[derive(Debug, Clone)]
pub struct StoredBlob {
    pub bucket: String,
    pub content_type: String,
    pub bytes: Vec<u8>,
}

/// Blob store held in memory, for tests and dry runs.
#[derive(Debug, Default)]
pub struct MemoryBlobStore {
    blobs: DashMap<String, StoredBlob>,
    fail: bool,
}

impl MemoryBlobStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// A store whose every `put` fails.
    pub fn failing() -> Self {
        Self {
            blobs: DashMap::new(),
            fail: true,
        }
    }

    pub fn get(&self, url: &str) -> Option<StoredBlob> {
        self.blobs.get(url).map(|e| e.value().clone())
    }

    pub fn len(&self) -> usize {
        self.blobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blobs.is_empty()
    }
}

#[async_trait]
impl BlobStore for MemoryBlobStore {
    async fn put(&self, bucket: &str, bytes: Vec<u8>, content_type: &str) -> McpResult<String> {
        if self.fail {
            return Err(McpError::Storage("memory store rejected write".to_string()));
        }
        let url = format!("memory://{}/{}", bucket, Uuid::new_v4());
        self.blobs.insert(
            url.clone(),
            StoredBlob {
                bucket: bucket.to_string(),
                content_type: content_type.to_string(),
                bytes,
            },
        );
        Ok(url)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_local_store_writes_file() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalBlobStore::new(dir.path(), None);

        let url = store
            .put("tool-results", b"{\"a\":1}".to_vec(), "application/json")
            .await
            .unwrap();
        assert!(url.starts_with("file://"));
        assert!(url.ends_with(".json"));

        let path = url.trim_start_matches("file://");
        let content = tokio::fs::read_to_string(path).await.unwrap();
        assert_eq!(content, "{\"a\":1}");
    }

    #[tokio::test]
    async fn test_local_store_public_url() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalBlobStore::new(dir.path(), Some("https://cdn.example.com/".to_string()));

        let url = store
            .put("results", b"hello".to_vec(), "text/plain; charset=utf-8")
            .await
            .unwrap();
        assert!(url.starts_with("https://cdn.example.com/results/"));
        assert!(url.ends_with(".txt"));
    }

    #[tokio::test]
    async fn test_memory_store() {
        let store = MemoryBlobStore::new();
        let url = store.put("b", vec![1, 2, 3], "application/octet-stream").await.unwrap();
        let blob = store.get(&url).unwrap();
        assert_eq!(blob.bytes, vec![1, 2, 3]);
        assert_eq!(blob.bucket, "b");

        let failing = MemoryBlobStore::failing();
        assert!(matches!(
            failing.put("b", vec![], "text/plain").await,
            Err(McpError::Storage(_))
        ));
        assert!(failing.is_empty());
    }

    #[test]
    fn test_from_config() {
        assert!(LocalBlobStore::from_config(&StorageConfig::default()).is_none());
        let config = StorageConfig {
            directory: Some(PathBuf::from("/tmp/blobs")),
            public_base_url: None,
        };
        let store = LocalBlobStore::from_config(&config).unwrap();
        assert_eq!(store.root(), Path::new("/tmp/blobs"));
    }
}
