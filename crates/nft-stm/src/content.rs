//! Content upload boundary.
//!
//! Binary payloads for content-reference attributes are stored out of band;
//! the returned URI becomes the attribute's value.

use async_trait::async_trait;
use std::collections::HashMap;
use std::path::PathBuf;
use tokio::sync::RwLock;

#[derive(Debug, thiserror::Error)]
pub enum ContentStoreError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid content reference: {0}")]
    InvalidRef(String),

    #[error("Content not found: {0}")]
    NotFound(String),
}

#[async_trait]
pub trait ContentStore: Send + Sync {
    /// Store `bytes` under `key`, returning the content URI.
    async fn upload(
        &self,
        key: &str,
        bytes: &[u8],
        content_type: &str,
    ) -> Result<String, ContentStoreError>;

    async fn fetch(&self, content_ref: &str) -> Result<Vec<u8>, ContentStoreError>;
}

/// Filesystem store handing out `file://` URIs.
pub struct LocalContentStore {
    base_path: PathBuf,
}

impl LocalContentStore {
    pub fn new(base_path: impl Into<PathBuf>) -> Self {
        Self {
            base_path: base_path.into(),
        }
    }

    fn path_from_ref(&self, content_ref: &str) -> Result<PathBuf, ContentStoreError> {
        content_ref
            .strip_prefix("file://")
            .map(PathBuf::from)
            .ok_or_else(|| {
                ContentStoreError::InvalidRef(format!("Expected file:// prefix: {}", content_ref))
            })
    }
}

#[async_trait]
impl ContentStore for LocalContentStore {
    async fn upload(
        &self,
        key: &str,
        bytes: &[u8],
        _content_type: &str,
    ) -> Result<String, ContentStoreError> {
        if key.is_empty() || key.contains("..") || key.starts_with('/') {
            return Err(ContentStoreError::InvalidRef(key.to_string()));
        }
        let path = self.base_path.join(key);
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        // Re-uploading the same key replaces the previous content.
        tokio::fs::write(&path, bytes).await?;
        Ok(format!("file://{}", path.display()))
    }

    async fn fetch(&self, content_ref: &str) -> Result<Vec<u8>, ContentStoreError> {
        let path = self.path_from_ref(content_ref)?;
        if !path.exists() {
            return Err(ContentStoreError::NotFound(content_ref.to_string()));
        }
        Ok(tokio::fs::read(path).await?)
    }
}

/// In-memory store handing out `memory://` URIs.
#[derive(Default)]
pub struct MemoryContentStore {
    blobs: RwLock<HashMap<String, (String, Vec<u8>)>>,
}

impl MemoryContentStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn is_empty(&self) -> bool {
        self.blobs.read().await.is_empty()
    }

    #[cfg(test)]
    async fn content_type(&self, content_ref: &str) -> Option<String> {
        self.blobs
            .read()
            .await
            .get(content_ref)
            .map(|(ct, _)| ct.clone())
    }
}

#[async_trait]
impl ContentStore for MemoryContentStore {
    async fn upload(
        &self,
        key: &str,
        bytes: &[u8],
        content_type: &str,
    ) -> Result<String, ContentStoreError> {
        let content_ref = format!("memory://{}", key);
        let mut blobs = self.blobs.write().await;
        blobs.insert(content_ref.clone(), (content_type.to_string(), bytes.to_vec()));
        Ok(content_ref)
    }

    async fn fetch(&self, content_ref: &str) -> Result<Vec<u8>, ContentStoreError> {
        let blobs = self.blobs.read().await;
        blobs
            .get(content_ref)
            .map(|(_, bytes)| bytes.clone())
            .ok_or_else(|| ContentStoreError::NotFound(content_ref.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_local_upload_and_fetch() {
        let temp_dir = TempDir::new().unwrap();
        let store = LocalContentStore::new(temp_dir.path());

        let uri = store
            .upload("nft_1_image", b"png bytes", "image/png")
            .await
            .unwrap();
        assert!(uri.starts_with("file://"));
        assert!(url::Url::parse(&uri).is_ok());
        assert_eq!(store.fetch(&uri).await.unwrap(), b"png bytes");
    }

    #[tokio::test]
    async fn test_local_reupload_replaces() {
        let temp_dir = TempDir::new().unwrap();
        let store = LocalContentStore::new(temp_dir.path());

        let first = store.upload("nft_1_image", b"old", "image/png").await.unwrap();
        let second = store.upload("nft_1_image", b"new", "image/png").await.unwrap();
        assert_eq!(first, second);
        assert_eq!(store.fetch(&second).await.unwrap(), b"new");
    }

    #[tokio::test]
    async fn test_local_rejects_escaping_keys() {
        let temp_dir = TempDir::new().unwrap();
        let store = LocalContentStore::new(temp_dir.path());
        let result = store.upload("../outside", b"x", "text/plain").await;
        assert!(matches!(result, Err(ContentStoreError::InvalidRef(_))));
    }

    #[tokio::test]
    async fn test_memory_store() {
        let store = MemoryContentStore::new();
        let uri = store.upload("nft_2_video", b"mp4", "video/mp4").await.unwrap();
        assert_eq!(uri, "memory://nft_2_video");
        assert_eq!(store.fetch(&uri).await.unwrap(), b"mp4");
        assert_eq!(store.content_type(&uri).await.as_deref(), Some("video/mp4"));
        assert!(matches!(
            store.fetch("memory://missing").await,
            Err(ContentStoreError::NotFound(_))
        ));
    }
}
