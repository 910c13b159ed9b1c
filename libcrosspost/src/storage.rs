//! Object store access for media bytes
//!
//! The pipeline only reads media (to upload it) and deletes it (deferred
//! cleanup). Keys are opaque, relative paths.

use std::collections::HashMap;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::fs;
use tokio::sync::RwLock;

use crate::error::StorageError;

pub type StorageResult<T> = std::result::Result<T, StorageError>;

#[async_trait]
pub trait MediaStore: Send + Sync {
    async fn read(&self, key: &str) -> StorageResult<Bytes>;

    async fn put(&self, key: &str, data: Bytes) -> StorageResult<()>;

    /// Delete an object. Returns `false` when it was already gone.
    async fn delete(&self, key: &str) -> StorageResult<bool>;
}

fn validate_key(key: &str) -> StorageResult<()> {
    if key.is_empty() || key.starts_with('/') || key.contains('\\') {
        return Err(StorageError::InvalidKey(key.to_string()));
    }
    let escapes = Path::new(key)
        .components()
        .any(|c| !matches!(c, Component::Normal(_)));
    if escapes {
        return Err(StorageError::InvalidKey(key.to_string()));
    }
    Ok(())
}

/// Objects stored as files under a root directory
#[derive(Debug, Clone)]
pub struct LocalMediaStore {
    root: PathBuf,
}

impl LocalMediaStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn from_config_path(path: &str) -> Self {
        Self::new(shellexpand::tilde(path).to_string())
    }

    fn key_to_path(&self, key: &str) -> StorageResult<PathBuf> {
        validate_key(key)?;
        Ok(self.root.join(key))
    }
}

#[async_trait]
impl MediaStore for LocalMediaStore {
    async fn read(&self, key: &str) -> StorageResult<Bytes> {
        let path = self.key_to_path(key)?;
        match fs::read(&path).await {
            Ok(data) => {
                tracing::debug!(key = %key, size_bytes = data.len(), "Read media object");
                Ok(Bytes::from(data))
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(StorageError::NotFound(key.to_string()))
            }
            Err(e) => Err(StorageError::IoError(e)),
        }
    }

    async fn put(&self, key: &str, data: Bytes) -> StorageResult<()> {
        let path = self.key_to_path(key)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }
        fs::write(&path, &data).await?;
        Ok(())
    }

    async fn delete(&self, key: &str) -> StorageResult<bool> {
        let path = self.key_to_path(key)?;
        match fs::remove_file(&path).await {
            Ok(()) => {
                tracing::info!(key = %key, "Deleted media object");
                Ok(true)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(StorageError::DeleteFailed(format!(
                "{}: {}",
                path.display(),
                e
            ))),
        }
    }
}

/// In-process store, for tests and dry runs
#[derive(Debug, Clone, Default)]
pub struct MemoryMediaStore {
    objects: Arc<RwLock<HashMap<String, Bytes>>>,
}

impl MemoryMediaStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn contains(&self, key: &str) -> bool {
        self.objects.read().await.contains_key(key)
    }
}

#[async_trait]
impl MediaStore for MemoryMediaStore {
    async fn read(&self, key: &str) -> StorageResult<Bytes> {
        validate_key(key)?;
        self.objects
            .read()
            .await
            .get(key)
            .cloned()
            .ok_or_else(|| StorageError::NotFound(key.to_string()))
    }

    async fn put(&self, key: &str, data: Bytes) -> StorageResult<()> {
        validate_key(key)?;
        self.objects.write().await.insert(key.to_string(), data);
        Ok(())
    }

    async fn delete(&self, key: &str) -> StorageResult<bool> {
        validate_key(key)?;
        Ok(self.objects.write().await.remove(key).is_some())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_local_store_put_read_delete() {
        let temp_dir = TempDir::new().unwrap();
        let store = LocalMediaStore::new(temp_dir.path());

        store
            .put("user-1/photo.png", Bytes::from_static(b"png-bytes"))
            .await
            .unwrap();
        assert_eq!(
            store.read("user-1/photo.png").await.unwrap(),
            Bytes::from_static(b"png-bytes")
        );

        assert!(store.delete("user-1/photo.png").await.unwrap());
        assert!(matches!(
            store.read("user-1/photo.png").await,
            Err(StorageError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_local_store_delete_missing_is_noop() {
        let temp_dir = TempDir::new().unwrap();
        let store = LocalMediaStore::new(temp_dir.path());
        assert!(!store.delete("never-written.mp4").await.unwrap());
    }

    #[tokio::test]
    async fn test_keys_cannot_escape_root() {
        let temp_dir = TempDir::new().unwrap();
        let store = LocalMediaStore::new(temp_dir.path());

        for key in ["../etc/passwd", "/etc/passwd", "a/../../b", "", "./x"] {
            assert!(
                matches!(store.delete(key).await, Err(StorageError::InvalidKey(_))),
                "key {:?} should be rejected",
                key
            );
        }
    }

    #[tokio::test]
    async fn test_memory_store() {
        let store = MemoryMediaStore::new();
        store.put("k", Bytes::from_static(b"v")).await.unwrap();
        assert!(store.contains("k").await);
        assert!(store.delete("k").await.unwrap());
        assert!(!store.delete("k").await.unwrap());
        assert!(!store.contains("k").await);
    }
}
