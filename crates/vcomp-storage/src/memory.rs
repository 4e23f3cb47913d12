//! In-process artifact store for tests and local runs.

use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::error::{StorageError, StorageResult};
use crate::store::ArtifactStore;

#[derive(Debug, Default)]
pub struct MemoryArtifactStore {
    objects: RwLock<HashMap<String, Vec<u8>>>,
    puts: AtomicU64,
    /// Fail uploads, simulating an unavailable store
    fail_puts: AtomicBool,
}

impl MemoryArtifactStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed an object directly.
    pub async fn insert(&self, key: impl Into<String>, bytes: impl Into<Vec<u8>>) {
        self.objects.write().await.insert(key.into(), bytes.into());
    }

    pub async fn get_bytes(&self, key: &str) -> Option<Vec<u8>> {
        self.objects.read().await.get(key).cloned()
    }

    /// Keys under `prefix`, sorted.
    pub async fn keys_with_prefix(&self, prefix: &str) -> Vec<String> {
        let mut keys: Vec<String> = self
            .objects
            .read()
            .await
            .keys()
            .filter(|k| k.starts_with(prefix))
            .cloned()
            .collect();
        keys.sort();
        keys
    }

    /// Total number of uploads, including overwrites.
    pub fn put_count(&self) -> u64 {
        self.puts.load(Ordering::SeqCst)
    }

    pub fn set_fail_puts(&self, fail: bool) {
        self.fail_puts.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl ArtifactStore for MemoryArtifactStore {
    async fn put_file(&self, key: &str, path: &Path, _content_type: &str) -> StorageResult<()> {
        if self.fail_puts.load(Ordering::SeqCst) {
            return Err(StorageError::upload_failed("store unavailable"));
        }
        let bytes = tokio::fs::read(path).await?;
        self.objects.write().await.insert(key.to_string(), bytes);
        self.puts.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn get_file(&self, key: &str, path: &Path) -> StorageResult<()> {
        let bytes = self
            .get_bytes(key)
            .await
            .ok_or_else(|| StorageError::not_found(key))?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(path, bytes).await?;
        Ok(())
    }

    async fn exists(&self, key: &str) -> StorageResult<bool> {
        Ok(self.objects.read().await.contains_key(key))
    }

    async fn check_connectivity(&self) -> StorageResult<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_put_overwrites_same_key() {
        let store = MemoryArtifactStore::new();
        let dir = tempfile::tempdir().unwrap();
        let first = dir.path().join("a.mp4");
        let second = dir.path().join("b.mp4");
        tokio::fs::write(&first, b"first render").await.unwrap();
        tokio::fs::write(&second, b"second render").await.unwrap();

        store.put_file("jobs/j/final.mp4", &first, "video/mp4").await.unwrap();
        store.put_file("jobs/j/final.mp4", &second, "video/mp4").await.unwrap();

        assert_eq!(store.keys_with_prefix("jobs/j/").await, vec!["jobs/j/final.mp4"]);
        assert_eq!(store.get_bytes("jobs/j/final.mp4").await.unwrap(), b"second render");
        assert_eq!(store.put_count(), 2);
    }

    #[tokio::test]
    async fn test_get_missing_is_not_found() {
        let store = MemoryArtifactStore::new();
        let dir = tempfile::tempdir().unwrap();
        let err = store.get_file("nope", &dir.path().join("x")).await.unwrap_err();
        assert!(matches!(err, StorageError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_get_creates_parent_dirs() {
        let store = MemoryArtifactStore::new();
        store.insert("k", b"data".to_vec()).await;
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("nested/deeper/base.mp4");
        store.get_file("k", &target).await.unwrap();
        assert_eq!(tokio::fs::read(&target).await.unwrap(), b"data");
    }
}
