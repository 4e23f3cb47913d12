//! Storage seam used by the pipeline and workers.

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;

use crate::error::StorageResult;

/// Object store holding job artifacts.
///
/// `put_file` overwrites: writing the same key twice leaves one object.
#[async_trait]
pub trait ArtifactStore: Send + Sync {
    async fn put_file(&self, key: &str, path: &Path, content_type: &str) -> StorageResult<()>;

    /// Download `key` to `path`, creating parent directories.
    async fn get_file(&self, key: &str, path: &Path) -> StorageResult<()>;

    async fn exists(&self, key: &str) -> StorageResult<bool>;

    /// Time-limited download URL, when the backend can issue one.
    async fn presign_get(&self, _key: &str, _expires_in: Duration) -> StorageResult<Option<String>> {
        Ok(None)
    }

    async fn check_connectivity(&self) -> StorageResult<()>;
}
