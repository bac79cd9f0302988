//! Object-store seam consumed by delivery.

use async_trait::async_trait;
use std::path::Path;

use crate::error::StorageResult;

/// Minimal operations delivery needs from a remote store.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Delete `key`. Deleting a missing object succeeds.
    async fn delete(&self, key: &str) -> StorageResult<()>;

    /// Upload the file at `path` to `key`, replacing any existing object.
    async fn put_file(&self, path: &Path, key: &str, content_type: &str) -> StorageResult<()>;
}
