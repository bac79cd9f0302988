//! Handoff of the final artifact to the object store.

use std::path::Path;
use tracing::info;
use uuid::Uuid;

use crate::error::{StorageError, StorageResult};
use crate::store::ObjectStore;

/// Content type of every delivered artifact.
pub const VIDEO_CONTENT_TYPE: &str = "video/mp4";

/// Upload `path` to `key` with overwrite semantics.
///
/// Any prior object at the key is deleted first; a missing object is not
/// an error. A conflict on upload surfaces as [`StorageError::Conflict`].
pub async fn deliver(store: &dyn ObjectStore, path: &Path, key: &str) -> StorageResult<()> {
    validate_key(key)?;

    store.delete(key).await?;
    store.put_file(path, key, VIDEO_CONTENT_TYPE).await?;

    info!(key, path = %path.display(), "Delivered artifact");
    Ok(())
}

fn validate_key(key: &str) -> StorageResult<()> {
    if key.trim().is_empty() || key.starts_with('/') || key.split('/').any(|part| part == "..") {
        return Err(StorageError::InvalidKey(key.to_string()));
    }
    Ok(())
}

/// Fresh key derived from `key`: a short random suffix before the extension.
///
/// `exports/final.mp4` becomes e.g. `exports/final-1a2b3c4d.mp4`.
pub fn unique_destination_key(key: &str) -> String {
    let suffix = Uuid::new_v4().simple().to_string();
    let suffix = &suffix[..8];

    let (dir, file) = match key.rsplit_once('/') {
        Some((dir, file)) => (Some(dir), file),
        None => (None, key),
    };
    let file = match file.rsplit_once('.') {
        Some((stem, ext)) if !stem.is_empty() => format!("{}-{}.{}", stem, suffix, ext),
        _ => format!("{}-{}", file, suffix),
    };

    match dir {
        Some(dir) => format!("{}/{}", dir, file),
        None => file,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::sync::Mutex;

    #[derive(Default)]
    struct MemoryStore {
        objects: Mutex<HashMap<String, Vec<u8>>>,
        ops: Mutex<Vec<String>>,
        conflict_keys: Vec<String>,
    }

    #[async_trait]
    impl ObjectStore for MemoryStore {
        async fn delete(&self, key: &str) -> StorageResult<()> {
            self.ops.lock().unwrap().push(format!("delete {}", key));
            self.objects.lock().unwrap().remove(key);
            Ok(())
        }

        async fn put_file(&self, path: &Path, key: &str, content_type: &str) -> StorageResult<()> {
            self.ops
                .lock()
                .unwrap()
                .push(format!("put {} {}", key, content_type));
            if self.conflict_keys.iter().any(|k| k == key) {
                return Err(StorageError::Conflict {
                    key: key.to_string(),
                    message: "409".to_string(),
                });
            }
            let data = tokio::fs::read(path).await?;
            self.objects.lock().unwrap().insert(key.to_string(), data);
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_deliver_deletes_then_uploads() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("final.mp4");
        tokio::fs::write(&path, b"new").await.unwrap();

        let store = MemoryStore::default();
        store
            .objects
            .lock()
            .unwrap()
            .insert("final.mp4".to_string(), b"old".to_vec());

        deliver(&store, &path, "final.mp4").await.unwrap();

        assert_eq!(
            *store.ops.lock().unwrap(),
            vec!["delete final.mp4", "put final.mp4 video/mp4"]
        );
        assert_eq!(store.objects.lock().unwrap()["final.mp4"], b"new".to_vec());
    }

    #[tokio::test]
    async fn test_deliver_surfaces_conflict() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("final.mp4");
        tokio::fs::write(&path, b"x").await.unwrap();

        let store = MemoryStore {
            conflict_keys: vec!["final.mp4".to_string()],
            ..Default::default()
        };

        let err = deliver(&store, &path, "final.mp4").await.unwrap_err();
        assert!(err.is_conflict());

        let retry_key = unique_destination_key("final.mp4");
        deliver(&store, &path, &retry_key).await.unwrap();
        assert!(store.objects.lock().unwrap().contains_key(&retry_key));
    }

    #[tokio::test]
    async fn test_invalid_keys_rejected() {
        let store = MemoryStore::default();
        for key in ["", "/abs.mp4", "a/../b.mp4"] {
            let err = deliver(&store, Path::new("/nope"), key).await.unwrap_err();
            assert!(matches!(err, StorageError::InvalidKey(_)));
        }
        assert!(store.ops.lock().unwrap().is_empty());
    }

    #[test]
    fn test_unique_destination_key() {
        let key = unique_destination_key("exports/final.mp4");
        assert!(key.starts_with("exports/final-"));
        assert!(key.ends_with(".mp4"));
        assert_eq!(key.len(), "exports/final-.mp4".len() + 8);
        assert_ne!(key, unique_destination_key("exports/final.mp4"));

        assert!(unique_destination_key("noext").starts_with("noext-"));
        assert!(unique_destination_key(".hidden").starts_with(".hidden-"));
    }
}
