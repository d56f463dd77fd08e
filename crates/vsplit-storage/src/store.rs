//! Object storage gateway.

use std::path::Path;

use async_trait::async_trait;
use tracing::debug;

use crate::error::StorageResult;

/// Whole-object access to durable storage.
///
/// Implementations must bound every call with a timeout; callers never wait
/// indefinitely on the store.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Read a whole object. Missing keys yield [`StorageError::NotFound`].
    ///
    /// [`StorageError::NotFound`]: crate::StorageError::NotFound
    async fn get(&self, key: &str) -> StorageResult<Vec<u8>>;

    /// Create or replace an object.
    async fn put(&self, key: &str, data: Vec<u8>, content_type: &str) -> StorageResult<()>;

    /// Delete an object. Deleting a missing key is not an error.
    async fn delete(&self, key: &str) -> StorageResult<()>;

    /// Keys starting with `prefix`, sorted.
    async fn list(&self, prefix: &str) -> StorageResult<Vec<String>>;

    async fn exists(&self, key: &str) -> StorageResult<bool>;

    /// Download an object into a local file, returning its size.
    async fn download_to(&self, key: &str, path: &Path) -> StorageResult<u64> {
        let bytes = self.get(key).await?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let size = bytes.len() as u64;
        tokio::fs::write(path, bytes).await?;
        debug!("Downloaded {} to {} ({} bytes)", key, path.display(), size);
        Ok(size)
    }

    /// Upload a local file.
    async fn upload_from(&self, path: &Path, key: &str, content_type: &str) -> StorageResult<()> {
        let bytes = tokio::fs::read(path).await?;
        debug!("Uploading {} to {} ({} bytes)", path.display(), key, bytes.len());
        self.put(key, bytes, content_type).await
    }
}

/// Content type for an object key, based on its extension.
pub fn content_type_for(key: &str) -> &'static str {
    let ext = key
        .rsplit_once('.')
        .map(|(_, ext)| ext.to_lowercase())
        .unwrap_or_default();

    match ext.as_str() {
        "mp4" => "video/mp4",
        "m4v" => "video/x-m4v",
        "mov" => "video/quicktime",
        "mkv" => "video/x-matroska",
        "webm" => "video/webm",
        "avi" => "video/x-msvideo",
        "txt" => "text/plain; charset=utf-8",
        "json" => "application/json",
        _ => "application/octet-stream",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_content_type_for() {
        assert_eq!(content_type_for("clip/part0.mp4"), "video/mp4");
        assert_eq!(content_type_for("a/b.MOV"), "video/quicktime");
        assert_eq!(content_type_for("clip/manifest.mp4.txt"), "text/plain; charset=utf-8");
        assert_eq!(content_type_for("noext"), "application/octet-stream");
    }
}
