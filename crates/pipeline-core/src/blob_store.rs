//! Blob Storage Abstraction
//!
//! Abstract interface for storing document binaries. Implementations can target local
//! filesystem (POC) or S3-compatible storage (production). [`BlobPath`] centralizes the
//! four layout conventions the stages write under, so concurrent writers never collide.

use async_trait::async_trait;
use std::path::PathBuf;

/// Error type for blob storage operations
#[derive(Debug, thiserror::Error)]
pub enum BlobStoreError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid blob reference: {0}")]
    InvalidRef(String),

    #[error("Blob not found: {0}")]
    NotFound(String),

    #[error("Storage error: {0}")]
    Storage(String),
}

/// Abstract blob storage for document binaries
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Store binary content, return reference URI
    async fn store(&self, key: &str, content: &[u8], content_type: &str) -> Result<String, BlobStoreError>;

    /// Fetch binary content by reference
    async fn fetch(&self, blob_ref: &str) -> Result<Vec<u8>, BlobStoreError>;

    /// Delete binary content
    async fn delete(&self, blob_ref: &str) -> Result<(), BlobStoreError>;

    /// Generate presigned URL for direct access (optional)
    async fn presigned_url(&self, _blob_ref: &str, _expires_secs: u64) -> Result<Option<String>, BlobStoreError> {
        Ok(None) // Default: not supported
    }

    /// Check if blob exists
    async fn exists(&self, blob_ref: &str) -> Result<bool, BlobStoreError>;

    /// List blob keys under a path prefix (used by the embeddings stage to enumerate a
    /// job's crawled pages without a side-channel index).
    async fn list_prefix(&self, prefix: &str) -> Result<Vec<String>, BlobStoreError>;
}

/// The pipeline's blob-path conventions. Keeping them in one place means every stage's
/// writes land in disjoint prefixes, which is what makes concurrent blob writes safe
/// without any cross-stage locking.
pub struct BlobPath;

impl BlobPath {
    pub fn crawled_page(domain: &str, sanitized_path: &str) -> String {
        format!("crawled-content/{domain}/{sanitized_path}.txt")
    }

    pub fn knowledge_base(kb_id: &str) -> String {
        format!("knowledgebase/processed/{kb_id}/knowledge_base.json")
    }

    pub fn progress_report(department_id: &str, timestamp: &str) -> String {
        format!("progress-reports/{department_id}/{timestamp}.md")
    }

    pub fn grievance_artifact(grievance_id: &str, file_name: &str) -> String {
        format!("griviences/{grievance_id}/{file_name}")
    }
}

/// Local filesystem implementation (for POC)
pub struct LocalBlobStore {
    base_path: PathBuf,
}

impl LocalBlobStore {
    pub fn new(base_path: impl Into<PathBuf>) -> Self {
        Self { base_path: base_path.into() }
    }

    /// Get the full path for a key
    fn path_for_key(&self, key: &str) -> PathBuf {
        self.base_path.join(key)
    }

    /// Extract path from blob_ref (file:// URI)
    fn path_from_ref(&self, blob_ref: &str) -> Result<PathBuf, BlobStoreError> {
        blob_ref
            .strip_prefix("file://")
            .map(PathBuf::from)
            .ok_or_else(|| BlobStoreError::InvalidRef(format!("Expected file:// prefix: {blob_ref}")))
    }
}

#[async_trait]
impl BlobStore for LocalBlobStore {
    async fn store(&self, key: &str, content: &[u8], _content_type: &str) -> Result<String, BlobStoreError> {
        let path = self.path_for_key(key);

        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        tokio::fs::write(&path, content).await?;
        Ok(format!("file://{}", path.display()))
    }

    async fn fetch(&self, blob_ref: &str) -> Result<Vec<u8>, BlobStoreError> {
        let path = self.path_from_ref(blob_ref)?;

        if !path.exists() {
            return Err(BlobStoreError::NotFound(blob_ref.to_string()));
        }

        Ok(tokio::fs::read(path).await?)
    }

    async fn delete(&self, blob_ref: &str) -> Result<(), BlobStoreError> {
        let path = self.path_from_ref(blob_ref)?;

        if path.exists() {
            tokio::fs::remove_file(path).await?;
        }

        Ok(())
    }

    async fn exists(&self, blob_ref: &str) -> Result<bool, BlobStoreError> {
        let path = self.path_from_ref(blob_ref)?;
        Ok(path.exists())
    }

    async fn list_prefix(&self, prefix: &str) -> Result<Vec<String>, BlobStoreError> {
        let dir = self.base_path.join(prefix);
        let mut out = Vec::new();
        if !dir.exists() {
            return Ok(out);
        }
        let mut stack = vec![dir];
        while let Some(current) = stack.pop() {
            let mut entries = tokio::fs::read_dir(&current).await?;
            while let Some(entry) = entries.next_entry().await? {
                let path = entry.path();
                if path.is_dir() {
                    stack.push(path);
                } else {
                    out.push(format!("file://{}", path.display()));
                }
            }
        }
        out.sort();
        Ok(out)
    }
}

/// In-memory blob store, used by worker tests and by the crawler's partial-upload tests
/// (kept out of `#[cfg(test)]` because it's also useful as a dependency-injected store for
/// binaries running in demo mode without a filesystem).
pub struct InMemoryBlobStore {
    blobs: std::sync::Arc<tokio::sync::RwLock<std::collections::HashMap<String, Vec<u8>>>>,
}

impl Default for InMemoryBlobStore {
    fn default() -> Self {
        Self { blobs: std::sync::Arc::new(tokio::sync::RwLock::new(std::collections::HashMap::new())) }
    }
}

impl InMemoryBlobStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl BlobStore for InMemoryBlobStore {
    async fn store(&self, key: &str, content: &[u8], _content_type: &str) -> Result<String, BlobStoreError> {
        let blob_ref = format!("memory://{key}");
        let mut blobs = self.blobs.write().await;
        blobs.insert(blob_ref.clone(), content.to_vec());
        Ok(blob_ref)
    }

    async fn fetch(&self, blob_ref: &str) -> Result<Vec<u8>, BlobStoreError> {
        let blobs = self.blobs.read().await;
        blobs.get(blob_ref).cloned().ok_or_else(|| BlobStoreError::NotFound(blob_ref.to_string()))
    }

    async fn delete(&self, blob_ref: &str) -> Result<(), BlobStoreError> {
        let mut blobs = self.blobs.write().await;
        blobs.remove(blob_ref);
        Ok(())
    }

    async fn exists(&self, blob_ref: &str) -> Result<bool, BlobStoreError> {
        let blobs = self.blobs.read().await;
        Ok(blobs.contains_key(blob_ref))
    }

    async fn list_prefix(&self, prefix: &str) -> Result<Vec<String>, BlobStoreError> {
        let full_prefix = format!("memory://{prefix}");
        let blobs = self.blobs.read().await;
        let mut keys: Vec<String> = blobs.keys().filter(|k| k.starts_with(&full_prefix)).cloned().collect();
        keys.sort();
        Ok(keys)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_local_blob_store_roundtrip() {
        let temp_dir = TempDir::new().unwrap();
        let store = LocalBlobStore::new(temp_dir.path());

        let content = b"Hello, World!";
        let key = BlobPath::crawled_page("example.gov", "notice");

        let blob_ref = store.store(&key, content, "text/plain").await.unwrap();
        assert!(blob_ref.starts_with("file://"));
        assert!(store.exists(&blob_ref).await.unwrap());

        let fetched = store.fetch(&blob_ref).await.unwrap();
        assert_eq!(fetched, content);

        store.delete(&blob_ref).await.unwrap();
        assert!(!store.exists(&blob_ref).await.unwrap());
    }

    #[tokio::test]
    async fn test_local_blob_store_nested_directories() {
        let temp_dir = TempDir::new().unwrap();
        let store = LocalBlobStore::new(temp_dir.path());

        let content = b"Nested content";
        let key = "a/b/c/deep/file.txt";

        let blob_ref = store.store(key, content, "text/plain").await.unwrap();
        let fetched = store.fetch(&blob_ref).await.unwrap();
        assert_eq!(fetched, content);
    }

    #[tokio::test]
    async fn test_local_blob_store_lists_by_prefix() {
        let temp_dir = TempDir::new().unwrap();
        let store = LocalBlobStore::new(temp_dir.path());

        store.store(&BlobPath::crawled_page("example.gov", "a"), b"a", "text/plain").await.unwrap();
        store.store(&BlobPath::crawled_page("example.gov", "b"), b"b", "text/plain").await.unwrap();
        store.store(&BlobPath::crawled_page("other.gov", "c"), b"c", "text/plain").await.unwrap();

        let listed = store.list_prefix("crawled-content/example.gov").await.unwrap();
        assert_eq!(listed.len(), 2);
    }

    #[tokio::test]
    async fn test_in_memory_blob_store() {
        let store = InMemoryBlobStore::new();

        let content = b"Test data";
        let key = "test-key";

        let blob_ref = store.store(key, content, "application/octet-stream").await.unwrap();
        assert!(store.exists(&blob_ref).await.unwrap());

        let fetched = store.fetch(&blob_ref).await.unwrap();
        assert_eq!(fetched, content);

        store.delete(&blob_ref).await.unwrap();
        assert!(!store.exists(&blob_ref).await.unwrap());
    }

    #[tokio::test]
    async fn test_not_found_error() {
        let store = InMemoryBlobStore::new();
        let result = store.fetch("memory://nonexistent").await;
        assert!(matches!(result, Err(BlobStoreError::NotFound(_))));
    }
}
