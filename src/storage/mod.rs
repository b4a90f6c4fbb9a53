//! Object store gateway.
//!
//! The engine touches blob storage in two roles: reading source documents
//! and writing its run/per-item logs. Both go through the [`ObjectStore`]
//! trait so deployments can plug in their store of choice while tests and
//! local runs use [`MemoryObjectStore`]. Individual operations are bounded
//! by [`with_op_timeout`] so a stalled store call cannot wedge an item task.

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use crate::error::{Error, Result, StorageError};

/// Default per-operation timeout in seconds (`BLOB_OP_TIMEOUT_SECONDS`).
pub const DEFAULT_BLOB_OP_TIMEOUT_SECS: u64 = 20;

/// Metadata of one stored blob.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlobInfo {
    /// Blob name (path within the container).
    pub name: String,

    /// Size in bytes.
    pub size: u64,

    /// Last-modified timestamp.
    pub last_modified: DateTime<Utc>,

    /// Content type, when recorded.
    pub content_type: Option<String>,

    /// User-defined metadata key/value pairs (keys lowercased).
    pub metadata: BTreeMap<String, String>,
}

/// Asynchronous object store contract.
///
/// Operations address blobs as `(container, name)`. Implementations must be
/// safe for concurrent callers.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Lists blobs in a container whose names start with `prefix`.
    async fn list(&self, container: &str, prefix: &str) -> Result<Vec<BlobInfo>>;

    /// Downloads a blob's bytes.
    async fn download(&self, container: &str, name: &str) -> Result<Bytes>;

    /// Uploads bytes, overwriting any existing blob.
    async fn upload(
        &self,
        container: &str,
        name: &str,
        data: Bytes,
        content_type: &str,
    ) -> Result<()>;

    /// Reads one blob's info, including user metadata.
    async fn info(&self, container: &str, name: &str) -> Result<BlobInfo>;

    /// Deletes a blob. Deleting a missing blob is not an error.
    async fn delete(&self, container: &str, name: &str) -> Result<()>;

    /// Checks blob existence.
    async fn exists(&self, container: &str, name: &str) -> Result<bool>;
}

/// Applies the per-operation deadline to a storage future.
///
/// # Errors
///
/// Returns [`Error::Timeout`] when the deadline elapses, otherwise the
/// operation's own result.
pub async fn with_op_timeout<T>(
    operation: &str,
    timeout: Duration,
    fut: impl Future<Output = Result<T>>,
) -> Result<T> {
    match tokio::time::timeout(timeout, fut).await {
        Ok(result) => result,
        Err(_) => Err(Error::Timeout {
            operation: operation.to_string(),
            seconds: timeout.as_secs(),
        }),
    }
}

#[derive(Debug, Clone)]
struct StoredBlob {
    data: Bytes,
    content_type: String,
    last_modified: DateTime<Utc>,
    metadata: BTreeMap<String, String>,
}

/// In-memory object store for tests and local runs.
///
/// Containers are created implicitly on first write. Listing is ordered by
/// blob name for deterministic runs.
#[derive(Debug, Default)]
pub struct MemoryObjectStore {
    containers: RwLock<BTreeMap<String, BTreeMap<String, StoredBlob>>>,
}

impl MemoryObjectStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Seeds a blob with an explicit last-modified timestamp and metadata.
    pub async fn seed(
        &self,
        container: &str,
        name: &str,
        data: Bytes,
        content_type: &str,
        last_modified: DateTime<Utc>,
        metadata: BTreeMap<String, String>,
    ) {
        let mut containers = self.containers.write().await;
        containers.entry(container.to_string()).or_default().insert(
            name.to_string(),
            StoredBlob {
                data,
                content_type: content_type.to_string(),
                last_modified,
                metadata,
            },
        );
    }

    /// Number of blobs currently in a container.
    pub async fn blob_count(&self, container: &str) -> usize {
        self.containers
            .read()
            .await
            .get(container)
            .map_or(0, BTreeMap::len)
    }
}

#[async_trait]
impl ObjectStore for MemoryObjectStore {
    async fn list(&self, container: &str, prefix: &str) -> Result<Vec<BlobInfo>> {
        let containers = self.containers.read().await;
        let Some(blobs) = containers.get(container) else {
            return Ok(Vec::new());
        };
        Ok(blobs
            .iter()
            .filter(|(name, _)| name.starts_with(prefix))
            .map(|(name, blob)| BlobInfo {
                name: name.clone(),
                size: blob.data.len() as u64,
                last_modified: blob.last_modified,
                content_type: Some(blob.content_type.clone()),
                metadata: blob.metadata.clone(),
            })
            .collect())
    }

    async fn download(&self, container: &str, name: &str) -> Result<Bytes> {
        let containers = self.containers.read().await;
        containers
            .get(container)
            .and_then(|blobs| blobs.get(name))
            .map(|blob| blob.data.clone())
            .ok_or_else(|| {
                StorageError::BlobNotFound {
                    name: format!("{container}/{name}"),
                }
                .into()
            })
    }

    async fn upload(
        &self,
        container: &str,
        name: &str,
        data: Bytes,
        content_type: &str,
    ) -> Result<()> {
        self.seed(
            container,
            name,
            data,
            content_type,
            Utc::now(),
            BTreeMap::new(),
        )
        .await;
        Ok(())
    }

    async fn info(&self, container: &str, name: &str) -> Result<BlobInfo> {
        let containers = self.containers.read().await;
        containers
            .get(container)
            .and_then(|blobs| blobs.get(name))
            .map(|blob| BlobInfo {
                name: name.to_string(),
                size: blob.data.len() as u64,
                last_modified: blob.last_modified,
                content_type: Some(blob.content_type.clone()),
                metadata: blob.metadata.clone(),
            })
            .ok_or_else(|| {
                StorageError::BlobNotFound {
                    name: format!("{container}/{name}"),
                }
                .into()
            })
    }

    async fn delete(&self, container: &str, name: &str) -> Result<()> {
        let mut containers = self.containers.write().await;
        if let Some(blobs) = containers.get_mut(container) {
            blobs.remove(name);
        }
        Ok(())
    }

    async fn exists(&self, container: &str, name: &str) -> Result<bool> {
        let containers = self.containers.read().await;
        Ok(containers
            .get(container)
            .is_some_and(|blobs| blobs.contains_key(name)))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_upload_download_round_trip() {
        let store = MemoryObjectStore::new();
        store
            .upload("docs", "a.txt", Bytes::from_static(b"hello"), "text/plain")
            .await
            .unwrap();
        let data = store.download("docs", "a.txt").await.unwrap();
        assert_eq!(&data[..], b"hello");
    }

    #[tokio::test]
    async fn test_download_missing_is_not_found() {
        let store = MemoryObjectStore::new();
        let err = store.download("docs", "missing").await.unwrap_err();
        assert!(matches!(
            err,
            Error::Storage(StorageError::BlobNotFound { .. })
        ));
    }

    #[tokio::test]
    async fn test_list_with_prefix() {
        let store = MemoryObjectStore::new();
        for name in ["reports/q1.pdf", "reports/q2.pdf", "images/logo.png"] {
            store
                .upload("docs", name, Bytes::from_static(b"x"), "application/pdf")
                .await
                .unwrap();
        }
        let listed = store.list("docs", "reports/").await.unwrap();
        assert_eq!(listed.len(), 2);
        assert_eq!(listed[0].name, "reports/q1.pdf");

        let all = store.list("docs", "").await.unwrap();
        assert_eq!(all.len(), 3);
    }

    #[tokio::test]
    async fn test_list_missing_container_is_empty() {
        let store = MemoryObjectStore::new();
        assert!(store.list("none", "").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_info_carries_metadata() {
        let store = MemoryObjectStore::new();
        let mut meta = BTreeMap::new();
        meta.insert(
            "metadata_security_id".to_string(),
            "[\"u1\",\"u2\"]".to_string(),
        );
        store
            .seed(
                "docs",
                "a.pdf",
                Bytes::from_static(b"pdf"),
                "application/pdf",
                Utc::now(),
                meta,
            )
            .await;
        let info = store.info("docs", "a.pdf").await.unwrap();
        assert_eq!(info.size, 3);
        assert_eq!(
            info.metadata.get("metadata_security_id").map(String::as_str),
            Some("[\"u1\",\"u2\"]")
        );
    }

    #[tokio::test]
    async fn test_delete_and_exists() {
        let store = MemoryObjectStore::new();
        store
            .upload("docs", "a.txt", Bytes::from_static(b"x"), "text/plain")
            .await
            .unwrap();
        assert!(store.exists("docs", "a.txt").await.unwrap());
        store.delete("docs", "a.txt").await.unwrap();
        assert!(!store.exists("docs", "a.txt").await.unwrap());
        // Deleting again is not an error.
        store.delete("docs", "a.txt").await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_op_timeout_fires() {
        let result: Result<()> = with_op_timeout("download", Duration::from_secs(1), async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(())
        })
        .await;
        assert!(matches!(result, Err(Error::Timeout { seconds: 1, .. })));
    }

    #[tokio::test]
    async fn test_op_timeout_passes_through() {
        let result = with_op_timeout("noop", Duration::from_secs(1), async { Ok(41 + 1) }).await;
        assert_eq!(result.unwrap(), 42);
    }
}
