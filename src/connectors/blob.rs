//! Object store connector.
//!
//! Prefix-scans the source container, skipping directory markers
//! (zero-byte blobs whose names end in `/`). Content types come from blob
//! properties; per-item permissions may be carried in blob metadata under a
//! security-ID key encoded as a JSON array, a quoted list literal, or a
//! comma/semicolon-separated string.

use std::sync::Arc;

use async_stream::try_stream;
use async_trait::async_trait;
use futures_util::stream::BoxStream;
use serde_json::Value;

use crate::core::{FileContent, ItemRef};
use crate::error::{ConnectorError, Result};
use crate::storage::ObjectStore;

use super::SourceConnector;

/// Metadata keys probed for user principal IDs, in order.
const USER_ID_KEYS: &[&str] = &["metadata_security_user_ids", "metadata_security_id"];

/// Metadata keys probed for group principal IDs.
const GROUP_ID_KEYS: &[&str] = &["metadata_security_group_ids"];

/// Source tag for blob-backed documents.
pub const BLOB_SOURCE_TAG: &str = "blob";

/// Connector over an object store container.
pub struct BlobConnector {
    store: Arc<dyn ObjectStore>,
    container: String,
    prefix: String,
    url_base: String,
}

impl BlobConnector {
    /// Creates a connector for one container.
    ///
    /// `url_base` is the externally-visible root for item URLs, e.g.
    /// `https://<account>.blob.core.windows.net`.
    #[must_use]
    pub fn new(
        store: Arc<dyn ObjectStore>,
        container: &str,
        prefix: &str,
        url_base: &str,
    ) -> Self {
        Self {
            store,
            container: container.to_string(),
            prefix: prefix.to_string(),
            url_base: url_base.trim_end_matches('/').to_string(),
        }
    }

    fn item_url(&self, name: &str) -> String {
        format!("{}/{}/{name}", self.url_base, self.container)
    }
}

/// Parses a security-ID metadata value into a clean list of strings.
///
/// Accepts JSON arrays (`["a","b"]`), quoted list literals (`['a', 'b']`),
/// and comma/semicolon-separated strings (`a,b` / `a; b`), stripping
/// surrounding quotes from each token.
#[must_use]
pub fn parse_security_ids(raw: &str) -> Vec<String> {
    // JSON array first.
    if let Ok(Value::Array(items)) = serde_json::from_str::<Value>(raw) {
        return items
            .iter()
            .map(|v| match v {
                Value::String(s) => s.trim().to_string(),
                other => other.to_string(),
            })
            .filter(|s| !s.is_empty())
            .collect();
    }

    // Bracketed single-quoted literal or plain separated string.
    let mut s = raw.trim();
    if s.starts_with('[') && s.ends_with(']') && s.len() >= 2 {
        s = &s[1..s.len() - 1];
    }
    s.split([',', ';'])
        .map(str::trim)
        .map(|token| {
            let token = token
                .strip_prefix('\'')
                .and_then(|t| t.strip_suffix('\''))
                .or_else(|| token.strip_prefix('"').and_then(|t| t.strip_suffix('"')))
                .unwrap_or(token);
            token.trim().to_string()
        })
        .filter(|token| !token.is_empty())
        .collect()
}

fn ids_from_metadata(
    metadata: &std::collections::BTreeMap<String, String>,
    keys: &[&str],
) -> Vec<String> {
    for key in keys {
        if let Some(raw) = metadata.get(*key) {
            return parse_security_ids(raw);
        }
        // Stores may normalize underscores to dashes.
        let dashed = key.replace('_', "-");
        if let Some(raw) = metadata.get(&dashed) {
            return parse_security_ids(raw);
        }
    }
    Vec::new()
}

#[async_trait]
impl SourceConnector for BlobConnector {
    fn source_tag(&self) -> &str {
        BLOB_SOURCE_TAG
    }

    fn source_segments(&self) -> Vec<String> {
        vec![self.container.clone()]
    }

    fn enumerate(&self) -> BoxStream<'_, Result<ItemRef>> {
        Box::pin(try_stream! {
            let blobs = self.store.list(&self.container, &self.prefix).await?;
            for blob in blobs {
                // Directory markers are zero-byte blobs named like folders.
                if blob.size == 0 && blob.name.ends_with('/') {
                    continue;
                }
                let basename = blob
                    .name
                    .rsplit('/')
                    .next()
                    .unwrap_or(blob.name.as_str())
                    .to_string();
                yield ItemRef {
                    id: blob.name.clone(),
                    name: basename,
                    parent_path: None,
                    last_modified: blob.last_modified,
                    content_type: blob.content_type.clone(),
                    url: self.item_url(&blob.name),
                    user_ids: ids_from_metadata(&blob.metadata, USER_ID_KEYS),
                    group_ids: ids_from_metadata(&blob.metadata, GROUP_ID_KEYS),
                };
            }
        })
    }

    async fn download(&self, item: &ItemRef) -> Result<FileContent> {
        let bytes = self
            .store
            .download(&self.container, &item.id)
            .await
            .map_err(|e| ConnectorError::DownloadFailed {
                item: item.id.clone(),
                reason: e.to_string(),
            })?;
        let content_type = item
            .content_type
            .clone()
            .unwrap_or_else(|| "application/octet-stream".to_string());
        Ok(FileContent::from_bytes(bytes, content_type))
    }
}

impl std::fmt::Debug for BlobConnector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BlobConnector")
            .field("container", &self.container)
            .field("prefix", &self.prefix)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::storage::MemoryObjectStore;
    use bytes::Bytes;
    use chrono::{TimeZone, Utc};
    use futures_util::TryStreamExt;
    use std::collections::BTreeMap;
    use test_case::test_case;

    #[test_case(r#"["a","b"]"#, &["a", "b"]; "json array")]
    #[test_case("['a', 'b']", &["a", "b"]; "quoted list literal")]
    #[test_case("a,b", &["a", "b"]; "comma separated")]
    #[test_case("a; b ;c", &["a", "b", "c"]; "semicolon separated")]
    #[test_case(r#"["  a  ", ""]"#, &["a"]; "json trims and drops empty")]
    #[test_case("[\"x\"]", &["x"]; "double quoted literal")]
    #[test_case("", &[]; "empty string")]
    fn test_parse_security_ids(raw: &str, expected: &[&str]) {
        assert_eq!(parse_security_ids(raw), expected);
    }

    async fn seeded_store() -> Arc<MemoryObjectStore> {
        let store = Arc::new(MemoryObjectStore::new());
        let lm = Utc.with_ymd_and_hms(2025, 1, 10, 12, 0, 0).unwrap();
        let mut meta = BTreeMap::new();
        meta.insert(
            "metadata_security_id".to_string(),
            "['u1', 'u2']".to_string(),
        );
        store
            .seed(
                "documents",
                "reports/a.pdf",
                Bytes::from_static(b"%PDF-"),
                "application/pdf",
                lm,
                meta,
            )
            .await;
        store
            .seed(
                "documents",
                "reports/",
                Bytes::new(),
                "application/octet-stream",
                lm,
                BTreeMap::new(),
            )
            .await;
        store
            .seed(
                "documents",
                "notes.txt",
                Bytes::from_static(b"text"),
                "text/plain",
                lm,
                BTreeMap::new(),
            )
            .await;
        store
    }

    fn connector(store: Arc<MemoryObjectStore>, prefix: &str) -> BlobConnector {
        BlobConnector::new(
            store,
            "documents",
            prefix,
            "https://acct.blob.core.windows.net",
        )
    }

    #[tokio::test]
    async fn test_enumerate_skips_directory_markers() {
        let store = seeded_store().await;
        let items: Vec<ItemRef> = connector(store, "").enumerate().try_collect().await.unwrap();
        assert_eq!(items.len(), 2);
        assert!(items.iter().all(|i| !i.id.ends_with('/')));
    }

    #[tokio::test]
    async fn test_enumerate_honors_prefix() {
        let store = seeded_store().await;
        let items: Vec<ItemRef> = connector(store, "reports/")
            .enumerate()
            .try_collect()
            .await
            .unwrap();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].id, "reports/a.pdf");
        assert_eq!(items[0].name, "a.pdf");
    }

    #[tokio::test]
    async fn test_item_carries_metadata() {
        let store = seeded_store().await;
        let items: Vec<ItemRef> = connector(store, "reports/")
            .enumerate()
            .try_collect()
            .await
            .unwrap();
        let item = &items[0];
        assert_eq!(item.user_ids, vec!["u1", "u2"]);
        assert!(item.group_ids.is_empty());
        assert_eq!(item.content_type.as_deref(), Some("application/pdf"));
        assert_eq!(
            item.url,
            "https://acct.blob.core.windows.net/documents/reports/a.pdf"
        );
    }

    #[tokio::test]
    async fn test_parent_id_derivation() {
        let store = seeded_store().await;
        let conn = connector(store, "");
        let items: Vec<ItemRef> = conn.enumerate().try_collect().await.unwrap();
        let item = items.iter().find(|i| i.id == "reports/a.pdf").unwrap();
        assert_eq!(conn.parent_id(item), "/documents/reports/a.pdf");
    }

    #[tokio::test]
    async fn test_download() {
        let store = seeded_store().await;
        let conn = connector(store, "");
        let items: Vec<ItemRef> = conn.enumerate().try_collect().await.unwrap();
        let item = items.iter().find(|i| i.id == "notes.txt").unwrap();
        let content = conn.download(item).await.unwrap();
        assert_eq!(&content.bytes[..], b"text");
        assert_eq!(content.content_type, "text/plain");
    }

    #[tokio::test]
    async fn test_download_missing_fails() {
        let store = Arc::new(MemoryObjectStore::new());
        let conn = connector(store, "");
        let ghost = ItemRef {
            id: "ghost.txt".to_string(),
            name: "ghost.txt".to_string(),
            parent_path: None,
            last_modified: Utc::now(),
            content_type: None,
            url: String::new(),
            user_ids: Vec::new(),
            group_ids: Vec::new(),
        };
        assert!(conn.download(&ghost).await.is_err());
    }
}
