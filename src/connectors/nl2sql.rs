//! NL2SQL metadata store connector.
//!
//! Enumerates JSON files from the `queries/`, `tables/`, and `measures/`
//! subtrees of the NL2SQL container. Items carry their kind as the parent
//! path, and the connector reports the `.nl2sql` virtual extension so the
//! chunker factory routes these JSON files to the NL2SQL chunker instead of
//! the generic JSON chunker.

use std::sync::Arc;

use async_stream::try_stream;
use async_trait::async_trait;
use futures_util::stream::BoxStream;

use crate::core::{FileContent, ItemRef};
use crate::error::{ConnectorError, Result};
use crate::storage::ObjectStore;

use super::SourceConnector;

/// Source tag for NL2SQL-backed documents.
pub const NL2SQL_SOURCE_TAG: &str = "nl2sql";

/// Known content kinds (subtree prefixes).
pub const NL2SQL_KINDS: [&str; 3] = ["queries", "tables", "measures"];

/// Connector over the NL2SQL metadata container.
pub struct Nl2sqlConnector {
    store: Arc<dyn ObjectStore>,
    container: String,
    url_base: String,
}

impl Nl2sqlConnector {
    /// Creates a connector for the NL2SQL container.
    #[must_use]
    pub fn new(store: Arc<dyn ObjectStore>, container: &str, url_base: &str) -> Self {
        Self {
            store,
            container: container.to_string(),
            url_base: url_base.trim_end_matches('/').to_string(),
        }
    }

    /// Kind of a blob, when it belongs to a known subtree.
    fn kind_of(name: &str) -> Option<&'static str> {
        NL2SQL_KINDS
            .iter()
            .find(|kind| name.starts_with(&format!("{kind}/")))
            .copied()
    }
}

#[async_trait]
impl SourceConnector for Nl2sqlConnector {
    fn source_tag(&self) -> &str {
        NL2SQL_SOURCE_TAG
    }

    fn source_segments(&self) -> Vec<String> {
        vec![self.container.clone()]
    }

    fn virtual_extension(&self) -> Option<&'static str> {
        Some("nl2sql")
    }

    fn enumerate(&self) -> BoxStream<'_, Result<ItemRef>> {
        Box::pin(try_stream! {
            for kind in NL2SQL_KINDS {
                let blobs = self.store.list(&self.container, &format!("{kind}/")).await?;
                for blob in blobs {
                    if !blob.name.ends_with(".json") || Self::kind_of(&blob.name).is_none() {
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
                        content_type: Some("application/json".to_string()),
                        url: format!("{}/{}/{}", self.url_base, self.container, blob.name),
                        user_ids: Vec::new(),
                        group_ids: Vec::new(),
                    };
                }
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
        Ok(FileContent::from_bytes(bytes, "application/json"))
    }
}

impl std::fmt::Debug for Nl2sqlConnector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Nl2sqlConnector")
            .field("container", &self.container)
            .finish_non_exhaustive()
    }
}
