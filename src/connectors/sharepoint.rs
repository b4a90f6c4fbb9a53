//! Collaboration platform connector (lists and document libraries).
//!
//! Enumerates list items through a Graph-style API contract. List item
//! bodies are rendered to markdown and emitted as their own documents;
//! document-library entries follow the item's drive link to the binary and
//! are emitted as separate documents so attachments chunk independently of
//! the body. Lookup fields resolve by ID with caching, display URLs build
//! from list metadata, and item-level permissions (a beta surface) are
//! filtered down to directory GUIDs.

use std::collections::HashMap;
use std::sync::Arc;

use async_stream::try_stream;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures_util::stream::BoxStream;
use regex::Regex;
use serde_json::Value;
use tokio::sync::RwLock;
use tracing::{debug, warn};

use crate::core::{FileContent, ItemRef};
use crate::error::{ConnectorError, Result};

use super::SourceConnector;

/// Source tag for list-backed documents.
pub const SHAREPOINT_SOURCE_TAG: &str = "sharepoint-list";

/// One list item as returned by the platform API.
#[derive(Debug, Clone, PartialEq)]
pub struct SpListItem {
    /// List-local item identifier.
    pub id: String,

    /// Item title, when present.
    pub title: Option<String>,

    /// Raw field values.
    pub fields: serde_json::Map<String, Value>,

    /// Item last-modified timestamp.
    pub last_modified: DateTime<Utc>,

    /// Identifier of the backing drive item for document libraries.
    pub drive_item_id: Option<String>,
}

/// One drive item (document library binary).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpDriveItem {
    /// Drive-local identifier.
    pub id: String,

    /// Filename.
    pub name: String,

    /// Binary last-modified timestamp.
    pub last_modified: DateTime<Utc>,

    /// Content type, when reported.
    pub content_type: Option<String>,
}

/// One permission grant on an item.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SpPermission {
    /// Granted user identifiers (mixed formats; GUIDs are kept).
    pub user_ids: Vec<String>,

    /// Granted group identifiers.
    pub group_ids: Vec<String>,
}

/// Graph-style API contract consumed by the connector.
///
/// Pagination uses opaque continuation tokens; `None` means the first page,
/// and a `None` token in the response means the listing is complete.
#[async_trait]
pub trait GraphApi: Send + Sync {
    /// Fetches one page of list items.
    async fn list_items_page(
        &self,
        site_id: &str,
        list_id: &str,
        page_token: Option<&str>,
    ) -> Result<(Vec<SpListItem>, Option<String>)>;

    /// Resolves a drive item reference.
    async fn drive_item(&self, site_id: &str, drive_item_id: &str) -> Result<SpDriveItem>;

    /// Downloads a drive item's binary.
    async fn download_drive_item(&self, site_id: &str, drive_item_id: &str) -> Result<FileContent>;

    /// Fetches item-level permission grants (beta surface).
    async fn item_permissions(
        &self,
        site_id: &str,
        list_id: &str,
        item_id: &str,
    ) -> Result<Vec<SpPermission>>;

    /// Resolves a lookup field target to its display value.
    async fn lookup_value(
        &self,
        site_id: &str,
        lookup_list_id: &str,
        target_id: &str,
    ) -> Result<Option<String>>;

    /// Web URL of the list, for building display URLs.
    async fn list_web_url(&self, site_id: &str, list_id: &str) -> Result<String>;
}

/// Connector over one site list (or document library).
pub struct SharePointConnector {
    graph: Arc<dyn GraphApi>,
    site_id: String,
    list_id: String,
    /// Lookup field name -> list id providing the values.
    lookup_lists: HashMap<String, String>,
    /// `(lookup_list, target_id)` -> resolved display value.
    lookup_cache: RwLock<HashMap<(String, String), Option<String>>>,
    /// Cached list web URL.
    web_url_cache: RwLock<Option<String>>,
}

impl SharePointConnector {
    /// Creates a connector for one list.
    #[must_use]
    pub fn new(graph: Arc<dyn GraphApi>, site_id: &str, list_id: &str) -> Self {
        Self {
            graph,
            site_id: site_id.to_string(),
            list_id: list_id.to_string(),
            lookup_lists: HashMap::new(),
            lookup_cache: RwLock::new(HashMap::new()),
            web_url_cache: RwLock::new(None),
        }
    }

    /// Registers a lookup field and the list its IDs resolve against.
    #[must_use]
    pub fn with_lookup(mut self, field: &str, lookup_list_id: &str) -> Self {
        self.lookup_lists
            .insert(field.to_string(), lookup_list_id.to_string());
        self
    }

    /// Display URL of an item, built from cached list metadata.
    async fn display_url(&self, item_id: &str) -> String {
        {
            let cached = self.web_url_cache.read().await;
            if let Some(url) = cached.as_ref() {
                return format!("{url}/DispForm.aspx?ID={item_id}");
            }
        }
        // Read-then-compute-then-store; duplicate fetches are idempotent.
        match self.graph.list_web_url(&self.site_id, &self.list_id).await {
            Ok(url) => {
                let url = url.trim_end_matches('/').to_string();
                *self.web_url_cache.write().await = Some(url.clone());
                format!("{url}/DispForm.aspx?ID={item_id}")
            }
            Err(err) => {
                warn!("[sharepoint] list web url unavailable: {err}");
                String::new()
            }
        }
    }

    /// Resolves one lookup target through the cache.
    async fn resolve_lookup(&self, lookup_list: &str, target_id: &str) -> Option<String> {
        let key = (lookup_list.to_string(), target_id.to_string());
        {
            let cache = self.lookup_cache.read().await;
            if let Some(value) = cache.get(&key) {
                return value.clone();
            }
        }
        let resolved = self
            .graph
            .lookup_value(&self.site_id, lookup_list, target_id)
            .await
            .unwrap_or_else(|err| {
                warn!("[sharepoint] lookup {lookup_list}/{target_id} failed: {err}");
                None
            });
        self.lookup_cache.write().await.insert(key, resolved.clone());
        resolved
    }

    /// Renders an item's fields to a markdown body.
    ///
    /// System fields (`@odata`, underscore-prefixed) are dropped; lookup ID
    /// fields are replaced by their resolved display values.
    async fn render_body(&self, item: &SpListItem) -> String {
        let mut lines = Vec::new();
        let title = item.title.clone().unwrap_or_else(|| format!("Item {}", item.id));
        lines.push(format!("# {title}"));

        for (field, value) in &item.fields {
            if field.starts_with('_') || field.starts_with('@') || field == "Title" {
                continue;
            }
            let rendered = if let Some(lookup_list) = lookup_list_for(&self.lookup_lists, field) {
                let target = value_text(value);
                self.resolve_lookup(lookup_list, &target)
                    .await
                    .unwrap_or(target)
            } else {
                value_text(value)
            };
            if rendered.is_empty() {
                continue;
            }
            lines.push(format!("- **{}**: {rendered}", display_field_name(field)));
        }
        lines.join("\n")
    }

    /// Locates one list item by ID, paging as needed.
    async fn find_list_item(&self, item_id: &str) -> Result<Option<SpListItem>> {
        let mut token: Option<String> = None;
        loop {
            let (items, next) = self
                .graph
                .list_items_page(&self.site_id, &self.list_id, token.as_deref())
                .await?;
            if let Some(found) = items.into_iter().find(|i| i.id == item_id) {
                return Ok(Some(found));
            }
            match next {
                Some(t) => token = Some(t),
                None => return Ok(None),
            }
        }
    }

    /// Item-level permissions filtered to directory GUIDs.
    async fn permissions(&self, item_id: &str) -> (Vec<String>, Vec<String>) {
        let grants = match self
            .graph
            .item_permissions(&self.site_id, &self.list_id, item_id)
            .await
        {
            Ok(grants) => grants,
            Err(err) => {
                warn!("[sharepoint] permissions unavailable for item {item_id}: {err}");
                return (Vec::new(), Vec::new());
            }
        };
        let mut users = Vec::new();
        let mut groups = Vec::new();
        for grant in grants {
            users.extend(grant.user_ids.into_iter().filter(|id| is_guid(id)));
            groups.extend(grant.group_ids.into_iter().filter(|id| is_guid(id)));
        }
        (users, groups)
    }
}

/// Lookup field convention: `<Field>LookupId` resolves via `<Field>`'s list.
fn lookup_list_for<'a>(lookups: &'a HashMap<String, String>, field: &str) -> Option<&'a str> {
    let base = field.strip_suffix("LookupId").unwrap_or(field);
    lookups.get(base).map(String::as_str)
}

fn display_field_name(field: &str) -> &str {
    field.strip_suffix("LookupId").unwrap_or(field)
}

fn value_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

/// Checks for a directory (Entra) GUID.
fn is_guid(s: &str) -> bool {
    // Compiled per call; permission lists are small.
    Regex::new(r"^[0-9a-fA-F]{8}-[0-9a-fA-F]{4}-[0-9a-fA-F]{4}-[0-9a-fA-F]{4}-[0-9a-fA-F]{12}$")
        .map(|re| re.is_match(s))
        .unwrap_or(false)
}

#[async_trait]
impl SourceConnector for SharePointConnector {
    fn source_tag(&self) -> &str {
        SHAREPOINT_SOURCE_TAG
    }

    fn source_segments(&self) -> Vec<String> {
        vec![
            "sites".to_string(),
            self.site_id.clone(),
            "lists".to_string(),
            self.list_id.clone(),
        ]
    }

    fn enumerate(&self) -> BoxStream<'_, Result<ItemRef>> {
        Box::pin(try_stream! {
            let mut token: Option<String> = None;
            loop {
                let (items, next) = self
                    .graph
                    .list_items_page(&self.site_id, &self.list_id, token.as_deref())
                    .await?;
                for item in items {
                    let (user_ids, group_ids) = self.permissions(&item.id).await;
                    let url = self.display_url(&item.id).await;

                    // The list item body is a document of its own.
                    yield ItemRef {
                        id: item.id.clone(),
                        name: format!("item-{}.md", item.id),
                        parent_path: None,
                        last_modified: item.last_modified,
                        content_type: Some("text/markdown".to_string()),
                        url: url.clone(),
                        user_ids: user_ids.clone(),
                        group_ids: group_ids.clone(),
                    };

                    // Document-library entries add the binary as a separate
                    // document keyed under the item.
                    if let Some(drive_item_id) = &item.drive_item_id {
                        match self.graph.drive_item(&self.site_id, drive_item_id).await {
                            Ok(drive) => {
                                yield ItemRef {
                                    id: format!("{}/{}", item.id, drive.name),
                                    name: drive.name.clone(),
                                    parent_path: None,
                                    last_modified: drive.last_modified,
                                    content_type: drive.content_type.clone(),
                                    url: url.clone(),
                                    user_ids: user_ids.clone(),
                                    group_ids: group_ids.clone(),
                                };
                            }
                            Err(err) => {
                                warn!(
                                    "[sharepoint] drive item {drive_item_id} unavailable: {err}"
                                );
                            }
                        }
                    }
                }
                match next {
                    Some(t) => token = Some(t),
                    None => break,
                }
            }
            debug!("[sharepoint] enumeration complete for list {}", self.list_id);
        })
    }

    async fn download(&self, item: &ItemRef) -> Result<FileContent> {
        // Attachment IDs are `<item-id>/<filename>`; bodies are bare IDs.
        if let Some((item_id, _filename)) = item.id.split_once('/') {
            let drive_item_id = self
                .find_list_item(item_id)
                .await?
                .and_then(|li| li.drive_item_id);
            let Some(drive_item_id) = drive_item_id else {
                return Err(ConnectorError::DownloadFailed {
                    item: item.id.clone(),
                    reason: "drive item reference no longer present".to_string(),
                }
                .into());
            };
            return self
                .graph
                .download_drive_item(&self.site_id, &drive_item_id)
                .await;
        }

        let Some(list_item) = self.find_list_item(&item.id).await? else {
            return Err(ConnectorError::DownloadFailed {
                item: item.id.clone(),
                reason: "list item no longer present".to_string(),
            }
            .into());
        };
        let body = self.render_body(&list_item).await;
        Ok(FileContent::from_text(body, "text/markdown"))
    }
}

impl std::fmt::Debug for SharePointConnector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SharePointConnector")
            .field("site_id", &self.site_id)
            .field("list_id", &self.list_id)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
pub(crate) mod tests {
    use super::*;
    use chrono::TimeZone;
    use futures_util::TryStreamExt;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    const GUID_A: &str = "11111111-2222-3333-4444-555555555555";
    const GUID_B: &str = "aaaaaaaa-bbbb-cccc-dddd-eeeeeeeeeeee";

    /// Scripted Graph API for tests.
    pub(crate) struct FakeGraph {
        pub items: Vec<SpListItem>,
        pub drive_items: HashMap<String, SpDriveItem>,
        pub permissions: HashMap<String, Vec<SpPermission>>,
        pub lookups: HashMap<(String, String), String>,
        pub lookup_calls: AtomicUsize,
        pub page_size: usize,
    }

    impl FakeGraph {
        pub(crate) fn new(items: Vec<SpListItem>) -> Self {
            Self {
                items,
                drive_items: HashMap::new(),
                permissions: HashMap::new(),
                lookups: HashMap::new(),
                lookup_calls: AtomicUsize::new(0),
                page_size: 100,
            }
        }
    }

    #[async_trait]
    impl GraphApi for FakeGraph {
        async fn list_items_page(
            &self,
            _site: &str,
            _list: &str,
            page_token: Option<&str>,
        ) -> Result<(Vec<SpListItem>, Option<String>)> {
            let start: usize = page_token.map_or(0, |t| t.parse().unwrap_or(0));
            let end = (start + self.page_size).min(self.items.len());
            let next = if end < self.items.len() {
                Some(end.to_string())
            } else {
                None
            };
            Ok((self.items[start..end].to_vec(), next))
        }

        async fn drive_item(&self, _site: &str, id: &str) -> Result<SpDriveItem> {
            self.drive_items.get(id).cloned().ok_or_else(|| {
                ConnectorError::DownloadFailed {
                    item: id.to_string(),
                    reason: "unknown drive item".to_string(),
                }
                .into()
            })
        }

        async fn download_drive_item(&self, _site: &str, id: &str) -> Result<FileContent> {
            Ok(FileContent::from_bytes(
                bytes::Bytes::from(format!("binary:{id}").into_bytes()),
                "application/pdf",
            ))
        }

        async fn item_permissions(
            &self,
            _site: &str,
            _list: &str,
            item_id: &str,
        ) -> Result<Vec<SpPermission>> {
            Ok(self.permissions.get(item_id).cloned().unwrap_or_default())
        }

        async fn lookup_value(
            &self,
            _site: &str,
            list: &str,
            target: &str,
        ) -> Result<Option<String>> {
            self.lookup_calls.fetch_add(1, Ordering::SeqCst);
            Ok(self
                .lookups
                .get(&(list.to_string(), target.to_string()))
                .cloned())
        }

        async fn list_web_url(&self, _site: &str, _list: &str) -> Result<String> {
            Ok("https://contoso.sharepoint.com/sites/eng/Lists/Tasks".to_string())
        }
    }

    fn item(id: &str, title: &str) -> SpListItem {
        let mut fields = serde_json::Map::new();
        fields.insert("Title".to_string(), json!(title));
        fields.insert("Status".to_string(), json!("Open"));
        SpListItem {
            id: id.to_string(),
            title: Some(title.to_string()),
            fields,
            last_modified: Utc.with_ymd_and_hms(2025, 2, 1, 9, 0, 0).unwrap(),
            drive_item_id: None,
        }
    }

    #[test]
    fn test_is_guid() {
        assert!(is_guid(GUID_A));
        assert!(!is_guid("c:0(.s|true"));
        assert!(!is_guid("not-a-guid"));
        assert!(!is_guid(""));
    }

    #[tokio::test]
    async fn test_enumerate_emits_bodies() {
        let graph = Arc::new(FakeGraph::new(vec![item("42", "Quarterly"), item("43", "Weekly")]));
        let conn = SharePointConnector::new(graph, "site1", "listA");
        let items: Vec<ItemRef> = conn.enumerate().try_collect().await.unwrap();
        assert_eq!(items.len(), 2);
        assert_eq!(items[0].id, "42");
        assert_eq!(items[0].name, "item-42.md");
        assert!(items[0].url.contains("DispForm.aspx?ID=42"));
    }

    #[tokio::test]
    async fn test_enumerate_pages_transparently() {
        let mut graph = FakeGraph::new((0..7).map(|i| item(&i.to_string(), "t")).collect());
        graph.page_size = 3;
        let conn = SharePointConnector::new(Arc::new(graph), "s", "l");
        let items: Vec<ItemRef> = conn.enumerate().try_collect().await.unwrap();
        assert_eq!(items.len(), 7);
    }

    #[tokio::test]
    async fn test_document_library_emits_separate_parent() {
        let mut li = item("42", "Report");
        li.drive_item_id = Some("drv-1".to_string());
        let mut graph = FakeGraph::new(vec![li]);
        graph.drive_items.insert(
            "drv-1".to_string(),
            SpDriveItem {
                id: "drv-1".to_string(),
                name: "report.pdf".to_string(),
                last_modified: Utc.with_ymd_and_hms(2025, 2, 1, 9, 0, 10).unwrap(),
                content_type: Some("application/pdf".to_string()),
            },
        );
        let conn = SharePointConnector::new(Arc::new(graph), "site1", "listA");
        let items: Vec<ItemRef> = conn.enumerate().try_collect().await.unwrap();
        assert_eq!(items.len(), 2);
        assert_eq!(items[1].id, "42/report.pdf");
        assert_eq!(items[1].name, "report.pdf");
        // Body and attachment derive distinct parent ids.
        assert_ne!(conn.parent_id(&items[0]), conn.parent_id(&items[1]));
        assert_eq!(
            conn.parent_id(&items[1]),
            "/sites/site1/lists/listA/42/report.pdf"
        );
    }

    #[tokio::test]
    async fn test_permissions_filtered_to_guids() {
        let mut graph = FakeGraph::new(vec![item("42", "t")]);
        graph.permissions.insert(
            "42".to_string(),
            vec![SpPermission {
                user_ids: vec![GUID_A.to_string(), "c:0(.s|true".to_string()],
                group_ids: vec![GUID_B.to_string(), "Everyone".to_string()],
            }],
        );
        let conn = SharePointConnector::new(Arc::new(graph), "s", "l");
        let items: Vec<ItemRef> = conn.enumerate().try_collect().await.unwrap();
        assert_eq!(items[0].user_ids, vec![GUID_A]);
        assert_eq!(items[0].group_ids, vec![GUID_B]);
    }

    #[tokio::test]
    async fn test_body_download_renders_markdown() {
        let graph = Arc::new(FakeGraph::new(vec![item("42", "Quarterly Report")]));
        let conn = SharePointConnector::new(graph, "s", "l");
        let items: Vec<ItemRef> = conn.enumerate().try_collect().await.unwrap();
        let body = conn.download(&items[0]).await.unwrap();
        let text = body.text.unwrap();
        assert!(text.starts_with("# Quarterly Report"));
        assert!(text.contains("- **Status**: Open"));
    }

    #[tokio::test]
    async fn test_lookup_resolution_cached() {
        let mut li = item("42", "t");
        li.fields
            .insert("OwnerLookupId".to_string(), json!("7"));
        let mut graph = FakeGraph::new(vec![li]);
        graph
            .lookups
            .insert(("people-list".to_string(), "7".to_string()), "Ada".to_string());
        let graph = Arc::new(graph);
        let conn = SharePointConnector::new(Arc::clone(&graph) as Arc<dyn GraphApi>, "s", "l")
            .with_lookup("Owner", "people-list");

        let items: Vec<ItemRef> = conn.enumerate().try_collect().await.unwrap();
        let first = conn.download(&items[0]).await.unwrap();
        let second = conn.download(&items[0]).await.unwrap();
        assert!(first.text.unwrap().contains("- **Owner**: Ada"));
        assert!(second.text.unwrap().contains("- **Owner**: Ada"));
        // Second render served from the cache.
        assert_eq!(graph.lookup_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_attachment_download_follows_drive_link() {
        let mut li = item("42", "Report");
        li.drive_item_id = Some("drv-1".to_string());
        let mut graph = FakeGraph::new(vec![li]);
        graph.drive_items.insert(
            "drv-1".to_string(),
            SpDriveItem {
                id: "drv-1".to_string(),
                name: "report.pdf".to_string(),
                last_modified: Utc::now(),
                content_type: Some("application/pdf".to_string()),
            },
        );
        let conn = SharePointConnector::new(Arc::new(graph), "s", "l");
        let items: Vec<ItemRef> = conn.enumerate().try_collect().await.unwrap();
        let content = conn.download(&items[1]).await.unwrap();
        assert_eq!(&content.bytes[..], b"binary:drv-1");
    }
}
