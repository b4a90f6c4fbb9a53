//! Source connectors.
//!
//! Each connector enumerates discoverable items from one upstream store as
//! a flat asynchronous stream of [`ItemRef`]s (pagination stays inside the
//! connector) and downloads item payloads on demand. The engine derives
//! `parent_id`s from the connector's source segments plus the item's own
//! identity.

pub mod blob;
pub mod nl2sql;
pub mod sharepoint;

use async_trait::async_trait;
use futures_util::stream::BoxStream;

pub use blob::{BlobConnector, parse_security_ids};
pub use nl2sql::Nl2sqlConnector;
pub use sharepoint::{
    GraphApi, SharePointConnector, SpDriveItem, SpListItem, SpPermission,
};

use crate::core::{FileContent, ItemRef};
use crate::error::Result;

/// Asynchronous source connector contract.
#[async_trait]
pub trait SourceConnector: Send + Sync {
    /// Source tag owning this connector's index records
    /// (`blob`, `sharepoint-list`, ...).
    fn source_tag(&self) -> &str;

    /// Path segments prefixed to every item's `parent_id`.
    fn source_segments(&self) -> Vec<String>;

    /// Streams discoverable items. Pagination is connector-internal.
    fn enumerate(&self) -> BoxStream<'_, Result<ItemRef>>;

    /// Downloads one item's payload.
    async fn download(&self, item: &ItemRef) -> Result<FileContent>;

    /// Virtual extension appended for chunker dispatch, when the source's
    /// real extension does not identify the chunker (NL2SQL JSON files).
    fn virtual_extension(&self) -> Option<&'static str> {
        None
    }

    /// Derives the stable `parent_id` for an item of this source.
    fn parent_id(&self, item: &ItemRef) -> String {
        let segments = self.source_segments();
        let refs: Vec<&str> = segments.iter().map(String::as_str).collect();
        item.parent_id(&refs)
    }
}
