//! Upstream item references and index document records.
//!
//! [`ItemRef`] is what connectors emit during discovery: enough identity and
//! freshness data for the engine to gate on, plus permissions when the
//! source provides them. [`IndexDocument`] is the wire shape of one search
//! index record, field names matching the pre-provisioned index schema.

use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::core::Chunk;
use crate::keys;

/// Maximum security principal IDs kept per list (index schema bound).
pub const MAX_SECURITY_IDS: usize = 32;

/// A discoverable upstream item as emitted by a source connector.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ItemRef {
    /// Source-local unique identifier (blob name, list item id, ...).
    pub id: String,

    /// Display name (usually a filename).
    pub name: String,

    /// Optional parent path within the source.
    pub parent_path: Option<String>,

    /// Upstream last-modified timestamp.
    pub last_modified: DateTime<Utc>,

    /// Content type when the source exposes one.
    pub content_type: Option<String>,

    /// Source URL for display and logging.
    pub url: String,

    /// User principal IDs permitted to see this item.
    pub user_ids: Vec<String>,

    /// Group principal IDs permitted to see this item.
    pub group_ids: Vec<String>,
}

impl ItemRef {
    /// Derives the stable `parent_id` for this item under a source prefix.
    ///
    /// The prefix segments identify the source (container, site/list); the
    /// item's own id supplies the tail.
    #[must_use]
    pub fn parent_id(&self, source_segments: &[&str]) -> String {
        let mut segments: Vec<&str> = source_segments.to_vec();
        if let Some(parent) = self.parent_path.as_deref()
            && !parent.is_empty()
        {
            segments.push(parent);
        }
        segments.push(&self.id);
        keys::parent_key(&segments)
    }
}

/// Downloaded item payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileContent {
    /// Raw bytes.
    pub bytes: Bytes,

    /// Content type reported by the source.
    pub content_type: String,

    /// Pre-decoded text, when the source already had it (list item bodies).
    pub text: Option<String>,
}

impl FileContent {
    /// Creates a binary payload.
    #[must_use]
    pub fn from_bytes(bytes: Bytes, content_type: impl Into<String>) -> Self {
        Self {
            bytes,
            content_type: content_type.into(),
            text: None,
        }
    }

    /// Creates a payload from already-decoded text.
    #[must_use]
    pub fn from_text(text: impl Into<String>, content_type: impl Into<String>) -> Self {
        let text = text.into();
        Self {
            bytes: Bytes::from(text.clone().into_bytes()),
            content_type: content_type.into(),
            text: Some(text),
        }
    }

    /// Content length in bytes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    /// Whether the payload is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

/// One search index record, keyed by `sanitize(parent_id) + "-c" + pad5(n)`.
///
/// Field names follow the index schema, so this struct serializes straight
/// into the upload batch.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct IndexDocument {
    /// Primary key.
    pub id: String,

    /// Stable parent document identifier.
    pub parent_id: String,

    /// Storage path (mirrors `parent_id` for blob sources).
    pub metadata_storage_path: String,

    /// Display name of the source file.
    pub metadata_storage_name: String,

    /// Authoritative freshness marker (timezone-aware).
    pub metadata_storage_last_modified: DateTime<Utc>,

    /// Permitted user principal IDs (deduped, at most 32).
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub metadata_security_user_ids: Vec<String>,

    /// Permitted group principal IDs (deduped, at most 32).
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub metadata_security_group_ids: Vec<String>,

    /// Source tag owning this record (`blob`, `sharepoint-list`, ...).
    pub source: String,

    /// Chunk ordinal.
    pub chunk_id: u32,

    /// Chunk text.
    pub content: String,

    /// Dense embedding of the chunk.
    #[serde(rename = "contentVector")]
    pub content_vector: Vec<f32>,

    /// Embedding of combined figure captions, when present.
    #[serde(rename = "captionVector", default, skip_serializing_if = "Vec::is_empty")]
    pub caption_vector: Vec<f32>,

    /// Display title.
    pub title: String,

    /// Page number.
    pub page: u32,

    /// Character offset.
    pub offset: u32,

    /// Content length in characters.
    pub length: u32,

    /// Source URL.
    pub url: String,

    /// Category label.
    pub category: String,

    /// Summary text.
    pub summary: String,

    /// Ordered related image locations.
    #[serde(rename = "relatedImages", default)]
    pub related_images: Vec<String>,

    /// Ordered related file locations.
    #[serde(rename = "relatedFiles", default)]
    pub related_files: Vec<String>,

    /// Combined figure caption text.
    #[serde(rename = "imageCaptions")]
    pub image_captions: String,

    /// File path or name.
    pub filepath: String,
}

impl IndexDocument {
    /// Projects a chunk into an index record under the given parent.
    #[must_use]
    pub fn from_chunk(
        chunk: &Chunk,
        parent_id: &str,
        source: &str,
        name: &str,
        last_modified: DateTime<Utc>,
        user_ids: &[String],
        group_ids: &[String],
    ) -> Self {
        Self {
            id: keys::chunk_key(parent_id, chunk.chunk_id),
            parent_id: parent_id.to_string(),
            metadata_storage_path: parent_id.to_string(),
            metadata_storage_name: name.to_string(),
            metadata_storage_last_modified: last_modified,
            metadata_security_user_ids: dedupe_security_ids(user_ids),
            metadata_security_group_ids: dedupe_security_ids(group_ids),
            source: source.to_string(),
            chunk_id: chunk.chunk_id,
            content: chunk.content.clone(),
            content_vector: chunk.content_vector.clone(),
            caption_vector: chunk.caption_vector.clone().unwrap_or_default(),
            title: chunk.title.clone(),
            page: chunk.page,
            offset: chunk.offset,
            length: chunk.length,
            url: chunk.url.clone(),
            category: chunk.category.clone(),
            summary: chunk.summary.clone(),
            related_images: chunk.related_images.clone(),
            related_files: chunk.related_files.clone(),
            image_captions: chunk.image_captions.clone(),
            filepath: if chunk.filepath.is_empty() {
                parent_id.to_string()
            } else {
                chunk.filepath.clone()
            },
        }
    }
}

/// Dedupes security IDs preserving first-seen order, truncating to
/// [`MAX_SECURITY_IDS`] entries. A warning is logged when truncation drops
/// entries.
#[must_use]
pub fn dedupe_security_ids(ids: &[String]) -> Vec<String> {
    let mut seen = std::collections::HashSet::new();
    let mut out = Vec::new();
    for id in ids {
        let trimmed = id.trim();
        if trimmed.is_empty() {
            continue;
        }
        if seen.insert(trimmed.to_string()) {
            out.push(trimmed.to_string());
        }
    }
    if out.len() > MAX_SECURITY_IDS {
        tracing::warn!(
            "[security-ids] truncating {} unique IDs to {MAX_SECURITY_IDS}",
            out.len()
        );
        out.truncate(MAX_SECURITY_IDS);
    }
    out
}
