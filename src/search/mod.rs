//! Thin contract over the vector search index.
//!
//! The engines speak to the index through [`SearchIndex`]: batched upserts
//! and deletes, point fetch by key, and a paged scan with a filter. The
//! in-memory implementation backs tests and the engine test-bench; the REST
//! implementation (see [`rest`]) talks to an Azure-AI-Search-style service.

pub mod memory;
pub mod rest;

use async_trait::async_trait;
use futures_util::Stream;
use serde_json::Value;

pub use memory::MemorySearchIndex;
pub use rest::RestSearchIndex;

use crate::core::IndexDocument;
use crate::error::Result;

/// Recommended maximum documents per index batch (`INDEXER_BATCH_SIZE`).
pub const DEFAULT_BATCH_SIZE: usize = 500;

/// Default page size for scans.
pub const DEFAULT_PAGE_SIZE: usize = 1000;

/// Query for a paged scan.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SearchQuery {
    /// Filter expression in the index's filter grammar (equality, `ne`,
    /// conjunction). `None` matches everything.
    pub filter: Option<String>,

    /// Field projection; empty selects all fields.
    pub select: Vec<String>,

    /// Page size.
    pub top: usize,
}

impl SearchQuery {
    /// Creates a match-all query with the default page size.
    #[must_use]
    pub fn all() -> Self {
        Self {
            filter: None,
            select: Vec::new(),
            top: DEFAULT_PAGE_SIZE,
        }
    }

    /// Sets the filter expression.
    #[must_use]
    pub fn filter(mut self, filter: impl Into<String>) -> Self {
        self.filter = Some(filter.into());
        self
    }

    /// Sets the projected fields.
    #[must_use]
    pub fn select(mut self, fields: &[&str]) -> Self {
        self.select = fields.iter().map(ToString::to_string).collect();
        self
    }

    /// Sets the page size.
    #[must_use]
    pub const fn top(mut self, top: usize) -> Self {
        self.top = top;
        self
    }
}

/// Escapes a string literal for use inside a filter expression.
#[must_use]
pub fn escape_filter_value(value: &str) -> String {
    value.replace('\'', "''")
}

/// Per-batch outcome of an upload or delete.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchResult {
    /// Documents accepted by the index.
    pub succeeded: usize,

    /// Documents rejected.
    pub failed: usize,

    /// `(key, message)` for each rejected document.
    pub failures: Vec<(String, String)>,
}

impl BatchResult {
    /// Merges another batch outcome into this one.
    pub fn merge(&mut self, other: Self) {
        self.succeeded += other.succeeded;
        self.failed += other.failed;
        self.failures.extend(other.failures);
    }
}

/// Asynchronous search index contract. Concurrent callers are permitted.
#[async_trait]
pub trait SearchIndex: Send + Sync {
    /// Upserts one batch of documents (at most the gateway's batch size).
    async fn upload_documents(&self, docs: &[IndexDocument]) -> Result<BatchResult>;

    /// Deletes documents by primary key.
    async fn delete_documents(&self, keys: &[String]) -> Result<BatchResult>;

    /// Point fetch by key; `Ok(None)` when absent.
    async fn get_document(&self, key: &str) -> Result<Option<Value>>;

    /// Fetches one page of a scan, skipping `skip` documents.
    ///
    /// Pages are stable for an unchanged index; a page shorter than
    /// `query.top` terminates the scan.
    async fn search_page(&self, query: &SearchQuery, skip: usize) -> Result<Vec<Value>>;
}

/// Adapts [`SearchIndex::search_page`] into an async sequence of pages.
pub fn scan_pages<'a>(
    index: &'a dyn SearchIndex,
    query: SearchQuery,
) -> impl Stream<Item = Result<Vec<Value>>> + 'a {
    async_stream::try_stream! {
        let mut skip = 0usize;
        loop {
            let page = index.search_page(&query, skip).await?;
            let len = page.len();
            if len > 0 {
                yield page;
            }
            if len < query.top {
                break;
            }
            skip += len;
        }
    }
}

/// Uploads documents in batches of `batch_size`, merging outcomes.
///
/// # Errors
///
/// Propagates the first gateway error; documents in earlier batches stay
/// uploaded (partial failure leaves a reduced-but-valid set).
pub async fn upload_in_batches(
    index: &dyn SearchIndex,
    docs: &[IndexDocument],
    batch_size: usize,
) -> Result<BatchResult> {
    let mut total = BatchResult::default();
    for batch in docs.chunks(batch_size.max(1)) {
        total.merge(index.upload_documents(batch).await?);
    }
    Ok(total)
}

/// Deletes keys in batches of `batch_size`, merging outcomes.
///
/// # Errors
///
/// Propagates the first gateway error.
pub async fn delete_in_batches(
    index: &dyn SearchIndex,
    keys: &[String],
    batch_size: usize,
) -> Result<BatchResult> {
    let mut total = BatchResult::default();
    for batch in keys.chunks(batch_size.max(1)) {
        total.merge(index.delete_documents(batch).await?);
    }
    Ok(total)
}
