//! Purger engine.
//!
//! Reconciles the index against upstream truth for one source tag: loads
//! the set of parent IDs that still exist upstream, page-scans the index
//! partition (`source eq '<tag>'`), and deletes every document whose parent
//! no longer exists, in batches. The purger only ever touches documents
//! carrying its own source tag.

use std::collections::BTreeSet;
use std::sync::Arc;

use chrono::Utc;
use futures_util::{StreamExt, TryStreamExt};
use serde_json::{Value, json};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{Level, info};

use crate::connectors::SourceConnector;
use crate::error::{Error, Result};
use crate::runlog::RunLogger;
use crate::search::{SearchIndex, SearchQuery, delete_in_batches, scan_pages};

/// Summary of one purger pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PurgeSummary {
    /// Engine tag.
    pub indexer_type: String,

    /// ISO-8601 start timestamp.
    pub run_started_at: String,

    /// ISO-8601 finish timestamp.
    pub run_finished_at: Option<String>,

    /// Index documents scanned in the source partition.
    pub docs_scanned: u64,

    /// Documents deleted as orphans.
    pub docs_deleted: u64,

    /// Documents whose delete was rejected.
    pub docs_failed_delete: u64,

    /// Result pages scanned.
    pub pages_scanned: u64,

    /// Parents present upstream.
    pub source_parents: u64,

    /// Orphaned parents purged.
    pub parents_purged: u64,
}

/// Purger engine for one source.
pub struct PurgerEngine {
    connector: Arc<dyn SourceConnector>,
    search: Arc<dyn SearchIndex>,
    logger: Arc<RunLogger>,
    purger_name: String,
    batch_size: usize,
}

impl PurgerEngine {
    /// Creates a purger over the given collaborators.
    #[must_use]
    pub fn new(
        connector: Arc<dyn SourceConnector>,
        search: Arc<dyn SearchIndex>,
        logger: Arc<RunLogger>,
        purger_name: &str,
        batch_size: usize,
    ) -> Self {
        Self {
            connector,
            search,
            logger,
            purger_name: purger_name.to_string(),
            batch_size,
        }
    }

    /// Runs one reconciliation pass.
    ///
    /// # Errors
    ///
    /// Returns run-scoped errors (enumeration or index scan failures);
    /// cancellation surfaces as [`Error::Cancelled`].
    pub async fn run(&self, cancel: &CancellationToken) -> Result<PurgeSummary> {
        let started_at = Utc::now();
        let mut summary = PurgeSummary {
            indexer_type: self.purger_name.clone(),
            run_started_at: started_at.to_rfc3339(),
            ..PurgeSummary::default()
        };
        info!("[{}] starting @ {}", self.purger_name, summary.run_started_at);

        // Upstream truth: the set of parent ids that still exist.
        let existing = self.load_upstream_truth(cancel).await?;
        summary.source_parents = existing.len() as u64;

        // Scan this source's partition and collect orphaned document ids.
        let tag = self.connector.source_tag().to_string();
        let filter = format!("source eq '{}'", crate::search::escape_filter_value(&tag));
        let query = SearchQuery::all()
            .filter(filter)
            .select(&["id", "parent_id", "metadata_storage_path"]);

        let mut orphan_ids: Vec<String> = Vec::new();
        let mut orphan_parents: BTreeSet<String> = BTreeSet::new();
        let mut pages = std::pin::pin!(scan_pages(self.search.as_ref(), query));
        while let Some(page) = pages.next().await {
            if cancel.is_cancelled() {
                return Err(Error::Cancelled);
            }
            let page = page?;
            summary.pages_scanned += 1;
            for doc in page {
                summary.docs_scanned += 1;
                let parent = doc
                    .get("parent_id")
                    .or_else(|| doc.get("metadata_storage_path"))
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string();
                if parent.is_empty() || existing.contains(&parent) {
                    continue;
                }
                if let Some(id) = doc.get("id").and_then(Value::as_str) {
                    orphan_ids.push(id.to_string());
                    orphan_parents.insert(parent);
                }
            }
        }

        info!(
            "[{}] will purge {} parent(s), {} doc(s)",
            self.purger_name,
            orphan_parents.len(),
            orphan_ids.len()
        );
        summary.parents_purged = orphan_parents.len() as u64;

        if !orphan_ids.is_empty() {
            let result =
                delete_in_batches(self.search.as_ref(), &orphan_ids, self.batch_size).await?;
            summary.docs_deleted = result.succeeded as u64;
            summary.docs_failed_delete = result.failed as u64;
        }

        for parent in &orphan_parents {
            self.logger.log_event(
                Level::INFO,
                "PARENT-PURGED",
                &[("parentId", json!(parent))],
            );
        }

        summary.run_finished_at = Some(Utc::now().to_rfc3339());
        self.write_summary(&summary).await;
        info!(
            "[{}] purge complete: scanned={} deleted={} failed={}",
            self.purger_name, summary.docs_scanned, summary.docs_deleted, summary.docs_failed_delete
        );
        Ok(summary)
    }

    /// Enumerates upstream and derives the expected parent-id set.
    async fn load_upstream_truth(&self, cancel: &CancellationToken) -> Result<BTreeSet<String>> {
        let items: Vec<_> = tokio::select! {
            () = cancel.cancelled() => return Err(Error::Cancelled),
            items = self.connector.enumerate().try_collect::<Vec<_>>() => items?,
        };
        Ok(items
            .iter()
            .map(|item| self.connector.parent_id(item))
            .collect())
    }

    async fn write_summary(&self, summary: &PurgeSummary) {
        self.logger.log_event(
            Level::INFO,
            "PURGE-COMPLETE",
            &[
                ("docsScanned", json!(summary.docs_scanned)),
                ("docsDeleted", json!(summary.docs_deleted)),
                ("docsFailedDelete", json!(summary.docs_failed_delete)),
                ("pagesScanned", json!(summary.pages_scanned)),
            ],
        );
    }
}

impl std::fmt::Debug for PurgerEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PurgerEngine")
            .field("purger_name", &self.purger_name)
            .field("source", &self.connector.source_tag())
            .finish_non_exhaustive()
    }
}
