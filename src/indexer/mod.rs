//! Indexer engine.
//!
//! Orchestrates one source's pass: discovery -> freshness gate -> fetch ->
//! chunk -> embed -> replace. Items run through a bounded concurrent pool;
//! within one item the work is sequential. The freshness gate consults the
//! chunk-0 record's `metadata_storage_last_modified` and reindexes only
//! items strictly newer than the recorded timestamp plus a small skew.
//! Replacement is delete-by-parent followed by batched upload: not atomic,
//! but a partial failure leaves a reduced-but-valid set and the next run
//! retries because chunk 0 is compared again.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures_util::StreamExt;
use serde_json::{Value, json};
use tokio_util::sync::CancellationToken;
use tracing::{Level, info, warn};

use crate::chunking::{ChunkerFactory, ChunkerInput};
use crate::connectors::SourceConnector;
use crate::core::{
    Chunk, IndexDocument, ItemLog, ItemOutcome, ItemRef, RunStatus, RunSummary, run_id_for,
};
use crate::embedding::EmbeddingClient;
use crate::error::{Error, Result};
use crate::keys;
use crate::runlog::RunLogger;
use crate::search::{SearchIndex, SearchQuery, delete_in_batches, scan_pages, upload_in_batches};

/// Default bounded item concurrency (`INDEXER_MAX_CONCURRENCY`).
pub const DEFAULT_MAX_CONCURRENCY: usize = 8;

/// Default freshness skew in seconds.
pub const DEFAULT_FRESHNESS_SKEW_SECS: u64 = 1;

/// Default per-item deadline (`INDEXER_ITEM_TIMEOUT_SECONDS`).
pub const DEFAULT_ITEM_TIMEOUT_SECS: u64 = 600;

/// Default bound on the whole collection pass
/// (`LIST_GATHER_TIMEOUT_SECONDS`).
pub const DEFAULT_LIST_GATHER_TIMEOUT_SECS: u64 = 7200;

/// Engine tuning knobs.
#[derive(Debug, Clone)]
pub struct IndexerConfig {
    /// Engine tag used in logs and run artifacts.
    pub indexer_name: String,

    /// Bounded item concurrency.
    pub max_concurrency: usize,

    /// Index batch size for deletes and uploads.
    pub batch_size: usize,

    /// Per-item deadline covering fetch, chunk, embed, and replace.
    pub item_timeout: Duration,

    /// Freshness skew tolerated before reindexing.
    pub freshness_skew: Duration,

    /// Bound on waiting for all items of a collection.
    pub list_gather_timeout: Duration,
}

impl IndexerConfig {
    /// Creates a config with defaults for the given engine tag.
    #[must_use]
    pub fn named(indexer_name: &str) -> Self {
        Self {
            indexer_name: indexer_name.to_string(),
            max_concurrency: DEFAULT_MAX_CONCURRENCY,
            batch_size: crate::search::DEFAULT_BATCH_SIZE,
            item_timeout: Duration::from_secs(DEFAULT_ITEM_TIMEOUT_SECS),
            freshness_skew: Duration::from_secs(DEFAULT_FRESHNESS_SKEW_SECS),
            list_gather_timeout: Duration::from_secs(DEFAULT_LIST_GATHER_TIMEOUT_SECS),
        }
    }
}

/// Terminal outcome of one processed item.
#[derive(Debug, Clone, PartialEq, Eq)]
enum ItemResult {
    Indexed { chunks: u64 },
    Skipped,
    Failed,
    TimedOut,
}

/// Indexer engine for one source.
pub struct IndexerEngine {
    connector: Arc<dyn SourceConnector>,
    search: Arc<dyn SearchIndex>,
    embeddings: EmbeddingClient,
    chunkers: Arc<ChunkerFactory>,
    logger: Arc<RunLogger>,
    config: IndexerConfig,
}

impl IndexerEngine {
    /// Creates an engine over the given collaborators.
    #[must_use]
    pub fn new(
        connector: Arc<dyn SourceConnector>,
        search: Arc<dyn SearchIndex>,
        embeddings: EmbeddingClient,
        chunkers: Arc<ChunkerFactory>,
        logger: Arc<RunLogger>,
        config: IndexerConfig,
    ) -> Self {
        Self {
            connector,
            search,
            embeddings,
            chunkers,
            logger,
            config,
        }
    }

    /// Runs one full pass over the source.
    ///
    /// Item-scoped failures are counted and logged but never abort the run;
    /// run-scoped failures (enumeration, authentication) end the run with
    /// status `failed`. Cancellation ends it with status `cancelled`.
    ///
    /// # Errors
    ///
    /// Returns the run-scoped error after the final summary is written.
    pub async fn run(&self, cancel: &CancellationToken) -> Result<RunSummary> {
        let started_at = Utc::now();
        let run_id = run_id_for(started_at);
        let mut summary = RunSummary::begin(&self.config.indexer_name, started_at);
        info!("[{}] starting @ {run_id}", self.config.indexer_name);
        self.logger.log_event(
            Level::INFO,
            "RUN-START",
            &[
                ("runId", json!(run_id)),
                ("maxConcurrency", json!(self.config.max_concurrency)),
                ("batchSize", json!(self.config.batch_size)),
            ],
        );
        self.logger.write_run_summary(&summary).await;

        let run_error = self.drive(&run_id, &mut summary, cancel).await;

        match &run_error {
            Ok(()) => {
                summary.status = RunStatus::Finishing;
                self.logger.write_run_summary(&summary).await;
                summary.finish(RunStatus::Finished, Utc::now());
            }
            Err(Error::Cancelled) => {
                summary.finish(RunStatus::Cancelled, Utc::now());
                self.logger
                    .log_event(Level::WARN, "RUN-CANCELLED", &[("runId", json!(run_id))]);
            }
            Err(err) => {
                summary.error = Some(err.to_string());
                summary.finish(RunStatus::Failed, Utc::now());
                self.logger.log_event(
                    Level::ERROR,
                    "RUN-ERROR",
                    &[("runId", json!(run_id)), ("error", json!(err.to_string()))],
                );
            }
        }

        self.logger.write_run_summary(&summary).await;
        let duration = (Utc::now() - started_at).num_milliseconds().max(0) as f64 / 1000.0;
        self.logger.log_event(
            Level::INFO,
            "RUN-COMPLETE",
            &[
                ("runId", json!(run_id)),
                ("status", json!(summary.status.as_str())),
                ("itemsDiscovered", json!(summary.items_discovered)),
                ("indexedItems", json!(summary.indexed_items)),
                ("skippedNoChange", json!(summary.skipped_no_change)),
                ("failed", json!(summary.failed)),
                ("totalChunksUploaded", json!(summary.total_chunks_uploaded)),
                ("durationSeconds", json!(duration)),
            ],
        );

        match run_error {
            Ok(()) | Err(Error::Cancelled) => Ok(summary),
            Err(err) => Err(err),
        }
    }

    /// Discovery loop with bounded concurrent item processing.
    async fn drive(
        &self,
        run_id: &str,
        summary: &mut RunSummary,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let stream = self.connector.enumerate();
        let mut outcomes = stream
            .map(|discovered| async move {
                match discovered {
                    Ok(item) => Ok(self.process_item(&item, run_id, cancel).await),
                    Err(err) => Err(err),
                }
            })
            .buffer_unordered(self.config.max_concurrency.max(1));

        let deadline = tokio::time::Instant::now() + self.config.list_gather_timeout;
        loop {
            let next = tokio::select! {
                () = cancel.cancelled() => return Err(Error::Cancelled),
                () = tokio::time::sleep_until(deadline) => {
                    warn!(
                        "[{}] collection gather timed out; cancelling stragglers",
                        self.config.indexer_name
                    );
                    return Err(Error::Timeout {
                        operation: "list-gather".to_string(),
                        seconds: self.config.list_gather_timeout.as_secs(),
                    });
                }
                next = outcomes.next() => next,
            };
            let Some(outcome) = next else { break };

            summary.items_discovered += 1;
            match outcome? {
                ItemResult::Skipped => summary.skipped_no_change += 1,
                ItemResult::Indexed { chunks } => {
                    summary.candidate_items += 1;
                    summary.indexed_items += 1;
                    summary.total_chunks_uploaded += chunks;
                }
                ItemResult::Failed | ItemResult::TimedOut => {
                    summary.candidate_items += 1;
                    summary.failed += 1;
                }
            }
        }
        Ok(())
    }

    /// Full item flow; item-scoped errors terminate in `Failed`/`TimedOut`.
    async fn process_item(
        &self,
        item: &ItemRef,
        run_id: &str,
        cancel: &CancellationToken,
    ) -> ItemResult {
        let parent_id = self.connector.parent_id(item);
        let mut log = ItemLog {
            indexer_type: self.config.indexer_name.clone(),
            run_id: run_id.to_string(),
            item: item.id.clone(),
            parent_id: parent_id.clone(),
            last_modified: item.last_modified.to_rfc3339(),
            chunks_ids: keys::chunk_key_prefix(&parent_id),
            started_at: Utc::now().to_rfc3339(),
            finished_at: None,
            status: ItemOutcome::Error,
            chunks: 0,
            error: None,
        };

        // Freshness gate against the chunk-0 record.
        match self.is_fresh(item, &parent_id).await {
            Ok(true) => {}
            Ok(false) => {
                log.status = ItemOutcome::SkippedNoChange;
                log.finished_at = Some(Utc::now().to_rfc3339());
                self.logger.write_item_log(&parent_id, &log).await;
                return ItemResult::Skipped;
            }
            Err(err) => {
                log.error = Some(err.to_string());
                log.finished_at = Some(Utc::now().to_rfc3339());
                self.logger.write_item_log(&parent_id, &log).await;
                self.log_item_error(run_id, item, &parent_id, &err.to_string());
                return ItemResult::Failed;
            }
        }

        let work = self.index_item(item, &parent_id);
        let outcome = tokio::select! {
            () = cancel.cancelled() => Err(Error::Cancelled),
            outcome = tokio::time::timeout(self.config.item_timeout, work) => {
                outcome.unwrap_or(Err(Error::Timeout {
                    operation: format!("item {}", item.id),
                    seconds: self.config.item_timeout.as_secs(),
                }))
            }
        };

        match outcome {
            Ok(chunks) => {
                log.status = ItemOutcome::Success;
                log.chunks = chunks;
                log.finished_at = Some(Utc::now().to_rfc3339());
                self.logger.write_item_log(&parent_id, &log).await;
                self.logger.log_event(
                    Level::INFO,
                    "ITEM-COMPLETE",
                    &[
                        ("runId", json!(run_id)),
                        ("item", json!(item.id)),
                        ("parentId", json!(parent_id)),
                        ("status", json!("uploaded")),
                        ("totalChunks", json!(chunks)),
                        ("lastModified", json!(item.last_modified.to_rfc3339())),
                    ],
                );
                ItemResult::Indexed { chunks }
            }
            Err(Error::Timeout { operation, seconds }) => {
                let message = format!("operation timed out after {seconds}s: {operation}");
                log.status = ItemOutcome::Timeout;
                log.error = Some(message.clone());
                log.finished_at = Some(Utc::now().to_rfc3339());
                self.logger.write_item_log(&parent_id, &log).await;
                self.log_item_error(run_id, item, &parent_id, &message);
                ItemResult::TimedOut
            }
            Err(err) => {
                log.status = ItemOutcome::Error;
                log.error = Some(err.to_string());
                log.finished_at = Some(Utc::now().to_rfc3339());
                self.logger.write_item_log(&parent_id, &log).await;
                self.log_item_error(run_id, item, &parent_id, &err.to_string());
                ItemResult::Failed
            }
        }
    }

    fn log_item_error(&self, run_id: &str, item: &ItemRef, parent_id: &str, message: &str) {
        self.logger.log_event(
            Level::ERROR,
            "ITEM-ERROR",
            &[
                ("runId", json!(run_id)),
                ("item", json!(item.id)),
                ("parentId", json!(parent_id)),
                ("status", json!("error")),
                ("error", json!(message)),
            ],
        );
    }

    /// Strictly-newer-with-skew freshness predicate.
    async fn is_fresh(&self, item: &ItemRef, parent_id: &str) -> Result<bool> {
        let key = keys::chunk_key(parent_id, 0);
        let Some(existing) = self.search.get_document(&key).await? else {
            return Ok(true);
        };
        let Some(recorded) = existing
            .get("metadata_storage_last_modified")
            .and_then(Value::as_str)
            .and_then(parse_timestamp)
        else {
            // Unparseable marker: reindex to restore a sane record.
            return Ok(true);
        };
        let skew = chrono::Duration::from_std(self.config.freshness_skew)
            .unwrap_or_else(|_| chrono::Duration::seconds(1));
        Ok(item.last_modified > recorded + skew)
    }

    /// Candidate flow: fetch, chunk, embed, replace.
    async fn index_item(&self, item: &ItemRef, parent_id: &str) -> Result<u64> {
        let content = self.connector.download(item).await?;

        let chunker_name = match self.connector.virtual_extension() {
            Some(ext) => format!("{}.{ext}", item.name),
            None => item.name.clone(),
        };
        let chunker = self.chunkers.chunker_for(&chunker_name)?;
        let mut input = ChunkerInput::from_bytes(
            &item.name,
            &item.url,
            &content.content_type,
            content.bytes.clone(),
        );
        input.text = content.text.clone();
        let mut chunks = chunker.get_chunks(&input).await?;

        // Embeddings are sequential within one item; cross-item pressure is
        // bounded by the shared provider semaphore.
        for chunk in &mut chunks {
            chunk.content_vector = self.embeddings.embed(chunk.text_to_embed()).await?;
        }

        let docs = self.to_documents(&chunks, item, parent_id);
        self.replace_parent_docs(parent_id, &docs).await?;
        Ok(docs.len() as u64)
    }

    fn to_documents(
        &self,
        chunks: &[Chunk],
        item: &ItemRef,
        parent_id: &str,
    ) -> Vec<IndexDocument> {
        chunks
            .iter()
            .map(|chunk| {
                IndexDocument::from_chunk(
                    chunk,
                    parent_id,
                    self.connector.source_tag(),
                    &item.name,
                    item.last_modified,
                    &item.user_ids,
                    &item.group_ids,
                )
            })
            .collect()
    }

    /// Delete-by-parent, then batched upload of the fresh set.
    async fn replace_parent_docs(&self, parent_id: &str, docs: &[IndexDocument]) -> Result<()> {
        let filter = format!(
            "parent_id eq '{}'",
            crate::search::escape_filter_value(parent_id)
        );
        let query = SearchQuery::all().filter(filter).select(&["id"]);

        let mut ids = Vec::new();
        let mut pages = std::pin::pin!(scan_pages(self.search.as_ref(), query));
        while let Some(page) = pages.next().await {
            for doc in page? {
                if let Some(id) = doc.get("id").and_then(Value::as_str) {
                    ids.push(id.to_string());
                }
            }
        }
        if !ids.is_empty() {
            delete_in_batches(self.search.as_ref(), &ids, self.config.batch_size).await?;
        }
        if !docs.is_empty() {
            upload_in_batches(self.search.as_ref(), docs, self.config.batch_size).await?;
        }
        Ok(())
    }
}

/// Parses an index timestamp (RFC 3339, `Z` or offset form).
fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

impl std::fmt::Debug for IndexerEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IndexerEngine")
            .field("indexer_name", &self.config.indexer_name)
            .field("source", &self.connector.source_tag())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::chunking::ChunkerParams;
    use crate::chunking::doc_analysis::tests::{ScriptedAnalyzer, analysis};
    use crate::embedding::{ChatClient, ChatProvider, EmbeddingProvider, HashEmbeddingProvider};
    use crate::error::EmbeddingError;
    use crate::layout::ContentFormat;
    use crate::search::MemorySearchIndex;
    use crate::storage::MemoryObjectStore;
    use crate::storage::ObjectStore;
    use async_trait::async_trait;
    use bytes::Bytes;
    use chrono::TimeZone;
    use std::collections::BTreeMap;
    use tokio::sync::Semaphore;

    struct CannedChat;

    #[async_trait]
    impl ChatProvider for CannedChat {
        async fn complete_once(
            &self,
            _p: &str,
            _i: Option<&str>,
            _m: u32,
        ) -> std::result::Result<String, EmbeddingError> {
            Ok("summary".to_string())
        }

        fn name(&self) -> &'static str {
            "canned"
        }
    }

    struct Bench {
        store: Arc<MemoryObjectStore>,
        search: Arc<MemorySearchIndex>,
        engine: IndexerEngine,
    }

    fn bench() -> Bench {
        let store = Arc::new(MemoryObjectStore::new());
        let search = Arc::new(MemorySearchIndex::new());
        let estimator = crate::tokens::TokenEstimator::new().unwrap();
        let gate = Arc::new(Semaphore::new(2));
        let embeddings = EmbeddingClient::new(
            Arc::new(HashEmbeddingProvider::new(8)) as Arc<dyn EmbeddingProvider>,
            Arc::clone(&gate),
            estimator.clone(),
        );
        let chat = ChatClient::new(Arc::new(CannedChat), gate, estimator.clone());
        let chunkers = Arc::new(ChunkerFactory::new(
            ChunkerParams {
                max_chunk_size: 200,
                token_overlap: 10,
                min_chunk_size: 1,
            },
            estimator,
            Arc::new(ScriptedAnalyzer {
                result: analysis("analyzed content", ContentFormat::Markdown),
                figure_images: std::collections::HashMap::new(),
            }),
            Arc::clone(&store) as Arc<dyn crate::storage::ObjectStore>,
            chat,
            embeddings.clone(),
        ));
        let logger = Arc::new(RunLogger::new(
            Arc::clone(&store) as Arc<dyn crate::storage::ObjectStore>,
            "jobs",
            "blob-storage-indexer",
            Duration::from_secs(5),
            Duration::from_secs(30),
        ));
        let connector = Arc::new(crate::connectors::BlobConnector::new(
            Arc::clone(&store) as Arc<dyn crate::storage::ObjectStore>,
            "documents",
            "",
            "https://acct.blob.core.windows.net",
        ));
        let engine = IndexerEngine::new(
            connector,
            Arc::clone(&search) as Arc<dyn SearchIndex>,
            embeddings,
            chunkers,
            logger,
            IndexerConfig::named("blob-storage-indexer"),
        );
        Bench {
            store,
            search,
            engine,
        }
    }

    async fn seed_text(bench: &Bench, name: &str, text: &str, at: DateTime<Utc>) {
        bench
            .store
            .seed(
                "documents",
                name,
                Bytes::from(text.as_bytes().to_vec()),
                "text/plain",
                at,
                BTreeMap::new(),
            )
            .await;
    }

    fn lm(sec: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 1, 10, 12, 0, sec).unwrap()
    }

    #[tokio::test]
    async fn test_empty_source_yields_wellformed_summary() {
        let bench = bench();
        let summary = bench.engine.run(&CancellationToken::new()).await.unwrap();
        assert_eq!(summary.status, RunStatus::Finished);
        assert_eq!(summary.items_discovered, 0);
        assert!(summary.counters_consistent());
        assert!(summary.run_finished_at.is_some());
    }

    #[tokio::test]
    async fn test_fresh_ingest_uploads_chunks() {
        let bench = bench();
        seed_text(&bench, "a.txt", "hello world content", lm(0)).await;

        let summary = bench.engine.run(&CancellationToken::new()).await.unwrap();
        assert_eq!(summary.items_discovered, 1);
        assert_eq!(summary.candidate_items, 1);
        assert_eq!(summary.indexed_items, 1);
        assert_eq!(summary.skipped_no_change, 0);
        assert_eq!(summary.failed, 0);
        assert_eq!(summary.total_chunks_uploaded, 1);

        let doc = bench
            .search
            .get_document("documents-a-txt-c00000")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(doc.get("source").and_then(Value::as_str), Some("blob"));
        assert_eq!(doc.get("parent_id").and_then(Value::as_str), Some("/documents/a.txt"));
        assert!(!doc.get("contentVector").unwrap().as_array().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_rerun_unchanged_skips() {
        let bench = bench();
        seed_text(&bench, "a.txt", "hello world content", lm(0)).await;
        bench.engine.run(&CancellationToken::new()).await.unwrap();

        let summary = bench.engine.run(&CancellationToken::new()).await.unwrap();
        assert_eq!(summary.items_discovered, 1);
        assert_eq!(summary.candidate_items, 0);
        assert_eq!(summary.indexed_items, 0);
        assert_eq!(summary.skipped_no_change, 1);
        assert_eq!(summary.total_chunks_uploaded, 0);
    }

    #[tokio::test]
    async fn test_within_skew_not_reindexed() {
        let bench = bench();
        seed_text(&bench, "a.txt", "hello world content", lm(0)).await;
        bench.engine.run(&CancellationToken::new()).await.unwrap();

        // 1s newer = within the default skew.
        seed_text(&bench, "a.txt", "hello world content", lm(1)).await;
        let summary = bench.engine.run(&CancellationToken::new()).await.unwrap();
        assert_eq!(summary.skipped_no_change, 1);
        assert_eq!(summary.indexed_items, 0);
    }

    #[tokio::test]
    async fn test_modified_item_replaced() {
        let bench = bench();
        seed_text(&bench, "a.txt", "original content words", lm(0)).await;
        bench.engine.run(&CancellationToken::new()).await.unwrap();
        assert_eq!(bench.search.len().await, 1);

        seed_text(&bench, "a.txt", "updated content words entirely", lm(5)).await;
        let summary = bench.engine.run(&CancellationToken::new()).await.unwrap();
        assert_eq!(summary.indexed_items, 1);
        assert_eq!(bench.search.len().await, 1);
        let doc = bench
            .search
            .get_document("documents-a-txt-c00000")
            .await
            .unwrap()
            .unwrap();
        assert!(
            doc.get("content")
                .and_then(Value::as_str)
                .unwrap()
                .contains("updated")
        );
    }

    #[tokio::test]
    async fn test_replacement_idempotent() {
        let bench = bench();
        seed_text(&bench, "a.txt", "stable content here", lm(0)).await;
        bench.engine.run(&CancellationToken::new()).await.unwrap();
        let first: Vec<String> = bench.search.keys().await;
        let first_doc = bench
            .search
            .get_document("documents-a-txt-c00000")
            .await
            .unwrap();

        // Force reprocessing with identical content.
        seed_text(&bench, "a.txt", "stable content here", lm(10)).await;
        bench.engine.run(&CancellationToken::new()).await.unwrap();
        let second: Vec<String> = bench.search.keys().await;
        let mut second_doc = bench
            .search
            .get_document("documents-a-txt-c00000")
            .await
            .unwrap();

        assert_eq!(first, second);
        // Identical apart from the freshness timestamp.
        if let Some(Value::Object(map)) = second_doc.as_mut() {
            map.insert(
                "metadata_storage_last_modified".to_string(),
                first_doc
                    .as_ref()
                    .and_then(|d| d.get("metadata_storage_last_modified"))
                    .cloned()
                    .unwrap_or(Value::Null),
            );
        }
        assert_eq!(first_doc, second_doc);
    }

    #[tokio::test]
    async fn test_item_failure_does_not_abort_run() {
        let bench = bench();
        seed_text(&bench, "good.txt", "fine content here", lm(0)).await;
        // Invalid JSON fails the JSON chunker for this item only.
        seed_text(&bench, "bad.json", "{ not json", lm(0)).await;

        let summary = bench.engine.run(&CancellationToken::new()).await.unwrap();
        assert_eq!(summary.status, RunStatus::Finished);
        assert_eq!(summary.items_discovered, 2);
        assert_eq!(summary.indexed_items, 1);
        assert_eq!(summary.failed, 1);
        assert!(summary.counters_consistent());
    }

    #[tokio::test]
    async fn test_zero_byte_item_success_no_docs() {
        let bench = bench();
        seed_text(&bench, "empty.txt", "", lm(0)).await;
        let summary = bench.engine.run(&CancellationToken::new()).await.unwrap();
        assert_eq!(summary.indexed_items, 1);
        assert_eq!(summary.total_chunks_uploaded, 0);
        assert_eq!(bench.search.len().await, 0);
    }

    #[tokio::test]
    async fn test_cancellation_writes_cancelled_summary() {
        let bench = bench();
        seed_text(&bench, "a.txt", "content", lm(0)).await;
        let cancel = CancellationToken::new();
        cancel.cancel();
        let summary = bench.engine.run(&cancel).await.unwrap();
        assert_eq!(summary.status, RunStatus::Cancelled);
    }

    #[tokio::test]
    async fn test_per_item_log_written() {
        let bench = bench();
        seed_text(&bench, "a.txt", "hello world content", lm(0)).await;
        bench.engine.run(&CancellationToken::new()).await.unwrap();

        let log = bench
            .store
            .download("jobs", "blob-storage-indexer/files/documents-a-txt.json")
            .await
            .unwrap();
        let value: Value = serde_json::from_slice(&log).unwrap();
        assert_eq!(value.get("status").and_then(Value::as_str), Some("success"));
        assert_eq!(value.get("chunks").and_then(Value::as_u64), Some(1));
    }

    #[tokio::test]
    async fn test_run_summary_artifacts_written() {
        let bench = bench();
        let summary = bench.engine.run(&CancellationToken::new()).await.unwrap();
        let latest = bench
            .store
            .download("jobs", "blob-storage-indexer/runs/latest.json")
            .await
            .unwrap();
        let value: Value = serde_json::from_slice(&latest).unwrap();
        assert_eq!(value.get("status").and_then(Value::as_str), Some("finished"));
        assert_eq!(
            value.get("runId").and_then(Value::as_str),
            Some(summary.run_id.as_str())
        );
    }

    #[test]
    fn test_parse_timestamp_forms() {
        assert!(parse_timestamp("2025-01-10T12:00:00Z").is_some());
        assert!(parse_timestamp("2025-01-10T12:00:00+00:00").is_some());
        assert!(parse_timestamp("not a time").is_none());
    }
}
