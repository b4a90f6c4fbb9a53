//! End-to-end pipeline tests over the in-memory gateways.
//!
//! Exercises the indexer and purger engines through their public APIs with
//! a scripted layout analyzer, the deterministic local providers, and the
//! in-memory object store and search index.

#![allow(clippy::unwrap_used)]

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, TimeZone, Utc};
use serde_json::Value;
use tokio::sync::{RwLock, Semaphore};
use tokio_util::sync::CancellationToken;

use ragsync_rs::chunking::{ChunkerFactory, ChunkerParams};
use ragsync_rs::connectors::{
    BlobConnector, GraphApi, SharePointConnector, SpDriveItem, SpListItem, SpPermission,
};
use ragsync_rs::core::{FileContent, RunStatus};
use ragsync_rs::embedding::{
    ChatClient, EmbeddingClient, EmbeddingProvider, HashEmbeddingProvider, LocalChatProvider,
};
use ragsync_rs::error::{EmbeddingError, Result};
use ragsync_rs::indexer::{IndexerConfig, IndexerEngine};
use ragsync_rs::layout::{AnalyzeResult, ContentFormat, LayoutAnalyzer, Page};
use ragsync_rs::purger::PurgerEngine;
use ragsync_rs::runlog::RunLogger;
use ragsync_rs::search::{MemorySearchIndex, SearchIndex};
use ragsync_rs::storage::{MemoryObjectStore, ObjectStore};
use ragsync_rs::tokens::TokenEstimator;

/// Layout analyzer returning swappable markdown content.
struct SwappableAnalyzer {
    content: RwLock<String>,
}

impl SwappableAnalyzer {
    fn new(content: &str) -> Self {
        Self {
            content: RwLock::new(content.to_string()),
        }
    }

    async fn set_content(&self, content: &str) {
        *self.content.write().await = content.to_string();
    }
}

#[async_trait]
impl LayoutAnalyzer for SwappableAnalyzer {
    async fn analyze(&self, _bytes: &Bytes, _content_type: &str) -> Result<AnalyzeResult> {
        Ok(AnalyzeResult {
            content: self.content.read().await.clone(),
            content_format: ContentFormat::Markdown,
            paragraphs: Vec::new(),
            tables: Vec::new(),
            pages: vec![Page {
                page_number: 1,
                width: 8.5,
                height: 11.0,
            }],
            figures: Vec::new(),
        })
    }

    async fn figure_image(&self, _figure_id: &str) -> Result<Bytes> {
        Ok(Bytes::new())
    }

    fn supported_extensions(&self) -> &[&'static str] {
        &["pdf", "png", "jpeg", "jpg", "bmp", "tiff"]
    }
}

/// Three paragraphs sized so a 50-token budget yields exactly three chunks.
fn three_chunk_content() -> String {
    let paragraphs = [
        "Quarterly revenue grew steadily across all monitored regions this period. ",
        "Operating expenses held flat despite continued expansion of field teams. ",
        "Customer retention improved measurably after the support reorganization. ",
    ];
    paragraphs
        .iter()
        .map(|p| p.repeat(3))
        .collect::<Vec<_>>()
        .join("\n\n")
}

/// Two paragraphs under the same budget.
fn two_chunk_content() -> String {
    let paragraphs = [
        "Revised annual guidance reflects stronger subscription demand overall. ",
        "Margin recovery is expected to continue through the following year. ",
    ];
    paragraphs
        .iter()
        .map(|p| p.repeat(3))
        .collect::<Vec<_>>()
        .join("\n\n")
}

struct Bench {
    store: Arc<MemoryObjectStore>,
    search: Arc<MemorySearchIndex>,
    analyzer: Arc<SwappableAnalyzer>,
    embedding_provider: Arc<dyn EmbeddingProvider>,
}

impl Bench {
    fn new() -> Self {
        Self::with_provider(Arc::new(HashEmbeddingProvider::new(32)))
    }

    fn with_provider(provider: Arc<dyn EmbeddingProvider>) -> Self {
        Self {
            store: Arc::new(MemoryObjectStore::new()),
            search: Arc::new(MemorySearchIndex::new()),
            analyzer: Arc::new(SwappableAnalyzer::new(&three_chunk_content())),
            embedding_provider: provider,
        }
    }

    fn chunkers(&self) -> Arc<ChunkerFactory> {
        let estimator = TokenEstimator::new().unwrap();
        let gate = Arc::new(Semaphore::new(2));
        let chat = ChatClient::new(Arc::new(LocalChatProvider), Arc::clone(&gate), estimator.clone());
        let embeddings = EmbeddingClient::new(
            Arc::clone(&self.embedding_provider),
            Arc::clone(&gate),
            estimator.clone(),
        );
        Arc::new(ChunkerFactory::new(
            ChunkerParams {
                max_chunk_size: 50,
                token_overlap: 0,
                min_chunk_size: 1,
            },
            estimator,
            Arc::clone(&self.analyzer) as Arc<dyn LayoutAnalyzer>,
            Arc::clone(&self.store) as Arc<dyn ObjectStore>,
            chat,
            embeddings,
        ))
    }

    fn embeddings(&self) -> EmbeddingClient {
        EmbeddingClient::new(
            Arc::clone(&self.embedding_provider),
            Arc::new(Semaphore::new(2)),
            TokenEstimator::new().unwrap(),
        )
    }

    fn logger(&self, engine: &str) -> Arc<RunLogger> {
        Arc::new(RunLogger::new(
            Arc::clone(&self.store) as Arc<dyn ObjectStore>,
            "jobs",
            engine,
            Duration::from_secs(5),
            Duration::from_secs(30),
        ))
    }

    fn blob_indexer(&self) -> IndexerEngine {
        IndexerEngine::new(
            Arc::new(BlobConnector::new(
                Arc::clone(&self.store) as Arc<dyn ObjectStore>,
                "docs",
                "",
                "https://acct.blob.core.windows.net",
            )),
            Arc::clone(&self.search) as Arc<dyn SearchIndex>,
            self.embeddings(),
            self.chunkers(),
            self.logger("blob-storage-indexer"),
            IndexerConfig::named("blob-storage-indexer"),
        )
    }

    fn blob_purger(&self) -> PurgerEngine {
        PurgerEngine::new(
            Arc::new(BlobConnector::new(
                Arc::clone(&self.store) as Arc<dyn ObjectStore>,
                "docs",
                "",
                "https://acct.blob.core.windows.net",
            )),
            Arc::clone(&self.search) as Arc<dyn SearchIndex>,
            self.logger("blob-storage-purger"),
            "blob-storage-purger",
            500,
        )
    }

    async fn seed_pdf(&self, name: &str, at: DateTime<Utc>) {
        self.seed_with_metadata(name, at, BTreeMap::new()).await;
    }

    async fn seed_with_metadata(
        &self,
        name: &str,
        at: DateTime<Utc>,
        metadata: BTreeMap<String, String>,
    ) {
        self.store
            .seed(
                "docs",
                name,
                Bytes::from_static(b"%PDF-1.7"),
                "application/pdf",
                at,
                metadata,
            )
            .await;
    }
}

fn lm(sec: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 1, 10, 12, 0, sec).unwrap()
}

#[tokio::test]
async fn fresh_ingest_uploads_three_chunks_with_stable_keys() {
    let bench = Bench::new();
    bench.seed_pdf("a.pdf", lm(0)).await;

    let summary = bench
        .blob_indexer()
        .run(&CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(summary.status, RunStatus::Finished);
    assert_eq!(summary.items_discovered, 1);
    assert_eq!(summary.candidate_items, 1);
    assert_eq!(summary.indexed_items, 1);
    assert_eq!(summary.skipped_no_change, 0);
    assert_eq!(summary.failed, 0);
    assert_eq!(summary.total_chunks_uploaded, 3);

    assert_eq!(
        bench.search.keys().await,
        vec!["docs-a-pdf-c00000", "docs-a-pdf-c00001", "docs-a-pdf-c00002"]
    );

    let doc = bench
        .search
        .get_document("docs-a-pdf-c00000")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(doc.get("parent_id").and_then(Value::as_str), Some("/docs/a.pdf"));
    assert_eq!(doc.get("source").and_then(Value::as_str), Some("blob"));
    assert_eq!(
        doc.get("metadata_storage_last_modified").and_then(Value::as_str),
        Some("2025-01-10T12:00:00Z")
    );
    assert!(!doc["contentVector"].as_array().unwrap().is_empty());
}

#[tokio::test]
async fn rerun_unchanged_skips_without_touching_index() {
    let bench = Bench::new();
    bench.seed_pdf("a.pdf", lm(0)).await;
    bench
        .blob_indexer()
        .run(&CancellationToken::new())
        .await
        .unwrap();

    let summary = bench
        .blob_indexer()
        .run(&CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(summary.indexed_items, 0);
    assert_eq!(summary.skipped_no_change, 1);
    assert_eq!(summary.total_chunks_uploaded, 0);
    assert_eq!(bench.search.len().await, 3);
}

#[tokio::test]
async fn modified_item_replaced_with_fewer_chunks() {
    let bench = Bench::new();
    bench.seed_pdf("a.pdf", lm(0)).await;
    bench
        .blob_indexer()
        .run(&CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(bench.search.len().await, 3);

    // Five seconds newer, and the document now yields two chunks.
    bench.analyzer.set_content(&two_chunk_content()).await;
    bench.seed_pdf("a.pdf", lm(5)).await;

    let summary = bench
        .blob_indexer()
        .run(&CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(summary.indexed_items, 1);
    assert_eq!(summary.total_chunks_uploaded, 2);
    assert_eq!(
        bench.search.keys().await,
        vec!["docs-a-pdf-c00000", "docs-a-pdf-c00001"]
    );
}

#[tokio::test]
async fn security_ids_deduped_and_truncated_to_32() {
    let bench = Bench::new();
    let forty: Vec<String> = (0..38)
        .map(|i| format!("user-{i}"))
        .chain(["user-0".to_string(), "user-1".to_string()])
        .collect();
    let mut metadata = BTreeMap::new();
    metadata.insert(
        "metadata_security_user_ids".to_string(),
        forty.join(","),
    );
    bench.seed_with_metadata("a.pdf", lm(0), metadata).await;

    bench
        .blob_indexer()
        .run(&CancellationToken::new())
        .await
        .unwrap();

    let doc = bench
        .search
        .get_document("docs-a-pdf-c00000")
        .await
        .unwrap()
        .unwrap();
    let ids = doc["metadata_security_user_ids"].as_array().unwrap();
    assert_eq!(ids.len(), 32);
    assert_eq!(ids[0], "user-0");
    // Dedupe keeps first-seen order; duplicates never reappear.
    assert_eq!(
        ids.iter().filter(|v| v.as_str() == Some("user-0")).count(),
        1
    );
}

#[tokio::test]
async fn purger_removes_orphans_only() {
    let bench = Bench::new();
    bench.seed_pdf("kept.pdf", lm(0)).await;
    bench.seed_pdf("deleted.pdf", lm(0)).await;
    bench
        .blob_indexer()
        .run(&CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(bench.search.len().await, 6);

    bench.store.delete("docs", "deleted.pdf").await.unwrap();
    let summary = bench
        .blob_purger()
        .run(&CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(summary.docs_scanned, 6);
    assert_eq!(summary.docs_deleted, 3);
    assert_eq!(summary.docs_failed_delete, 0);
    let keys = bench.search.keys().await;
    assert_eq!(keys.len(), 3);
    assert!(keys.iter().all(|k| k.starts_with("docs-kept-pdf")));
}

#[tokio::test]
async fn sharepoint_body_and_attachment_are_separate_parents() {
    struct ListGraph;

    #[async_trait]
    impl GraphApi for ListGraph {
        async fn list_items_page(
            &self,
            _site: &str,
            _list: &str,
            _token: Option<&str>,
        ) -> Result<(Vec<SpListItem>, Option<String>)> {
            let mut fields = serde_json::Map::new();
            fields.insert("Title".to_string(), Value::String("Budget".to_string()));
            fields.insert("Status".to_string(), Value::String("Final".to_string()));
            Ok((
                vec![SpListItem {
                    id: "42".to_string(),
                    title: Some("Budget".to_string()),
                    fields,
                    last_modified: Utc.with_ymd_and_hms(2025, 2, 1, 9, 0, 0).unwrap(),
                    drive_item_id: Some("drv-9".to_string()),
                }],
                None,
            ))
        }

        async fn drive_item(&self, _site: &str, _id: &str) -> Result<SpDriveItem> {
            Ok(SpDriveItem {
                id: "drv-9".to_string(),
                name: "report.pdf".to_string(),
                last_modified: Utc.with_ymd_and_hms(2025, 2, 1, 9, 0, 10).unwrap(),
                content_type: Some("application/pdf".to_string()),
            })
        }

        async fn download_drive_item(&self, _site: &str, _id: &str) -> Result<FileContent> {
            Ok(FileContent::from_bytes(
                Bytes::from_static(b"%PDF-1.7"),
                "application/pdf",
            ))
        }

        async fn item_permissions(
            &self,
            _site: &str,
            _list: &str,
            _item: &str,
        ) -> Result<Vec<SpPermission>> {
            Ok(Vec::new())
        }

        async fn lookup_value(
            &self,
            _site: &str,
            _list: &str,
            _target: &str,
        ) -> Result<Option<String>> {
            Ok(None)
        }

        async fn list_web_url(&self, _site: &str, _list: &str) -> Result<String> {
            Ok("https://contoso.sharepoint.com/sites/fin/Lists/Budgets".to_string())
        }
    }

    let bench = Bench::new();
    let connector = Arc::new(SharePointConnector::new(Arc::new(ListGraph), "fin", "budgets"));
    let engine = IndexerEngine::new(
        connector,
        Arc::clone(&bench.search) as Arc<dyn SearchIndex>,
        bench.embeddings(),
        bench.chunkers(),
        bench.logger("sharepoint-indexer"),
        IndexerConfig::named("sharepoint-indexer"),
    );

    let summary = engine.run(&CancellationToken::new()).await.unwrap();
    assert_eq!(summary.items_discovered, 2);
    assert_eq!(summary.indexed_items, 2);

    let keys = bench.search.keys().await;
    // Body chunk 0 under the item's parent.
    assert!(keys.contains(&"sites-fin-lists-budgets-42-c00000".to_string()));
    // Attachment chunks start at c00000 under their own parent.
    assert!(
        keys.iter()
            .any(|k| k.starts_with("sites-fin-lists-budgets-42-report-pdf-c00000"))
    );

    let body = bench
        .search
        .get_document("sites-fin-lists-budgets-42-c00000")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(
        body.get("source").and_then(Value::as_str),
        Some("sharepoint-list")
    );
    assert!(
        body.get("content")
            .and_then(Value::as_str)
            .unwrap()
            .contains("Budget")
    );
}

#[tokio::test(start_paused = true)]
async fn rate_limited_embedding_recovers_and_item_succeeds() {
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct FlakyProvider {
        failures: Mutex<usize>,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl EmbeddingProvider for FlakyProvider {
        async fn embed_once(&self, _text: &str) -> std::result::Result<Vec<f32>, EmbeddingError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let mut failures = self.failures.lock().unwrap();
            if *failures > 0 {
                *failures -= 1;
                return Err(EmbeddingError::RateLimited {
                    retry_after: Some(Duration::from_millis(2000)),
                });
            }
            Ok(vec![0.25; 8])
        }

        fn name(&self) -> &'static str {
            "flaky"
        }
    }

    let provider = Arc::new(FlakyProvider {
        failures: Mutex::new(2),
        calls: AtomicUsize::new(0),
    });
    let bench = Bench::with_provider(Arc::clone(&provider) as Arc<dyn EmbeddingProvider>);
    bench.seed_pdf("a.pdf", lm(0)).await;

    let started = tokio::time::Instant::now();
    let summary = bench
        .blob_indexer()
        .run(&CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(summary.indexed_items, 1);
    assert_eq!(summary.failed, 0);
    // Two rate-limit waits of >= 2s each before the first vector.
    assert!(started.elapsed() >= Duration::from_secs(4));
    assert!(provider.calls.load(Ordering::SeqCst) >= 5);
}

#[tokio::test]
async fn empty_source_yields_wellformed_finished_summary() {
    let bench = Bench::new();
    let summary = bench
        .blob_indexer()
        .run(&CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(summary.status, RunStatus::Finished);
    assert_eq!(summary.items_discovered, 0);
    assert!(summary.counters_consistent());

    let latest = bench
        .store
        .download("jobs", "blob-storage-indexer/runs/latest.json")
        .await
        .unwrap();
    let value: Value = serde_json::from_slice(&latest).unwrap();
    assert_eq!(value.get("status").and_then(Value::as_str), Some("finished"));
}

#[tokio::test]
async fn run_artifacts_and_item_logs_written() {
    let bench = Bench::new();
    bench.seed_pdf("a.pdf", lm(0)).await;
    let summary = bench
        .blob_indexer()
        .run(&CancellationToken::new())
        .await
        .unwrap();

    let base = format!("blob-storage-indexer/runs/{}", summary.run_id);
    for name in [
        format!("{base}.started.json"),
        format!("{base}.finished.json"),
        format!("{base}.json"),
        format!("{base}.pointer.json"),
    ] {
        assert!(
            bench.store.exists("jobs", &name).await.unwrap(),
            "missing run artifact {name}"
        );
    }

    let item_log = bench
        .store
        .download("jobs", "blob-storage-indexer/files/docs-a-pdf.json")
        .await
        .unwrap();
    let value: Value = serde_json::from_slice(&item_log).unwrap();
    assert_eq!(value.get("status").and_then(Value::as_str), Some("success"));
    assert_eq!(value.get("chunks").and_then(Value::as_u64), Some(3));
    assert_eq!(
        value.get("chunksIds").and_then(Value::as_str),
        Some("docs-a-pdf-c*")
    );
}
