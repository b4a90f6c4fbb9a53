//! Application context.
//!
//! Process-wide state (token encoder, provider gate, shared clients,
//! resolved settings) is constructed once here and passed to engines
//! explicitly, never read from hidden globals. The context owns the wiring:
//! connectors, chunker factory, run loggers, and engine builders for each
//! source.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Semaphore;

use crate::chunking::{ChunkerFactory, ChunkerParams, MultimodalOptions, SpreadsheetOptions};
use crate::config::ConfigResolver;
use crate::connectors::{BlobConnector, Nl2sqlConnector, SharePointConnector};
use crate::embedding::{ChatClient, ChatProvider, EmbeddingClient, EmbeddingProvider};
use crate::error::Result;
use crate::indexer::{IndexerConfig, IndexerEngine};
use crate::layout::LayoutAnalyzer;
use crate::purger::PurgerEngine;
use crate::runlog::RunLogger;
use crate::search::SearchIndex;
use crate::storage::ObjectStore;
use crate::tokens::TokenEstimator;

/// Settings resolved once per process from the configuration store.
#[derive(Debug, Clone)]
pub struct AppSettings {
    /// Object store account name (`STORAGE_ACCOUNT_NAME`).
    pub storage_account_name: String,

    /// Source container for blob ingestion (`SOURCE_CONTAINER`).
    pub source_container: String,

    /// Container receiving run artifacts (`JOBS_LOG_CONTAINER`).
    pub jobs_log_container: String,

    /// Optional blob name prefix filter (`BLOB_PREFIX`).
    pub blob_prefix: String,

    /// NL2SQL metadata container (`NL2SQL_STORAGE_CONTAINER`).
    pub nl2sql_container: String,

    /// Search service endpoint (`SEARCH_SERVICE_QUERY_ENDPOINT`).
    pub search_endpoint: String,

    /// Main RAG index name (`SEARCH_RAG_INDEX_NAME`).
    pub search_index_name: String,

    /// NL2SQL queries index (`SEARCH_QUERIES_INDEX_NAME`).
    pub queries_index_name: String,

    /// NL2SQL tables index (`SEARCH_TABLES_INDEX_NAME`).
    pub tables_index_name: String,

    /// NL2SQL measures index (`SEARCH_MEASURES_INDEX_NAME`).
    pub measures_index_name: String,

    /// Bounded item concurrency (`INDEXER_MAX_CONCURRENCY`).
    pub max_concurrency: usize,

    /// Index batch size (`INDEXER_BATCH_SIZE`).
    pub batch_size: usize,

    /// Provider gate permits (`AOAI_MAX_CONCURRENCY`).
    pub aoai_max_concurrency: usize,

    /// Provider back-off cap (`AOAI_BACKOFF_MAX_SECONDS`).
    pub aoai_backoff_max: Duration,

    /// Provider retry attempts: the larger of
    /// `AOAI_MAX_TRANSIENT_ATTEMPTS` and `AOAI_MAX_RATE_LIMIT_ATTEMPTS`.
    pub aoai_max_attempts: usize,

    /// Per-item deadline (`INDEXER_ITEM_TIMEOUT_SECONDS`).
    pub item_timeout: Duration,

    /// HTTP total timeout per upstream call (`HTTP_TOTAL_TIMEOUT_SECONDS`).
    pub http_total_timeout: Duration,

    /// Per blob-operation timeout (`BLOB_OP_TIMEOUT_SECONDS`).
    pub blob_op_timeout: Duration,

    /// Collection-wait bound (`LIST_GATHER_TIMEOUT_SECONDS`).
    pub list_gather_timeout: Duration,

    /// Run-summary write budget (`RUN_SUMMARY_TOTAL_TIMEOUT_SECONDS`).
    pub run_summary_total_timeout: Duration,

    /// Multimodal pipeline toggle (`MULTIMODAL`).
    pub multimodal: bool,

    /// Figures container (`STORAGE_CONTAINER_IMAGES`).
    pub images_container: String,

    /// Figure area gate (`MINIMUM_FIGURE_AREA_PERCENTAGE`).
    pub min_figure_area_pct: f64,

    /// Chunker token budget (`NUM_TOKENS`).
    pub chunker_params: ChunkerParams,

    /// Spreadsheet chunker budget (`SPREADSHEET_CHUNKING_NUM_TOKENS`).
    pub spreadsheet_params: ChunkerParams,

    /// Spreadsheet chunking mode (`SPREADSHEET_CHUNKING_BY_ROW`,
    /// `SPREADSHEET_CHUNKING_BY_ROW_INCLUDE_HEADER`).
    pub spreadsheet_options: SpreadsheetOptions,

    /// Blob indexer period in seconds (`CRON_RUN_BLOB_INDEXER`).
    pub cron_blob_indexer_secs: u64,

    /// Blob purger period in seconds (`CRON_RUN_BLOB_PURGER`).
    pub cron_blob_purger_secs: u64,

    /// NL2SQL indexer period in seconds (`CRON_RUN_NL2SQL_INDEXER`).
    pub cron_nl2sql_indexer_secs: u64,

    /// Run jobs immediately at startup (`RUN_JOBS_ON_STARTUP`).
    pub run_on_startup: bool,
}

impl AppSettings {
    /// Resolves settings with documented defaults.
    ///
    /// # Errors
    ///
    /// Returns a configuration error for unparseable values.
    #[allow(clippy::cast_sign_loss)]
    pub async fn load(config: &ConfigResolver) -> Result<Self> {
        let max_chunk = config.get_i64("NUM_TOKENS", 2048).await? as usize;
        let overlap = config.get_i64("TOKEN_OVERLAP", 100).await? as usize;
        let min_chunk = config.get_i64("MIN_CHUNK_SIZE", 100).await? as usize;
        let chunker_params = ChunkerParams {
            max_chunk_size: max_chunk,
            token_overlap: overlap,
            min_chunk_size: min_chunk,
        };
        let spreadsheet_params = ChunkerParams {
            max_chunk_size: config
                .get_i64("SPREADSHEET_CHUNKING_NUM_TOKENS", max_chunk as i64)
                .await? as usize,
            ..chunker_params
        };

        Ok(Self {
            storage_account_name: config.get("STORAGE_ACCOUNT_NAME", "").await,
            source_container: config.get("SOURCE_CONTAINER", "documents").await,
            jobs_log_container: config.get("JOBS_LOG_CONTAINER", "jobs").await,
            blob_prefix: config.get("BLOB_PREFIX", "").await,
            nl2sql_container: config.get("NL2SQL_STORAGE_CONTAINER", "nl2sql").await,
            search_endpoint: config.get("SEARCH_SERVICE_QUERY_ENDPOINT", "").await,
            search_index_name: config.get("SEARCH_RAG_INDEX_NAME", "ragindex").await,
            queries_index_name: config.get("SEARCH_QUERIES_INDEX_NAME", "nl2sql-queries").await,
            tables_index_name: config.get("SEARCH_TABLES_INDEX_NAME", "nl2sql-tables").await,
            measures_index_name: config.get("SEARCH_MEASURES_INDEX_NAME", "nl2sql-measures").await,
            max_concurrency: config.get_i64("INDEXER_MAX_CONCURRENCY", 8).await? as usize,
            batch_size: config.get_i64("INDEXER_BATCH_SIZE", 500).await? as usize,
            aoai_max_concurrency: config.get_i64("AOAI_MAX_CONCURRENCY", 2).await? as usize,
            aoai_backoff_max: secs(config.get_i64("AOAI_BACKOFF_MAX_SECONDS", 60).await?),
            aoai_max_attempts: config
                .get_i64("AOAI_MAX_TRANSIENT_ATTEMPTS", 8)
                .await?
                .max(config.get_i64("AOAI_MAX_RATE_LIMIT_ATTEMPTS", 8).await?)
                as usize,
            item_timeout: secs(config.get_i64("INDEXER_ITEM_TIMEOUT_SECONDS", 600).await?),
            http_total_timeout: secs(config.get_i64("HTTP_TOTAL_TIMEOUT_SECONDS", 120).await?),
            blob_op_timeout: secs(config.get_i64("BLOB_OP_TIMEOUT_SECONDS", 20).await?),
            list_gather_timeout: secs(config.get_i64("LIST_GATHER_TIMEOUT_SECONDS", 7200).await?),
            run_summary_total_timeout: secs(
                config.get_i64("RUN_SUMMARY_TOTAL_TIMEOUT_SECONDS", 90).await?,
            ),
            multimodal: config.get_bool("MULTIMODAL", false).await,
            images_container: config
                .get("STORAGE_CONTAINER_IMAGES", "documents-images")
                .await,
            min_figure_area_pct: config.get_f64("MINIMUM_FIGURE_AREA_PERCENTAGE", 4.0).await?,
            chunker_params,
            spreadsheet_params,
            spreadsheet_options: SpreadsheetOptions {
                by_row: config.get_bool("SPREADSHEET_CHUNKING_BY_ROW", false).await,
                include_header: config
                    .get_bool("SPREADSHEET_CHUNKING_BY_ROW_INCLUDE_HEADER", false)
                    .await,
            },
            cron_blob_indexer_secs: config.get_i64("CRON_RUN_BLOB_INDEXER", 3600).await? as u64,
            cron_blob_purger_secs: config.get_i64("CRON_RUN_BLOB_PURGER", 86400).await? as u64,
            cron_nl2sql_indexer_secs: config.get_i64("CRON_RUN_NL2SQL_INDEXER", 3600).await?
                as u64,
            run_on_startup: config.get_bool("RUN_JOBS_ON_STARTUP", false).await,
        })
    }

    /// Externally-visible URL base of the object store.
    #[must_use]
    pub fn storage_url_base(&self) -> String {
        format!("https://{}.blob.core.windows.net", self.storage_account_name)
    }
}

fn secs(value: i64) -> Duration {
    Duration::from_secs(u64::try_from(value).unwrap_or(0))
}

/// Explicitly-constructed process context shared by the engines.
pub struct AppContext {
    /// Resolved settings.
    pub settings: AppSettings,

    /// Shared token estimator.
    pub estimator: TokenEstimator,

    /// Process-wide provider gate.
    pub gate: Arc<Semaphore>,

    /// Object store gateway.
    pub store: Arc<dyn ObjectStore>,

    /// Search index gateway.
    pub search: Arc<dyn SearchIndex>,

    /// Gated embedding client.
    pub embeddings: EmbeddingClient,

    /// Gated chat-completion client.
    pub chat: ChatClient,

    /// Chunker factory.
    pub chunkers: Arc<ChunkerFactory>,
}

impl AppContext {
    /// Wires the context from resolved settings and gateway implementations.
    ///
    /// # Errors
    ///
    /// Returns an error if the token encoder cannot be constructed.
    pub fn new(
        settings: AppSettings,
        store: Arc<dyn ObjectStore>,
        search: Arc<dyn SearchIndex>,
        analyzer: Arc<dyn LayoutAnalyzer>,
        embedding_provider: Arc<dyn EmbeddingProvider>,
        chat_provider: Arc<dyn ChatProvider>,
    ) -> Result<Self> {
        let estimator = TokenEstimator::new().map_err(|e| {
            crate::error::ConfigError::InvalidValue {
                key: "tokenizer".to_string(),
                value: "r50k_base".to_string(),
                reason: e.to_string(),
            }
        })?;
        let gate = Arc::new(Semaphore::new(settings.aoai_max_concurrency.max(1)));
        let provider_policy = crate::retry::RetryPolicy {
            max_attempts: settings.aoai_max_attempts.max(1),
            cap: settings.aoai_backoff_max,
            ..crate::retry::RetryPolicy::embedding()
        };
        let embeddings =
            EmbeddingClient::new(embedding_provider, Arc::clone(&gate), estimator.clone())
                .with_policy(provider_policy);
        let chat = ChatClient::new(chat_provider, Arc::clone(&gate), estimator.clone())
            .with_policy(provider_policy);

        let chunkers = Arc::new(
            ChunkerFactory::new(
                settings.chunker_params,
                estimator.clone(),
                analyzer,
                Arc::clone(&store),
                chat.clone(),
                embeddings.clone(),
            )
            .with_multimodal(settings.multimodal)
            .with_multimodal_options(MultimodalOptions {
                images_container: settings.images_container.clone(),
                min_figure_area_pct: settings.min_figure_area_pct,
            })
            .with_spreadsheet(settings.spreadsheet_params, settings.spreadsheet_options),
        );

        Ok(Self {
            settings,
            estimator,
            gate,
            store,
            search,
            embeddings,
            chat,
            chunkers,
        })
    }

    fn logger(&self, engine: &str) -> Arc<RunLogger> {
        Arc::new(RunLogger::new(
            Arc::clone(&self.store),
            &self.settings.jobs_log_container,
            engine,
            self.settings.blob_op_timeout,
            self.settings.run_summary_total_timeout,
        ))
    }

    fn indexer_config(&self, name: &str) -> IndexerConfig {
        let mut config = IndexerConfig::named(name);
        config.max_concurrency = self.settings.max_concurrency;
        config.batch_size = self.settings.batch_size;
        config.item_timeout = self.settings.item_timeout;
        config.list_gather_timeout = self.settings.list_gather_timeout;
        config
    }

    fn blob_connector(&self) -> Arc<BlobConnector> {
        Arc::new(BlobConnector::new(
            Arc::clone(&self.store),
            &self.settings.source_container,
            &self.settings.blob_prefix,
            &self.settings.storage_url_base(),
        ))
    }

    fn nl2sql_connector(&self) -> Arc<Nl2sqlConnector> {
        Arc::new(Nl2sqlConnector::new(
            Arc::clone(&self.store),
            &self.settings.nl2sql_container,
            &self.settings.storage_url_base(),
        ))
    }

    /// Builds the blob storage indexer engine.
    #[must_use]
    pub fn blob_indexer(&self) -> IndexerEngine {
        IndexerEngine::new(
            self.blob_connector(),
            Arc::clone(&self.search),
            self.embeddings.clone(),
            Arc::clone(&self.chunkers),
            self.logger("blob-storage-indexer"),
            self.indexer_config("blob-storage-indexer"),
        )
    }

    /// Builds the NL2SQL indexer engine.
    #[must_use]
    pub fn nl2sql_indexer(&self) -> IndexerEngine {
        IndexerEngine::new(
            self.nl2sql_connector(),
            Arc::clone(&self.search),
            self.embeddings.clone(),
            Arc::clone(&self.chunkers),
            self.logger("nl2sql-indexer"),
            self.indexer_config("nl2sql-indexer"),
        )
    }

    /// Builds an NL2SQL indexer targeting a specific per-kind index
    /// gateway (`SEARCH_QUERIES_INDEX_NAME` and siblings).
    #[must_use]
    pub fn nl2sql_indexer_for(&self, search: Arc<dyn SearchIndex>) -> IndexerEngine {
        IndexerEngine::new(
            self.nl2sql_connector(),
            search,
            self.embeddings.clone(),
            Arc::clone(&self.chunkers),
            self.logger("nl2sql-indexer"),
            self.indexer_config("nl2sql-indexer"),
        )
    }

    /// Builds a SharePoint indexer over a Graph API adapter.
    #[must_use]
    pub fn sharepoint_indexer(&self, connector: Arc<SharePointConnector>) -> IndexerEngine {
        IndexerEngine::new(
            connector,
            Arc::clone(&self.search),
            self.embeddings.clone(),
            Arc::clone(&self.chunkers),
            self.logger("sharepoint-indexer"),
            self.indexer_config("sharepoint-indexer"),
        )
    }

    /// Builds the blob storage purger engine.
    #[must_use]
    pub fn blob_purger(&self) -> PurgerEngine {
        PurgerEngine::new(
            self.blob_connector(),
            Arc::clone(&self.search),
            self.logger("blob-storage-purger"),
            "blob-storage-purger",
            self.settings.batch_size,
        )
    }

    /// Builds the NL2SQL purger engine.
    #[must_use]
    pub fn nl2sql_purger(&self) -> PurgerEngine {
        PurgerEngine::new(
            self.nl2sql_connector(),
            Arc::clone(&self.search),
            self.logger("nl2sql-purger"),
            "nl2sql-purger",
            self.settings.batch_size,
        )
    }
}

impl std::fmt::Debug for AppContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppContext")
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}
