//! Command execution.
//!
//! Wires the application context from configuration and runs the requested
//! engine. Remote gateways (REST search index, OpenAI-compatible providers)
//! are used when configured; `--dry-run` or missing credentials fall back
//! to the in-memory index and the deterministic local providers so offline
//! runs still exercise the full pipeline.

use std::path::Path;
use std::sync::Arc;

use bytes::Bytes;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::app::{AppContext, AppSettings};
use crate::chunking::{ChunkerFactory, ChunkerInput, ChunkerParams};
use crate::config::{ConfigResolver, MemoryConfigStore};
use crate::embedding::{
    AoaiChatProvider, AoaiEmbeddingProvider, ChatClient, ChatProvider, EmbeddingClient,
    EmbeddingProvider, HashEmbeddingProvider, LocalChatProvider, aoai::AoaiSettings,
};
use crate::error::Result;
use crate::layout::UnsupportedAnalyzer;
use crate::scheduler::{JobSpec, Scheduler};
use crate::search::{MemorySearchIndex, RestSearchIndex, SearchIndex};
use crate::storage::{MemoryObjectStore, ObjectStore};
use crate::tokens::TokenEstimator;

use super::parser::{Cli, Commands, SourceKind};

/// Executes the parsed command and returns the text to print.
///
/// # Errors
///
/// Returns run-scoped failures; item-scoped failures are reflected in the
/// printed summary instead.
pub async fn execute(cli: &Cli) -> anyhow::Result<String> {
    match &cli.command {
        Commands::Index {
            source,
            source_dir,
            dry_run,
        } => run_index(*source, source_dir.as_deref(), *dry_run).await,
        Commands::Purge {
            source,
            source_dir,
            dry_run,
        } => run_purge(*source, source_dir.as_deref(), *dry_run).await,
        Commands::Schedule { dry_run } => run_schedule(*dry_run).await,
        Commands::Chunk {
            file,
            max_tokens,
            overlap,
            min_tokens,
        } => run_chunk(file, *max_tokens, *overlap, *min_tokens).await,
    }
}

/// Environment-backed resolver: no remote store adapter is wired into the
/// CLI, so the env override path carries all configuration.
fn resolver() -> ConfigResolver {
    ConfigResolver::with_env_override(Box::new(MemoryConfigStore::new()), true)
}

async fn build_context(
    settings: AppSettings,
    config: &ConfigResolver,
    dry_run: bool,
) -> anyhow::Result<AppContext> {
    let store: Arc<dyn ObjectStore> = Arc::new(MemoryObjectStore::new());

    let search: Arc<dyn SearchIndex> = if dry_run || settings.search_endpoint.is_empty() {
        if !dry_run {
            warn!("[cli] no search endpoint configured; using in-memory index");
        }
        Arc::new(MemorySearchIndex::new())
    } else {
        let api_key = config.get("SEARCH_API_KEY", "").await;
        Arc::new(
            RestSearchIndex::new(
                &settings.search_endpoint,
                &settings.search_index_name,
                &api_key,
                settings.http_total_timeout,
            )?
            .with_batch_size(settings.batch_size),
        )
    };

    let aoai_key = config.get("AOAI_API_KEY", "").await;
    let (embedding_provider, chat_provider): (Arc<dyn EmbeddingProvider>, Arc<dyn ChatProvider>) =
        if dry_run || aoai_key.is_empty() {
            if !dry_run {
                warn!("[cli] no AOAI credentials configured; using local providers");
            }
            (
                Arc::new(HashEmbeddingProvider::new(256)),
                Arc::new(LocalChatProvider),
            )
        } else {
            let aoai = AoaiSettings {
                api_key: aoai_key,
                base_url: {
                    let base = config.get("AOAI_BASE_URL", "").await;
                    (!base.is_empty()).then_some(base)
                },
                embedding_model: config
                    .get("AOAI_EMBEDDING_DEPLOYMENT", "text-embedding-3-large")
                    .await,
                chat_model: config.get("AOAI_CHATGPT_DEPLOYMENT", "gpt-4o").await,
            };
            (
                Arc::new(AoaiEmbeddingProvider::new(&aoai)),
                Arc::new(AoaiChatProvider::new(&aoai)),
            )
        };

    Ok(AppContext::new(
        settings,
        store,
        search,
        Arc::new(UnsupportedAnalyzer),
        embedding_provider,
        chat_provider,
    )?)
}

/// Seeds the in-memory object store from a local directory tree.
async fn seed_from_dir(store: &Arc<dyn ObjectStore>, container: &str, dir: &Path) -> Result<u64> {
    fn walk(dir: &Path, out: &mut Vec<std::path::PathBuf>) -> std::io::Result<()> {
        for entry in std::fs::read_dir(dir)? {
            let path = entry?.path();
            if path.is_dir() {
                walk(&path, out)?;
            } else {
                out.push(path);
            }
        }
        Ok(())
    }

    let mut files = Vec::new();
    walk(dir, &mut files)?;
    files.sort();

    let mut seeded = 0u64;
    for path in files {
        let name = path
            .strip_prefix(dir)
            .unwrap_or(&path)
            .to_string_lossy()
            .replace('\\', "/");
        let bytes = std::fs::read(&path)?;
        store
            .upload(container, &name, Bytes::from(bytes), "application/octet-stream")
            .await?;
        seeded += 1;
    }
    info!("[cli] seeded {seeded} file(s) from {}", dir.display());
    Ok(seeded)
}

fn source_container(settings: &AppSettings, source: SourceKind) -> String {
    match source {
        SourceKind::Blob => settings.source_container.clone(),
        SourceKind::Nl2sql => settings.nl2sql_container.clone(),
    }
}

async fn run_index(
    source: SourceKind,
    source_dir: Option<&Path>,
    dry_run: bool,
) -> anyhow::Result<String> {
    let config = resolver();
    let settings = AppSettings::load(&config).await?;
    let context = build_context(settings, &config, dry_run).await?;
    if let Some(dir) = source_dir {
        let container = source_container(&context.settings, source);
        seed_from_dir(&context.store, &container, dir).await?;
    }

    let engine = match source {
        SourceKind::Blob => context.blob_indexer(),
        SourceKind::Nl2sql => context.nl2sql_indexer(),
    };
    let cancel = CancellationToken::new();
    let summary = engine.run(&cancel).await?;
    Ok(serde_json::to_string_pretty(&summary)?)
}

async fn run_purge(
    source: SourceKind,
    source_dir: Option<&Path>,
    dry_run: bool,
) -> anyhow::Result<String> {
    let config = resolver();
    let settings = AppSettings::load(&config).await?;
    let context = build_context(settings, &config, dry_run).await?;
    if let Some(dir) = source_dir {
        let container = source_container(&context.settings, source);
        seed_from_dir(&context.store, &container, dir).await?;
    }

    let engine = match source {
        SourceKind::Blob => context.blob_purger(),
        SourceKind::Nl2sql => context.nl2sql_purger(),
    };
    let cancel = CancellationToken::new();
    let summary = engine.run(&cancel).await?;
    Ok(serde_json::to_string_pretty(&summary)?)
}

async fn run_schedule(dry_run: bool) -> anyhow::Result<String> {
    let config = resolver();
    let settings = AppSettings::load(&config).await?;
    let run_on_startup = settings.run_on_startup;
    let blob_period = std::time::Duration::from_secs(settings.cron_blob_indexer_secs);
    let blob_purge_period = std::time::Duration::from_secs(settings.cron_blob_purger_secs);
    let nl2sql_period = std::time::Duration::from_secs(settings.cron_nl2sql_indexer_secs);

    let context = Arc::new(build_context(settings, &config, dry_run).await?);
    let shutdown = CancellationToken::new();
    let mut scheduler = Scheduler::new(shutdown.clone());

    let ctx = Arc::clone(&context);
    scheduler.register(JobSpec::new(
        "blob-storage-indexer",
        blob_period,
        run_on_startup,
        move |cancel| {
            let ctx = Arc::clone(&ctx);
            async move {
                ctx.blob_indexer().run(&cancel).await?;
                Ok(())
            }
        },
    ));

    let ctx = Arc::clone(&context);
    scheduler.register(JobSpec::new(
        "blob-storage-purger",
        blob_purge_period,
        false,
        move |cancel| {
            let ctx = Arc::clone(&ctx);
            async move {
                ctx.blob_purger().run(&cancel).await?;
                Ok(())
            }
        },
    ));

    let ctx = Arc::clone(&context);
    scheduler.register(JobSpec::new(
        "nl2sql-indexer",
        nl2sql_period,
        run_on_startup,
        move |cancel| {
            let ctx = Arc::clone(&ctx);
            async move {
                ctx.nl2sql_indexer().run(&cancel).await?;
                Ok(())
            }
        },
    ));

    // Ctrl-C propagates cancellation to every running job.
    let trigger = shutdown.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("[cli] shutdown requested");
            trigger.cancel();
        }
    });

    scheduler.run().await;
    Ok("scheduler stopped".to_string())
}

async fn run_chunk(
    file: &Path,
    max_tokens: usize,
    overlap: usize,
    min_tokens: usize,
) -> anyhow::Result<String> {
    let estimator = TokenEstimator::new()?;
    let gate = Arc::new(tokio::sync::Semaphore::new(2));
    let chat = ChatClient::new(Arc::new(LocalChatProvider), Arc::clone(&gate), estimator.clone());
    let embeddings = EmbeddingClient::new(
        Arc::new(HashEmbeddingProvider::new(256)) as Arc<dyn EmbeddingProvider>,
        gate,
        estimator.clone(),
    );
    let factory = ChunkerFactory::new(
        ChunkerParams {
            max_chunk_size: max_tokens,
            token_overlap: overlap,
            min_chunk_size: min_tokens,
        },
        estimator,
        Arc::new(UnsupportedAnalyzer),
        Arc::new(MemoryObjectStore::new()),
        chat,
        embeddings,
    );

    let filename = file
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| file.display().to_string());
    let bytes = std::fs::read(file)?;
    let input = ChunkerInput::from_bytes(
        &filename,
        &format!("file://{}", file.display()),
        "application/octet-stream",
        Bytes::from(bytes),
    );

    let chunker = factory.chunker_for(&filename)?;
    let chunks = chunker.get_chunks(&input).await?;
    info!("[cli] {} produced {} chunk(s)", chunker.name(), chunks.len());
    Ok(serde_json::to_string_pretty(&chunks)?)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use std::io::Write as _;

    #[tokio::test]
    async fn test_chunk_command_on_text_file() {
        let mut file = tempfile::NamedTempFile::with_suffix(".txt").unwrap();
        writeln!(file, "Some sentence to chunk. Another sentence follows.").unwrap();
        let out = run_chunk(file.path(), 100, 10, 1).await.unwrap();
        let chunks: Vec<serde_json::Value> = serde_json::from_str(&out).unwrap();
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].get("chunk_id").and_then(serde_json::Value::as_u64), Some(0));
    }

    #[tokio::test]
    async fn test_chunk_command_missing_file_errors() {
        let missing = Path::new("/definitely/not/here.txt");
        assert!(run_chunk(missing, 100, 10, 1).await.is_err());
    }

    #[tokio::test]
    async fn test_dry_run_index_empty_source() {
        let out = run_index(SourceKind::Blob, None, true).await.unwrap();
        let summary: serde_json::Value = serde_json::from_str(&out).unwrap();
        assert_eq!(
            summary.get("status").and_then(serde_json::Value::as_str),
            Some("finished")
        );
        assert_eq!(
            summary.get("itemsDiscovered").and_then(serde_json::Value::as_u64),
            Some(0)
        );
    }

    #[tokio::test]
    async fn test_dry_run_index_with_seeded_dir() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("note.txt"), "offline pipeline content").unwrap();
        let out = run_index(SourceKind::Blob, Some(dir.path()), true)
            .await
            .unwrap();
        let summary: serde_json::Value = serde_json::from_str(&out).unwrap();
        assert_eq!(
            summary.get("indexedItems").and_then(serde_json::Value::as_u64),
            Some(1)
        );
    }

    #[tokio::test]
    async fn test_dry_run_purge_empty() {
        let out = run_purge(SourceKind::Blob, None, true).await.unwrap();
        let summary: serde_json::Value = serde_json::from_str(&out).unwrap();
        assert_eq!(
            summary.get("docsDeleted").and_then(serde_json::Value::as_u64),
            Some(0)
        );
    }
}
