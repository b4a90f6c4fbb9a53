//! Multimodal chunker.
//!
//! Extends the doc-analysis flow with figure handling: `<figure>` blocks in
//! the analyzed content become `<figureID>` markers before splitting; after
//! splitting, each referenced figure is area-gated, uploaded to the images
//! container, captioned by the chat provider, and attached to its chunk
//! with a caption embedding.

use std::sync::Arc;

use async_trait::async_trait;
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use bytes::Bytes;
use tracing::{error, info, warn};

use crate::core::Chunk;
use crate::embedding::{ChatClient, EmbeddingClient};
use crate::error::Result;
use crate::layout::{AnalyzeResult, Figure, LayoutAnalyzer, figure_area_percentage};
use crate::storage::ObjectStore;
use crate::tokens::TokenEstimator;

use super::doc_analysis::{DocAnalysisChunker, chunker_regex};
use super::traits::{Chunker, ChunkerInput, ChunkerParams};

/// Prompt for figure captions.
const CAPTION_PROMPT: &str = "Generate a detailed description of the following figure, \
                              including its key elements and context, to optimize it for \
                              retrieval purposes. Use no more than 200 words.";

/// Max completion tokens for captions.
const CAPTION_MAX_TOKENS: u32 = 800;

/// Default images container (`STORAGE_CONTAINER_IMAGES`).
pub const DEFAULT_IMAGES_CONTAINER: &str = "documents-images";

/// Default minimum figure area percentage
/// (`MINIMUM_FIGURE_AREA_PERCENTAGE`).
pub const DEFAULT_MIN_FIGURE_AREA_PCT: f64 = 4.0;

/// Figure-handling settings.
#[derive(Debug, Clone)]
pub struct MultimodalOptions {
    /// Container receiving extracted figure images.
    pub images_container: String,

    /// Figures covering less than this percentage of page area are skipped.
    pub min_figure_area_pct: f64,
}

impl Default for MultimodalOptions {
    fn default() -> Self {
        Self {
            images_container: DEFAULT_IMAGES_CONTAINER.to_string(),
            min_figure_area_pct: DEFAULT_MIN_FIGURE_AREA_PCT,
        }
    }
}

/// Chunker handling documents with text and figures.
pub struct MultimodalChunker {
    inner: DocAnalysisChunker,
    analyzer: Arc<dyn LayoutAnalyzer>,
    store: Arc<dyn ObjectStore>,
    chat: ChatClient,
    embeddings: EmbeddingClient,
    options: MultimodalOptions,
}

impl MultimodalChunker {
    /// Creates a multimodal chunker.
    #[must_use]
    pub fn new(
        params: ChunkerParams,
        estimator: TokenEstimator,
        analyzer: Arc<dyn LayoutAnalyzer>,
        store: Arc<dyn ObjectStore>,
        chat: ChatClient,
        embeddings: EmbeddingClient,
        options: MultimodalOptions,
    ) -> Self {
        Self {
            inner: DocAnalysisChunker::new(params, estimator, Arc::clone(&analyzer)),
            analyzer,
            store,
            chat,
            embeddings,
            options,
        }
    }

    /// Replaces `<figure>...</figure>` blocks with `<figureID>` markers in
    /// document order, one per analyzer-reported figure.
    pub(super) fn tag_figures(content: &str, figures: &[Figure]) -> String {
        let mut out = content.to_string();
        for figure in figures {
            let Some(start) = out.find("<figure>") else {
                break;
            };
            let Some(end) = out[start..].find("</figure>") else {
                break;
            };
            let end = start + end + "</figure>".len();
            out.replace_range(start..end, &format!("<figure{}>", figure.id));
        }
        out
    }

    /// Processes the figures referenced by one chunk.
    async fn attach_figures(
        &self,
        input: &ChunkerInput,
        analysis: &AnalyzeResult,
        chunk: &mut Chunk,
    ) -> Result<()> {
        let marker_re = chunker_regex(r"<figure(\d+(?:\.\d+)*)>")?;
        let refs: Vec<String> = marker_re
            .captures_iter(&chunk.content)
            .filter_map(|c| c.get(1).map(|m| m.as_str().to_string()))
            .collect();
        if refs.is_empty() {
            return Ok(());
        }

        let mut content = chunk.content.clone();
        let mut urls = Vec::new();
        let mut descriptions = Vec::new();

        for figure_id in refs {
            let marker = format!("<figure{figure_id}>");
            let Some(figure) = analysis.figures.iter().find(|f| f.id == figure_id) else {
                warn!(
                    "[multimodal_chunker][{}] figure {figure_id} not present in analysis",
                    input.filename
                );
                content = content.replace(&marker, "");
                continue;
            };

            let area_pct = figure_area_percentage(figure, &analysis.pages);
            if area_pct <= self.options.min_figure_area_pct {
                warn!(
                    "[multimodal_chunker][{}] figure {figure_id} area {area_pct:.2}% below threshold; skipping",
                    input.filename
                );
                content = content.replace(&marker, "");
                continue;
            }

            match self.process_figure(input, &figure_id).await {
                Ok((url, blob_name, caption)) => {
                    descriptions.push(format!("[{blob_name}]: {caption}"));
                    urls.push(url);
                    content = content.replace(&marker, &format!("<figure>{blob_name}</figure>"));
                }
                Err(err) => {
                    error!(
                        "[multimodal_chunker][{}] error processing figure {figure_id}: {err}",
                        input.filename
                    );
                    content = content.replace(&marker, "");
                }
            }
        }

        chunk.content = content;
        if urls.is_empty() && descriptions.is_empty() {
            return Ok(());
        }

        let combined_caption = descriptions.join("\n");
        let caption_vector = self.embeddings.embed(&combined_caption).await?;

        chunk.related_images.extend(urls);
        if !chunk.image_captions.is_empty() {
            chunk.image_captions.push('\n');
        }
        chunk.image_captions.push_str(&combined_caption);
        chunk.caption_vector = Some(caption_vector);
        info!(
            "[multimodal_chunker][{}] attached {} figure(s) to chunk {}",
            input.filename,
            chunk.related_images.len(),
            chunk.chunk_id
        );
        Ok(())
    }

    /// Fetches, uploads, and captions one figure.
    async fn process_figure(
        &self,
        input: &ChunkerInput,
        figure_id: &str,
    ) -> Result<(String, String, String)> {
        let image = self.analyzer.figure_image(figure_id).await?;
        let blob_name = format!("{}-figure-{figure_id}.png", input.filename);
        self.store
            .upload(
                &self.options.images_container,
                &blob_name,
                Bytes::from(image.to_vec()),
                "image/png",
            )
            .await?;
        let url = format!("{}/{blob_name}", self.options.images_container);

        let caption = self
            .chat
            .complete(
                CAPTION_PROMPT,
                Some(&BASE64.encode(image.as_ref())),
                CAPTION_MAX_TOKENS,
            )
            .await
            .unwrap_or_else(|err| {
                error!(
                    "[multimodal_chunker][{}] caption generation failed for {figure_id}: {err}",
                    input.filename
                );
                "No caption available.".to_string()
            });
        Ok((url, blob_name, caption))
    }
}

#[async_trait]
impl Chunker for MultimodalChunker {
    async fn get_chunks(&self, input: &ChunkerInput) -> Result<Vec<Chunk>> {
        self.inner.check_supported(input)?;
        if input.is_empty() {
            return Ok(Vec::new());
        }
        info!("[multimodal_chunker][{}] running get_chunks", input.filename);

        let analysis = self.inner.analyze_with_retry(input).await?;
        let mut content = DocAnalysisChunker::content_with_tables(&analysis);
        if !analysis.figures.is_empty() {
            content = Self::tag_figures(&content, &analysis.figures);
        }

        let mut chunks = self
            .inner
            .assemble_chunks(input, &content, analysis.content_format)?;
        for chunk in &mut chunks {
            self.attach_figures(input, &analysis, chunk).await?;
        }
        Ok(chunks)
    }

    fn name(&self) -> &'static str {
        "multimodal"
    }
}
