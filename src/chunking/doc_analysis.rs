//! Doc-analysis chunker.
//!
//! Sends the document through the external layout analyzer, then splits the
//! returned content while keeping HTML tables intact:
//!
//! 1. bare `<!-- PageBreak -->` markers become numbered variants so
//!    chunk-to-page attribution survives splitting
//! 2. `<table>...</table>` substrings are swapped for placeholders, the
//!    residual text is split (markdown-aware when the analyzer emitted
//!    markdown), and the tables are restored in place
//! 3. over-budget chunks are truncated with any dropped page-break markers
//!    re-appended while the budget permits
//! 4. each chunk's page comes from the highest marker present, adjusted by
//!    the marker's position within the chunk

use std::sync::Arc;

use async_trait::async_trait;
use regex::Regex;
use tracing::{error, info};

use crate::core::{Chunk, ChunkBuilder, title_from_filename};
use crate::error::{ChunkingError, Result};
use crate::layout::{AnalyzeResult, ContentFormat, LayoutAnalyzer};
use crate::tokens::TokenEstimator;

use super::splitter::RecursiveTokenSplitter;
use super::traits::{Chunker, ChunkerInput, ChunkerParams};

/// Attempts against the layout service before giving up.
const ANALYZE_ATTEMPTS: usize = 3;

/// Chunker backed by the document layout analyzer.
pub struct DocAnalysisChunker {
    params: ChunkerParams,
    estimator: TokenEstimator,
    analyzer: Arc<dyn LayoutAnalyzer>,
}

impl DocAnalysisChunker {
    /// Creates a doc-analysis chunker.
    #[must_use]
    pub fn new(
        params: ChunkerParams,
        estimator: TokenEstimator,
        analyzer: Arc<dyn LayoutAnalyzer>,
    ) -> Self {
        Self {
            params,
            estimator,
            analyzer,
        }
    }

    /// Runs layout analysis with a small retry loop.
    pub(super) async fn analyze_with_retry(&self, input: &ChunkerInput) -> Result<AnalyzeResult> {
        let mut last_err = None;
        for attempt in 1..=ANALYZE_ATTEMPTS {
            match self.analyzer.analyze(&input.bytes, &input.content_type).await {
                Ok(result) => return Ok(result),
                Err(err) => {
                    error!(
                        "[doc_analysis_chunker][{}] analysis failed on attempt {attempt}/{ANALYZE_ATTEMPTS}: {err}",
                        input.filename
                    );
                    last_err = Some(err);
                }
            }
        }
        Err(last_err.unwrap_or_else(|| {
            ChunkingError::AnalysisFailed("layout analysis failed".to_string()).into()
        }))
    }

    /// Ensures the extension is one the analyzer accepts.
    pub(super) fn check_supported(&self, input: &ChunkerInput) -> Result<()> {
        let extension = input.extension();
        if self
            .analyzer
            .supported_extensions()
            .contains(&extension.as_str())
        {
            Ok(())
        } else {
            Err(ChunkingError::UnsupportedFormat { extension }.into())
        }
    }

    /// Content with analyzer-reported tables rendered as HTML.
    ///
    /// Markdown analyses already carry inline `<table>` HTML. Plain-text
    /// analyses report tables separately; those are merged (page-split
    /// tables rejoin into one logical table) and appended as HTML so the
    /// placeholder/restore path keeps them intact through splitting.
    pub(super) fn content_with_tables(analysis: &AnalyzeResult) -> String {
        if analysis.tables.is_empty() || analysis.content.contains("<table") {
            return analysis.content.clone();
        }
        let merged = super::tables::merge_adjacent_tables(&analysis.tables, &analysis.pages);
        let rendered: Vec<String> = merged.iter().map(super::tables::table_to_html).collect();
        let mut out = analysis.content.clone();
        for html in rendered {
            out.push_str("\n\n");
            out.push_str(&html);
        }
        out
    }

    /// Numbers every bare `<!-- PageBreak -->` marker sequentially.
    pub(super) fn number_pagebreaks(content: &str) -> String {
        let mut out = String::with_capacity(content.len());
        let mut rest = content;
        let mut n = 0u32;
        while let Some(pos) = rest.find("<!-- PageBreak -->") {
            n += 1;
            out.push_str(&rest[..pos]);
            out.push_str(&format!("<!-- PageBreak{n:05} -->"));
            rest = &rest[pos + "<!-- PageBreak -->".len()..];
        }
        out.push_str(rest);
        out
    }

    /// Splits content around HTML tables, then restores them in place.
    pub(super) fn chunk_content(
        &self,
        content: &str,
        format: ContentFormat,
    ) -> Result<Vec<String>> {
        let table_re = table_regex()?;
        let tables: Vec<String> = table_re
            .find_iter(content)
            .map(|m| m.as_str().to_string())
            .collect();
        let mut residual = content.to_string();
        for (i, table) in tables.iter().enumerate() {
            residual = residual.replacen(table.as_str(), &format!("__TABLE_{i}__"), 1);
        }

        let splitter = match format {
            ContentFormat::Markdown => RecursiveTokenSplitter::markdown(
                self.estimator.clone(),
                self.params.max_chunk_size,
                self.params.token_overlap,
            ),
            ContentFormat::Text => RecursiveTokenSplitter::prose(
                self.estimator.clone(),
                self.params.max_chunk_size,
                self.params.token_overlap,
            ),
        };

        let mut chunks = splitter.split(&residual);
        for (i, table) in tables.iter().enumerate() {
            let placeholder = format!("__TABLE_{i}__");
            for chunk in &mut chunks {
                if chunk.contains(&placeholder) {
                    *chunk = chunk.replace(&placeholder, table);
                }
            }
        }
        Ok(chunks)
    }

    /// Truncates to budget, re-appending dropped page-break markers.
    pub(super) fn truncate_chunk(&self, text: &str) -> Result<String> {
        let collapsed = text.split_whitespace().collect::<Vec<_>>().join(" ");
        let marker_re = pagebreak_regex()?;
        let markers: Vec<String> = marker_re
            .find_iter(&collapsed)
            .map(|m| m.as_str().to_string())
            .collect();

        let mut out = self
            .estimator
            .truncate_to_tokens(&collapsed, self.params.max_chunk_size);

        for marker in markers {
            if out.contains(&marker) {
                continue;
            }
            let addition = format!(" <!-- {marker} -->");
            let needed = self.estimator.estimate(&addition);
            while !out.is_empty()
                && self.estimator.estimate(&out) + needed > self.params.max_chunk_size
            {
                out.pop();
            }
            out.push_str(&addition);
        }
        Ok(out)
    }

    /// Advances the running page counter past markers in this chunk.
    pub(super) fn update_page(chunk: &str, current_page: u32, marker_re: &Regex) -> u32 {
        marker_re
            .captures_iter(chunk)
            .filter_map(|c| c.get(1).and_then(|m| m.as_str().parse::<u32>().ok()))
            .last()
            .map_or(current_page, |last| {
                if last >= current_page {
                    last + 1
                } else {
                    current_page
                }
            })
    }

    /// Page for a chunk from its first marker's position.
    ///
    /// A marker in the first half means most of the chunk sits after the
    /// break (page N+1); in the second half most of it sits before (page N).
    pub(super) fn determine_chunk_page(chunk: &str, current_page: u32, marker_re: &Regex) -> u32 {
        let Some(m) = marker_re.captures(chunk) else {
            return current_page;
        };
        let Some(number) = m.get(1).and_then(|g| g.as_str().parse::<u32>().ok()) else {
            return current_page;
        };
        let position = m.get(0).map_or(0, |g| g.start());
        #[allow(clippy::cast_precision_loss)]
        let relative = position as f64 / chunk.len().max(1) as f64;
        if relative < 0.5 { number + 1 } else { number }
    }

    /// Shared assembly: numbered pagebreaks, split, size gate, pages.
    pub(super) fn assemble_chunks(
        &self,
        input: &ChunkerInput,
        content: &str,
        format: ContentFormat,
    ) -> Result<Vec<Chunk>> {
        let content = Self::number_pagebreaks(content);
        let marker_re = pagebreak_regex()?;
        let title = title_from_filename(&input.filename);

        let mut chunks = Vec::new();
        let mut chunk_id = 0u32;
        let mut skipped = 0usize;
        let mut current_page = 1u32;

        for piece in self.chunk_content(&content, format)? {
            let tokens = self.estimator.estimate(&piece);
            let chunk_page = Self::determine_chunk_page(&piece, current_page, &marker_re);
            current_page = Self::update_page(&piece, current_page, &marker_re);

            if tokens < self.params.min_chunk_size {
                skipped += 1;
                continue;
            }
            let body = if tokens > self.params.max_chunk_size {
                info!(
                    "[doc_analysis_chunker][{}] truncating {tokens} token chunk to fit {}",
                    input.filename, self.params.max_chunk_size
                );
                self.truncate_chunk(&piece)?
            } else {
                piece
            };

            chunks.push(
                ChunkBuilder::new(chunk_id, body)
                    .title(title.clone())
                    .filepath(input.filename.clone())
                    .url(input.url.clone())
                    .page(chunk_page)
                    .build(),
            );
            chunk_id += 1;
        }

        info!(
            "[doc_analysis_chunker][{}] {} chunk(s) created",
            input.filename,
            chunks.len()
        );
        if skipped > 0 {
            info!(
                "[doc_analysis_chunker][{}] {skipped} chunk(s) skipped",
                input.filename
            );
        }
        Ok(chunks)
    }
}

pub(super) fn pagebreak_regex() -> Result<Regex> {
    chunker_regex(r"PageBreak(\d{5})")
}

pub(super) fn table_regex() -> Result<Regex> {
    chunker_regex(r"(?is)<table.*?</table>")
}

pub(super) fn chunker_regex(pattern: &str) -> Result<Regex> {
    Regex::new(pattern).map_err(|e| {
        ChunkingError::ParseFailed {
            kind: "regex".to_string(),
            reason: e.to_string(),
        }
        .into()
    })
}

#[async_trait]
impl Chunker for DocAnalysisChunker {
    async fn get_chunks(&self, input: &ChunkerInput) -> Result<Vec<Chunk>> {
        self.params.validate()?;
        self.check_supported(input)?;
        if input.is_empty() {
            return Ok(Vec::new());
        }
        info!("[doc_analysis_chunker][{}] running get_chunks", input.filename);

        let analysis = self.analyze_with_retry(input).await?;
        let content = Self::content_with_tables(&analysis);
        self.assemble_chunks(input, &content, analysis.content_format)
    }

    fn name(&self) -> &'static str {
        "doc-analysis"
    }
}
