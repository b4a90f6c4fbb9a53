//! Generic text chunker.
//!
//! Handles everything without a specialized chunker: markdown, code, and
//! prose. Picks the splitter by subtype, drops fragments under the minimum
//! size, and truncates anything still over budget after splitting.

use async_trait::async_trait;
use tracing::{info, warn};

use crate::core::{Chunk, ChunkBuilder, title_from_filename};
use crate::error::Result;
use crate::tokens::TokenEstimator;

use super::splitter::RecursiveTokenSplitter;
use super::traits::{Chunker, ChunkerInput, ChunkerParams};

/// Splitter subtypes recognized by extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Subtype {
    Markdown,
    Python,
    Prose,
}

fn subtype_for(extension: &str) -> Subtype {
    match extension {
        "md" | "markdown" => Subtype::Markdown,
        "py" => Subtype::Python,
        _ => Subtype::Prose,
    }
}

/// Chunker for plain text, markdown, and code.
pub struct TextChunker {
    params: ChunkerParams,
    estimator: TokenEstimator,
}

impl TextChunker {
    /// Creates a text chunker with the given parameters.
    #[must_use]
    pub const fn new(params: ChunkerParams, estimator: TokenEstimator) -> Self {
        Self { params, estimator }
    }

    fn splitter_for(&self, subtype: Subtype) -> RecursiveTokenSplitter {
        let estimator = self.estimator.clone();
        let size = self.params.max_chunk_size;
        let overlap = self.params.token_overlap;
        match subtype {
            Subtype::Markdown => RecursiveTokenSplitter::markdown(estimator, size, overlap),
            Subtype::Python => RecursiveTokenSplitter::python(estimator, size, overlap),
            Subtype::Prose => RecursiveTokenSplitter::prose(estimator, size, overlap),
        }
    }
}

#[async_trait]
impl Chunker for TextChunker {
    async fn get_chunks(&self, input: &ChunkerInput) -> Result<Vec<Chunk>> {
        self.params.validate()?;
        if input.is_empty() {
            return Ok(Vec::new());
        }
        let text = input.text_utf8()?;
        let subtype = subtype_for(&input.extension());
        let splitter = self.splitter_for(subtype);

        let title = title_from_filename(&input.filename);
        let mut chunks = Vec::new();
        let mut chunk_id = 0u32;
        let mut skipped = 0usize;
        let mut offset = 0u32;

        for piece in splitter.split(&text) {
            let tokens = self.estimator.estimate(&piece);
            #[allow(clippy::cast_possible_truncation)]
            let piece_chars = piece.chars().count() as u32;
            if tokens < self.params.min_chunk_size {
                skipped += 1;
                offset += piece_chars;
                continue;
            }
            let content = if tokens > self.params.max_chunk_size {
                warn!(
                    "[text_chunker][{}] truncating {tokens} token chunk to fit {}",
                    input.filename, self.params.max_chunk_size
                );
                self.estimator
                    .truncate_to_tokens(&piece, self.params.max_chunk_size)
            } else {
                piece
            };
            chunks.push(
                ChunkBuilder::new(chunk_id, content)
                    .title(title.clone())
                    .filepath(input.filename.clone())
                    .url(input.url.clone())
                    .offset(offset)
                    .build(),
            );
            chunk_id += 1;
            offset += piece_chars;
        }

        info!(
            "[text_chunker][{}] {} chunk(s) created",
            input.filename,
            chunks.len()
        );
        if skipped > 0 {
            info!("[text_chunker][{}] {skipped} chunk(s) skipped", input.filename);
        }
        Ok(chunks)
    }

    fn name(&self) -> &'static str {
        "text"
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use bytes::Bytes;

    fn chunker(max: usize, min: usize, overlap: usize) -> TextChunker {
        TextChunker::new(
            ChunkerParams {
                max_chunk_size: max,
                token_overlap: overlap,
                min_chunk_size: min,
            },
            TokenEstimator::new().unwrap(),
        )
    }

    #[tokio::test]
    async fn test_empty_input_yields_no_chunks() {
        let input = ChunkerInput::from_bytes("a.txt", "u", "text/plain", Bytes::new());
        let chunks = chunker(100, 1, 10).get_chunks(&input).await.unwrap();
        assert!(chunks.is_empty());
    }

    #[tokio::test]
    async fn test_single_chunk_document() {
        let input = ChunkerInput::from_text("notes.txt", "u", "text/plain", "A few words here.");
        let chunks = chunker(100, 1, 10).get_chunks(&input).await.unwrap();
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].chunk_id, 0);
        assert_eq!(chunks[0].title, "Notes");
        assert_eq!(chunks[0].filepath, "notes.txt");
    }

    #[tokio::test]
    async fn test_chunk_ids_dense_from_zero() {
        let text = "A complete sentence with several words inside. ".repeat(40);
        let input = ChunkerInput::from_text("long.txt", "u", "text/plain", &text);
        let chunks = chunker(50, 1, 5).get_chunks(&input).await.unwrap();
        assert!(chunks.len() > 1);
        for (i, chunk) in chunks.iter().enumerate() {
            assert_eq!(chunk.chunk_id as usize, i);
        }
    }

    #[tokio::test]
    async fn test_min_chunk_size_filters_fragments() {
        let input = ChunkerInput::from_text("a.txt", "u", "text/plain", "tiny");
        let chunks = chunker(100, 50, 10).get_chunks(&input).await.unwrap();
        assert!(chunks.is_empty());
    }

    #[tokio::test]
    async fn test_markdown_subtype_splits_headers() {
        let text = format!(
            "# One\n{}\n## Two\n{}",
            "alpha beta gamma delta. ".repeat(30),
            "epsilon zeta eta theta. ".repeat(30)
        );
        let input = ChunkerInput::from_text("doc.md", "u", "text/markdown", &text);
        let chunks = chunker(60, 1, 5).get_chunks(&input).await.unwrap();
        assert!(chunks.len() > 1);
    }

    #[tokio::test]
    async fn test_budget_enforced() {
        let est = TokenEstimator::new().unwrap();
        let text = "many words flowing onward without any stop ".repeat(80);
        let input = ChunkerInput::from_text("a.txt", "u", "text/plain", &text);
        let chunks = chunker(40, 1, 5).get_chunks(&input).await.unwrap();
        for chunk in &chunks {
            assert!(est.estimate(&chunk.content) <= 40);
        }
    }

    #[tokio::test]
    async fn test_invalid_params_rejected() {
        let input = ChunkerInput::from_text("a.txt", "u", "text/plain", "text");
        let bad = chunker(10, 1, 10); // overlap == max
        assert!(bad.get_chunks(&input).await.is_err());
    }

    #[test]
    fn test_subtype_dispatch() {
        assert_eq!(subtype_for("md"), Subtype::Markdown);
        assert_eq!(subtype_for("py"), Subtype::Python);
        assert_eq!(subtype_for("txt"), Subtype::Prose);
        assert_eq!(subtype_for("html"), Subtype::Prose);
    }
}
