//! Chunker trait and input definitions.
//!
//! Defines the interface shared by all chunking strategies and the input
//! record handed to them by the indexer engine.

use async_trait::async_trait;
use bytes::Bytes;

use crate::core::Chunk;
use crate::error::{ChunkingError, Result};

/// Document payload handed to a chunker.
///
/// Carries both raw bytes and, when the source already had it, the decoded
/// text, so chunkers never have to guess which form they were given.
#[derive(Debug, Clone, Default)]
pub struct ChunkerInput {
    /// Display filename (drives extension dispatch and titles).
    pub filename: String,

    /// Source URL, propagated onto chunks.
    pub url: String,

    /// Content type reported by the source.
    pub content_type: String,

    /// Raw document bytes.
    pub bytes: Bytes,

    /// Pre-decoded text, when available.
    pub text: Option<String>,
}

impl ChunkerInput {
    /// Creates an input from raw bytes.
    #[must_use]
    pub fn from_bytes(filename: &str, url: &str, content_type: &str, bytes: Bytes) -> Self {
        Self {
            filename: filename.to_string(),
            url: url.to_string(),
            content_type: content_type.to_string(),
            bytes,
            text: None,
        }
    }

    /// Creates an input from already-decoded text.
    #[must_use]
    pub fn from_text(filename: &str, url: &str, content_type: &str, text: &str) -> Self {
        Self {
            filename: filename.to_string(),
            url: url.to_string(),
            content_type: content_type.to_string(),
            bytes: Bytes::from(text.as_bytes().to_vec()),
            text: Some(text.to_string()),
        }
    }

    /// Lowercased file extension, empty when absent.
    #[must_use]
    pub fn extension(&self) -> String {
        self.filename
            .rsplit_once('.')
            .map(|(_, ext)| ext.to_lowercase())
            .unwrap_or_default()
    }

    /// Document text: the pre-decoded form when present, otherwise the
    /// bytes decoded as UTF-8.
    ///
    /// # Errors
    ///
    /// Returns [`ChunkingError::InvalidUtf8`] when the bytes are not text.
    pub fn text_utf8(&self) -> Result<String> {
        if let Some(text) = &self.text {
            return Ok(text.clone());
        }
        Ok(std::str::from_utf8(&self.bytes)
            .map_err(ChunkingError::from)?
            .to_string())
    }

    /// Whether the payload is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty() && self.text.as_deref().is_none_or(str::is_empty)
    }
}

/// Trait for decomposing a document into bounded-token chunks.
///
/// Implementations must be `Send + Sync`; chunk IDs must be dense starting
/// at 0, and a chunker given empty input returns an empty sequence rather
/// than an error.
#[async_trait]
pub trait Chunker: Send + Sync {
    /// Splits the document into chunks.
    ///
    /// # Errors
    ///
    /// Returns an error when the content cannot be parsed or an upstream
    /// analysis/completion call fails.
    async fn get_chunks(&self, input: &ChunkerInput) -> Result<Vec<Chunk>>;

    /// Name of the chunking strategy.
    fn name(&self) -> &'static str;
}

/// Parameters captured by chunkers at construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkerParams {
    /// Token budget per chunk (`NUM_TOKENS`).
    pub max_chunk_size: usize,

    /// Overlap between consecutive chunks in tokens (`TOKEN_OVERLAP`).
    pub token_overlap: usize,

    /// Minimum tokens for a chunk to be kept (`MIN_CHUNK_SIZE`).
    pub min_chunk_size: usize,
}

impl Default for ChunkerParams {
    fn default() -> Self {
        Self {
            max_chunk_size: super::DEFAULT_MAX_CHUNK_TOKENS,
            token_overlap: super::DEFAULT_TOKEN_OVERLAP,
            min_chunk_size: super::DEFAULT_MIN_CHUNK_TOKENS,
        }
    }
}

impl ChunkerParams {
    /// Validates the parameter combination.
    ///
    /// # Errors
    ///
    /// Returns [`ChunkingError::InvalidConfig`] for a zero budget and
    /// [`ChunkingError::OverlapTooLarge`] when overlap reaches the budget.
    pub fn validate(&self) -> Result<()> {
        if self.max_chunk_size == 0 {
            return Err(ChunkingError::InvalidConfig {
                reason: "max_chunk_size must be > 0".to_string(),
            }
            .into());
        }
        if self.token_overlap >= self.max_chunk_size {
            return Err(ChunkingError::OverlapTooLarge {
                overlap: self.token_overlap,
                size: self.max_chunk_size,
            }
            .into());
        }
        Ok(())
    }
}
