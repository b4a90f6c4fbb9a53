//! Chunking strategies for the ingestion pipeline.
//!
//! This module provides a trait-based family of content-type-specific
//! chunkers selected by a factory on file extension:
//!
//! - **Doc-analysis**: layout-service-backed splitting with table and
//!   page-break handling (`pdf`, images, `docx`, `pptx`)
//! - **Multimodal**: doc-analysis plus figure extraction and captioning
//! - **Spreadsheet**: per-sheet or per-row workbook chunking
//! - **Transcription**: WebVTT transcripts with a shared summary
//! - **JSON**: recursive structure partitioning
//! - **NL2SQL**: one chunk per query/table/measure record
//! - **Text**: markdown / code / prose recursive splitting (fallback)

pub mod doc_analysis;
pub mod json;
pub mod multimodal;
pub mod nl2sql;
pub mod splitter;
pub mod spreadsheet;
pub mod tables;
pub mod text;
pub mod traits;
pub mod transcription;

use std::sync::Arc;

pub use doc_analysis::DocAnalysisChunker;
pub use json::JsonChunker;
pub use multimodal::{MultimodalChunker, MultimodalOptions};
pub use nl2sql::Nl2sqlChunker;
pub use splitter::RecursiveTokenSplitter;
pub use spreadsheet::{SpreadsheetChunker, SpreadsheetOptions};
pub use text::TextChunker;
pub use traits::{Chunker, ChunkerInput, ChunkerParams};
pub use transcription::TranscriptionChunker;

use crate::embedding::{ChatClient, EmbeddingClient};
use crate::error::{ChunkingError, Result};
use crate::layout::LayoutAnalyzer;
use crate::storage::ObjectStore;
use crate::tokens::TokenEstimator;

/// Default token budget per chunk (`NUM_TOKENS`).
pub const DEFAULT_MAX_CHUNK_TOKENS: usize = 2048;

/// Default token overlap between chunks (`TOKEN_OVERLAP`).
pub const DEFAULT_TOKEN_OVERLAP: usize = 100;

/// Default minimum chunk size in tokens (`MIN_CHUNK_SIZE`).
pub const DEFAULT_MIN_CHUNK_TOKENS: usize = 100;

/// Extensions routed to the doc-analysis / multimodal chunkers.
const ANALYZED_EXTENSIONS: &[&str] = &["pdf", "png", "jpeg", "jpg", "bmp", "tiff"];

/// Extensions that additionally require analyzer support for office formats.
const OFFICE_EXTENSIONS: &[&str] = &["docx", "pptx"];

/// Factory mapping file extensions to chunker strategies.
///
/// Holds the shared clients and parameters; chunkers are built per call and
/// capture their parameters at construction.
pub struct ChunkerFactory {
    params: ChunkerParams,
    spreadsheet_params: ChunkerParams,
    spreadsheet_options: SpreadsheetOptions,
    multimodal: bool,
    multimodal_options: MultimodalOptions,
    estimator: TokenEstimator,
    analyzer: Arc<dyn LayoutAnalyzer>,
    store: Arc<dyn ObjectStore>,
    chat: ChatClient,
    embeddings: EmbeddingClient,
}

impl ChunkerFactory {
    /// Creates a factory with default spreadsheet/multimodal settings.
    #[must_use]
    pub fn new(
        params: ChunkerParams,
        estimator: TokenEstimator,
        analyzer: Arc<dyn LayoutAnalyzer>,
        store: Arc<dyn ObjectStore>,
        chat: ChatClient,
        embeddings: EmbeddingClient,
    ) -> Self {
        Self {
            params,
            spreadsheet_params: params,
            spreadsheet_options: SpreadsheetOptions::default(),
            multimodal: false,
            multimodal_options: MultimodalOptions::default(),
            estimator,
            analyzer,
            store,
            chat,
            embeddings,
        }
    }

    /// Enables or disables the multimodal pipeline (`MULTIMODAL`).
    #[must_use]
    pub const fn with_multimodal(mut self, multimodal: bool) -> Self {
        self.multimodal = multimodal;
        self
    }

    /// Overrides multimodal figure handling settings.
    #[must_use]
    pub fn with_multimodal_options(mut self, options: MultimodalOptions) -> Self {
        self.multimodal_options = options;
        self
    }

    /// Overrides spreadsheet chunking mode and budget
    /// (`SPREADSHEET_CHUNKING_*`).
    #[must_use]
    pub const fn with_spreadsheet(
        mut self,
        params: ChunkerParams,
        options: SpreadsheetOptions,
    ) -> Self {
        self.spreadsheet_params = params;
        self.spreadsheet_options = options;
        self
    }

    /// Builds the chunker for a filename.
    ///
    /// # Errors
    ///
    /// Returns [`ChunkingError::UnsupportedFormat`] for office formats when
    /// the configured analyzer cannot process them.
    pub fn chunker_for(&self, filename: &str) -> Result<Box<dyn Chunker>> {
        let extension = filename
            .rsplit_once('.')
            .map(|(_, ext)| ext.to_lowercase())
            .unwrap_or_default();

        if extension == "vtt" {
            return Ok(Box::new(TranscriptionChunker::new(
                self.params,
                self.estimator.clone(),
                self.chat.clone(),
            )));
        }
        if extension == "xlsx" || extension == "xls" {
            return Ok(Box::new(SpreadsheetChunker::new(
                self.spreadsheet_params,
                self.spreadsheet_options,
                self.estimator.clone(),
                self.chat.clone(),
            )));
        }
        if ANALYZED_EXTENSIONS.contains(&extension.as_str()) {
            return Ok(self.analyzed_chunker());
        }
        if OFFICE_EXTENSIONS.contains(&extension.as_str()) {
            if !self
                .analyzer
                .supported_extensions()
                .contains(&extension.as_str())
            {
                return Err(ChunkingError::UnsupportedFormat { extension }.into());
            }
            return Ok(self.analyzed_chunker());
        }
        if extension == "nl2sql" {
            return Ok(Box::new(Nl2sqlChunker::new(
                self.params,
                self.estimator.clone(),
            )));
        }
        if extension == "json" {
            return Ok(Box::new(JsonChunker::new(
                self.params,
                self.estimator.clone(),
            )));
        }
        Ok(Box::new(TextChunker::new(
            self.params,
            self.estimator.clone(),
        )))
    }

    fn analyzed_chunker(&self) -> Box<dyn Chunker> {
        if self.multimodal {
            Box::new(MultimodalChunker::new(
                self.params,
                self.estimator.clone(),
                Arc::clone(&self.analyzer),
                Arc::clone(&self.store),
                self.chat.clone(),
                self.embeddings.clone(),
                self.multimodal_options.clone(),
            ))
        } else {
            Box::new(DocAnalysisChunker::new(
                self.params,
                self.estimator.clone(),
                Arc::clone(&self.analyzer),
            ))
        }
    }

    /// Comma-separated list of extensions with a dedicated chunker.
    #[must_use]
    pub fn supported_extensions() -> String {
        [
            "vtt", "xlsx", "xls", "pdf", "png", "jpeg", "jpg", "bmp", "tiff", "docx", "pptx",
            "json",
        ]
        .join(", ")
    }
}

impl std::fmt::Debug for ChunkerFactory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChunkerFactory")
            .field("params", &self.params)
            .field("multimodal", &self.multimodal)
            .finish_non_exhaustive()
    }
}
