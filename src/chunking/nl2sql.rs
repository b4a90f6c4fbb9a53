//! NL2SQL chunker.
//!
//! Source files are JSON dictionaries of `{query-id -> record}`. Each
//! top-level entry becomes one chunk: the pretty-printed record as content,
//! the record's `question` (queries) or `description` (tables, measures)
//! field as the embedding text. Records are never split further since
//! truncation would lose query semantics.

use async_trait::async_trait;
use serde_json::Value;
use tracing::{info, warn};

use crate::core::{Chunk, ChunkBuilder, title_from_filename};
use crate::error::{ChunkingError, Result};
use crate::tokens::TokenEstimator;

use super::traits::{Chunker, ChunkerInput, ChunkerParams};

/// Chunker for NL2SQL query/table/measure collections.
pub struct Nl2sqlChunker {
    params: ChunkerParams,
    estimator: TokenEstimator,
}

impl Nl2sqlChunker {
    /// Creates an NL2SQL chunker with the given parameters.
    #[must_use]
    pub const fn new(params: ChunkerParams, estimator: TokenEstimator) -> Self {
        Self { params, estimator }
    }
}

#[async_trait]
impl Chunker for Nl2sqlChunker {
    async fn get_chunks(&self, input: &ChunkerInput) -> Result<Vec<Chunk>> {
        if input.is_empty() {
            return Ok(Vec::new());
        }
        let text = input.text_utf8()?;
        let parsed: Value = serde_json::from_str(&text).map_err(ChunkingError::from)?;
        let Value::Object(entries) = parsed else {
            return Err(ChunkingError::ParseFailed {
                kind: "nl2sql".to_string(),
                reason: "expected a top-level object of records".to_string(),
            }
            .into());
        };

        let title = title_from_filename(&input.filename);
        let mut chunks = Vec::new();
        for (chunk_id, (query_id, record)) in entries.iter().enumerate() {
            let content = serde_json::to_string_pretty(record).unwrap_or_default();
            let tokens = self.estimator.estimate(&content);
            if tokens > self.params.max_chunk_size {
                // One record per chunk; splitting would lose the query, so
                // the oversized record is kept whole.
                warn!(
                    "[nl2sql_chunker][{}] record {query_id} is {tokens} tokens (max {})",
                    input.filename, self.params.max_chunk_size
                );
            }
            // queries carry a question; tables and measures a description.
            let question = record
                .get("question")
                .or_else(|| record.get("description"))
                .and_then(Value::as_str)
                .unwrap_or_default();
            #[allow(clippy::cast_possible_truncation)]
            chunks.push(
                ChunkBuilder::new(chunk_id as u32, content)
                    .embedding_text(question)
                    .title(title.clone())
                    .filepath(input.filename.clone())
                    .url(input.url.clone())
                    .build(),
            );
        }

        info!(
            "[nl2sql_chunker][{}] {} chunk(s) created",
            input.filename,
            chunks.len()
        );
        Ok(chunks)
    }

    fn name(&self) -> &'static str {
        "nl2sql"
    }
}
