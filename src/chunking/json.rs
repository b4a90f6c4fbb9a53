//! JSON structure chunker.
//!
//! Recursively partitions a parsed JSON value so every partition, pretty
//! printed, fits the token budget. Lists accumulate items greedily; objects
//! accumulate key/value pairs; an oversized single container is recursed
//! into, and oversized scalars are emitted as-is.

use async_trait::async_trait;
use serde_json::Value;
use tracing::{info, warn};

use crate::core::{Chunk, ChunkBuilder, title_from_filename};
use crate::error::{ChunkingError, Result};
use crate::tokens::TokenEstimator;

use super::traits::{Chunker, ChunkerInput, ChunkerParams};

/// Chunker for well-formed JSON documents.
pub struct JsonChunker {
    params: ChunkerParams,
    estimator: TokenEstimator,
}

impl JsonChunker {
    /// Creates a JSON chunker with the given parameters.
    #[must_use]
    pub const fn new(params: ChunkerParams, estimator: TokenEstimator) -> Self {
        Self { params, estimator }
    }

    fn tokens_of(&self, value: &Value) -> usize {
        self.estimator.estimate(&pretty(value))
    }

    /// Recursively partitions a value into budget-fitting pieces.
    fn partition(&self, value: &Value) -> Vec<Value> {
        match value {
            Value::Array(items) => self.partition_array(items),
            Value::Object(map) => self.partition_object(map),
            scalar => vec![scalar.clone()],
        }
    }

    fn partition_array(&self, items: &[Value]) -> Vec<Value> {
        let mut partitions = Vec::new();
        let mut current: Vec<Value> = Vec::new();
        for item in items {
            let mut candidate = current.clone();
            candidate.push(item.clone());
            if self.tokens_of(&Value::Array(candidate.clone())) <= self.params.max_chunk_size {
                current = candidate;
                continue;
            }
            if !current.is_empty() {
                partitions.push(Value::Array(std::mem::take(&mut current)));
            }
            if self.tokens_of(&Value::Array(vec![item.clone()])) > self.params.max_chunk_size
                && (item.is_array() || item.is_object())
            {
                partitions.extend(self.partition(item));
            } else {
                current = vec![item.clone()];
            }
        }
        if !current.is_empty() {
            partitions.push(Value::Array(current));
        }
        partitions
    }

    fn partition_object(&self, map: &serde_json::Map<String, Value>) -> Vec<Value> {
        let mut partitions = Vec::new();
        let mut current = serde_json::Map::new();
        for (key, value) in map {
            let mut candidate = current.clone();
            candidate.insert(key.clone(), value.clone());
            if self.tokens_of(&Value::Object(candidate.clone())) <= self.params.max_chunk_size {
                current = candidate;
                continue;
            }
            if !current.is_empty() {
                partitions.push(Value::Object(std::mem::take(&mut current)));
            }
            let mut single = serde_json::Map::new();
            single.insert(key.clone(), value.clone());
            if self.tokens_of(&Value::Object(single.clone())) > self.params.max_chunk_size
                && (value.is_array() || value.is_object())
            {
                for sub in self.partition(value) {
                    let mut wrapped = serde_json::Map::new();
                    wrapped.insert(key.clone(), sub);
                    partitions.push(Value::Object(wrapped));
                }
            } else {
                current = single;
            }
        }
        if !current.is_empty() {
            partitions.push(Value::Object(current));
        }
        partitions
    }
}

fn pretty(value: &Value) -> String {
    serde_json::to_string_pretty(value).unwrap_or_default()
}

#[async_trait]
impl Chunker for JsonChunker {
    async fn get_chunks(&self, input: &ChunkerInput) -> Result<Vec<Chunk>> {
        self.params.validate()?;
        if input.is_empty() {
            return Ok(Vec::new());
        }
        let text = input.text_utf8()?;
        let parsed: Value = serde_json::from_str(&text).map_err(ChunkingError::from)?;

        let title = title_from_filename(&input.filename);
        let mut chunks = Vec::new();
        let mut chunk_id = 0u32;
        for part in self.partition(&parsed) {
            let content = pretty(&part);
            let tokens = self.estimator.estimate(&content);
            if tokens < self.params.min_chunk_size {
                continue;
            }
            if tokens > self.params.max_chunk_size {
                warn!(
                    "[json_chunker][{}] partition still exceeds budget ({tokens} > {}); a single element is very large",
                    input.filename, self.params.max_chunk_size
                );
            }
            chunks.push(
                ChunkBuilder::new(chunk_id, content)
                    .title(title.clone())
                    .filepath(input.filename.clone())
                    .url(input.url.clone())
                    .build(),
            );
            chunk_id += 1;
        }

        info!(
            "[json_chunker][{}] {} chunk(s) created",
            input.filename,
            chunks.len()
        );
        Ok(chunks)
    }

    fn name(&self) -> &'static str {
        "json"
    }
}
