//! Hash-based local embedding provider.
//!
//! Produces deterministic pseudo-embeddings from lexical content. Useful for
//! tests and offline runs where no remote provider is reachable; similarity
//! reflects word overlap, not semantics.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

use async_trait::async_trait;

use crate::error::EmbeddingError;

use super::EmbeddingProvider;

/// Default vector width for the hash provider.
pub const DEFAULT_DIMENSIONS: usize = 256;

/// Deterministic hash-based [`EmbeddingProvider`].
///
/// Word hashes drive the primary signal and character trigrams a secondary
/// one; the vector is normalized to unit length so cosine similarity works.
pub struct HashEmbeddingProvider {
    dimensions: usize,
}

impl HashEmbeddingProvider {
    /// Creates a provider with the given vector width.
    #[must_use]
    pub const fn new(dimensions: usize) -> Self {
        Self { dimensions }
    }

    fn hash_string(s: &str) -> u64 {
        let mut hasher = DefaultHasher::new();
        s.hash(&mut hasher);
        hasher.finish()
    }

    #[allow(clippy::cast_precision_loss, clippy::cast_possible_truncation)]
    fn generate(&self, text: &str) -> Vec<f32> {
        let mut embedding = vec![0.0f32; self.dimensions];

        let normalized: String = text
            .chars()
            .map(|c| {
                if c.is_alphanumeric() || c.is_whitespace() {
                    c.to_ascii_lowercase()
                } else {
                    ' '
                }
            })
            .collect();

        for word in normalized.split_whitespace() {
            let hash = Self::hash_string(word);
            let idx = (hash as usize) % self.dimensions;
            let sign = if (hash >> 32) & 1 == 0 { 1.0 } else { -1.0 };
            let magnitude = 1.0 + ((hash >> 16) & 0xFF) as f32 / 255.0;
            embedding[idx] += sign * magnitude;
        }

        let chars: Vec<char> = normalized.chars().collect();
        if chars.len() >= 3 {
            for window in chars.windows(3) {
                let trigram: String = window.iter().collect();
                let hash = Self::hash_string(&trigram);
                let idx = (hash as usize) % self.dimensions;
                let sign = if (hash >> 32) & 1 == 0 { 0.5 } else { -0.5 };
                embedding[idx] += sign;
            }
        }

        let magnitude: f32 = embedding.iter().map(|x| x * x).sum::<f32>().sqrt();
        if magnitude > 0.0 {
            for val in &mut embedding {
                *val /= magnitude;
            }
        }

        embedding
    }
}

#[async_trait]
impl EmbeddingProvider for HashEmbeddingProvider {
    async fn embed_once(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        Ok(self.generate(text))
    }

    fn name(&self) -> &'static str {
        "hash"
    }
}

/// Offline chat provider pairing with [`HashEmbeddingProvider`].
///
/// Echoes a bounded prefix of the prompt so summaries and captions remain
/// deterministic in offline and dry runs.
#[derive(Debug, Clone, Copy, Default)]
pub struct LocalChatProvider;

/// Characters of the prompt echoed back.
const LOCAL_CHAT_ECHO_CHARS: usize = 200;

#[async_trait]
impl super::ChatProvider for LocalChatProvider {
    async fn complete_once(
        &self,
        prompt: &str,
        _image_base64: Option<&str>,
        _max_tokens: u32,
    ) -> Result<String, EmbeddingError> {
        let prefix: String = prompt.chars().take(LOCAL_CHAT_ECHO_CHARS).collect();
        Ok(format!("Summary: {}", prefix.trim()))
    }

    fn name(&self) -> &'static str {
        "local-chat"
    }
}
