//! Embedding and chat-completion clients.
//!
//! Providers are pluggable through [`EmbeddingProvider`] / [`ChatProvider`];
//! the clients layered on top own the cross-cutting discipline shared by all
//! providers:
//!
//! - a **process-wide semaphore** (default 2 permits) in front of the
//!   rate-limited provider, shared by embeddings and completions
//! - bounded retry honoring `retry-after` waits, with full-jitter
//!   exponential back-off capped at 60s
//! - character-wise input truncation to the provider's token window
//! - empty input short-circuits to an empty vector with no provider call

pub mod aoai;
pub mod hash;

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Semaphore;
use tracing::{debug, info};

pub use aoai::{AoaiChatProvider, AoaiEmbeddingProvider};
pub use hash::{HashEmbeddingProvider, LocalChatProvider};

use crate::error::{EmbeddingError, Result};
use crate::retry::{RetryPolicy, with_retry};
use crate::tokens::TokenEstimator;

/// Default permits on the provider semaphore (`AOAI_MAX_CONCURRENCY`).
pub const DEFAULT_PROVIDER_CONCURRENCY: usize = 2;

/// Default token window for embedding inputs.
pub const DEFAULT_EMBEDDING_INPUT_TOKENS: usize = 8192;

/// Default token window for chat prompts.
pub const DEFAULT_CHAT_INPUT_TOKENS: usize = 128_000;

/// Low-level embedding provider: one attempt, no retry or gating.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Produces a fixed-width vector for `text`.
    async fn embed_once(&self, text: &str) -> std::result::Result<Vec<f32>, EmbeddingError>;

    /// Provider name for logs.
    fn name(&self) -> &'static str;
}

/// Low-level chat-completion provider: one attempt, no retry or gating.
#[async_trait]
pub trait ChatProvider: Send + Sync {
    /// Produces a completion for `prompt`, optionally with a base64 image.
    async fn complete_once(
        &self,
        prompt: &str,
        image_base64: Option<&str>,
        max_tokens: u32,
    ) -> std::result::Result<String, EmbeddingError>;

    /// Provider name for logs.
    fn name(&self) -> &'static str;
}

/// Embedding client: semaphore gate + truncation + bounded retry.
#[derive(Clone)]
pub struct EmbeddingClient {
    provider: Arc<dyn EmbeddingProvider>,
    gate: Arc<Semaphore>,
    estimator: TokenEstimator,
    policy: RetryPolicy,
    max_input_tokens: usize,
}

impl EmbeddingClient {
    /// Creates a client over a provider, sharing the process-wide gate.
    #[must_use]
    pub fn new(
        provider: Arc<dyn EmbeddingProvider>,
        gate: Arc<Semaphore>,
        estimator: TokenEstimator,
    ) -> Self {
        Self {
            provider,
            gate,
            estimator,
            policy: RetryPolicy::embedding(),
            max_input_tokens: DEFAULT_EMBEDDING_INPUT_TOKENS,
        }
    }

    /// Overrides the retry policy (attempt counts, back-off cap).
    #[must_use]
    pub const fn with_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Overrides the provider input token window.
    #[must_use]
    pub const fn with_max_input_tokens(mut self, max_input_tokens: usize) -> Self {
        self.max_input_tokens = max_input_tokens;
        self
    }

    /// Produces an embedding vector for `text`.
    ///
    /// Empty input yields an empty vector without touching the provider.
    /// Oversized input is truncated character-wise to the provider window
    /// before the call.
    ///
    /// # Errors
    ///
    /// Returns [`EmbeddingError::Exhausted`] (wrapped) when all retry
    /// attempts are consumed, or the provider's error when non-retriable.
    pub async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        if text.is_empty() {
            return Ok(Vec::new());
        }

        let input = self.estimator.truncate_to_tokens(text, self.max_input_tokens);
        if input.len() < text.len() {
            info!(
                "[embedding] input truncated from {} to {} chars to fit {} tokens",
                text.len(),
                input.len(),
                self.max_input_tokens
            );
        }

        let _permit = self
            .gate
            .acquire()
            .await
            .map_err(|_| crate::error::Error::Cancelled)?;
        debug!("[embedding] calling {} provider", self.provider.name());

        let attempts = self.policy.max_attempts;
        let vector = with_retry(&self.policy, "embedding", || self.provider.embed_once(&input))
            .await
            .map_err(|err| match err {
                err if err_retriable(&err) => EmbeddingError::Exhausted {
                    attempts,
                    last_error: err.to_string(),
                },
                other => other,
            })?;
        Ok(vector)
    }
}

fn err_retriable(err: &EmbeddingError) -> bool {
    use crate::error::Recoverable;
    err.is_retriable()
}

impl std::fmt::Debug for EmbeddingClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EmbeddingClient")
            .field("provider", &self.provider.name())
            .field("max_input_tokens", &self.max_input_tokens)
            .finish_non_exhaustive()
    }
}

/// Chat-completion client with the same gate and retry discipline.
///
/// Used only by the multimodal chunker (figure captions), the spreadsheet
/// chunker (sheet summaries), and the transcription chunker (transcript
/// summaries).
#[derive(Clone)]
pub struct ChatClient {
    provider: Arc<dyn ChatProvider>,
    gate: Arc<Semaphore>,
    estimator: TokenEstimator,
    policy: RetryPolicy,
    max_input_tokens: usize,
}

impl ChatClient {
    /// Creates a client over a provider, sharing the process-wide gate.
    #[must_use]
    pub fn new(
        provider: Arc<dyn ChatProvider>,
        gate: Arc<Semaphore>,
        estimator: TokenEstimator,
    ) -> Self {
        Self {
            provider,
            gate,
            estimator,
            policy: RetryPolicy::embedding(),
            max_input_tokens: DEFAULT_CHAT_INPUT_TOKENS,
        }
    }

    /// Overrides the prompt token window.
    #[must_use]
    pub const fn with_max_input_tokens(mut self, max_input_tokens: usize) -> Self {
        self.max_input_tokens = max_input_tokens;
        self
    }

    /// Overrides the retry policy.
    #[must_use]
    pub const fn with_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Produces a completion for `prompt` (optionally with an image).
    ///
    /// # Errors
    ///
    /// Same classification as [`EmbeddingClient::embed`].
    pub async fn complete(
        &self,
        prompt: &str,
        image_base64: Option<&str>,
        max_tokens: u32,
    ) -> Result<String> {
        let prompt = self
            .estimator
            .truncate_to_tokens(prompt, self.max_input_tokens);

        let _permit = self
            .gate
            .acquire()
            .await
            .map_err(|_| crate::error::Error::Cancelled)?;
        debug!("[chat] calling {} provider", self.provider.name());

        let completion = with_retry(&self.policy, "chat", || {
            self.provider.complete_once(&prompt, image_base64, max_tokens)
        })
        .await?;
        Ok(completion)
    }
}

impl std::fmt::Debug for ChatClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChatClient")
            .field("provider", &self.provider.name())
            .finish_non_exhaustive()
    }
}
