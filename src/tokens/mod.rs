//! Deterministic token estimation for budget decisions.
//!
//! Chunk budgets, truncation, and embedding-window checks all rely on one
//! stable count, so the estimator uses a GPT-2-style byte-pair encoding
//! (`r50k_base`) rather than a character heuristic. The encoder is built
//! once and shared; estimation is pure and performs no I/O.

use std::sync::Arc;

use tiktoken_rs::CoreBPE;

/// Shared token estimator over a GPT-2-style BPE.
///
/// Cloning is cheap; the underlying encoder is reference-counted. Construct
/// one per process (it lives in the application context) and hand clones to
/// chunkers and the embedding client.
#[derive(Clone)]
pub struct TokenEstimator {
    bpe: Arc<CoreBPE>,
}

impl TokenEstimator {
    /// Creates an estimator backed by the `r50k_base` (GPT-2 style) encoding.
    ///
    /// # Errors
    ///
    /// Returns an error if the embedded encoding tables fail to load.
    pub fn new() -> anyhow::Result<Self> {
        Ok(Self {
            bpe: Arc::new(tiktoken_rs::r50k_base()?),
        })
    }

    /// Estimates the number of tokens in `text`.
    ///
    /// Idempotent and deterministic for a given input.
    #[must_use]
    pub fn estimate(&self, text: &str) -> usize {
        self.bpe.encode_ordinary(text).len()
    }

    /// Truncates `text` character-wise until it fits `max_tokens`.
    ///
    /// Mirrors the provider-window truncation discipline: drop characters
    /// from the end one step at a time, doubling the step (capped at 100)
    /// after every 5 iterations so very oversized inputs converge quickly.
    #[must_use]
    pub fn truncate_to_tokens(&self, text: &str, max_tokens: usize) -> String {
        let mut text: String = text.to_string();
        if self.estimate(&text) <= max_tokens {
            return text;
        }
        let mut step_size = 1usize;
        let mut iteration = 0usize;
        while self.estimate(&text) > max_tokens {
            for _ in 0..step_size {
                if text.pop().is_none() {
                    return text;
                }
            }
            iteration += 1;
            if iteration.is_multiple_of(5) {
                step_size = (step_size * 2).min(100);
            }
        }
        text
    }
}

impl std::fmt::Debug for TokenEstimator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenEstimator")
            .field("encoding", &"r50k_base")
            .finish()
    }
}
