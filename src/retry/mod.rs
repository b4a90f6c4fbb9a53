//! Generic bounded-retry driver.
//!
//! One pure policy value plus one async driver serve every gateway: the
//! search index uses exponential back-off without jitter (1s doubling to a
//! 30s cap, 8 attempts), the embedding client uses full jitter with a 60s
//! cap. Rate-limit waits requested by the upstream (`retry-after-ms` /
//! `Retry-After`) always take precedence over the computed delay.

use std::time::Duration;

use rand::Rng;
use tracing::warn;

use crate::error::Recoverable;

/// Retry policy consumed by [`with_retry`].
///
/// A plain data structure so policies can live in configuration and tests
/// can assert on computed delays without driving the clock.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    /// Maximum number of attempts (including the first).
    pub max_attempts: usize,
    /// Delay before the second attempt.
    pub base_delay: Duration,
    /// Upper bound for any computed delay.
    pub cap: Duration,
    /// Apply full jitter (uniform in `[0, delay]`) to computed delays.
    pub jitter: bool,
    /// Honor upstream-provided retry-after waits.
    pub honor_retry_after: bool,
}

impl RetryPolicy {
    /// Policy used for search index and object store calls:
    /// 1s doubling to 30s, 8 attempts, no jitter.
    #[must_use]
    pub const fn search() -> Self {
        Self {
            max_attempts: 8,
            base_delay: Duration::from_secs(1),
            cap: Duration::from_secs(30),
            jitter: false,
            honor_retry_after: true,
        }
    }

    /// Policy used for the embedding and chat-completion providers:
    /// full jitter, 60s cap, 8 attempts.
    #[must_use]
    pub const fn embedding() -> Self {
        Self {
            max_attempts: 8,
            base_delay: Duration::from_secs(1),
            cap: Duration::from_secs(60),
            jitter: true,
            honor_retry_after: true,
        }
    }

    /// Exponential delay for a zero-based retry index, before jitter.
    #[must_use]
    pub fn delay_for(&self, retry_index: u32) -> Duration {
        let factor = 2u32.saturating_pow(retry_index);
        self.base_delay.saturating_mul(factor).min(self.cap)
    }

    /// Applies full jitter when enabled.
    fn jittered(&self, delay: Duration) -> Duration {
        if !self.jitter || delay.is_zero() {
            return delay;
        }
        let millis = delay.as_millis().min(u128::from(u64::MAX)) as u64;
        Duration::from_millis(rand::thread_rng().gen_range(0..=millis))
    }
}

/// Runs `op` until it succeeds, fails non-retriably, or the policy's attempt
/// budget is exhausted.
///
/// `context` labels the operation in back-off warnings. The last error is
/// returned verbatim when attempts run out, so the caller keeps its typed
/// error.
///
/// # Errors
///
/// Returns the first non-retriable error, or the final error after
/// `max_attempts` retriable failures.
pub async fn with_retry<T, E, F, Fut>(
    policy: &RetryPolicy,
    context: &str,
    mut op: F,
) -> Result<T, E>
where
    E: Recoverable + std::fmt::Display,
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let mut last_err: Option<E> = None;
    for attempt in 0..policy.max_attempts {
        match op().await {
            Ok(value) => return Ok(value),
            Err(err) => {
                if !err.is_retriable() || attempt + 1 == policy.max_attempts {
                    if err.is_retriable() {
                        warn!("[retry][{context}] attempts exhausted after {}: {err}", attempt + 1);
                    }
                    return Err(err);
                }
                #[allow(clippy::cast_possible_truncation)]
                let computed = policy.delay_for(attempt as u32);
                let delay = match err.retry_after() {
                    // Upstream-requested waits are honored in full.
                    Some(ra) if policy.honor_retry_after => ra.max(computed),
                    _ => policy.jittered(computed),
                };
                warn!(
                    "[retry][{context}] attempt {}/{} failed: {err}; backing off {:.1}s",
                    attempt + 1,
                    policy.max_attempts,
                    delay.as_secs_f64()
                );
                last_err = Some(err);
                tokio::time::sleep(delay).await;
            }
        }
    }
    // A zero-attempt policy never enters the loop; run the operation once.
    match last_err {
        Some(err) => Err(err),
        None => op().await,
    }
}
