//! Read-only configuration resolution.
//!
//! Values are looked up in order: process environment (only when the
//! `ALLOW_ENVIRONMENT_VARIABLES` escape hatch is set), then a remote
//! configuration store consulted with label precedence
//! (`gpt-rag-ingestion` > `gpt-rag` > unlabeled), then the caller-provided
//! default. Store access is retried with a short randomized back-off; a
//! missing required key is a fatal [`ConfigError::MissingKey`].

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use rand::Rng;
use tracing::{debug, warn};

use crate::error::{ConfigError, Result};

/// Label precedence for remote store lookups, most specific first. The empty
/// label matches unlabeled keys.
pub const LABEL_PRECEDENCE: [&str; 3] = ["gpt-rag-ingestion", "gpt-rag", ""];

/// Environment variable gating env-var overrides.
pub const ALLOW_ENV_FLAG: &str = "ALLOW_ENVIRONMENT_VARIABLES";

/// Attempts against the remote store per lookup.
const STORE_ATTEMPTS: usize = 5;

/// Cap for the randomized inter-attempt wait.
const STORE_BACKOFF_CAP: Duration = Duration::from_secs(5);

/// A remote key/value configuration store.
///
/// Implementations return `Ok(None)` when the `(key, label)` pair is absent
/// and `Err` only for store-level failures worth retrying.
#[async_trait]
pub trait ConfigStore: Send + Sync {
    /// Fetches the value for `key` under `label` ("" = unlabeled).
    async fn fetch(&self, key: &str, label: &str) -> Result<Option<String>>;
}

/// In-memory configuration store, used by tests and local runs.
#[derive(Debug, Default)]
pub struct MemoryConfigStore {
    entries: HashMap<(String, String), String>,
}

impl MemoryConfigStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts a value under the given label ("" = unlabeled).
    pub fn set(&mut self, key: &str, label: &str, value: &str) {
        self.entries
            .insert((key.to_string(), label.to_string()), value.to_string());
    }

    /// Builder-style insert for unlabeled keys.
    #[must_use]
    pub fn with(mut self, key: &str, value: &str) -> Self {
        self.set(key, "", value);
        self
    }
}

#[async_trait]
impl ConfigStore for MemoryConfigStore {
    async fn fetch(&self, key: &str, label: &str) -> Result<Option<String>> {
        Ok(self
            .entries
            .get(&(key.to_string(), label.to_string()))
            .cloned())
    }
}

/// Read-only key/value resolver with label precedence and env fallback.
pub struct ConfigResolver {
    store: Box<dyn ConfigStore>,
    allow_env: bool,
}

impl ConfigResolver {
    /// Creates a resolver over a store.
    ///
    /// Env overrides are enabled when [`ALLOW_ENV_FLAG`] is set truthy in
    /// the process environment.
    #[must_use]
    pub fn new(store: Box<dyn ConfigStore>) -> Self {
        let allow_env = std::env::var(ALLOW_ENV_FLAG)
            .map(|v| matches!(v.trim().to_lowercase().as_str(), "true" | "1" | "yes"))
            .unwrap_or(false);
        Self { store, allow_env }
    }

    /// Creates a resolver with env overrides forced on or off (tests).
    #[must_use]
    pub fn with_env_override(store: Box<dyn ConfigStore>, allow_env: bool) -> Self {
        Self { store, allow_env }
    }

    /// Resolves a key to a string, falling back to `default`.
    pub async fn get(&self, key: &str, default: &str) -> String {
        self.lookup(key)
            .await
            .unwrap_or_else(|| default.to_string())
    }

    /// Resolves a key, returning an error when absent everywhere.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::MissingKey`] when no source has the key.
    pub async fn require(&self, key: &str) -> Result<String> {
        self.lookup(key).await.ok_or_else(|| {
            ConfigError::MissingKey {
                key: key.to_string(),
            }
            .into()
        })
    }

    /// Resolves a key as an integer.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidValue`] when the resolved value does
    /// not parse.
    pub async fn get_i64(&self, key: &str, default: i64) -> Result<i64> {
        match self.lookup(key).await {
            None => Ok(default),
            Some(raw) => raw.trim().parse().map_err(|_| {
                ConfigError::InvalidValue {
                    key: key.to_string(),
                    value: raw,
                    reason: "expected integer".to_string(),
                }
                .into()
            }),
        }
    }

    /// Resolves a key as a float.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidValue`] when the resolved value does
    /// not parse.
    pub async fn get_f64(&self, key: &str, default: f64) -> Result<f64> {
        match self.lookup(key).await {
            None => Ok(default),
            Some(raw) => raw.trim().parse().map_err(|_| {
                ConfigError::InvalidValue {
                    key: key.to_string(),
                    value: raw,
                    reason: "expected float".to_string(),
                }
                .into()
            }),
        }
    }

    /// Resolves a key as a boolean (`true`/`1`/`yes`, case-insensitive).
    pub async fn get_bool(&self, key: &str, default: bool) -> bool {
        self.lookup(key).await.map_or(default, |raw| {
            matches!(raw.trim().to_lowercase().as_str(), "true" | "1" | "yes")
        })
    }

    /// Resolves a key as a comma-separated list, trimming entries.
    pub async fn get_list(&self, key: &str) -> Vec<String> {
        self.lookup(key)
            .await
            .map(|raw| {
                raw.split(',')
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(ToString::to_string)
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Single resolution pass: env (when allowed), then labeled store reads.
    async fn lookup(&self, key: &str) -> Option<String> {
        if self.allow_env
            && let Ok(value) = std::env::var(key)
        {
            debug!("[config] {key} resolved from environment");
            return Some(value);
        }

        for label in LABEL_PRECEDENCE {
            match self.fetch_with_retry(key, label).await {
                Ok(Some(value)) => {
                    debug!("[config] {key} resolved from store (label={label:?})");
                    return Some(value);
                }
                Ok(None) => {}
                Err(err) => {
                    warn!("[config] store lookup failed for {key} (label={label:?}): {err}");
                }
            }
        }
        None
    }

    /// Store read with short randomized exponential back-off.
    async fn fetch_with_retry(&self, key: &str, label: &str) -> Result<Option<String>> {
        let mut last_err = None;
        for attempt in 0..STORE_ATTEMPTS {
            match self.store.fetch(key, label).await {
                Ok(value) => return Ok(value),
                Err(err) => {
                    if attempt + 1 < STORE_ATTEMPTS {
                        let cap = STORE_BACKOFF_CAP
                            .min(Duration::from_millis(250 * 2u64.saturating_pow(
                                u32::try_from(attempt).unwrap_or(u32::MAX),
                            )));
                        let wait = Duration::from_millis(
                            rand::thread_rng().gen_range(0..=cap.as_millis().min(5_000) as u64),
                        );
                        warn!(
                            "[config] retrying {key} after store error (attempt {}): {err}",
                            attempt + 1
                        );
                        tokio::time::sleep(wait).await;
                    }
                    last_err = Some(err);
                }
            }
        }
        Err(last_err.unwrap_or_else(|| {
            ConfigError::StoreUnavailable("store fetch failed".to_string()).into()
        }))
    }
}

impl std::fmt::Debug for ConfigResolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConfigResolver")
            .field("allow_env", &self.allow_env)
            .finish_non_exhaustive()
    }
}
