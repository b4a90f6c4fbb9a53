//! REST implementation of the search gateway.
//!
//! Speaks the Azure-AI-Search-style document API: `docs/index` for batched
//! upserts/deletes, `docs('<key>')` for point fetch, and `docs/search` for
//! filtered scans paged with `skip`/`top`. Rate-limit responses honor
//! `retry-after-ms` / `Retry-After`; transient failures use the shared
//! exponential back-off (1s doubling to 30s, 8 attempts).

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::debug;

use crate::core::IndexDocument;
use crate::error::{Result, SearchError};
use crate::retry::{RetryPolicy, with_retry};

use super::{BatchResult, DEFAULT_BATCH_SIZE, SearchIndex, SearchQuery};

/// REST API version sent with every request.
const API_VERSION: &str = "2024-07-01";

/// Default total timeout for one HTTP call (`HTTP_TOTAL_TIMEOUT_SECONDS`).
pub const DEFAULT_HTTP_TIMEOUT_SECS: u64 = 120;

/// REST-backed [`SearchIndex`].
pub struct RestSearchIndex {
    http: reqwest::Client,
    endpoint: String,
    index_name: String,
    api_key: String,
    batch_size: usize,
    policy: RetryPolicy,
}

impl RestSearchIndex {
    /// Creates a gateway for one index.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be constructed.
    pub fn new(
        endpoint: &str,
        index_name: &str,
        api_key: &str,
        http_timeout: Duration,
    ) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(http_timeout)
            .build()
            .map_err(|e| SearchError::Transient(e.to_string()))?;
        Ok(Self {
            http,
            endpoint: endpoint.trim_end_matches('/').to_string(),
            index_name: index_name.to_string(),
            api_key: api_key.to_string(),
            batch_size: DEFAULT_BATCH_SIZE,
            policy: RetryPolicy::search(),
        })
    }

    /// Overrides the per-call batch size.
    #[must_use]
    pub const fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    fn docs_url(&self, suffix: &str) -> String {
        format!(
            "{}/indexes/{}/docs{suffix}?api-version={API_VERSION}",
            self.endpoint, self.index_name
        )
    }

    /// Sends one `docs/index` batch and parses per-document statuses.
    async fn post_index_batch(&self, actions: &[Value]) -> Result<BatchResult> {
        let url = self.docs_url("/index");
        let body = json!({ "value": actions });
        let response = with_retry(&self.policy, "search.index", || async {
            let resp = self
                .http
                .post(&url)
                .header("api-key", &self.api_key)
                .json(&body)
                .send()
                .await
                .map_err(classify_reqwest)?;
            check_status(resp).await
        })
        .await?;

        let parsed: IndexBatchResponse = response
            .json()
            .await
            .map_err(|e| SearchError::Malformed(e.to_string()))?;

        let mut result = BatchResult::default();
        for item in parsed.value {
            if item.status {
                result.succeeded += 1;
            } else {
                result.failed += 1;
                result
                    .failures
                    .push((item.key, item.error_message.unwrap_or_default()));
            }
        }
        Ok(result)
    }
}

#[derive(Debug, Deserialize)]
struct IndexBatchResponse {
    value: Vec<IndexBatchItem>,
}

#[derive(Debug, Deserialize)]
struct IndexBatchItem {
    key: String,
    status: bool,
    #[serde(rename = "errorMessage")]
    error_message: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    value: Vec<Value>,
}

/// Maps reqwest transport errors to the retriable transient class.
fn classify_reqwest(err: reqwest::Error) -> SearchError {
    SearchError::Transient(err.to_string())
}

/// Parses a retry-after wait from response headers.
fn retry_after_from(headers: &reqwest::header::HeaderMap) -> Option<Duration> {
    if let Some(ms) = headers
        .get("retry-after-ms")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<u64>().ok())
    {
        return Some(Duration::from_millis(ms));
    }
    headers
        .get(reqwest::header::RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<u64>().ok())
        .map(Duration::from_secs)
}

/// Classifies an HTTP response into success or a typed [`SearchError`].
async fn check_status(resp: reqwest::Response) -> std::result::Result<reqwest::Response, SearchError> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    if status.as_u16() == 429 {
        return Err(SearchError::RateLimited {
            retry_after: retry_after_from(resp.headers()),
        });
    }
    if status.is_server_error() {
        return Err(SearchError::Transient(format!("http {status}")));
    }
    let message = resp.text().await.unwrap_or_default();
    Err(SearchError::Rejected {
        status: status.as_u16(),
        message,
    })
}

#[async_trait]
impl SearchIndex for RestSearchIndex {
    async fn upload_documents(&self, docs: &[IndexDocument]) -> Result<BatchResult> {
        let mut total = BatchResult::default();
        for batch in docs.chunks(self.batch_size.max(1)) {
            let actions: Vec<Value> = batch
                .iter()
                .map(|doc| {
                    let mut value = serde_json::to_value(doc).unwrap_or(Value::Null);
                    if let Value::Object(map) = &mut value {
                        map.insert(
                            "@search.action".to_string(),
                            Value::String("mergeOrUpload".to_string()),
                        );
                    }
                    value
                })
                .collect();
            total.merge(self.post_index_batch(&actions).await?);
        }
        debug!(
            "[search-rest] uploaded {} docs ({} failed)",
            total.succeeded, total.failed
        );
        Ok(total)
    }

    async fn delete_documents(&self, keys: &[String]) -> Result<BatchResult> {
        let mut total = BatchResult::default();
        for batch in keys.chunks(self.batch_size.max(1)) {
            let actions: Vec<Value> = batch
                .iter()
                .map(|key| json!({ "@search.action": "delete", "id": key }))
                .collect();
            total.merge(self.post_index_batch(&actions).await?);
        }
        Ok(total)
    }

    async fn get_document(&self, key: &str) -> Result<Option<Value>> {
        let url = self.docs_url(&format!("('{key}')"));
        let outcome = with_retry(&self.policy, "search.get", || async {
            let resp = self
                .http
                .get(&url)
                .header("api-key", &self.api_key)
                .send()
                .await
                .map_err(classify_reqwest)?;
            if resp.status().as_u16() == 404 {
                return Ok::<Option<Value>, SearchError>(None);
            }
            let resp = check_status(resp).await?;
            let doc: Value = resp
                .json()
                .await
                .map_err(|e| SearchError::Malformed(e.to_string()))?;
            Ok(Some(doc))
        })
        .await?;
        Ok(outcome)
    }

    async fn search_page(&self, query: &SearchQuery, skip: usize) -> Result<Vec<Value>> {
        let url = self.docs_url("/search");
        let mut body = json!({
            "search": "*",
            "top": query.top,
            "skip": skip,
        });
        if let Some(filter) = &query.filter {
            body["filter"] = Value::String(filter.clone());
        }
        if !query.select.is_empty() {
            body["select"] = Value::String(query.select.join(","));
        }

        let response = with_retry(&self.policy, "search.scan", || async {
            let resp = self
                .http
                .post(&url)
                .header("api-key", &self.api_key)
                .json(&body)
                .send()
                .await
                .map_err(classify_reqwest)?;
            check_status(resp).await
        })
        .await?;

        let parsed: SearchResponse = response
            .json()
            .await
            .map_err(|e| SearchError::Malformed(e.to_string()))?;
        Ok(parsed.value)
    }
}

impl std::fmt::Debug for RestSearchIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RestSearchIndex")
            .field("endpoint", &self.endpoint)
            .field("index_name", &self.index_name)
            .field("batch_size", &self.batch_size)
            .finish_non_exhaustive()
    }
}
