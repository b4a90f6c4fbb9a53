//! Structured run and per-item logging.
//!
//! Run artifacts land in the jobs log container:
//!
//! ```text
//! <engine>/runs/<runId>.json                  (canonical)
//! <engine>/runs/<runId>.<status>.json         (stage-qualified)
//! <engine>/runs/<runId>.pointer.json          (names the authoritative blob)
//! <engine>/runs/latest.json                   (best-effort latest)
//! <engine>/files/<sanitized(parent_id)>.json  (per-item)
//! ```
//!
//! Every write is best-effort: a one-shot write probe at startup disables
//! storage logging for the whole run when the container is unwritable, and
//! a total timeout guarantees the engine never blocks on logging. Summary
//! writes are verified by reading back key fields and retried with bounded
//! back-off; stage-qualified blobs preserve every stage even if the
//! canonical blob is overwritten out of order.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use bytes::Bytes;
use serde_json::{Value, json};
use tokio::sync::OnceCell;
use tracing::{debug, info, warn};

use crate::core::{ItemLog, RunSummary};
use crate::error::Result;
use crate::keys;
use crate::storage::{ObjectStore, with_op_timeout};

/// Default total budget for one summary write (all artifacts)
/// (`RUN_SUMMARY_TOTAL_TIMEOUT_SECONDS`).
pub const DEFAULT_RUN_SUMMARY_TOTAL_TIMEOUT_SECS: u64 = 90;

/// Attempts per summary artifact.
const SUMMARY_WRITE_ATTEMPTS: usize = 8;

/// Back-off cap between summary write attempts.
const SUMMARY_BACKOFF_CAP: Duration = Duration::from_secs(30);

/// Structured logger for one engine.
pub struct RunLogger {
    store: Arc<dyn ObjectStore>,
    container: String,
    engine: String,
    blob_op_timeout: Duration,
    summary_total_timeout: Duration,
    probe: OnceCell<bool>,
    disabled: AtomicBool,
    degraded_writes: AtomicU64,
}

impl RunLogger {
    /// Creates a logger writing under `<engine>/` in the log container.
    #[must_use]
    pub fn new(
        store: Arc<dyn ObjectStore>,
        container: &str,
        engine: &str,
        blob_op_timeout: Duration,
        summary_total_timeout: Duration,
    ) -> Self {
        Self {
            store,
            container: container.to_string(),
            engine: engine.to_string(),
            blob_op_timeout,
            summary_total_timeout,
            probe: OnceCell::new(),
            disabled: AtomicBool::new(false),
            degraded_writes: AtomicU64::new(0),
        }
    }

    /// Disables storage writes entirely (logging still goes to tracing).
    pub fn disable_storage(&self) {
        self.disabled.store(true, Ordering::SeqCst);
    }

    /// Number of writes dropped due to degradation.
    #[must_use]
    pub fn degraded_writes(&self) -> u64 {
        self.degraded_writes.load(Ordering::SeqCst)
    }

    /// One-shot write probe; storage logging is skipped for the rest of the
    /// run when it fails.
    async fn storage_writable(&self) -> bool {
        if self.disabled.load(Ordering::SeqCst) {
            return false;
        }
        *self
            .probe
            .get_or_init(|| async {
                let probe_name = format!("{}/_probe.tmp", self.engine);
                let outcome = with_op_timeout(
                    "log-probe",
                    self.blob_op_timeout,
                    self.store
                        .upload(&self.container, &probe_name, Bytes::new(), "application/json"),
                )
                .await;
                match outcome {
                    Ok(()) => {
                        let _ = self.store.delete(&self.container, &probe_name).await;
                        info!("[{}] storage logs enabled", self.engine);
                        true
                    }
                    Err(err) => {
                        warn!("[{}] storage logs disabled (probe failed): {err}", self.engine);
                        false
                    }
                }
            })
            .await
    }

    /// Emits a structured JSON event line through tracing.
    pub fn log_event(&self, level: tracing::Level, event: &str, fields: &[(&str, Value)]) {
        let mut payload = serde_json::Map::new();
        payload.insert("event".to_string(), Value::String(event.to_string()));
        for (key, value) in fields {
            if value.is_null() {
                continue;
            }
            payload.insert((*key).to_string(), value.clone());
        }
        let line = Value::Object(payload).to_string();
        if level == tracing::Level::ERROR {
            tracing::error!("[{}] {line}", self.engine);
        } else if level == tracing::Level::WARN {
            tracing::warn!("[{}] {line}", self.engine);
        } else if level == tracing::Level::DEBUG {
            tracing::debug!("[{}] {line}", self.engine);
        } else {
            tracing::info!("[{}] {line}", self.engine);
        }
    }

    /// Writes one per-item record, keyed by the sanitized parent.
    ///
    /// Failures degrade logging; they never fail the item.
    pub async fn write_item_log(&self, parent_id: &str, record: &ItemLog) {
        if !self.storage_writable().await {
            self.degraded_writes.fetch_add(1, Ordering::SeqCst);
            return;
        }
        let key = keys::sanitize(parent_id.trim_start_matches('/'));
        let name = format!("{}/files/{key}.json", self.engine);
        let payload = match serde_json::to_vec_pretty(record) {
            Ok(p) => p,
            Err(err) => {
                warn!("[{}] item log serialization failed: {err}", self.engine);
                return;
            }
        };
        let outcome = with_op_timeout(
            "item-log",
            self.blob_op_timeout,
            self.store
                .upload(&self.container, &name, Bytes::from(payload), "application/json"),
        )
        .await;
        if let Err(err) = outcome {
            self.degraded_writes.fetch_add(1, Ordering::SeqCst);
            warn!("[{}] failed to write item log {name}: {err}", self.engine);
        }
    }

    /// Writes the run summary artifacts for the summary's current status.
    ///
    /// Best-effort with verification and bounded retry per artifact; the
    /// whole call is capped by the summary total timeout.
    pub async fn write_run_summary(&self, summary: &RunSummary) {
        if !self.storage_writable().await {
            self.degraded_writes.fetch_add(1, Ordering::SeqCst);
            warn!("[{}] run summary skipped (storage not writable)", self.engine);
            return;
        }
        let outcome = tokio::time::timeout(
            self.summary_total_timeout,
            self.write_run_summary_inner(summary),
        )
        .await;
        if outcome.is_err() {
            self.degraded_writes.fetch_add(1, Ordering::SeqCst);
            warn!(
                "[{}] run summary write timed out after {:?}",
                self.engine, self.summary_total_timeout
            );
        }
    }

    async fn write_run_summary_inner(&self, summary: &RunSummary) {
        let stage = summary.status.as_str();
        let base = format!("{}/runs/{}", self.engine, summary.run_id);
        let stage_name = format!("{base}.{stage}.json");
        let canonical_name = format!("{base}.json");
        let latest_name = format!("{}/runs/latest.json", self.engine);

        let payload = match serde_json::to_vec_pretty(summary) {
            Ok(p) => Bytes::from(p),
            Err(err) => {
                warn!("[{}] run summary serialization failed: {err}", self.engine);
                return;
            }
        };

        debug!(
            "[{}] write_run_summary: status={stage} stage={stage_name} canonical={canonical_name}",
            self.engine
        );

        let wrote_stage = self.put_and_verify(&stage_name, &payload, summary).await;
        let wrote_canonical = self.put_and_verify(&canonical_name, &payload, summary).await;
        let wrote_latest = self.put_and_verify(&latest_name, &payload, summary).await;

        // Pointer names the authoritative snapshot for this stage.
        let pointer = json!({
            "runId": summary.run_id,
            "status": stage,
            "blobName": stage_name,
            "note": "Authoritative snapshot for this stage. Canonical and latest are best-effort.",
        });
        let pointer_payload = Bytes::from(pointer.to_string().into_bytes());
        let pointer_name = format!("{base}.pointer.json");
        let pointer_written = with_op_timeout(
            "pointer",
            self.blob_op_timeout,
            self.store.upload(
                &self.container,
                &pointer_name,
                pointer_payload.clone(),
                "application/json",
            ),
        )
        .await
        .is_ok();
        if !pointer_written {
            // Stage-suffixed fallback keeps a pointer for this stage at least.
            let fallback = format!("{base}.pointer.{stage}.json");
            let _ = with_op_timeout(
                "pointer-fallback",
                self.blob_op_timeout,
                self.store
                    .upload(&self.container, &fallback, pointer_payload, "application/json"),
            )
            .await;
        }

        if !wrote_stage || !wrote_latest {
            self.degraded_writes.fetch_add(1, Ordering::SeqCst);
            warn!(
                "[{}] run summary degraded: stage={wrote_stage} canonical={wrote_canonical} latest={wrote_latest}",
                self.engine
            );
        }
    }

    /// Uploads a summary artifact and verifies key fields by reading back.
    async fn put_and_verify(&self, name: &str, payload: &Bytes, summary: &RunSummary) -> bool {
        let mut backoff = Duration::from_secs(1);
        for attempt in 1..=SUMMARY_WRITE_ATTEMPTS {
            let write = with_op_timeout(
                "summary-write",
                self.blob_op_timeout,
                self.store
                    .upload(&self.container, name, payload.clone(), "application/json"),
            )
            .await;

            if write.is_ok()
                && let Ok(read_back) = self.read_json(name).await
                && verify_summary(&read_back, summary)
            {
                debug!("[{}] run summary verified: {name}", self.engine);
                return true;
            }

            if attempt < SUMMARY_WRITE_ATTEMPTS {
                warn!(
                    "[{}] run summary write/verify failed for {name} (attempt {attempt}); retrying in {:.1}s",
                    self.engine,
                    backoff.as_secs_f64()
                );
                tokio::time::sleep(backoff).await;
                backoff = (backoff * 2).min(SUMMARY_BACKOFF_CAP);
            }
        }
        false
    }

    async fn read_json(&self, name: &str) -> Result<Value> {
        let bytes = with_op_timeout(
            "summary-verify",
            self.blob_op_timeout,
            self.store.download(&self.container, name),
        )
        .await?;
        Ok(serde_json::from_slice(&bytes)
            .map_err(|e| crate::error::StorageError::OperationFailed {
                operation: "verify".to_string(),
                reason: e.to_string(),
            })?)
    }
}

/// Compares the read-back blob against the summary's key fields.
fn verify_summary(on_blob: &Value, summary: &RunSummary) -> bool {
    on_blob.get("runId").and_then(Value::as_str) == Some(summary.run_id.as_str())
        && on_blob.get("status").and_then(Value::as_str) == Some(summary.status.as_str())
        && on_blob.get("indexedItems").and_then(Value::as_u64) == Some(summary.indexed_items)
        && on_blob.get("failed").and_then(Value::as_u64) == Some(summary.failed)
        && on_blob.get("totalChunksUploaded").and_then(Value::as_u64)
            == Some(summary.total_chunks_uploaded)
}

impl std::fmt::Debug for RunLogger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RunLogger")
            .field("engine", &self.engine)
            .field("container", &self.container)
            .finish_non_exhaustive()
    }
}
