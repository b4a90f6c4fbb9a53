//! Run summaries and per-item logs.
//!
//! One [`RunSummary`] is written per engine invocation; counters follow the
//! invariant `items_discovered >= candidate_items + skipped_no_change` and
//! `indexed_items + failed <= candidate_items`. Per-item records capture the
//! freshness decision and outcome for each discovered item.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Lifecycle state of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    /// Run summary written at start.
    Started,
    /// All items dispatched; results being finalized.
    Finishing,
    /// Run completed normally.
    Finished,
    /// A run-scoped error aborted the run.
    Failed,
    /// The run was cancelled externally.
    Cancelled,
}

impl RunStatus {
    /// Lowercase wire name (also used as the stage suffix of summary blobs).
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Started => "started",
            Self::Finishing => "finishing",
            Self::Finished => "finished",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Terminal outcome of one discovered item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ItemOutcome {
    /// Chunks replaced and uploaded.
    Success,
    /// Item unchanged since last ingestion.
    SkippedNoChange,
    /// Item-scoped failure.
    Error,
    /// Per-item deadline exceeded.
    Timeout,
}

impl ItemOutcome {
    /// Kebab-case wire name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::SkippedNoChange => "skipped-no-change",
            Self::Error => "error",
            Self::Timeout => "timeout",
        }
    }
}

/// One record per engine invocation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunSummary {
    /// Engine tag (e.g. `blob-storage-indexer`).
    pub indexer_type: String,

    /// Run identifier, UTC `YYYYMMDDThhmmssZ`.
    pub run_id: String,

    /// ISO-8601 start timestamp.
    pub run_started_at: String,

    /// ISO-8601 finish timestamp, absent while running.
    pub run_finished_at: Option<String>,

    /// Current lifecycle status.
    pub status: RunStatus,

    /// Items seen during discovery.
    pub items_discovered: u64,

    /// Items that passed the freshness gate.
    pub candidate_items: u64,

    /// Candidates fully replaced in the index.
    pub indexed_items: u64,

    /// Items skipped as unchanged.
    pub skipped_no_change: u64,

    /// Items that failed or timed out.
    pub failed: u64,

    /// Total chunk documents uploaded in this run.
    pub total_chunks_uploaded: u64,

    /// Run-scoped error description when `status == failed`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl RunSummary {
    /// Creates a `started` summary for a new run.
    #[must_use]
    pub fn begin(indexer_type: &str, started_at: DateTime<Utc>) -> Self {
        Self {
            indexer_type: indexer_type.to_string(),
            run_id: run_id_for(started_at),
            run_started_at: started_at.to_rfc3339(),
            run_finished_at: None,
            status: RunStatus::Started,
            items_discovered: 0,
            candidate_items: 0,
            indexed_items: 0,
            skipped_no_change: 0,
            failed: 0,
            total_chunks_uploaded: 0,
            error: None,
        }
    }

    /// Stamps the finish time and final status.
    pub fn finish(&mut self, status: RunStatus, finished_at: DateTime<Utc>) {
        self.status = status;
        self.run_finished_at = Some(finished_at.to_rfc3339());
    }

    /// Checks the counter invariants from the engine contract.
    #[must_use]
    pub const fn counters_consistent(&self) -> bool {
        self.items_discovered >= self.candidate_items + self.skipped_no_change
            && self.indexed_items + self.failed <= self.candidate_items + self.skipped_no_change
            && self.indexed_items <= self.candidate_items
    }
}

/// One record per discovered item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ItemLog {
    /// Engine tag.
    pub indexer_type: String,

    /// Run identifier.
    pub run_id: String,

    /// Source-local item identifier.
    pub item: String,

    /// Stable parent document identifier.
    pub parent_id: String,

    /// Upstream last-modified timestamp.
    pub last_modified: String,

    /// Wildcard prefix of the item's chunk keys.
    pub chunks_ids: String,

    /// ISO-8601 processing start.
    pub started_at: String,

    /// ISO-8601 processing end, absent until terminal.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<String>,

    /// Terminal outcome.
    pub status: ItemOutcome,

    /// Number of chunk documents uploaded.
    pub chunks: u64,

    /// Error message for `error`/`timeout` outcomes.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Formats a run identifier (UTC `YYYYMMDDThhmmssZ`) from a start time.
#[must_use]
pub fn run_id_for(started_at: DateTime<Utc>) -> String {
    started_at.format("%Y%m%dT%H%M%SZ").to_string()
}
