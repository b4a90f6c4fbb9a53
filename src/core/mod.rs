//! Core domain types for the ingestion pipeline.
//!
//! - [`Chunk`]: an engine-produced fragment of an upstream document
//! - [`ItemRef`] / [`FileContent`]: connector discovery and download payloads
//! - [`IndexDocument`]: the wire shape of one search index record
//! - [`RunSummary`] / [`ItemLog`]: structured run and per-item records

pub mod chunk;
pub mod document;
pub mod run;

pub use chunk::{Chunk, ChunkBuilder, title_from_filename};
pub use document::{
    FileContent, IndexDocument, ItemRef, MAX_SECURITY_IDS, dedupe_security_ids,
};
pub use run::{ItemLog, ItemOutcome, RunStatus, RunSummary, run_id_for};
