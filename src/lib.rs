//! # ragsync-rs
//!
//! Multi-source RAG ingestion pipeline.
//!
//! Keeps a vector search index synchronized with documents living in
//! heterogeneous upstream stores: object storage, collaboration-platform
//! lists and document libraries, and an NL2SQL metadata store. For each
//! source the indexer engine discovers candidate items, gates them on a
//! strictly-newer-with-skew freshness rule, downloads and decomposes them
//! into bounded-token chunks, embeds them, and replaces the document's
//! chunk set in the index under stable keys. A companion purger removes
//! index documents whose upstream origin no longer exists.
//!
//! ## Features
//!
//! - **Chunker family**: layout-analysis, multimodal, spreadsheet,
//!   transcription, JSON, NL2SQL, and generic text strategies selected by a
//!   factory on file extension
//! - **Stable keying**: sanitized parent prefixes plus zero-padded chunk
//!   ordinals; chunk 0 carries the authoritative freshness marker
//! - **Bounded concurrency**: a per-engine item pool plus one process-wide
//!   semaphore in front of the rate-limited embedding provider
//! - **Structured run logging**: per-item and stage-qualified run-summary
//!   artifacts written best-effort to object storage

#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![warn(missing_docs)]
#![warn(unsafe_code)]

pub mod app;
pub mod chunking;
pub mod cli;
pub mod config;
pub mod connectors;
pub mod core;
pub mod embedding;
pub mod error;
pub mod indexer;
pub mod keys;
pub mod layout;
pub mod purger;
pub mod retry;
pub mod runlog;
pub mod scheduler;
pub mod search;
pub mod storage;
pub mod tokens;

// Re-export commonly used types at crate root
pub use error::{Error, Result};

// Re-export core domain types
pub use self::core::{
    Chunk, ChunkBuilder, FileContent, IndexDocument, ItemRef, RunStatus, RunSummary,
};

// Re-export the application context
pub use app::{AppContext, AppSettings};

// Re-export engine types
pub use indexer::{IndexerConfig, IndexerEngine};
pub use purger::{PurgeSummary, PurgerEngine};

// Re-export chunking types
pub use chunking::{Chunker, ChunkerFactory, ChunkerInput, ChunkerParams};

// Re-export gateway contracts
pub use connectors::SourceConnector;
pub use embedding::{ChatClient, EmbeddingClient};
pub use search::{SearchIndex, SearchQuery};
pub use storage::ObjectStore;

// Re-export CLI types
pub use cli::{Cli, Commands};
