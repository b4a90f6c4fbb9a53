//! Clap argument definitions.

use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};

/// Multi-source RAG ingestion pipeline.
#[derive(Debug, Parser)]
#[command(name = "ragsync-rs", version, about, long_about = None)]
pub struct Cli {
    /// Subcommand to run.
    #[command(subcommand)]
    pub command: Commands,

    /// Increase log verbosity (overrides `RUST_LOG`).
    #[arg(short, long, global = true)]
    pub verbose: bool,
}

/// Ingestion sources addressable from the CLI.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum SourceKind {
    /// Object storage container.
    Blob,
    /// NL2SQL metadata container.
    Nl2sql,
}

impl SourceKind {
    /// Source tag as used in index records.
    #[must_use]
    pub const fn tag(self) -> &'static str {
        match self {
            Self::Blob => "blob",
            Self::Nl2sql => "nl2sql",
        }
    }
}

/// Available subcommands.
#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Run one indexer pass for a source.
    Index {
        /// Source to index.
        #[arg(value_enum)]
        source: SourceKind,

        /// Seed the object store from a local directory (offline runs).
        #[arg(long)]
        source_dir: Option<PathBuf>,

        /// Use in-memory gateways instead of remote services.
        #[arg(long)]
        dry_run: bool,
    },

    /// Run one purger pass for a source.
    Purge {
        /// Source to reconcile.
        #[arg(value_enum)]
        source: SourceKind,

        /// Seed the object store from a local directory (offline runs).
        #[arg(long)]
        source_dir: Option<PathBuf>,

        /// Use in-memory gateways instead of remote services.
        #[arg(long)]
        dry_run: bool,
    },

    /// Run the interval scheduler until interrupted.
    Schedule {
        /// Use in-memory gateways instead of remote services.
        #[arg(long)]
        dry_run: bool,
    },

    /// Chunk a local file and print the chunk records as JSON.
    Chunk {
        /// File to chunk.
        file: PathBuf,

        /// Token budget per chunk.
        #[arg(long, default_value_t = 2048)]
        max_tokens: usize,

        /// Token overlap between chunks.
        #[arg(long, default_value_t = 100)]
        overlap: usize,

        /// Minimum tokens per kept chunk.
        #[arg(long, default_value_t = 1)]
        min_tokens: usize,
    },
}
