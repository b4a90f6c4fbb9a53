//! Error types for ragsync-rs operations.
//!
//! This module provides a comprehensive error hierarchy using `thiserror` for
//! all ingestion operations including configuration, search index access,
//! object storage, embeddings, chunking, and source connectors.
//!
//! Retryability is expressed through the [`Recoverable`] trait so that one
//! generic retry driver (see [`crate::retry`]) can serve every gateway with
//! its own policy.

use std::time::Duration;

use thiserror::Error;

/// Result type alias for ingestion operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Comprehensive error types for ingestion operations.
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration errors (missing/invalid keys). Fatal at startup.
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Search index errors.
    #[error("search error: {0}")]
    Search(#[from] SearchError),

    /// Object storage errors.
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    /// Embedding / chat-completion provider errors.
    #[error("embedding error: {0}")]
    Embedding(#[from] EmbeddingError),

    /// Chunking-related errors (content decomposition).
    #[error("chunking error: {0}")]
    Chunking(#[from] ChunkingError),

    /// Source connector errors (enumeration / download).
    #[error("connector error: {0}")]
    Connector(#[from] ConnectorError),

    /// A per-item operation exceeded its deadline.
    #[error("operation timed out after {seconds}s: {operation}")]
    Timeout {
        /// Name of the operation that timed out.
        operation: String,
        /// Configured deadline in seconds.
        seconds: u64,
    },

    /// The run was cancelled externally.
    #[error("run cancelled")]
    Cancelled,
}

/// Configuration-specific errors.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// A required configuration key is absent from every source.
    #[error("required configuration key not found: {key}")]
    MissingKey {
        /// The key that could not be resolved.
        key: String,
    },

    /// A key resolved to a value that cannot be parsed as the requested type.
    #[error("invalid value for {key}: {value:?} ({reason})")]
    InvalidValue {
        /// The configuration key.
        key: String,
        /// The raw value as resolved.
        value: String,
        /// Why the value was rejected.
        reason: String,
    },

    /// The remote configuration store could not be reached.
    #[error("configuration store unavailable: {0}")]
    StoreUnavailable(String),
}

/// Search-index-specific errors.
#[derive(Error, Debug)]
pub enum SearchError {
    /// Document with the given key does not exist in the index.
    #[error("document not found: {key}")]
    NotFound {
        /// The primary key that was looked up.
        key: String,
    },

    /// The index service signalled throttling.
    #[error("search service rate limited (retry after {retry_after:?})")]
    RateLimited {
        /// Provider-suggested wait, when a retry-after header was present.
        retry_after: Option<Duration>,
    },

    /// Network-level or 5xx failure; safe to retry.
    #[error("transient search failure: {0}")]
    Transient(String),

    /// The service rejected a specific request; retrying will not help.
    #[error("search request rejected ({status}): {message}")]
    Rejected {
        /// HTTP status code.
        status: u16,
        /// Service-provided error message.
        message: String,
    },

    /// One or more documents in a batch failed to index.
    #[error("{failed} of {total} documents failed in batch")]
    BatchFailed {
        /// Number of failed documents.
        failed: usize,
        /// Batch size.
        total: usize,
    },

    /// Response body could not be decoded.
    #[error("malformed search response: {0}")]
    Malformed(String),
}

/// Object-storage-specific errors.
#[derive(Error, Debug)]
pub enum StorageError {
    /// Blob does not exist.
    #[error("blob not found: {name}")]
    BlobNotFound {
        /// Name of the missing blob.
        name: String,
    },

    /// The store signalled throttling.
    #[error("storage rate limited (retry after {retry_after:?})")]
    RateLimited {
        /// Provider-suggested wait, when present.
        retry_after: Option<Duration>,
    },

    /// Network-level or 5xx failure; safe to retry.
    #[error("transient storage failure: {0}")]
    Transient(String),

    /// Credential rejected by the store.
    #[error("storage authentication failed: {0}")]
    Auth(String),

    /// Any other storage failure.
    #[error("storage operation failed: {operation}: {reason}")]
    OperationFailed {
        /// The operation that failed (list, download, upload, ...).
        operation: String,
        /// Underlying reason.
        reason: String,
    },
}

/// Embedding / chat-completion provider errors.
#[derive(Error, Debug)]
pub enum EmbeddingError {
    /// The provider signalled throttling.
    #[error("embedding provider rate limited (retry after {retry_after:?})")]
    RateLimited {
        /// Provider-suggested wait, parsed from `retry-after-ms` or
        /// `Retry-After` when present.
        retry_after: Option<Duration>,
    },

    /// Network-level or 5xx failure; safe to retry.
    #[error("transient embedding failure: {0}")]
    Transient(String),

    /// Credential rejected by the provider.
    #[error("embedding authentication failed: {0}")]
    Auth(String),

    /// All retry attempts were consumed without success.
    #[error("embedding retries exhausted after {attempts} attempts: {last_error}")]
    Exhausted {
        /// Number of attempts made.
        attempts: usize,
        /// Message of the final failure.
        last_error: String,
    },

    /// The provider returned an unusable response.
    #[error("malformed embedding response: {0}")]
    Malformed(String),
}

/// Chunking-specific errors for content decomposition.
#[derive(Error, Debug)]
pub enum ChunkingError {
    /// Document bytes are not valid UTF-8 where text was required.
    #[error("invalid UTF-8 at byte offset {offset}")]
    InvalidUtf8 {
        /// Byte offset where invalid UTF-8 was found.
        offset: usize,
    },

    /// The file extension has no chunker.
    #[error("unsupported format: {extension}")]
    UnsupportedFormat {
        /// The rejected extension.
        extension: String,
    },

    /// Document could not be parsed (JSON, VTT, workbook, ...).
    #[error("failed to parse {kind} content: {reason}")]
    ParseFailed {
        /// Content kind being parsed.
        kind: String,
        /// Underlying reason.
        reason: String,
    },

    /// The layout analysis service failed.
    #[error("layout analysis failed: {0}")]
    AnalysisFailed(String),

    /// Invalid chunker configuration.
    #[error("invalid chunker configuration: {reason}")]
    InvalidConfig {
        /// Reason the configuration is invalid.
        reason: String,
    },

    /// Overlap exceeds chunk budget.
    #[error("overlap {overlap} must be less than chunk size {size}")]
    OverlapTooLarge {
        /// Overlap in tokens.
        overlap: usize,
        /// Chunk budget in tokens.
        size: usize,
    },
}

/// Source-connector errors.
#[derive(Error, Debug)]
pub enum ConnectorError {
    /// Upstream credential rejected; the run fails immediately.
    #[error("connector authentication failed: {0}")]
    Auth(String),

    /// Enumeration of upstream items failed.
    #[error("enumeration failed for {source_tag}: {reason}")]
    EnumerationFailed {
        /// Source tag.
        source_tag: String,
        /// Underlying reason.
        reason: String,
    },

    /// A single item could not be downloaded.
    #[error("download failed for {item}: {reason}")]
    DownloadFailed {
        /// Item identifier.
        item: String,
        /// Underlying reason.
        reason: String,
    },

    /// The upstream API signalled throttling.
    #[error("connector rate limited (retry after {retry_after:?})")]
    RateLimited {
        /// Provider-suggested wait, when present.
        retry_after: Option<Duration>,
    },

    /// Network-level or 5xx failure; safe to retry.
    #[error("transient connector failure: {0}")]
    Transient(String),
}

/// Classification consumed by the generic retry driver.
///
/// `retry_after` returning `Some` means the upstream explicitly asked for a
/// wait (rate limiting); `is_transient` covers failures where an exponential
/// back-off retry is appropriate. Everything else is non-retriable and
/// propagates to the caller on first occurrence.
pub trait Recoverable {
    /// Provider-requested wait before the next attempt, if any.
    fn retry_after(&self) -> Option<Duration>;

    /// Whether the failure is transient (network, 5xx, timeout).
    fn is_transient(&self) -> bool;

    /// Whether any retry is worthwhile.
    fn is_retriable(&self) -> bool {
        self.retry_after().is_some() || self.is_transient()
    }
}

impl Recoverable for SearchError {
    fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::RateLimited { retry_after } => retry_after.or(Some(Duration::from_secs(1))),
            _ => None,
        }
    }

    fn is_transient(&self) -> bool {
        matches!(self, Self::Transient(_))
    }
}

impl Recoverable for StorageError {
    fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::RateLimited { retry_after } => retry_after.or(Some(Duration::from_secs(1))),
            _ => None,
        }
    }

    fn is_transient(&self) -> bool {
        matches!(self, Self::Transient(_))
    }
}

impl Recoverable for EmbeddingError {
    fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::RateLimited { retry_after } => retry_after.or(Some(Duration::from_secs(1))),
            _ => None,
        }
    }

    fn is_transient(&self) -> bool {
        matches!(self, Self::Transient(_))
    }
}

impl Recoverable for ConnectorError {
    fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::RateLimited { retry_after } => retry_after.or(Some(Duration::from_secs(1))),
            _ => None,
        }
    }

    fn is_transient(&self) -> bool {
        matches!(self, Self::Transient(_))
    }
}

// Implement From traits for standard library and ecosystem errors

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Self::Storage(StorageError::OperationFailed {
            operation: "io".to_string(),
            reason: err.to_string(),
        })
    }
}

impl From<serde_json::Error> for ChunkingError {
    fn from(err: serde_json::Error) -> Self {
        Self::ParseFailed {
            kind: "json".to_string(),
            reason: err.to_string(),
        }
    }
}

impl From<std::string::FromUtf8Error> for ChunkingError {
    fn from(err: std::string::FromUtf8Error) -> Self {
        Self::InvalidUtf8 {
            offset: err.utf8_error().valid_up_to(),
        }
    }
}

impl From<std::str::Utf8Error> for ChunkingError {
    fn from(err: std::str::Utf8Error) -> Self {
        Self::InvalidUtf8 {
            offset: err.valid_up_to(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = Error::Timeout {
            operation: "download".to_string(),
            seconds: 600,
        };
        assert_eq!(err.to_string(), "operation timed out after 600s: download");
    }

    #[test]
    fn test_config_error_display() {
        let err = ConfigError::MissingKey {
            key: "STORAGE_ACCOUNT_NAME".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "required configuration key not found: STORAGE_ACCOUNT_NAME"
        );
    }

    #[test]
    fn test_search_error_not_found() {
        let err = SearchError::NotFound {
            key: "docs-a-pdf-c00000".to_string(),
        };
        assert!(err.to_string().contains("docs-a-pdf-c00000"));
        assert!(!err.is_retriable());
    }

    #[test]
    fn test_search_rate_limited_recoverable() {
        let err = SearchError::RateLimited {
            retry_after: Some(Duration::from_millis(2000)),
        };
        assert_eq!(err.retry_after(), Some(Duration::from_millis(2000)));
        assert!(err.is_retriable());
    }

    #[test]
    fn test_rate_limited_without_header_still_waits() {
        let err = EmbeddingError::RateLimited { retry_after: None };
        assert_eq!(err.retry_after(), Some(Duration::from_secs(1)));
    }

    #[test]
    fn test_transient_classification() {
        let err = SearchError::Transient("connection reset".to_string());
        assert!(err.is_transient());
        assert!(err.is_retriable());
        assert!(err.retry_after().is_none());

        let err = SearchError::Rejected {
            status: 400,
            message: "bad filter".to_string(),
        };
        assert!(!err.is_transient());
        assert!(!err.is_retriable());
    }

    #[test]
    fn test_storage_error_variants() {
        let err = StorageError::BlobNotFound {
            name: "docs/a.pdf".to_string(),
        };
        assert!(err.to_string().contains("docs/a.pdf"));

        let err = StorageError::OperationFailed {
            operation: "upload".to_string(),
            reason: "disk full".to_string(),
        };
        assert!(err.to_string().contains("upload"));
        assert!(err.to_string().contains("disk full"));
    }

    #[test]
    fn test_embedding_exhausted_display() {
        let err = EmbeddingError::Exhausted {
            attempts: 8,
            last_error: "429".to_string(),
        };
        assert!(err.to_string().contains("8 attempts"));
        assert!(!err.is_retriable());
    }

    #[test]
    fn test_chunking_error_variants() {
        let err = ChunkingError::UnsupportedFormat {
            extension: "exe".to_string(),
        };
        assert!(err.to_string().contains("exe"));

        let err = ChunkingError::OverlapTooLarge {
            overlap: 200,
            size: 100,
        };
        assert!(err.to_string().contains("200"));
        assert!(err.to_string().contains("100"));
    }

    #[test]
    fn test_connector_error_variants() {
        let err = ConnectorError::EnumerationFailed {
            source_tag: "blob".to_string(),
            reason: "403".to_string(),
        };
        assert!(err.to_string().contains("blob"));

        let err = ConnectorError::Auth("token expired".to_string());
        assert!(!err.is_retriable());
    }

    #[test]
    fn test_error_from_sub_errors() {
        let err: Error = ConfigError::StoreUnavailable("offline".to_string()).into();
        assert!(matches!(err, Error::Config(_)));

        let err: Error = SearchError::Transient("reset".to_string()).into();
        assert!(matches!(err, Error::Search(_)));

        let err: Error = ChunkingError::AnalysisFailed("layout 500".to_string()).into();
        assert!(matches!(err, Error::Chunking(_)));
    }

    #[test]
    fn test_error_from_io() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "gone");
        let err: Error = io_err.into();
        assert!(matches!(err, Error::Storage(_)));
    }

    #[test]
    fn test_chunking_error_from_serde() {
        let json_err = serde_json::from_str::<i32>("not json").unwrap_err();
        let err: ChunkingError = json_err.into();
        assert!(matches!(err, ChunkingError::ParseFailed { .. }));
    }

    #[test]
    fn test_chunking_error_from_utf8() {
        let invalid: Vec<u8> = vec![0xff, 0xfe];
        let utf8_err = String::from_utf8(invalid).unwrap_err();
        let err: ChunkingError = utf8_err.into();
        assert!(matches!(err, ChunkingError::InvalidUtf8 { .. }));
    }
}
