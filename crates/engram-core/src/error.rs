//! Error types shared across the engine.
//!
//! One enum carries every failure kind the components can surface. Retrieval
//! components degrade instead of propagating provider failures; reflection and
//! forgetting skip batches and continue; storage raises only corruption and
//! conflict.

/// Boxed source error coming out of an embedding or language-model provider.
pub type ProviderError = Box<dyn std::error::Error + Send + Sync>;

/// Engine error type
#[non_exhaustive]
#[derive(Debug, thiserror::Error)]
pub enum MemoryError {
    /// Configuration rejected at startup
    #[error("invalid configuration: {0}")]
    ConfigInvalid(String),
    /// Provider call failed (transient; retried where the pipeline allows)
    #[error("provider unavailable: {0}")]
    ProviderUnavailable(#[source] ProviderError),
    /// Provider answered but the payload did not parse
    #[error("provider returned malformed output: {0}")]
    ProviderMalformedOutput(String),
    /// Write lost against a concurrent change
    #[error("storage conflict: {0}")]
    StorageConflict(String),
    /// Invariants violated on load; storage refuses to open
    #[error("storage corrupted: {0}")]
    StorageCorrupted(String),
    /// Operation targeted an absent doc_id; callers treat as a soft skip
    #[error("document not found: {0}")]
    NotFound(i64),
    /// Operation cancelled before completion
    #[error("operation cancelled")]
    Cancelled,
    /// Per-call deadline elapsed
    #[error("deadline exceeded")]
    DeadlineExceeded,
    /// Database error
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),
    /// IO error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    /// Vector index error
    #[error("vector index error: {0}")]
    VectorIndex(String),
}

/// Engine result type
pub type Result<T> = std::result::Result<T, MemoryError>;

impl MemoryError {
    /// Whether a bounded retry is worthwhile for this error.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            MemoryError::ProviderUnavailable(_)
                | MemoryError::ProviderMalformedOutput(_)
                | MemoryError::StorageConflict(_)
        )
    }
}
