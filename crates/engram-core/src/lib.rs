//! # Engram Core
//!
//! Long-term memory engine for conversational agents. Ingests dialogue,
//! distills it into structured, durable memories, retrieves the most
//! relevant ones for a new query, and forgets along a decay curve.
//!
//! - **Hybrid retrieval**: dense (HNSW, cosine) + sparse (BM25) search with
//!   nine fusion strategies and an adaptive query classifier
//! - **Weighted recall**: similarity x importance x recency scoring with
//!   best-effort access tracking
//! - **Reflection**: dialogue windows distilled into typed, importance-scored
//!   memory events through a language model, with validation, fingerprint
//!   dedup, retries, and idempotent commit
//! - **Forgetting**: periodic decay of importance with threshold pruning,
//!   plus an operator nuke with a cancellable countdown
//! - **Storage**: SQLite document store and embedding blobs committed in one
//!   transaction, keyed by a monotonic `doc_id`
//! - **Sessions**: bounded LRU/TTL cache of rolling dialogue windows that
//!   trigger reflection
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use engram_core::{EngineConfig, MemoryEngine};
//! use std::sync::Arc;
//!
//! // Providers come from the host
//! let engine = MemoryEngine::new(
//!     EngineConfig::default(),
//!     Arc::new(my_embedder),
//!     Arc::new(my_language_model),
//!     None, // default data directory
//! )
//! .await?;
//! engine.start();
//!
//! engine.on_user_message("session-1", None, "I love jazz", now);
//! engine.on_assistant_message("session-1", None, "Noted!", now);
//!
//! let block = engine
//!     .build_context("session-1", None, "what music does the user like", 5)
//!     .await;
//!
//! engine.stop().await;
//! ```
//!
//! ## Feature Flags
//!
//! - `word-segmentation`: jieba-backed CJK tokenization for the sparse index

#![warn(rustdoc::missing_crate_level_docs)]

// ============================================================================
// MODULES
// ============================================================================

pub mod config;
pub mod dense;
pub mod engine;
pub mod error;
pub mod forgetting;
pub mod fusion;
pub mod memory;
pub mod providers;
pub mod recall;
pub mod reflection;
pub mod session;
pub mod sparse;
pub mod storage;

/// Wall-clock source shared by the components.
pub(crate) mod clock {
    /// Current unix time in seconds.
    pub fn now_unix() -> i64 {
        chrono::Utc::now().timestamp()
    }
}

// ============================================================================
// PUBLIC API RE-EXPORTS
// ============================================================================

// Data model
pub use memory::{
    ComponentScores, DialogueMessage, EventType, MemoryDraft, MemoryFilter, MemoryPatch,
    MemoryRecord, MemoryStatus, RecallHit, Role, StatusCounts,
};

// Configuration
pub use config::{
    EngineConfig, FilteringSettings, ForgettingAgentConfig, FusionConfig, FusionStrategy,
    RecallEngineConfig, RecallStrategy, ReflectionEngineConfig, RetrievalMode,
    SessionManagerConfig, SparseRetrieverConfig, Timezone,
};

// Errors
pub use error::{MemoryError, ProviderError, Result};

// Providers
pub use providers::{CompletionParams, EmbeddingProvider, LanguageModelProvider};

// Storage
pub use storage::{MemoryStore, ScanCursor};

// Retrieval
pub use dense::{DenseRetriever, VectorIndex};
pub use fusion::{fuse, min_max_normalize, FusedHit, QueryKind, QueryProfile};
pub use recall::{Degradation, RecallEngine, RecallOutcome};
pub use sparse::{build_tokenizer, Bm25Params, SimpleTokenizer, SparseIndex, Tokenizer};

// Reflection
pub use reflection::{
    fingerprint, ReflectionEngine, ReflectionOutcome, DEFAULT_EVALUATION_PROMPT,
    DEFAULT_EXTRACTION_PROMPT,
};

// Forgetting
pub use forgetting::{
    decayed_importance, is_eligible, ForgettingAgent, NukeState, NukeStatus, PassSummary,
};

// Sessions
pub use session::SessionManager;

// Engine façade
pub use engine::{EngineStatus, MemoryEngine};

// ============================================================================
// VERSION INFO
// ============================================================================

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

// ============================================================================
// PRELUDE
// ============================================================================

/// Convenient imports for common usage
pub mod prelude {
    pub use crate::{
        DialogueMessage, EngineConfig, EngineStatus, EventType, MemoryDraft, MemoryEngine,
        MemoryError, MemoryFilter, MemoryRecord, MemoryStatus, RecallHit, Result, Role,
    };
    pub use crate::{CompletionParams, EmbeddingProvider, LanguageModelProvider};
    pub use crate::{ForgettingAgent, NukeState, PassSummary, ReflectionEngine, SessionManager};
}
