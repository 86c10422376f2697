//! Engine configuration
//!
//! One validated struct tree built at startup. Every recognized key has a
//! serde default carrying the documented value; `validate()` rejects
//! out-of-range settings before any component is constructed, and
//! [`EngineConfig::from_json_value`] warns about unknown keys instead of
//! silently dropping them.

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::{MemoryError, Result};

// ============================================================================
// STRATEGY ENUMS
// ============================================================================

/// How recall ranks fused candidates
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecallStrategy {
    /// Rank by fused score alone
    Similarity,
    /// Blend fused score with importance and recency
    #[default]
    Weighted,
}

/// Which retrieval channels recall runs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RetrievalMode {
    /// Dense + sparse with fusion
    #[default]
    Hybrid,
    /// Vector search only
    Dense,
    /// BM25 only
    Sparse,
}

/// Result fusion strategy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FusionStrategy {
    /// Reciprocal rank fusion with a fixed constant
    #[default]
    Rrf,
    /// RRF with a query-length-dependent constant and a diversity bonus
    HybridRrf,
    /// α·dense + β·sparse over normalized scores
    Weighted,
    /// λ·dense + (1−λ)·sparse, both min-max normalized
    Convex,
    /// Positional interleaving by ratio
    Interleave,
    /// w_d/rank_d + w_s/rank_s with a both-lists bonus
    RankFusion,
    /// Borda count over list positions
    ScoreFusion,
    /// Sparse candidate set re-ranked by dense similarity
    Cascade,
    /// Classifier-selected strategy per query
    Adaptive,
}

// ============================================================================
// SECTION CONFIGS
// ============================================================================

/// Session manager settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionManagerConfig {
    /// LRU capacity
    pub max_sessions: usize,
    /// Idle expiry in seconds
    pub session_ttl: u64,
    /// Upper bound on buffered messages per session
    pub max_messages: usize,
}

impl Default for SessionManagerConfig {
    fn default() -> Self {
        Self {
            max_sessions: 1000,
            session_ttl: 3600,
            max_messages: 40,
        }
    }
}

/// Recall engine settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RecallEngineConfig {
    /// Default `k` for recall
    pub top_k: usize,
    /// `similarity` or `weighted`
    pub recall_strategy: RecallStrategy,
    /// `hybrid`, `dense`, or `sparse`
    pub retrieval_mode: RetrievalMode,
    /// Weight on the fused similarity score
    pub similarity_weight: f64,
    /// Weight on stored importance
    pub importance_weight: f64,
    /// Weight on the recency term
    pub recency_weight: f64,
    /// Recency time constant τ in days
    pub recency_tau_days: f64,
    /// Per-call deadline in seconds
    pub deadline_secs: u64,
}

impl Default for RecallEngineConfig {
    fn default() -> Self {
        Self {
            top_k: 5,
            recall_strategy: RecallStrategy::Weighted,
            retrieval_mode: RetrievalMode::Hybrid,
            similarity_weight: 0.6,
            importance_weight: 0.2,
            recency_weight: 0.2,
            recency_tau_days: 30.0,
            deadline_secs: 10,
        }
    }
}

impl RecallEngineConfig {
    /// Sum of the three scorer weights.
    pub fn weight_sum(&self) -> f64 {
        self.similarity_weight + self.importance_weight + self.recency_weight
    }
}

/// Reflection engine settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReflectionEngineConfig {
    /// Rounds of dialogue that trigger a reflection
    pub summary_trigger_rounds: u32,
    /// Minimum importance an event needs to be persisted
    pub importance_threshold: f64,
    /// Override for the extraction prompt (`{dialogue}` placeholder)
    pub event_extraction_prompt: Option<String>,
    /// Override for the scoring prompt (`{events}` placeholder)
    pub evaluation_prompt: Option<String>,
    /// Retries for extraction and scoring calls
    pub max_retries: u32,
    /// Per-call deadline in seconds
    pub deadline_secs: u64,
}

impl Default for ReflectionEngineConfig {
    fn default() -> Self {
        Self {
            summary_trigger_rounds: 10,
            importance_threshold: 0.5,
            event_extraction_prompt: None,
            evaluation_prompt: None,
            max_retries: 3,
            deadline_secs: 60,
        }
    }
}

/// Forgetting agent settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ForgettingAgentConfig {
    /// Toggle the periodic pass
    pub enabled: bool,
    /// Period between passes, hours
    pub check_interval_hours: f64,
    /// Minimum age before a memory is eligible, days
    pub retention_days: f64,
    /// Per-day multiplicative decay
    pub importance_decay_rate: f64,
    /// Decayed-importance eligibility floor
    pub importance_threshold: f64,
    /// Scan page size
    pub forgetting_batch_size: usize,
    /// Nuke countdown in seconds
    pub nuke_delay_secs: f64,
    /// Tombstones older than this many days are compacted after a pass
    pub tombstone_retention_days: f64,
}

impl Default for ForgettingAgentConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            check_interval_hours: 24.0,
            retention_days: 90.0,
            importance_decay_rate: 0.005,
            importance_threshold: 0.1,
            forgetting_batch_size: 200,
            nuke_delay_secs: 30.0,
            tombstone_retention_days: 7.0,
        }
    }
}

/// Result fusion settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FusionConfig {
    /// Strategy to apply
    pub strategy: FusionStrategy,
    /// RRF constant
    pub rrf_k: f64,
    /// α weight on dense scores
    pub dense_weight: f64,
    /// β weight on sparse scores
    pub sparse_weight: f64,
    /// λ for the convex strategy
    pub convex_lambda: f64,
    /// Dense share for the interleave strategy
    pub interleave_ratio: f64,
    /// Both-lists bonus for rank fusion
    pub rank_bias_factor: f64,
    /// Single-list bonus for hybrid RRF
    pub diversity_bonus: f64,
}

impl Default for FusionConfig {
    fn default() -> Self {
        Self {
            strategy: FusionStrategy::Rrf,
            rrf_k: 60.0,
            dense_weight: 0.7,
            sparse_weight: 0.3,
            convex_lambda: 0.5,
            interleave_ratio: 0.5,
            rank_bias_factor: 0.1,
            diversity_bonus: 0.05,
        }
    }
}

/// Sparse retriever settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SparseRetrieverConfig {
    /// Toggle the sparse channel
    pub enabled: bool,
    /// BM25 term-frequency saturation
    pub bm25_k1: f64,
    /// BM25 length normalization
    pub bm25_b: f64,
    /// Use the jieba segmenter when the feature is compiled in
    pub use_word_segmentation: bool,
}

impl Default for SparseRetrieverConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            bm25_k1: 1.2,
            bm25_b: 0.75,
            use_word_segmentation: false,
        }
    }
}

/// Recall/reflection isolation policy
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct FilteringSettings {
    /// Restrict recall/reflection to the matching persona (or shared rows)
    pub use_persona_filtering: bool,
    /// Restrict recall/reflection to the matching session (or global rows)
    pub use_session_filtering: bool,
}

// ============================================================================
// ENGINE CONFIG
// ============================================================================

/// Top-level engine configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Timezone used when formatting timestamps for display, e.g. "UTC"
    /// or a fixed offset like "+08:00"
    pub timezone: Timezone,
    /// Session manager section
    pub session_manager: SessionManagerConfig,
    /// Recall engine section
    pub recall_engine: RecallEngineConfig,
    /// Reflection engine section
    pub reflection_engine: ReflectionEngineConfig,
    /// Forgetting agent section
    pub forgetting_agent: ForgettingAgentConfig,
    /// Fusion section
    pub fusion: FusionConfig,
    /// Sparse retriever section
    pub sparse_retriever: SparseRetrieverConfig,
    /// Isolation policy section
    pub filtering_settings: FilteringSettings,
}

/// Display timezone: UTC or a fixed offset.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Timezone(pub String);

impl Default for Timezone {
    fn default() -> Self {
        Self("UTC".to_string())
    }
}

impl Timezone {
    /// Parse into a chrono fixed offset. "UTC" and empty map to +00:00.
    pub fn fixed_offset(&self) -> Result<chrono::FixedOffset> {
        let s = self.0.trim();
        if s.is_empty() || s.eq_ignore_ascii_case("utc") {
            // SAFETY: a zero offset is always in range
            return Ok(chrono::FixedOffset::east_opt(0).expect("zero offset is valid"));
        }
        s.parse::<chrono::FixedOffset>()
            .map_err(|e| MemoryError::ConfigInvalid(format!("timezone `{s}`: {e}")))
    }
}

impl EngineConfig {
    /// Build from a JSON object, warning on unrecognized keys.
    pub fn from_json_value(value: serde_json::Value) -> Result<Self> {
        warn_unknown_keys(&value);
        let config: EngineConfig = serde_json::from_value(value)
            .map_err(|e| MemoryError::ConfigInvalid(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Reject out-of-range settings. Called once at engine startup.
    pub fn validate(&self) -> Result<()> {
        fn unit(name: &str, v: f64) -> Result<()> {
            if !(0.0..=1.0).contains(&v) {
                return Err(MemoryError::ConfigInvalid(format!(
                    "{name} must be in [0, 1], got {v}"
                )));
            }
            Ok(())
        }

        self.timezone.fixed_offset()?;

        if self.session_manager.max_sessions == 0 {
            return Err(MemoryError::ConfigInvalid(
                "session_manager.max_sessions must be > 0".into(),
            ));
        }
        if self.recall_engine.top_k == 0 {
            return Err(MemoryError::ConfigInvalid(
                "recall_engine.top_k must be > 0".into(),
            ));
        }
        for (name, v) in [
            ("recall_engine.similarity_weight", self.recall_engine.similarity_weight),
            ("recall_engine.importance_weight", self.recall_engine.importance_weight),
            ("recall_engine.recency_weight", self.recall_engine.recency_weight),
            ("reflection_engine.importance_threshold", self.reflection_engine.importance_threshold),
            ("forgetting_agent.importance_decay_rate", self.forgetting_agent.importance_decay_rate),
            ("forgetting_agent.importance_threshold", self.forgetting_agent.importance_threshold),
            ("fusion.convex_lambda", self.fusion.convex_lambda),
            ("fusion.interleave_ratio", self.fusion.interleave_ratio),
        ] {
            unit(name, v)?;
        }
        if self.recall_engine.recency_tau_days <= 0.0 {
            return Err(MemoryError::ConfigInvalid(
                "recall_engine.recency_tau_days must be > 0".into(),
            ));
        }
        if self.reflection_engine.summary_trigger_rounds == 0 {
            return Err(MemoryError::ConfigInvalid(
                "reflection_engine.summary_trigger_rounds must be > 0".into(),
            ));
        }
        if self.forgetting_agent.forgetting_batch_size == 0 {
            return Err(MemoryError::ConfigInvalid(
                "forgetting_agent.forgetting_batch_size must be > 0".into(),
            ));
        }
        if self.fusion.rrf_k <= 0.0 {
            return Err(MemoryError::ConfigInvalid(
                "fusion.rrf_k must be > 0".into(),
            ));
        }
        if self.sparse_retriever.bm25_k1 < 0.0 || !(0.0..=1.0).contains(&self.sparse_retriever.bm25_b) {
            return Err(MemoryError::ConfigInvalid(
                "sparse_retriever.bm25_k1 must be >= 0 and bm25_b in [0, 1]".into(),
            ));
        }

        let sum = self.recall_engine.weight_sum();
        if (sum - 1.0).abs() > 0.01 {
            // The scorer does not renormalize; flag the drift once at startup.
            warn!(weight_sum = sum, "recall weights do not sum to 1");
        }

        Ok(())
    }
}

/// Warn about keys the engine does not recognize, one level per section.
fn warn_unknown_keys(value: &serde_json::Value) {
    const TOP: &[&str] = &[
        "timezone",
        "session_manager",
        "recall_engine",
        "reflection_engine",
        "forgetting_agent",
        "fusion",
        "sparse_retriever",
        "filtering_settings",
    ];
    const SECTIONS: &[(&str, &[&str])] = &[
        ("session_manager", &["max_sessions", "session_ttl", "max_messages"]),
        (
            "recall_engine",
            &[
                "top_k",
                "recall_strategy",
                "retrieval_mode",
                "similarity_weight",
                "importance_weight",
                "recency_weight",
                "recency_tau_days",
                "deadline_secs",
            ],
        ),
        (
            "reflection_engine",
            &[
                "summary_trigger_rounds",
                "importance_threshold",
                "event_extraction_prompt",
                "evaluation_prompt",
                "max_retries",
                "deadline_secs",
            ],
        ),
        (
            "forgetting_agent",
            &[
                "enabled",
                "check_interval_hours",
                "retention_days",
                "importance_decay_rate",
                "importance_threshold",
                "forgetting_batch_size",
                "nuke_delay_secs",
                "tombstone_retention_days",
            ],
        ),
        (
            "fusion",
            &[
                "strategy",
                "rrf_k",
                "dense_weight",
                "sparse_weight",
                "convex_lambda",
                "interleave_ratio",
                "rank_bias_factor",
                "diversity_bonus",
            ],
        ),
        (
            "sparse_retriever",
            &["enabled", "bm25_k1", "bm25_b", "use_word_segmentation"],
        ),
        (
            "filtering_settings",
            &["use_persona_filtering", "use_session_filtering"],
        ),
    ];

    let Some(map) = value.as_object() else {
        return;
    };
    for key in map.keys() {
        if !TOP.contains(&key.as_str()) {
            warn!(key = %key, "unknown configuration key ignored");
        }
    }
    for (section, known) in SECTIONS {
        if let Some(serde_json::Value::Object(section_map)) = map.get(*section) {
            for key in section_map.keys() {
                if !known.contains(&key.as_str()) {
                    warn!(key = %format!("{section}.{key}"), "unknown configuration key ignored");
                }
            }
        }
    }
}

// ============================================================================
// TESTS
// ============================================================================
