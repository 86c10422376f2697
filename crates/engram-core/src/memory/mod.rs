//! Memory module - core types and data structures
//!
//! Implements the engine's data model:
//! - Memory records with typed events, importance, and access bookkeeping
//! - Lifecycle status (`active`, `archived`, `deleted`)
//! - Metadata filters AND-combined over optional predicates
//! - Recall hit shapes with per-component scores
//! - Dialogue messages buffered by the session manager

mod record;

pub use record::{EventType, MemoryDraft, MemoryFilter, MemoryPatch, MemoryRecord, MemoryStatus};

use serde::{Deserialize, Serialize};

// ============================================================================
// DIALOGUE
// ============================================================================

/// Who produced a dialogue message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// The human side of the conversation
    User,
    /// The agent side of the conversation
    Assistant,
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Role::User => write!(f, "user"),
            Role::Assistant => write!(f, "assistant"),
        }
    }
}

/// One buffered dialogue message
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DialogueMessage {
    /// Speaker
    pub role: Role,
    /// Message text
    pub content: String,
    /// Unix seconds
    pub timestamp: i64,
}

impl DialogueMessage {
    /// Create a message stamped at `timestamp`.
    pub fn new(role: Role, content: impl Into<String>, timestamp: i64) -> Self {
        Self {
            role,
            content: content.into(),
            timestamp,
        }
    }
}

// ============================================================================
// RECALL OUTPUT
// ============================================================================

/// Per-channel scores contributing to a recall hit
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ComponentScores {
    /// Dense (cosine) similarity in [0, 1], if the dense channel saw the doc
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dense: Option<f64>,
    /// Min-max normalized BM25 score, if the sparse channel saw the doc
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sparse: Option<f64>,
    /// exp(-Δt/τ) recency term, present under the weighted strategy
    #[serde(skip_serializing_if = "Option::is_none")]
    pub recency: Option<f64>,
}

/// One recall result
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecallHit {
    /// Document id
    pub doc_id: i64,
    /// Memory content
    pub content: String,
    /// Typed event tag
    pub event_type: EventType,
    /// Current (undecayed) importance
    pub importance: f64,
    /// Unix seconds of the previous access
    pub last_access_time: i64,
    /// Final ranking score
    pub final_score: f64,
    /// Channel breakdown
    pub component_scores: ComponentScores,
}

// ============================================================================
// STATUS COUNTS
// ============================================================================

/// Counts by lifecycle status
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusCounts {
    /// Retrievable records
    pub active: i64,
    /// Archived records
    pub archived: i64,
    /// Tombstones awaiting compaction
    pub deleted: i64,
}

impl StatusCounts {
    /// Total rows in the document index, tombstones included.
    pub fn total(&self) -> i64 {
        self.active + self.archived + self.deleted
    }
}
