//! Memory record - the fundamental persisted unit
//!
//! Each record carries:
//! - Natural-language content plus a typed event tag
//! - Model-assigned importance that decays over time
//! - Access bookkeeping updated on every recall hit
//! - Session/persona ownership and a lifecycle status

use serde::{Deserialize, Serialize};

// ============================================================================
// EVENT TYPES
// ============================================================================

/// Types of memory events
#[non_exhaustive]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum EventType {
    /// A discrete fact about the user or the world
    Fact,
    /// A stated preference or taste
    Preference,
    /// An intention or objective
    Goal,
    /// An expressed opinion or judgement
    Opinion,
    /// A relationship between people or entities
    Relationship,
    /// Anything that does not fit the other tags
    #[default]
    Other,
}

impl EventType {
    /// Convert to string representation
    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::Fact => "fact",
            EventType::Preference => "preference",
            EventType::Goal => "goal",
            EventType::Opinion => "opinion",
            EventType::Relationship => "relationship",
            EventType::Other => "other",
        }
    }

    /// Parse from string name. Returns `None` for unknown tags so callers
    /// can drop events whose type the model invented.
    pub fn parse_name(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "fact" => Some(EventType::Fact),
            "preference" => Some(EventType::Preference),
            "goal" => Some(EventType::Goal),
            "opinion" => Some(EventType::Opinion),
            "relationship" => Some(EventType::Relationship),
            "other" => Some(EventType::Other),
            _ => None,
        }
    }
}

impl std::fmt::Display for EventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// ============================================================================
// LIFECYCLE STATUS
// ============================================================================

/// Lifecycle status of a memory.
///
/// Only `active` memories are retrievable. `deleted` rows are tombstones kept
/// until compaction; their vectors are removed at deletion time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum MemoryStatus {
    /// Retrievable and indexed
    #[default]
    Active,
    /// Kept with its vector but excluded from recall and forgetting
    Archived,
    /// Tombstoned until compaction
    Deleted,
}

impl MemoryStatus {
    /// Convert to string representation
    pub fn as_str(&self) -> &'static str {
        match self {
            MemoryStatus::Active => "active",
            MemoryStatus::Archived => "archived",
            MemoryStatus::Deleted => "deleted",
        }
    }

    /// Parse from string name
    pub fn parse_name(s: &str) -> Option<Self> {
        match s {
            "active" => Some(MemoryStatus::Active),
            "archived" => Some(MemoryStatus::Archived),
            "deleted" => Some(MemoryStatus::Deleted),
            _ => None,
        }
    }
}

impl std::fmt::Display for MemoryStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// ============================================================================
// MEMORY RECORD
// ============================================================================

/// A persisted memory
///
/// `doc_id` is assigned by storage on insert, strictly increasing, never
/// reused. For every `active` or `archived` record there is exactly one
/// vector at the same `doc_id` in the vector index.
#[non_exhaustive]
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MemoryRecord {
    /// Primary key, monotonic
    pub doc_id: i64,
    /// The memory itself, natural language
    pub content: String,
    /// Typed event tag
    pub event_type: EventType,
    /// Model-assigned salience in [0, 1]; decays over time
    pub importance: f64,
    /// Unix seconds, set on insert, immutable
    pub create_time: i64,
    /// Unix seconds, updated on every recall hit
    pub last_access_time: i64,
    /// Incremented on recall hit
    pub access_count: i64,
    /// Owning session; `None` = global
    pub session_id: Option<String>,
    /// Owning persona; `None` = shared across personas
    pub persona_id: Option<String>,
    /// Lifecycle status
    pub status: MemoryStatus,
    /// Back-reference to the row this record replaced via a content edit
    #[serde(skip_serializing_if = "Option::is_none")]
    pub supersedes: Option<i64>,
    /// Normalized-content hash used for reflection dedup
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fingerprint: Option<String>,
}

impl MemoryRecord {
    /// Age of this memory in fractional days at `now` (unix seconds).
    pub fn age_days(&self, now: i64) -> f64 {
        (now - self.create_time).max(0) as f64 / 86_400.0
    }
}

// ============================================================================
// INPUT TYPES
// ============================================================================

/// Input for persisting a new memory. Storage assigns `doc_id` and the
/// timestamps.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct MemoryDraft {
    /// The content to persist
    pub content: String,
    /// Typed event tag
    #[serde(default)]
    pub event_type: EventType,
    /// Model-assigned salience in [0, 1]
    pub importance: f64,
    /// Owning session
    #[serde(default)]
    pub session_id: Option<String>,
    /// Owning persona
    #[serde(default)]
    pub persona_id: Option<String>,
    /// Normalized-content hash for dedup
    #[serde(default)]
    pub fingerprint: Option<String>,
}

impl MemoryDraft {
    /// Create a draft with the given content and importance.
    pub fn new(content: impl Into<String>, event_type: EventType, importance: f64) -> Self {
        Self {
            content: content.into(),
            event_type,
            importance,
            session_id: None,
            persona_id: None,
            fingerprint: None,
        }
    }
}

/// Patch over the mutable fields of a record.
///
/// `content` and the embedding are deliberately absent: a content edit is
/// modeled as delete + insert with a `supersedes` back-reference.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct MemoryPatch {
    /// New importance in [0, 1]
    #[serde(default)]
    pub importance: Option<f64>,
    /// New last access time (unix seconds)
    #[serde(default)]
    pub last_access_time: Option<i64>,
    /// New access count
    #[serde(default)]
    pub access_count: Option<i64>,
    /// New lifecycle status
    #[serde(default)]
    pub status: Option<MemoryStatus>,
}

impl MemoryPatch {
    /// Whether the patch changes nothing.
    pub fn is_empty(&self) -> bool {
        self.importance.is_none()
            && self.last_access_time.is_none()
            && self.access_count.is_none()
            && self.status.is_none()
    }
}

// ============================================================================
// FILTERS
// ============================================================================

/// AND-combined optional predicates over record metadata.
///
/// `session_id`/`persona_id` predicates also admit records whose owner field
/// is `None`: a null owner means global/shared per the data model.
#[derive(Debug, Clone, Default)]
pub struct MemoryFilter {
    /// Restrict to a lifecycle status
    pub status: Option<MemoryStatus>,
    /// Restrict to a persona (or shared records)
    pub persona_id: Option<String>,
    /// Restrict to a session (or global records)
    pub session_id: Option<String>,
    /// Inclusive create-time range, unix seconds
    pub create_time_range: Option<(i64, i64)>,
    /// Inclusive importance range
    pub importance_range: Option<(f64, f64)>,
}

impl MemoryFilter {
    /// Filter for active records only.
    pub fn active() -> Self {
        Self {
            status: Some(MemoryStatus::Active),
            ..Default::default()
        }
    }

    /// Evaluate the predicate against a record.
    pub fn matches(&self, record: &MemoryRecord) -> bool {
        if let Some(status) = self.status {
            if record.status != status {
                return false;
            }
        }
        if let Some(persona) = &self.persona_id {
            match &record.persona_id {
                Some(p) if p != persona => return false,
                _ => {}
            }
        }
        if let Some(session) = &self.session_id {
            match &record.session_id {
                Some(s) if s != session => return false,
                _ => {}
            }
        }
        if let Some((lo, hi)) = self.create_time_range {
            if record.create_time < lo || record.create_time > hi {
                return false;
            }
        }
        if let Some((lo, hi)) = self.importance_range {
            if record.importance < lo || record.importance > hi {
                return false;
            }
        }
        true
    }
}

// ============================================================================
// TESTS
// ============================================================================
