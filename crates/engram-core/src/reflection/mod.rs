//! Reflection engine
//!
//! Turns a rolling dialogue window into typed, importance-scored memories:
//! extraction through the language model, validation with fingerprint dedup,
//! batched importance scoring, threshold filter, then embed + commit.
//!
//! Idempotent by construction: re-reflecting the same window produces zero
//! new memories because every event's normalized-content hash is checked
//! against the session's active memories before commit. Concurrent
//! reflections for one session serialize on a per-session mutex.

mod prompts;

pub use prompts::{render, DEFAULT_EVALUATION_PROMPT, DEFAULT_EXTRACTION_PROMPT};

use std::collections::{HashMap, HashSet};
use std::fmt::Write as _;
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use serde::Deserialize;
use sha2::{Digest, Sha256};
use tokio::time::timeout;
use tracing::{debug, info, warn};

use crate::config::ReflectionEngineConfig;
use crate::error::{MemoryError, Result};
use crate::memory::{DialogueMessage, EventType, MemoryDraft};
use crate::providers::{CompletionParams, EmbeddingProvider, LanguageModelProvider};
use crate::sparse::SparseIndex;
use crate::storage::MemoryStore;

// ============================================================================
// TYPES
// ============================================================================

/// Result of one reflection
#[derive(Debug, Clone, Default)]
pub struct ReflectionOutcome {
    /// Doc ids committed this call
    pub stored_ids: Vec<i64>,
    /// Candidates dropped by validation, dedup, or the importance filter
    pub skipped: usize,
}

/// Candidate event as extracted, before validation
#[derive(Debug, Deserialize)]
struct RawEvent {
    content: String,
    event_type: String,
}

/// Validated event awaiting scoring
struct CandidateEvent {
    content: String,
    event_type: EventType,
    fingerprint: String,
}

// ============================================================================
// REFLECTION ENGINE
// ============================================================================

/// Dialogue-window distiller.
pub struct ReflectionEngine {
    store: Arc<MemoryStore>,
    sparse: Arc<RwLock<SparseIndex>>,
    embedder: Arc<dyn EmbeddingProvider>,
    lm: Arc<dyn LanguageModelProvider>,
    config: ReflectionEngineConfig,
    session_locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl ReflectionEngine {
    /// Build a reflection engine over shared storage and the sparse index.
    pub fn new(
        store: Arc<MemoryStore>,
        sparse: Arc<RwLock<SparseIndex>>,
        embedder: Arc<dyn EmbeddingProvider>,
        lm: Arc<dyn LanguageModelProvider>,
        config: ReflectionEngineConfig,
    ) -> Self {
        Self {
            store,
            sparse,
            embedder,
            lm,
            config,
            session_locks: Mutex::new(HashMap::new()),
        }
    }

    /// Rounds of dialogue that trigger a reflection.
    pub fn trigger_rounds(&self) -> u32 {
        self.config.summary_trigger_rounds
    }

    /// Extract, validate, score, and persist memories from a dialogue window.
    ///
    /// Extraction failure is fatal for the call (no partial commit); a
    /// scoring failure alone discards the batch and reports it as skipped.
    pub async fn reflect_and_store(
        &self,
        window: &[DialogueMessage],
        session_id: &str,
        persona_id: Option<&str>,
        persona_prompt: Option<&str>,
    ) -> Result<ReflectionOutcome> {
        if window.is_empty() {
            return Ok(ReflectionOutcome::default());
        }

        // Serialize reflections per session
        let lock = self.session_lock(session_id);
        let _guard = lock.lock().await;

        // 1. Extraction
        let dialogue = format_dialogue(window);
        let raw_events = self.extract_events(&dialogue, persona_prompt).await?;
        if raw_events.is_empty() {
            debug!(session = session_id, "reflection extracted nothing");
            return Ok(ReflectionOutcome::default());
        }
        let extracted = raw_events.len();

        // 2. Validation + dedup
        let candidates = self.validate_events(raw_events, session_id)?;
        if candidates.is_empty() {
            return Ok(ReflectionOutcome {
                stored_ids: vec![],
                skipped: extracted,
            });
        }

        // 3. Scoring; a failure here discards the batch
        let scores = match self.score_events(&candidates).await {
            Ok(scores) => scores,
            Err(e) => {
                warn!(error = %e, session = session_id, "scoring failed; batch discarded");
                return Ok(ReflectionOutcome {
                    stored_ids: vec![],
                    skipped: extracted,
                });
            }
        };

        // 4. Importance filter
        let survivors: Vec<(CandidateEvent, f64)> = candidates
            .into_iter()
            .zip(scores)
            .filter(|(_, score)| *score >= self.config.importance_threshold)
            .collect();
        if survivors.is_empty() {
            return Ok(ReflectionOutcome {
                stored_ids: vec![],
                skipped: extracted,
            });
        }

        // 5. Commit: embed the batch, insert rows, feed the sparse index
        let contents: Vec<String> = survivors.iter().map(|(c, _)| c.content.clone()).collect();
        let embeddings = self
            .embedder
            .embed(&contents)
            .await
            .map_err(MemoryError::ProviderUnavailable)?;
        if embeddings.len() != survivors.len() {
            return Err(MemoryError::ProviderMalformedOutput(format!(
                "embedding batch returned {} vectors for {} texts",
                embeddings.len(),
                survivors.len()
            )));
        }

        let now = crate::clock::now_unix();
        let mut stored_ids = Vec::with_capacity(survivors.len());
        for ((candidate, importance), embedding) in survivors.into_iter().zip(embeddings) {
            let mut draft = MemoryDraft::new(candidate.content.clone(), candidate.event_type, importance);
            draft.session_id = Some(session_id.to_string());
            draft.persona_id = persona_id.map(str::to_string);
            draft.fingerprint = Some(candidate.fingerprint);

            let doc_id = self.store.insert(&draft, &embedding, now)?;
            self.sparse
                .write()
                .map_err(|_| MemoryError::StorageCorrupted("sparse index lock poisoned".into()))?
                .add(doc_id, &candidate.content);
            stored_ids.push(doc_id);
        }

        info!(
            session = session_id,
            stored = stored_ids.len(),
            skipped = extracted - stored_ids.len(),
            "reflection committed"
        );
        Ok(ReflectionOutcome {
            skipped: extracted - stored_ids.len(),
            stored_ids,
        })
    }

    fn session_lock(&self, session_id: &str) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self
            .session_locks
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        Arc::clone(
            locks
                .entry(session_id.to_string())
                .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(()))),
        )
    }

    /// Extraction call with bounded retries and exponential backoff.
    async fn extract_events(
        &self,
        dialogue: &str,
        persona_prompt: Option<&str>,
    ) -> Result<Vec<RawEvent>> {
        let template = self
            .config
            .event_extraction_prompt
            .as_deref()
            .unwrap_or(DEFAULT_EXTRACTION_PROMPT);
        let mut prompt = render(template, "dialogue", dialogue);
        if let Some(persona) = persona_prompt {
            prompt = format!("{persona}\n\n{prompt}");
        }

        self.with_retries("extraction", || async {
            let text = self.complete(&prompt).await?;
            parse_events(&text)
        })
        .await
    }

    /// Batched scoring call with bounded retries.
    async fn score_events(&self, candidates: &[CandidateEvent]) -> Result<Vec<f64>> {
        let template = self
            .config
            .evaluation_prompt
            .as_deref()
            .unwrap_or(DEFAULT_EVALUATION_PROMPT);
        let mut events = String::new();
        for (i, candidate) in candidates.iter().enumerate() {
            let _ = writeln!(events, "{}. {}", i + 1, candidate.content);
        }
        let prompt = render(template, "events", events.trim_end());

        self.with_retries("scoring", || async {
            let text = self.complete(&prompt).await?;
            parse_scores(&text, candidates.len())
        })
        .await
    }

    async fn complete(&self, prompt: &str) -> Result<String> {
        let deadline = Duration::from_secs(self.config.deadline_secs);
        let params = CompletionParams {
            timeout: deadline,
            ..Default::default()
        };
        match timeout(deadline, self.lm.complete(prompt, None, &params)).await {
            Ok(Ok(text)) => Ok(text),
            Ok(Err(e)) => Err(MemoryError::ProviderUnavailable(e)),
            Err(_) => Err(MemoryError::DeadlineExceeded),
        }
    }

    async fn with_retries<T, F, Fut>(&self, what: &str, mut call: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut attempt = 0u32;
        loop {
            match call().await {
                Ok(value) => return Ok(value),
                Err(e) if e.is_transient() && attempt < self.config.max_retries => {
                    attempt += 1;
                    let backoff = Duration::from_millis(250 * (1u64 << attempt.min(6)));
                    warn!(error = %e, attempt, "{what} failed; retrying");
                    tokio::time::sleep(backoff).await;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Drop empty contents, unknown event types, and duplicates (within the
    /// batch and against the session's active memories).
    fn validate_events(&self, raw: Vec<RawEvent>, session_id: &str) -> Result<Vec<CandidateEvent>> {
        let mut seen: HashSet<String> = HashSet::new();
        let mut candidates = Vec::with_capacity(raw.len());

        for event in raw {
            let content = event.content.trim();
            if content.is_empty() {
                continue;
            }
            let Some(event_type) = EventType::parse_name(&event.event_type) else {
                debug!(event_type = %event.event_type, "unknown event type dropped");
                continue;
            };
            let fingerprint = fingerprint(content);
            // Keep the first occurrence within the batch
            if !seen.insert(fingerprint.clone()) {
                continue;
            }
            if self
                .store
                .find_active_fingerprint(Some(session_id), &fingerprint)?
                .is_some()
            {
                debug!("duplicate of existing session memory dropped");
                continue;
            }
            candidates.push(CandidateEvent {
                content: content.to_string(),
                event_type,
                fingerprint,
            });
        }
        Ok(candidates)
    }
}

// ============================================================================
// PARSING
// ============================================================================

/// Render a window as `role: content` lines.
fn format_dialogue(window: &[DialogueMessage]) -> String {
    let mut out = String::new();
    for message in window {
        let _ = writeln!(out, "{}: {}", message.role, message.content);
    }
    out.trim_end().to_string()
}

/// The outermost JSON array in a completion, fences and prose stripped.
fn extract_json_array(text: &str) -> Option<&str> {
    let start = text.find('[')?;
    let end = text.rfind(']')?;
    (end > start).then(|| &text[start..=end])
}

fn parse_events(text: &str) -> Result<Vec<RawEvent>> {
    let payload = extract_json_array(text).ok_or_else(|| {
        MemoryError::ProviderMalformedOutput("no JSON array in extraction output".into())
    })?;
    serde_json::from_str(payload)
        .map_err(|e| MemoryError::ProviderMalformedOutput(format!("extraction parse: {e}")))
}

fn parse_scores(text: &str, expected: usize) -> Result<Vec<f64>> {
    let payload = extract_json_array(text).ok_or_else(|| {
        MemoryError::ProviderMalformedOutput("no JSON array in scoring output".into())
    })?;
    let scores: Vec<f64> = serde_json::from_str(payload)
        .map_err(|e| MemoryError::ProviderMalformedOutput(format!("scoring parse: {e}")))?;
    if scores.len() != expected {
        return Err(MemoryError::ProviderMalformedOutput(format!(
            "{} scores for {expected} events",
            scores.len()
        )));
    }
    Ok(scores.into_iter().map(|s| s.clamp(0.0, 1.0)).collect())
}

/// SHA-256 over lowercased, whitespace-collapsed content.
pub fn fingerprint(content: &str) -> String {
    let normalized: String = content
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase();
    let digest = Sha256::digest(normalized.as_bytes());
    let mut hex = String::with_capacity(64);
    for byte in digest {
        let _ = write!(hex, "{byte:02x}");
    }
    hex
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SparseRetrieverConfig;
    use crate::memory::Role;
    use async_trait::async_trait;
    use std::collections::VecDeque;

    const DIMS: usize = 8;

    struct StubEmbedder;

    #[async_trait]
    impl EmbeddingProvider for StubEmbedder {
        async fn embed(
            &self,
            texts: &[String],
        ) -> std::result::Result<Vec<Vec<f32>>, crate::error::ProviderError> {
            Ok(texts
                .iter()
                .map(|t| {
                    let mut v = vec![0.0f32; DIMS];
                    let mut h: usize = 7;
                    for b in t.bytes() {
                        h = h.wrapping_mul(31).wrapping_add(b as usize);
                    }
                    v[h % DIMS] = 1.0;
                    v
                })
                .collect())
        }

        fn dimensions(&self) -> usize {
            DIMS
        }
    }

    /// Language model with a scripted response queue. An empty queue fails
    /// the call, which exercises the retry/fatal paths.
    struct ScriptedLm {
        responses: Mutex<VecDeque<String>>,
        calls: Mutex<Vec<String>>,
    }

    impl ScriptedLm {
        fn new(responses: &[&str]) -> Arc<Self> {
            Arc::new(Self {
                responses: Mutex::new(responses.iter().map(|s| s.to_string()).collect()),
                calls: Mutex::new(vec![]),
            })
        }
    }

    #[async_trait]
    impl LanguageModelProvider for ScriptedLm {
        async fn complete(
            &self,
            prompt: &str,
            _system_prompt: Option<&str>,
            _params: &CompletionParams,
        ) -> std::result::Result<String, crate::error::ProviderError> {
            self.calls.lock().unwrap().push(prompt.to_string());
            self.responses
                .lock()
                .unwrap()
                .pop_front()
                .ok_or_else(|| "scripted responses exhausted".into())
        }
    }

    struct Fixture {
        _dir: tempfile::TempDir,
        store: Arc<MemoryStore>,
        sparse: Arc<RwLock<SparseIndex>>,
    }

    fn fixture() -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let store =
            Arc::new(MemoryStore::open(Some(dir.path().join("test.db")), DIMS).unwrap());
        let sparse = Arc::new(RwLock::new(SparseIndex::new(
            &SparseRetrieverConfig::default(),
        )));
        Fixture {
            _dir: dir,
            store,
            sparse,
        }
    }

    fn engine(fixture: &Fixture, lm: Arc<ScriptedLm>) -> ReflectionEngine {
        let config = ReflectionEngineConfig {
            max_retries: 1,
            ..Default::default()
        };
        ReflectionEngine::new(
            Arc::clone(&fixture.store),
            Arc::clone(&fixture.sparse),
            Arc::new(StubEmbedder),
            lm,
            config,
        )
    }

    fn jazz_window() -> Vec<DialogueMessage> {
        vec![
            DialogueMessage::new(Role::User, "I love jazz", 100),
            DialogueMessage::new(Role::Assistant, "Noted - jazz lover.", 101),
        ]
    }

    const JAZZ_EXTRACTION: &str =
        r#"[{"content": "The user loves jazz", "event_type": "preference"}]"#;

    #[tokio::test]
    async fn test_reflection_stores_event() {
        let fx = fixture();
        let lm = ScriptedLm::new(&[JAZZ_EXTRACTION, "[0.8]"]);
        let engine = engine(&fx, lm);

        let outcome = engine
            .reflect_and_store(&jazz_window(), "s1", None, None)
            .await
            .unwrap();
        assert_eq!(outcome.stored_ids.len(), 1);
        assert_eq!(outcome.skipped, 0);

        let record = fx.store.get(outcome.stored_ids[0]).unwrap().unwrap();
        assert_eq!(record.event_type, EventType::Preference);
        assert!(record.content.contains("jazz"));
        assert_eq!(record.session_id.as_deref(), Some("s1"));
        assert!((record.importance - 0.8).abs() < 1e-9);
        // Committed memory is searchable through the sparse index
        assert_eq!(
            fx.sparse.read().unwrap().search("jazz", 5)[0].0,
            outcome.stored_ids[0]
        );
    }

    #[tokio::test]
    async fn test_reflection_is_idempotent() {
        let fx = fixture();
        let lm = ScriptedLm::new(&[JAZZ_EXTRACTION, "[0.8]", JAZZ_EXTRACTION]);
        let engine = engine(&fx, lm);

        let first = engine
            .reflect_and_store(&jazz_window(), "s1", None, None)
            .await
            .unwrap();
        assert_eq!(first.stored_ids.len(), 1);

        // Same window again: the duplicate is dropped before scoring, so
        // only the extraction response is consumed
        let second = engine
            .reflect_and_store(&jazz_window(), "s1", None, None)
            .await
            .unwrap();
        assert!(second.stored_ids.is_empty());
        assert_eq!(second.skipped, 1);
        assert_eq!(fx.store.count_by_status().unwrap().active, 1);
    }

    #[tokio::test]
    async fn test_validation_drops_bad_events() {
        let fx = fixture();
        let extraction = r#"[
            {"content": "", "event_type": "fact"},
            {"content": "The user plays piano", "event_type": "hobby"},
            {"content": "The user plays piano", "event_type": "fact"},
            {"content": "the user   plays PIANO", "event_type": "fact"}
        ]"#;
        let lm = ScriptedLm::new(&[extraction, "[0.9]"]);
        let engine = engine(&fx, lm);

        let outcome = engine
            .reflect_and_store(&jazz_window(), "s1", None, None)
            .await
            .unwrap();
        // Empty content, unknown type, and the normalized duplicate all drop
        assert_eq!(outcome.stored_ids.len(), 1);
        assert_eq!(outcome.skipped, 3);
    }

    #[tokio::test]
    async fn test_importance_threshold_filters() {
        let fx = fixture();
        let extraction = r#"[
            {"content": "The user likes water", "event_type": "preference"},
            {"content": "The user is a surgeon", "event_type": "fact"}
        ]"#;
        let lm = ScriptedLm::new(&[extraction, "[0.2, 0.9]"]);
        let engine = engine(&fx, lm);

        let outcome = engine
            .reflect_and_store(&jazz_window(), "s1", None, None)
            .await
            .unwrap();
        assert_eq!(outcome.stored_ids.len(), 1);
        assert_eq!(outcome.skipped, 1);
        let record = fx.store.get(outcome.stored_ids[0]).unwrap().unwrap();
        assert!(record.content.contains("surgeon"));
    }

    #[tokio::test]
    async fn test_extraction_retries_then_fails() {
        let fx = fixture();
        // Malformed, then exhausted: with max_retries = 1 the call is fatal
        let lm = ScriptedLm::new(&["not json at all"]);
        let engine = engine(&fx, lm);

        let result = engine
            .reflect_and_store(&jazz_window(), "s1", None, None)
            .await;
        assert!(result.is_err());
        assert_eq!(fx.store.count_by_status().unwrap().active, 0);
    }

    #[tokio::test]
    async fn test_malformed_then_recovered_extraction() {
        let fx = fixture();
        let lm = ScriptedLm::new(&["oops", JAZZ_EXTRACTION, "[0.7]"]);
        let engine = engine(&fx, lm);

        let outcome = engine
            .reflect_and_store(&jazz_window(), "s1", None, None)
            .await
            .unwrap();
        assert_eq!(outcome.stored_ids.len(), 1);
    }

    #[tokio::test]
    async fn test_scoring_failure_discards_batch() {
        let fx = fixture();
        // Extraction succeeds; both scoring attempts return garbage
        let lm = ScriptedLm::new(&[JAZZ_EXTRACTION, "no scores", "still no scores"]);
        let engine = engine(&fx, lm);

        let outcome = engine
            .reflect_and_store(&jazz_window(), "s1", None, None)
            .await
            .unwrap();
        assert!(outcome.stored_ids.is_empty());
        assert_eq!(outcome.skipped, 1);
        assert_eq!(fx.store.count_by_status().unwrap().active, 0);
    }

    #[tokio::test]
    async fn test_score_count_mismatch_is_malformed() {
        let fx = fixture();
        let lm = ScriptedLm::new(&[JAZZ_EXTRACTION, "[0.8, 0.9]", "[0.8]"]);
        let engine = engine(&fx, lm);

        // First scoring reply has the wrong arity; the retry recovers
        let outcome = engine
            .reflect_and_store(&jazz_window(), "s1", None, None)
            .await
            .unwrap();
        assert_eq!(outcome.stored_ids.len(), 1);
    }

    #[tokio::test]
    async fn test_persona_prompt_is_prepended() {
        let fx = fixture();
        let lm = ScriptedLm::new(&[JAZZ_EXTRACTION, "[0.8]"]);
        let engine = engine(&fx, Arc::clone(&lm));

        engine
            .reflect_and_store(&jazz_window(), "s1", None, Some("You are Ada."))
            .await
            .unwrap();
        let calls = lm.calls.lock().unwrap();
        assert!(calls[0].starts_with("You are Ada."));
    }

    #[tokio::test]
    async fn test_fenced_json_parses() {
        let events = parse_events("```json\n[{\"content\": \"x\", \"event_type\": \"fact\"}]\n```").unwrap();
        assert_eq!(events.len(), 1);

        let scores = parse_scores("Here you go: [0.5, 1.7, -0.2]", 3).unwrap();
        assert_eq!(scores, vec![0.5, 1.0, 0.0]);
    }

    #[test]
    fn test_fingerprint_normalizes() {
        assert_eq!(fingerprint("The  User LIKES tea"), fingerprint("the user likes tea"));
        assert_ne!(fingerprint("likes tea"), fingerprint("likes coffee"));
    }

    #[test]
    fn test_format_dialogue() {
        let text = format_dialogue(&jazz_window());
        assert_eq!(text, "user: I love jazz\nassistant: Noted - jazz lover.");
    }
}
