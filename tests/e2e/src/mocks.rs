//! Deterministic provider mocks.
//!
//! The embedder maps a few topic words onto fixed axes so semantically
//! "related" texts land near each other, and hashes everything else onto a
//! stable direction. The language model replays a scripted response queue;
//! an exhausted queue fails the call, which exercises retry paths.

use std::collections::VecDeque;
use std::sync::Mutex;

use async_trait::async_trait;
use engram_core::{CompletionParams, EmbeddingProvider, LanguageModelProvider, ProviderError};

/// Embedding dimension used across the scenarios
pub const DIMS: usize = 16;

// ============================================================================
// MOCK EMBEDDER
// ============================================================================

/// Topic words sharing an axis: (axis, words)
const TOPICS: &[(usize, &[&str])] = &[
    (0, &["tea", "drink", "drinks", "beverage"]),
    (1, &["jazz", "music", "concert"]),
    (2, &["code", "rust", "program"]),
];

/// Hash-derived deterministic embedder.
#[derive(Debug, Default)]
pub struct MockEmbedder;

/// Embed one text the way the mock does; exposed so tests can seed storage
/// directly with vectors the retriever will reproduce.
pub fn embed_text(text: &str) -> Vec<f32> {
    let lower = text.to_lowercase();
    let mut v = vec![0.0f32; DIMS];

    let mut hit = false;
    for (axis, words) in TOPICS {
        if words.iter().any(|w| lower.contains(w)) {
            v[*axis] = 1.0;
            hit = true;
        }
    }
    if !hit {
        let mut h: usize = 7;
        for b in lower.bytes() {
            h = h.wrapping_mul(31).wrapping_add(b as usize);
        }
        v[TOPICS.len() + h % (DIMS - TOPICS.len())] = 1.0;
    }

    // Unit-normalize so cosine stays well-behaved with multiple topic hits
    let norm = v.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        for x in &mut v {
            *x /= norm;
        }
    }
    v
}

#[async_trait]
impl EmbeddingProvider for MockEmbedder {
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, ProviderError> {
        Ok(texts.iter().map(|t| embed_text(t)).collect())
    }

    fn dimensions(&self) -> usize {
        DIMS
    }
}

// ============================================================================
// SCRIPTED LANGUAGE MODEL
// ============================================================================

/// Language model replaying a fixed response queue.
pub struct ScriptedLm {
    responses: Mutex<VecDeque<String>>,
}

impl ScriptedLm {
    /// Queue up responses in call order.
    pub fn new(responses: &[&str]) -> Self {
        Self {
            responses: Mutex::new(responses.iter().map(|s| s.to_string()).collect()),
        }
    }

    /// Responses not yet consumed.
    pub fn remaining(&self) -> usize {
        self.responses.lock().unwrap().len()
    }
}

#[async_trait]
impl LanguageModelProvider for ScriptedLm {
    async fn complete(
        &self,
        _prompt: &str,
        _system_prompt: Option<&str>,
        _params: &CompletionParams,
    ) -> Result<String, ProviderError> {
        self.responses
            .lock()
            .unwrap()
            .pop_front()
            .ok_or_else(|| "scripted responses exhausted".into())
    }
}
