//! Provider interfaces consumed by the engine.
//!
//! Concrete embedding and language-model backends live in the host; the
//! engine only sees these object-safe traits. The embedding dimension is
//! fixed at startup and validated against storage's vector dimension.

use std::time::Duration;

use async_trait::async_trait;

use crate::error::ProviderError;

// ============================================================================
// COMPLETION PARAMETERS
// ============================================================================

/// Parameters for a language-model completion call
#[derive(Debug, Clone)]
pub struct CompletionParams {
    /// Upper bound on generated tokens, provider-interpreted
    pub max_tokens: Option<u32>,
    /// Sampling temperature
    pub temperature: Option<f32>,
    /// Hard per-call timeout enforced by the caller
    pub timeout: Duration,
}

impl Default for CompletionParams {
    fn default() -> Self {
        Self {
            max_tokens: Some(1024),
            temperature: Some(0.2),
            timeout: Duration::from_secs(30),
        }
    }
}

// ============================================================================
// PROVIDER TRAITS
// ============================================================================

/// Batched text embedding.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Embed a batch of texts. The returned vectors must all have
    /// [`dimensions`](Self::dimensions) entries, one vector per input text,
    /// in input order.
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, ProviderError>;

    /// Fixed output dimension of this provider.
    fn dimensions(&self) -> usize;
}

/// Blocking text completion with a caller-enforced timeout.
///
/// Structured-output parsing is the caller's responsibility; the provider
/// returns raw text.
#[async_trait]
pub trait LanguageModelProvider: Send + Sync {
    /// Run one completion.
    async fn complete(
        &self,
        prompt: &str,
        system_prompt: Option<&str>,
        params: &CompletionParams,
    ) -> Result<String, ProviderError>;
}
