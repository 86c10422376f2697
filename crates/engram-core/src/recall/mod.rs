//! Recall engine
//!
//! Orchestrates dense + sparse retrieval, fusion, and the weighted recall
//! scorer (similarity x importance x recency). Recall never raises to the
//! caller: when a channel fails it degrades to whatever is available, and
//! when everything fails it returns empty with the error attached.

use std::sync::{Arc, RwLock};
use std::time::Duration;

use tokio::time::timeout;
use tracing::{debug, warn};

use crate::config::{FilteringSettings, FusionConfig, RecallEngineConfig, RecallStrategy, RetrievalMode};
use crate::dense::DenseRetriever;
use crate::error::{MemoryError, Result};
use crate::fusion::{fuse, FusedHit, QueryProfile};
use crate::memory::{ComponentScores, MemoryFilter, MemoryStatus, RecallHit};
use crate::sparse::SparseIndex;
use crate::storage::MemoryStore;

// ============================================================================
// OUTCOME
// ============================================================================

/// How a recall deviated from the configured retrieval mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Degradation {
    /// Both channels delivered
    #[default]
    None,
    /// Dense failed; results come from sparse alone
    SparseOnly,
    /// Sparse failed; results come from dense alone
    DenseOnly,
    /// Every channel failed; hits are empty
    Failed,
}

/// Result of one recall
#[derive(Debug, Clone, Default)]
pub struct RecallOutcome {
    /// Ranked hits, best first
    pub hits: Vec<RecallHit>,
    /// Degradation flag
    pub degradation: Degradation,
    /// Error text when `degradation` is not `None`
    pub error: Option<String>,
}

// ============================================================================
// RECALL ENGINE
// ============================================================================

/// Hybrid retrieval orchestrator.
pub struct RecallEngine {
    store: Arc<MemoryStore>,
    sparse: Arc<RwLock<SparseIndex>>,
    dense: Arc<DenseRetriever>,
    config: RecallEngineConfig,
    fusion: FusionConfig,
    sparse_enabled: bool,
    filtering: FilteringSettings,
}

impl RecallEngine {
    /// Build a recall engine over shared storage and indexes.
    pub fn new(
        store: Arc<MemoryStore>,
        sparse: Arc<RwLock<SparseIndex>>,
        dense: Arc<DenseRetriever>,
        config: RecallEngineConfig,
        fusion: FusionConfig,
        sparse_enabled: bool,
        filtering: FilteringSettings,
    ) -> Self {
        let sum = config.weight_sum();
        if (sum - 1.0).abs() > 0.01 {
            warn!(weight_sum = sum, "recall weights do not sum to 1; scores are not renormalized");
        }
        Self {
            store,
            sparse,
            dense,
            config,
            fusion,
            sparse_enabled,
            filtering,
        }
    }

    /// Default `k` from config.
    pub fn default_k(&self) -> usize {
        self.config.top_k
    }

    /// The active-memory filter implied by the isolation policy.
    pub fn filter_for(&self, session_id: Option<&str>, persona_id: Option<&str>) -> MemoryFilter {
        MemoryFilter {
            status: Some(MemoryStatus::Active),
            session_id: self
                .filtering
                .use_session_filtering
                .then(|| session_id.map(str::to_string))
                .flatten(),
            persona_id: self
                .filtering
                .use_persona_filtering
                .then(|| persona_id.map(str::to_string))
                .flatten(),
            ..Default::default()
        }
    }

    /// `recall(query, k, filter)`: over-fetch both channels, fuse, re-score,
    /// and asynchronously touch the returned ids.
    pub async fn recall(&self, query: &str, k: usize, filter: &MemoryFilter) -> RecallOutcome {
        if k == 0 || query.trim().is_empty() {
            return RecallOutcome::default();
        }
        let over_k = (k * 4).max(20);
        let deadline = Duration::from_secs(self.config.deadline_secs);

        let run_dense = self.config.retrieval_mode != RetrievalMode::Sparse;
        let run_sparse = self.config.retrieval_mode != RetrievalMode::Dense && self.sparse_enabled;

        let dense_future = async {
            if !run_dense {
                return Ok(vec![]);
            }
            match timeout(deadline, self.dense.search(query, over_k, filter)).await {
                Ok(result) => result,
                Err(_) => Err(MemoryError::DeadlineExceeded),
            }
        };
        let sparse_future = async {
            if !run_sparse {
                return Ok(vec![]);
            }
            self.sparse_search(query, over_k, filter)
        };

        let (dense_result, sparse_result) = tokio::join!(dense_future, sparse_future);

        let (dense_list, dense_error) = match dense_result {
            Ok(list) => (list, None),
            Err(e) => {
                warn!(error = %e, "dense search failed; degrading");
                (vec![], Some(e.to_string()))
            }
        };
        let (sparse_list, sparse_error) = match sparse_result {
            Ok(list) => (list, None),
            Err(e) => {
                warn!(error = %e, "sparse search failed; degrading");
                (vec![], Some(e.to_string()))
            }
        };

        let degradation = match (
            run_dense && dense_error.is_none(),
            run_sparse && sparse_error.is_none(),
        ) {
            (true, true) => Degradation::None,
            (false, true) if dense_error.is_some() => Degradation::SparseOnly,
            (true, false) if sparse_error.is_some() => Degradation::DenseOnly,
            (true, false) | (false, true) => Degradation::None,
            (false, false) => Degradation::Failed,
        };
        if degradation == Degradation::Failed {
            return RecallOutcome {
                hits: vec![],
                degradation,
                error: dense_error.or(sparse_error),
            };
        }

        let fused = fuse(
            &self.fusion,
            &QueryProfile::analyze(query),
            &dense_list,
            &sparse_list,
            k * 2,
        );

        let hits = match self.score_candidates(fused, filter, k).await {
            Ok(hits) => hits,
            Err(e) => {
                warn!(error = %e, "recall scoring failed");
                return RecallOutcome {
                    hits: vec![],
                    degradation: Degradation::Failed,
                    error: Some(e.to_string()),
                };
            }
        };

        // Best-effort touch off the recall path; a recall never blocks on it
        if !hits.is_empty() {
            let store = Arc::clone(&self.store);
            let ids: Vec<i64> = hits.iter().map(|h| h.doc_id).collect();
            let now = crate::clock::now_unix();
            tokio::spawn(async move {
                if let Err(e) = store.touch(&ids, now) {
                    warn!(error = %e, "touch after recall failed");
                }
            });
        }

        RecallOutcome {
            hits,
            degradation,
            error: dense_error.or(sparse_error),
        }
    }

    /// BM25 search post-filtered by document metadata.
    fn sparse_search(
        &self,
        query: &str,
        over_k: usize,
        filter: &MemoryFilter,
    ) -> Result<Vec<(i64, f64)>> {
        let raw = self
            .sparse
            .read()
            .map_err(|_| MemoryError::StorageCorrupted("sparse index lock poisoned".into()))?
            .search(query, over_k * 2);
        if raw.is_empty() {
            return Ok(vec![]);
        }

        let ids: Vec<i64> = raw.iter().map(|(id, _)| *id).collect();
        let records = self.store.get_many(&ids)?;
        Ok(raw
            .into_iter()
            .filter(|(id, _)| records.get(id).is_some_and(|r| filter.matches(r)))
            .take(over_k)
            .collect())
    }

    /// Apply the configured recall strategy over the fused candidates.
    async fn score_candidates(
        &self,
        fused: Vec<FusedHit>,
        filter: &MemoryFilter,
        k: usize,
    ) -> Result<Vec<RecallHit>> {
        if fused.is_empty() {
            return Ok(vec![]);
        }
        let ids: Vec<i64> = fused.iter().map(|h| h.doc_id).collect();
        let records = self.store.get_many(&ids)?;
        let now = crate::clock::now_unix();
        let tau = self.config.recency_tau_days;

        let mut hits: Vec<RecallHit> = Vec::with_capacity(fused.len());
        for candidate in fused {
            let Some(record) = records.get(&candidate.doc_id) else {
                continue;
            };
            // Channels pre-filter, but fusion may surface a record deleted in
            // the meantime; re-check before returning it
            if !filter.matches(record) {
                continue;
            }

            let (final_score, recency) = match self.config.recall_strategy {
                RecallStrategy::Similarity => (candidate.score, None),
                RecallStrategy::Weighted => {
                    let delta_days = (now - record.last_access_time).max(0) as f64 / 86_400.0;
                    let recency = (-delta_days / tau).exp();
                    let score = self.config.similarity_weight * candidate.score
                        + self.config.importance_weight * record.importance
                        + self.config.recency_weight * recency;
                    (score, Some(recency))
                }
            };

            hits.push(RecallHit {
                doc_id: record.doc_id,
                content: record.content.clone(),
                event_type: record.event_type,
                importance: record.importance,
                last_access_time: record.last_access_time,
                final_score,
                component_scores: ComponentScores {
                    dense: candidate.dense,
                    sparse: candidate.sparse,
                    recency,
                },
            });
        }

        hits.sort_by(|a, b| {
            b.final_score
                .partial_cmp(&a.final_score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.doc_id.cmp(&b.doc_id))
        });
        hits.truncate(k);
        debug!(hits = hits.len(), "recall scored");
        Ok(hits)
    }
}

// ============================================================================
// TESTS
// ============================================================================
