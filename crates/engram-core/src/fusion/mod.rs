//! Result fusion
//!
//! Combines the dense and sparse ranked lists into one. Nine strategies plus
//! a query classifier that picks one adaptively. Sparse scores are min-max
//! normalized per query before fusion so both inputs lie in [0, 1].
//!
//! Fusion is pure arithmetic: no suspension points, bounded per call, and
//! deterministic under the fixed tie-break order (appearance in both lists,
//! then better dense rank, then lower doc_id).

use std::collections::HashMap;

pub use crate::config::{FusionConfig, FusionStrategy};

// ============================================================================
// QUERY CLASSIFIER
// ============================================================================

/// Small English stopword set for the classifier
const STOPWORDS: &[&str] = &[
    "a", "an", "and", "are", "as", "at", "be", "but", "by", "did", "do", "does", "for", "from",
    "had", "has", "have", "how", "i", "in", "is", "it", "me", "my", "of", "on", "or", "so",
    "that", "the", "their", "there", "they", "this", "to", "was", "we", "were", "what", "when",
    "where", "which", "who", "why", "will", "with", "you", "your",
];

/// Broad query shape used by the adaptive strategy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryKind {
    /// Few tokens, low stopword ratio, or symbol/digit heavy
    Keyword,
    /// Long natural-language sentence
    Semantic,
    /// Anything in between
    Mixed,
}

/// Lexical features of a query, computed once per recall
#[derive(Debug, Clone, Copy)]
pub struct QueryProfile {
    /// Whitespace token count
    pub token_count: usize,
    /// Share of tokens in the stopword set
    pub stopword_ratio: f64,
    /// Whether the query contains digits or code-ish symbols
    pub has_symbols: bool,
}

impl QueryProfile {
    /// Analyze a raw query string.
    pub fn analyze(query: &str) -> Self {
        let tokens: Vec<&str> = query.split_whitespace().collect();
        let token_count = tokens.len();
        let stopwords = tokens
            .iter()
            .filter(|t| STOPWORDS.contains(&t.to_lowercase().trim_matches(|c: char| !c.is_alphanumeric())))
            .count();
        let stopword_ratio = if token_count == 0 {
            0.0
        } else {
            stopwords as f64 / token_count as f64
        };
        let has_symbols = query
            .chars()
            .any(|c| c.is_ascii_digit() || "_(){}[]<>=/\\:;#$%@".contains(c));
        Self {
            token_count,
            stopword_ratio,
            has_symbols,
        }
    }

    /// Classify for the adaptive strategy.
    pub fn classify(&self) -> QueryKind {
        if self.has_symbols || (self.token_count <= 4 && self.stopword_ratio < 0.2) {
            QueryKind::Keyword
        } else if self.token_count >= 8 && self.stopword_ratio >= 0.2 {
            QueryKind::Semantic
        } else {
            QueryKind::Mixed
        }
    }
}

// ============================================================================
// FUSED HITS
// ============================================================================

/// One fused result with its per-channel contributions
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FusedHit {
    /// Document id
    pub doc_id: i64,
    /// Fused score under the selected strategy
    pub score: f64,
    /// Original dense similarity in [0, 1], if the dense list had the doc
    pub dense: Option<f64>,
    /// Min-max normalized sparse score, if the sparse list had the doc
    pub sparse: Option<f64>,
}

/// Accumulator carrying rank positions for scoring and tie-breaks
#[derive(Debug, Clone, Copy, Default)]
struct Candidate {
    score: f64,
    dense_rank: Option<usize>,
    sparse_rank: Option<usize>,
    dense_score: Option<f64>,
    sparse_score: Option<f64>,
}

impl Candidate {
    fn in_both(&self) -> bool {
        self.dense_rank.is_some() && self.sparse_rank.is_some()
    }
}

/// Min-max normalize scores within a list. A constant list maps to all 1.0.
pub fn min_max_normalize(list: &[(i64, f64)]) -> Vec<(i64, f64)> {
    let Some((min, max)) = list.iter().fold(None, |acc: Option<(f64, f64)>, (_, s)| {
        Some(match acc {
            None => (*s, *s),
            Some((lo, hi)) => (lo.min(*s), hi.max(*s)),
        })
    }) else {
        return vec![];
    };
    if (max - min).abs() < f64::EPSILON {
        return list.iter().map(|(id, _)| (*id, 1.0)).collect();
    }
    list.iter()
        .map(|(id, s)| (*id, (s - min) / (max - min)))
        .collect()
}

// ============================================================================
// FUSION ENTRY POINT
// ============================================================================

/// Fuse the two ranked lists into one list of length ≤ k, no duplicate ids.
///
/// `dense` carries similarities already normalized to [0, 1]; `sparse`
/// carries raw BM25 scores and is min-max normalized here.
pub fn fuse(
    config: &FusionConfig,
    query: &QueryProfile,
    dense: &[(i64, f64)],
    sparse: &[(i64, f64)],
    k: usize,
) -> Vec<FusedHit> {
    if k == 0 || (dense.is_empty() && sparse.is_empty()) {
        return vec![];
    }

    let sparse_norm = min_max_normalize(sparse);
    let strategy = match config.strategy {
        FusionStrategy::Adaptive => match query.classify() {
            QueryKind::Keyword => return weighted(config, dense, &sparse_norm, k, true),
            QueryKind::Semantic => return weighted(config, dense, &sparse_norm, k, false),
            QueryKind::Mixed => FusionStrategy::HybridRrf,
        },
        other => other,
    };

    match strategy {
        FusionStrategy::Rrf => rrf(config.rrf_k, 0.0, dense, &sparse_norm, k),
        FusionStrategy::HybridRrf => {
            let rrf_k = if query.token_count <= 3 {
                30.0
            } else if query.token_count >= 12 {
                100.0
            } else {
                config.rrf_k
            };
            rrf(rrf_k, config.diversity_bonus, dense, &sparse_norm, k)
        }
        FusionStrategy::Weighted => weighted(config, dense, &sparse_norm, k, false),
        FusionStrategy::Convex => convex(config, dense, &sparse_norm, k),
        FusionStrategy::Interleave => interleave(config, dense, &sparse_norm, k),
        FusionStrategy::RankFusion => rank_fusion(config, dense, &sparse_norm, k),
        FusionStrategy::ScoreFusion => score_fusion(config, dense, &sparse_norm, k),
        FusionStrategy::Cascade => cascade(dense, &sparse_norm, k),
        FusionStrategy::Adaptive => unreachable!("resolved above"),
    }
}

/// Build the candidate union with rank positions from both lists.
fn candidates(dense: &[(i64, f64)], sparse: &[(i64, f64)]) -> HashMap<i64, Candidate> {
    let mut map: HashMap<i64, Candidate> = HashMap::new();
    for (rank0, (id, score)) in dense.iter().enumerate() {
        let c = map.entry(*id).or_default();
        c.dense_rank = Some(rank0 + 1);
        c.dense_score = Some(*score);
    }
    for (rank0, (id, score)) in sparse.iter().enumerate() {
        let c = map.entry(*id).or_default();
        c.sparse_rank = Some(rank0 + 1);
        c.sparse_score = Some(*score);
    }
    map
}

/// Sort by score with the fixed tie-break order and truncate to k.
fn rank_and_truncate(map: HashMap<i64, Candidate>, k: usize) -> Vec<FusedHit> {
    let mut entries: Vec<(i64, Candidate)> = map.into_iter().collect();
    entries.sort_by(|(a_id, a), (b_id, b)| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| b.in_both().cmp(&a.in_both()))
            .then_with(|| {
                a.dense_rank
                    .unwrap_or(usize::MAX)
                    .cmp(&b.dense_rank.unwrap_or(usize::MAX))
            })
            .then_with(|| a_id.cmp(b_id))
    });
    entries.truncate(k);
    entries
        .into_iter()
        .map(|(doc_id, c)| FusedHit {
            doc_id,
            score: c.score,
            dense: c.dense_score,
            sparse: c.sparse_score,
        })
        .collect()
}

// ============================================================================
// STRATEGIES
// ============================================================================

/// Reciprocal rank fusion: score(id) = Σ 1/(rrf_k + rank), rank 1-based.
/// Items in only one list get `diversity_bonus` added (hybrid variant).
fn rrf(
    rrf_k: f64,
    diversity_bonus: f64,
    dense: &[(i64, f64)],
    sparse: &[(i64, f64)],
    k: usize,
) -> Vec<FusedHit> {
    let mut map = candidates(dense, sparse);
    for c in map.values_mut() {
        let mut score = 0.0;
        if let Some(rank) = c.dense_rank {
            score += 1.0 / (rrf_k + rank as f64);
        }
        if let Some(rank) = c.sparse_rank {
            score += 1.0 / (rrf_k + rank as f64);
        }
        if !c.in_both() {
            score += diversity_bonus;
        }
        c.score = score;
    }
    rank_and_truncate(map, k)
}

/// α·dense + β·sparse with missing contributions zero. `favor_sparse` swaps
/// the configured weights (adaptive keyword-like queries).
fn weighted(
    config: &FusionConfig,
    dense: &[(i64, f64)],
    sparse: &[(i64, f64)],
    k: usize,
    favor_sparse: bool,
) -> Vec<FusedHit> {
    let (alpha, beta) = if favor_sparse {
        (config.sparse_weight, config.dense_weight)
    } else {
        (config.dense_weight, config.sparse_weight)
    };
    let mut map = candidates(dense, sparse);
    for c in map.values_mut() {
        c.score = alpha * c.dense_score.unwrap_or(0.0) + beta * c.sparse_score.unwrap_or(0.0);
    }
    rank_and_truncate(map, k)
}

/// λ·dense + (1−λ)·sparse, both min-max normalized.
fn convex(
    config: &FusionConfig,
    dense: &[(i64, f64)],
    sparse: &[(i64, f64)],
    k: usize,
) -> Vec<FusedHit> {
    let dense_norm = min_max_normalize(dense);
    let norm_scores: HashMap<i64, f64> = dense_norm.into_iter().collect();
    let lambda = config.convex_lambda;

    let mut map = candidates(dense, sparse);
    for (id, c) in map.iter_mut() {
        let d = norm_scores.get(id).copied().unwrap_or(0.0);
        c.score = lambda * d + (1.0 - lambda) * c.sparse_score.unwrap_or(0.0);
    }
    rank_and_truncate(map, k)
}

/// Positional interleave: ⌈r·k⌉ slots from dense, the rest from sparse,
/// walking both lists in order and skipping ids already taken.
fn interleave(
    config: &FusionConfig,
    dense: &[(i64, f64)],
    sparse: &[(i64, f64)],
    k: usize,
) -> Vec<FusedHit> {
    let ratio = config.interleave_ratio.clamp(0.0, 1.0);
    let dense_slots = ((ratio * k as f64).ceil() as usize).min(k);

    let mut taken: Vec<(i64, Option<f64>, Option<f64>)> = Vec::with_capacity(k);
    let mut seen: std::collections::HashSet<i64> = std::collections::HashSet::new();
    let mut d_iter = dense.iter().peekable();
    let mut s_iter = sparse.iter().peekable();
    let mut dense_taken = 0usize;

    while taken.len() < k && (d_iter.peek().is_some() || s_iter.peek().is_some()) {
        // Keep the dense share of filled positions tracking the ratio
        let want_dense = dense_taken < dense_slots
            && (taken.is_empty()
                || (dense_taken as f64) / (taken.len() as f64) < ratio
                || s_iter.peek().is_none());

        let pick_dense = if want_dense && d_iter.peek().is_some() {
            true
        } else if s_iter.peek().is_some() {
            false
        } else {
            d_iter.peek().is_some()
        };

        if pick_dense {
            if let Some((id, score)) = d_iter.next() {
                if seen.insert(*id) {
                    taken.push((*id, Some(*score), sparse_score_of(sparse, *id)));
                    dense_taken += 1;
                }
            }
        } else if let Some((id, score)) = s_iter.next() {
            if seen.insert(*id) {
                taken.push((*id, dense_score_of(dense, *id), Some(*score)));
            }
        }
    }

    // Positional scores keep the interleaved order under the shared sort
    let n = taken.len() as f64;
    taken
        .into_iter()
        .enumerate()
        .map(|(i, (doc_id, dense, sparse))| FusedHit {
            doc_id,
            score: (n - i as f64) / n,
            dense,
            sparse,
        })
        .collect()
}

fn dense_score_of(dense: &[(i64, f64)], id: i64) -> Option<f64> {
    dense.iter().find(|(d, _)| *d == id).map(|(_, s)| *s)
}

fn sparse_score_of(sparse: &[(i64, f64)], id: i64) -> Option<f64> {
    sparse.iter().find(|(d, _)| *d == id).map(|(_, s)| *s)
}

/// w_d/rank_d + w_s/rank_s with a flat bonus for items in both lists.
fn rank_fusion(
    config: &FusionConfig,
    dense: &[(i64, f64)],
    sparse: &[(i64, f64)],
    k: usize,
) -> Vec<FusedHit> {
    let mut map = candidates(dense, sparse);
    for c in map.values_mut() {
        let mut score = 0.0;
        if let Some(rank) = c.dense_rank {
            score += config.dense_weight / rank as f64;
        }
        if let Some(rank) = c.sparse_rank {
            score += config.sparse_weight / rank as f64;
        }
        if c.in_both() {
            score += config.rank_bias_factor;
        }
        c.score = score;
    }
    rank_and_truncate(map, k)
}

/// Borda count: w_d·(n_d − rank_d + 1) + w_s·(n_s − rank_s + 1).
fn score_fusion(
    config: &FusionConfig,
    dense: &[(i64, f64)],
    sparse: &[(i64, f64)],
    k: usize,
) -> Vec<FusedHit> {
    let n_d = dense.len() as f64;
    let n_s = sparse.len() as f64;
    let mut map = candidates(dense, sparse);
    for c in map.values_mut() {
        let mut score = 0.0;
        if let Some(rank) = c.dense_rank {
            score += config.dense_weight * (n_d - rank as f64 + 1.0);
        }
        if let Some(rank) = c.sparse_rank {
            score += config.sparse_weight * (n_s - rank as f64 + 1.0);
        }
        c.score = score;
    }
    rank_and_truncate(map, k)
}

/// Sparse-first cascade: top 4k sparse ids as candidates, re-ranked by dense
/// similarity within that set. With one channel empty, falls back to the
/// other truncated to k.
fn cascade(dense: &[(i64, f64)], sparse: &[(i64, f64)], k: usize) -> Vec<FusedHit> {
    if sparse.is_empty() {
        return dense
            .iter()
            .take(k)
            .map(|(doc_id, score)| FusedHit {
                doc_id: *doc_id,
                score: *score,
                dense: Some(*score),
                sparse: None,
            })
            .collect();
    }
    if dense.is_empty() {
        return sparse
            .iter()
            .take(k)
            .map(|(doc_id, score)| FusedHit {
                doc_id: *doc_id,
                score: *score,
                dense: None,
                sparse: Some(*score),
            })
            .collect();
    }

    let m = 4 * k;
    let candidate_set: Vec<(i64, f64)> = sparse.iter().take(m).copied().collect();
    let mut map = HashMap::new();
    for (rank0, (id, sparse_score)) in candidate_set.iter().enumerate() {
        let dense_score = dense_score_of(dense, *id);
        map.insert(
            *id,
            Candidate {
                score: dense_score.unwrap_or(0.0),
                dense_rank: dense.iter().position(|(d, _)| d == id).map(|p| p + 1),
                sparse_rank: Some(rank0 + 1),
                dense_score,
                sparse_score: Some(*sparse_score),
            },
        );
    }
    rank_and_truncate(map, k)
}

// ============================================================================
// TESTS
// ============================================================================
