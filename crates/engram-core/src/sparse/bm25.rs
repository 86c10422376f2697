//! In-memory BM25 inverted index.
//!
//! Indexes the content of all `active` memories. Maintained incrementally on
//! insert/delete and rebuildable from a storage scan at startup or on demand.
//! Scores are raw BM25 reals, unbounded above, and not comparable across
//! queries; the fusion layer normalizes per-query.

use std::collections::HashMap;

use crate::config::SparseRetrieverConfig;

use super::tokenize::{build_tokenizer, Tokenizer};

// ============================================================================
// BM25 PARAMETERS
// ============================================================================

/// BM25 tuning parameters
#[derive(Debug, Clone, Copy)]
pub struct Bm25Params {
    /// Term-frequency saturation
    pub k1: f64,
    /// Length normalization
    pub b: f64,
}

impl Default for Bm25Params {
    fn default() -> Self {
        Self { k1: 1.2, b: 0.75 }
    }
}

// ============================================================================
// SPARSE INDEX
// ============================================================================

/// Inverted-index BM25 over memory content, keyed by `doc_id`.
pub struct SparseIndex {
    params: Bm25Params,
    tokenizer: Box<dyn Tokenizer>,
    /// term → (doc_id → term frequency)
    postings: HashMap<String, HashMap<i64, u32>>,
    /// doc_id → token count
    doc_lens: HashMap<i64, u32>,
    /// doc_id → its terms, for O(terms) removal
    doc_terms: HashMap<i64, Vec<String>>,
    total_len: u64,
}

impl SparseIndex {
    /// Create an empty index from config.
    pub fn new(config: &SparseRetrieverConfig) -> Self {
        Self::with_tokenizer(
            Bm25Params {
                k1: config.bm25_k1,
                b: config.bm25_b,
            },
            build_tokenizer(config.use_word_segmentation),
        )
    }

    /// Create an empty index with explicit parameters and tokenizer.
    pub fn with_tokenizer(params: Bm25Params, tokenizer: Box<dyn Tokenizer>) -> Self {
        Self {
            params,
            tokenizer,
            postings: HashMap::new(),
            doc_lens: HashMap::new(),
            doc_terms: HashMap::new(),
            total_len: 0,
        }
    }

    /// Number of indexed documents.
    pub fn len(&self) -> usize {
        self.doc_lens.len()
    }

    /// Whether the index holds no documents.
    pub fn is_empty(&self) -> bool {
        self.doc_lens.is_empty()
    }

    /// Tokenize with the index's tokenizer.
    pub fn tokenize(&self, text: &str) -> Vec<String> {
        self.tokenizer.tokenize(text)
    }

    /// Index a document's content. Re-adding an id replaces its postings.
    pub fn add(&mut self, doc_id: i64, content: &str) {
        if self.doc_lens.contains_key(&doc_id) {
            self.remove(doc_id);
        }

        let tokens = self.tokenizer.tokenize(content);
        let len = tokens.len() as u32;

        let mut tf: HashMap<String, u32> = HashMap::new();
        for token in tokens {
            *tf.entry(token).or_insert(0) += 1;
        }

        let mut terms = Vec::with_capacity(tf.len());
        for (term, count) in tf {
            self.postings
                .entry(term.clone())
                .or_default()
                .insert(doc_id, count);
            terms.push(term);
        }

        self.doc_terms.insert(doc_id, terms);
        self.doc_lens.insert(doc_id, len);
        self.total_len += u64::from(len);
    }

    /// Drop a document from the index. Returns whether it was present.
    pub fn remove(&mut self, doc_id: i64) -> bool {
        let Some(terms) = self.doc_terms.remove(&doc_id) else {
            return false;
        };
        for term in terms {
            if let Some(docs) = self.postings.get_mut(&term) {
                docs.remove(&doc_id);
                if docs.is_empty() {
                    self.postings.remove(&term);
                }
            }
        }
        if let Some(len) = self.doc_lens.remove(&doc_id) {
            self.total_len -= u64::from(len);
        }
        true
    }

    /// Drop everything.
    pub fn clear(&mut self) {
        self.postings.clear();
        self.doc_lens.clear();
        self.doc_terms.clear();
        self.total_len = 0;
    }

    /// Full rebuild from `(doc_id, content)` pairs, e.g. a storage scan.
    pub fn rebuild_from<I>(&mut self, docs: I)
    where
        I: IntoIterator<Item = (i64, String)>,
    {
        self.clear();
        for (doc_id, content) in docs {
            self.add(doc_id, &content);
        }
    }

    /// BM25 search. Returns up to `k` `(doc_id, score)` pairs, score
    /// descending, ties broken by ascending `doc_id`.
    pub fn search(&self, query: &str, k: usize) -> Vec<(i64, f64)> {
        if k == 0 || self.doc_lens.is_empty() {
            return vec![];
        }

        let n = self.doc_lens.len() as f64;
        let avgdl = self.total_len as f64 / n;
        let query_terms = self.tokenizer.tokenize(query);

        let mut scores: HashMap<i64, f64> = HashMap::new();
        for term in &query_terms {
            let Some(docs) = self.postings.get(term) else {
                continue;
            };
            let df = docs.len() as f64;
            let idf = ((n - df + 0.5) / (df + 0.5) + 1.0).ln();
            for (&doc_id, &tf) in docs {
                let tf = f64::from(tf);
                let dl = f64::from(self.doc_lens[&doc_id]);
                let denom = tf + self.params.k1 * (1.0 - self.params.b + self.params.b * dl / avgdl);
                *scores.entry(doc_id).or_insert(0.0) += idf * tf * (self.params.k1 + 1.0) / denom;
            }
        }

        let mut ranked: Vec<(i64, f64)> = scores.into_iter().collect();
        ranked.sort_by(|a, b| {
            b.1.partial_cmp(&a.1)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.0.cmp(&b.0))
        });
        ranked.truncate(k);
        ranked
    }
}

// ============================================================================
// TESTS
// ============================================================================
