//! HNSW vector index keyed by `doc_id`.
//!
//! Thin wrapper over USearch with cosine similarity. The durable copy of
//! every embedding lives in the document store; this index is derived state,
//! rebuilt from storage at open and mutated only after a committed write.

use std::collections::HashSet;

use usearch::{Index, IndexOptions, MetricKind, ScalarKind};

use crate::error::{MemoryError, Result};

/// HNSW connectivity parameter (higher = better recall, more memory)
const CONNECTIVITY: usize = 16;

/// HNSW expansion factor for index building
const EXPANSION_ADD: usize = 128;

/// HNSW expansion factor for search
const EXPANSION_SEARCH: usize = 64;

// ============================================================================
// VECTOR INDEX
// ============================================================================

/// Cosine HNSW index over memory embeddings.
pub struct VectorIndex {
    index: Index,
    dimensions: usize,
    /// Present keys; USearch does not expose cheap membership
    present: HashSet<i64>,
}

impl VectorIndex {
    /// Create an empty index for vectors of `dimensions` entries.
    pub fn new(dimensions: usize) -> Result<Self> {
        if dimensions == 0 {
            return Err(MemoryError::VectorIndex(
                "embedding dimension must be > 0".into(),
            ));
        }
        let options = IndexOptions {
            dimensions,
            metric: MetricKind::Cos,
            quantization: ScalarKind::F32,
            connectivity: CONNECTIVITY,
            expansion_add: EXPANSION_ADD,
            expansion_search: EXPANSION_SEARCH,
            multi: false,
        };
        let index = Index::new(&options)
            .map_err(|e| MemoryError::VectorIndex(format!("index creation failed: {e}")))?;
        Ok(Self {
            index,
            dimensions,
            present: HashSet::new(),
        })
    }

    /// Number of vectors in the index.
    pub fn len(&self) -> usize {
        self.present.len()
    }

    /// Whether the index is empty.
    pub fn is_empty(&self) -> bool {
        self.present.is_empty()
    }

    /// Vector dimension.
    pub fn dimensions(&self) -> usize {
        self.dimensions
    }

    /// Whether a doc_id has a vector.
    pub fn contains(&self, doc_id: i64) -> bool {
        self.present.contains(&doc_id)
    }

    fn check_dimensions(&self, vector: &[f32]) -> Result<()> {
        if vector.len() != self.dimensions {
            return Err(MemoryError::VectorIndex(format!(
                "expected {} dimensions, got {}",
                self.dimensions,
                vector.len()
            )));
        }
        Ok(())
    }

    /// Add a vector at `doc_id`, replacing any existing one.
    ///
    /// USearch requires reserved capacity before add; this grows it in
    /// doubling steps.
    pub fn add(&mut self, doc_id: i64, vector: &[f32]) -> Result<()> {
        self.check_dimensions(vector)?;
        let key = doc_id as u64;

        if self.present.contains(&doc_id) {
            self.index
                .remove(key)
                .map_err(|e| MemoryError::VectorIndex(format!("replace failed: {e}")))?;
        }

        if self.index.size() >= self.index.capacity() {
            let new_capacity = std::cmp::max(self.index.capacity() * 2, 64);
            self.index
                .reserve(new_capacity)
                .map_err(|e| MemoryError::VectorIndex(format!("reserve failed: {e}")))?;
        }

        self.index
            .add(key, vector)
            .map_err(|e| MemoryError::VectorIndex(format!("add failed: {e}")))?;
        self.present.insert(doc_id);
        Ok(())
    }

    /// Remove the vector at `doc_id`. Returns whether one was present.
    pub fn remove(&mut self, doc_id: i64) -> Result<bool> {
        if !self.present.remove(&doc_id) {
            return Ok(false);
        }
        self.index
            .remove(doc_id as u64)
            .map_err(|e| MemoryError::VectorIndex(format!("remove failed: {e}")))?;
        Ok(true)
    }

    /// k-NN search. Returns `(doc_id, cosine_similarity)` pairs with the
    /// similarity in [-1, 1], best first.
    pub fn search(&self, query: &[f32], k: usize) -> Result<Vec<(i64, f32)>> {
        self.check_dimensions(query)?;
        if self.is_empty() || k == 0 {
            return Ok(vec![]);
        }

        let matches = self
            .index
            .search(query, k)
            .map_err(|e| MemoryError::VectorIndex(format!("search failed: {e}")))?;

        let mut results = Vec::with_capacity(matches.keys.len());
        for (key, distance) in matches.keys.iter().zip(matches.distances.iter()) {
            // Cosine distance = 1 - cos; invert back
            results.push((*key as i64, 1.0 - distance));
        }
        Ok(results)
    }
}

// ============================================================================
// TESTS
// ============================================================================
