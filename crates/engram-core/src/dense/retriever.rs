//! Dense retriever: embed the query, then k-NN through storage.
//!
//! Thin wrapper over [`MemoryStore::dense_search`] with an LRU cache for
//! query embeddings so repeated queries skip the provider round-trip.

use std::num::NonZeroUsize;
use std::sync::{Arc, Mutex};

use lru::LruCache;
use tracing::debug;

use crate::error::{MemoryError, Result};
use crate::memory::MemoryFilter;
use crate::providers::EmbeddingProvider;
use crate::storage::MemoryStore;

/// Cached query embeddings
const QUERY_CACHE_CAPACITY: usize = 100;

/// Dense (vector) retrieval channel.
pub struct DenseRetriever {
    store: Arc<MemoryStore>,
    embedder: Arc<dyn EmbeddingProvider>,
    query_cache: Mutex<LruCache<String, Vec<f32>>>,
}

impl DenseRetriever {
    /// Create a retriever over `store` using `embedder` for queries.
    pub fn new(store: Arc<MemoryStore>, embedder: Arc<dyn EmbeddingProvider>) -> Self {
        // SAFETY: the capacity constant is non-zero
        let capacity = NonZeroUsize::new(QUERY_CACHE_CAPACITY).expect("capacity is non-zero");
        Self {
            store,
            embedder,
            query_cache: Mutex::new(LruCache::new(capacity)),
        }
    }

    /// Embed a query, serving repeats from the cache.
    pub async fn embed_query(&self, query: &str) -> Result<Vec<f32>> {
        if let Ok(mut cache) = self.query_cache.lock() {
            if let Some(embedding) = cache.get(query) {
                debug!("query embedding served from cache");
                return Ok(embedding.clone());
            }
        }

        let texts = [query.to_string()];
        let mut vectors = self
            .embedder
            .embed(&texts)
            .await
            .map_err(MemoryError::ProviderUnavailable)?;
        let embedding = vectors.pop().ok_or_else(|| {
            MemoryError::ProviderMalformedOutput("embedding provider returned no vector".into())
        })?;
        if embedding.len() != self.store.dimensions() {
            return Err(MemoryError::ProviderMalformedOutput(format!(
                "embedding has {} dimensions, storage expects {}",
                embedding.len(),
                self.store.dimensions()
            )));
        }

        if let Ok(mut cache) = self.query_cache.lock() {
            cache.put(query.to_string(), embedding.clone());
        }
        Ok(embedding)
    }

    /// `search(query, k)`: embed, then k-NN with metadata filtering.
    /// Similarity is cosine normalized to [0, 1].
    pub async fn search(
        &self,
        query: &str,
        k: usize,
        filter: &MemoryFilter,
    ) -> Result<Vec<(i64, f64)>> {
        let embedding = self.embed_query(query).await?;
        self.store.dense_search(&embedding, k, filter)
    }
}
