//! Dense retrieval
//!
//! - HNSW vector index keyed by `doc_id` (cosine metric)
//! - Query-embedding retriever with an LRU cache

mod retriever;
mod vector;

pub use retriever::DenseRetriever;
pub use vector::VectorIndex;
