//! Sparse retrieval (BM25)
//!
//! - Inverted-index BM25 over tokenized memory content
//! - Pluggable tokenization with a CJK-safe default
//! - Incremental add/remove plus full rebuild from a storage scan

mod bm25;
mod tokenize;

pub use bm25::{Bm25Params, SparseIndex};
pub use tokenize::{build_tokenizer, SimpleTokenizer, Tokenizer};

#[cfg(feature = "word-segmentation")]
pub use tokenize::JiebaTokenizer;
