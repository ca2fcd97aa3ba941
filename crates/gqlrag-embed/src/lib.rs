//! # gqlrag-embed
//!
//! Embedders for matching natural-language requests to DSL records.
//!
//! ## Cargo Features
//!
//! - `candle`: Enables [`BgeEmbedder`] (`BAAI/bge-small-en-v1.5` through Candle)
//! - Without `candle`: [`HashingEmbedder`] only
//!
//! ## Components
//!
//! | Type | Description |
//! |------|-------------|
//! | [`HashingEmbedder`] | Deterministic lexical feature hashing, the default |
//! | [`BgeEmbedder`] | Transformer embeddings (requires `candle` feature) |
//! | [`EmbeddingCache`] | LRU cache wrapping any embedder |
//! | [`EmbedderPool`] | Concurrent embedding with semaphore limiting |
//!
//! ```rust,ignore
//! use gqlrag_embed::{EmbedderPool, EmbeddingCache, HashingEmbedder};
//! use std::sync::Arc;
//!
//! let cached = EmbeddingCache::new(Arc::new(HashingEmbedder::new()));
//! let pool = EmbedderPool::new(Arc::new(cached), 4);
//! let vectors = pool.embed_batch(&["query_appliances"], &config).await?;
//! ```

pub mod cache;
#[cfg(feature = "candle")]
pub mod candle;
pub mod hashing;
pub mod pool;

pub use cache::{CacheStats, EmbeddingCache};
#[cfg(feature = "candle")]
pub use candle::BgeEmbedder;
pub use hashing::{HASHING_MODEL, HashingEmbedder};
pub use pool::EmbedderPool;
