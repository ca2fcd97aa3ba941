//! Retrieval index storage for gqlrag.
//!
//! Implements [`IndexStore`](gqlrag_core::IndexStore) with whole-index
//! publication: every build replaces the previous one atomically.
//!
//! - [`MemoryIndexStore`]: brute-force search over an in-memory snapshot
//! - [`FileIndexStore`]: the same, persisted as one JSON file
//!
//! # Example
//!
//! ```rust,ignore
//! use gqlrag_store::FileIndexStore;
//! use gqlrag_core::IndexStore;
//!
//! let store = FileIndexStore::new("index.json");
//! store.init().await?;
//! store.publish(manifest, entries).await?;
//! let results = store.search(query).await?;
//! ```

pub mod file;
pub mod memory;

pub use file::FileIndexStore;
pub use memory::{IndexSnapshot, MemoryIndexStore, score};
