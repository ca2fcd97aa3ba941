//! Core traits for gqlrag components.
//!
//! - [`DslRepository`]: Read and write DSL records
//! - [`Embedder`]: Generate vector embeddings
//! - [`IndexStore`]: Publish and search the retrieval index
//! - [`ValueExtractor`]: Pull variable values out of request text
//!
//! Components are held as `Arc<dyn Trait>` so implementations can be swapped
//! without changing the index or query pipeline.

use async_trait::async_trait;
use serde_json::Value;

use crate::error::{EmbedError, RegistryError, StoreError};
use crate::types::{
    DslRecord, EmbeddingConfig, EmbeddingOutput, IndexEntry, IndexManifest, SearchQuery,
    SearchResult, StoreStats, VariableSpec,
};

// ============================================================================
// DSL Registry
// ============================================================================

/// Storage for DSL records, keyed by `dsl_name`.
#[async_trait]
pub trait DslRepository: Send + Sync {
    /// All records, sorted by name.
    async fn list(&self) -> Result<Vec<DslRecord>, RegistryError>;

    /// Look up one record.
    async fn get(&self, name: &str) -> Result<Option<DslRecord>, RegistryError>;

    /// Insert or overwrite one record.
    async fn put(&self, record: &DslRecord) -> Result<(), RegistryError>;

    /// Replace the whole registry with `records`.
    async fn replace_all(&self, records: &[DslRecord]) -> Result<(), RegistryError>;

    /// Remove one record. Returns whether it existed.
    async fn remove(&self, name: &str) -> Result<bool, RegistryError>;

    /// Number of records.
    async fn len(&self) -> Result<usize, RegistryError> {
        Ok(self.list().await?.len())
    }

    /// Whether the registry holds no records.
    async fn is_empty(&self) -> Result<bool, RegistryError> {
        Ok(self.len().await? == 0)
    }
}

// ============================================================================
// Embedding
// ============================================================================

/// Trait for generating embeddings.
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Model name/identifier.
    fn model_name(&self) -> &str;

    /// Embedding dimension.
    fn dimension(&self) -> usize;

    /// Maximum tokens per input.
    fn max_tokens(&self) -> usize;

    /// Embed a batch of documents.
    async fn embed_text(
        &self,
        texts: &[&str],
        config: &EmbeddingConfig,
    ) -> Result<Vec<EmbeddingOutput>, EmbedError>;

    /// Embed a query (may use different instruction).
    async fn embed_query(
        &self,
        query: &str,
        config: &EmbeddingConfig,
    ) -> Result<EmbeddingOutput, EmbedError> {
        let results = self.embed_text(&[query], config).await?;
        results
            .into_iter()
            .next()
            .ok_or_else(|| EmbedError::Inference("empty embedding result".to_string()))
    }
}

// ============================================================================
// Index Storage
// ============================================================================

/// Holds the published retrieval index.
///
/// A build publishes a complete entry set at once. Readers see either the
/// previous index or the new one, never a mix.
#[async_trait]
pub trait IndexStore: Send + Sync {
    /// Initialize the store, loading any previously published index.
    async fn init(&self) -> Result<(), StoreError>;

    /// Atomically replace the published index.
    async fn publish(
        &self,
        manifest: IndexManifest,
        entries: Vec<IndexEntry>,
    ) -> Result<(), StoreError>;

    /// Nearest entries to the query embedding, best first.
    async fn search(&self, query: SearchQuery) -> Result<Vec<SearchResult>, StoreError>;

    /// Manifest of the published index, if any.
    async fn manifest(&self) -> Result<Option<IndexManifest>, StoreError>;

    /// Store statistics.
    async fn stats(&self) -> Result<StoreStats, StoreError>;
}

// ============================================================================
// Value Extraction
// ============================================================================

/// Pulls a value for one template variable out of the request text.
pub trait ValueExtractor: Send + Sync {
    /// Extractor name, for logging.
    fn name(&self) -> &str;

    /// Value for `variable`, or `None` if the text does not supply one.
    fn extract(&self, text: &str, variable: &VariableSpec, record: &DslRecord) -> Option<Value>;
}
