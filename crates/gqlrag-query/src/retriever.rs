//! Candidate retrieval.

use gqlrag_core::{
    DistanceMetric, EmbeddingConfig, IndexStore, RequestError, SearchQuery, SearchResult,
};
use gqlrag_embed::EmbedderPool;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::debug;

/// Retrieval settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrievalConfig {
    /// Default candidate count
    pub k: usize,
    /// Candidates scoring below this are dropped
    pub min_score: f32,
    pub metric: DistanceMetric,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            k: 5,
            min_score: 0.1,
            metric: DistanceMetric::Cosine,
        }
    }
}

/// Ranked candidates for one request.
#[derive(Debug, Clone, Default)]
pub struct Retrieval {
    /// Candidates at or above the minimum score, best first
    pub candidates: Vec<SearchResult>,
    /// Best score seen, including candidates below the minimum
    pub best_score: Option<f32>,
}

/// Embeds request text and ranks index entries against it.
pub struct Retriever {
    store: Arc<dyn IndexStore>,
    embedder: Arc<EmbedderPool>,
    embed_config: EmbeddingConfig,
    config: RetrievalConfig,
}

impl Retriever {
    pub fn new(
        store: Arc<dyn IndexStore>,
        embedder: Arc<EmbedderPool>,
        embed_config: EmbeddingConfig,
        config: RetrievalConfig,
    ) -> Self {
        Self {
            store,
            embedder,
            embed_config,
            config,
        }
    }

    #[must_use]
    pub fn config(&self) -> &RetrievalConfig {
        &self.config
    }

    /// Top `limit` candidates for `text`.
    pub async fn retrieve(&self, text: &str, limit: usize) -> Result<Retrieval, RequestError> {
        debug!("Retrieving {} candidates for {:?}", limit, text);

        let query = self.embedder.embed_query(text, &self.embed_config).await?;
        let ranked = self
            .store
            .search(SearchQuery {
                embedding: query.embedding,
                limit,
                min_score: None,
                metric: self.config.metric,
            })
            .await?;

        let best_score = ranked.first().map(|r| r.score);
        let candidates: Vec<_> = ranked
            .into_iter()
            .filter(|r| r.score >= self.config.min_score)
            .collect();

        debug!(
            "{} candidates above {} (best {:?})",
            candidates.len(),
            self.config.min_score,
            best_score
        );
        Ok(Retrieval {
            candidates,
            best_score,
        })
    }

    /// Candidates for `text` with the configured `k`.
    pub async fn search(&self, text: &str) -> Result<Vec<SearchResult>, RequestError> {
        Ok(self.retrieve(text, self.config.k).await?.candidates)
    }
}
