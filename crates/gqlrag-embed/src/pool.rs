//! Bounded access to one shared embedder.
//!
//! Index builds and request handling share a single model. The pool caps how
//! many embedding calls run at once; every call holds a permit for its
//! duration.

use gqlrag_core::{EmbedError, Embedder, EmbeddingConfig, EmbeddingOutput};
use std::sync::Arc;
use tokio::sync::{Semaphore, SemaphorePermit};

pub struct EmbedderPool {
    embedder: Arc<dyn Embedder>,
    permits: Semaphore,
    max_concurrent: usize,
}

impl EmbedderPool {
    /// `max_concurrent` is clamped to at least one.
    pub fn new(embedder: Arc<dyn Embedder>, max_concurrent: usize) -> Self {
        let max_concurrent = max_concurrent.max(1);
        Self {
            embedder,
            permits: Semaphore::new(max_concurrent),
            max_concurrent,
        }
    }

    pub fn dimension(&self) -> usize {
        self.embedder.dimension()
    }

    pub fn model_name(&self) -> &str {
        self.embedder.model_name()
    }

    pub fn embedder(&self) -> Arc<dyn Embedder> {
        Arc::clone(&self.embedder)
    }

    async fn permit(&self) -> Result<SemaphorePermit<'_>, EmbedError> {
        self.permits
            .acquire()
            .await
            .map_err(|_| EmbedError::Inference("embedder pool closed".to_string()))
    }

    /// Embed record texts as one call.
    pub async fn embed_batch(
        &self,
        texts: &[&str],
        config: &EmbeddingConfig,
    ) -> Result<Vec<EmbeddingOutput>, EmbedError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        let _permit = self.permit().await?;
        self.embedder.embed_text(texts, config).await
    }

    /// Embed request text.
    pub async fn embed_query(
        &self,
        query: &str,
        config: &EmbeddingConfig,
    ) -> Result<EmbeddingOutput, EmbedError> {
        let _permit = self.permit().await?;
        self.embedder.embed_query(query, config).await
    }

    pub fn available_permits(&self) -> usize {
        self.permits.available_permits()
    }

    pub fn max_concurrent(&self) -> usize {
        self.max_concurrent
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{HASHING_MODEL, HashingEmbedder};

    fn pool(max_concurrent: usize) -> Arc<EmbedderPool> {
        Arc::new(EmbedderPool::new(
            Arc::new(HashingEmbedder::with_dimension(64)),
            max_concurrent,
        ))
    }

    #[test]
    fn test_reports_model() {
        let pool = pool(3);
        assert_eq!(pool.dimension(), 64);
        assert_eq!(pool.model_name(), HASHING_MODEL);
        assert_eq!(pool.max_concurrent(), 3);
        assert_eq!(pool.available_permits(), 3);
        assert_eq!(EmbedderPool::new(pool.embedder(), 0).max_concurrent(), 1);
    }

    #[tokio::test]
    async fn test_batch_and_request_embeddings() {
        let pool = pool(2);
        let config = EmbeddingConfig::default();

        let records = pool
            .embed_batch(&["query_users", "mutation_create_user"], &config)
            .await
            .unwrap();
        assert_eq!(records.len(), 2);
        assert!(records.iter().all(|r| r.embedding.len() == 64));

        let request = pool.embed_query("users", &config).await.unwrap();
        assert_eq!(request.token_count, 1);
        assert!(pool.embed_batch(&[], &config).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_permits_released_after_concurrent_use() {
        let pool = pool(2);

        let tasks: Vec<_> = (0..6)
            .map(|i| {
                let pool = Arc::clone(&pool);
                tokio::spawn(async move {
                    pool.embed_query(&format!("appliance {i}"), &EmbeddingConfig::default())
                        .await
                        .map(|output| output.embedding.len())
                })
            })
            .collect();
        for task in tasks {
            assert_eq!(task.await.unwrap().unwrap(), 64);
        }

        assert_eq!(pool.available_permits(), 2);
    }
}
