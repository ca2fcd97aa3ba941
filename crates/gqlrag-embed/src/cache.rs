//! Record embedding cache.
//!
//! Index rebuilds re-embed every record even when only one changed. Entries are
//! keyed on a blake3 digest of the record text and the embedding options, so an
//! unchanged record is served from memory. Request embeddings pass through.

use async_trait::async_trait;
use gqlrag_core::{EmbedError, Embedder, EmbeddingConfig, EmbeddingOutput};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::debug;

/// Default capacity in entries.
pub const DEFAULT_CACHE_SIZE: usize = 10_000;

type Key = [u8; 32];

/// Cache statistics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
}

#[derive(Default)]
struct LruState {
    entries: HashMap<Key, (EmbeddingOutput, u64)>,
    /// Last-use tick to key, oldest first
    recency: BTreeMap<u64, Key>,
    tick: u64,
    stats: CacheStats,
}

impl LruState {
    fn touch(&mut self, key: &Key) -> Option<EmbeddingOutput> {
        self.tick += 1;
        let tick = self.tick;
        let (output, last_used) = self.entries.get_mut(key)?;
        self.recency.remove(last_used);
        *last_used = tick;
        self.recency.insert(tick, *key);
        Some(output.clone())
    }

    fn insert(&mut self, key: Key, output: EmbeddingOutput, capacity: usize) {
        self.tick += 1;
        if let Some((_, previous)) = self.entries.insert(key, (output, self.tick)) {
            self.recency.remove(&previous);
        }
        self.recency.insert(self.tick, key);

        while self.entries.len() > capacity {
            let Some((_, oldest)) = self.recency.pop_first() else {
                break;
            };
            self.entries.remove(&oldest);
            self.stats.evictions += 1;
        }
    }
}

/// LRU cache in front of another [`Embedder`]. Itself an [`Embedder`].
pub struct EmbeddingCache {
    embedder: Arc<dyn Embedder>,
    capacity: usize,
    state: Mutex<LruState>,
}

impl EmbeddingCache {
    pub fn new(embedder: Arc<dyn Embedder>) -> Self {
        Self::with_capacity(embedder, DEFAULT_CACHE_SIZE)
    }

    pub fn with_capacity(embedder: Arc<dyn Embedder>, capacity: usize) -> Self {
        Self {
            embedder,
            capacity: capacity.max(1),
            state: Mutex::new(LruState::default()),
        }
    }

    fn key(text: &str, config: &EmbeddingConfig) -> Key {
        let mut hasher = blake3::Hasher::new();
        hasher.update(&[u8::from(config.normalize)]);
        if let Some(instruction) = &config.instruction {
            hasher.update(instruction.as_bytes());
        }
        hasher.update(&[0]);
        hasher.update(text.as_bytes());
        *hasher.finalize().as_bytes()
    }

    /// The wrapped embedder.
    pub fn embedder(&self) -> Arc<dyn Embedder> {
        Arc::clone(&self.embedder)
    }

    pub async fn stats(&self) -> CacheStats {
        self.state.lock().await.stats
    }

    /// Number of cached entries.
    pub async fn size(&self) -> usize {
        self.state.lock().await.entries.len()
    }

    pub async fn clear(&self) {
        let mut state = self.state.lock().await;
        state.entries.clear();
        state.recency.clear();
    }
}

#[async_trait]
impl Embedder for EmbeddingCache {
    fn model_name(&self) -> &str {
        self.embedder.model_name()
    }

    fn dimension(&self) -> usize {
        self.embedder.dimension()
    }

    fn max_tokens(&self) -> usize {
        self.embedder.max_tokens()
    }

    async fn embed_text(
        &self,
        texts: &[&str],
        config: &EmbeddingConfig,
    ) -> Result<Vec<EmbeddingOutput>, EmbedError> {
        let keys: Vec<Key> = texts.iter().map(|text| Self::key(text, config)).collect();
        let mut outputs: Vec<Option<EmbeddingOutput>> = Vec::with_capacity(texts.len());
        let mut missing: Vec<usize> = Vec::new();

        {
            let mut state = self.state.lock().await;
            for (i, key) in keys.iter().enumerate() {
                let hit = state.touch(key);
                if hit.is_some() {
                    state.stats.hits += 1;
                } else {
                    state.stats.misses += 1;
                    missing.push(i);
                }
                outputs.push(hit);
            }
        }

        if !missing.is_empty() {
            debug!("{} of {} texts not cached", missing.len(), texts.len());
            let pending: Vec<&str> = missing.iter().map(|&i| texts[i]).collect();
            let fresh = self.embedder.embed_text(&pending, config).await?;
            if fresh.len() != pending.len() {
                return Err(EmbedError::Inference(format!(
                    "embedder returned {} vectors for {} texts",
                    fresh.len(),
                    pending.len()
                )));
            }

            let mut state = self.state.lock().await;
            for (i, output) in missing.into_iter().zip(fresh) {
                state.insert(keys[i], output.clone(), self.capacity);
                outputs[i] = Some(output);
            }
        }

        outputs
            .into_iter()
            .map(|output| {
                output.ok_or_else(|| EmbedError::Inference("missing cached embedding".to_string()))
            })
            .collect()
    }

    async fn embed_query(
        &self,
        query: &str,
        config: &EmbeddingConfig,
    ) -> Result<EmbeddingOutput, EmbedError> {
        self.embedder.embed_query(query, config).await
    }
}
