//! In-memory index store.
//!
//! The published index is an immutable [`IndexSnapshot`] behind an `Arc`.
//! Publishing builds a complete new snapshot and swaps the pointer, so a
//! search always runs against exactly one build.

use async_trait::async_trait;
use gqlrag_core::{
    DistanceMetric, IndexEntry, IndexManifest, IndexStore, SearchQuery, SearchResult, StoreError,
    StoreStats,
};
use std::cmp::Ordering;
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::debug;

/// One published build.
#[derive(Debug, Clone, Default)]
pub struct IndexSnapshot {
    pub manifest: Option<IndexManifest>,
    pub entries: Vec<IndexEntry>,
}

impl IndexSnapshot {
    /// Check a build before it is published: counts, dimensions and unique names.
    pub fn validated(
        manifest: IndexManifest,
        entries: Vec<IndexEntry>,
    ) -> Result<Self, StoreError> {
        if manifest.entry_count != entries.len() {
            return Err(StoreError::Publish(format!(
                "manifest lists {} entries but {} were given",
                manifest.entry_count,
                entries.len()
            )));
        }

        let mut names = HashSet::with_capacity(entries.len());
        for entry in &entries {
            if entry.embedding.len() != manifest.dimension {
                return Err(StoreError::DimensionMismatch {
                    expected: manifest.dimension,
                    actual: entry.embedding.len(),
                });
            }
            if !names.insert(entry.dsl_name.as_str()) {
                return Err(StoreError::Publish(format!(
                    "duplicate entry {}",
                    entry.dsl_name
                )));
            }
        }

        Ok(Self {
            manifest: Some(manifest),
            entries,
        })
    }

    /// Rank entries against the query, best first.
    pub fn search(&self, query: &SearchQuery) -> Result<Vec<SearchResult>, StoreError> {
        let Some(manifest) = &self.manifest else {
            return Ok(Vec::new());
        };
        if self.entries.is_empty() || query.limit == 0 {
            return Ok(Vec::new());
        }
        if query.embedding.len() != manifest.dimension {
            return Err(StoreError::DimensionMismatch {
                expected: manifest.dimension,
                actual: query.embedding.len(),
            });
        }

        let mut scored: Vec<(f32, &IndexEntry)> = self
            .entries
            .iter()
            .map(|entry| (score(query.metric, &query.embedding, &entry.embedding), entry))
            .filter(|(score, _)| query.min_score.is_none_or(|min| *score >= min))
            .collect();

        scored.sort_by(|a, b| {
            b.0.partial_cmp(&a.0)
                .unwrap_or(Ordering::Equal)
                .then_with(|| a.1.dsl_name.cmp(&b.1.dsl_name))
        });

        Ok(scored
            .into_iter()
            .take(query.limit)
            .map(|(score, entry)| SearchResult {
                dsl_name: entry.dsl_name.clone(),
                score,
                source_text: entry.source_text.clone(),
            })
            .collect())
    }
}

/// Similarity score, higher is better for every metric.
#[must_use]
pub fn score(metric: DistanceMetric, a: &[f32], b: &[f32]) -> f32 {
    match metric {
        DistanceMetric::Cosine => cosine_similarity(a, b),
        DistanceMetric::Dot => a.iter().zip(b).map(|(x, y)| x * y).sum(),
        DistanceMetric::L2 => {
            let distance = a
                .iter()
                .zip(b)
                .map(|(x, y)| (x - y) * (x - y))
                .sum::<f32>()
                .sqrt();
            1.0 / (1.0 + distance)
        }
    }
}

/// Cosine similarity; zero when either vector is zero.
fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() {
        return 0.0;
    }

    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();

    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }

    dot / (norm_a * norm_b)
}

/// In-memory index store with brute-force scoring.
#[derive(Default)]
pub struct MemoryIndexStore {
    current: RwLock<Arc<IndexSnapshot>>,
}

impl MemoryIndexStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// The snapshot readers currently see.
    pub async fn snapshot(&self) -> Arc<IndexSnapshot> {
        Arc::clone(&*self.current.read().await)
    }

    /// Replace the published snapshot.
    pub async fn swap(&self, snapshot: IndexSnapshot) {
        *self.current.write().await = Arc::new(snapshot);
    }
}

#[async_trait]
impl IndexStore for MemoryIndexStore {
    async fn init(&self) -> Result<(), StoreError> {
        debug!("MemoryIndexStore initialized");
        Ok(())
    }

    async fn publish(
        &self,
        manifest: IndexManifest,
        entries: Vec<IndexEntry>,
    ) -> Result<(), StoreError> {
        let snapshot = IndexSnapshot::validated(manifest, entries)?;
        debug!("Publishing {} entries", snapshot.entries.len());
        self.swap(snapshot).await;
        Ok(())
    }

    async fn search(&self, query: SearchQuery) -> Result<Vec<SearchResult>, StoreError> {
        let snapshot = self.snapshot().await;
        snapshot.search(&query)
    }

    async fn manifest(&self) -> Result<Option<IndexManifest>, StoreError> {
        Ok(self.snapshot().await.manifest.clone())
    }

    async fn stats(&self) -> Result<StoreStats, StoreError> {
        let snapshot = self.snapshot().await;
        let manifest = snapshot.manifest.as_ref();
        Ok(StoreStats {
            total_entries: snapshot.entries.len() as u64,
            dimension: manifest.map(|m| m.dimension),
            build_id: manifest.map(|m| m.build_id),
            last_updated: manifest.map(|m| m.built_at),
            index_size_bytes: 0,
        })
    }
}
