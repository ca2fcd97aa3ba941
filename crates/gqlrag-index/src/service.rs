//! Index build service.

use chrono::Utc;
use gqlrag_core::{
    DslRecord, DslRepository, EmbeddingConfig, Error, IndexBuildError, IndexEntry, IndexManifest,
    IndexStats, IndexStore, Result, StoreError,
};
use gqlrag_embed::EmbedderPool;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, RwLock, broadcast, mpsc};
use tracing::{debug, error, info};
use uuid::Uuid;

use crate::watcher::{RegistryEvent, RegistryWatcher};

/// Index build events.
#[derive(Debug, Clone)]
pub enum IndexUpdate {
    BuildStarted,
    BuildCompleted { build_id: Uuid, entries: usize },
    BuildFailed { error: String },
}

/// Configuration for index builds.
#[derive(Debug, Clone)]
pub struct IndexConfig {
    /// Options passed to the embedder for record texts
    pub embed_config: EmbeddingConfig,
    /// Quiet period before a burst of registry edits triggers a rebuild
    pub debounce: Duration,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            embed_config: EmbeddingConfig::default(),
            debounce: Duration::from_millis(500),
        }
    }
}

/// Builds the retrieval index from the registry and publishes it to the store.
///
/// Cloning is cheap; clones share the store, the build lock and the stats.
#[derive(Clone)]
pub struct IndexService {
    registry: Arc<dyn DslRepository>,
    store: Arc<dyn IndexStore>,
    embedder: Arc<EmbedderPool>,
    config: IndexConfig,
    /// Serializes rebuilds
    build_lock: Arc<Mutex<()>>,
    stats: Arc<RwLock<IndexStats>>,
    update_tx: broadcast::Sender<IndexUpdate>,
    /// Registry watcher (if active)
    watcher: Arc<RwLock<Option<RegistryWatcher>>>,
}

impl IndexService {
    pub fn new(
        registry: Arc<dyn DslRepository>,
        store: Arc<dyn IndexStore>,
        embedder: Arc<EmbedderPool>,
        config: IndexConfig,
    ) -> Self {
        let (update_tx, _) = broadcast::channel(64);
        Self {
            registry,
            store,
            embedder,
            config,
            build_lock: Arc::new(Mutex::new(())),
            stats: Arc::new(RwLock::new(IndexStats::default())),
            update_tx,
            watcher: Arc::new(RwLock::new(None)),
        }
    }

    /// Subscribe to build events.
    pub fn subscribe(&self) -> broadcast::Receiver<IndexUpdate> {
        self.update_tx.subscribe()
    }

    /// Build counters.
    pub async fn stats(&self) -> IndexStats {
        self.stats.read().await.clone()
    }

    /// The store builds are published to.
    pub fn store(&self) -> Arc<dyn IndexStore> {
        Arc::clone(&self.store)
    }

    /// Load the persisted index, if any.
    pub async fn init(&self) -> Result<()> {
        self.store.init().await?;
        Ok(())
    }

    /// Rebuild the whole index from the registry.
    ///
    /// On failure the previously published index stays in effect.
    pub async fn rebuild(&self) -> std::result::Result<IndexManifest, IndexBuildError> {
        let _guard = self.build_lock.lock().await;
        let _ = self.update_tx.send(IndexUpdate::BuildStarted);

        match self.build().await {
            Ok(manifest) => {
                info!(
                    "Published index {} ({} entries, model {})",
                    manifest.build_id, manifest.entry_count, manifest.model
                );
                {
                    let mut stats = self.stats.write().await;
                    stats.builds += 1;
                    stats.indexed_records = manifest.entry_count as u64;
                    stats.last_build = Some(Utc::now());
                }
                let _ = self.update_tx.send(IndexUpdate::BuildCompleted {
                    build_id: manifest.build_id,
                    entries: manifest.entry_count,
                });
                Ok(manifest)
            }
            Err(e) => {
                error!("Index build failed: {e}");
                self.stats.write().await.failed_builds += 1;
                let _ = self.update_tx.send(IndexUpdate::BuildFailed {
                    error: e.to_string(),
                });
                Err(e)
            }
        }
    }

    async fn build(&self) -> std::result::Result<IndexManifest, IndexBuildError> {
        let records = self.registry.list().await?;
        debug!("Building index over {} records", records.len());

        let texts: Vec<String> = records.iter().map(DslRecord::source_text).collect();
        let batch_size = self.config.embed_config.batch_size.max(1);
        let dimension = self.embedder.dimension();

        let mut embeddings = Vec::with_capacity(texts.len());
        for batch in texts.chunks(batch_size) {
            let batch: Vec<&str> = batch.iter().map(String::as_str).collect();
            let outputs = self
                .embedder
                .embed_batch(&batch, &self.config.embed_config)
                .await?;
            if outputs.len() != batch.len() {
                return Err(IndexBuildError::EmbeddingCountMismatch {
                    expected: batch.len(),
                    got: outputs.len(),
                });
            }
            embeddings.extend(outputs);
        }

        let mut entries = Vec::with_capacity(records.len());
        for ((record, text), output) in records.iter().zip(texts).zip(embeddings) {
            if output.embedding.len() != dimension {
                return Err(StoreError::DimensionMismatch {
                    expected: dimension,
                    actual: output.embedding.len(),
                }
                .into());
            }
            entries.push(IndexEntry {
                dsl_name: record.dsl_name.clone(),
                embedding: output.embedding,
                source_text: text,
            });
        }

        let manifest = IndexManifest::new(self.embedder.model_name(), dimension, entries.len());
        self.store.publish(manifest.clone(), entries).await?;
        Ok(manifest)
    }

    /// Rebuild on every debounced batch of changes under `dir`.
    ///
    /// Build failures are logged and broadcast; the watch keeps running.
    pub async fn watch(&self, dir: &Path) -> Result<()> {
        let (event_tx, mut event_rx) = mpsc::channel::<RegistryEvent>(256);
        let mut watcher = RegistryWatcher::new(event_tx, self.config.debounce)
            .map_err(|e| Error::Other(format!("watcher error: {e}")))?;
        watcher
            .watch(dir)
            .map_err(|e| Error::Other(format!("watch error: {e}")))?;
        *self.watcher.write().await = Some(watcher);

        info!("Watching registry {:?}", dir);
        let service = self.clone();
        tokio::spawn(async move {
            while let Some(event) = event_rx.recv().await {
                let mut changed: Vec<PathBuf> = vec![event.path().to_path_buf()];
                // Fold the rest of the burst into one rebuild
                while let Ok(event) = event_rx.try_recv() {
                    changed.push(event.path().to_path_buf());
                }
                debug!("Registry changed: {:?}", changed);

                if let Err(e) = service.rebuild().await {
                    error!("Rebuild after registry change failed: {e}");
                }
            }
            debug!("Registry watch ended");
        });

        Ok(())
    }

    /// Stop watching. The rebuild task ends once the watcher is dropped.
    pub async fn stop(&self) {
        if self.watcher.write().await.take().is_some() {
            info!("Stopped watching registry");
        }
    }

    /// Whether a registry watch is active.
    pub async fn is_watching(&self) -> bool {
        self.watcher.read().await.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use gqlrag_core::{
        DistanceMetric, EmbedError, Embedder, EmbeddingOutput, OperationKind, SearchQuery,
    };
    use gqlrag_embed::HashingEmbedder;
    use gqlrag_registry::MemoryRegistry;
    use gqlrag_store::MemoryIndexStore;
    use std::sync::atomic::{AtomicBool, Ordering};

    fn record(name: &str, field: &str, description: &str) -> DslRecord {
        DslRecord {
            dsl_name: name.to_string(),
            kind: OperationKind::Query,
            description: description.to_string(),
            query_template: format!("query {{\n  {field} {{\n    id\n  }}\n}}\n"),
            variables: Vec::new(),
            related_types: vec!["Thing".to_string()],
            return_type: "Thing".to_string(),
            keywords: Vec::new(),
            type_definitions: Default::default(),
        }
    }

    fn records() -> Vec<DslRecord> {
        vec![
            record(
                "query_appliances",
                "appliances",
                "List appliances such as air conditioners and heaters",
            ),
            record("query_users", "users", "List registered users and their emails"),
            record("query_orders", "orders", "Recent purchase orders"),
        ]
    }

    /// Embedder that can be switched to fail.
    struct FlakyEmbedder {
        inner: HashingEmbedder,
        fail: AtomicBool,
    }

    #[async_trait]
    impl Embedder for FlakyEmbedder {
        fn model_name(&self) -> &str {
            "flaky"
        }

        fn dimension(&self) -> usize {
            self.inner.dimension()
        }

        fn max_tokens(&self) -> usize {
            512
        }

        async fn embed_text(
            &self,
            texts: &[&str],
            config: &EmbeddingConfig,
        ) -> std::result::Result<Vec<EmbeddingOutput>, EmbedError> {
            if self.fail.load(Ordering::SeqCst) {
                return Err(EmbedError::Inference("model crashed".to_string()));
            }
            self.inner.embed_text(texts, config).await
        }
    }

    /// Embedder that drops the last vector of every batch.
    struct ShortEmbedder;

    #[async_trait]
    impl Embedder for ShortEmbedder {
        fn model_name(&self) -> &str {
            "short"
        }

        fn dimension(&self) -> usize {
            8
        }

        fn max_tokens(&self) -> usize {
            512
        }

        async fn embed_text(
            &self,
            texts: &[&str],
            _config: &EmbeddingConfig,
        ) -> std::result::Result<Vec<EmbeddingOutput>, EmbedError> {
            Ok(texts
                .iter()
                .skip(1)
                .map(|_| EmbeddingOutput {
                    embedding: vec![0.5; 8],
                    token_count: 1,
                })
                .collect())
        }
    }

    /// Embedder whose vectors disagree with its advertised dimension.
    struct WrongDimensionEmbedder;

    #[async_trait]
    impl Embedder for WrongDimensionEmbedder {
        fn model_name(&self) -> &str {
            "wrong-dimension"
        }

        fn dimension(&self) -> usize {
            8
        }

        fn max_tokens(&self) -> usize {
            512
        }

        async fn embed_text(
            &self,
            texts: &[&str],
            _config: &EmbeddingConfig,
        ) -> std::result::Result<Vec<EmbeddingOutput>, EmbedError> {
            Ok(texts
                .iter()
                .map(|_| EmbeddingOutput {
                    embedding: vec![0.5; 4],
                    token_count: 1,
                })
                .collect())
        }
    }

    fn service_with(
        registry: MemoryRegistry,
        embedder: Arc<dyn Embedder>,
    ) -> (IndexService, Arc<MemoryIndexStore>) {
        let store = Arc::new(MemoryIndexStore::new());
        let pool = Arc::new(EmbedderPool::new(embedder, 2));
        let config = IndexConfig {
            embed_config: EmbeddingConfig {
                batch_size: 2,
                ..Default::default()
            },
            ..Default::default()
        };
        let service = IndexService::new(
            Arc::new(registry),
            Arc::clone(&store) as Arc<dyn IndexStore>,
            pool,
            config,
        );
        (service, store)
    }

    async fn ranking(store: &MemoryIndexStore, text: &str) -> Vec<String> {
        let query = HashingEmbedder::new()
            .embed_query(text, &EmbeddingConfig::default())
            .await
            .unwrap();
        store
            .search(SearchQuery {
                embedding: query.embedding,
                limit: 10,
                min_score: None,
                metric: DistanceMetric::Cosine,
            })
            .await
            .unwrap()
            .into_iter()
            .map(|r| r.dsl_name)
            .collect()
    }

    #[tokio::test]
    async fn test_rebuild_indexes_every_record() {
        let registry = MemoryRegistry::with_records(&records()).unwrap();
        let (service, store) = service_with(registry, Arc::new(HashingEmbedder::new()));

        let manifest = service.rebuild().await.unwrap();
        assert_eq!(manifest.entry_count, 3);
        assert_eq!(manifest.dimension, 384);
        assert_eq!(manifest.model, "hashing-v1");

        let stored = store.manifest().await.unwrap().unwrap();
        assert_eq!(stored.build_id, manifest.build_id);

        let snapshot = store.snapshot().await;
        let names: Vec<_> = snapshot.entries.iter().map(|e| e.dsl_name.as_str()).collect();
        assert_eq!(names, vec!["query_appliances", "query_orders", "query_users"]);
        assert!(snapshot.entries[0].source_text.contains("air conditioners"));

        let results = ranking(&store, "show me all air conditioners").await;
        assert_eq!(results[0], "query_appliances");
    }

    #[tokio::test]
    async fn test_empty_registry_gives_empty_index() {
        let (service, store) = service_with(MemoryRegistry::new(), Arc::new(HashingEmbedder::new()));

        let manifest = service.rebuild().await.unwrap();
        assert_eq!(manifest.entry_count, 0);
        assert!(store.manifest().await.unwrap().is_some());
        assert!(ranking(&store, "anything").await.is_empty());
    }

    #[tokio::test]
    async fn test_rebuild_twice_gives_identical_rankings() {
        let registry = MemoryRegistry::with_records(&records()).unwrap();
        let (service, store) = service_with(registry, Arc::new(HashingEmbedder::new()));

        let first_manifest = service.rebuild().await.unwrap();
        let first = ranking(&store, "purchase orders for users").await;
        let second_manifest = service.rebuild().await.unwrap();
        let second = ranking(&store, "purchase orders for users").await;

        assert_eq!(first, second);
        assert_ne!(first_manifest.build_id, second_manifest.build_id);
    }

    #[tokio::test]
    async fn test_failed_build_keeps_prior_index() {
        let registry = MemoryRegistry::with_records(&records()).unwrap();
        let embedder = Arc::new(FlakyEmbedder {
            inner: HashingEmbedder::new(),
            fail: AtomicBool::new(false),
        });
        let (service, store) = service_with(
            registry.clone(),
            Arc::clone(&embedder) as Arc<dyn Embedder>,
        );

        let published = service.rebuild().await.unwrap();

        registry
            .put(&record("query_invoices", "invoices", "Unpaid invoices"))
            .await
            .unwrap();
        embedder.fail.store(true, Ordering::SeqCst);

        let err = service.rebuild().await.unwrap_err();
        assert!(matches!(err, IndexBuildError::Embedding(_)));

        let current = store.manifest().await.unwrap().unwrap();
        assert_eq!(current.build_id, published.build_id);
        assert_eq!(store.snapshot().await.entries.len(), 3);

        let stats = service.stats().await;
        assert_eq!(stats.builds, 1);
        assert_eq!(stats.failed_builds, 1);
        assert_eq!(stats.indexed_records, 3);
    }

    #[tokio::test]
    async fn test_count_mismatch_fails_build() {
        let registry = MemoryRegistry::with_records(&records()).unwrap();
        let (service, store) = service_with(registry, Arc::new(ShortEmbedder));

        let err = service.rebuild().await.unwrap_err();
        assert!(matches!(
            err,
            IndexBuildError::EmbeddingCountMismatch {
                expected: 2,
                got: 1
            }
        ));
        assert!(store.manifest().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_dimension_mismatch_fails_build() {
        let registry = MemoryRegistry::with_records(&records()).unwrap();
        let (service, _store) = service_with(registry, Arc::new(WrongDimensionEmbedder));

        let err = service.rebuild().await.unwrap_err();
        assert!(matches!(
            err,
            IndexBuildError::Store(StoreError::DimensionMismatch {
                expected: 8,
                actual: 4
            })
        ));
    }

    #[tokio::test]
    async fn test_build_events() {
        let registry = MemoryRegistry::with_records(&records()).unwrap();
        let (service, _store) = service_with(registry, Arc::new(HashingEmbedder::new()));
        let mut updates = service.subscribe();

        let manifest = service.rebuild().await.unwrap();

        assert!(matches!(updates.recv().await.unwrap(), IndexUpdate::BuildStarted));
        match updates.recv().await.unwrap() {
            IndexUpdate::BuildCompleted { build_id, entries } => {
                assert_eq!(build_id, manifest.build_id);
                assert_eq!(entries, 3);
            }
            other => panic!("unexpected update: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_failed_build_event() {
        let registry = MemoryRegistry::with_records(&records()).unwrap();
        let (service, _store) = service_with(registry, Arc::new(ShortEmbedder));
        let mut updates = service.subscribe();

        let _ = service.rebuild().await;

        assert!(matches!(updates.recv().await.unwrap(), IndexUpdate::BuildStarted));
        assert!(matches!(
            updates.recv().await.unwrap(),
            IndexUpdate::BuildFailed { .. }
        ));
    }

    #[tokio::test]
    async fn test_concurrent_rebuilds_are_serialized() {
        let registry = MemoryRegistry::with_records(&records()).unwrap();
        let (service, store) = service_with(registry, Arc::new(HashingEmbedder::new()));

        let a = service.clone();
        let b = service.clone();
        let (ra, rb) = tokio::join!(a.rebuild(), b.rebuild());
        let (ma, mb) = (ra.unwrap(), rb.unwrap());

        let current = store.manifest().await.unwrap().unwrap().build_id;
        assert!(current == ma.build_id || current == mb.build_id);
        assert_eq!(service.stats().await.builds, 2);
    }

    #[tokio::test]
    async fn test_watch_and_stop() {
        let temp = tempfile::tempdir().unwrap();
        let (service, _store) = service_with(MemoryRegistry::new(), Arc::new(HashingEmbedder::new()));

        assert!(!service.is_watching().await);
        service.watch(temp.path()).await.unwrap();
        assert!(service.is_watching().await);
        service.stop().await;
        assert!(!service.is_watching().await);
    }
}
