//! Index store persisted as a single JSON file.
//!
//! The file is replaced with a temp-file-and-rename, and memory is swapped only
//! after the rename succeeds. A failed publish leaves the previous index in
//! effect both on disk and in memory.

use async_trait::async_trait;
use gqlrag_core::{
    IndexEntry, IndexManifest, IndexStore, SearchQuery, SearchResult, StoreError, StoreStats,
};
use serde::{Deserialize, Serialize};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use crate::memory::{IndexSnapshot, MemoryIndexStore};

#[derive(Serialize, Deserialize)]
struct IndexFile {
    manifest: IndexManifest,
    entries: Vec<IndexEntry>,
}

/// JSON-file-backed index store.
pub struct FileIndexStore {
    path: PathBuf,
    memory: MemoryIndexStore,
}

impl FileIndexStore {
    /// Store persisted at `path`.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            memory: MemoryIndexStore::new(),
        }
    }

    /// Index file path.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn tmp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_default();
        name.push(".tmp");
        self.path.with_file_name(name)
    }

    async fn persist(&self, file: &IndexFile) -> Result<(), StoreError> {
        let json = serde_json::to_vec(file).map_err(|e| StoreError::Persist(e.to_string()))?;

        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent)
                    .await
                    .map_err(|e| StoreError::Persist(format!("{}: {e}", parent.display())))?;
            }
        }

        let tmp = self.tmp_path();
        tokio::fs::write(&tmp, json)
            .await
            .map_err(|e| StoreError::Persist(format!("{}: {e}", tmp.display())))?;
        if let Err(e) = tokio::fs::rename(&tmp, &self.path).await {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(StoreError::Persist(format!("{}: {e}", self.path.display())));
        }
        Ok(())
    }
}

#[async_trait]
impl IndexStore for FileIndexStore {
    async fn init(&self) -> Result<(), StoreError> {
        let bytes = match tokio::fs::read(&self.path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                debug!("No index at {:?}, starting empty", self.path);
                return Ok(());
            }
            Err(e) => return Err(StoreError::Init(format!("{}: {e}", self.path.display()))),
        };

        let file: IndexFile = serde_json::from_slice(&bytes)
            .map_err(|e| StoreError::Init(format!("{}: {e}", self.path.display())))?;
        let snapshot = IndexSnapshot::validated(file.manifest, file.entries)
            .map_err(|e| StoreError::Init(format!("{}: {e}", self.path.display())))?;

        info!(
            "Loaded index {:?} ({} entries)",
            self.path,
            snapshot.entries.len()
        );
        self.memory.swap(snapshot).await;
        Ok(())
    }

    async fn publish(
        &self,
        manifest: IndexManifest,
        entries: Vec<IndexEntry>,
    ) -> Result<(), StoreError> {
        let snapshot = IndexSnapshot::validated(manifest, entries)?;
        let file = IndexFile {
            manifest: snapshot.manifest.clone().ok_or_else(|| {
                StoreError::Publish("snapshot has no manifest".to_string())
            })?,
            entries: snapshot.entries,
        };

        self.persist(&file).await?;

        let IndexFile { manifest, entries } = file;
        self.memory
            .swap(IndexSnapshot {
                manifest: Some(manifest),
                entries,
            })
            .await;
        debug!("Persisted index to {:?}", self.path);
        Ok(())
    }

    async fn search(&self, query: SearchQuery) -> Result<Vec<SearchResult>, StoreError> {
        self.memory.search(query).await
    }

    async fn manifest(&self) -> Result<Option<IndexManifest>, StoreError> {
        self.memory.manifest().await
    }

    async fn stats(&self) -> Result<StoreStats, StoreError> {
        let mut stats = self.memory.stats().await?;
        stats.index_size_bytes = tokio::fs::metadata(&self.path)
            .await
            .map(|m| m.len())
            .unwrap_or(0);
        Ok(stats)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gqlrag_core::DistanceMetric;
    use tempfile::tempdir;

    fn entries() -> Vec<IndexEntry> {
        vec![
            IndexEntry {
                dsl_name: "query_appliances".to_string(),
                embedding: vec![1.0, 0.0],
                source_text: "appliances".to_string(),
            },
            IndexEntry {
                dsl_name: "query_users".to_string(),
                embedding: vec![0.0, 1.0],
                source_text: "users".to_string(),
            },
        ]
    }

    fn query() -> SearchQuery {
        SearchQuery {
            embedding: vec![1.0, 0.1],
            limit: 1,
            min_score: None,
            metric: DistanceMetric::Cosine,
        }
    }

    #[tokio::test]
    async fn test_publish_and_reload() {
        let temp = tempdir().unwrap();
        let path = temp.path().join("data").join("index.json");

        let store = FileIndexStore::new(&path);
        store.init().await.unwrap();
        let manifest = IndexManifest::new("hashing-v1", 2, 2);
        let build_id = manifest.build_id;
        store.publish(manifest, entries()).await.unwrap();
        assert!(path.exists());

        let reopened = FileIndexStore::new(&path);
        reopened.init().await.unwrap();
        assert_eq!(reopened.manifest().await.unwrap().unwrap().build_id, build_id);

        let results = reopened.search(query()).await.unwrap();
        assert_eq!(results[0].dsl_name, "query_appliances");

        let stats = reopened.stats().await.unwrap();
        assert_eq!(stats.total_entries, 2);
        assert!(stats.index_size_bytes > 0);
    }

    #[tokio::test]
    async fn test_missing_file_is_empty() {
        let temp = tempdir().unwrap();
        let store = FileIndexStore::new(temp.path().join("index.json"));
        store.init().await.unwrap();
        assert!(store.search(query()).await.unwrap().is_empty());
        assert_eq!(store.stats().await.unwrap().index_size_bytes, 0);
    }

    #[tokio::test]
    async fn test_corrupt_file_fails_init() {
        let temp = tempdir().unwrap();
        let path = temp.path().join("index.json");
        std::fs::write(&path, "{not json").unwrap();

        let err = FileIndexStore::new(&path).init().await.unwrap_err();
        assert!(matches!(err, StoreError::Init(_)));
    }

    #[tokio::test]
    async fn test_failed_persist_keeps_prior_index() {
        let temp = tempdir().unwrap();
        let path = temp.path().join("index.json");
        let store = FileIndexStore::new(&path);
        let manifest = IndexManifest::new("hashing-v1", 2, 2);
        let build_id = manifest.build_id;
        store.publish(manifest, entries()).await.unwrap();

        // A directory where the temp file should go makes the write fail
        std::fs::create_dir(temp.path().join("index.json.tmp")).unwrap();
        let err = store
            .publish(IndexManifest::new("hashing-v1", 2, 0), Vec::new())
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Persist(_)));

        assert_eq!(store.manifest().await.unwrap().unwrap().build_id, build_id);
        let reopened = FileIndexStore::new(&path);
        reopened.init().await.unwrap();
        assert_eq!(reopened.manifest().await.unwrap().unwrap().build_id, build_id);
    }

    #[test]
    fn test_tmp_path() {
        let store = FileIndexStore::new("/var/lib/gqlrag/index.json");
        assert_eq!(store.tmp_path(), PathBuf::from("/var/lib/gqlrag/index.json.tmp"));
    }
}
