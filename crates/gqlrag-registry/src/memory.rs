//! In-memory DSL registry for tests and embedding.

use async_trait::async_trait;
use gqlrag_core::{DslRecord, DslRepository, RegistryError};
use gqlrag_schema::validate_record;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::debug;

/// In-memory registry with the same validation as [`FsRegistry`](crate::FsRegistry).
#[derive(Clone, Default)]
pub struct MemoryRegistry {
    records: Arc<RwLock<BTreeMap<String, DslRecord>>>,
}

impl MemoryRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a registry holding `records`.
    pub fn with_records(records: &[DslRecord]) -> Result<Self, RegistryError> {
        let mut map = BTreeMap::new();
        for record in records {
            validate_record(record)?;
            if map.insert(record.dsl_name.clone(), record.clone()).is_some() {
                return Err(RegistryError::Duplicate(record.dsl_name.clone()));
            }
        }
        Ok(Self {
            records: Arc::new(RwLock::new(map)),
        })
    }
}

#[async_trait]
impl DslRepository for MemoryRegistry {
    async fn list(&self) -> Result<Vec<DslRecord>, RegistryError> {
        Ok(self.records.read().await.values().cloned().collect())
    }

    async fn get(&self, name: &str) -> Result<Option<DslRecord>, RegistryError> {
        Ok(self.records.read().await.get(name).cloned())
    }

    async fn put(&self, record: &DslRecord) -> Result<(), RegistryError> {
        validate_record(record)?;
        self.records
            .write()
            .await
            .insert(record.dsl_name.clone(), record.clone());
        debug!("Stored {}", record.dsl_name);
        Ok(())
    }

    async fn replace_all(&self, records: &[DslRecord]) -> Result<(), RegistryError> {
        let fresh = Self::with_records(records)?;
        let fresh = fresh.records.read().await.clone();
        *self.records.write().await = fresh;
        Ok(())
    }

    async fn remove(&self, name: &str) -> Result<bool, RegistryError> {
        Ok(self.records.write().await.remove(name).is_some())
    }

    async fn len(&self) -> Result<usize, RegistryError> {
        Ok(self.records.read().await.len())
    }
}
