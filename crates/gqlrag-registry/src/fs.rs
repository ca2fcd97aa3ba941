//! Filesystem-backed DSL registry.
//!
//! One `<dsl_name>.yaml` file per record. `.yml` files are read too. Hidden
//! files are ignored, which keeps in-flight temp files out of listings.

use async_trait::async_trait;
use gqlrag_core::{DslRecord, DslRepository, RegistryError, SchemaError, is_identifier};
use gqlrag_schema::validate_record;
use std::collections::{BTreeMap, BTreeSet};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Extensions recognised as record files.
pub const RECORD_EXTENSIONS: [&str; 2] = ["yaml", "yml"];

/// Registry stored as a directory of YAML files.
pub struct FsRegistry {
    dir: PathBuf,
}

impl FsRegistry {
    /// Registry rooted at `dir`. The directory is created on first write.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Registry directory.
    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Path a record is written to.
    #[must_use]
    pub fn record_path(&self, name: &str) -> PathBuf {
        self.dir.join(format!("{name}.yaml"))
    }

    /// Load and validate every record.
    pub async fn load(&self) -> Result<BTreeMap<String, DslRecord>, RegistryError> {
        let mut records = BTreeMap::new();
        for path in self.record_files().await? {
            let record = read_record(&path).await?;
            if records.contains_key(&record.dsl_name) {
                return Err(RegistryError::Duplicate(record.dsl_name));
            }
            records.insert(record.dsl_name.clone(), record);
        }
        debug!("Loaded {} records from {:?}", records.len(), self.dir);
        Ok(records)
    }

    /// Record files in the directory, sorted. A missing directory has none.
    async fn record_files(&self) -> Result<Vec<PathBuf>, RegistryError> {
        let mut entries = match tokio::fs::read_dir(&self.dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut files = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if is_record_file(&path) && entry.file_type().await?.is_file() {
                files.push(path);
            }
        }
        files.sort();
        Ok(files)
    }

    /// Serialize to a hidden temp file, then rename over the target.
    async fn write_record(&self, record: &DslRecord) -> Result<(), RegistryError> {
        let yaml = serde_yaml::to_string(record)?;
        let target = self.record_path(&record.dsl_name);
        let tmp = self.dir.join(format!(".{}.yaml.tmp", record.dsl_name));

        tokio::fs::write(&tmp, yaml).await?;
        if let Err(e) = tokio::fs::rename(&tmp, &target).await {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(e.into());
        }
        debug!("Wrote {:?}", target);
        Ok(())
    }

    async fn remove_if_exists(path: &Path) -> Result<bool, RegistryError> {
        match tokio::fs::remove_file(path).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }
}

#[async_trait]
impl DslRepository for FsRegistry {
    async fn list(&self) -> Result<Vec<DslRecord>, RegistryError> {
        Ok(self.load().await?.into_values().collect())
    }

    async fn get(&self, name: &str) -> Result<Option<DslRecord>, RegistryError> {
        // Names come from the index file; never let one leave the directory
        if !is_identifier(name) {
            warn!("Ignoring lookup of invalid record name {:?}", name);
            return Ok(None);
        }
        for ext in RECORD_EXTENSIONS {
            let path = self.dir.join(format!("{name}.{ext}"));
            match read_record(&path).await {
                Ok(record) => return Ok(Some(record)),
                Err(RegistryError::Io(e)) if e.kind() == ErrorKind::NotFound => {}
                Err(e) => return Err(e),
            }
        }
        Ok(None)
    }

    async fn put(&self, record: &DslRecord) -> Result<(), RegistryError> {
        validate_record(record)?;
        tokio::fs::create_dir_all(&self.dir).await?;
        self.write_record(record).await?;
        Self::remove_if_exists(&self.dir.join(format!("{}.yml", record.dsl_name))).await?;
        Ok(())
    }

    async fn replace_all(&self, records: &[DslRecord]) -> Result<(), RegistryError> {
        let mut names = BTreeSet::new();
        for record in records {
            validate_record(record)?;
            if !names.insert(record.dsl_name.clone()) {
                return Err(RegistryError::Duplicate(record.dsl_name.clone()));
            }
        }

        tokio::fs::create_dir_all(&self.dir).await?;
        for record in records {
            self.write_record(record).await?;
        }

        let keep: BTreeSet<PathBuf> = names.iter().map(|n| self.record_path(n)).collect();
        let mut stale = 0;
        for path in self.record_files().await? {
            if !keep.contains(&path) {
                Self::remove_if_exists(&path).await?;
                stale += 1;
            }
        }

        info!(
            "Wrote {} records to {:?} ({} stale removed)",
            records.len(),
            self.dir,
            stale
        );
        Ok(())
    }

    async fn remove(&self, name: &str) -> Result<bool, RegistryError> {
        if !is_identifier(name) {
            warn!("Ignoring removal of invalid record name {:?}", name);
            return Ok(false);
        }
        let mut removed = false;
        for ext in RECORD_EXTENSIONS {
            removed |= Self::remove_if_exists(&self.dir.join(format!("{name}.{ext}"))).await?;
        }
        if !removed {
            warn!("No record named {} to remove", name);
        }
        Ok(removed)
    }
}

/// Whether `path` names a visible `.yaml` or `.yml` file.
#[must_use]
pub fn is_record_file(path: &Path) -> bool {
    let hidden = path
        .file_name()
        .and_then(|n| n.to_str())
        .is_none_or(|n| n.starts_with('.'));
    let ext_ok = path
        .extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| RECORD_EXTENSIONS.contains(&e));
    !hidden && ext_ok
}

async fn read_record(path: &Path) -> Result<DslRecord, RegistryError> {
    let stem = path
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or_default()
        .to_string();
    let text = tokio::fs::read_to_string(path).await?;

    let record: DslRecord =
        serde_yaml::from_str(&text).map_err(|e| SchemaError::MalformedRecord {
            name: stem.clone(),
            reason: e.to_string(),
        })?;

    if record.dsl_name != stem {
        return Err(SchemaError::MalformedRecord {
            name: stem,
            reason: format!("dsl_name {} does not match the file name", record.dsl_name),
        }
        .into());
    }

    validate_record(&record)?;
    Ok(record)
}

#[cfg(test)]
mod tests {
    use super::*;
    use gqlrag_core::OperationKind;
    use tempfile::tempdir;

    fn record(name: &str) -> DslRecord {
        DslRecord {
            dsl_name: name.to_string(),
            kind: OperationKind::Query,
            description: format!("query {name}"),
            query_template: "query Q($id: ID!) { item(id: $id) { id } }".to_string(),
            variables: vec!["id".to_string()],
            related_types: vec!["Item".to_string()],
            return_type: "Item".to_string(),
            keywords: vec![],
            type_definitions: BTreeMap::new(),
        }
    }

    #[tokio::test]
    async fn test_missing_dir_is_empty() {
        let temp = tempdir().unwrap();
        let registry = FsRegistry::new(temp.path().join("absent"));
        assert!(registry.list().await.unwrap().is_empty());
        assert!(registry.is_empty().await.unwrap());
    }

    #[tokio::test]
    async fn test_put_and_get() {
        let temp = tempdir().unwrap();
        let registry = FsRegistry::new(temp.path().join("dsl"));

        registry.put(&record("query_item")).await.unwrap();

        assert!(registry.record_path("query_item").exists());
        let loaded = registry.get("query_item").await.unwrap().unwrap();
        assert_eq!(loaded, record("query_item"));
        assert!(registry.get("query_other").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_list_is_sorted() {
        let temp = tempdir().unwrap();
        let registry = FsRegistry::new(temp.path());
        registry.put(&record("query_b")).await.unwrap();
        registry.put(&record("query_a")).await.unwrap();

        let names: Vec<_> = registry
            .list()
            .await
            .unwrap()
            .into_iter()
            .map(|r| r.dsl_name)
            .collect();
        assert_eq!(names, vec!["query_a", "query_b"]);
        assert_eq!(registry.len().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_replace_all_removes_stale() {
        let temp = tempdir().unwrap();
        let registry = FsRegistry::new(temp.path());
        registry.put(&record("query_old")).await.unwrap();
        std::fs::write(temp.path().join("notes.txt"), "keep me").unwrap();

        registry
            .replace_all(&[record("query_a"), record("query_b")])
            .await
            .unwrap();

        assert!(!registry.record_path("query_old").exists());
        assert!(temp.path().join("notes.txt").exists());
        assert_eq!(registry.len().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_replace_all_rejects_duplicates() {
        let temp = tempdir().unwrap();
        let registry = FsRegistry::new(temp.path());
        let err = registry
            .replace_all(&[record("query_a"), record("query_a")])
            .await
            .unwrap_err();
        assert!(matches!(err, RegistryError::Duplicate(_)));
    }

    #[tokio::test]
    async fn test_reads_yml_extension() {
        let temp = tempdir().unwrap();
        let yaml = serde_yaml::to_string(&record("query_item")).unwrap();
        std::fs::write(temp.path().join("query_item.yml"), yaml).unwrap();

        let registry = FsRegistry::new(temp.path());
        assert!(registry.get("query_item").await.unwrap().is_some());
        assert_eq!(registry.len().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_duplicate_across_extensions() {
        let temp = tempdir().unwrap();
        let yaml = serde_yaml::to_string(&record("query_item")).unwrap();
        std::fs::write(temp.path().join("query_item.yml"), &yaml).unwrap();
        std::fs::write(temp.path().join("query_item.yaml"), &yaml).unwrap();

        let err = FsRegistry::new(temp.path()).list().await.unwrap_err();
        assert!(matches!(err, RegistryError::Duplicate(name) if name == "query_item"));
    }

    #[tokio::test]
    async fn test_missing_key_is_malformed() {
        let temp = tempdir().unwrap();
        std::fs::write(
            temp.path().join("query_item.yaml"),
            "dsl_name: query_item\ntype: query\ndescription: x\nquery_template: '{ item }'\nvariables: []\nrelated_types: []\n",
        )
        .unwrap();

        let err = FsRegistry::new(temp.path()).list().await.unwrap_err();
        match err {
            RegistryError::Schema(SchemaError::MalformedRecord { name, reason }) => {
                assert_eq!(name, "query_item");
                assert!(reason.contains("return_type"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_name_must_match_file() {
        let temp = tempdir().unwrap();
        let yaml = serde_yaml::to_string(&record("query_item")).unwrap();
        std::fs::write(temp.path().join("query_other.yaml"), yaml).unwrap();

        let err = FsRegistry::new(temp.path()).list().await.unwrap_err();
        assert!(err.to_string().contains("does not match the file name"));
    }

    #[tokio::test]
    async fn test_placeholder_violation_rejected() {
        let temp = tempdir().unwrap();
        let mut bad = record("query_item");
        bad.variables = vec![];
        let yaml = serde_yaml::to_string(&bad).unwrap();
        std::fs::write(temp.path().join("query_item.yaml"), yaml).unwrap();

        let err = FsRegistry::new(temp.path()).list().await.unwrap_err();
        assert!(matches!(
            err,
            RegistryError::Schema(SchemaError::MalformedRecord { .. })
        ));
    }

    #[tokio::test]
    async fn test_put_rejects_invalid_record() {
        let temp = tempdir().unwrap();
        let registry = FsRegistry::new(temp.path());
        let mut bad = record("query_item");
        bad.query_template = "query Q($id: ID!) { item(id: $id) {".to_string();

        assert!(registry.put(&bad).await.is_err());
        assert!(!registry.record_path("query_item").exists());
    }

    #[tokio::test]
    async fn test_remove() {
        let temp = tempdir().unwrap();
        let registry = FsRegistry::new(temp.path());
        registry.put(&record("query_item")).await.unwrap();

        assert!(registry.remove("query_item").await.unwrap());
        assert!(!registry.remove("query_item").await.unwrap());
        assert!(registry.is_empty().await.unwrap());
    }

    #[tokio::test]
    async fn test_names_cannot_escape_the_directory() {
        let temp = tempdir().unwrap();
        let outside = FsRegistry::new(temp.path());
        outside.put(&record("query_secret")).await.unwrap();

        let registry = FsRegistry::new(temp.path().join("dsl"));
        registry.put(&record("query_item")).await.unwrap();

        assert!(registry.get("../query_secret").await.unwrap().is_none());
        assert!(!registry.remove("../query_secret").await.unwrap());
        assert!(temp.path().join("query_secret.yaml").exists());
        assert!(registry.get("query_item").await.unwrap().is_some());
    }

    #[test]
    fn test_is_record_file() {
        assert!(is_record_file(Path::new("/dsl/query_a.yaml")));
        assert!(is_record_file(Path::new("/dsl/query_a.yml")));
        assert!(!is_record_file(Path::new("/dsl/.query_a.yaml.tmp")));
        assert!(!is_record_file(Path::new("/dsl/.hidden.yaml")));
        assert!(!is_record_file(Path::new("/dsl/readme.md")));
    }
}
