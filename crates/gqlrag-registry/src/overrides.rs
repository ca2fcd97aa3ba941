//! Hand-written description and keyword overrides.
//!
//! Generated descriptions are often just `"query fieldName"`. An overrides file
//! replaces them with retrieval-friendly text:
//!
//! ```yaml
//! query_appliances:
//!   description: List appliances such as air conditioners and heaters
//!   keywords: [air conditioner, heater, device]
//! ```

use gqlrag_core::{DslRepository, RegistryError};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use tracing::{info, warn};

/// Replacement fields for one record.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RecordOverride {
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub keywords: Option<Vec<String>>,
}

/// Overrides keyed by DSL name.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DescriptionOverrides {
    pub entries: BTreeMap<String, RecordOverride>,
}

/// Result of applying overrides.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct OverrideReport {
    /// Records that changed
    pub updated: Vec<String>,
    /// Records already matching their override
    pub unchanged: Vec<String>,
    /// Override keys with no record
    pub missing: Vec<String>,
}

impl DescriptionOverrides {
    /// Parse an overrides document.
    pub fn from_yaml(text: &str) -> Result<Self, RegistryError> {
        Ok(serde_yaml::from_str(text)?)
    }

    /// Read an overrides file.
    pub async fn load(path: &Path) -> Result<Self, RegistryError> {
        let text = tokio::fs::read_to_string(path).await?;
        Self::from_yaml(&text)
    }

    /// Apply every override to `repository`.
    pub async fn apply(
        &self,
        repository: &dyn DslRepository,
    ) -> Result<OverrideReport, RegistryError> {
        let mut report = OverrideReport::default();

        for (name, entry) in &self.entries {
            let Some(mut record) = repository.get(name).await? else {
                warn!("Override for unknown record {}", name);
                report.missing.push(name.clone());
                continue;
            };

            let mut changed = false;
            if let Some(description) = &entry.description {
                let description = description.trim();
                if record.description != description {
                    record.description = description.to_string();
                    changed = true;
                }
            }
            if let Some(keywords) = &entry.keywords {
                if &record.keywords != keywords {
                    record.keywords.clone_from(keywords);
                    changed = true;
                }
            }

            if changed {
                repository.put(&record).await?;
                report.updated.push(name.clone());
            } else {
                report.unchanged.push(name.clone());
            }
        }

        info!(
            "Applied overrides: {} updated, {} unchanged, {} missing",
            report.updated.len(),
            report.unchanged.len(),
            report.missing.len()
        );
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::MemoryRegistry;
    use gqlrag_core::{DslRecord, OperationKind};

    fn record(name: &str) -> DslRecord {
        DslRecord {
            dsl_name: name.to_string(),
            kind: OperationKind::Query,
            description: format!("query {name}"),
            query_template: "{ appliances { id } }".to_string(),
            variables: vec![],
            related_types: vec!["Appliance".to_string()],
            return_type: "Appliance".to_string(),
            keywords: vec![],
            type_definitions: BTreeMap::new(),
        }
    }

    #[tokio::test]
    async fn test_apply_overrides() {
        let registry =
            MemoryRegistry::with_records(&[record("query_appliances"), record("query_users")])
                .unwrap();
        let overrides = DescriptionOverrides::from_yaml(
            "query_appliances:\n  description: '  Air conditioners and heaters  '\n  keywords: [hvac]\nquery_users:\n  description: query query_users\nquery_missing:\n  description: nope\n",
        )
        .unwrap();

        let report = overrides.apply(&registry).await.unwrap();

        assert_eq!(report.updated, vec!["query_appliances"]);
        assert_eq!(report.unchanged, vec!["query_users"]);
        assert_eq!(report.missing, vec!["query_missing"]);

        let updated = registry.get("query_appliances").await.unwrap().unwrap();
        assert_eq!(updated.description, "Air conditioners and heaters");
        assert_eq!(updated.keywords, vec!["hvac"]);
    }

    #[test]
    fn test_partial_override_parses() {
        let overrides = DescriptionOverrides::from_yaml("query_a:\n  keywords: [x, y]\n").unwrap();
        let entry = &overrides.entries["query_a"];
        assert!(entry.description.is_none());
        assert_eq!(entry.keywords.as_deref(), Some(&["x".to_string(), "y".to_string()][..]));
    }

    #[test]
    fn test_invalid_yaml() {
        assert!(matches!(
            DescriptionOverrides::from_yaml("- not\n- a map\n"),
            Err(RegistryError::Yaml(_))
        ));
    }
}
