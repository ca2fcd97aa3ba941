//! Configuration handling for gqlrag.
//!
//! Loaded from `config.toml` in the config directory, or from `--config`.
//! Every key has a default, so a partial file (or none) is fine.

use anyhow::{Context, Result};
use directories::ProjectDirs;
use gqlrag_query::{BindingPolicy, EndpointConfig, RetrievalConfig};
use gqlrag_schema::GeneratorConfig;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Main configuration structure.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    /// Input and output locations
    #[serde(default)]
    pub paths: PathsConfig,

    /// DSL generation
    #[serde(default)]
    pub generator: GeneratorConfig,

    /// Embedding model
    #[serde(default)]
    pub embedding: EmbeddingSettings,

    /// Candidate retrieval
    #[serde(default)]
    pub retrieval: RetrievalConfig,

    /// Fallbacks for unbound variables
    #[serde(default)]
    pub binding: BindingPolicy,

    /// GraphQL endpoint used by `ask --execute`
    #[serde(default)]
    pub endpoint: EndpointConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// File locations. Unset paths fall back to the data directory.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct PathsConfig {
    /// GraphQL SDL file used by `generate`
    pub schema: Option<PathBuf>,

    /// Directory holding one YAML file per DSL record
    pub registry_dir: Option<PathBuf>,

    /// Persisted retrieval index
    pub index_file: Option<PathBuf>,
}

impl PathsConfig {
    pub fn registry_dir(&self) -> Result<PathBuf> {
        match &self.registry_dir {
            Some(dir) => Ok(dir.clone()),
            None => Ok(data_dir()
                .context("Failed to get data directory")?
                .join("registry")),
        }
    }

    pub fn index_file(&self) -> Result<PathBuf> {
        match &self.index_file {
            Some(path) => Ok(path.clone()),
            None => Ok(data_dir()
                .context("Failed to get data directory")?
                .join("index.json")),
        }
    }
}

/// Which embedder to build.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum EmbeddingModel {
    /// Deterministic lexical hashing, no download
    #[default]
    Hashing,
    /// BAAI/bge-small-en-v1.5 via Candle (needs the `candle` feature)
    BgeSmall,
}

/// Embedding-related configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingSettings {
    /// Model to use
    #[serde(default)]
    pub model: EmbeddingModel,

    /// Vector size for the hashing model
    #[serde(default = "default_dimension")]
    pub dimension: usize,

    /// Batch size for embedding
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// Max concurrent embedding jobs
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent: usize,

    /// Cached record embeddings
    #[serde(default = "default_cache_size")]
    pub cache_size: usize,
}

fn default_dimension() -> usize {
    384
}

fn default_batch_size() -> usize {
    32
}

fn default_max_concurrent() -> usize {
    4
}

fn default_cache_size() -> usize {
    10_000
}

impl Default for EmbeddingSettings {
    fn default() -> Self {
        Self {
            model: EmbeddingModel::default(),
            dimension: default_dimension(),
            batch_size: default_batch_size(),
            max_concurrent: default_max_concurrent(),
            cache_size: default_cache_size(),
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level
    #[serde(default = "default_log_level")]
    pub level: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

impl Config {
    /// Load from the default location, or defaults if there is no file.
    pub fn load() -> Result<Self> {
        Self::load_from(None)
    }

    /// Load from `path`, which must exist, or from the default location.
    pub fn load_from(path: Option<PathBuf>) -> Result<Self> {
        match path {
            Some(path) => Self::read(&path),
            None => match Self::config_path() {
                Some(path) if path.exists() => Self::read(&path),
                _ => Ok(Self::default()),
            },
        }
    }

    fn read(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        Self::parse(&text).with_context(|| format!("Invalid config {}", path.display()))
    }

    pub fn parse(text: &str) -> Result<Self> {
        Ok(toml::from_str(text)?)
    }

    /// Default config file location.
    pub fn config_path() -> Option<PathBuf> {
        config_dir().map(|dir| dir.join("config.toml"))
    }

    /// Sample configuration file.
    pub fn sample_toml() -> &'static str {
        r#"# gqlrag configuration

[paths]
# schema = "schema.graphql"
# registry_dir = "dsl"
# index_file = "index.json"

[generator]
# Field or DSL names to skip; a trailing * matches by prefix
denylist = []
selection_depth = 2
include_type_definitions = true

[embedding]
# "hashing" or "bge-small" (requires the candle feature)
model = "hashing"
dimension = 384
batch_size = 32
max_concurrent = 4
cache_size = 10000

[retrieval]
k = 5
min_score = 0.1
# "cosine", "l2" or "dot"
metric = "cosine"

[binding]
# Bind [] to list variables nothing else supplied
default_lists_to_empty = false
# Bind null to nullable variables nothing else supplied
default_nullable_to_null = false

[endpoint]
# url = "http://localhost:8000/graphql"
timeout_secs = 30

[endpoint.headers]
# Authorization = "Bearer ..."

[logging]
level = "info"
"#
    }
}

/// Get the XDG data directory for gqlrag.
pub fn data_dir() -> Option<PathBuf> {
    if let Ok(dir) = std::env::var("GQLRAG_DATA_DIR") {
        return Some(PathBuf::from(dir));
    }

    ProjectDirs::from("", "", "gqlrag").map(|dirs| dirs.data_dir().to_path_buf())
}

/// Get the XDG config directory for gqlrag.
pub fn config_dir() -> Option<PathBuf> {
    if let Ok(dir) = std::env::var("GQLRAG_CONFIG_DIR") {
        return Some(PathBuf::from(dir));
    }

    ProjectDirs::from("", "", "gqlrag").map(|dirs| dirs.config_dir().to_path_buf())
}

/// Get the XDG cache directory for gqlrag.
pub fn cache_dir() -> Option<PathBuf> {
    ProjectDirs::from("", "", "gqlrag").map(|dirs| dirs.cache_dir().to_path_buf())
}
