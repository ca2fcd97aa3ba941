//! # gqlrag CLI
//!
//! Turns natural-language requests into executable GraphQL operations.
//!
//! A GraphQL schema is compiled offline into a registry of DSL records, one per
//! root query or mutation. The records are embedded into a retrieval index.
//! At request time the best-matching record is retrieved and its template
//! variables are bound.
//!
//! ## Commands
//!
//! - `gqlrag generate <SCHEMA>` - Generate the DSL registry from an SDL file
//! - `gqlrag index` - Build the retrieval index from the registry
//! - `gqlrag search <TEXT>` - Show the raw retrieval ranking
//! - `gqlrag ask <TEXT>` - Produce an executable query and its variables;
//!   `--execute` also sends it to the configured endpoint
//! - `gqlrag enrich <OVERRIDES>` - Apply hand-written descriptions and keywords
//! - `gqlrag status` - Show index statistics
//!
//! ## Examples
//!
//! ```bash
//! gqlrag generate schema.graphql --out dsl
//! gqlrag index --registry dsl
//! gqlrag ask "show me all air conditioners" --var 'filters=[]'
//! gqlrag ask "user id:42" --format json
//! gqlrag ask "user id:42" --execute --endpoint http://localhost:8000/graphql
//! ```

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use gqlrag_core::{
    AssembledQuery, DslRepository, Embedder, EmbeddingConfig, IndexManifest, IndexStore, RequestError,
};
#[cfg(feature = "candle")]
use gqlrag_embed::BgeEmbedder;
use gqlrag_embed::{EmbedderPool, EmbeddingCache, HashingEmbedder};
use gqlrag_index::{IndexConfig, IndexService, IndexUpdate};
use gqlrag_query::{
    GraphqlClient, GraphqlResponse, InlineValueExtractor, QueryAssembler, QueryPipeline, RequestParser, Retriever, parse_value,
};
use gqlrag_registry::{DescriptionOverrides, FsRegistry};
use gqlrag_schema::{DslGenerator, SchemaReader};
use gqlrag_store::FileIndexStore;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{Level, info, warn};
use tracing_subscriber::FmtSubscriber;

mod config;

use config::{Config, EmbeddingModel};

#[derive(Parser)]
#[command(name = "gqlrag")]
#[command(about = "Retrieval-augmented GraphQL query generation")]
#[command(version)]
struct Cli {
    /// Path to config file (default: ~/.config/gqlrag/config.toml)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Output format (text, json)
    #[arg(short, long, default_value = "text", global = true)]
    format: OutputFormat,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, Debug, Default, clap::ValueEnum)]
enum OutputFormat {
    #[default]
    Text,
    Json,
}

#[derive(Subcommand)]
enum Commands {
    /// Generate the DSL registry from a GraphQL schema
    Generate {
        /// SDL file (default: paths.schema)
        schema: Option<PathBuf>,

        /// Registry directory to write (default: paths.registry_dir)
        #[arg(short, long)]
        out: Option<PathBuf>,

        /// Skip an operation by field or DSL name; a trailing * matches by prefix
        #[arg(long = "deny")]
        deny: Vec<String>,

        /// Nested selection depth below the root field
        #[arg(long)]
        depth: Option<usize>,
    },

    /// Build the retrieval index from the registry
    Index {
        /// Registry directory (default: paths.registry_dir)
        #[arg(short, long)]
        registry: Option<PathBuf>,

        /// Keep watching the registry and rebuild on changes
        #[arg(short, long)]
        watch: bool,
    },

    /// Show the retrieval ranking for a request
    Search {
        /// Request text
        text: String,

        /// Maximum candidates
        #[arg(short, long)]
        limit: Option<usize>,
    },

    /// Produce an executable GraphQL query for a request
    Ask {
        /// Request text; may contain `$name=value` and `limit:N`
        text: String,

        /// Explicit variable value as NAME=VALUE (JSON, or a plain string)
        #[arg(long = "var", value_name = "NAME=VALUE")]
        vars: Vec<String>,

        /// Maximum candidates
        #[arg(short, long)]
        limit: Option<usize>,

        /// Send the query to the GraphQL endpoint and print the response
        #[arg(short = 'x', long)]
        execute: bool,

        /// Endpoint URL for --execute (default: endpoint.url)
        #[arg(long, value_name = "URL", requires = "execute")]
        endpoint: Option<String>,
    },

    /// Apply description and keyword overrides to the registry
    Enrich {
        /// YAML file mapping DSL names to overrides
        overrides: PathBuf,

        /// Registry directory (default: paths.registry_dir)
        #[arg(short, long)]
        registry: Option<PathBuf>,
    },

    /// Show index status
    Status,

    /// Manage configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Show current configuration
    Show,
    /// Print sample configuration file
    Init,
    /// Show config file path
    Path,
}

/// Output structure for generation.
#[derive(Serialize)]
struct GenerateOutput {
    registry: String,
    records: Vec<String>,
    conflicts: Vec<ConflictItem>,
    excluded: Vec<String>,
}

#[derive(Serialize)]
struct ConflictItem {
    base_name: String,
    operations: Vec<String>,
    resolved: Vec<String>,
}

/// Output structure for search results.
#[derive(Serialize)]
struct SearchOutput {
    query: String,
    results: Vec<SearchItem>,
}

#[derive(Serialize)]
struct SearchItem {
    dsl_name: String,
    score: f32,
}

/// Output structure for an executed query.
#[derive(Serialize)]
struct ExecuteOutput<'a> {
    endpoint: &'a str,
    query: &'a AssembledQuery,
    response: &'a GraphqlResponse,
}

/// Output structure for status.
#[derive(Serialize)]
struct StatusOutput {
    index_file: String,
    registry_dir: String,
    registry_records: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    manifest: Option<IndexManifest>,
    index_size_bytes: u64,
}

/// Build the configured embedder, wrapped in a cache.
async fn create_embedder(config: &Config) -> Result<Arc<dyn Embedder>> {
    let embedder: Arc<dyn Embedder> = match config.embedding.model {
        EmbeddingModel::Hashing => Arc::new(HashingEmbedder::with_dimension(
            config.embedding.dimension,
        )),
        #[cfg(feature = "candle")]
        EmbeddingModel::BgeSmall => {
            let cache_dir = config::cache_dir()
                .context("Failed to get cache directory")?
                .join("models");
            let embedder = BgeEmbedder::new(cache_dir);
            info!("Initializing embedder (this may download the model on first run)...");
            embedder
                .init()
                .await
                .context("Failed to initialize embedder")?;
            Arc::new(embedder)
        }
        #[cfg(not(feature = "candle"))]
        EmbeddingModel::BgeSmall => {
            anyhow::bail!("bge-small requires gqlrag to be built with the `candle` feature")
        }
    };

    Ok(Arc::new(EmbeddingCache::with_capacity(
        embedder,
        config.embedding.cache_size,
    )))
}

fn embed_config(config: &Config) -> EmbeddingConfig {
    EmbeddingConfig {
        batch_size: config.embedding.batch_size,
        ..Default::default()
    }
}

/// Open the persisted index for requests, refusing one built by another model.
async fn open_index(config: &Config, pool: &EmbedderPool) -> Result<Arc<FileIndexStore>> {
    let index_file = config.paths.index_file()?;
    if !index_file.exists() {
        anyhow::bail!(
            "Index not found at {}. Run 'gqlrag index' first.",
            index_file.display()
        );
    }

    let store = Arc::new(FileIndexStore::new(index_file));
    store.init().await.context("Failed to load index")?;

    if let Some(manifest) = store.manifest().await? {
        if manifest.model != pool.model_name() || manifest.dimension != pool.dimension() {
            anyhow::bail!(
                "Index was built with {} ({} dims) but {} ({} dims) is configured. Run 'gqlrag index' to rebuild.",
                manifest.model,
                manifest.dimension,
                pool.model_name(),
                pool.dimension()
            );
        }
    }
    Ok(store)
}

/// Endpoint for `ask --execute`: the flag wins over the config file.
fn endpoint_url(flag: Option<String>, config: &Config) -> Result<String> {
    flag.or_else(|| config.endpoint.url.clone()).context(
        "No GraphQL endpoint. Pass --endpoint or set endpoint.url in the config file.",
    )
}

/// Records in the registry; a malformed or duplicate record is an error.
async fn registry_count(dir: &Path) -> Result<usize> {
    FsRegistry::new(dir)
        .len()
        .await
        .with_context(|| format!("Failed to read registry {}", dir.display()))
}

fn parse_var(raw: &str) -> Result<(String, serde_json::Value)> {
    let (name, value) = raw
        .split_once('=')
        .with_context(|| format!("--var expects NAME=VALUE, got {raw:?}"))?;
    let name = name.trim().trim_start_matches('$');
    if name.is_empty() {
        anyhow::bail!("--var expects NAME=VALUE, got {raw:?}");
    }
    Ok((name.to_string(), parse_value(value)))
}

/// User-facing message for a request that produced no query.
fn describe_failure(error: &RequestError) -> String {
    match error {
        RequestError::NoMatch {
            best_score: Some(best),
            min_score,
        } => format!(
            "No operation matches this request (best score {best:.3}, minimum {min_score:.3})."
        ),
        RequestError::NoMatch { .. } => "No operation matches this request (index is empty).".to_string(),
        RequestError::MissingVariable { dsl_name, variable } => format!(
            "{dsl_name} needs a value for ${variable}. Pass it with --var {variable}=VALUE or write {variable}:VALUE in the request."
        ),
        other => format!("Request failed: {other}"),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = Config::load_from(cli.config.clone()).context("Failed to load config")?;

    // Setup logging
    let level = if cli.verbose {
        Level::DEBUG
    } else {
        config.logging.level.parse().unwrap_or(Level::INFO)
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .with_writer(std::io::stderr)
        .finish();

    tracing::subscriber::set_global_default(subscriber)
        .context("Failed to set tracing subscriber")?;

    match cli.command {
        Commands::Generate {
            schema,
            out,
            deny,
            depth,
        } => {
            let schema = schema
                .or_else(|| config.paths.schema.clone())
                .context("No schema given and paths.schema is not set")?;
            let out = match out {
                Some(out) => out,
                None => config.paths.registry_dir()?,
            };

            let mut generator_config = config.generator.clone();
            generator_config.denylist.extend(deny);
            if let Some(depth) = depth {
                generator_config.selection_depth = depth;
            }

            let graph = SchemaReader::read_file(&schema)
                .await
                .with_context(|| format!("Failed to read schema {}", schema.display()))?;
            let report = DslGenerator::new(generator_config)
                .generate(&graph)
                .context("Failed to generate DSL records")?;

            let registry = FsRegistry::new(&out);
            registry
                .replace_all(&report.records)
                .await
                .with_context(|| format!("Failed to write registry {}", out.display()))?;
            info!("Wrote {} records to {:?}", report.records.len(), out);

            match cli.format {
                OutputFormat::Json => {
                    let output = GenerateOutput {
                        registry: out.to_string_lossy().to_string(),
                        records: report.records.iter().map(|r| r.dsl_name.clone()).collect(),
                        conflicts: report
                            .conflicts
                            .iter()
                            .map(|c| ConflictItem {
                                base_name: c.base_name.clone(),
                                operations: c.operations.clone(),
                                resolved: c.resolved.clone(),
                            })
                            .collect(),
                        excluded: report.excluded.clone(),
                    };
                    println!("{}", serde_json::to_string_pretty(&output)?);
                }
                OutputFormat::Text => {
                    println!(
                        "Generated {} records in {}",
                        report.records.len(),
                        out.display()
                    );
                    for record in &report.records {
                        println!("  {} ({})", record.dsl_name, record.kind);
                    }
                    if !report.conflicts.is_empty() {
                        println!("\nName conflicts:");
                        for conflict in &report.conflicts {
                            println!("  {}:", conflict.base_name);
                            for (operation, name) in
                                conflict.operations.iter().zip(&conflict.resolved)
                            {
                                println!("    {operation} -> {name}");
                            }
                        }
                    }
                    if !report.excluded.is_empty() {
                        println!("\nExcluded: {}", report.excluded.join(", "));
                    }
                }
            }
        }

        Commands::Index { registry, watch } => {
            let registry_dir = match registry {
                Some(dir) => dir,
                None => config.paths.registry_dir()?,
            };
            if !registry_dir.exists() {
                anyhow::bail!(
                    "Registry directory does not exist: {}. Run 'gqlrag generate' first.",
                    registry_dir.display()
                );
            }

            let embedder = create_embedder(&config).await?;
            let pool = Arc::new(EmbedderPool::new(
                embedder,
                config.embedding.max_concurrent,
            ));
            let store = Arc::new(FileIndexStore::new(config.paths.index_file()?));

            let service = IndexService::new(
                Arc::new(FsRegistry::new(&registry_dir)),
                store as Arc<dyn IndexStore>,
                pool,
                IndexConfig {
                    embed_config: embed_config(&config),
                    ..Default::default()
                },
            );
            // A corrupt index file is replaced by the rebuild
            if let Err(e) = service.init().await {
                warn!("Ignoring existing index: {e}");
            }

            let mut updates = service.subscribe();
            let progress_handle = tokio::spawn(async move {
                while let Ok(update) = updates.recv().await {
                    match update {
                        IndexUpdate::BuildStarted => info!("Building index..."),
                        IndexUpdate::BuildCompleted { build_id, entries } => {
                            info!("Build {} complete: {} entries", build_id, entries);
                        }
                        IndexUpdate::BuildFailed { error } => warn!("Build failed: {}", error),
                    }
                }
            });

            let manifest = service.rebuild().await.context("Failed to build index")?;
            match cli.format {
                OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&manifest)?),
                OutputFormat::Text => println!(
                    "Indexed {} records (build {}, model {})",
                    manifest.entry_count, manifest.build_id, manifest.model
                ),
            }

            if watch {
                service.watch(&registry_dir).await?;
                info!("Watching {:?} for changes. Press Ctrl+C to stop.", registry_dir);
                tokio::signal::ctrl_c()
                    .await
                    .context("Failed to wait for Ctrl+C")?;
                service.stop().await;
            }

            progress_handle.abort();
        }

        Commands::Search { text, limit } => {
            let embedder = create_embedder(&config).await?;
            let pool = Arc::new(EmbedderPool::new(
                embedder,
                config.embedding.max_concurrent,
            ));
            let store = open_index(&config, &pool).await?;

            let retriever = Retriever::new(
                store as Arc<dyn IndexStore>,
                pool,
                embed_config(&config),
                config.retrieval.clone(),
            );
            let limit = limit.unwrap_or(config.retrieval.k);
            let retrieval = retriever
                .retrieve(&text, limit)
                .await
                .context("Search failed")?;

            match cli.format {
                OutputFormat::Json => {
                    let output = SearchOutput {
                        query: text.clone(),
                        results: retrieval
                            .candidates
                            .iter()
                            .map(|r| SearchItem {
                                dsl_name: r.dsl_name.clone(),
                                score: r.score,
                            })
                            .collect(),
                    };
                    println!("{}", serde_json::to_string_pretty(&output)?);
                }
                OutputFormat::Text => {
                    println!("Query: {text}\n");
                    if retrieval.candidates.is_empty() {
                        println!("No results found.");
                    } else {
                        for (i, result) in retrieval.candidates.iter().enumerate() {
                            println!("{}. {} (score: {:.3})", i + 1, result.dsl_name, result.score);
                            println!("   {}", truncate(&result.source_text, 100));
                        }
                    }
                }
            }
        }

        Commands::Ask {
            text,
            vars,
            limit,
            execute,
            endpoint,
        } => {
            let mut parsed = RequestParser::new(config.retrieval.k).parse(&text);
            for raw in &vars {
                let (name, value) = parse_var(raw)?;
                parsed.request.params.insert(name, value);
            }
            let limit = limit.unwrap_or(parsed.limit);

            let embedder = create_embedder(&config).await?;
            let pool = Arc::new(EmbedderPool::new(
                embedder,
                config.embedding.max_concurrent,
            ));
            let store = open_index(&config, &pool).await?;
            let registry = FsRegistry::new(config.paths.registry_dir()?);

            let retriever = Retriever::new(
                store as Arc<dyn IndexStore>,
                pool,
                embed_config(&config),
                config.retrieval.clone(),
            );
            let assembler = QueryAssembler::new(config.binding)
                .with_extractor(Arc::new(InlineValueExtractor::new()));
            let pipeline = QueryPipeline::new(Arc::new(registry), retriever, assembler);

            let assembled = match pipeline.execute_with_limit(&parsed.request, limit).await {
                Ok(assembled) => assembled,
                Err(
                    e @ (RequestError::NoMatch { .. } | RequestError::MissingVariable { .. }),
                ) => {
                    anyhow::bail!(describe_failure(&e));
                }
                Err(e) => return Err(e).context("Request failed"),
            };

            if execute {
                let url = endpoint_url(endpoint, &config)?;
                let client = GraphqlClient::new(url, &config.endpoint)
                    .context("Failed to create GraphQL client")?;
                let response = client
                    .execute(&assembled)
                    .await
                    .with_context(|| format!("Failed to execute {}", assembled.dsl_name))?;

                match cli.format {
                    OutputFormat::Json => {
                        let output = ExecuteOutput {
                            endpoint: client.url(),
                            query: &assembled,
                            response: &response,
                        };
                        println!("{}", serde_json::to_string_pretty(&output)?);
                    }
                    OutputFormat::Text => {
                        println!("# {} -> {}
", assembled.dsl_name, client.url());
                        println!("{}", serde_json::to_string_pretty(&response)?);
                    }
                }

                if response.has_errors() {
                    warn!("{} returned {} error(s)", client.url(), response.errors.len());
                    anyhow::bail!("GraphQL endpoint reported errors");
                }
                return Ok(());
            }

            match cli.format {
                OutputFormat::Json => {
                    println!("{}", serde_json::to_string_pretty(&assembled)?);
                }
                OutputFormat::Text => {
                    println!(
                        "# {} (score: {:.3})\n",
                        assembled.dsl_name, assembled.score
                    );
                    println!("{}", assembled.query.trim_end());
                    println!(
                        "\n{}",
                        serde_json::to_string_pretty(&assembled.variables)?
                    );
                    if !assembled.alternatives.is_empty() {
                        let others: Vec<String> = assembled
                            .alternatives
                            .iter()
                            .map(|c| format!("{} ({:.3})", c.dsl_name, c.score))
                            .collect();
                        println!("\nAlternatives: {}", others.join(", "));
                    }
                }
            }
        }

        Commands::Enrich {
            overrides,
            registry,
        } => {
            let registry_dir = match registry {
                Some(dir) => dir,
                None => config.paths.registry_dir()?,
            };
            let overrides_doc = DescriptionOverrides::load(&overrides)
                .await
                .with_context(|| format!("Failed to read overrides {}", overrides.display()))?;
            let registry = FsRegistry::new(&registry_dir);
            let report = overrides_doc
                .apply(&registry)
                .await
                .context("Failed to apply overrides")?;

            match cli.format {
                OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&report)?),
                OutputFormat::Text => {
                    println!(
                        "Updated {}, unchanged {}, missing {}",
                        report.updated.len(),
                        report.unchanged.len(),
                        report.missing.len()
                    );
                    for name in &report.missing {
                        println!("  no record named {name}");
                    }
                    if !report.updated.is_empty() {
                        println!("Run 'gqlrag index' to refresh the index.");
                    }
                }
            }
        }

        Commands::Status => {
            let index_file = config.paths.index_file()?;
            let registry_dir = config.paths.registry_dir()?;
            let registry_records = registry_count(&registry_dir).await?;

            let store = FileIndexStore::new(&index_file);
            store.init().await.context("Failed to load index")?;
            let manifest = store.manifest().await?;
            let stats = store.stats().await?;

            match cli.format {
                OutputFormat::Json => {
                    let output = StatusOutput {
                        index_file: index_file.to_string_lossy().to_string(),
                        registry_dir: registry_dir.to_string_lossy().to_string(),
                        registry_records,
                        manifest,
                        index_size_bytes: stats.index_size_bytes,
                    };
                    println!("{}", serde_json::to_string_pretty(&output)?);
                }
                OutputFormat::Text => {
                    println!("Registry: {} ({} records)", registry_dir.display(), registry_records);
                    match manifest {
                        Some(manifest) => {
                            println!("Index:    {}", index_file.display());
                            println!("  Build:   {}", manifest.build_id);
                            println!("  Model:   {} ({} dims)", manifest.model, manifest.dimension);
                            println!("  Entries: {}", manifest.entry_count);
                            println!("  Size:    {} bytes", stats.index_size_bytes);
                            println!(
                                "  Built:   {}",
                                manifest.built_at.format("%Y-%m-%d %H:%M:%S")
                            );
                            if manifest.entry_count != registry_records {
                                println!("  (registry has changed; run 'gqlrag index')");
                            }
                        }
                        None => {
                            println!("Index not found at {}", index_file.display());
                            println!("Run 'gqlrag index' to create it.");
                        }
                    }
                }
            }
        }

        Commands::Config { action } => match action {
            ConfigAction::Show => match cli.format {
                OutputFormat::Json => {
                    println!(
                        "{}",
                        serde_json::to_string_pretty(&config)
                            .context("Failed to serialize config")?
                    );
                }
                OutputFormat::Text => {
                    println!(
                        "{}",
                        toml::to_string_pretty(&config).context("Failed to serialize config")?
                    );
                }
            },
            ConfigAction::Init => {
                print!("{}", Config::sample_toml());
            }
            ConfigAction::Path => {
                if let Some(path) = Config::config_path() {
                    println!("{}", path.display());
                } else {
                    println!("Could not determine config directory");
                }
            }
        },
    }

    Ok(())
}

/// Truncate a string to max length, adding ellipsis if needed.
fn truncate(s: &str, max_len: usize) -> String {
    let s = s.replace('\n', " ").replace('\r', "");
    if s.chars().count() <= max_len {
        s
    } else {
        let cut: String = s.chars().take(max_len.saturating_sub(3)).collect();
        format!("{cut}...")
    }
}
