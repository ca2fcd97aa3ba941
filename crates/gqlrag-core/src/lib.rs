//! # gqlrag-core
//!
//! Core types and traits for gqlrag, retrieval-augmented GraphQL query generation.
//!
//! A GraphQL schema is turned offline into a registry of DSL records, one per root
//! operation. The records are embedded into a retrieval index. At request time a
//! natural-language request is matched against the index and the best record's
//! template is bound into an executable query.
//!
//! ```text
//! SDL -> TypeGraph -> DslRecord* -> DslRepository
//!                                        |
//!                          Embedder -> IndexStore
//!                                        |
//! QueryRequest -> SearchQuery -> SearchResult -> AssembledQuery
//! ```
//!
//! ## Key Types
//!
//! | Type | Description |
//! |------|-------------|
//! | [`TypeGraph`] | Parsed schema |
//! | [`DslRecord`] | One operation template with retrieval metadata |
//! | [`IndexManifest`] | Describes a published index build |
//! | [`QueryRequest`] | Natural-language request with explicit params |
//! | [`AssembledQuery`] | Executable query plus bound variables |
//!
//! ## Key Traits
//!
//! | Trait | Purpose |
//! |-------|---------|
//! | [`DslRepository`] | Store DSL records |
//! | [`Embedder`] | Generate vector embeddings |
//! | [`IndexStore`] | Publish and search the retrieval index |
//! | [`ValueExtractor`] | Extract variable values from request text |
//!
//! ## Related Crates
//!
//! - `gqlrag-schema`: Schema reader and DSL generator
//! - `gqlrag-registry`: Filesystem and in-memory DSL registries
//! - `gqlrag-embed`: Embedder implementations
//! - `gqlrag-store`: Index store implementations
//! - `gqlrag-index`: Index builds and registry watching
//! - `gqlrag-query`: Retrieval and query assembly

pub mod error;
pub mod traits;
pub mod types;

pub use error::{
    EmbedError, Error, ExecuteError, GenerationConflict, IndexBuildError, RegistryError, RequestError, Result,
    SchemaError, StoreError,
};
pub use traits::*;
pub use types::*;
