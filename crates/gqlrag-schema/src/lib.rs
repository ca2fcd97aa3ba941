//! # gqlrag-schema
//!
//! Offline half of gqlrag: read a GraphQL schema and generate DSL records.
//!
//! - [`SchemaReader`]: SDL text or file to [`TypeGraph`](gqlrag_core::TypeGraph)
//! - [`DslGenerator`]: one [`DslRecord`](gqlrag_core::DslRecord) per root operation
//! - [`template`]: parse and check operation templates
//!
//! ```rust,ignore
//! let graph = SchemaReader::read_file(Path::new("schema.graphql")).await?;
//! let report = DslGenerator::new(GeneratorConfig::default()).generate(&graph)?;
//! for conflict in &report.conflicts {
//!     println!("{conflict}");
//! }
//! ```

mod convert;
pub mod generator;
pub mod reader;
pub mod template;

pub use generator::{DslGenerator, GenerationReport, GeneratorConfig, snake_case};
pub use reader::SchemaReader;
pub use template::{TemplateInfo, analyze, validate_record};
