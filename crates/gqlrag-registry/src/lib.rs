//! # gqlrag-registry
//!
//! Persistent store of DSL records, the source of truth for the retrieval index.
//!
//! - [`FsRegistry`]: one YAML file per record in a directory
//! - [`MemoryRegistry`]: in-memory, same validation
//! - [`DescriptionOverrides`]: apply hand-written descriptions and keywords
//!
//! Both registries implement [`DslRepository`](gqlrag_core::DslRepository) and reject
//! records whose template does not parse or whose placeholders differ from
//! their `variables`.

pub mod fs;
pub mod memory;
pub mod overrides;

pub use fs::{FsRegistry, RECORD_EXTENSIONS, is_record_file};
pub use memory::MemoryRegistry;
pub use overrides::{DescriptionOverrides, OverrideReport, RecordOverride};
