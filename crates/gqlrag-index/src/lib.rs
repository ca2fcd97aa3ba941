//! Index building for gqlrag.
//!
//! [`IndexService`] embeds every registry record and publishes the result to an
//! [`IndexStore`](gqlrag_core::IndexStore) as one atomic build.
//! [`RegistryWatcher`] triggers rebuilds when record files change.

pub mod service;
pub mod watcher;

pub use service::{IndexConfig, IndexService, IndexUpdate};
pub use watcher::{RegistryEvent, RegistryWatcher};
