//! Registry directory watcher.
//!
//! Forwards debounced changes to record files (`*.yaml`, `*.yml`, not hidden)
//! so the index can be rebuilt after the registry is edited.

use gqlrag_registry::is_record_file;
use notify_debouncer_full::notify::{RecommendedWatcher, RecursiveMode};
use notify_debouncer_full::{DebounceEventResult, Debouncer, RecommendedCache, new_debouncer};
use std::path::{Path, PathBuf};
use std::sync::mpsc;
use std::time::Duration;
use tokio::sync::mpsc as tokio_mpsc;
use tracing::{debug, error, warn};

/// A change to a record file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegistryEvent {
    /// Record file created or modified
    Changed(PathBuf),
    /// Record file removed
    Removed(PathBuf),
    /// Record file renamed
    Renamed { from: PathBuf, to: PathBuf },
}

impl RegistryEvent {
    /// Path the event leaves behind.
    #[must_use]
    pub fn path(&self) -> &Path {
        match self {
            Self::Changed(path) | Self::Removed(path) => path,
            Self::Renamed { to, .. } => to,
        }
    }
}

/// Debounced watcher over a registry directory.
pub struct RegistryWatcher {
    debouncer: Debouncer<RecommendedWatcher, RecommendedCache>,
}

impl RegistryWatcher {
    /// Create a watcher that sends events on `event_tx`.
    pub fn new(
        event_tx: tokio_mpsc::Sender<RegistryEvent>,
        debounce_duration: Duration,
    ) -> Result<Self, notify::Error> {
        let (tx, rx) = mpsc::channel();

        std::thread::spawn(move || {
            while let Ok(result) = rx.recv() {
                if !forward_events(result, &event_tx) {
                    break;
                }
            }
        });

        let debouncer = new_debouncer(debounce_duration, None, move |result| {
            let _ = tx.send(result);
        })?;

        Ok(Self { debouncer })
    }

    /// Start watching a registry directory. Subdirectories are not records.
    pub fn watch(&mut self, dir: &Path) -> Result<(), notify_debouncer_full::notify::Error> {
        debug!("Watching registry {:?}", dir);
        self.debouncer.watch(dir, RecursiveMode::NonRecursive)
    }

    /// Stop watching a registry directory.
    pub fn unwatch(&mut self, dir: &Path) -> Result<(), notify_debouncer_full::notify::Error> {
        debug!("Unwatching registry {:?}", dir);
        self.debouncer.unwatch(dir)
    }
}

/// Returns false once the receiving side is gone.
fn forward_events(result: DebounceEventResult, event_tx: &tokio_mpsc::Sender<RegistryEvent>) -> bool {
    match result {
        Ok(events) => {
            for event in events {
                if let Some(registry_event) = convert_event(&event) {
                    // std thread, so block instead of await
                    if event_tx.blocking_send(registry_event).is_err() {
                        warn!("Registry event channel closed");
                        return false;
                    }
                }
            }
        }
        Err(errors) => {
            for error in errors {
                error!("Watch error: {error}");
            }
        }
    }
    true
}

fn convert_event(event: &notify_debouncer_full::DebouncedEvent) -> Option<RegistryEvent> {
    use notify_debouncer_full::notify::EventKind;
    use notify_debouncer_full::notify::event::{ModifyKind, RenameMode};

    let path = event.paths.first()?.clone();

    match &event.kind {
        EventKind::Modify(ModifyKind::Name(RenameMode::Both)) if event.paths.len() >= 2 => {
            let to = event.paths[1].clone();
            match (is_record_file(&path), is_record_file(&to)) {
                (true, true) => Some(RegistryEvent::Renamed { from: path, to }),
                (true, false) => Some(RegistryEvent::Removed(path)),
                (false, true) => Some(RegistryEvent::Changed(to)),
                (false, false) => None,
            }
        }
        _ if !is_record_file(&path) => None,
        EventKind::Create(_) | EventKind::Modify(_) => Some(RegistryEvent::Changed(path)),
        EventKind::Remove(_) => Some(RegistryEvent::Removed(path)),
        _ => None,
    }
}
