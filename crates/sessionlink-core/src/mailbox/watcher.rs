//! Filesystem watch that wakes the request processor early.
//!
//! Only an accelerator: the processor's fixed tick still runs, so a missed or
//! unsupported notification costs latency, never a lost request.

use super::store::id_from_path;
use crate::{LinkError, Result};
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use std::path::Path;
use std::sync::Arc;
use tokio::sync::Notify;
use tracing::{debug, info, warn};

/// Watches a mailbox directory and signals `wake` when a record appears.
pub struct MailboxWatcher {
    _watcher: RecommendedWatcher,
}

impl MailboxWatcher {
    pub fn new(dir: &Path, wake: Arc<Notify>) -> Result<Self> {
        let mut watcher = notify::recommended_watcher(move |result: notify::Result<Event>| {
            match result {
                Ok(event) if is_relevant_event(&event) => {
                    debug!("Mailbox change: {:?}", event.paths);
                    wake.notify_one();
                }
                Ok(_) => {}
                Err(e) => warn!("Mailbox watcher error: {}", e),
            }
        })
        .map_err(|e| LinkError::Other(format!("Failed to create file watcher: {}", e)))?;

        watcher
            .watch(dir, RecursiveMode::NonRecursive)
            .map_err(|e| LinkError::Other(format!("Failed to watch {}: {}", dir.display(), e)))?;

        info!("Watching mailbox at {}", dir.display());
        Ok(Self { _watcher: watcher })
    }
}

/// A finished record landed: created directly or renamed into place.
fn is_relevant_event(event: &Event) -> bool {
    matches!(event.kind, EventKind::Create(_) | EventKind::Modify(_))
        && event.paths.iter().any(|p| id_from_path(p).is_some())
}

#[cfg(test)]
mod tests {
    use super::*;
    use notify::event::{CreateKind, ModifyKind, RemoveKind, RenameMode};
    use std::path::PathBuf;

    fn event(kind: EventKind, path: &str) -> Event {
        Event::new(kind).add_path(PathBuf::from(path))
    }

    #[test]
    fn test_is_relevant_event() {
        assert!(is_relevant_event(&event(
            EventKind::Create(CreateKind::File),
            "/mailbox/requests/R1.json"
        )));
        assert!(is_relevant_event(&event(
            EventKind::Modify(ModifyKind::Name(RenameMode::To)),
            "/mailbox/requests/R1.json"
        )));
        assert!(!is_relevant_event(&event(
            EventKind::Create(CreateKind::File),
            "/mailbox/requests/R1.json.1.2.tmp"
        )));
        assert!(!is_relevant_event(&event(
            EventKind::Remove(RemoveKind::File),
            "/mailbox/requests/R1.json"
        )));
    }
}
