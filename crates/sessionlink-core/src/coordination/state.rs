//! Readiness state shared from the primary to every other process.

use crate::persist::{atomic_read_json, atomic_write_json};
use crate::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Last readiness state written by the primary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReadinessRecord {
    pub is_ready: bool,
    pub owner_instance_id: String,
    pub timestamp: DateTime<Utc>,
}

/// Writes and reads the readiness state file.
///
/// Only the primary publishes. A reader in another process gets a hint that
/// can lag by one publish; a reader in the primary's own process gets the
/// authoritative value.
#[derive(Debug, Clone)]
pub struct StatePublisher {
    path: PathBuf,
}

impl StatePublisher {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Record a readiness transition. Fire-and-forget: failures are logged.
    pub fn publish(&self, is_ready: bool, instance_id: &str) {
        let record = ReadinessRecord {
            is_ready,
            owner_instance_id: instance_id.to_string(),
            timestamp: Utc::now(),
        };

        match atomic_write_json(&self.path, &record) {
            Ok(()) => debug!("Published readiness {} for instance {}", is_ready, instance_id),
            Err(e) => warn!("Failed to publish readiness to {}: {}", self.path.display(), e),
        }
    }

    /// Latest published state, or `None` if nothing was ever published.
    pub fn read_latest(&self) -> Result<Option<ReadinessRecord>> {
        atomic_read_json(&self.path)
    }

    /// Publish every transition seen on `readiness` until the sender closes.
    ///
    /// The current value is published immediately.
    pub fn follow(&self, instance_id: String, mut readiness: watch::Receiver<bool>) -> JoinHandle<()> {
        let publisher = self.clone();
        tokio::spawn(async move {
            let mut last = None;
            loop {
                let is_ready = *readiness.borrow_and_update();
                if last != Some(is_ready) {
                    publisher.publish(is_ready, &instance_id);
                    last = Some(is_ready);
                }
                if readiness.changed().await.is_err() {
                    debug!("Session readiness channel closed");
                    break;
                }
            }
        })
    }
}
