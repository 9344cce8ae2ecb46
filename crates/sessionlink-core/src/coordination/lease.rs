//! Lease file deciding which instance owns the live session.
//!
//! The lease is a liveness signal, not a mutual-exclusion lock. Two instances
//! starting in the same instant can both conclude they are primary; the
//! deployment model starts one coordinator per resource, so that race is
//! accepted rather than guarded with a create-if-absent lock.

use crate::persist::{atomic_read_json, atomic_write_json};
use crate::platform;
use crate::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

/// On-disk ownership claim.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LeaseRecord {
    pub instance_id: String,
    pub process_id: u32,
    pub acquired_at: DateTime<Utc>,
    pub renewed_at: DateTime<Utc>,
    /// Set by a clean `release()`; a released lease is reclaimable at once.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub released_at: Option<DateTime<Utc>>,
}

impl LeaseRecord {
    fn new(instance_id: &str, now: DateTime<Utc>) -> Self {
        Self {
            instance_id: instance_id.to_string(),
            process_id: platform::current_pid(),
            acquired_at: now,
            renewed_at: now,
            released_at: None,
        }
    }

    /// Time since the last renewal. Clock skew into the future counts as zero.
    pub fn age(&self, now: DateTime<Utc>) -> Duration {
        (now - self.renewed_at).to_std().unwrap_or(Duration::ZERO)
    }
}

/// Why a lease may be reclaimed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StaleReason {
    Expired,
    OwnerNotRunning,
    Released,
}

impl std::fmt::Display for StaleReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StaleReason::Expired => write!(f, "not renewed within the freshness window"),
            StaleReason::OwnerNotRunning => write!(f, "owner process is not running"),
            StaleReason::Released => write!(f, "released by its owner"),
        }
    }
}

/// Current state of the lease file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LeaseStatus {
    Absent,
    Fresh(LeaseRecord),
    Stale(LeaseRecord, StaleReason),
}

impl LeaseStatus {
    pub fn is_reclaimable(&self) -> bool {
        !matches!(self, LeaseStatus::Fresh(_))
    }
}

/// Role decided by [`LeaseManager::try_acquire`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LeaseOutcome {
    /// We own the lease. `stale_owner` is the instance we displaced, if any.
    Primary { stale_owner: Option<String> },
    /// Someone else holds a fresh lease.
    Proxy { owner: String },
}

impl LeaseOutcome {
    pub fn is_primary(&self) -> bool {
        matches!(self, LeaseOutcome::Primary { .. })
    }
}

/// Reads, claims and renews the lease file for one instance.
#[derive(Debug)]
pub struct LeaseManager {
    path: PathBuf,
    instance_id: String,
    freshness: Duration,
    /// Serializes this instance's writes. `true` once released: renewals
    /// become no-ops until the lease is acquired again.
    released: Mutex<bool>,
}

impl LeaseManager {
    pub fn new(path: impl Into<PathBuf>, instance_id: impl Into<String>, freshness: Duration) -> Self {
        Self {
            path: path.into(),
            instance_id: instance_id.into(),
            freshness,
            released: Mutex::new(false),
        }
    }

    fn write_guard(&self) -> MutexGuard<'_, bool> {
        self.released.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn instance_id(&self) -> &str {
        &self.instance_id
    }

    /// Read the raw lease record.
    pub fn read(&self) -> Result<Option<LeaseRecord>> {
        atomic_read_json(&self.path)
    }

    /// Classify the lease file. Unreadable files are treated as absent.
    pub fn inspect(&self) -> LeaseStatus {
        match self.read() {
            Ok(Some(record)) => self.classify(record, Utc::now()),
            Ok(None) => LeaseStatus::Absent,
            Err(e) => {
                warn!("Failed to read lease {}: {}; treating as absent", self.path.display(), e);
                LeaseStatus::Absent
            }
        }
    }

    /// Classify a record as of `now`.
    pub fn classify(&self, record: LeaseRecord, now: DateTime<Utc>) -> LeaseStatus {
        if record.released_at.is_some() {
            LeaseStatus::Stale(record, StaleReason::Released)
        } else if record.age(now) > self.freshness {
            LeaseStatus::Stale(record, StaleReason::Expired)
        } else if !platform::is_process_alive(record.process_id) {
            LeaseStatus::Stale(record, StaleReason::OwnerNotRunning)
        } else {
            LeaseStatus::Fresh(record)
        }
    }

    /// Decide whether this instance becomes primary or proxy.
    ///
    /// Never fails: losing the coordination signal must not stop the session,
    /// so I/O errors degrade to "lease absent".
    pub fn try_acquire(&self) -> LeaseOutcome {
        let stale_owner = match self.inspect() {
            LeaseStatus::Fresh(record) if record.instance_id == self.instance_id => {
                debug!("Lease already held by this instance; renewing");
                *self.write_guard() = false;
                self.renew_best_effort();
                return LeaseOutcome::Primary { stale_owner: None };
            }
            LeaseStatus::Fresh(record) => {
                debug!(
                    "Lease held by instance {} (PID {}), becoming proxy",
                    record.instance_id, record.process_id
                );
                return LeaseOutcome::Proxy {
                    owner: record.instance_id,
                };
            }
            LeaseStatus::Stale(record, reason) => {
                info!(
                    "Reclaiming lease from instance {} (PID {}): {}",
                    record.instance_id, record.process_id, reason
                );
                Some(record.instance_id).filter(|owner| *owner != self.instance_id)
            }
            LeaseStatus::Absent => None,
        };

        let mut released = self.write_guard();
        *released = false;
        let record = LeaseRecord::new(&self.instance_id, Utc::now());
        if let Err(e) = atomic_write_json(&self.path, &record) {
            warn!("Failed to write lease {}: {}; continuing as primary", self.path.display(), e);
        }

        info!("Acquired lease as instance {}", self.instance_id);
        LeaseOutcome::Primary { stale_owner }
    }

    /// Refresh `renewedAt`. The owner renews regardless of what is on disk,
    /// but never after its own `release()`.
    pub fn renew(&self) -> Result<()> {
        let released = self.write_guard();
        if *released {
            debug!("Lease for instance {} was released; not renewing", self.instance_id);
            return Ok(());
        }

        let now = Utc::now();
        let acquired_at = match self.read() {
            Ok(Some(existing)) if existing.instance_id == self.instance_id => existing.acquired_at,
            Ok(Some(existing)) => {
                warn!(
                    "Lease was taken over by instance {} (PID {}); reasserting",
                    existing.instance_id, existing.process_id
                );
                now
            }
            _ => now,
        };

        let record = LeaseRecord {
            acquired_at,
            ..LeaseRecord::new(&self.instance_id, now)
        };
        atomic_write_json(&self.path, &record)?;
        debug!("Renewed lease for instance {}", self.instance_id);
        Ok(())
    }

    fn renew_best_effort(&self) {
        if let Err(e) = self.renew() {
            warn!("Failed to renew lease {}: {}", self.path.display(), e);
        }
    }

    /// Mark the lease released so the next instance can claim it at once.
    ///
    /// Best-effort and only on clean shutdown; a missing release is handled
    /// by staleness. Does nothing if another instance owns the lease.
    pub fn release(&self) {
        let mut released = self.write_guard();
        *released = true;

        let mut record = match self.read() {
            Ok(Some(record)) if record.instance_id == self.instance_id => record,
            Ok(_) => return,
            Err(e) => {
                debug!("Skipping lease release, unreadable: {}", e);
                return;
            }
        };

        record.released_at = Some(Utc::now());
        match atomic_write_json(&self.path, &record) {
            Ok(()) => info!("Released lease for instance {}", self.instance_id),
            Err(e) => warn!("Failed to release lease {}: {}", self.path.display(), e),
        }
    }
}

/// Background renewal for a primary. Dropping the keeper stops renewal.
pub struct LeaseKeeper {
    task_handle: Option<JoinHandle<()>>,
}

impl LeaseKeeper {
    /// Start renewing every `interval`, regardless of workload.
    pub fn start(manager: Arc<LeaseManager>, interval: Duration) -> Self {
        let task_handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // The first tick completes immediately; acquisition just wrote the lease.
            ticker.tick().await;
            loop {
                ticker.tick().await;
                manager.renew_best_effort();
            }
        });

        Self {
            task_handle: Some(task_handle),
        }
    }

    /// Stop renewing.
    pub fn stop(&mut self) {
        if let Some(handle) = self.task_handle.take() {
            handle.abort();
        }
    }
}

impl Drop for LeaseKeeper {
    fn drop(&mut self) {
        self.stop();
    }
}
