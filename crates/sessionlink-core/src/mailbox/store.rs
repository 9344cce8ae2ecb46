//! Shared `requests/` + `responses/` directory pair.
//!
//! No locking: each record has exactly one writer (its producer) and one
//! deleter (its consumer). Records are published with temp-file + rename, so
//! existence of `<id>.json` means the record is complete.

use super::protocol::{RequestId, RequestRecord, ResponseRecord};
use crate::config::{MailboxConfig, PathsConfig};
use crate::persist::{
    atomic_read_json, atomic_replace_json, atomic_write_json, is_temp_file, remove_if_exists,
};
use crate::{LinkError, Result};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};
use tracing::{debug, warn};

/// Filesystem mailbox rooted at one directory.
#[derive(Debug, Clone)]
pub struct MailboxStore {
    root: PathBuf,
    requests_dir: PathBuf,
    responses_dir: PathBuf,
}

impl MailboxStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        Self {
            requests_dir: root.join(PathsConfig::REQUESTS_DIR_NAME),
            responses_dir: root.join(PathsConfig::RESPONSES_DIR_NAME),
            root,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn requests_dir(&self) -> &Path {
        &self.requests_dir
    }

    pub fn responses_dir(&self) -> &Path {
        &self.responses_dir
    }

    /// Create both directories if missing.
    pub fn ensure_dirs(&self) -> Result<()> {
        for dir in [&self.requests_dir, &self.responses_dir] {
            fs::create_dir_all(dir).map_err(|e| LinkError::Io {
                message: format!("Failed to create mailbox directory: {}", dir.display()),
                path: Some(dir.clone()),
                source: Some(e),
            })?;
        }
        Ok(())
    }

    pub fn request_path(&self, id: &RequestId) -> PathBuf {
        self.requests_dir.join(id.file_name())
    }

    pub fn response_path(&self, id: &RequestId) -> PathBuf {
        self.responses_dir.join(id.file_name())
    }

    // ========================================
    // Requests
    // ========================================

    /// Publish a request. A missing `requests/` directory is an `Io` error,
    /// not something a proxy recreates.
    pub fn write_request(&self, record: &RequestRecord) -> Result<()> {
        atomic_replace_json(&self.request_path(&record.id), record)
    }

    /// Pending request files, oldest id first.
    ///
    /// A missing directory means nothing is pending.
    pub fn pending_requests(&self) -> Result<Vec<PathBuf>> {
        list_records(&self.requests_dir)
    }

    pub fn read_request_file(&self, path: &Path) -> Result<Option<RequestRecord>> {
        match fs::read(path) {
            Ok(bytes) => RequestRecord::from_slice(&bytes).map(Some),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(LinkError::io_with_path(e, path)),
        }
    }

    pub fn request_exists(&self, id: &RequestId) -> bool {
        self.request_path(id).exists()
    }

    /// Delete a request. Already-deleted is not an error.
    pub fn remove_request(&self, id: &RequestId) -> Result<bool> {
        remove_if_exists(&self.request_path(id))
    }

    // ========================================
    // Responses
    // ========================================

    pub fn write_response(&self, record: &ResponseRecord) -> Result<()> {
        atomic_write_json(&self.response_path(&record.id), record)
    }

    pub fn response_exists(&self, id: &RequestId) -> bool {
        self.response_path(id).exists()
    }

    pub fn read_response(&self, id: &RequestId) -> Result<Option<ResponseRecord>> {
        atomic_read_json(&self.response_path(id))
    }

    /// Delete a response. Already-deleted is not an error.
    pub fn remove_response(&self, id: &RequestId) -> Result<bool> {
        remove_if_exists(&self.response_path(id))
    }

    pub fn responses(&self) -> Result<Vec<PathBuf>> {
        list_records(&self.responses_dir)
    }

    // ========================================
    // Housekeeping
    // ========================================

    /// Delete uncollected responses and abandoned temp files older than
    /// `max_age`. No proxy can still be waiting on them.
    pub fn sweep_stale(&self, max_age: Duration) -> usize {
        let now = SystemTime::now();
        let mut removed = 0;

        for dir in [&self.requests_dir, &self.responses_dir] {
            let entries = match fs::read_dir(dir) {
                Ok(entries) => entries,
                Err(_) => continue,
            };

            for entry in entries.filter_map(|e| e.ok()) {
                let path = entry.path();
                let is_response = dir == &self.responses_dir && is_record(&path);
                if !is_response && !is_temp_file(&path) {
                    continue;
                }

                let age = entry
                    .metadata()
                    .and_then(|m| m.modified())
                    .ok()
                    .and_then(|modified| now.duration_since(modified).ok());
                if !age.is_some_and(|age| age > max_age) {
                    continue;
                }

                match remove_if_exists(&path) {
                    Ok(true) => {
                        debug!("Swept stale mailbox file {}", path.display());
                        removed += 1;
                    }
                    Ok(false) => {}
                    Err(e) => warn!("Failed to sweep {}: {}", path.display(), e),
                }
            }
        }

        removed
    }
}

/// Request id encoded in a record file name.
pub fn id_from_path(path: &Path) -> Option<RequestId> {
    if !is_record(path) {
        return None;
    }
    let stem = path.file_stem()?.to_str()?;
    RequestId::parse(stem).ok()
}

fn is_record(path: &Path) -> bool {
    path.extension()
        .is_some_and(|ext| ext == MailboxConfig::RECORD_EXTENSION)
}

fn list_records(dir: &Path) -> Result<Vec<PathBuf>> {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(LinkError::io_with_path(e, dir)),
    };

    let mut paths: Vec<PathBuf> = entries
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(|p| is_record(p))
        .collect();
    paths.sort();
    Ok(paths)
}
