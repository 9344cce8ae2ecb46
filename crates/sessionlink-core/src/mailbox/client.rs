//! Proxy-side request bridge.
//!
//! Writes a Request Record, polls for the correlated Response Record, and
//! cleans up both files on every exit path. A crash between writing and
//! polling leaves the request behind for the next primary's reconciliation.

use super::protocol::{Operation, RequestId, RequestRecord, ResponseRecord};
use super::store::MailboxStore;
use crate::config::LinkConfig;
use crate::{LinkError, Result};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, warn};

/// Relays operations to the primary through the mailbox.
#[derive(Debug, Clone)]
pub struct RequestBridge {
    store: Arc<MailboxStore>,
    config: LinkConfig,
}

impl RequestBridge {
    pub fn new(store: Arc<MailboxStore>, config: LinkConfig) -> Self {
        Self { store, config }
    }

    pub fn store(&self) -> &MailboxStore {
        &self.store
    }

    /// Call an operation on the primary with the operation's default timeout.
    pub async fn call(&self, operation: Operation, params: serde_json::Value) -> Result<serde_json::Value> {
        let timeout = operation.timeout(&self.config);
        self.call_with_timeout(operation, params, timeout).await
    }

    /// Call an operation on the primary, giving up after `timeout`.
    ///
    /// Returns the response's `result` unchanged, or:
    /// - `Remote` / `OrphanedOnRestart` when the response carries `error`
    /// - `Timeout` when no response appears in time
    /// - `Io` when the request cannot be written
    pub async fn call_with_timeout(
        &self,
        operation: Operation,
        params: serde_json::Value,
        timeout: Duration,
    ) -> Result<serde_json::Value> {
        let record = RequestRecord::new(operation, params);
        let id = record.id.clone();

        self.store.write_request(&record)?;
        debug!("Submitted {} request {}", operation, id);

        let deadline = Instant::now() + timeout;
        loop {
            if self.store.response_exists(&id) {
                if let Some(response) = self.collect(&id)? {
                    return Self::finish(&id, response);
                }
            }

            if Instant::now() >= deadline {
                break;
            }
            tokio::time::sleep(self.config.response_poll_interval).await;
        }

        if let Err(e) = self.store.remove_request(&id) {
            warn!("Failed to remove timed-out request {}: {}", id, e);
        }
        warn!("Request {} ({}) timed out after {:?}", id, operation, timeout);

        Err(LinkError::Timeout {
            operation: operation.to_string(),
            waited: timeout,
        })
    }

    /// Read the response and remove both files.
    ///
    /// `Ok(None)` means the response vanished between the existence check
    /// and the read; polling continues.
    fn collect(&self, id: &RequestId) -> Result<Option<ResponseRecord>> {
        let response = match self.store.read_response(id) {
            Ok(response) => response,
            Err(e) => {
                self.cleanup(id);
                return Err(LinkError::Protocol {
                    message: format!("Unreadable response for request {}: {}", id, e),
                });
            }
        };

        if response.is_some() {
            self.cleanup(id);
        }
        Ok(response)
    }

    fn cleanup(&self, id: &RequestId) {
        if let Err(e) = self.store.remove_request(id) {
            warn!("Failed to remove request {}: {}", id, e);
        }
        if let Err(e) = self.store.remove_response(id) {
            warn!("Failed to remove response {}: {}", id, e);
        }
    }

    fn finish(id: &RequestId, response: ResponseRecord) -> Result<serde_json::Value> {
        if &response.id != id {
            return Err(LinkError::Protocol {
                message: format!(
                    "Response id {} does not match request {}",
                    response.id, id
                ),
            });
        }
        debug!("Collected response for request {}", id);
        response.into_result()
    }
}
