//! Request processor for the primary instance.
//!
//! Reconciles requests orphaned by a previous primary, then services the
//! mailbox on a fixed tick until shut down.
//!
//! # Failure isolation
//!
//! Each request is dispatched in its own tokio task. Errors and panics are
//! turned into `error` responses so one bad request never stops the loop.

use super::protocol::{Operation, RequestId, RequestRecord, ResponseRecord};
use super::store::{id_from_path, MailboxStore};
use super::watcher::MailboxWatcher;
use crate::config::LinkConfig;
use crate::{LinkError, Result};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{oneshot, Notify};
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

/// Trait for dispatching mailbox operations on the primary.
///
/// Implemented by the session dispatcher; tests plug in their own.
#[async_trait::async_trait]
pub trait RequestDispatch: Send + Sync + 'static {
    async fn dispatch(&self, operation: Operation, params: serde_json::Value) -> Result<serde_json::Value>;
}

/// Outcome of the startup reconciliation pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    /// Requests answered with an orphaned-on-restart error.
    pub orphaned: usize,
    /// Requests that already had a response; only the request was removed.
    pub already_answered: usize,
    /// Uncollected responses and temp files swept.
    pub swept: usize,
}

/// Handle to a running processor. Dropping it stops the loop.
pub struct ProcessorHandle {
    shutdown_tx: Option<oneshot::Sender<()>>,
    task_handle: Option<tokio::task::JoinHandle<()>>,
    wake: Arc<Notify>,
    _watcher: Option<MailboxWatcher>,
    pub reconciled: ReconcileReport,
}

impl ProcessorHandle {
    /// Poll now instead of waiting for the next tick.
    pub fn wake(&self) {
        self.wake.notify_one();
    }

    /// Stop the loop after the request currently being handled, if any.
    pub fn shutdown(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
    }

    /// Stop the loop and wait for it to exit.
    pub async fn stop(mut self) {
        self.shutdown();
        if let Some(handle) = self.task_handle.take() {
            let _ = handle.await;
        }
    }
}

impl Drop for ProcessorHandle {
    fn drop(&mut self) {
        self.shutdown();
        if let Some(handle) = self.task_handle.take() {
            handle.abort();
        }
    }
}

/// Services the mailbox on behalf of the session handle.
pub struct RequestProcessor;

impl RequestProcessor {
    /// Reconcile, then start polling in a background task.
    ///
    /// Reconciliation completes before this returns, so no orphan from a
    /// previous primary is left waiting once the new primary is up.
    pub async fn start<D: RequestDispatch>(
        store: Arc<MailboxStore>,
        dispatch: Arc<D>,
        config: &LinkConfig,
    ) -> Result<ProcessorHandle> {
        store.ensure_dirs()?;

        let reconciled = Self::reconcile(&store, config.max_call_timeout());

        let wake = Arc::new(Notify::new());
        let watcher = if config.watch_requests {
            match MailboxWatcher::new(store.requests_dir(), wake.clone()) {
                Ok(watcher) => Some(watcher),
                Err(e) => {
                    warn!("Falling back to tick-only polling: {}", e);
                    None
                }
            }
        } else {
            None
        };

        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
        let task_handle = tokio::spawn(Self::poll_loop(
            store,
            dispatch,
            config.processor_tick_interval,
            wake.clone(),
            shutdown_rx,
        ));

        info!(
            "Request processor started (tick {:?}, watch {})",
            config.processor_tick_interval,
            watcher.is_some()
        );

        Ok(ProcessorHandle {
            shutdown_tx: Some(shutdown_tx),
            task_handle: Some(task_handle),
            wake,
            _watcher: watcher,
            reconciled,
        })
    }

    /// Answer every pre-existing request with an error and delete it.
    ///
    /// Any proxy still waiting on one of these gets a prompt failure instead
    /// of hanging until its timeout.
    pub fn reconcile(store: &MailboxStore, sweep_after: Duration) -> ReconcileReport {
        let mut report = ReconcileReport::default();

        let pending = match store.pending_requests() {
            Ok(pending) => pending,
            Err(e) => {
                warn!("Reconciliation could not list requests: {}", e);
                Vec::new()
            }
        };

        for path in pending {
            let Some(id) = id_from_path(&path) else {
                warn!("Skipping mailbox file with invalid id: {}", path.display());
                continue;
            };

            if store.response_exists(&id) {
                report.already_answered += 1;
            } else {
                match store.write_response(&ResponseRecord::orphaned(id.clone())) {
                    Ok(()) => report.orphaned += 1,
                    Err(e) => {
                        error!("Failed to answer orphaned request {}: {}", id, e);
                        continue;
                    }
                }
            }

            if let Err(e) = store.remove_request(&id) {
                warn!("Failed to remove orphaned request {}: {}", id, e);
            }
        }

        report.swept = store.sweep_stale(sweep_after);

        if report.orphaned + report.already_answered + report.swept > 0 {
            info!(
                "Reconciled mailbox: orphaned={}, already_answered={}, swept={}",
                report.orphaned, report.already_answered, report.swept
            );
        }
        report
    }

    async fn poll_loop<D: RequestDispatch>(
        store: Arc<MailboxStore>,
        dispatch: Arc<D>,
        tick: Duration,
        wake: Arc<Notify>,
        mut shutdown_rx: oneshot::Receiver<()>,
    ) {
        let mut ticker = tokio::time::interval(tick);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = &mut shutdown_rx => {
                    info!("Request processor shutting down");
                    break;
                }
                _ = ticker.tick() => {}
                _ = wake.notified() => {}
            }

            Self::process_pending(&store, &dispatch).await;
        }
    }

    /// One tick: service every request found in a single listing.
    ///
    /// Returns how many requests were answered.
    pub async fn process_pending<D: RequestDispatch>(store: &MailboxStore, dispatch: &Arc<D>) -> usize {
        let pending = match store.pending_requests() {
            Ok(pending) => pending,
            Err(e) => {
                warn!("Failed to list pending requests: {}", e);
                return 0;
            }
        };

        let mut answered = 0;
        for path in pending {
            if Self::process_one(store, dispatch, &path).await {
                answered += 1;
            }
        }
        answered
    }

    async fn process_one<D: RequestDispatch>(store: &MailboxStore, dispatch: &Arc<D>, path: &Path) -> bool {
        let Some(id) = id_from_path(path) else {
            warn!("Ignoring mailbox file with invalid id: {}", path.display());
            return false;
        };

        let response = match store.read_request_file(path) {
            // Withdrawn by its proxy (timeout) before we got to it
            Ok(None) => return false,
            Ok(Some(request)) if request.id != id => ResponseRecord::failure(
                id.clone(),
                &LinkError::Protocol {
                    message: format!("Request id {} does not match its file name", request.id),
                },
            ),
            Ok(Some(request)) => Self::dispatch_request(dispatch, request).await,
            Err(e) => {
                warn!("Rejecting unreadable request {}: {}", id, e);
                ResponseRecord::failure(id.clone(), &e)
            }
        };

        Self::respond(store, &id, response)
    }

    async fn dispatch_request<D: RequestDispatch>(dispatch: &Arc<D>, request: RequestRecord) -> ResponseRecord {
        let RequestRecord {
            id,
            operation,
            params,
            ..
        } = request;
        debug!("Dispatching {} request {}", operation, id);

        let dispatch = dispatch.clone();
        let outcome = tokio::spawn(async move { dispatch.dispatch(operation, params).await }).await;

        match outcome {
            Ok(Ok(result)) => ResponseRecord::success(id, result),
            Ok(Err(e)) => {
                debug!("{} request {} failed: {}", operation, id, e);
                ResponseRecord::failure(id, &e)
            }
            Err(join_error) => {
                error!("{} request {} panicked: {}", operation, id, join_error);
                ResponseRecord::failure(
                    id,
                    &LinkError::Other(format!("{} failed unexpectedly on the primary", operation)),
                )
            }
        }
    }

    fn respond(store: &MailboxStore, id: &RequestId, response: ResponseRecord) -> bool {
        if let Err(e) = store.write_response(&response) {
            error!("Failed to write response for {}: {}", id, e);
            return false;
        }
        if let Err(e) = store.remove_request(id) {
            warn!("Failed to remove answered request {}: {}", id, e);
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::persist::atomic_write_json;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::TempDir;

    struct EchoDispatch {
        calls: AtomicUsize,
    }

    #[async_trait::async_trait]
    impl RequestDispatch for EchoDispatch {
        async fn dispatch(&self, operation: Operation, params: serde_json::Value) -> Result<serde_json::Value> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            match operation {
                Operation::ListChats => Ok(params),
                Operation::SendMessage => Err(LinkError::Session {
                    message: "session is not connected".to_string(),
                }),
                Operation::ListContacts => panic!("contact list exploded"),
                _ => Ok(json!(null)),
            }
        }
    }

    fn setup() -> (TempDir, Arc<MailboxStore>, Arc<EchoDispatch>) {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(MailboxStore::new(dir.path().join("mailbox")));
        store.ensure_dirs().unwrap();
        let dispatch = Arc::new(EchoDispatch {
            calls: AtomicUsize::new(0),
        });
        (dir, store, dispatch)
    }

    fn fast_config() -> LinkConfig {
        LinkConfig {
            processor_tick_interval: Duration::from_millis(10),
            watch_requests: false,
            ..LinkConfig::default()
        }
    }

    #[tokio::test]
    async fn test_process_pending_answers_and_removes_requests() {
        let (_dir, store, dispatch) = setup();
        let ok = RequestRecord::new(Operation::ListChats, json!({"limit": 5}));
        let failing = RequestRecord::new(Operation::SendMessage, json!({}));
        store.write_request(&ok).unwrap();
        store.write_request(&failing).unwrap();

        let answered = RequestProcessor::process_pending(&store, &dispatch).await;
        assert_eq!(answered, 2);
        assert!(store.pending_requests().unwrap().is_empty());

        let ok_response = store.read_response(&ok.id).unwrap().unwrap();
        assert_eq!(ok_response.into_result().unwrap(), json!({"limit": 5}));

        let failed = store.read_response(&failing.id).unwrap().unwrap();
        assert_eq!(failed.error.as_deref(), Some("Session error: session is not connected"));
    }

    #[tokio::test]
    async fn test_panicking_dispatch_does_not_stop_the_tick() {
        let (_dir, store, dispatch) = setup();
        let boom = RequestRecord::new(Operation::ListContacts, json!({}));
        let fine = RequestRecord::new(Operation::ListChats, json!([1]));
        store.write_request(&boom).unwrap();
        store.write_request(&fine).unwrap();

        assert_eq!(RequestProcessor::process_pending(&store, &dispatch).await, 2);

        let boom_response = store.read_response(&boom.id).unwrap().unwrap();
        assert!(boom_response.error.unwrap().contains("listContacts"));
        assert!(store.read_response(&fine.id).unwrap().unwrap().error.is_none());
    }

    #[tokio::test]
    async fn test_malformed_request_gets_protocol_error() {
        let (_dir, store, dispatch) = setup();
        std::fs::write(store.requests_dir().join("bad-1.json"), "{not json").unwrap();
        atomic_write_json(
            &store.requests_dir().join("bad-2.json"),
            &json!({"id": "bad-2", "operation": "teleport", "params": {}, "createdAt": "2024-01-01T00:00:00Z"}),
        )
        .unwrap();

        assert_eq!(RequestProcessor::process_pending(&store, &dispatch).await, 2);
        assert_eq!(dispatch.calls.load(Ordering::SeqCst), 0);

        let first = store.read_response(&RequestId::parse("bad-1").unwrap()).unwrap().unwrap();
        assert_eq!(first.error_kind.as_deref(), Some("protocol"));
        let second = store.read_response(&RequestId::parse("bad-2").unwrap()).unwrap().unwrap();
        assert_eq!(second.error_kind.as_deref(), Some("unknownOperation"));
        assert!(store.pending_requests().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_reconcile_answers_orphans() {
        let (_dir, store, _dispatch) = setup();
        let orphan = RequestRecord::new(Operation::ListChats, json!({}));
        store.write_request(&orphan).unwrap();

        let report = RequestProcessor::reconcile(&store, Duration::from_secs(60));
        assert_eq!(report.orphaned, 1);
        assert!(!store.request_exists(&orphan.id));

        let response = store.read_response(&orphan.id).unwrap().unwrap();
        assert!(response.error.unwrap().contains("restarted"));
        assert_eq!(response.error_kind.as_deref(), Some("orphanedOnRestart"));
    }

    #[tokio::test]
    async fn test_reconcile_keeps_existing_answer() {
        let (_dir, store, _dispatch) = setup();
        let request = RequestRecord::new(Operation::ListChats, json!({}));
        store.write_request(&request).unwrap();
        store
            .write_response(&ResponseRecord::success(request.id.clone(), json!(["done"])))
            .unwrap();

        let report = RequestProcessor::reconcile(&store, Duration::from_secs(60));
        assert_eq!(report.already_answered, 1);
        assert_eq!(report.orphaned, 0);
        assert!(!store.request_exists(&request.id));

        let response = store.read_response(&request.id).unwrap().unwrap();
        assert_eq!(response.into_result().unwrap(), json!(["done"]));
    }

    #[tokio::test]
    async fn test_started_processor_services_new_requests() {
        let (_dir, store, dispatch) = setup();
        let handle = RequestProcessor::start(store.clone(), dispatch.clone(), &fast_config())
            .await
            .unwrap();

        let request = RequestRecord::new(Operation::ListChats, json!({"hello": "world"}));
        store.write_request(&request).unwrap();

        let mut answered = false;
        for _ in 0..100 {
            if store.response_exists(&request.id) {
                answered = true;
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(answered, "processor should answer within a few ticks");
        assert!(!store.request_exists(&request.id));

        handle.stop().await;
    }

    #[tokio::test]
    async fn test_start_reconciles_before_returning() {
        let (_dir, store, dispatch) = setup();
        let orphan = RequestRecord::new(Operation::ListChats, json!({}));
        store.write_request(&orphan).unwrap();

        let handle = RequestProcessor::start(store.clone(), dispatch.clone(), &fast_config())
            .await
            .unwrap();

        assert_eq!(handle.reconciled.orphaned, 1);
        assert!(!store.request_exists(&orphan.id));
        assert!(store.read_response(&orphan.id).unwrap().unwrap().is_error());
        assert_eq!(dispatch.calls.load(Ordering::SeqCst), 0);
    }
}
