//! Primary instance state.

use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::info;

use crate::coordination::{LeaseKeeper, LeaseManager, StatePublisher};
use crate::dispatch::SessionDispatcher;
use crate::error::Result;
use crate::mailbox::{MailboxStore, ProcessorHandle, RequestProcessor};
use crate::session::{SessionFactory, SessionHandle};
use crate::LinkConfig;

/// Everything a primary owns while it holds the lease.
///
/// Wrapped in `Arc` so in-process calls can keep it alive while the facade
/// switches roles.
pub(crate) struct PrimaryState {
    pub(crate) session: Arc<dyn SessionHandle>,
    pub(crate) dispatcher: Arc<SessionDispatcher>,
    readiness: Option<watch::Receiver<bool>>,
    readiness_task: Mutex<Option<JoinHandle<()>>>,
    processor: Mutex<Option<ProcessorHandle>>,
    keeper: Mutex<Option<LeaseKeeper>>,
}

impl PrimaryState {
    /// Open the session and start serving the mailbox.
    ///
    /// The caller must already hold the lease.
    pub(crate) async fn start(
        factory: &dyn SessionFactory,
        lease: &Arc<LeaseManager>,
        publisher: &StatePublisher,
        store: &Arc<MailboxStore>,
        link_config: &LinkConfig,
        media_dir: &std::path::Path,
    ) -> Result<Self> {
        let instance_id = lease.instance_id().to_string();

        // The previous owner's record must not read as ready while we log in
        publisher.publish(false, &instance_id);

        let session = factory.open().await?;
        let dispatcher = Arc::new(SessionDispatcher::new(session.clone(), media_dir));

        // Publish readiness before serving
        let readiness = session.readiness();
        let readiness_task = match &readiness {
            Some(rx) => Some(publisher.follow(instance_id.clone(), rx.clone())),
            None => {
                publisher.publish(true, &instance_id);
                None
            }
        };

        let processor = match RequestProcessor::start(store.clone(), dispatcher.clone(), link_config).await {
            Ok(processor) => processor,
            Err(e) => {
                if let Some(task) = readiness_task {
                    task.abort();
                }
                publisher.publish(false, &instance_id);
                return Err(e);
            }
        };
        let keeper = LeaseKeeper::start(lease.clone(), link_config.lease_renew_interval);

        info!(
            "Instance {} is primary (renewing every {:?}, freshness {:?})",
            instance_id,
            link_config.lease_renew_interval,
            link_config.lease_freshness
        );

        Ok(Self {
            session,
            dispatcher,
            readiness,
            readiness_task: Mutex::new(readiness_task),
            processor: Mutex::new(Some(processor)),
            keeper: Mutex::new(Some(keeper)),
        })
    }

    /// Authoritative readiness for this process.
    pub(crate) fn is_ready(&self) -> bool {
        self.readiness.as_ref().map_or(true, |rx| *rx.borrow())
    }

    /// Stop renewal and serving, waiting for the processor loop to exit.
    pub(crate) async fn stop(&self) {
        self.stop_background();
        let processor = self
            .processor
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(processor) = processor {
            processor.stop().await;
        }
    }

    /// Synchronous teardown for `Drop`: abort everything.
    pub(crate) fn abort(&self) {
        self.stop_background();
        let processor = self
            .processor
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        drop(processor);
    }

    /// The keeper must stop before the lease is released, or its next
    /// renewal would clear `releasedAt`.
    fn stop_background(&self) {
        if let Some(mut keeper) = self.keeper.lock().unwrap_or_else(PoisonError::into_inner).take() {
            keeper.stop();
        }
        if let Some(task) = self
            .readiness_task
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            task.abort();
        }
    }
}
