//! SessionLink Core - single-owner session coordination for local processes.
//!
//! Many processes on one host want to drive a messaging session that only one
//! of them may own. The first instance to take the lease becomes the
//! **primary**: it opens the session, publishes readiness and serves a
//! filesystem mailbox. Every other instance is a **proxy** that relays calls
//! through that mailbox.
//!
//! # Example
//!
//! ```rust,ignore
//! use sessionlink_core::{FixtureFactory, SessionLink};
//!
//! #[tokio::main]
//! async fn main() -> sessionlink_core::Result<()> {
//!     let link = SessionLink::builder("/tmp/sessionlink")
//!         .auto_create_dirs(true)
//!         .session_factory(FixtureFactory::new("fixture.json"))
//!         .build()
//!         .await?;
//!
//!     // Identical whether this process is primary or proxy
//!     let chats = link.list_chats(Some(5)).await?;
//!     println!("Found {} chats as {}", chats.len(), link.role().await);
//!
//!     link.shutdown().await;
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod coordination;
pub mod dispatch;
pub mod error;
pub mod mailbox;
pub mod persist;
pub mod platform;
pub mod session;

mod api;

// Re-export commonly used types
pub use api::{LinkStatus, MessageQuery, Role, SessionLinkBuilder};
pub use config::LinkConfig;
pub use coordination::{LeaseManager, LeaseOutcome, LeaseRecord, LeaseStatus, ReadinessRecord, StatePublisher};
pub use dispatch::{ChatMediaReport, FailedDownload, SavedMedia, SendReceipt, SessionDispatcher};
pub use error::{LinkError, Result};
pub use mailbox::{MailboxStore, Operation, RequestBridge, RequestDispatch, RequestProcessor};
pub use session::{
    ActivitySummary, Chat, Contact, FixtureFactory, FixtureSession, MediaKind, MediaPayload, Message,
    SearchCriteria, SessionFactory, SessionHandle,
};

use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};

use api::PrimaryState;

/// Main entry point for coordinated session access.
///
/// Internally, `SessionLink` operates in one of two roles:
/// - **Primary**: Owns the session, renews the lease and serves the mailbox.
/// - **Proxy**: Relays calls through the mailbox to whoever is primary.
///
/// The role is transparent to callers: [`call`](Self::call) behaves the same
/// in both. A proxy with a session factory promotes itself when the lease
/// goes stale.
pub struct SessionLink {
    root: PathBuf,
    instance_id: String,
    config: LinkConfig,
    media_dir: PathBuf,
    factory: Option<Arc<dyn SessionFactory>>,
    lease: Arc<LeaseManager>,
    publisher: StatePublisher,
    store: Arc<MailboxStore>,
    inner: RwLock<LinkInner>,
    /// Serializes promotions. Held while the session opens, unlike `inner`.
    election: Mutex<()>,
}

/// Internal dispatch: Primary owns the session, Proxy relays via the mailbox.
enum LinkInner {
    Primary(Arc<PrimaryState>),
    Proxy(RequestBridge),
    Stopped,
}

/// What one `call` will be routed through, cloned out of the lock.
enum Route {
    Local(Arc<PrimaryState>),
    Mailbox(RequestBridge),
}

impl SessionLink {
    /// Create a builder for SessionLink.
    pub fn builder(root: impl Into<PathBuf>) -> SessionLinkBuilder {
        SessionLinkBuilder::new(root)
    }

    /// Join an existing root as a proxy, without ever owning the session.
    pub async fn connect(root: impl Into<PathBuf>) -> Result<Self> {
        SessionLinkBuilder::new(root).build().await
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn instance_id(&self) -> &str {
        &self.instance_id
    }

    pub fn config(&self) -> &LinkConfig {
        &self.config
    }

    pub fn mailbox(&self) -> &MailboxStore {
        &self.store
    }

    pub fn lease(&self) -> &LeaseManager {
        &self.lease
    }

    /// Current role of this instance.
    pub async fn role(&self) -> Role {
        match &*self.inner.read().await {
            LinkInner::Primary(_) => Role::Primary,
            LinkInner::Proxy(_) => Role::Proxy,
            LinkInner::Stopped => Role::Stopped,
        }
    }

    /// Returns true if this instance owns the session.
    pub async fn is_primary(&self) -> bool {
        self.role().await == Role::Primary
    }

    /// The live session, available on the primary only.
    pub async fn session(&self) -> Result<Arc<dyn SessionHandle>> {
        match &*self.inner.read().await {
            LinkInner::Primary(state) => Ok(state.session.clone()),
            _ => Err(LinkError::NotPrimary),
        }
    }

    /// Run an operation, wherever the session lives.
    ///
    /// On the primary the operation is dispatched in-process; errors are
    /// flattened the same way the mailbox flattens them, so callers see
    /// identical failures in both roles.
    pub async fn call(&self, operation: Operation, params: serde_json::Value) -> Result<serde_json::Value> {
        self.reelect().await;

        let route = match &*self.inner.read().await {
            LinkInner::Primary(state) => Route::Local(state.clone()),
            LinkInner::Proxy(bridge) => Route::Mailbox(bridge.clone()),
            LinkInner::Stopped => {
                return Err(LinkError::Other("SessionLink has been shut down".to_string()))
            }
        };

        match route {
            Route::Local(state) => state
                .dispatcher
                .dispatch(operation, params)
                .await
                .map_err(|e| LinkError::from_remote(e.to_string(), Some(e.kind()))),
            Route::Mailbox(bridge) => bridge.call(operation, params).await,
        }
    }

    /// Status from the readiness file; never relayed through the mailbox.
    pub async fn status(&self) -> LinkStatus {
        let published = match self.publisher.read_latest() {
            Ok(record) => record,
            Err(e) => {
                warn!("Failed to read readiness state: {}", e);
                None
            }
        };
        let state_updated_at = published.as_ref().map(|r| r.timestamp);

        match &*self.inner.read().await {
            LinkInner::Primary(state) => LinkStatus {
                role: Role::Primary,
                instance_id: self.instance_id.clone(),
                owner_instance_id: Some(self.instance_id.clone()),
                is_ready: state.is_ready(),
                state_updated_at,
            },
            inner => {
                let role = if matches!(inner, LinkInner::Stopped) {
                    Role::Stopped
                } else {
                    Role::Proxy
                };
                // A readiness record only counts while its writer still holds the lease
                let owner = match self.lease.inspect() {
                    LeaseStatus::Fresh(record) => Some(record.instance_id),
                    _ => None,
                };
                let is_ready = match (&published, &owner) {
                    (Some(record), Some(owner)) => record.is_ready && &record.owner_instance_id == owner,
                    _ => false,
                };
                LinkStatus {
                    role,
                    instance_id: self.instance_id.clone(),
                    owner_instance_id: owner,
                    is_ready,
                    state_updated_at,
                }
            }
        }
    }

    /// Stop serving and give up the lease. Further calls fail.
    pub async fn shutdown(&self) {
        let previous = {
            let mut inner = self.inner.write().await;
            std::mem::replace(&mut *inner, LinkInner::Stopped)
        };

        if let LinkInner::Primary(state) = previous {
            state.stop().await;
            self.publisher.publish(false, &self.instance_id);
            self.lease.release();
            info!("Instance {} shut down", self.instance_id);
        }
    }

    /// Try to become primary.
    ///
    /// Returns the started primary state, or `None` when another instance
    /// holds the lease. Failing to open the session after winning is an
    /// error, and the lease is released again. Callers hold `election`.
    async fn elect(&self) -> Result<Option<PrimaryState>> {
        let Some(factory) = &self.factory else {
            return Ok(None);
        };

        match self.lease.try_acquire() {
            LeaseOutcome::Primary { stale_owner } => {
                if let Some(owner) = stale_owner {
                    info!("Taking over from stale primary {}", owner);
                }
                let state = PrimaryState::start(
                    factory.as_ref(),
                    &self.lease,
                    &self.publisher,
                    &self.store,
                    &self.config,
                    &self.media_dir,
                )
                .await;

                match state {
                    Ok(state) => Ok(Some(state)),
                    Err(e) => {
                        warn!("Won the lease but could not open the session: {}", e);
                        self.lease.release();
                        Err(e)
                    }
                }
            }
            LeaseOutcome::Proxy { owner } => {
                info!("Instance {} is proxy for primary {}", self.instance_id, owner);
                Ok(None)
            }
        }
    }

    /// Re-election: a proxy that can open the session replaces a stale
    /// primary. Runs before every [`call`](Self::call); standby processes can
    /// also run it on a timer.
    ///
    /// The role lock is only taken to swap roles, so `status()` and `role()`
    /// answer while the session is still opening. Concurrent calls wait here
    /// for the outcome.
    ///
    /// Returns the role afterwards.
    pub async fn reelect(&self) -> Role {
        if !self.wants_election().await {
            return self.role().await;
        }

        let _election = self.election.lock().await;
        // Another call may have promoted while we waited
        if !self.wants_election().await {
            return self.role().await;
        }

        let state = match self.elect().await {
            Ok(Some(state)) => state,
            Ok(None) => {
                debug!("Re-election lost; staying proxy");
                return Role::Proxy;
            }
            Err(e) => {
                warn!("Re-election failed; staying proxy: {}", e);
                return Role::Proxy;
            }
        };

        let mut inner = self.inner.write().await;
        if !matches!(&*inner, LinkInner::Proxy(_)) {
            // Shut down while the session was opening
            drop(inner);
            state.stop().await;
            self.publisher.publish(false, &self.instance_id);
            self.lease.release();
            return Role::Stopped;
        }
        *inner = LinkInner::Primary(Arc::new(state));
        info!("Instance {} promoted to primary", self.instance_id);
        Role::Primary
    }

    async fn wants_election(&self) -> bool {
        self.factory.is_some()
            && self.role().await == Role::Proxy
            && self.lease.inspect().is_reclaimable()
    }
}

impl Drop for SessionLink {
    fn drop(&mut self) {
        let previous = std::mem::replace(self.inner.get_mut(), LinkInner::Stopped);
        if let LinkInner::Primary(state) = previous {
            state.abort();
            self.publisher.publish(false, &self.instance_id);
            self.lease.release();
        }
    }
}
