//! Builder for configuring SessionLink initialization.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use tracing::info;

use crate::config::{LinkConfig, PathsConfig};
use crate::coordination::{LeaseManager, StatePublisher};
use crate::error::{LinkError, Result};
use crate::mailbox::{MailboxStore, RequestBridge};
use crate::session::SessionFactory;
use crate::{LinkInner, SessionLink};

/// Builder for configuring SessionLink initialization.
///
/// # Example
///
/// ```rust,ignore
/// use sessionlink_core::{FixtureFactory, SessionLink};
///
/// let link = SessionLink::builder("/tmp/sessionlink")
///     .auto_create_dirs(true)
///     .session_factory(FixtureFactory::new("fixture.json"))
///     .build()
///     .await?;
/// ```
pub struct SessionLinkBuilder {
    root: PathBuf,
    config: LinkConfig,
    factory: Option<Arc<dyn SessionFactory>>,
    auto_create_dirs: bool,
}

impl SessionLinkBuilder {
    /// Create a new builder for the coordination root directory.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            config: LinkConfig::default(),
            factory: None,
            auto_create_dirs: false,
        }
    }

    /// Auto-create the root, mailbox and media directories if missing.
    ///
    /// Default: `false` (the root must exist)
    pub fn auto_create_dirs(mut self, enable: bool) -> Self {
        self.auto_create_dirs = enable;
        self
    }

    /// Timing and media settings.
    pub fn config(mut self, config: LinkConfig) -> Self {
        self.config = config;
        self
    }

    /// How to open the session if this instance becomes primary.
    ///
    /// Without a factory the instance can only ever be a proxy.
    pub fn session_factory(mut self, factory: impl SessionFactory + 'static) -> Self {
        self.factory = Some(Arc::new(factory));
        self
    }

    /// Same as [`session_factory`](Self::session_factory) for a shared factory.
    pub fn shared_session_factory(mut self, factory: Arc<dyn SessionFactory>) -> Self {
        self.factory = Some(factory);
        self
    }

    fn create_directory_structure(root: &Path, media_dir: &Path) -> Result<()> {
        let mailbox = root.join(PathsConfig::MAILBOX_DIR_NAME);
        let dirs = [
            root.to_path_buf(),
            mailbox.join(PathsConfig::REQUESTS_DIR_NAME),
            mailbox.join(PathsConfig::RESPONSES_DIR_NAME),
            media_dir.to_path_buf(),
        ];

        for dir in &dirs {
            if !dir.exists() {
                std::fs::create_dir_all(dir).map_err(|e| LinkError::Io {
                    message: format!("Failed to create directory: {}", dir.display()),
                    path: Some(dir.clone()),
                    source: Some(e),
                })?;
            }
        }

        Ok(())
    }

    /// Build the SessionLink, electing primary or proxy.
    pub async fn build(self) -> Result<SessionLink> {
        let media_dir = self
            .config
            .media_dir
            .clone()
            .unwrap_or_else(|| self.root.join(PathsConfig::MEDIA_DIR_NAME));

        if self.auto_create_dirs {
            Self::create_directory_structure(&self.root, &media_dir)?;
        } else if !self.root.exists() {
            return Err(LinkError::Config {
                message: format!("Coordination root does not exist: {}", self.root.display()),
            });
        }

        let instance_id = uuid::Uuid::new_v4().to_string();
        let lease = Arc::new(LeaseManager::new(
            self.root.join(PathsConfig::LEASE_FILENAME),
            instance_id.clone(),
            self.config.lease_freshness,
        ));
        let publisher = StatePublisher::new(self.root.join(PathsConfig::STATE_FILENAME));
        let store = Arc::new(MailboxStore::new(self.root.join(PathsConfig::MAILBOX_DIR_NAME)));
        let bridge = RequestBridge::new(store.clone(), self.config.clone());

        let mut link = SessionLink {
            root: self.root,
            instance_id,
            config: self.config,
            media_dir,
            factory: self.factory,
            lease,
            publisher,
            store,
            inner: RwLock::new(LinkInner::Proxy(bridge)),
            election: Mutex::new(()),
        };

        if link.factory.is_some() {
            if let Some(state) = link.elect().await? {
                *link.inner.get_mut() = LinkInner::Primary(Arc::new(state));
            }
        } else {
            info!("Instance {} joined as proxy (no session factory)", link.instance_id);
        }

        Ok(link)
    }
}
