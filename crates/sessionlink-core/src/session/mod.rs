//! The live messaging session the primary owns.
//!
//! The session itself (connecting, authentication, transport) lives outside
//! this crate. Only the primary opens one, through a [`SessionFactory`].

mod fixture;
mod types;

pub use fixture::{FixtureFactory, FixtureSession};
pub use types::{ActivitySummary, Chat, Contact, MediaKind, MediaPayload, Message, SearchCriteria};

use crate::Result;
use std::sync::Arc;
use tokio::sync::watch;

/// Operations the primary performs against the live session.
#[async_trait::async_trait]
pub trait SessionHandle: Send + Sync {
    async fn list_chats(&self, limit: usize) -> Result<Vec<Chat>>;

    async fn list_contacts(&self) -> Result<Vec<Contact>>;

    /// Most recent messages first.
    async fn get_messages(&self, chat_id: &str, limit: usize) -> Result<Vec<Message>>;

    async fn search_messages(&self, criteria: &SearchCriteria) -> Result<Vec<Message>>;

    async fn send_message(&self, chat_id: &str, text: &str) -> Result<()>;

    async fn download_media(&self, message_id: &str) -> Result<MediaPayload>;

    async fn get_contact_activity(&self, chat_id: &str, window_days: u32) -> Result<ActivitySummary>;

    /// Readiness changes, if the session reports them.
    ///
    /// `None` means the session is ready as soon as it is opened.
    fn readiness(&self) -> Option<watch::Receiver<bool>> {
        None
    }
}

/// Opens the session when an instance becomes primary.
#[async_trait::async_trait]
pub trait SessionFactory: Send + Sync {
    async fn open(&self) -> Result<Arc<dyn SessionHandle>>;
}
