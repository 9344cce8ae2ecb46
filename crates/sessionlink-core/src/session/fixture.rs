//! Session backed by a JSON fixture file.
//!
//! Stands in for a live messaging session when serving from the CLI or in
//! tests. Media entries point at files relative to the fixture.
//!
//! ```json
//! {
//!   "chats": [{"id": "c1", "name": "Alice"}],
//!   "contacts": [{"id": "c1", "name": "Alice"}],
//!   "messages": [{"id": "m1", "chatId": "c1", "timestamp": "2024-03-01T10:00:00Z", "body": "hi"}],
//!   "media": [{"messageId": "m1", "mimetype": "image/png", "file": "media/m1.png"}]
//! }
//! ```

use super::types::{ActivitySummary, Chat, Contact, MediaPayload, Message, SearchCriteria};
use super::{SessionFactory, SessionHandle};
use crate::{LinkError, Result};
use chrono::{Duration as ChronoDuration, Utc};
use serde::Deserialize;
use std::collections::{BTreeSet, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::{watch, RwLock};
use tracing::info;

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct FixtureFile {
    #[serde(default)]
    chats: Vec<Chat>,
    #[serde(default)]
    contacts: Vec<Contact>,
    #[serde(default)]
    messages: Vec<Message>,
    #[serde(default)]
    media: Vec<MediaEntry>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MediaEntry {
    message_id: String,
    mimetype: String,
    file: PathBuf,
    #[serde(default)]
    filename: Option<String>,
}

pub struct FixtureSession {
    base_dir: PathBuf,
    chats: Vec<Chat>,
    contacts: Vec<Contact>,
    messages: RwLock<Vec<Message>>,
    media: HashMap<String, MediaEntry>,
    ready: watch::Sender<bool>,
}

impl FixtureSession {
    /// Load a fixture file. Media paths resolve against its directory.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read(path).map_err(|e| LinkError::io_with_path(e, path))?;
        let fixture: FixtureFile = serde_json::from_slice(&content).map_err(|e| LinkError::Config {
            message: format!("Invalid fixture {}: {}", path.display(), e),
        })?;

        let base_dir = path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_default();

        info!(
            "Loaded fixture {} ({} chats, {} messages)",
            path.display(),
            fixture.chats.len(),
            fixture.messages.len()
        );
        Ok(Self::from_fixture(fixture, base_dir))
    }

    /// Build a fixture session in memory.
    pub fn new(chats: Vec<Chat>, contacts: Vec<Contact>, messages: Vec<Message>) -> Self {
        Self::from_fixture(
            FixtureFile {
                chats,
                contacts,
                messages,
                media: Vec::new(),
            },
            PathBuf::new(),
        )
    }

    fn from_fixture(fixture: FixtureFile, base_dir: PathBuf) -> Self {
        let (ready, _) = watch::channel(true);
        Self {
            base_dir,
            chats: fixture.chats,
            contacts: fixture.contacts,
            messages: RwLock::new(fixture.messages),
            media: fixture
                .media
                .into_iter()
                .map(|entry| (entry.message_id.clone(), entry))
                .collect(),
            ready,
        }
    }

    /// Attach in-memory media to a message; `file` is read on download.
    pub fn with_media(mut self, message_id: &str, mimetype: &str, file: impl Into<PathBuf>) -> Self {
        self.media.insert(
            message_id.to_string(),
            MediaEntry {
                message_id: message_id.to_string(),
                mimetype: mimetype.to_string(),
                file: file.into(),
                filename: None,
            },
        );
        self
    }

    /// Simulate the session connecting or dropping.
    pub fn set_ready(&self, ready: bool) {
        self.ready.send_replace(ready);
    }

    fn require_chat(&self, chat_id: &str, messages: &[Message]) -> Result<()> {
        let known = self.chats.iter().any(|c| c.id == chat_id)
            || messages.iter().any(|m| m.chat_id == chat_id);
        if known {
            Ok(())
        } else {
            Err(LinkError::Session {
                message: format!("Chat not found: {}", chat_id),
            })
        }
    }
}

fn newest_first(mut messages: Vec<Message>, limit: usize) -> Vec<Message> {
    messages.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
    messages.truncate(limit);
    messages
}

#[async_trait::async_trait]
impl SessionHandle for FixtureSession {
    async fn list_chats(&self, limit: usize) -> Result<Vec<Chat>> {
        Ok(self.chats.iter().take(limit).cloned().collect())
    }

    async fn list_contacts(&self) -> Result<Vec<Contact>> {
        Ok(self.contacts.clone())
    }

    async fn get_messages(&self, chat_id: &str, limit: usize) -> Result<Vec<Message>> {
        let messages = self.messages.read().await;
        self.require_chat(chat_id, &messages)?;
        let in_chat = messages
            .iter()
            .filter(|m| m.chat_id == chat_id)
            .cloned()
            .collect();
        Ok(newest_first(in_chat, limit))
    }

    async fn search_messages(&self, criteria: &SearchCriteria) -> Result<Vec<Message>> {
        let needle = criteria.query.as_ref().map(|q| q.to_lowercase());
        let messages = self.messages.read().await;
        let found = messages
            .iter()
            .filter(|m| criteria.chat_id.as_ref().map_or(true, |id| &m.chat_id == id))
            .filter(|m| {
                needle
                    .as_ref()
                    .map_or(true, |n| m.body.to_lowercase().contains(n))
            })
            .cloned()
            .collect();
        Ok(newest_first(found, criteria.limit))
    }

    async fn send_message(&self, chat_id: &str, text: &str) -> Result<()> {
        let mut messages = self.messages.write().await;
        self.require_chat(chat_id, &messages)?;
        messages.push(Message {
            id: format!("sent-{}", uuid::Uuid::new_v4().simple()),
            chat_id: chat_id.to_string(),
            sender: String::new(),
            from_me: true,
            timestamp: Utc::now(),
            body: text.to_string(),
            media_type: None,
        });
        Ok(())
    }

    async fn download_media(&self, message_id: &str) -> Result<MediaPayload> {
        let entry = self.media.get(message_id).ok_or_else(|| LinkError::Session {
            message: format!("No media for message {}", message_id),
        })?;
        let path = self.base_dir.join(&entry.file);
        let data = std::fs::read(&path).map_err(|e| LinkError::io_with_path(e, &path))?;

        Ok(MediaPayload {
            mimetype: entry.mimetype.clone(),
            data,
            filename: entry.filename.clone(),
        })
    }

    async fn get_contact_activity(&self, chat_id: &str, window_days: u32) -> Result<ActivitySummary> {
        let messages = self.messages.read().await;
        self.require_chat(chat_id, &messages)?;

        let cutoff = Utc::now() - ChronoDuration::days(i64::from(window_days));
        let recent: Vec<&Message> = messages
            .iter()
            .filter(|m| m.chat_id == chat_id && m.timestamp >= cutoff)
            .collect();

        let sent_count = recent.iter().filter(|m| m.from_me).count();
        let active_days: BTreeSet<_> = recent.iter().map(|m| m.timestamp.date_naive()).collect();

        Ok(ActivitySummary {
            chat_id: chat_id.to_string(),
            window_days,
            message_count: recent.len(),
            sent_count,
            received_count: recent.len() - sent_count,
            active_days: active_days.len(),
            first_message_at: recent.iter().map(|m| m.timestamp).min(),
            last_message_at: recent.iter().map(|m| m.timestamp).max(),
        })
    }

    fn readiness(&self) -> Option<watch::Receiver<bool>> {
        Some(self.ready.subscribe())
    }
}

/// Opens a [`FixtureSession`] from a file each time an instance becomes primary.
#[derive(Debug, Clone)]
pub struct FixtureFactory {
    path: PathBuf,
}

impl FixtureFactory {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait::async_trait]
impl SessionFactory for FixtureFactory {
    async fn open(&self) -> Result<Arc<dyn SessionHandle>> {
        Ok(Arc::new(FixtureSession::load(&self.path)?))
    }
}
