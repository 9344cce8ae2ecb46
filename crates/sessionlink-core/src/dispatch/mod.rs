//! Primary-side operation dispatch.
//!
//! Maps each [`Operation`] to session handle calls, validates params and
//! post-processes results (message filtering, media persistence).

mod filter;
mod media;

pub use filter::MessageFilter;
pub use media::{extension_for, media_file_stem, persist_media, SavedMedia};

use crate::config::DispatchConfig;
use crate::mailbox::{Operation, RequestDispatch};
use crate::session::{MediaKind, SearchCriteria, SessionHandle};
use crate::{LinkError, Result};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, warn};

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ListChatsParams {
    limit: Option<usize>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GetMessagesParams {
    chat_id: String,
    limit: Option<usize>,
    since: Option<String>,
    until: Option<String>,
    media_type: Option<MediaKind>,
    query: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SearchMessagesParams {
    query: Option<String>,
    chat_id: Option<String>,
    limit: Option<usize>,
    since: Option<String>,
    until: Option<String>,
    media_type: Option<MediaKind>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SendMessageParams {
    chat_id: String,
    text: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DownloadMediaParams {
    message_id: String,
    media_type: Option<MediaKind>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DownloadChatMediaParams {
    chat_id: String,
    limit: Option<usize>,
    since: Option<String>,
    until: Option<String>,
    media_type: Option<MediaKind>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ContactActivityParams {
    chat_id: String,
    window_days: Option<u32>,
}

/// Result of `sendMessage`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendReceipt {
    pub success: bool,
    pub chat_id: String,
}

/// A media download that failed inside `downloadChatMedia`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FailedDownload {
    pub message_id: String,
    pub error: String,
}

/// Result of `downloadChatMedia`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatMediaReport {
    pub chat_id: String,
    pub downloaded: Vec<SavedMedia>,
    pub failed: Vec<FailedDownload>,
}

/// Dispatches mailbox operations to a live session.
pub struct SessionDispatcher {
    session: Arc<dyn SessionHandle>,
    media_dir: PathBuf,
}

impl SessionDispatcher {
    pub fn new(session: Arc<dyn SessionHandle>, media_dir: impl Into<PathBuf>) -> Self {
        Self {
            session,
            media_dir: media_dir.into(),
        }
    }

    pub fn media_dir(&self) -> &Path {
        &self.media_dir
    }

    async fn list_chats(&self, params: ListChatsParams) -> Result<Value> {
        let limit = params.limit.unwrap_or(DispatchConfig::DEFAULT_CHAT_LIMIT);
        to_value(self.session.list_chats(limit).await?)
    }

    async fn get_messages(&self, params: GetMessagesParams) -> Result<Value> {
        let chat_id = required("chatId", params.chat_id)?;
        let filter = MessageFilter::from_params(
            params.since.as_deref(),
            params.until.as_deref(),
            params.media_type,
            params.query.as_deref(),
        )?;
        let limit = params.limit.unwrap_or(DispatchConfig::DEFAULT_MESSAGE_LIMIT);

        let messages = self.session.get_messages(&chat_id, limit).await?;
        to_value(filter.apply(messages))
    }

    async fn search_messages(&self, params: SearchMessagesParams) -> Result<Value> {
        let filter = MessageFilter::from_params(
            params.since.as_deref(),
            params.until.as_deref(),
            params.media_type,
            params.query.as_deref(),
        )?;
        let limit = params.limit.unwrap_or(DispatchConfig::DEFAULT_MESSAGE_LIMIT);
        let criteria = SearchCriteria {
            query: filter.query().map(str::to_string),
            chat_id: params.chat_id.filter(|id| !id.is_empty()),
            limit,
        };

        let mut found = filter.apply(self.session.search_messages(&criteria).await?);
        found.truncate(limit);
        to_value(found)
    }

    async fn send_message(&self, params: SendMessageParams) -> Result<Value> {
        let chat_id = required("chatId", params.chat_id)?;
        let text = required("text", params.text)?;

        self.session.send_message(&chat_id, &text).await?;
        to_value(SendReceipt {
            success: true,
            chat_id,
        })
    }

    async fn download_media(&self, params: DownloadMediaParams) -> Result<Value> {
        let message_id = required("messageId", params.message_id)?;
        let payload = self.session.download_media(&message_id).await?;
        to_value(persist_media(&self.media_dir, &message_id, &payload, params.media_type)?)
    }

    async fn download_chat_media(&self, params: DownloadChatMediaParams) -> Result<Value> {
        let chat_id = required("chatId", params.chat_id)?;
        let filter = MessageFilter::from_params(
            params.since.as_deref(),
            params.until.as_deref(),
            params.media_type,
            None,
        )?;
        let limit = params.limit.unwrap_or(DispatchConfig::DEFAULT_MESSAGE_LIMIT);

        let messages = filter.apply(self.session.get_messages(&chat_id, limit).await?);
        let mut report = ChatMediaReport {
            chat_id,
            downloaded: Vec::new(),
            failed: Vec::new(),
        };

        for message in messages.iter().filter(|m| m.has_media()) {
            let saved = match self.session.download_media(&message.id).await {
                Ok(payload) => persist_media(&self.media_dir, &message.id, &payload, message.media_type),
                Err(e) => Err(e),
            };
            match saved {
                Ok(saved) => report.downloaded.push(saved),
                Err(e) => {
                    warn!("Failed to download media for {}: {}", message.id, e);
                    report.failed.push(FailedDownload {
                        message_id: message.id.clone(),
                        error: e.to_string(),
                    });
                }
            }
        }

        debug!(
            "Chat {} media: {} downloaded, {} failed",
            report.chat_id,
            report.downloaded.len(),
            report.failed.len()
        );
        to_value(report)
    }

    async fn get_contact_activity(&self, params: ContactActivityParams) -> Result<Value> {
        let chat_id = required("chatId", params.chat_id)?;
        let window_days = params
            .window_days
            .unwrap_or(DispatchConfig::DEFAULT_ACTIVITY_WINDOW_DAYS);
        if window_days == 0 {
            return Err(LinkError::InvalidParams {
                message: "windowDays must be at least 1".to_string(),
            });
        }
        to_value(self.session.get_contact_activity(&chat_id, window_days).await?)
    }
}

#[async_trait::async_trait]
impl RequestDispatch for SessionDispatcher {
    async fn dispatch(&self, operation: Operation, params: Value) -> Result<Value> {
        match operation {
            Operation::ListChats => self.list_chats(parse_params(operation, params)?).await,
            Operation::ListContacts => to_value(self.session.list_contacts().await?),
            Operation::GetMessages => self.get_messages(parse_params(operation, params)?).await,
            Operation::SearchMessages => self.search_messages(parse_params(operation, params)?).await,
            Operation::SendMessage => self.send_message(parse_params(operation, params)?).await,
            Operation::DownloadMedia => self.download_media(parse_params(operation, params)?).await,
            Operation::DownloadChatMedia => {
                self.download_chat_media(parse_params(operation, params)?).await
            }
            Operation::GetContactActivity => {
                self.get_contact_activity(parse_params(operation, params)?).await
            }
        }
    }
}

/// Deserialize params; a missing params object counts as `{}`.
fn parse_params<P: DeserializeOwned>(operation: Operation, params: Value) -> Result<P> {
    let params = if params.is_null() { json!({}) } else { params };
    serde_json::from_value(params).map_err(|e| LinkError::InvalidParams {
        message: format!("{}: {}", operation, e),
    })
}

fn required(name: &str, value: String) -> Result<String> {
    if value.trim().is_empty() {
        Err(LinkError::InvalidParams {
            message: format!("{} is required", name),
        })
    } else {
        Ok(value)
    }
}

fn to_value<T: Serialize>(value: T) -> Result<Value> {
    Ok(serde_json::to_value(value)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::{Chat, Contact, FixtureSession, Message};
    use chrono::{DateTime, Utc};
    use tempfile::TempDir;

    fn at(ts: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(ts).unwrap().with_timezone(&Utc)
    }

    fn message(id: &str, ts: &str, body: &str, media_type: Option<MediaKind>) -> Message {
        Message {
            id: id.to_string(),
            chat_id: "c1".to_string(),
            sender: "Alice".to_string(),
            from_me: false,
            timestamp: at(ts),
            body: body.to_string(),
            media_type,
        }
    }

    fn dispatcher(dir: &TempDir) -> SessionDispatcher {
        let chats = (1..=3)
            .map(|i| Chat {
                id: format!("c{}", i),
                name: format!("Chat {}", i),
                is_group: false,
                unread_count: 0,
                last_message_at: None,
            })
            .collect();
        let contacts = vec![Contact {
            id: "c1".to_string(),
            name: "Alice".to_string(),
            phone: None,
        }];
        let messages = vec![
            message("m1", "2024-03-01T09:00:00Z", "Hiking on Saturday?", None),
            message("m2", "2024-03-02T09:00:00Z", "trail map", Some(MediaKind::Image)),
            message("m3", "2024-03-03T09:00:00Z", "voice", Some(MediaKind::Voice)),
        ];

        std::fs::write(dir.path().join("m2.png"), b"png-bytes").unwrap();
        let session = FixtureSession::new(chats, contacts, messages).with_media(
            "m2",
            "image/png",
            dir.path().join("m2.png"),
        );
        SessionDispatcher::new(Arc::new(session), dir.path().join("media"))
    }

    #[tokio::test]
    async fn test_list_chats_applies_limit() {
        let dir = TempDir::new().unwrap();
        let dispatcher = dispatcher(&dir);

        let all = dispatcher.dispatch(Operation::ListChats, Value::Null).await.unwrap();
        assert_eq!(all.as_array().unwrap().len(), 3);

        let two = dispatcher
            .dispatch(Operation::ListChats, json!({"limit": 2}))
            .await
            .unwrap();
        assert_eq!(two.as_array().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_get_messages_filters() {
        let dir = TempDir::new().unwrap();
        let dispatcher = dispatcher(&dir);

        let result = dispatcher
            .dispatch(
                Operation::GetMessages,
                json!({"chatId": "c1", "since": "2024-03-02", "mediaType": "image"}),
            )
            .await
            .unwrap();
        let ids: Vec<_> = result
            .as_array()
            .unwrap()
            .iter()
            .map(|m| m["id"].as_str().unwrap())
            .collect();
        assert_eq!(ids, vec!["m2"]);
    }

    #[tokio::test]
    async fn test_missing_chat_id_is_invalid_params() {
        let dir = TempDir::new().unwrap();
        let dispatcher = dispatcher(&dir);

        let err = dispatcher
            .dispatch(Operation::GetMessages, json!({}))
            .await
            .unwrap_err();
        assert!(matches!(err, LinkError::InvalidParams { .. }));
        assert!(err.to_string().contains("chatId"));

        let err = dispatcher
            .dispatch(Operation::SendMessage, json!({"chatId": "c1", "text": "  "}))
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "Invalid params: text is required");
    }

    #[tokio::test]
    async fn test_search_messages_is_case_insensitive() {
        let dir = TempDir::new().unwrap();
        let dispatcher = dispatcher(&dir);

        let result = dispatcher
            .dispatch(Operation::SearchMessages, json!({"query": "HIKING"}))
            .await
            .unwrap();
        assert_eq!(result.as_array().unwrap().len(), 1);
        assert_eq!(result[0]["id"], "m1");
    }

    #[tokio::test]
    async fn test_send_message_reports_success() {
        let dir = TempDir::new().unwrap();
        let dispatcher = dispatcher(&dir);

        let result = dispatcher
            .dispatch(Operation::SendMessage, json!({"chatId": "c2", "text": "hello"}))
            .await
            .unwrap();
        assert_eq!(result, json!({"success": true, "chatId": "c2"}));
    }

    #[tokio::test]
    async fn test_download_media_persists_file() {
        let dir = TempDir::new().unwrap();
        let dispatcher = dispatcher(&dir);

        let result = dispatcher
            .dispatch(Operation::DownloadMedia, json!({"messageId": "m2"}))
            .await
            .unwrap();
        assert_eq!(result["size"], 9);
        assert_eq!(result["mimetype"], "image/png");
        let path = PathBuf::from(result["path"].as_str().unwrap());
        assert_eq!(path, dispatcher.media_dir().join("m2.png"));
        assert_eq!(std::fs::read(path).unwrap(), b"png-bytes");
    }

    #[tokio::test]
    async fn test_download_chat_media_collects_failures() {
        let dir = TempDir::new().unwrap();
        let dispatcher = dispatcher(&dir);

        let result = dispatcher
            .dispatch(Operation::DownloadChatMedia, json!({"chatId": "c1"}))
            .await
            .unwrap();
        assert_eq!(result["chatId"], "c1");
        assert_eq!(result["downloaded"].as_array().unwrap().len(), 1);
        assert_eq!(result["downloaded"][0]["messageId"], "m2");
        assert_eq!(result["failed"].as_array().unwrap().len(), 1);
        assert_eq!(result["failed"][0]["messageId"], "m3");
    }

    #[tokio::test]
    async fn test_contact_activity_rejects_zero_window() {
        let dir = TempDir::new().unwrap();
        let dispatcher = dispatcher(&dir);

        let err = dispatcher
            .dispatch(Operation::GetContactActivity, json!({"chatId": "c1", "windowDays": 0}))
            .await
            .unwrap_err();
        assert!(matches!(err, LinkError::InvalidParams { .. }));

        let summary = dispatcher
            .dispatch(Operation::GetContactActivity, json!({"chatId": "c1"}))
            .await
            .unwrap();
        assert_eq!(summary["windowDays"], 30);
    }
}
