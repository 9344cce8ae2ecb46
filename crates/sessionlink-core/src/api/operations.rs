//! Typed wrappers over [`SessionLink::call`].

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::json;

use crate::dispatch::{ChatMediaReport, SavedMedia, SendReceipt};
use crate::error::{LinkError, Result};
use crate::mailbox::Operation;
use crate::session::{ActivitySummary, Chat, Contact, MediaKind, Message};
use crate::SessionLink;

/// Optional message constraints shared by the message operations.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageQuery {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub chat_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub limit: Option<usize>,
    /// `YYYY-MM-DD` or RFC 3339, inclusive.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub since: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub until: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub media_type: Option<MediaKind>,
    /// Case-insensitive substring of the message body.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub query: Option<String>,
}

impl MessageQuery {
    pub fn text(query: impl Into<String>) -> Self {
        Self {
            query: Some(query.into()),
            ..Self::default()
        }
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    fn for_chat(self, chat_id: &str) -> Self {
        Self {
            chat_id: Some(chat_id.to_string()),
            ..self
        }
    }
}

impl SessionLink {
    async fn call_typed<T: DeserializeOwned>(
        &self,
        operation: Operation,
        params: impl Serialize,
    ) -> Result<T> {
        let params = serde_json::to_value(params)?;
        let value = self.call(operation, params).await?;
        serde_json::from_value(value).map_err(|e| LinkError::Protocol {
            message: format!("Unexpected {} result: {}", operation, e),
        })
    }

    pub async fn list_chats(&self, limit: Option<usize>) -> Result<Vec<Chat>> {
        self.call_typed(Operation::ListChats, json!({ "limit": limit }))
            .await
    }

    pub async fn list_contacts(&self) -> Result<Vec<Contact>> {
        self.call_typed(Operation::ListContacts, json!({})).await
    }

    pub async fn get_messages(&self, chat_id: &str, query: MessageQuery) -> Result<Vec<Message>> {
        self.call_typed(Operation::GetMessages, query.for_chat(chat_id))
            .await
    }

    pub async fn search_messages(&self, query: MessageQuery) -> Result<Vec<Message>> {
        self.call_typed(Operation::SearchMessages, query).await
    }

    pub async fn send_message(&self, chat_id: &str, text: &str) -> Result<SendReceipt> {
        self.call_typed(
            Operation::SendMessage,
            json!({ "chatId": chat_id, "text": text }),
        )
        .await
    }

    /// Download one message's media into the media directory.
    pub async fn download_media(&self, message_id: &str) -> Result<SavedMedia> {
        self.call_typed(Operation::DownloadMedia, json!({ "messageId": message_id }))
            .await
    }

    /// Download every media message of a chat matching `query`.
    ///
    /// Individual failures are listed in the report, not raised.
    pub async fn download_chat_media(&self, chat_id: &str, query: MessageQuery) -> Result<ChatMediaReport> {
        self.call_typed(Operation::DownloadChatMedia, query.for_chat(chat_id))
            .await
    }

    pub async fn get_contact_activity(&self, chat_id: &str, window_days: Option<u32>) -> Result<ActivitySummary> {
        self.call_typed(
            Operation::GetContactActivity,
            json!({ "chatId": chat_id, "windowDays": window_days }),
        )
        .await
    }
}
