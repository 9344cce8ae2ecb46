//! Records returned by a session handle.
//!
//! These are serialized verbatim into Response Records, so field names are
//! camelCase on the wire.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A conversation: direct chat or group.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Chat {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub is_group: bool,
    #[serde(default)]
    pub unread_count: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_message_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Contact {
    pub id: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
}

/// Kind of media attached to a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    Image,
    Video,
    Audio,
    Voice,
    Document,
    Sticker,
}

impl MediaKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MediaKind::Image => "image",
            MediaKind::Video => "video",
            MediaKind::Audio => "audio",
            MediaKind::Voice => "voice",
            MediaKind::Document => "document",
            MediaKind::Sticker => "sticker",
        }
    }

    /// File extension used when the MIME type is unknown.
    pub fn default_extension(&self) -> &'static str {
        match self {
            MediaKind::Image => "jpg",
            MediaKind::Video => "mp4",
            MediaKind::Audio => "mp3",
            MediaKind::Voice => "ogg",
            MediaKind::Document => "pdf",
            MediaKind::Sticker => "webp",
        }
    }
}

impl std::fmt::Display for MediaKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: String,
    pub chat_id: String,
    #[serde(default)]
    pub sender: String,
    #[serde(default)]
    pub from_me: bool,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub body: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub media_type: Option<MediaKind>,
}

impl Message {
    pub fn has_media(&self) -> bool {
        self.media_type.is_some()
    }
}

/// Raw media bytes handed back by the session.
#[derive(Debug, Clone, PartialEq)]
pub struct MediaPayload {
    pub mimetype: String,
    pub data: Vec<u8>,
    pub filename: Option<String>,
}

/// Message counts for one chat over a trailing window.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActivitySummary {
    pub chat_id: String,
    pub window_days: u32,
    pub message_count: usize,
    pub sent_count: usize,
    pub received_count: usize,
    pub active_days: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub first_message_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_message_at: Option<DateTime<Utc>>,
}

/// What a `searchMessages` call asks the session for.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchCriteria {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub query: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chat_id: Option<String>,
    pub limit: usize,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_message_wire_format() {
        let msg: Message = serde_json::from_value(json!({
            "id": "m1",
            "chatId": "c1",
            "timestamp": "2024-03-01T10:00:00Z",
            "body": "hi",
            "mediaType": "voice"
        }))
        .unwrap();
        assert_eq!(msg.media_type, Some(MediaKind::Voice));
        assert!(!msg.from_me);

        let back = serde_json::to_value(&msg).unwrap();
        assert_eq!(back["chatId"], "c1");
        assert_eq!(back["mediaType"], "voice");
    }

    #[test]
    fn test_plain_message_omits_media_type() {
        let msg = Message {
            id: "m1".into(),
            chat_id: "c1".into(),
            sender: "Alice".into(),
            from_me: false,
            timestamp: Utc::now(),
            body: "text".into(),
            media_type: None,
        };
        assert!(serde_json::to_value(&msg).unwrap().get("mediaType").is_none());
    }
}
