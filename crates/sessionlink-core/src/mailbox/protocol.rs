//! Request and Response Records exchanged through the mailbox.
//!
//! Each record is one JSON file named `<id>.json`:
//!
//! ```text
//! requests/<id>.json   {"id", "operation", "params", "createdAt"}
//! responses/<id>.json  {"id", "result" | "error", "errorKind"?, "completedAt"}
//! ```

use crate::config::LinkConfig;
use crate::{LinkError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// Operations the primary can perform on the session handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Operation {
    ListChats,
    ListContacts,
    GetMessages,
    SearchMessages,
    SendMessage,
    DownloadMedia,
    DownloadChatMedia,
    GetContactActivity,
}

impl Operation {
    pub const ALL: [Operation; 8] = [
        Operation::ListChats,
        Operation::ListContacts,
        Operation::GetMessages,
        Operation::SearchMessages,
        Operation::SendMessage,
        Operation::DownloadMedia,
        Operation::DownloadChatMedia,
        Operation::GetContactActivity,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Operation::ListChats => "listChats",
            Operation::ListContacts => "listContacts",
            Operation::GetMessages => "getMessages",
            Operation::SearchMessages => "searchMessages",
            Operation::SendMessage => "sendMessage",
            Operation::DownloadMedia => "downloadMedia",
            Operation::DownloadChatMedia => "downloadChatMedia",
            Operation::GetContactActivity => "getContactActivity",
        }
    }

    /// Media operations fan out into downloads and get the longer deadline.
    pub fn is_bulk(&self) -> bool {
        matches!(self, Operation::DownloadMedia | Operation::DownloadChatMedia)
    }

    /// How long a proxy waits for the response.
    pub fn timeout(&self, config: &LinkConfig) -> Duration {
        if self.is_bulk() {
            config.bulk_call_timeout
        } else {
            config.default_call_timeout
        }
    }
}

impl std::fmt::Display for Operation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Operation {
    type Err = LinkError;

    fn from_str(s: &str) -> Result<Self> {
        Operation::ALL
            .into_iter()
            .find(|op| op.as_str() == s)
            .ok_or_else(|| LinkError::UnknownOperation(s.to_string()))
    }
}

/// Unique, time-ordered request identifier: `<millis>-<random hex>`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RequestId(String);

static LAST_ID_MILLIS: AtomicU64 = AtomicU64::new(0);

impl RequestId {
    /// Generate a fresh id.
    ///
    /// The millisecond prefix is strictly increasing within a process, so ids
    /// sort in submission order per proxy; the random suffix separates
    /// proxies that share a millisecond.
    pub fn generate() -> Self {
        let now = Utc::now().timestamp_millis().max(0) as u64;
        let previous = LAST_ID_MILLIS
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |last| {
                Some(now.max(last + 1))
            })
            .unwrap_or(now);
        let millis = now.max(previous + 1);

        Self(format!("{:013}-{:08x}", millis, rand::random::<u32>()))
    }

    /// Accept an id read from a file name or a record.
    ///
    /// Ids become file names, so anything that could escape the mailbox
    /// directory is rejected.
    pub fn parse(s: &str) -> Result<Self> {
        let valid = !s.is_empty()
            && s.len() <= 128
            && s.chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
        if valid {
            Ok(Self(s.to_string()))
        } else {
            Err(LinkError::Protocol {
                message: format!("Invalid request id: {:?}", s),
            })
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn file_name(&self) -> String {
        format!("{}.{}", self.0, crate::config::MailboxConfig::RECORD_EXTENSION)
    }
}

impl std::fmt::Display for RequestId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// A pending operation written by a proxy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestRecord {
    pub id: RequestId,
    pub operation: Operation,
    #[serde(default)]
    pub params: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

impl RequestRecord {
    pub fn new(operation: Operation, params: serde_json::Value) -> Self {
        Self {
            id: RequestId::generate(),
            operation,
            params,
            created_at: Utc::now(),
        }
    }

    /// Parse a request file, distinguishing unknown operations from
    /// malformed records.
    pub fn from_slice(bytes: &[u8]) -> Result<Self> {
        let value: serde_json::Value = serde_json::from_slice(bytes)?;

        if let Some(op) = value.get("operation").and_then(|v| v.as_str()) {
            op.parse::<Operation>()?;
        }

        let record: RequestRecord = serde_json::from_value(value).map_err(|e| LinkError::Protocol {
            message: format!("Malformed request record: {}", e),
        })?;
        RequestId::parse(record.id.as_str())?;
        Ok(record)
    }
}

/// The primary's answer to one request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResponseRecord {
    pub id: RequestId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<String>,
    pub completed_at: DateTime<Utc>,
}

impl ResponseRecord {
    pub fn success(id: RequestId, result: serde_json::Value) -> Self {
        Self {
            id,
            result: Some(result),
            error: None,
            error_kind: None,
            completed_at: Utc::now(),
        }
    }

    pub fn failure(id: RequestId, err: &LinkError) -> Self {
        Self {
            id,
            result: None,
            error: Some(err.to_string()),
            error_kind: Some(err.kind().to_string()),
            completed_at: Utc::now(),
        }
    }

    /// Answer for a request abandoned by a primary that crashed.
    pub fn orphaned(id: RequestId) -> Self {
        Self::failure(
            id,
            &LinkError::OrphanedOnRestart {
                message: "Request was not completed: the primary instance was restarted"
                    .to_string(),
            },
        )
    }

    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }

    /// Turn the record into the caller's result.
    ///
    /// A `null` result deserializes as absent, so a record with neither field
    /// is a successful `null`.
    pub fn into_result(self) -> Result<serde_json::Value> {
        match self.error {
            Some(message) => Err(LinkError::from_remote(message, self.error_kind.as_deref())),
            None => Ok(self.result.unwrap_or(serde_json::Value::Null)),
        }
    }
}
