//! Post-filtering for message lists.

use crate::session::{MediaKind, Message};
use crate::{LinkError, Result};
use chrono::{DateTime, NaiveDate, Utc};

/// Date range, media kind and body text constraints on messages.
///
/// Empty fields match everything.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MessageFilter {
    pub since: Option<DateTime<Utc>>,
    pub until: Option<DateTime<Utc>>,
    pub media_type: Option<MediaKind>,
    query: Option<String>,
}

impl MessageFilter {
    /// Build a filter from request params.
    ///
    /// `since`/`until` accept RFC 3339 timestamps or bare `YYYY-MM-DD` dates;
    /// a bare `until` date covers that whole day.
    pub fn from_params(
        since: Option<&str>,
        until: Option<&str>,
        media_type: Option<MediaKind>,
        query: Option<&str>,
    ) -> Result<Self> {
        let since = since.map(|s| parse_bound(s, false)).transpose()?;
        let until = until.map(|s| parse_bound(s, true)).transpose()?;

        if let (Some(since), Some(until)) = (since, until) {
            if since > until {
                return Err(LinkError::InvalidParams {
                    message: format!("since ({}) is after until ({})", since, until),
                });
            }
        }

        Ok(Self {
            since,
            until,
            media_type,
            query: query
                .map(str::trim)
                .filter(|q| !q.is_empty())
                .map(str::to_lowercase),
        })
    }

    pub fn query(&self) -> Option<&str> {
        self.query.as_deref()
    }

    pub fn matches(&self, message: &Message) -> bool {
        if self.since.is_some_and(|since| message.timestamp < since) {
            return false;
        }
        if self.until.is_some_and(|until| message.timestamp > until) {
            return false;
        }
        if let Some(kind) = self.media_type {
            if message.media_type != Some(kind) {
                return false;
            }
        }
        match &self.query {
            Some(query) => message.body.to_lowercase().contains(query),
            None => true,
        }
    }

    pub fn apply(&self, messages: Vec<Message>) -> Vec<Message> {
        messages.into_iter().filter(|m| self.matches(m)).collect()
    }
}

fn parse_bound(value: &str, end_of_day: bool) -> Result<DateTime<Utc>> {
    let value = value.trim();
    if let Ok(ts) = DateTime::parse_from_rfc3339(value) {
        return Ok(ts.with_timezone(&Utc));
    }

    let date = NaiveDate::parse_from_str(value, "%Y-%m-%d").map_err(|_| LinkError::InvalidParams {
        message: format!("Invalid date {:?}: expected YYYY-MM-DD or an RFC 3339 timestamp", value),
    })?;
    let time = if end_of_day {
        date.and_hms_nano_opt(23, 59, 59, 999_999_999)
    } else {
        date.and_hms_opt(0, 0, 0)
    };
    time.map(|t| t.and_utc()).ok_or_else(|| LinkError::InvalidParams {
        message: format!("Invalid date {:?}", value),
    })
}
