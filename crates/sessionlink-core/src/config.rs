//! Centralized configuration for SessionLink.
//!
//! Constants live on the `XxxConfig` holder structs. [`LinkConfig`] is the
//! runtime value built from them; tests shrink its intervals.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Application-level configuration.
pub struct AppConfig;

impl AppConfig {
    pub const APP_NAME: &'static str = "sessionlink";
    pub const ROOT_ENV_VAR: &'static str = "SESSIONLINK_ROOT";
}

/// Lease and readiness coordination timing.
pub struct CoordinationConfig;

impl CoordinationConfig {
    /// A lease not renewed within this window is stale.
    pub const LEASE_FRESHNESS: Duration = Duration::from_secs(60);
    pub const LEASE_RENEW_INTERVAL: Duration = Duration::from_secs(30);
}

/// Mailbox polling and call deadlines.
pub struct MailboxConfig;

impl MailboxConfig {
    pub const RESPONSE_POLL_INTERVAL: Duration = Duration::from_millis(100);
    pub const PROCESSOR_TICK_INTERVAL: Duration = Duration::from_millis(500);
    pub const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_secs(30);
    /// Media operations fan out into many downloads.
    pub const BULK_CALL_TIMEOUT: Duration = Duration::from_secs(60);
    pub const RECORD_EXTENSION: &'static str = "json";
    pub const TEMP_SUFFIX: &'static str = "tmp";
}

/// Defaults for omitted operation params.
pub struct DispatchConfig;

impl DispatchConfig {
    pub const DEFAULT_CHAT_LIMIT: usize = 20;
    pub const DEFAULT_MESSAGE_LIMIT: usize = 50;
    pub const DEFAULT_ACTIVITY_WINDOW_DAYS: u32 = 30;
    /// Extension for media whose type cannot be inferred.
    pub const FALLBACK_MEDIA_EXTENSION: &'static str = "bin";
}

/// Directory and file names under the coordination root.
pub struct PathsConfig;

impl PathsConfig {
    pub const MAILBOX_DIR_NAME: &'static str = "mailbox";
    pub const REQUESTS_DIR_NAME: &'static str = "requests";
    pub const RESPONSES_DIR_NAME: &'static str = "responses";
    pub const MEDIA_DIR_NAME: &'static str = "media";
    pub const LEASE_FILENAME: &'static str = "lease.json";
    pub const STATE_FILENAME: &'static str = "state.json";
}

/// Runtime configuration for one SessionLink instance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct LinkConfig {
    #[serde(with = "millis")]
    pub lease_freshness: Duration,
    #[serde(with = "millis")]
    pub lease_renew_interval: Duration,
    #[serde(with = "millis")]
    pub response_poll_interval: Duration,
    #[serde(with = "millis")]
    pub processor_tick_interval: Duration,
    #[serde(with = "millis")]
    pub default_call_timeout: Duration,
    #[serde(with = "millis")]
    pub bulk_call_timeout: Duration,
    /// Wake the processor on filesystem events instead of waiting for the tick.
    pub watch_requests: bool,
    /// Where downloaded media lands. Defaults to `<root>/media`.
    pub media_dir: Option<PathBuf>,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            lease_freshness: CoordinationConfig::LEASE_FRESHNESS,
            lease_renew_interval: CoordinationConfig::LEASE_RENEW_INTERVAL,
            response_poll_interval: MailboxConfig::RESPONSE_POLL_INTERVAL,
            processor_tick_interval: MailboxConfig::PROCESSOR_TICK_INTERVAL,
            default_call_timeout: MailboxConfig::DEFAULT_CALL_TIMEOUT,
            bulk_call_timeout: MailboxConfig::BULK_CALL_TIMEOUT,
            watch_requests: true,
            media_dir: None,
        }
    }
}

impl LinkConfig {
    /// Longest time any proxy may still be waiting on a response.
    pub fn max_call_timeout(&self) -> Duration {
        self.default_call_timeout.max(self.bulk_call_timeout)
    }
}

/// Default coordination root: `<data_local_dir>/sessionlink`.
pub fn default_root() -> Option<PathBuf> {
    if let Ok(root) = std::env::var(AppConfig::ROOT_ENV_VAR) {
        if !root.is_empty() {
            return Some(PathBuf::from(root));
        }
    }
    dirs::data_local_dir().map(|dir| dir.join(AppConfig::APP_NAME))
}

mod millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}
