//! API implementation submodules.
//!
//! Each submodule contains `impl SessionLink` blocks or types that extend the
//! public API. The struct definition remains in `lib.rs`.

mod builder;
mod operations;
mod state;

pub use builder::SessionLinkBuilder;
pub use operations::MessageQuery;
pub(crate) use state::PrimaryState;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Which side of the bridge an instance is on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Primary,
    Proxy,
    /// After [`shutdown`](crate::SessionLink::shutdown).
    Stopped,
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Role::Primary => "primary",
            Role::Proxy => "proxy",
            Role::Stopped => "stopped",
        })
    }
}

/// Snapshot returned by [`SessionLink::status`](crate::SessionLink::status).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LinkStatus {
    pub role: Role,
    pub instance_id: String,
    /// Instance currently holding a fresh lease, if any.
    pub owner_instance_id: Option<String>,
    pub is_ready: bool,
    /// When readiness was last published.
    pub state_updated_at: Option<DateTime<Utc>>,
}
