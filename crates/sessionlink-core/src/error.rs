//! Error types for SessionLink.
//!
//! A single error enum covers both sides of the bridge. Errors raised while
//! dispatching on the primary are flattened into Response Records and
//! rebuilt on the proxy side through [`LinkError::kind`] and
//! [`LinkError::from_remote`].

use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Main error type for SessionLink.
#[derive(Debug, Error)]
pub enum LinkError {
    // Bridge errors
    #[error(
        "No response to {operation} after {}s; the primary instance may not be running",
        .waited.as_secs_f64()
    )]
    Timeout { operation: String, waited: Duration },

    #[error("{message}")]
    Remote { message: String },

    #[error("{message}")]
    OrphanedOnRestart { message: String },

    #[error("Protocol error: {message}")]
    Protocol { message: String },

    // File system errors
    #[error("IO error at {path:?}: {message}")]
    Io {
        message: String,
        path: Option<PathBuf>,
        #[source]
        source: Option<std::io::Error>,
    },

    // Serialization errors
    #[error("JSON error: {message}")]
    Json {
        message: String,
        #[source]
        source: Option<serde_json::Error>,
    },

    // Dispatch errors
    #[error("Invalid params: {message}")]
    InvalidParams { message: String },

    #[error("Unknown operation: {0}")]
    UnknownOperation(String),

    #[error("Session error: {message}")]
    Session { message: String },

    // Configuration errors
    #[error("Configuration error: {message}")]
    Config { message: String },

    #[error("This operation is only available on the primary instance")]
    NotPrimary,

    // Generic errors
    #[error("{0}")]
    Other(String),
}

/// Result type alias for SessionLink operations.
pub type Result<T> = std::result::Result<T, LinkError>;

impl From<std::io::Error> for LinkError {
    fn from(err: std::io::Error) -> Self {
        LinkError::Io {
            message: err.to_string(),
            path: None,
            source: Some(err),
        }
    }
}

impl From<serde_json::Error> for LinkError {
    fn from(err: serde_json::Error) -> Self {
        LinkError::Json {
            message: err.to_string(),
            source: Some(err),
        }
    }
}

/// Machine-readable classification carried in a Response Record's `errorKind`.
pub mod kind {
    pub const DISPATCH: &str = "dispatch";
    pub const INVALID_PARAMS: &str = "invalidParams";
    pub const UNKNOWN_OPERATION: &str = "unknownOperation";
    pub const ORPHANED_ON_RESTART: &str = "orphanedOnRestart";
    pub const PROTOCOL: &str = "protocol";
}

impl LinkError {
    /// Create an IO error with path context.
    pub fn io_with_path(err: std::io::Error, path: impl Into<PathBuf>) -> Self {
        LinkError::Io {
            message: err.to_string(),
            path: Some(path.into()),
            source: Some(err),
        }
    }

    /// Classify this error for a Response Record.
    pub fn kind(&self) -> &'static str {
        match self {
            LinkError::InvalidParams { .. } => kind::INVALID_PARAMS,
            LinkError::UnknownOperation(_) => kind::UNKNOWN_OPERATION,
            LinkError::OrphanedOnRestart { .. } => kind::ORPHANED_ON_RESTART,
            LinkError::Protocol { .. } | LinkError::Json { .. } => kind::PROTOCOL,
            _ => kind::DISPATCH,
        }
    }

    /// Rebuild the proxy-side error for a Response Record's `error` field.
    ///
    /// The message is passed through verbatim so callers see exactly what the
    /// primary's dispatch reported.
    pub fn from_remote(message: String, error_kind: Option<&str>) -> Self {
        match error_kind {
            Some(kind::ORPHANED_ON_RESTART) => LinkError::OrphanedOnRestart { message },
            _ => LinkError::Remote { message },
        }
    }

    /// True when the failure means the primary could not be reached at all.
    pub fn is_unreachable(&self) -> bool {
        matches!(
            self,
            LinkError::Timeout { .. } | LinkError::OrphanedOnRestart { .. }
        )
    }
}
