//! Error types for Strata Store
//!
//! Two layers:
//! - `StoreError` is what a backend reports at the adapter boundary
//! - `SyncError` is the engine taxonomy every composite operation surfaces
//!
//! The conversion between them is where platform failures are classified
//! into retryable and terminal kinds.

use crate::retry::{status_is_retryable, TransportErrorKind};

/// Engine-level error taxonomy
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SyncError {
    /// Retryable I/O failure (timeouts, 5xx/429-class statuses, dropped connections)
    #[error("transient i/o failure: {0}")]
    TransientIo(String),

    /// Entity absent from the tier that was asked
    #[error("{kind} {id} not found")]
    NotFound {
        /// Record kind
        kind: String,
        /// Entity identifier
        id: String,
    },

    /// Operation was cancelled before it completed
    #[error("operation cancelled")]
    Cancelled,

    /// Malformed data or a missing required field
    #[error("validation failed: {0}")]
    PermanentValidation(String),

    /// Anything not otherwise classified
    #[error("unknown failure: {0}")]
    Unknown(String),
}

/// Which composite verb surfaced an error; used by presentation layers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationKind {
    /// Retrieve or prefetch
    Retrieve,
    /// Save to any tier
    Save,
    /// Delete from any tier
    Delete,
}

impl SyncError {
    /// Create a not-found error for an entity
    #[inline]
    pub fn not_found(kind: impl Into<String>, id: impl std::fmt::Display) -> Self {
        Self::NotFound {
            kind: kind.into(),
            id: id.to_string(),
        }
    }

    /// Check if error is retryable
    #[inline]
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::TransientIo(_) | Self::Unknown(_))
    }

    /// Check if error is a cancellation
    #[inline]
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }

    /// Check if error is a not-found
    #[inline]
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    /// Whether the error should stay silent for the given operation.
    ///
    /// Cancellation is never surfaced. A missing entity is silent for
    /// deletes, where absence is the goal.
    #[must_use]
    pub fn is_silent_for(&self, op: OperationKind) -> bool {
        match self {
            Self::Cancelled => true,
            Self::NotFound { .. } => op == OperationKind::Delete,
            _ => false,
        }
    }
}

/// Errors reported by store backends
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    /// Remote answered with a non-success HTTP status
    #[error("http status {status}: {message}")]
    Http {
        /// Status code
        status: u16,
        /// Server-provided message
        message: String,
    },

    /// Transport-layer failure before a status was received
    #[error("transport failure: {0:?}")]
    Transport(TransportErrorKind),

    /// Local disk failure
    #[error("local i/o: {0}")]
    Io(String),

    /// Key absent from the backend
    #[error("not found")]
    NotFound,

    /// Remote already holds an object under this key
    #[error("conflict: object already exists")]
    Conflict,

    /// In-flight request was cancelled
    #[error("request cancelled")]
    Cancelled,

    /// Payload could not be encoded or decoded
    #[error("invalid payload: {0}")]
    Invalid(String),

    /// Unclassified backend failure
    #[error("{0}")]
    Other(String),
}

impl StoreError {
    /// Check if the backend failure is worth another attempt
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Http { status, .. } => status_is_retryable(*status),
            Self::Transport(kind) => kind.is_retryable(),
            Self::Io(_) | Self::Other(_) => true,
            Self::NotFound | Self::Conflict | Self::Cancelled | Self::Invalid(_) => false,
        }
    }

    /// Attach entity context while converting into the engine taxonomy
    #[must_use]
    pub fn into_sync(self, kind: &str, id: impl std::fmt::Display) -> SyncError {
        match self {
            Self::NotFound | Self::Http { status: 404, .. } => SyncError::not_found(kind, id),
            other => other.into(),
        }
    }
}

impl From<StoreError> for SyncError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Cancelled | StoreError::Transport(TransportErrorKind::Cancelled) => {
                SyncError::Cancelled
            }
            StoreError::NotFound | StoreError::Http { status: 404, .. } => SyncError::NotFound {
                kind: "object".to_string(),
                id: String::new(),
            },
            StoreError::Invalid(msg) => SyncError::PermanentValidation(msg),
            StoreError::Other(msg) => SyncError::Unknown(msg),
            other if other.is_retryable() => SyncError::TransientIo(other.to_string()),
            other => SyncError::PermanentValidation(other.to_string()),
        }
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(err: serde_json::Error) -> Self {
        StoreError::Invalid(err.to_string())
    }
}

impl From<std::io::Error> for StoreError {
    fn from(err: std::io::Error) -> Self {
        if err.kind() == std::io::ErrorKind::NotFound {
            StoreError::NotFound
        } else {
            StoreError::Io(err.to_string())
        }
    }
}
