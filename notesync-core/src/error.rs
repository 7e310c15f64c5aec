//! Error types for synchronization operations.

use thiserror::Error;

/// Result type for synchronization operations.
pub type SyncResult<T> = Result<T, SyncError>;

/// Errors that can occur while synchronizing a document.
///
/// Only [`SyncError::Persistence`] ever reaches a caller as the outcome of an
/// explicit action; the other variants are logged and absorbed so that local
/// editing is never interrupted.
#[derive(Debug, Error)]
pub enum SyncError {
    /// Element not found in scene.
    #[error("Element not found: {0}")]
    ElementNotFound(String),

    /// Scene serialization/deserialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A remote payload could not be decoded into local state.
    #[error("Malformed payload: {0}")]
    MalformedPayload(String),

    /// The transport is disconnected or gave up reconnecting.
    #[error("Connectivity lost: {0}")]
    Connectivity(String),

    /// The document store rejected a write.
    #[error("Persistence failed: {0}")]
    Persistence(String),
}

impl SyncError {
    /// Whether retrying the same action later may succeed.
    #[must_use]
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Self::Connectivity(_) | Self::Persistence(_))
    }
}
