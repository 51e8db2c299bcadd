//! Error types for tally-core

use thiserror::Error;

/// Error type for tabulation passes and their collaborators
#[derive(Debug, Error)]
pub enum TallyError {
    /// Backing store for events, checkpoints, subjects or the classifier could not be reached
    #[error("Storage unavailable: {0}")]
    StorageUnavailable(String),

    /// Checkpoint commit lost a race or the store rejected the write
    #[error("Checkpoint conflict: {0}")]
    Conflict(String),

    /// Subject is missing or lacks fields a formula requires
    #[error("Malformed subject: {0}")]
    MalformedSubject(String),

    /// A formula produced a value that cannot be stored
    #[error("Invalid metric: {0}")]
    InvalidMetric(String),

    /// Configuration is inconsistent or incomplete
    #[error("Configuration error: {0}")]
    Config(String),

    /// Serialization or deserialization failed
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// IO operation failed
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl TallyError {
    /// Whether the owning scheduler may retry the whole pass later.
    ///
    /// Neither storage kind leaves partial state behind, so a retry re-derives the same
    /// delta range.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::StorageUnavailable(_) | Self::Conflict(_))
    }
}

/// Result type alias for tally operations
pub type Result<T> = std::result::Result<T, TallyError>;
