//! Error types for libSQL storage.

use tally_core::TallyError;
use thiserror::Error;

/// Result type for storage operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur during storage operations.
#[derive(Debug, Error)]
pub enum Error {
    /// Database error from libSQL.
    #[error("database error: {0}")]
    Database(#[from] libsql::Error),

    /// JSON serialization/deserialization error.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Invalid data in the database, or a value the schema cannot hold.
    #[error("invalid data: {0}")]
    InvalidData(String),
}

impl From<Error> for TallyError {
    fn from(err: Error) -> Self {
        match err {
            Error::Database(e) => TallyError::StorageUnavailable(e.to_string()),
            Error::Serialization(e) => TallyError::Serialization(e.to_string()),
            Error::InvalidData(msg) => TallyError::Serialization(msg),
        }
    }
}
