//! Persistence error types.

use thiserror::Error;

/// Result type for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Errors raised by a workflow store backend.
#[derive(Debug, Error)]
pub enum StorageError {
    /// The backend could not be reached or the pool could not be opened.
    #[error("Failed to connect to {backend}: {message}")]
    Connection { backend: &'static str, message: String },

    /// Schema creation or upgrade failed.
    #[error("Schema migration failed: {0}")]
    Migration(String),

    /// A query failed after the connection was established.
    #[error("Query failed: {0}")]
    Query(String),

    /// A stored document could not be encoded or decoded.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The caller passed something the backend cannot store.
    #[error("Invalid input: {0}")]
    InvalidInput(String),
}

impl StorageError {
    pub(crate) fn query(err: sqlx::Error) -> Self {
        Self::Query(err.to_string())
    }

    pub(crate) fn migration(err: sqlx::Error) -> Self {
        Self::Migration(err.to_string())
    }

    /// Whether the error means the backend is unreachable.
    pub fn is_connection(&self) -> bool {
        matches!(self, Self::Connection { .. })
    }
}
