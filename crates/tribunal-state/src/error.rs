//! Error types for tribunal-state

use thiserror::Error;

/// Errors raised while connecting to or preparing a storage backend.
#[derive(Error, Debug)]
pub enum StateError {
    /// Database connection error
    #[error("Database connection failed: {0}")]
    Connection(String),

    /// Database query error
    #[error("Database query failed: {0}")]
    Query(String),

    /// Schema setup error
    #[error("Schema setup failed: {0}")]
    SchemaSetup(String),
}

impl From<surrealdb::Error> for StateError {
    fn from(err: surrealdb::Error) -> Self {
        StateError::Query(err.to_string())
    }
}

/// Errors returned by [`crate::AnalysisStore`] operations.
#[derive(Error, Debug)]
pub enum StorageError {
    /// No run exists with the given ID.
    #[error("run not found: {run_id}")]
    RunNotFound { run_id: String },

    /// A digest string was not 64 lowercase hex characters.
    #[error("invalid content digest: {digest}")]
    InvalidDigest { digest: String },

    /// A record could not be encoded or decoded.
    #[error("serialization failed: {0}")]
    Serialization(String),

    /// The backend rejected the operation.
    #[error("storage backend error: {0}")]
    Backend(String),
}

impl From<serde_json::Error> for StorageError {
    fn from(err: serde_json::Error) -> Self {
        StorageError::Serialization(err.to_string())
    }
}

impl From<surrealdb::Error> for StorageError {
    fn from(err: surrealdb::Error) -> Self {
        StorageError::Backend(err.to_string())
    }
}
