use std::path::PathBuf;

use thiserror::Error;

/// Errors raised by document stores and fixture reconciliation.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Required fixture for collection '{collection}' not found at {path}")]
    MissingFixture { collection: String, path: PathBuf },

    #[error("Invalid fixture {path}: {reason}")]
    InvalidFixture { path: PathBuf, reason: String },

    #[error("Invalid document for collection '{collection}': {reason}")]
    InvalidDocument { collection: String, reason: String },

    #[error("Store lock poisoned")]
    Lock,
}

impl StoreError {
    pub fn invalid_document(collection: &str, reason: impl Into<String>) -> Self {
        StoreError::InvalidDocument {
            collection: collection.to_string(),
            reason: reason.into(),
        }
    }
}
