use thiserror::Error;

use crate::{SagaId, Version};

/// Errors that can occur when interacting with the document store.
#[derive(Debug, Error)]
pub enum StoreError {
    /// An insert collided with a document that already exists.
    #[error("Document {collection}/{id} already exists")]
    DuplicateDocument { collection: String, id: SagaId },

    /// An update or delete presented a version that no longer matches the
    /// stored document. `actual` is `None` when the document is gone.
    #[error(
        "Concurrency conflict for document {collection}/{id}: expected version {expected}, found {}",
        actual.map_or_else(|| "none".to_string(), |v| v.to_string())
    )]
    ConcurrencyConflict {
        collection: String,
        id: SagaId,
        expected: Version,
        actual: Option<Version>,
    },

    /// The store could not be reached.
    #[error("Store unavailable: {0}")]
    Unavailable(String),

    /// The write batch was rejected before touching storage.
    #[error("Invalid write batch: {0}")]
    InvalidBatch(String),

    /// A database error occurred.
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// A database migration error occurred.
    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    /// A serialization/deserialization error occurred.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Result type for document store operations.
pub type Result<T> = std::result::Result<T, StoreError>;
