//! Persistence error types.

use common::{SagaId, Version};
use document_store::StoreError;
use thiserror::Error;

/// Errors surfaced by the saga persistence layer.
///
/// Absence of a saga is not an error at this layer: `get` returns `None`.
/// [`PersistenceError::SagaNotFound`] exists for callers that need to turn
/// that absence into a domain failure.
#[derive(Debug, Error)]
pub enum PersistenceError {
    /// The caller broke a session precondition, e.g. updating an entity the
    /// session never tracked. Indicates a bug in calling code.
    #[error("Session usage error: {0}")]
    Usage(String),

    /// A saved saga collided with an existing instance at flush time.
    #[error("Saga {collection}/{id} already exists")]
    DuplicateSaga { collection: String, id: SagaId },

    /// Another unit of work committed a change to a saga this session had
    /// loaded. The whole unit of work may be retried.
    #[error(
        "Concurrency conflict on saga {collection}/{id}: loaded version {expected}, store has {}",
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
    StoreUnavailable(String),

    /// Invalid configuration, including unresolvable or colliding
    /// storage locations.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// A saga the caller expected to exist was not found.
    #[error("Saga not found: {0}")]
    SagaNotFound(SagaId),

    /// A saga could not be converted to or from its stored document.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl PersistenceError {
    /// Returns true if restarting the unit of work from scratch may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            PersistenceError::ConcurrencyConflict { .. } | PersistenceError::StoreUnavailable(_)
        )
    }

    /// Short name used as a metrics label.
    pub fn kind(&self) -> &'static str {
        match self {
            PersistenceError::Usage(_) => "usage",
            PersistenceError::DuplicateSaga { .. } => "duplicate_saga",
            PersistenceError::ConcurrencyConflict { .. } => "concurrency_conflict",
            PersistenceError::StoreUnavailable(_) => "store_unavailable",
            PersistenceError::Configuration(_) => "configuration",
            PersistenceError::SagaNotFound(_) => "saga_not_found",
            PersistenceError::Serialization(_) => "serialization",
        }
    }
}

impl From<StoreError> for PersistenceError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::DuplicateDocument { collection, id } => {
                PersistenceError::DuplicateSaga { collection, id }
            }
            StoreError::ConcurrencyConflict {
                collection,
                id,
                expected,
                actual,
            } => PersistenceError::ConcurrencyConflict {
                collection,
                id,
                expected,
                actual,
            },
            StoreError::Unavailable(msg) => PersistenceError::StoreUnavailable(msg),
            StoreError::Database(e) => PersistenceError::StoreUnavailable(e.to_string()),
            StoreError::Migration(e) => PersistenceError::StoreUnavailable(e.to_string()),
            StoreError::InvalidBatch(msg) => PersistenceError::Usage(msg),
            StoreError::Serialization(e) => PersistenceError::Serialization(e),
        }
    }
}

/// Convenience type alias for persistence results.
pub type Result<T> = std::result::Result<T, PersistenceError>;
