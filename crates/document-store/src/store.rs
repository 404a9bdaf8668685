use async_trait::async_trait;

use crate::{CommitReceipt, Document, Result, SagaId, WriteBatch};

/// Core trait for document store implementations.
///
/// A document store keeps one versioned JSON document per `(collection, id)`.
/// All implementations must be thread-safe (Send + Sync); the store is the
/// only state shared between concurrent units of work.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Loads a document.
    ///
    /// Returns None if no document exists at `(collection, id)`.
    async fn load(&self, collection: &str, id: SagaId) -> Result<Option<Document>>;

    /// Commits a batch of writes.
    ///
    /// The batch is applied atomically - either every op succeeds or none
    /// do. Inserts fail with `DuplicateDocument` if the document exists;
    /// updates and deletes fail with `ConcurrencyConflict` if the stored
    /// version differs from the expected one.
    async fn commit(&self, batch: WriteBatch) -> Result<CommitReceipt>;

    /// Counts the documents currently stored in a collection.
    async fn count(&self, collection: &str) -> Result<usize>;
}

/// Extension trait providing convenience methods for document stores.
#[async_trait]
pub trait DocumentStoreExt: DocumentStore {
    /// Checks if a document exists.
    async fn exists(&self, collection: &str, id: SagaId) -> Result<bool> {
        Ok(self.load(collection, id).await?.is_some())
    }
}

// Blanket implementation for all DocumentStore implementations
impl<T: DocumentStore + ?Sized> DocumentStoreExt for T {}

#[async_trait]
impl<T: DocumentStore + ?Sized> DocumentStore for std::sync::Arc<T> {
    async fn load(&self, collection: &str, id: SagaId) -> Result<Option<Document>> {
        (**self).load(collection, id).await
    }

    async fn commit(&self, batch: WriteBatch) -> Result<CommitReceipt> {
        (**self).commit(batch).await
    }

    async fn count(&self, collection: &str) -> Result<usize> {
        (**self).count(collection).await
    }
}
