use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::{
    CommitReceipt, Document, Result, SagaId, StoreError, WriteBatch, WriteOp, batch::validate_batch,
    store::DocumentStore,
};

type DocumentKey = (String, SagaId);

/// In-memory document store for testing and local runs.
///
/// Clones share the same underlying documents, so several units of work can
/// run against one store the way they would against a shared database.
#[derive(Clone, Default)]
pub struct InMemoryDocumentStore {
    documents: Arc<RwLock<HashMap<DocumentKey, Document>>>,
    unavailable: Arc<AtomicBool>,
}

impl InMemoryDocumentStore {
    /// Creates a new empty in-memory document store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Simulates an outage: while set, every operation fails with
    /// `StoreError::Unavailable`.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Returns the total number of documents stored across collections.
    pub async fn document_count(&self) -> usize {
        self.documents.read().await.len()
    }

    /// Removes every document.
    pub async fn clear(&self) {
        self.documents.write().await.clear();
    }

    fn ensure_available(&self) -> Result<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable(
                "in-memory store is marked unavailable".to_string(),
            ));
        }
        Ok(())
    }

    fn check_op(documents: &HashMap<DocumentKey, Document>, op: &WriteOp) -> Result<()> {
        let key = (op.collection().to_string(), op.id());
        let current = documents.get(&key).map(|doc| doc.version);

        match op {
            WriteOp::Insert { collection, id, .. } => {
                if current.is_some() {
                    return Err(StoreError::DuplicateDocument {
                        collection: collection.clone(),
                        id: *id,
                    });
                }
            }
            WriteOp::Update {
                collection,
                id,
                expected,
                ..
            }
            | WriteOp::Delete {
                collection,
                id,
                expected,
            } => {
                if current != Some(*expected) {
                    return Err(StoreError::ConcurrencyConflict {
                        collection: collection.clone(),
                        id: *id,
                        expected: *expected,
                        actual: current,
                    });
                }
            }
        }

        Ok(())
    }
}

#[async_trait]
impl DocumentStore for InMemoryDocumentStore {
    async fn load(&self, collection: &str, id: SagaId) -> Result<Option<Document>> {
        self.ensure_available()?;
        let documents = self.documents.read().await;
        Ok(documents.get(&(collection.to_string(), id)).cloned())
    }

    async fn commit(&self, batch: WriteBatch) -> Result<CommitReceipt> {
        validate_batch(&batch)?;
        self.ensure_available()?;

        let mut documents = self.documents.write().await;

        // Check every op before applying any, so a failure leaves no trace
        for op in batch.ops() {
            Self::check_op(&documents, op)?;
        }

        let receipt = CommitReceipt::for_batch(&batch);
        for op in batch.into_ops() {
            match op {
                WriteOp::Insert {
                    collection,
                    id,
                    body,
                } => {
                    let doc = Document::new(collection.clone(), id, body);
                    documents.insert((collection, id), doc);
                }
                WriteOp::Update {
                    collection,
                    id,
                    body,
                    ..
                } => {
                    if let Entry::Occupied(mut entry) = documents.entry((collection, id)) {
                        entry.get_mut().revise(body);
                    }
                }
                WriteOp::Delete { collection, id, .. } => {
                    documents.remove(&(collection, id));
                }
            }
        }

        tracing::debug!(ops = receipt.versions.len(), "in-memory batch committed");
        Ok(receipt)
    }

    async fn count(&self, collection: &str) -> Result<usize> {
        self.ensure_available()?;
        let documents = self.documents.read().await;
        Ok(documents
            .keys()
            .filter(|(c, _)| c.as_str() == collection)
            .count())
    }
}
