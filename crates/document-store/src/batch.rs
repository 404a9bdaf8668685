//! Write batches submitted to [`DocumentStore::commit`](crate::DocumentStore::commit).

use std::collections::HashSet;

use crate::{Result, SagaId, StoreError, Version};

/// A single staged write.
#[derive(Debug, Clone)]
pub enum WriteOp {
    /// Create a new document. Fails if `(collection, id)` already exists.
    Insert {
        collection: String,
        id: SagaId,
        body: serde_json::Value,
    },
    /// Replace a document's body, provided it is still at `expected`.
    Update {
        collection: String,
        id: SagaId,
        expected: Version,
        body: serde_json::Value,
    },
    /// Remove a document, provided it is still at `expected`.
    Delete {
        collection: String,
        id: SagaId,
        expected: Version,
    },
}

impl WriteOp {
    /// The collection this op targets.
    pub fn collection(&self) -> &str {
        match self {
            WriteOp::Insert { collection, .. }
            | WriteOp::Update { collection, .. }
            | WriteOp::Delete { collection, .. } => collection,
        }
    }

    /// The document id this op targets.
    pub fn id(&self) -> SagaId {
        match self {
            WriteOp::Insert { id, .. } | WriteOp::Update { id, .. } | WriteOp::Delete { id, .. } => {
                *id
            }
        }
    }

    /// Short name used in logs and metrics labels.
    pub fn kind(&self) -> &'static str {
        match self {
            WriteOp::Insert { .. } => "insert",
            WriteOp::Update { .. } => "update",
            WriteOp::Delete { .. } => "delete",
        }
    }

    /// The version the document has after this op applies, if it survives.
    pub fn resulting_version(&self) -> Option<Version> {
        match self {
            WriteOp::Insert { .. } => Some(Version::first()),
            WriteOp::Update { expected, .. } => Some(expected.next()),
            WriteOp::Delete { .. } => None,
        }
    }
}

/// An ordered set of writes committed as one atomic unit.
#[derive(Debug, Clone, Default)]
pub struct WriteBatch {
    ops: Vec<WriteOp>,
}

impl WriteBatch {
    /// Creates an empty batch.
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends an insert.
    pub fn insert(&mut self, collection: impl Into<String>, id: SagaId, body: serde_json::Value) {
        self.ops.push(WriteOp::Insert {
            collection: collection.into(),
            id,
            body,
        });
    }

    /// Appends an update guarded by `expected`.
    pub fn update(
        &mut self,
        collection: impl Into<String>,
        id: SagaId,
        expected: Version,
        body: serde_json::Value,
    ) {
        self.ops.push(WriteOp::Update {
            collection: collection.into(),
            id,
            expected,
            body,
        });
    }

    /// Appends a delete guarded by `expected`.
    pub fn delete(&mut self, collection: impl Into<String>, id: SagaId, expected: Version) {
        self.ops.push(WriteOp::Delete {
            collection: collection.into(),
            id,
            expected,
        });
    }

    /// The staged ops in program order.
    pub fn ops(&self) -> &[WriteOp] {
        &self.ops
    }

    /// Number of staged ops.
    pub fn len(&self) -> usize {
        self.ops.len()
    }

    /// Returns true if nothing is staged.
    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    /// Consumes the batch, returning its ops.
    pub fn into_ops(self) -> Vec<WriteOp> {
        self.ops
    }
}

/// Outcome of a successful commit: the resulting version of every op, in
/// batch order. Deleted documents report `None`.
#[derive(Debug, Clone, Default)]
pub struct CommitReceipt {
    pub versions: Vec<(String, SagaId, Option<Version>)>,
}

impl CommitReceipt {
    /// Builds the receipt a successful commit of `batch` produces.
    pub fn for_batch(batch: &WriteBatch) -> Self {
        Self {
            versions: batch
                .ops()
                .iter()
                .map(|op| (op.collection().to_string(), op.id(), op.resulting_version()))
                .collect(),
        }
    }

    /// Looks up the resulting version of one document.
    pub fn version_of(&self, collection: &str, id: SagaId) -> Option<Version> {
        self.versions
            .iter()
            .find(|(c, i, _)| c == collection && *i == id)
            .and_then(|(_, _, v)| *v)
    }
}

/// Validates a batch before it is committed.
///
/// A batch must not be empty and must touch each document at most once.
pub fn validate_batch(batch: &WriteBatch) -> Result<()> {
    if batch.is_empty() {
        return Err(StoreError::InvalidBatch(
            "Cannot commit an empty batch".to_string(),
        ));
    }

    let mut seen = HashSet::with_capacity(batch.len());
    for op in batch.ops() {
        if !seen.insert((op.collection(), op.id())) {
            return Err(StoreError::InvalidBatch(format!(
                "Document {}/{} appears more than once in the batch",
                op.collection(),
                op.id()
            )));
        }
        if op.collection().is_empty() {
            return Err(StoreError::InvalidBatch(
                "Collection name must not be empty".to_string(),
            ));
        }
    }

    Ok(())
}
