//! The session: a unit-of-work scoped staging area over the document store.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use common::{SagaId, Version};
use document_store::{DocumentStore, WriteBatch};

use crate::entity::SagaEntity;
use crate::error::{PersistenceError, Result};
use crate::naming::NamingConvention;

/// The capabilities the saga persister needs from the store.
///
/// Only [`Session::flush`] (and a `load` that misses the session's own
/// state) touches the store; staging operations are in-memory and never
/// block.
#[async_trait]
pub trait Session: Send {
    /// Loads a saga by id, returning the session's staged view if it already
    /// tracks the document. A saga staged for deletion reads as absent.
    async fn load<T: SagaEntity>(&mut self, id: SagaId) -> Result<Option<T>>;

    /// Stages a new saga for insertion.
    fn stage_insert<T: SagaEntity>(&mut self, entity: &T) -> Result<()>;

    /// Stages new state for a saga this session already tracks.
    fn stage_update<T: SagaEntity>(&mut self, entity: &T) -> Result<()>;

    /// Stages removal of a saga this session already tracks.
    fn stage_delete<T: SagaEntity>(&mut self, entity: &T) -> Result<()>;

    /// Commits every staged operation as one atomic batch.
    async fn flush(&mut self) -> Result<()>;

    /// Drops all tracked state. Idempotent.
    fn dispose(&mut self);

    /// Returns true once [`Session::dispose`] has been called.
    fn is_disposed(&self) -> bool;

    /// Number of operations that the next flush would commit.
    fn pending_operations(&self) -> usize;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum EntryState {
    Clean,
    Inserted,
    Updated,
    Deleted,
}

#[derive(Debug, Clone)]
struct TrackedDocument {
    body: serde_json::Value,
    /// Version loaded from the store; `Version::initial()` for staged inserts.
    version: Version,
    state: EntryState,
}

type DocumentKey = (String, SagaId);

/// A [`Session`] backed by a [`DocumentStore`].
///
/// Keeps an identity map of every document loaded or staged, keyed by
/// collection and id, together with the version token each was loaded at.
/// Flushing turns staged entries into a [`WriteBatch`] in staging order.
pub struct DocumentSession<S: DocumentStore> {
    store: S,
    naming: Arc<NamingConvention>,
    tracked: HashMap<DocumentKey, TrackedDocument>,
    staged: Vec<DocumentKey>,
    disposed: bool,
}

impl<S: DocumentStore> DocumentSession<S> {
    /// Opens a session over `store`.
    pub fn new(store: S, naming: Arc<NamingConvention>) -> Self {
        Self {
            store,
            naming,
            tracked: HashMap::new(),
            staged: Vec::new(),
            disposed: false,
        }
    }

    /// Number of documents in the identity map.
    pub fn tracked_count(&self) -> usize {
        self.tracked.len()
    }

    fn ensure_open(&self) -> Result<()> {
        if self.disposed {
            return Err(PersistenceError::Usage(
                "session has already been released".to_string(),
            ));
        }
        Ok(())
    }

    fn key_for<T: SagaEntity>(&self, entity: &T) -> Result<DocumentKey> {
        let id = entity.id();
        if id.as_uuid().is_nil() {
            return Err(PersistenceError::Usage(format!(
                "saga of type `{}` has no id set",
                T::type_name()
            )));
        }
        Ok((self.naming.resolve::<T>()?, id))
    }

    fn unstage(&mut self, key: &DocumentKey) {
        self.staged.retain(|k| k != key);
    }

    fn build_batch(&self) -> WriteBatch {
        let mut batch = WriteBatch::new();
        for key in &self.staged {
            let Some(entry) = self.tracked.get(key) else {
                continue;
            };
            let (collection, id) = (key.0.clone(), key.1);
            match entry.state {
                EntryState::Inserted => batch.insert(collection, id, entry.body.clone()),
                EntryState::Updated => {
                    batch.update(collection, id, entry.version, entry.body.clone())
                }
                EntryState::Deleted => batch.delete(collection, id, entry.version),
                EntryState::Clean => {}
            }
        }
        batch
    }
}

#[async_trait]
impl<S: DocumentStore> Session for DocumentSession<S> {
    async fn load<T: SagaEntity>(&mut self, id: SagaId) -> Result<Option<T>> {
        self.ensure_open()?;
        let key = (self.naming.resolve::<T>()?, id);

        if let Some(entry) = self.tracked.get(&key) {
            if entry.state == EntryState::Deleted {
                return Ok(None);
            }
            return Ok(Some(serde_json::from_value(entry.body.clone())?));
        }

        let Some(doc) = self.store.load(&key.0, id).await? else {
            return Ok(None);
        };

        let entity: T = serde_json::from_value(doc.body.clone())?;
        tracing::debug!(collection = %key.0, %id, version = %doc.version, "saga loaded");
        self.tracked.insert(
            key,
            TrackedDocument {
                body: doc.body,
                version: doc.version,
                state: EntryState::Clean,
            },
        );
        Ok(Some(entity))
    }

    fn stage_insert<T: SagaEntity>(&mut self, entity: &T) -> Result<()> {
        self.ensure_open()?;
        let key = self.key_for(entity)?;

        if let Some(entry) = self.tracked.get(&key) {
            return Err(match entry.state {
                // Loaded from the store, so it is still active there
                EntryState::Clean | EntryState::Updated => PersistenceError::DuplicateSaga {
                    collection: key.0,
                    id: key.1,
                },
                EntryState::Inserted => PersistenceError::Usage(format!(
                    "saga {}/{} is already staged for insertion in this session",
                    key.0, key.1
                )),
                EntryState::Deleted => PersistenceError::Usage(format!(
                    "saga {}/{} was completed in this session and cannot be saved again before commit",
                    key.0, key.1
                )),
            });
        }

        let body = serde_json::to_value(entity)?;
        tracing::debug!(collection = %key.0, id = %key.1, "insert staged");
        self.tracked.insert(
            key.clone(),
            TrackedDocument {
                body,
                version: Version::initial(),
                state: EntryState::Inserted,
            },
        );
        self.staged.push(key);
        Ok(())
    }

    fn stage_update<T: SagaEntity>(&mut self, entity: &T) -> Result<()> {
        self.ensure_open()?;
        let key = self.key_for(entity)?;
        let body = serde_json::to_value(entity)?;

        let Some(entry) = self.tracked.get_mut(&key) else {
            return Err(PersistenceError::Usage(format!(
                "cannot update saga {}/{}: it was not loaded or saved in this session",
                key.0, key.1
            )));
        };

        match entry.state {
            EntryState::Deleted => {
                return Err(PersistenceError::Usage(format!(
                    "cannot update saga {}/{}: it has been completed",
                    key.0, key.1
                )));
            }
            EntryState::Clean => {
                entry.state = EntryState::Updated;
                entry.body = body;
                self.staged.push(key.clone());
            }
            EntryState::Inserted | EntryState::Updated => entry.body = body,
        }

        tracing::debug!(collection = %key.0, id = %key.1, "update staged");
        Ok(())
    }

    fn stage_delete<T: SagaEntity>(&mut self, entity: &T) -> Result<()> {
        self.ensure_open()?;
        let key = self.key_for(entity)?;

        let Some(entry) = self.tracked.get_mut(&key) else {
            return Err(PersistenceError::Usage(format!(
                "cannot complete saga {}/{}: it was not loaded or saved in this session",
                key.0, key.1
            )));
        };

        let state = entry.state;
        match state {
            EntryState::Deleted => {
                return Err(PersistenceError::Usage(format!(
                    "saga {}/{} has already been completed",
                    key.0, key.1
                )));
            }
            EntryState::Inserted => {
                // Never reached the store, so there is nothing to delete
                self.tracked.remove(&key);
                self.unstage(&key);
            }
            EntryState::Clean => {
                entry.state = EntryState::Deleted;
                self.staged.push(key.clone());
            }
            EntryState::Updated => entry.state = EntryState::Deleted,
        }

        tracing::debug!(collection = %key.0, id = %key.1, "delete staged");
        Ok(())
    }

    async fn flush(&mut self) -> Result<()> {
        self.ensure_open()?;

        let batch = self.build_batch();
        if batch.is_empty() {
            tracing::debug!("nothing staged, skipping flush");
            return Ok(());
        }

        let ops = batch.len();
        let started = Instant::now();
        metrics::counter!("saga_session_flush_total").increment(1);

        let receipt = match self.store.commit(batch).await {
            Ok(receipt) => receipt,
            Err(e) => {
                let err = PersistenceError::from(e);
                metrics::counter!("saga_session_flush_failures_total", "kind" => err.kind())
                    .increment(1);
                tracing::warn!(ops, error = %err, "session flush failed");
                return Err(err);
            }
        };

        for key in std::mem::take(&mut self.staged) {
            match receipt.version_of(&key.0, key.1) {
                Some(version) => {
                    if let Some(entry) = self.tracked.get_mut(&key) {
                        entry.version = version;
                        entry.state = EntryState::Clean;
                    }
                }
                None => {
                    self.tracked.remove(&key);
                }
            }
        }

        metrics::histogram!("saga_session_flush_duration_seconds")
            .record(started.elapsed().as_secs_f64());
        tracing::info!(ops, "session flushed");
        Ok(())
    }

    fn dispose(&mut self) {
        if self.disposed {
            return;
        }
        if !self.staged.is_empty() {
            tracing::debug!(
                discarded = self.staged.len(),
                "session released with uncommitted operations"
            );
        }
        self.tracked.clear();
        self.staged.clear();
        self.disposed = true;
    }

    fn is_disposed(&self) -> bool {
        self.disposed
    }

    fn pending_operations(&self) -> usize {
        self.staged.len()
    }
}
