//! The saga persister: the contract saga-handling code programs against.

use std::sync::Arc;

use async_trait::async_trait;
use common::SagaId;
use document_store::DocumentStore;

use crate::entity::SagaEntity;
use crate::error::{PersistenceError, Result};
use crate::factory::SessionFactory;
use crate::session::Session;

/// Save / get / update / complete over saga entities.
///
/// Every operation runs against the current unit of work's session; nothing
/// is durable until the unit of work commits.
#[async_trait]
pub trait SagaPersister: Send + Sync {
    /// Stages a new saga instance. A duplicate id surfaces as
    /// `DuplicateSaga` when the unit of work commits.
    async fn save<T: SagaEntity>(&self, saga: &T) -> Result<()>;

    /// Loads a saga instance, or `None` if it does not exist (or was
    /// completed).
    async fn get<T: SagaEntity>(&self, id: SagaId) -> Result<Option<T>>;

    /// Stages new state for a saga obtained from `get` or `save` in this
    /// unit of work. Untracked sagas fail with `Usage`.
    async fn update<T: SagaEntity>(&self, saga: &T) -> Result<()>;

    /// Stages removal of a saga. Completion is terminal: once committed the
    /// id no longer resolves through `get`.
    async fn complete<T: SagaEntity>(&self, saga: &T) -> Result<()>;
}

/// [`SagaPersister`] over a document store session factory.
pub struct DocumentSagaPersister<S: DocumentStore> {
    factory: Arc<SessionFactory<S>>,
}

impl<S: DocumentStore> Clone for DocumentSagaPersister<S> {
    fn clone(&self) -> Self {
        Self {
            factory: Arc::clone(&self.factory),
        }
    }
}

impl<S> DocumentSagaPersister<S>
where
    S: DocumentStore + Clone + 'static,
{
    /// Creates a persister bound to a unit of work's session factory.
    pub fn new(factory: Arc<SessionFactory<S>>) -> Self {
        Self { factory }
    }

    /// The session factory this persister operates through.
    pub fn session_factory(&self) -> &Arc<SessionFactory<S>> {
        &self.factory
    }
}

#[async_trait]
impl<S> SagaPersister for DocumentSagaPersister<S>
where
    S: DocumentStore + Clone + 'static,
{
    #[tracing::instrument(skip(self, saga), fields(saga_id = %saga.id(), saga_type = T::type_name()))]
    async fn save<T: SagaEntity>(&self, saga: &T) -> Result<()> {
        metrics::counter!("saga_persister_operations_total", "operation" => "save").increment(1);
        self.factory.current_session().await.stage_insert(saga)
    }

    #[tracing::instrument(skip(self), fields(saga_type = T::type_name()))]
    async fn get<T: SagaEntity>(&self, id: SagaId) -> Result<Option<T>> {
        metrics::counter!("saga_persister_operations_total", "operation" => "get").increment(1);
        let saga = self.factory.current_session().await.load::<T>(id).await?;
        if saga.is_none() {
            tracing::debug!(%id, "saga not found");
        }
        Ok(saga)
    }

    #[tracing::instrument(skip(self, saga), fields(saga_id = %saga.id(), saga_type = T::type_name()))]
    async fn update<T: SagaEntity>(&self, saga: &T) -> Result<()> {
        metrics::counter!("saga_persister_operations_total", "operation" => "update").increment(1);
        self.factory.current_session().await.stage_update(saga)
    }

    #[tracing::instrument(skip(self, saga), fields(saga_id = %saga.id(), saga_type = T::type_name()))]
    async fn complete<T: SagaEntity>(&self, saga: &T) -> Result<()> {
        metrics::counter!("saga_persister_operations_total", "operation" => "complete")
            .increment(1);
        self.factory.current_session().await.stage_delete(saga)
    }
}

/// Loads saga `id`, applies `mutate` and stages the update.
///
/// A missing saga is reported as `SagaNotFound`; `update` is never called on
/// an absent result.
pub async fn update_saga<T, P, F>(persister: &P, id: SagaId, mutate: F) -> Result<T>
where
    T: SagaEntity,
    P: SagaPersister,
    F: FnOnce(&mut T),
{
    let mut saga = persister
        .get::<T>(id)
        .await?
        .ok_or(PersistenceError::SagaNotFound(id))?;
    mutate(&mut saga);
    persister.update(&saga).await?;
    Ok(saga)
}

/// Loads saga `id` and stages its completion.
///
/// A missing saga is reported as `SagaNotFound`.
pub async fn complete_saga<T, P>(persister: &P, id: SagaId) -> Result<T>
where
    T: SagaEntity,
    P: SagaPersister,
{
    let saga = persister
        .get::<T>(id)
        .await?
        .ok_or(PersistenceError::SagaNotFound(id))?;
    persister.complete(&saga).await?;
    Ok(saga)
}
