//! Binds one session to one unit of work.

use std::sync::Arc;

use document_store::DocumentStore;
use tokio::sync::{MappedMutexGuard, Mutex, MutexGuard};

use crate::error::Result;
use crate::naming::NamingConvention;
use crate::session::{DocumentSession, Session};

/// Owns the session of a single unit of work.
///
/// Create one factory per unit of work; its slot is that unit of work's
/// "current session". The session is opened lazily on first use, flushed
/// by [`SessionFactory::commit`] and disposed by [`SessionFactory::release`].
pub struct SessionFactory<S: DocumentStore> {
    store: S,
    naming: Arc<NamingConvention>,
    slot: Mutex<Option<DocumentSession<S>>>,
}

impl<S> SessionFactory<S>
where
    S: DocumentStore + Clone + 'static,
{
    /// Creates a factory with no session bound yet.
    pub fn new(store: S, naming: Arc<NamingConvention>) -> Self {
        Self {
            store,
            naming,
            slot: Mutex::new(None),
        }
    }

    /// Returns the session of this unit of work, opening it on first use.
    pub async fn current_session(&self) -> MappedMutexGuard<'_, DocumentSession<S>> {
        let slot = self.slot.lock().await;
        MutexGuard::map(slot, |slot| {
            slot.get_or_insert_with(|| {
                metrics::counter!("saga_sessions_opened_total").increment(1);
                tracing::debug!("session opened");
                DocumentSession::new(self.store.clone(), Arc::clone(&self.naming))
            })
        })
    }

    /// Returns true if a session is currently bound.
    pub async fn has_session(&self) -> bool {
        self.slot.lock().await.is_some()
    }

    /// Flushes the bound session, if any. Does not release it.
    #[tracing::instrument(skip(self))]
    pub async fn commit(&self) -> Result<()> {
        let mut slot = self.slot.lock().await;
        match slot.as_mut() {
            Some(session) => session.flush().await,
            None => Ok(()),
        }
    }

    /// Disposes the bound session, if any, and clears the binding.
    ///
    /// Safe to call on every exit path and more than once. Calling it
    /// without a prior [`SessionFactory::commit`] discards staged changes.
    #[tracing::instrument(skip(self))]
    pub async fn release(&self) {
        let mut slot = self.slot.lock().await;
        if let Some(mut session) = slot.take() {
            let discarded = session.pending_operations();
            session.dispose();
            metrics::counter!("saga_sessions_released_total").increment(1);
            tracing::info!(discarded, "session released");
        }
    }
}

impl<S: DocumentStore> Drop for SessionFactory<S> {
    fn drop(&mut self) {
        if let Some(mut session) = self.slot.get_mut().take() {
            tracing::warn!("session factory dropped without release; disposing session");
            session.dispose();
            metrics::counter!("saga_sessions_released_total").increment(1);
        }
    }
}
