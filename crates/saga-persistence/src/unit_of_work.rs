//! Scoped unit-of-work execution: commit on success, release on every exit.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use document_store::DocumentStore;
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::factory::SessionFactory;
use crate::naming::NamingConvention;
use crate::persister::DocumentSagaPersister;

/// One unit of work: a session factory plus the persister bound to it.
///
/// Drive it manually with [`UnitOfWork::commit`] and
/// [`UnitOfWork::release`], or hand it a body with [`UnitOfWork::run`].
/// If it is dropped without being released, the factory's `Drop` disposes
/// the session and nothing staged is committed.
pub struct UnitOfWork<S: DocumentStore> {
    factory: Arc<SessionFactory<S>>,
}

impl<S> UnitOfWork<S>
where
    S: DocumentStore + Clone + 'static,
{
    /// Starts a unit of work against `store`. No session is opened until
    /// the first persister call.
    pub fn begin(store: S, naming: Arc<NamingConvention>) -> Self {
        Self {
            factory: Arc::new(SessionFactory::new(store, naming)),
        }
    }

    /// A persister bound to this unit of work's session.
    pub fn persister(&self) -> DocumentSagaPersister<S> {
        DocumentSagaPersister::new(Arc::clone(&self.factory))
    }

    /// The session factory of this unit of work.
    pub fn session_factory(&self) -> &Arc<SessionFactory<S>> {
        &self.factory
    }

    /// Flushes staged changes. Call before [`UnitOfWork::release`] on success.
    pub async fn commit(&self) -> Result<()> {
        self.factory.commit().await
    }

    /// Releases the session. Must run on every exit path; idempotent.
    pub async fn release(&self) {
        self.factory.release().await
    }

    /// Runs `body`, commits if it succeeded, and releases unconditionally.
    ///
    /// A body error skips the commit, which discards everything it staged.
    pub async fn run<F, Fut, T>(self, body: F) -> Result<T>
    where
        F: FnOnce(DocumentSagaPersister<S>) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let outcome = match body(self.persister()).await {
            Ok(value) => self.commit().await.map(|()| value),
            Err(e) => Err(e),
        };
        self.release().await;

        if let Err(ref e) = outcome {
            tracing::debug!(error = %e, kind = e.kind(), "unit of work abandoned");
        }
        outcome
    }
}

/// Runs `body` as a fresh unit of work. See [`UnitOfWork::run`].
pub async fn run_unit_of_work<S, F, Fut, T>(
    store: S,
    naming: Arc<NamingConvention>,
    body: F,
) -> Result<T>
where
    S: DocumentStore + Clone + 'static,
    F: FnOnce(DocumentSagaPersister<S>) -> Fut,
    Fut: Future<Output = Result<T>>,
{
    UnitOfWork::begin(store, naming).run(body).await
}

/// How often a failed unit of work is restarted from scratch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Total attempts, including the first. Zero behaves like one.
    pub max_attempts: u32,

    /// Pause between attempts.
    pub backoff: Duration,
}

impl RetryPolicy {
    /// A policy that never retries.
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            backoff: Duration::ZERO,
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff: Duration::from_millis(50),
        }
    }
}

/// Runs `body` as a unit of work, restarting it in a new unit of work while
/// it fails with a retryable error (`ConcurrencyConflict`,
/// `StoreUnavailable`) and attempts remain.
///
/// Each attempt gets a fresh session, so the body re-reads current state.
pub async fn run_with_retry<S, F, Fut, T>(
    store: S,
    naming: Arc<NamingConvention>,
    policy: &RetryPolicy,
    mut body: F,
) -> Result<T>
where
    S: DocumentStore + Clone + 'static,
    F: FnMut(DocumentSagaPersister<S>) -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 1;

    loop {
        match run_unit_of_work(store.clone(), Arc::clone(&naming), &mut body).await {
            Ok(value) => return Ok(value),
            Err(e) if e.is_retryable() && attempt < max_attempts => {
                metrics::counter!("saga_unit_of_work_retries_total", "kind" => e.kind())
                    .increment(1);
                tracing::warn!(attempt, max_attempts, error = %e, "retrying unit of work");
                tokio::time::sleep(policy.backoff).await;
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}
