//! End-to-end saga lifecycle scenarios.

use std::sync::Arc;

use document_store::DocumentStore;
use saga_persistence::{
    NamingConvention, PersistenceError, RetryPolicy, SagaEntity, SagaId, SagaPersister,
    UnitOfWork, complete_saga, run_unit_of_work, run_with_retry, update_saga,
};
use serde::{Deserialize, Serialize};

use crate::error::{DemoError, ensure};

/// Saga state for a toy order process.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderSagaData {
    pub id: SagaId,
    pub order_number: String,
    pub step: u32,
}

impl OrderSagaData {
    pub fn new(order_number: impl Into<String>) -> Self {
        Self {
            id: SagaId::new(),
            order_number: order_number.into(),
            step: 1,
        }
    }
}

impl SagaEntity for OrderSagaData {
    fn id(&self) -> SagaId {
        self.id
    }
}

/// Outcome of a demo run.
#[derive(Debug, Default)]
pub struct ScenarioReport {
    pub passed: Vec<&'static str>,
    pub failed: Vec<(&'static str, DemoError)>,
}

impl ScenarioReport {
    /// Returns true if every scenario passed.
    pub fn is_success(&self) -> bool {
        self.failed.is_empty()
    }

    fn record(&mut self, name: &'static str, outcome: Result<(), DemoError>) {
        match outcome {
            Ok(()) => {
                tracing::info!(scenario = name, "scenario passed");
                self.passed.push(name);
            }
            Err(e) => {
                tracing::error!(scenario = name, error = %e, "scenario failed");
                self.failed.push((name, e));
            }
        }
    }
}

struct Scenarios<S> {
    store: S,
    naming: Arc<NamingConvention>,
    retry: RetryPolicy,
}

impl<S> Scenarios<S>
where
    S: DocumentStore + Clone + 'static,
{
    async fn get(&self, id: SagaId) -> Result<Option<OrderSagaData>, PersistenceError> {
        run_unit_of_work(self.store.clone(), Arc::clone(&self.naming), |p| async move {
            p.get::<OrderSagaData>(id).await
        })
        .await
    }

    async fn save(&self, saga: OrderSagaData) -> Result<(), PersistenceError> {
        run_unit_of_work(self.store.clone(), Arc::clone(&self.naming), |p| async move {
            p.save(&saga).await
        })
        .await
    }

    async fn save_then_get(&self) -> Result<(), DemoError> {
        let saga = OrderSagaData::new("ORD-A");
        self.save(saga.clone()).await?;

        let loaded = self.get(saga.id).await?;
        ensure(loaded.as_ref() == Some(&saga), "saved saga not returned by get")
    }

    async fn update_step(&self) -> Result<(), DemoError> {
        let saga = OrderSagaData::new("ORD-B");
        self.save(saga.clone()).await?;

        run_unit_of_work(self.store.clone(), Arc::clone(&self.naming), |p| async move {
            update_saga::<OrderSagaData, _, _>(&p, saga.id, |s| s.step = 2).await
        })
        .await?;

        let loaded = self.get(saga.id).await?;
        ensure(
            loaded.map(|s| s.step) == Some(2),
            "updated step not visible to the next unit of work",
        )
    }

    async fn complete_removes(&self) -> Result<(), DemoError> {
        let saga = OrderSagaData::new("ORD-C");
        self.save(saga.clone()).await?;

        run_unit_of_work(self.store.clone(), Arc::clone(&self.naming), |p| async move {
            complete_saga::<OrderSagaData, _>(&p, saga.id).await
        })
        .await?;

        ensure(
            self.get(saga.id).await?.is_none(),
            "completed saga still resolves",
        )
    }

    async fn missing_is_domain_error(&self) -> Result<(), DemoError> {
        let id = SagaId::new();
        let outcome = run_unit_of_work(self.store.clone(), Arc::clone(&self.naming), |p| async move {
            update_saga::<OrderSagaData, _, _>(&p, id, |s| s.step += 1).await
        })
        .await;

        ensure(
            matches!(outcome, Err(PersistenceError::SagaNotFound(missing)) if missing == id),
            "update of a missing saga did not report saga-not-found",
        )
    }

    async fn concurrent_writers_conflict(&self) -> Result<(), DemoError> {
        let saga = OrderSagaData::new("ORD-E");
        self.save(saga.clone()).await?;

        let first = UnitOfWork::begin(self.store.clone(), Arc::clone(&self.naming));
        let second = UnitOfWork::begin(self.store.clone(), Arc::clone(&self.naming));

        let loaded_first = first.persister().get::<OrderSagaData>(saga.id).await?;
        let loaded_second = second.persister().get::<OrderSagaData>(saga.id).await?;
        let (Some(mut a), Some(mut b)) = (loaded_first, loaded_second) else {
            return Err(DemoError::Unexpected("saved saga not found".to_string()));
        };

        a.step = 2;
        first.persister().update(&a).await?;
        b.step = 3;
        second.persister().update(&b).await?;

        let first_commit = first.commit().await;
        first.release().await;
        let second_commit = second.commit().await;
        second.release().await;

        first_commit?;
        ensure(
            matches!(second_commit, Err(PersistenceError::ConcurrencyConflict { .. })),
            "second writer was not rejected",
        )
    }

    async fn retry_applies_both(&self) -> Result<(), DemoError> {
        let mut saga = OrderSagaData::new("ORD-R");
        saga.step = 0;
        let id = saga.id;
        self.save(saga).await?;

        for _ in 0..2 {
            run_with_retry(
                self.store.clone(),
                Arc::clone(&self.naming),
                &self.retry,
                |p| async move {
                    update_saga::<OrderSagaData, _, _>(&p, id, |s| s.step += 1).await
                },
            )
            .await?;
        }

        let loaded = self.get(id).await?;
        ensure(
            loaded.map(|s| s.step) == Some(2),
            "retried increments were lost",
        )
    }
}

/// Runs every scenario against `store` and reports the outcome.
pub async fn run_all<S>(
    store: S,
    naming: Arc<NamingConvention>,
    retry: RetryPolicy,
) -> ScenarioReport
where
    S: DocumentStore + Clone + 'static,
{
    let scenarios = Scenarios {
        store,
        naming,
        retry,
    };
    let mut report = ScenarioReport::default();

    report.record("save_then_get", scenarios.save_then_get().await);
    report.record("update_step", scenarios.update_step().await);
    report.record("complete_removes", scenarios.complete_removes().await);
    report.record(
        "missing_is_domain_error",
        scenarios.missing_is_domain_error().await,
    );
    report.record(
        "concurrent_writers_conflict",
        scenarios.concurrent_writers_conflict().await,
    );
    report.record("retry_applies_both", scenarios.retry_applies_both().await);

    report
}
