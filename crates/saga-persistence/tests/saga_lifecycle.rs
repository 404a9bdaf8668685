//! Integration tests for the saga persistence unit of work.

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use document_store::{DocumentStore, InMemoryDocumentStore};
use saga_persistence::{
    DocumentSagaPersister, NamingConvention, PersistenceError, Result, RetryPolicy, SagaEntity,
    SagaId, SagaPersister, Session, UnitOfWork, complete_saga, run_unit_of_work, run_with_retry,
    update_saga,
};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct OrderSagaData {
    id: SagaId,
    order_number: String,
    step: u32,
}

impl SagaEntity for OrderSagaData {
    fn id(&self) -> SagaId {
        self.id
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct ShippingPolicyData {
    id: SagaId,
    carrier: String,
}

impl SagaEntity for ShippingPolicyData {
    fn id(&self) -> SagaId {
        self.id
    }
}

struct TestHarness {
    store: InMemoryDocumentStore,
    naming: Arc<NamingConvention>,
}

impl TestHarness {
    fn new() -> Self {
        Self {
            store: InMemoryDocumentStore::new(),
            naming: Arc::new(NamingConvention::default()),
        }
    }

    fn begin(&self) -> UnitOfWork<InMemoryDocumentStore> {
        UnitOfWork::begin(self.store.clone(), Arc::clone(&self.naming))
    }

    async fn with_unit_of_work<F, Fut, T>(&self, body: F) -> Result<T>
    where
        F: FnOnce(DocumentSagaPersister<InMemoryDocumentStore>) -> Fut,
        Fut: std::future::Future<Output = Result<T>>,
    {
        run_unit_of_work(self.store.clone(), Arc::clone(&self.naming), body).await
    }

    async fn save_saga(&self, saga: OrderSagaData) {
        self.with_unit_of_work(|p| async move { p.save(&saga).await })
            .await
            .unwrap();
    }

    async fn get_saga(&self, id: SagaId) -> Option<OrderSagaData> {
        self.with_unit_of_work(|p| async move { p.get::<OrderSagaData>(id).await })
            .await
            .unwrap()
    }

    async fn update_saga(&self, id: SagaId, step: u32) -> Result<OrderSagaData> {
        self.with_unit_of_work(|p| async move {
            update_saga::<OrderSagaData, _, _>(&p, id, |saga| saga.step = step).await
        })
        .await
    }

    async fn complete_saga(&self, id: SagaId) -> Result<OrderSagaData> {
        self.with_unit_of_work(|p| async move { complete_saga::<OrderSagaData, _>(&p, id).await })
            .await
    }
}

fn order_saga(step: u32) -> OrderSagaData {
    OrderSagaData {
        id: SagaId::new(),
        order_number: "ORD-1001".to_string(),
        step,
    }
}

#[tokio::test]
async fn test_scenario_a_saved_saga_is_visible_to_next_unit_of_work() {
    let h = TestHarness::new();
    let saga = order_saga(1);
    h.save_saga(saga.clone()).await;

    let loaded = h.get_saga(saga.id).await.unwrap();
    assert_eq!(loaded, saga);
    assert_eq!(loaded.step, 1);
}

#[tokio::test]
async fn test_scenario_b_update_is_visible_to_next_unit_of_work() {
    let h = TestHarness::new();
    let saga = order_saga(1);
    h.save_saga(saga.clone()).await;

    h.update_saga(saga.id, 2).await.unwrap();

    let loaded = h.get_saga(saga.id).await.unwrap();
    assert_eq!(loaded.step, 2);
    assert_eq!(loaded.order_number, "ORD-1001");
}

#[tokio::test]
async fn test_scenario_c_completed_saga_is_gone() {
    let h = TestHarness::new();
    let saga = order_saga(1);
    h.save_saga(saga.clone()).await;

    h.complete_saga(saga.id).await.unwrap();

    assert!(h.get_saga(saga.id).await.is_none());
    assert_eq!(h.store.count("order_saga").await.unwrap(), 0);
}

#[tokio::test]
async fn test_scenario_d_missing_saga_is_a_domain_error() {
    let h = TestHarness::new();
    let id = SagaId::new();

    assert!(h.get_saga(id).await.is_none());

    let update = h.update_saga(id, 2).await;
    assert!(matches!(update, Err(PersistenceError::SagaNotFound(missing)) if missing == id));

    let complete = h.complete_saga(id).await;
    assert!(matches!(complete, Err(PersistenceError::SagaNotFound(_))));
    assert_eq!(h.store.document_count().await, 0);
}

#[tokio::test]
async fn test_scenario_e_concurrent_updates_one_wins() {
    let h = TestHarness::new();
    let saga = order_saga(1);
    h.save_saga(saga.clone()).await;

    let first = h.begin();
    let second = h.begin();

    let mut a = first.persister().get::<OrderSagaData>(saga.id).await.unwrap().unwrap();
    let mut b = second.persister().get::<OrderSagaData>(saga.id).await.unwrap().unwrap();

    a.step = 2;
    first.persister().update(&a).await.unwrap();
    b.step = 3;
    second.persister().update(&b).await.unwrap();

    let first_commit = first.commit().await;
    first.release().await;
    let second_commit = second.commit().await;
    second.release().await;

    assert!(first_commit.is_ok());
    match second_commit {
        Err(e @ PersistenceError::ConcurrencyConflict { .. }) => assert!(e.is_retryable()),
        other => panic!("expected concurrency conflict, got {other:?}"),
    }

    // The loser retries by re-reading current state
    let current = h.get_saga(saga.id).await.unwrap();
    assert_eq!(current.step, 2);
    h.update_saga(saga.id, 3).await.unwrap();
    assert_eq!(h.get_saga(saga.id).await.unwrap().step, 3);
}

#[tokio::test]
async fn test_completion_is_idempotent_across_units_of_work() {
    let h = TestHarness::new();
    let saga = order_saga(1);
    h.save_saga(saga.clone()).await;
    h.complete_saga(saga.id).await.unwrap();

    for _ in 0..3 {
        assert!(h.get_saga(saga.id).await.is_none());
    }
    assert!(matches!(
        h.complete_saga(saga.id).await,
        Err(PersistenceError::SagaNotFound(_))
    ));
}

#[tokio::test]
async fn test_update_of_untracked_entity_is_usage_error() {
    let h = TestHarness::new();
    let saga = order_saga(1);
    h.save_saga(saga.clone()).await;

    // Never loaded in this unit of work, even though it exists in the store
    let result = h
        .with_unit_of_work(|p| {
            let saga = saga.clone();
            async move { p.update(&saga).await }
        })
        .await;

    assert!(matches!(result, Err(PersistenceError::Usage(_))));
    assert_eq!(h.get_saga(saga.id).await.unwrap().step, 1);
}

#[tokio::test]
async fn test_failed_flush_leaves_nothing_visible() {
    let h = TestHarness::new();
    let existing = order_saga(1);
    h.save_saga(existing.clone()).await;

    let uow = h.begin();
    let p = uow.persister();
    let fresh = order_saga(1);
    p.save(&fresh).await.unwrap();
    let mut loaded = p.get::<OrderSagaData>(existing.id).await.unwrap().unwrap();
    loaded.step = 5;
    p.update(&loaded).await.unwrap();
    p.save(&ShippingPolicyData {
        id: SagaId::new(),
        carrier: "ACME".to_string(),
    })
    .await
    .unwrap();

    // Another unit of work completes the saga first
    h.complete_saga(existing.id).await.unwrap();

    let commit = uow.commit().await;
    uow.release().await;
    assert!(matches!(commit, Err(PersistenceError::ConcurrencyConflict { .. })));

    assert!(h.get_saga(fresh.id).await.is_none());
    assert_eq!(h.store.count("shipping_policy").await.unwrap(), 0);
}

#[tokio::test]
async fn test_release_is_unconditional_and_idempotent() {
    let h = TestHarness::new();

    // Success path
    let uow = h.begin();
    uow.persister().save(&order_saga(1)).await.unwrap();
    uow.commit().await.unwrap();
    uow.release().await;
    uow.release().await;
    assert!(!uow.session_factory().has_session().await);

    // Store failure path
    let uow = h.begin();
    uow.persister().save(&order_saga(1)).await.unwrap();
    h.store.set_unavailable(true);
    assert!(matches!(
        uow.commit().await,
        Err(PersistenceError::StoreUnavailable(_))
    ));
    h.store.set_unavailable(false);
    uow.release().await;
    uow.release().await;
    assert!(!uow.session_factory().has_session().await);

    // Release without commit
    let uow = h.begin();
    uow.persister().save(&order_saga(1)).await.unwrap();
    uow.release().await;
    uow.release().await;

    assert_eq!(h.store.count("order_saga").await.unwrap(), 1);
}

#[tokio::test]
async fn test_duplicate_save_surfaces_at_commit() {
    let h = TestHarness::new();
    let saga = order_saga(1);
    h.save_saga(saga.clone()).await;

    let result = h
        .with_unit_of_work(|p| {
            let saga = saga.clone();
            async move { p.save(&saga).await }
        })
        .await;

    match result {
        Err(e @ PersistenceError::DuplicateSaga { .. }) => assert!(!e.is_retryable()),
        other => panic!("expected duplicate saga, got {other:?}"),
    }
}

#[tokio::test]
async fn test_save_of_loaded_saga_is_duplicate() {
    let h = TestHarness::new();
    let saga = order_saga(1);
    let id = saga.id;
    h.save_saga(saga).await;

    let result = h
        .with_unit_of_work(|p| async move {
            p.get::<OrderSagaData>(id).await?;
            p.save(&OrderSagaData {
                id,
                order_number: "ORD-2002".to_string(),
                step: 9,
            })
            .await
        })
        .await;

    match result {
        Err(PersistenceError::DuplicateSaga { collection, id: dup }) => {
            assert_eq!(collection, "order_saga");
            assert_eq!(dup, id);
        }
        other => panic!("expected duplicate saga, got {other:?}"),
    }
    assert_eq!(h.get_saga(id).await.unwrap().step, 1);
}

#[tokio::test]
async fn test_completed_id_may_be_reused() {
    let h = TestHarness::new();
    let saga = order_saga(1);
    h.save_saga(saga.clone()).await;
    h.complete_saga(saga.id).await.unwrap();

    let reborn = OrderSagaData {
        step: 10,
        ..saga.clone()
    };
    h.save_saga(reborn).await;
    assert_eq!(h.get_saga(saga.id).await.unwrap().step, 10);
}

#[tokio::test]
async fn test_saga_types_are_stored_in_separate_collections() {
    let h = TestHarness::new();
    let id = SagaId::new();

    h.with_unit_of_work(|p| async move {
        p.save(&OrderSagaData {
            id,
            order_number: "ORD-7".to_string(),
            step: 1,
        })
        .await?;
        p.save(&ShippingPolicyData {
            id,
            carrier: "ACME".to_string(),
        })
        .await
    })
    .await
    .unwrap();

    assert_eq!(h.store.count("order_saga").await.unwrap(), 1);
    assert_eq!(h.store.count("shipping_policy").await.unwrap(), 1);

    let shipping = h
        .with_unit_of_work(|p| async move { p.get::<ShippingPolicyData>(id).await })
        .await
        .unwrap()
        .unwrap();
    assert_eq!(shipping.carrier, "ACME");
}

#[tokio::test]
async fn test_save_update_complete_in_one_unit_of_work_writes_nothing() {
    let h = TestHarness::new();
    let mut saga = order_saga(1);

    h.with_unit_of_work(|p| async move {
        p.save(&saga).await?;
        saga.step = 2;
        p.update(&saga).await?;
        p.complete(&saga).await
    })
    .await
    .unwrap();

    assert_eq!(h.store.document_count().await, 0);
}

#[tokio::test]
async fn test_dropped_unit_of_work_disposes_session() {
    let h = TestHarness::new();
    let saga = order_saga(1);

    {
        let uow = h.begin();
        uow.persister().save(&saga).await.unwrap();
        // Dropped without commit or release
    }

    assert!(h.get_saga(saga.id).await.is_none());
}

#[tokio::test]
async fn test_session_is_shared_within_a_unit_of_work() {
    let h = TestHarness::new();
    let saga = order_saga(1);
    h.save_saga(saga.clone()).await;

    let uow = h.begin();
    let p = uow.persister();
    let loaded = p.get::<OrderSagaData>(saga.id).await.unwrap().unwrap();
    p.complete(&loaded).await.unwrap();

    // A second persister handle on the same unit of work sees the staged delete
    let other = uow.persister();
    assert!(other.get::<OrderSagaData>(saga.id).await.unwrap().is_none());
    assert_eq!(
        uow.session_factory()
            .current_session()
            .await
            .pending_operations(),
        1
    );

    uow.commit().await.unwrap();
    uow.release().await;
    assert!(h.get_saga(saga.id).await.is_none());
}

#[tokio::test]
async fn test_retry_restarts_unit_of_work_after_conflict() {
    let h = TestHarness::new();
    let saga = order_saga(0);
    let id = saga.id;
    h.save_saga(saga).await;

    let attempts = AtomicU32::new(0);
    let policy = RetryPolicy {
        max_attempts: 3,
        backoff: Duration::from_millis(1),
    };

    let result = run_with_retry(h.store.clone(), Arc::clone(&h.naming), &policy, |p| {
        let attempt = attempts.fetch_add(1, Ordering::SeqCst) + 1;
        let h = &h;
        async move {
            let mut loaded = p
                .get::<OrderSagaData>(id)
                .await?
                .ok_or(PersistenceError::SagaNotFound(id))?;
            if attempt == 1 {
                // Another unit of work commits after this one has read
                h.update_saga(id, 10).await?;
            }
            loaded.step += 1;
            p.update(&loaded).await?;
            Ok(loaded.step)
        }
    })
    .await;

    assert_eq!(result.unwrap(), 11);
    assert_eq!(attempts.load(Ordering::SeqCst), 2);
    assert_eq!(h.get_saga(id).await.unwrap().step, 11);
}

#[tokio::test]
async fn test_retry_gives_up_after_max_attempts_on_conflict() {
    let h = TestHarness::new();
    let saga = order_saga(0);
    let id = saga.id;
    h.save_saga(saga).await;

    let attempts = AtomicU32::new(0);
    let policy = RetryPolicy {
        max_attempts: 2,
        backoff: Duration::from_millis(1),
    };

    let result = run_with_retry(h.store.clone(), Arc::clone(&h.naming), &policy, |p| {
        let attempt = attempts.fetch_add(1, Ordering::SeqCst) + 1;
        let h = &h;
        async move {
            let mut loaded = p
                .get::<OrderSagaData>(id)
                .await?
                .ok_or(PersistenceError::SagaNotFound(id))?;
            // Every attempt loses the race
            h.update_saga(id, attempt * 100).await?;
            loaded.step += 1;
            p.update(&loaded).await
        }
    })
    .await;

    assert!(matches!(
        result,
        Err(PersistenceError::ConcurrencyConflict { .. })
    ));
    assert_eq!(attempts.load(Ordering::SeqCst), 2);
    assert_eq!(h.get_saga(id).await.unwrap().step, 200);
}
