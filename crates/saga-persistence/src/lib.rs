//! Saga persistence over a versioned document store.
//!
//! A unit of work (typically the handling of one inbound message) gets one
//! [`Session`], opened lazily through its [`SessionFactory`]. The
//! [`SagaPersister`] stages saves, updates and completions in that session;
//! the unit of work then commits them atomically and releases the session on
//! every exit path:
//!
//! ```text
//! begin ─► save/get/update/complete* ─┬─► commit ─► release   (success)
//!                                     └───────────► release   (failure: discard)
//! ```
//!
//! Concurrent writers to one saga are detected at commit time through the
//! version token each loaded document carries.

pub mod config;
pub mod entity;
pub mod error;
pub mod factory;
pub mod naming;
pub mod persister;
pub mod session;
pub mod unit_of_work;

pub use common::{SagaId, Version};
pub use config::{PersistenceConfig, StoreBackend};
pub use entity::SagaEntity;
pub use error::{PersistenceError, Result};
pub use factory::SessionFactory;
pub use naming::{NamingConvention, NamingStrategy};
pub use persister::{DocumentSagaPersister, SagaPersister, complete_saga, update_saga};
pub use session::{DocumentSession, Session};
pub use unit_of_work::{RetryPolicy, UnitOfWork, run_unit_of_work, run_with_retry};
