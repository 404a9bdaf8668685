//! Versioned document store used as the durable backend for saga state.
//!
//! Every active saga instance is one JSON document, addressed by the
//! collection its type maps to and by its id. Writes are submitted as a
//! [`WriteBatch`] and applied atomically, with per-document optimistic
//! concurrency checks on updates and deletes.

pub mod batch;
pub mod document;
pub mod error;
pub mod memory;
pub mod postgres;
pub mod store;

pub use batch::{CommitReceipt, WriteBatch, WriteOp, validate_batch};
pub use common::{SagaId, Version};
pub use document::Document;
pub use error::{Result, StoreError};
pub use memory::InMemoryDocumentStore;
pub use postgres::PostgresDocumentStore;
pub use store::{DocumentStore, DocumentStoreExt};
