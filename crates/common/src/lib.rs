//! Identifier and version types shared by the document store and the saga
//! persistence layer.

pub mod types;

pub use types::{SagaId, Version};
