//! The contract every persisted saga type implements.

use common::SagaId;
use serde::{Serialize, de::DeserializeOwned};

/// A saga instance's state, persisted as one document.
///
/// The type of the entity decides its storage location through the
/// [`NamingConvention`](crate::NamingConvention); the id keys the document
/// within that location.
pub trait SagaEntity: Serialize + DeserializeOwned + Send + Sync + 'static {
    /// The saga instance's unique id. A nil UUID counts as "not set".
    fn id(&self) -> SagaId;

    /// Type descriptor fed to the naming convention.
    ///
    /// Defaults to the fully qualified Rust type name. Override it to keep
    /// the storage location stable across module moves.
    fn type_name() -> &'static str
    where
        Self: Sized,
    {
        std::any::type_name::<Self>()
    }
}
