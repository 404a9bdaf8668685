//! Demo error types.

use saga_persistence::PersistenceError;
use thiserror::Error;

/// Why a demo scenario did not behave as expected.
#[derive(Debug, Error)]
pub enum DemoError {
    /// The persistence layer returned an error the scenario did not expect.
    #[error("Persistence error: {0}")]
    Persistence(#[from] PersistenceError),

    /// The scenario ran but observed the wrong outcome.
    #[error("Unexpected outcome: {0}")]
    Unexpected(String),
}

/// Fails with [`DemoError::Unexpected`] unless `condition` holds.
pub fn ensure(condition: bool, message: impl Into<String>) -> Result<(), DemoError> {
    if condition {
        Ok(())
    } else {
        Err(DemoError::Unexpected(message.into()))
    }
}
