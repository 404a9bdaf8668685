use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize, de::DeserializeOwned};

use crate::{SagaId, Version};

/// A stored document: one per active saga instance.
///
/// Documents are located by `(collection, id)`. The `version` is the
/// optimistic concurrency token handed back to writers on load.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Document {
    /// The collection (storage location) the document lives in.
    pub collection: String,

    /// The document key.
    pub id: SagaId,

    /// Current version; 1 after insert, bumped on every update.
    pub version: Version,

    /// The serialized saga state.
    pub body: serde_json::Value,

    /// When the document was first written.
    pub created_at: DateTime<Utc>,

    /// When the document was last written.
    pub updated_at: DateTime<Utc>,
}

impl Document {
    /// Creates a freshly inserted document at [`Version::first`].
    pub fn new(collection: impl Into<String>, id: SagaId, body: serde_json::Value) -> Self {
        let now = Utc::now();
        Self {
            collection: collection.into(),
            id,
            version: Version::first(),
            body,
            created_at: now,
            updated_at: now,
        }
    }

    /// Replaces the body and advances the version.
    pub fn revise(&mut self, body: serde_json::Value) {
        self.body = body;
        self.version = self.version.next();
        self.updated_at = Utc::now();
    }

    /// Deserializes the body into a concrete type.
    pub fn into_body<T: DeserializeOwned>(self) -> Result<T, serde_json::Error> {
        serde_json::from_value(self.body)
    }
}
