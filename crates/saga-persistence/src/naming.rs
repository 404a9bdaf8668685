//! Maps saga types to storage locations (collection names).
//!
//! Resolution is deterministic: the same type always yields the same name,
//! so documents written by one process stay discoverable by the next.
//! Results are memoized per type for the lifetime of the convention, and two
//! distinct types that would share a location are rejected instead of being
//! silently merged.

use std::any::TypeId;
use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};

use serde::{Deserialize, Serialize};

use crate::entity::SagaEntity;
use crate::error::{PersistenceError, Result};

/// How a type descriptor is turned into a collection name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NamingStrategy {
    /// Last path segment only: `shop::billing::OrderSagaData` -> `order_saga`.
    #[default]
    TypeName,

    /// Full module path: `shop::billing::OrderSagaData` -> `shop.billing.order_saga`.
    QualifiedTypeName,
}

impl NamingStrategy {
    /// Parses the configuration spelling (`type_name` or `qualified`).
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "type_name" | "type" => Some(NamingStrategy::TypeName),
            "qualified" | "qualified_type_name" => Some(NamingStrategy::QualifiedTypeName),
            _ => None,
        }
    }

    /// Normalizes a Rust type name into a collection name.
    ///
    /// Generic arguments are dropped, a trailing `Data` suffix is removed and
    /// CamelCase becomes snake_case.
    pub fn collection_name(&self, type_name: &str) -> String {
        let base = type_name.split('<').next().unwrap_or(type_name);
        let segments: Vec<&str> = base.split("::").filter(|s| !s.is_empty()).collect();
        let Some((leaf, modules)) = segments.split_last() else {
            return String::new();
        };

        let leaf = leaf
            .strip_suffix("Data")
            .filter(|stem| !stem.is_empty())
            .unwrap_or(leaf);
        let leaf = to_snake_case(leaf);

        match self {
            NamingStrategy::TypeName => leaf,
            NamingStrategy::QualifiedTypeName => {
                let mut parts: Vec<String> = modules.iter().map(|m| to_snake_case(m)).collect();
                parts.push(leaf);
                parts.join(".")
            }
        }
    }
}

fn to_snake_case(name: &str) -> String {
    let chars: Vec<char> = name.chars().collect();
    let mut out = String::with_capacity(name.len() + 4);

    for (i, &c) in chars.iter().enumerate() {
        if c.is_uppercase() {
            let prev = i.checked_sub(1).map(|p| chars[p]);
            let next = chars.get(i + 1).copied();
            let boundary = match prev {
                Some(p) if p.is_lowercase() || p.is_ascii_digit() => true,
                Some(p) if p.is_uppercase() => next.is_some_and(|n| n.is_lowercase()),
                _ => false,
            };
            if boundary && !out.ends_with('_') {
                out.push('_');
            }
            out.extend(c.to_lowercase());
        } else {
            out.push(c);
        }
    }

    out
}

fn validate_collection_name(name: &str, type_name: &str) -> Result<()> {
    let valid = !name.is_empty()
        && !name.starts_with('.')
        && !name.ends_with('.')
        && name
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_' || c == '.');

    if valid {
        Ok(())
    } else {
        Err(PersistenceError::Configuration(format!(
            "Cannot derive a storage location for saga type `{type_name}`: `{name}` is not a valid collection name"
        )))
    }
}

#[derive(Debug, Default)]
struct Resolved {
    by_type: HashMap<TypeId, String>,
    owners: HashMap<String, (TypeId, &'static str)>,
}

/// Memoizing resolver from saga type to collection name.
///
/// Construct one at configuration time and share it (behind an `Arc`) with
/// every session factory. Cached names are never invalidated while the
/// convention lives; build a new convention to start over.
#[derive(Debug, Default)]
pub struct NamingConvention {
    strategy: NamingStrategy,
    overrides: HashMap<TypeId, String>,
    resolved: RwLock<Resolved>,
}

impl NamingConvention {
    /// Creates a convention using `strategy` for every type without an override.
    pub fn new(strategy: NamingStrategy) -> Self {
        Self {
            strategy,
            ..Self::default()
        }
    }

    /// Pins the collection name of `T`.
    pub fn with_override<T: SagaEntity>(mut self, collection: impl Into<String>) -> Result<Self> {
        let collection = collection.into();
        validate_collection_name(&collection, T::type_name())?;
        self.overrides.insert(TypeId::of::<T>(), collection);
        Ok(self)
    }

    /// The strategy used for types without an override.
    pub fn strategy(&self) -> NamingStrategy {
        self.strategy
    }

    /// Resolves the collection name for `T`.
    ///
    /// Fails with `Configuration` if the name is invalid or already claimed
    /// by a different saga type.
    pub fn resolve<T: SagaEntity>(&self) -> Result<String> {
        let type_id = TypeId::of::<T>();

        if let Some(name) = self
            .resolved
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .by_type
            .get(&type_id)
        {
            return Ok(name.clone());
        }

        let type_name = T::type_name();
        let name = match self.overrides.get(&type_id) {
            Some(name) => name.clone(),
            None => self.strategy.collection_name(type_name),
        };
        validate_collection_name(&name, type_name)?;

        let mut resolved = self.resolved.write().unwrap_or_else(PoisonError::into_inner);
        if let Some(name) = resolved.by_type.get(&type_id) {
            return Ok(name.clone());
        }
        if let Some((owner_id, owner_name)) = resolved.owners.get(&name)
            && *owner_id != type_id
        {
            return Err(PersistenceError::Configuration(format!(
                "Saga types `{owner_name}` and `{type_name}` both map to collection `{name}`; \
                 register an override for one of them"
            )));
        }

        tracing::debug!(saga_type = type_name, collection = %name, "storage location resolved");
        resolved.owners.insert(name.clone(), (type_id, type_name));
        resolved.by_type.insert(type_id, name.clone());
        Ok(name)
    }
}
