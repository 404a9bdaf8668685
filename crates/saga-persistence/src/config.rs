//! Persistence configuration loaded from environment variables.

use std::time::Duration;

use crate::error::{PersistenceError, Result};
use crate::naming::NamingStrategy;
use crate::unit_of_work::RetryPolicy;

/// Which document store backend to open.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreBackend {
    /// Process-local in-memory store.
    Memory,

    /// PostgreSQL `jsonb` store.
    Postgres {
        database_url: String,
        max_connections: u32,
    },
}

/// Saga persistence configuration.
///
/// Reads from environment variables:
/// - `SAGA_STORE`: `memory` or `postgres` (default: `memory`)
/// - `DATABASE_URL`: connection string, required for `postgres`
/// - `SAGA_DB_MAX_CONNECTIONS`: pool size (default: `5`)
/// - `SAGA_COLLECTION_NAMING`: `type_name` or `qualified` (default: `type_name`)
/// - `SAGA_RETRY_ATTEMPTS`: attempts per unit of work (default: `3`)
/// - `SAGA_RETRY_BACKOFF_MS`: pause between attempts (default: `50`)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PersistenceConfig {
    pub backend: StoreBackend,
    pub naming: NamingStrategy,
    pub retry: RetryPolicy,
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            backend: StoreBackend::Memory,
            naming: NamingStrategy::default(),
            retry: RetryPolicy::default(),
        }
    }
}

impl PersistenceConfig {
    /// Loads configuration from the process environment.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Loads configuration from an arbitrary key lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let defaults = Self::default();

        let backend = match lookup("SAGA_STORE").as_deref().map(str::trim) {
            None | Some("") | Some("memory") => StoreBackend::Memory,
            Some("postgres") => {
                let database_url = lookup("DATABASE_URL").ok_or_else(|| {
                    PersistenceError::Configuration(
                        "DATABASE_URL must be set when SAGA_STORE=postgres".to_string(),
                    )
                })?;
                let max_connections = parse_or(&lookup, "SAGA_DB_MAX_CONNECTIONS", 5)?;
                StoreBackend::Postgres {
                    database_url,
                    max_connections,
                }
            }
            Some(other) => {
                return Err(PersistenceError::Configuration(format!(
                    "unknown SAGA_STORE `{other}`, expected `memory` or `postgres`"
                )));
            }
        };

        let naming = match lookup("SAGA_COLLECTION_NAMING") {
            None => defaults.naming,
            Some(value) => NamingStrategy::parse(&value).ok_or_else(|| {
                PersistenceError::Configuration(format!(
                    "unknown SAGA_COLLECTION_NAMING `{value}`, expected `type_name` or `qualified`"
                ))
            })?,
        };

        let retry = RetryPolicy {
            max_attempts: parse_or(&lookup, "SAGA_RETRY_ATTEMPTS", defaults.retry.max_attempts)?,
            backoff: Duration::from_millis(parse_or(
                &lookup,
                "SAGA_RETRY_BACKOFF_MS",
                defaults.retry.backoff.as_millis() as u64,
            )?),
        };

        Ok(Self {
            backend,
            naming,
            retry,
        })
    }
}

fn parse_or<T: std::str::FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
    default: T,
) -> Result<T> {
    match lookup(key) {
        None => Ok(default),
        Some(raw) => raw.trim().parse().map_err(|_| {
            PersistenceError::Configuration(format!("{key} has invalid value `{raw}`"))
        }),
    }
}
