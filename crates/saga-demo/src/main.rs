//! Demo entry point.

use std::process::ExitCode;
use std::sync::Arc;

use document_store::{InMemoryDocumentStore, PostgresDocumentStore};
use saga_demo::telemetry::{self, LogFormat};
use saga_persistence::{NamingConvention, PersistenceConfig, PersistenceError, StoreBackend};

#[tokio::main]
async fn main() -> ExitCode {
    // 1. Initialize tracing
    telemetry::init_tracing(LogFormat::from_env());

    // 2. Install Prometheus metrics recorder
    let metrics_handle = match telemetry::install_metrics() {
        Ok(handle) => handle,
        Err(e) => {
            tracing::error!(error = %e, "failed to install Prometheus recorder");
            return ExitCode::FAILURE;
        }
    };

    // 3. Load configuration
    let config = match PersistenceConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            tracing::error!(error = %e, "invalid configuration");
            return ExitCode::FAILURE;
        }
    };
    let naming = Arc::new(NamingConvention::new(config.naming));

    // 4. Open the store and run the scenarios
    let report = match &config.backend {
        StoreBackend::Memory => {
            tracing::info!("using in-memory document store");
            saga_demo::run_all(InMemoryDocumentStore::new(), naming, config.retry.clone()).await
        }
        StoreBackend::Postgres {
            database_url,
            max_connections,
        } => {
            tracing::info!(max_connections, "using PostgreSQL document store");
            let store = match open_postgres(database_url, *max_connections).await {
                Ok(store) => store,
                Err(e) => {
                    tracing::error!(error = %e, "failed to open PostgreSQL store");
                    return ExitCode::FAILURE;
                }
            };
            saga_demo::run_all(store, naming, config.retry.clone()).await
        }
    };

    tracing::info!(
        passed = report.passed.len(),
        failed = report.failed.len(),
        "demo finished"
    );
    tracing::debug!(metrics = %metrics_handle.render(), "metrics snapshot");

    if report.is_success() {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    }
}

async fn open_postgres(
    database_url: &str,
    max_connections: u32,
) -> Result<PostgresDocumentStore, PersistenceError> {
    let store = PostgresDocumentStore::connect(database_url, max_connections).await?;
    store.run_migrations().await?;
    Ok(store)
}
