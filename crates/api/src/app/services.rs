//! Infrastructure wiring: pick a repository, build the operator.

use std::sync::Arc;

use batchforge_core::BatchResult;
use batchforge_infra::jobs::{JobOperator, JobRegistry};
use batchforge_infra::repository::{InMemoryJobRepository, JobRepository, PostgresJobRepository};
use tokio::task;

use crate::app::errors;
use crate::config::{ApiConfig, StorageConfig};

pub type SharedRepository = Arc<dyn JobRepository>;
pub type ApiOperator = JobOperator<SharedRepository>;

pub struct AppServices {
    pub operator: ApiOperator,
}

impl AppServices {
    pub fn new(registry: JobRegistry, repository: SharedRepository) -> Self {
        Self {
            operator: JobOperator::new(registry, repository),
        }
    }

    /// In-memory wiring (dev/test).
    pub fn in_memory(registry: JobRegistry) -> Self {
        Self::new(registry, Arc::new(InMemoryJobRepository::new()))
    }

    pub async fn from_config(config: &ApiConfig, registry: JobRegistry) -> anyhow::Result<Self> {
        match &config.storage {
            StorageConfig::InMemory => {
                tracing::info!("using in-memory execution repository");
                Ok(Self::in_memory(registry))
            }
            StorageConfig::Postgres {
                database_url,
                max_connections,
            } => {
                let repository =
                    PostgresJobRepository::connect(database_url, *max_connections).await?;
                repository.migrate().await?;
                tracing::info!(max_connections, "using postgres execution repository");
                Ok(Self::new(registry, Arc::new(repository)))
            }
        }
    }

    /// Run a repository-backed operator call off the async executor.
    ///
    /// Repository adapters are synchronous (the Postgres one blocks on the
    /// runtime), so every query goes through `spawn_blocking`.
    pub async fn blocking<T, F>(&self, f: F) -> Result<T, axum::response::Response>
    where
        F: FnOnce(&ApiOperator) -> BatchResult<T> + Send + 'static,
        T: Send + 'static,
    {
        let operator = self.operator.clone();
        match task::spawn_blocking(move || f(&operator)).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(err)) => Err(errors::batch_error_to_response(err)),
            Err(join) => Err(errors::json_error(
                axum::http::StatusCode::INTERNAL_SERVER_ERROR,
                "internal_error",
                join.to_string(),
            )),
        }
    }
}
