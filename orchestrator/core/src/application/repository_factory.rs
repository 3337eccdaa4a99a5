// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Repository Factory - Application Layer
//!
//! Creates the concrete experiment repository for the configured storage
//! backend, keeping the domain layer free of infrastructure types.
//!
//! # Architecture
//!
//! - **Layer:** Application Layer
//! - **Purpose:** Select a storage implementation at startup

use std::sync::Arc;

use crate::domain::individual::Genome;
use crate::domain::repository::{ExperimentRepository, RepositoryError, StorageBackend};
use crate::infrastructure::repositories::{InMemoryExperimentRepository, SqliteExperimentRepository};
use tracing::info;

/// Creates an ExperimentRepository implementation based on the configured backend
pub async fn create_experiment_repository<G: Genome>(
    backend: &StorageBackend,
) -> Result<Arc<dyn ExperimentRepository<G>>, RepositoryError> {
    match backend {
        StorageBackend::InMemory => {
            info!("Using in-memory experiment storage");
            Ok(Arc::new(InMemoryExperimentRepository::<G>::new()))
        }
        StorageBackend::Sqlite(config) => {
            info!(url = %config.url, "Using SQLite experiment storage");
            Ok(Arc::new(SqliteExperimentRepository::<G>::connect(&config.url).await?))
        }
    }
}
