// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Domain Repository Interface
//!
//! Persistence contract for experiments, generations and individuals. The
//! trait lives in the domain layer and is implemented in
//! `crate::infrastructure::repositories`.
//!
//! | Implementation | Backend |
//! |----------------|---------|
//! | `InMemoryExperimentRepository` | single lock over in-process maps |
//! | `SqliteExperimentRepository` | sqlx SQLite pool (file or `:memory:`) |
//!
//! Implementations must be safe to call concurrently from the coordination
//! path and the monitor task. A storage failure propagates to the caller; the
//! orchestration layer never retries it.

use crate::domain::individual::{
    ExperimentId, FitnessScore, GenerationId, Genome, Individual, IndividualId, IndividualValue,
};
use async_trait::async_trait;

/// Storage backend enum for pluggable persistence
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StorageBackend {
    InMemory,
    Sqlite(SqliteConfig),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SqliteConfig {
    /// sqlx connection url, e.g. `sqlite://darwin.db` or `sqlite::memory:`
    pub url: String,
}

#[async_trait]
pub trait ExperimentRepository<G: Genome>: Send + Sync {
    /// Create the experiment named `name` unless it exists.
    ///
    /// Returns the experiment id and whether it already existed.
    async fn create_experiment(&self, name: &str) -> Result<(ExperimentId, bool), RepositoryError>;

    async fn experiment_exists(&self, id: ExperimentId) -> Result<bool, RepositoryError>;

    async fn get_experiment_id(&self, name: &str) -> Result<Option<ExperimentId>, RepositoryError>;

    /// Append a new, empty generation to the experiment.
    async fn create_generation(&self, experiment_id: ExperimentId) -> Result<GenerationId, RepositoryError>;

    async fn get_latest_generation_id(
        &self,
        experiment_id: ExperimentId,
    ) -> Result<Option<GenerationId>, RepositoryError>;

    /// Store `individuals` under `generation_id`, assigning fresh ids.
    async fn store_population(
        &self,
        generation_id: GenerationId,
        individuals: &[IndividualValue<G>],
    ) -> Result<Vec<IndividualId>, RepositoryError>;

    async fn store_individual_fitness(
        &self,
        individual_id: IndividualId,
        fitness: FitnessScore,
    ) -> Result<(), RepositoryError>;

    async fn get_individual(&self, id: IndividualId) -> Result<Option<Individual<G>>, RepositoryError>;

    /// Population in insertion order.
    async fn get_population(&self, generation_id: GenerationId) -> Result<Vec<Individual<G>>, RepositoryError>;

    async fn get_non_evaluated_individuals(
        &self,
        generation_id: GenerationId,
    ) -> Result<Vec<Individual<G>>, RepositoryError>;

    async fn count_generations(&self, experiment_id: ExperimentId) -> Result<u64, RepositoryError>;
}

/// Repository errors
#[derive(Debug, thiserror::Error)]
pub enum RepositoryError {
    #[error("Entity not found: {0}")]
    NotFound(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl From<sqlx::Error> for RepositoryError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::RowNotFound => RepositoryError::NotFound("Row not found".to_string()),
            _ => RepositoryError::Database(err.to_string()),
        }
    }
}

impl From<serde_json::Error> for RepositoryError {
    fn from(err: serde_json::Error) -> Self {
        RepositoryError::Serialization(err.to_string())
    }
}

impl From<uuid::Error> for RepositoryError {
    fn from(err: uuid::Error) -> Self {
        RepositoryError::Serialization(err.to_string())
    }
}
