// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! SQLite Experiment Repository
//!
//! Ids are stored as TEXT, genome encodings as JSON TEXT. Insertion order is
//! kept through an AUTOINCREMENT `seq` column on every table that needs it.
//!
//! # Architecture
//!
//! - **Layer:** Infrastructure Layer
//! - **Purpose:** Durable storage so an experiment survives a coordinator restart

use crate::domain::individual::{
    ExperimentId, FitnessScore, GenerationId, Genome, Individual, IndividualId, IndividualValue,
};
use crate::domain::repository::{ExperimentRepository, RepositoryError};
use crate::infrastructure::db::Database;
use async_trait::async_trait;
use chrono::Utc;
use sqlx::sqlite::{SqlitePool, SqliteRow};
use sqlx::Row;
use std::marker::PhantomData;

pub struct SqliteExperimentRepository<G> {
    pool: SqlitePool,
    _genome: PhantomData<fn() -> G>,
}

impl<G> SqliteExperimentRepository<G> {
    pub fn new(pool: SqlitePool) -> Self {
        Self {
            pool,
            _genome: PhantomData,
        }
    }

    pub async fn connect(url: &str) -> Result<Self, RepositoryError> {
        let database = Database::connect(url).await?;
        Ok(Self::new(database.get_pool().clone()))
    }

    async fn generation_exists(&self, generation_id: GenerationId) -> Result<bool, RepositoryError> {
        let row = sqlx::query("SELECT 1 FROM generations WHERE id = ?")
            .bind(generation_id.to_string())
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.is_some())
    }
}

fn parse_individual_row<G: Genome>(row: SqliteRow) -> Result<Individual<G>, RepositoryError> {
    let id: String = row.try_get("id")?;
    let encoding: String = row.try_get("encoding")?;
    let fitness: Option<f64> = row.try_get("fitness")?;
    Ok(Individual {
        id: IndividualId::from_string(&id)?,
        encoding: serde_json::from_str(&encoding)?,
        fitness,
    })
}

#[async_trait]
impl<G: Genome> ExperimentRepository<G> for SqliteExperimentRepository<G> {
    async fn create_experiment(&self, name: &str) -> Result<(ExperimentId, bool), RepositoryError> {
        let id = ExperimentId::new();
        let inserted = sqlx::query(
            r#"
            INSERT INTO experiments (id, name, created_at)
            VALUES (?, ?, ?)
            ON CONFLICT (name) DO NOTHING
            "#,
        )
        .bind(id.to_string())
        .bind(name)
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await
        .map_err(|e| RepositoryError::Database(format!("Failed to create experiment: {}", e)))?;

        if inserted.rows_affected() == 1 {
            return Ok((id, false));
        }
        let existing = self
            .get_experiment_id(name)
            .await?
            .ok_or_else(|| RepositoryError::NotFound(format!("experiment {name}")))?;
        Ok((existing, true))
    }

    async fn experiment_exists(&self, id: ExperimentId) -> Result<bool, RepositoryError> {
        let row = sqlx::query("SELECT 1 FROM experiments WHERE id = ?")
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.is_some())
    }

    async fn get_experiment_id(&self, name: &str) -> Result<Option<ExperimentId>, RepositoryError> {
        let row = sqlx::query("SELECT id FROM experiments WHERE name = ?")
            .bind(name)
            .fetch_optional(&self.pool)
            .await?;
        match row {
            Some(row) => {
                let id: String = row.try_get("id")?;
                Ok(Some(ExperimentId::from_string(&id)?))
            }
            None => Ok(None),
        }
    }

    async fn create_generation(&self, experiment_id: ExperimentId) -> Result<GenerationId, RepositoryError> {
        if !self.experiment_exists(experiment_id).await? {
            return Err(RepositoryError::NotFound(format!("experiment {experiment_id}")));
        }
        let id = GenerationId::new();
        sqlx::query("INSERT INTO generations (id, experiment_id, created_at) VALUES (?, ?, ?)")
            .bind(id.to_string())
            .bind(experiment_id.to_string())
            .bind(Utc::now().to_rfc3339())
            .execute(&self.pool)
            .await
            .map_err(|e| RepositoryError::Database(format!("Failed to create generation: {}", e)))?;
        Ok(id)
    }

    async fn get_latest_generation_id(
        &self,
        experiment_id: ExperimentId,
    ) -> Result<Option<GenerationId>, RepositoryError> {
        let row = sqlx::query(
            "SELECT id FROM generations WHERE experiment_id = ? ORDER BY seq DESC LIMIT 1",
        )
        .bind(experiment_id.to_string())
        .fetch_optional(&self.pool)
        .await?;
        match row {
            Some(row) => {
                let id: String = row.try_get("id")?;
                Ok(Some(GenerationId::from_string(&id)?))
            }
            None => Ok(None),
        }
    }

    async fn store_population(
        &self,
        generation_id: GenerationId,
        individuals: &[IndividualValue<G>],
    ) -> Result<Vec<IndividualId>, RepositoryError> {
        if !self.generation_exists(generation_id).await? {
            return Err(RepositoryError::NotFound(format!("generation {generation_id}")));
        }

        let mut ids = Vec::with_capacity(individuals.len());
        let mut tx = self.pool.begin().await?;
        for value in individuals {
            let id = IndividualId::new();
            let encoding = serde_json::to_string(&value.encoding)?;
            sqlx::query(
                "INSERT INTO individuals (id, generation_id, encoding, fitness) VALUES (?, ?, ?, ?)",
            )
            .bind(id.to_string())
            .bind(generation_id.to_string())
            .bind(encoding)
            .bind(value.fitness)
            .execute(&mut *tx)
            .await
            .map_err(|e| RepositoryError::Database(format!("Failed to store individual: {}", e)))?;
            ids.push(id);
        }
        tx.commit().await?;
        Ok(ids)
    }

    async fn store_individual_fitness(
        &self,
        individual_id: IndividualId,
        fitness: FitnessScore,
    ) -> Result<(), RepositoryError> {
        let result = sqlx::query("UPDATE individuals SET fitness = ? WHERE id = ?")
            .bind(fitness)
            .bind(individual_id.to_string())
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(RepositoryError::NotFound(format!("individual {individual_id}")));
        }
        Ok(())
    }

    async fn get_individual(&self, id: IndividualId) -> Result<Option<Individual<G>>, RepositoryError> {
        let row = sqlx::query("SELECT id, encoding, fitness FROM individuals WHERE id = ?")
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await?;
        row.map(parse_individual_row).transpose()
    }

    async fn get_population(&self, generation_id: GenerationId) -> Result<Vec<Individual<G>>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT id, encoding, fitness FROM individuals WHERE generation_id = ? ORDER BY seq",
        )
        .bind(generation_id.to_string())
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(parse_individual_row).collect()
    }

    async fn get_non_evaluated_individuals(
        &self,
        generation_id: GenerationId,
    ) -> Result<Vec<Individual<G>>, RepositoryError> {
        let rows = sqlx::query(
            r#"
            SELECT id, encoding, fitness FROM individuals
            WHERE generation_id = ? AND fitness IS NULL
            ORDER BY seq
            "#,
        )
        .bind(generation_id.to_string())
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(parse_individual_row).collect()
    }

    async fn count_generations(&self, experiment_id: ExperimentId) -> Result<u64, RepositoryError> {
        let row = sqlx::query("SELECT COUNT(*) AS count FROM generations WHERE experiment_id = ?")
            .bind(experiment_id.to_string())
            .fetch_one(&self.pool)
            .await?;
        let count: i64 = row.try_get("count")?;
        Ok(count as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    type Repo = SqliteExperimentRepository<Vec<u32>>;

    async fn memory_repo() -> Repo {
        Repo::connect("sqlite::memory:").await.unwrap()
    }

    #[tokio::test]
    async fn test_population_round_trip_keeps_order_and_fitness() {
        let repo = memory_repo().await;
        let (experiment_id, existed) = repo.create_experiment("sorting").await.unwrap();
        assert!(!existed);
        let generation_id = repo.create_generation(experiment_id).await.unwrap();

        let values = vec![
            IndividualValue::new(vec![3, 1, 2]),
            IndividualValue {
                encoding: vec![1, 2, 3],
                fitness: Some(1.0),
            },
        ];
        let ids = repo.store_population(generation_id, &values).await.unwrap();

        let population = repo.get_population(generation_id).await.unwrap();
        assert_eq!(population.len(), 2);
        assert_eq!(population[0].id, ids[0]);
        assert_eq!(population[0].encoding, vec![3, 1, 2]);
        assert_eq!(population[1].fitness, Some(1.0));

        let untested = repo.get_non_evaluated_individuals(generation_id).await.unwrap();
        assert_eq!(untested.len(), 1);

        repo.store_individual_fitness(ids[0], 0.25).await.unwrap();
        assert!(repo
            .get_non_evaluated_individuals(generation_id)
            .await
            .unwrap()
            .is_empty());
        let stored = repo.get_individual(ids[0]).await.unwrap().unwrap();
        assert_eq!(stored.fitness, Some(0.25));
    }

    #[tokio::test]
    async fn test_existing_experiment_is_reported() {
        let repo = memory_repo().await;
        let (first, _) = repo.create_experiment("sorting").await.unwrap();
        let (second, existed) = repo.create_experiment("sorting").await.unwrap();

        assert!(existed);
        assert_eq!(first, second);
        assert!(repo.experiment_exists(first).await.unwrap());
        assert!(!repo.experiment_exists(ExperimentId::new()).await.unwrap());
    }

    #[tokio::test]
    async fn test_latest_generation_follows_insertion_order() {
        let repo = memory_repo().await;
        let (experiment_id, _) = repo.create_experiment("sorting").await.unwrap();

        let mut last = None;
        for _ in 0..3 {
            last = Some(repo.create_generation(experiment_id).await.unwrap());
        }

        assert_eq!(repo.get_latest_generation_id(experiment_id).await.unwrap(), last);
        assert_eq!(repo.count_generations(experiment_id).await.unwrap(), 3);
    }

    #[tokio::test]
    async fn test_missing_rows_are_not_found() {
        let repo = memory_repo().await;

        let err = repo
            .store_individual_fitness(IndividualId::new(), 1.0)
            .await
            .unwrap_err();
        assert!(matches!(err, RepositoryError::NotFound(_)));

        let err = repo.create_generation(ExperimentId::new()).await.unwrap_err();
        assert!(matches!(err, RepositoryError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_file_database_survives_reconnect() {
        let dir = tempfile::tempdir().unwrap();
        let url = format!("sqlite://{}?mode=rwc", dir.path().join("darwin.db").display());

        let experiment_id = {
            let repo = Repo::connect(&url).await.unwrap();
            let (experiment_id, _) = repo.create_experiment("resume").await.unwrap();
            let generation_id = repo.create_generation(experiment_id).await.unwrap();
            repo.store_population(generation_id, &[IndividualValue::new(vec![7])])
                .await
                .unwrap();
            experiment_id
        };

        let repo = Repo::connect(&url).await.unwrap();
        let (resumed, existed) = repo.create_experiment("resume").await.unwrap();
        assert!(existed);
        assert_eq!(resumed, experiment_id);
        let generation_id = repo
            .get_latest_generation_id(experiment_id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(repo.get_population(generation_id).await.unwrap().len(), 1);
    }
}
