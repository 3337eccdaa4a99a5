// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Experiment Setup
//!
//! Creates an experiment together with its first generation, or finishes the
//! steps a previous run left undone. A fully initialised experiment is left
//! untouched so the coordinator resumes from its latest generation.
//!
//! # Architecture
//!
//! - **Layer:** Application Layer
//! - **Purpose:** Bring storage into a state the coordinator can attach to

use crate::domain::individual::{ExperimentId, GenerationId, Genome, IndividualValue};
use crate::domain::repository::{ExperimentRepository, RepositoryError};
use std::fmt;
use tracing::{info, warn};

/// First missing initialisation step of an experiment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IntegrityViolation {
    ExperimentNonExistent,
    NoGenerations,
    NoPopulation(GenerationId),
}

impl fmt::Display for IntegrityViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IntegrityViolation::ExperimentNonExistent => write!(f, "experiment does not exist"),
            IntegrityViolation::NoGenerations => write!(f, "experiment has no generation"),
            IntegrityViolation::NoPopulation(id) => write!(f, "generation {id} has no population"),
        }
    }
}

pub struct ExperimentSetup;

impl ExperimentSetup {
    /// Returns the experiment id and whether `initial_population` was stored.
    /// `false` means the experiment resumes from what storage already holds.
    pub async fn setup<G: Genome>(
        name: &str,
        repository: &dyn ExperimentRepository<G>,
        initial_population: &[IndividualValue<G>],
    ) -> Result<(ExperimentId, bool), RepositoryError> {
        let (experiment_id, existed) = repository.create_experiment(name).await?;

        let generation_id = match Self::validate(experiment_id, repository).await? {
            None => {
                info!(experiment = name, experiment_id = %experiment_id, "Resuming experiment");
                return Ok((experiment_id, false));
            }
            Some(IntegrityViolation::ExperimentNonExistent) => {
                return Err(RepositoryError::NotFound(format!("experiment {name}")));
            }
            Some(IntegrityViolation::NoGenerations) => {
                if existed {
                    warn!(experiment_id = %experiment_id, "Experiment has no generation, creating one");
                }
                repository.create_generation(experiment_id).await?
            }
            Some(violation @ IntegrityViolation::NoPopulation(generation_id)) => {
                warn!(experiment_id = %experiment_id, %violation, "Storing initial population");
                generation_id
            }
        };

        repository
            .store_population(generation_id, initial_population)
            .await?;
        info!(
            experiment = name,
            experiment_id = %experiment_id,
            population = initial_population.len(),
            "Initial population stored"
        );
        Ok((experiment_id, true))
    }

    /// First integrity violation of the experiment, if any.
    pub async fn validate<G: Genome>(
        experiment_id: ExperimentId,
        repository: &dyn ExperimentRepository<G>,
    ) -> Result<Option<IntegrityViolation>, RepositoryError> {
        if !repository.experiment_exists(experiment_id).await? {
            return Ok(Some(IntegrityViolation::ExperimentNonExistent));
        }
        let Some(generation_id) = repository.get_latest_generation_id(experiment_id).await? else {
            return Ok(Some(IntegrityViolation::NoGenerations));
        };
        if repository.get_population(generation_id).await?.is_empty() {
            return Ok(Some(IntegrityViolation::NoPopulation(generation_id)));
        }
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::repositories::InMemoryExperimentRepository;

    fn population() -> Vec<IndividualValue<u32>> {
        (0..4).map(IndividualValue::new).collect()
    }

    #[tokio::test]
    async fn test_new_experiment_stores_initial_population() {
        let repository = InMemoryExperimentRepository::<u32>::new();

        let (experiment_id, used) = ExperimentSetup::setup("fresh", &repository, &population())
            .await
            .unwrap();

        assert!(used);
        let generation_id = repository
            .get_latest_generation_id(experiment_id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(repository.get_population(generation_id).await.unwrap().len(), 4);
        assert_eq!(ExperimentSetup::validate(experiment_id, &repository).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_complete_experiment_is_resumed() {
        let repository = InMemoryExperimentRepository::<u32>::new();
        let (first, _) = ExperimentSetup::setup("resume", &repository, &population())
            .await
            .unwrap();

        let (second, used) = ExperimentSetup::setup("resume", &repository, &population())
            .await
            .unwrap();

        assert_eq!(first, second);
        assert!(!used);
        assert_eq!(repository.count_generations(first).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_missing_steps_are_repaired() {
        let repository = InMemoryExperimentRepository::<u32>::new();
        let (experiment_id, _) = repository.create_experiment("broken").await.unwrap();
        assert_eq!(
            ExperimentSetup::validate(experiment_id, &repository).await.unwrap(),
            Some(IntegrityViolation::NoGenerations)
        );
        let generation_id = repository.create_generation(experiment_id).await.unwrap();
        assert_eq!(
            ExperimentSetup::validate(experiment_id, &repository).await.unwrap(),
            Some(IntegrityViolation::NoPopulation(generation_id))
        );

        let (_, used) = ExperimentSetup::setup("broken", &repository, &population())
            .await
            .unwrap();

        assert!(used);
        assert_eq!(repository.count_generations(experiment_id).await.unwrap(), 1);
        assert_eq!(repository.get_population(generation_id).await.unwrap().len(), 4);
    }

    #[tokio::test]
    async fn test_unknown_experiment_is_reported() {
        let repository = InMemoryExperimentRepository::<u32>::new();
        assert_eq!(
            ExperimentSetup::validate(ExperimentId::new(), &repository)
                .await
                .unwrap(),
            Some(IntegrityViolation::ExperimentNonExistent)
        );
    }
}
