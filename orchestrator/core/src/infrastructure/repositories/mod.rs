// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Repository Implementations
//!
//! Infrastructure implementations of [`ExperimentRepository`].
//!
//! # Architecture
//!
//! - **Layer:** Infrastructure
//! - **Purpose:** Persist and retrieve experiments, generations and individuals
//! - **Pattern:** Repository (DDD), Adapter (Hexagonal Architecture)
//!
//! # Available Implementations
//!
//! - **InMemoryExperimentRepository** - one lock over in-process maps, for
//!   tests and single-process runs
//! - **SqliteExperimentRepository** - sqlx-backed, survives restarts so an
//!   experiment can be resumed

pub mod sqlite;

pub use sqlite::SqliteExperimentRepository;

use crate::domain::experiment::{Experiment, Generation};
use crate::domain::individual::{
    ExperimentId, FitnessScore, GenerationId, Genome, Individual, IndividualId, IndividualValue,
};
use crate::domain::repository::{ExperimentRepository, RepositoryError};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;

struct Store<G> {
    experiments: HashMap<ExperimentId, Experiment>,
    /// Generations per experiment, oldest first.
    generations: HashMap<ExperimentId, Vec<Generation>>,
    /// Individual ids per generation, in insertion order.
    populations: HashMap<GenerationId, Vec<IndividualId>>,
    individuals: HashMap<IndividualId, Individual<G>>,
}

#[derive(Clone)]
pub struct InMemoryExperimentRepository<G> {
    store: Arc<Mutex<Store<G>>>,
}

impl<G> InMemoryExperimentRepository<G> {
    pub fn new() -> Self {
        Self {
            store: Arc::new(Mutex::new(Store {
                experiments: HashMap::new(),
                generations: HashMap::new(),
                populations: HashMap::new(),
                individuals: HashMap::new(),
            })),
        }
    }
}

impl<G> Default for InMemoryExperimentRepository<G> {
    fn default() -> Self {
        Self::new()
    }
}

impl<G: Clone> Store<G> {
    fn population(&self, generation_id: GenerationId) -> Vec<Individual<G>> {
        self.populations
            .get(&generation_id)
            .map(|ids| {
                ids.iter()
                    .filter_map(|id| self.individuals.get(id).cloned())
                    .collect()
            })
            .unwrap_or_default()
    }
}

#[async_trait]
impl<G: Genome> ExperimentRepository<G> for InMemoryExperimentRepository<G> {
    async fn create_experiment(&self, name: &str) -> Result<(ExperimentId, bool), RepositoryError> {
        let mut store = self.store.lock();
        if let Some(existing) = store.experiments.values().find(|e| e.name == name) {
            return Ok((existing.id, true));
        }
        let experiment = Experiment::new(name);
        let id = experiment.id;
        store.experiments.insert(id, experiment);
        store.generations.insert(id, Vec::new());
        Ok((id, false))
    }

    async fn experiment_exists(&self, id: ExperimentId) -> Result<bool, RepositoryError> {
        Ok(self.store.lock().experiments.contains_key(&id))
    }

    async fn get_experiment_id(&self, name: &str) -> Result<Option<ExperimentId>, RepositoryError> {
        let store = self.store.lock();
        Ok(store
            .experiments
            .values()
            .find(|e| e.name == name)
            .map(|e| e.id))
    }

    async fn create_generation(&self, experiment_id: ExperimentId) -> Result<GenerationId, RepositoryError> {
        let mut store = self.store.lock();
        let generations = store
            .generations
            .get_mut(&experiment_id)
            .ok_or_else(|| RepositoryError::NotFound(format!("experiment {experiment_id}")))?;
        let generation = Generation::new(experiment_id);
        let id = generation.id;
        generations.push(generation);
        store.populations.insert(id, Vec::new());
        Ok(id)
    }

    async fn get_latest_generation_id(
        &self,
        experiment_id: ExperimentId,
    ) -> Result<Option<GenerationId>, RepositoryError> {
        let store = self.store.lock();
        Ok(store
            .generations
            .get(&experiment_id)
            .and_then(|generations| generations.last())
            .map(|generation| generation.id))
    }

    async fn store_population(
        &self,
        generation_id: GenerationId,
        individuals: &[IndividualValue<G>],
    ) -> Result<Vec<IndividualId>, RepositoryError> {
        let mut store = self.store.lock();
        if !store.populations.contains_key(&generation_id) {
            return Err(RepositoryError::NotFound(format!("generation {generation_id}")));
        }

        let mut ids = Vec::with_capacity(individuals.len());
        for value in individuals {
            let id = IndividualId::new();
            store.individuals.insert(
                id,
                Individual {
                    id,
                    encoding: value.encoding.clone(),
                    fitness: value.fitness,
                },
            );
            ids.push(id);
        }
        if let Some(population) = store.populations.get_mut(&generation_id) {
            population.extend(ids.iter().copied());
        }
        Ok(ids)
    }

    async fn store_individual_fitness(
        &self,
        individual_id: IndividualId,
        fitness: FitnessScore,
    ) -> Result<(), RepositoryError> {
        let mut store = self.store.lock();
        let individual = store
            .individuals
            .get_mut(&individual_id)
            .ok_or_else(|| RepositoryError::NotFound(format!("individual {individual_id}")))?;
        individual.fitness = Some(fitness);
        Ok(())
    }

    async fn get_individual(&self, id: IndividualId) -> Result<Option<Individual<G>>, RepositoryError> {
        Ok(self.store.lock().individuals.get(&id).cloned())
    }

    async fn get_population(&self, generation_id: GenerationId) -> Result<Vec<Individual<G>>, RepositoryError> {
        Ok(self.store.lock().population(generation_id))
    }

    async fn get_non_evaluated_individuals(
        &self,
        generation_id: GenerationId,
    ) -> Result<Vec<Individual<G>>, RepositoryError> {
        let mut population = self.store.lock().population(generation_id);
        population.retain(|individual| !individual.is_evaluated());
        Ok(population)
    }

    async fn count_generations(&self, experiment_id: ExperimentId) -> Result<u64, RepositoryError> {
        let store = self.store.lock();
        Ok(store
            .generations
            .get(&experiment_id)
            .map(|generations| generations.len() as u64)
            .unwrap_or(0))
    }
}
