// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Experiment Coordinator
//!
//! Coordinator-side state machine. Owns the authoritative generation
//! progression for one experiment and tracks which individuals of the current
//! generation are still waiting for a fitness result (the pending set).
//!
//! ## Phases
//!
//! ```text
//! Idle ──(pending set empties)──▶ Staging ──(operator: Next)──▶ Idle
//!                                    │
//!                                    ├──(storage error)──▶ Idle, pending empty
//!                                    └──(operator: Stop)──▶ Terminated
//! ```
//!
//! An idle coordinator with nothing pending is stalled;
//! `recover_stalled_generation` restarts it from storage.
//!
//! The phase lives behind the same lock as the pending set, so applying a
//! result, checking the timeout and staging a generation never interleave.
//! `is_busy` mirrors `phase == Staging` for observers.
//!
//! The pending set is a cache of storage: it is rebuilt from
//! `get_non_evaluated_individuals` whenever the current generation changes.

use crate::domain::experiment::{Evolution, GeneticOperator};
use crate::domain::individual::{
    ExperimentId, FitnessScore, GenerationId, Genome, Individual, IndividualId, IndividualValue,
};
use crate::domain::repository::{ExperimentRepository, RepositoryError};
use crate::reactive::{EventListener, ObservableScalar};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, MutexGuard};
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

/// Individuals of one generation, as handed to coordinator listeners.
#[derive(Debug, Clone)]
pub struct GenerationSample<G> {
    pub generation_id: GenerationId,
    pub individuals: Vec<Individual<G>>,
}

/// What happened to a fitness report.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FitnessOutcome {
    /// Unknown, duplicate or late report.
    Ignored,
    Recorded { remaining: usize },
    /// Last pending result; staging of the next generation has started.
    GenerationCompleted,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Idle,
    Staging,
    Terminated,
}

struct State {
    generation_id: GenerationId,
    pending: HashSet<IndividualId>,
    latest_result_at: Option<Instant>,
    phase: Phase,
}

pub struct ExperimentCoordinator<G: Genome> {
    experiment_id: ExperimentId,
    repository: Arc<dyn ExperimentRepository<G>>,
    operator: Arc<dyn GeneticOperator<G>>,
    max_time_between_results: Duration,
    state: Mutex<State>,
    is_busy: ObservableScalar<bool>,
    is_terminated: ObservableScalar<bool>,
    testing_sample_listeners: EventListener<GenerationSample<G>>,
    population_evaluated_listeners: EventListener<GenerationSample<G>>,
}

impl<G: Genome> ExperimentCoordinator<G> {
    /// Attach to the latest generation of `experiment_id` and load its
    /// pending set.
    pub async fn new(
        experiment_id: ExperimentId,
        repository: Arc<dyn ExperimentRepository<G>>,
        operator: Arc<dyn GeneticOperator<G>>,
        max_time_between_results: Duration,
    ) -> Result<Arc<Self>, RepositoryError> {
        let generation_id = repository
            .get_latest_generation_id(experiment_id)
            .await?
            .ok_or_else(|| {
                RepositoryError::NotFound(format!("no generation for experiment {experiment_id}"))
            })?;

        let coordinator = Arc::new(Self {
            experiment_id,
            repository,
            operator,
            max_time_between_results,
            state: Mutex::new(State {
                generation_id,
                pending: HashSet::new(),
                latest_result_at: None,
                phase: Phase::Idle,
            }),
            is_busy: ObservableScalar::new(false),
            is_terminated: ObservableScalar::new(false),
            testing_sample_listeners: EventListener::new("testing_sample_selected"),
            population_evaluated_listeners: EventListener::new("population_evaluated"),
        });

        {
            let mut state = coordinator.state.lock().await;
            let pending = coordinator.sync_untested_individuals(&mut state).await?;
            info!(
                experiment_id = %experiment_id,
                generation_id = %generation_id,
                pending = pending.len(),
                "Experiment coordinator attached"
            );
        }

        Ok(coordinator)
    }

    pub fn experiment_id(&self) -> ExperimentId {
        self.experiment_id
    }

    pub fn is_busy(&self) -> &ObservableScalar<bool> {
        &self.is_busy
    }

    pub fn is_terminated(&self) -> &ObservableScalar<bool> {
        &self.is_terminated
    }

    pub async fn generation_id(&self) -> GenerationId {
        self.state.lock().await.generation_id
    }

    pub async fn pending_count(&self) -> usize {
        self.state.lock().await.pending.len()
    }

    /// Number of generations stored for this experiment, the current one
    /// included.
    pub async fn generation_number(&self) -> Result<u64, RepositoryError> {
        self.repository.count_generations(self.experiment_id).await
    }

    /// Re-derive the pending set from storage and return the untested
    /// individuals of the current generation.
    pub async fn untested_individuals(&self) -> Result<GenerationSample<G>, RepositoryError> {
        let mut state = self.state.lock().await;
        let individuals = self.sync_untested_individuals(&mut state).await?;
        Ok(GenerationSample {
            generation_id: state.generation_id,
            individuals,
        })
    }

    pub fn add_on_testing_sample_selected_listener<F>(&self, listener: F) -> &Self
    where
        F: Fn(&GenerationSample<G>) + Send + Sync + 'static,
    {
        self.testing_sample_listeners.add_listener(listener);
        self
    }

    pub fn add_on_population_evaluated_listener<F>(&self, listener: F) -> &Self
    where
        F: Fn(&GenerationSample<G>) + Send + Sync + 'static,
    {
        self.population_evaluated_listeners.add_listener(listener);
        self
    }

    /// Apply one fitness result.
    ///
    /// Reports for individuals outside the pending set, or arriving while a
    /// generation is being staged, are dropped. Resend recovers the latter.
    pub async fn add_individual_fitness(
        self: &Arc<Self>,
        individual_id: IndividualId,
        fitness: FitnessScore,
    ) -> Result<FitnessOutcome, RepositoryError> {
        let mut state = self.state.lock().await;
        if state.phase != Phase::Idle || !state.pending.contains(&individual_id) {
            debug!(
                individual_id = %individual_id,
                phase = ?state.phase,
                "Dropping stale or duplicate fitness report"
            );
            metrics::counter!("darwin_results_dropped_total").increment(1);
            return Ok(FitnessOutcome::Ignored);
        }

        self.repository
            .store_individual_fitness(individual_id, fitness)
            .await?;
        state.pending.remove(&individual_id);
        state.latest_result_at = Some(Instant::now());

        let remaining = state.pending.len();
        metrics::counter!("darwin_results_applied_total").increment(1);
        metrics::gauge!("darwin_pending_individuals").set(remaining as f64);
        debug!(individual_id = %individual_id, fitness, remaining, "Fitness recorded");

        if remaining == 0 {
            self.stage_new_generation(&mut state).await?;
            return Ok(FitnessOutcome::GenerationCompleted);
        }
        Ok(FitnessOutcome::Recorded { remaining })
    }

    /// Whether the still-pending sample should be resent.
    ///
    /// The first call after a generation starts without any result only arms
    /// the timer. `undelivered` is the broker's count of queued individuals;
    /// nothing is resent while messages are still in flight.
    pub async fn timeout(&self, undelivered: usize) -> bool {
        let mut state = self.state.lock().await;
        if state.phase != Phase::Idle || state.pending.is_empty() {
            return false;
        }
        match state.latest_result_at {
            None => {
                state.latest_result_at = Some(Instant::now());
                false
            }
            Some(latest) => latest.elapsed() >= self.max_time_between_results && undelivered == 0,
        }
    }

    /// Terminate the experiment. Monotonic: the coordinator never leaves the
    /// terminated phase.
    pub async fn stop(&self) {
        {
            let mut state = self.state.lock().await;
            state.phase = Phase::Terminated;
            state.pending.clear();
            state.latest_result_at = None;
        }
        metrics::gauge!("darwin_pending_individuals").set(0.0);
        info!(experiment_id = %self.experiment_id, "Experiment coordinator stopped");
        self.is_terminated.set(true);
        self.is_busy.set(false);
    }

    /// Persist `individuals` as the next generation and publish its untested
    /// sample.
    ///
    /// On a storage failure the coordinator falls back to `Idle` so that
    /// [`recover_stalled_generation`](Self::recover_stalled_generation) can
    /// pick the experiment up again.
    pub async fn start_new_generation(
        self: &Arc<Self>,
        individuals: Vec<IndividualValue<G>>,
    ) -> Result<(), RepositoryError> {
        let mut state = self.state.lock().await;
        if state.phase == Phase::Terminated {
            debug!("Ignoring new generation for a terminated experiment");
            return Ok(());
        }

        let sample = match self.persist_generation(&mut state, &individuals).await {
            Ok(Some(sample)) => sample,
            Ok(None) => return Ok(()),
            Err(e) => {
                self.abort_staging(&mut state);
                return Err(e);
            }
        };

        state.phase = Phase::Idle;
        drop(state);

        self.testing_sample_listeners.emit(&sample);
        self.is_busy.set(false);
        Ok(())
    }

    /// Get an idle coordinator with an empty pending set moving again.
    ///
    /// That state is only reachable when staging or starting a generation
    /// failed part way, or when attaching to a generation that was fully
    /// evaluated but never staged. A generation with untested individuals has
    /// its sample published again; a fully evaluated one is staged. Returns
    /// whether anything was done.
    pub async fn recover_stalled_generation(self: &Arc<Self>) -> Result<bool, RepositoryError> {
        let mut state = self.state.lock().await;
        if state.phase != Phase::Idle || !state.pending.is_empty() {
            return Ok(false);
        }

        let untested = self.sync_untested_individuals(&mut state).await?;
        let generation_id = state.generation_id;
        if untested.is_empty() {
            warn!(
                generation_id = %generation_id,
                "Generation is fully evaluated but was never staged, staging it"
            );
            self.stage_new_generation(&mut state).await?;
            return Ok(true);
        }

        warn!(
            generation_id = %generation_id,
            untested = untested.len(),
            "Generation start was interrupted, publishing its sample again"
        );
        state.latest_result_at = Some(Instant::now());
        drop(state);
        self.testing_sample_listeners.emit(&GenerationSample {
            generation_id,
            individuals: untested,
        });
        Ok(true)
    }

    /// Store the new generation and load its untested sample. `None` means
    /// the generation needed no evaluation and was staged again.
    async fn persist_generation(
        self: &Arc<Self>,
        state: &mut MutexGuard<'_, State>,
        individuals: &[IndividualValue<G>],
    ) -> Result<Option<GenerationSample<G>>, RepositoryError> {
        let generation_id = self.repository.create_generation(self.experiment_id).await?;
        self.repository
            .store_population(generation_id, individuals)
            .await?;
        state.generation_id = generation_id;

        let sample = self.sync_untested_individuals(state).await?;
        state.latest_result_at = Some(Instant::now());
        metrics::counter!("darwin_generations_staged_total").increment(1);
        info!(
            experiment_id = %self.experiment_id,
            generation_id = %generation_id,
            population = individuals.len(),
            untested = sample.len(),
            "New generation started"
        );

        if sample.is_empty() {
            warn!(
                generation_id = %generation_id,
                "New generation is already fully evaluated, staging again"
            );
            self.stage_new_generation(state).await?;
            return Ok(None);
        }

        Ok(Some(GenerationSample {
            generation_id,
            individuals: sample,
        }))
    }

    async fn stage_new_generation(
        self: &Arc<Self>,
        state: &mut MutexGuard<'_, State>,
    ) -> Result<(), RepositoryError> {
        state.phase = Phase::Staging;
        self.is_busy.set(true);

        let generation_id = state.generation_id;
        let staged = async {
            let population = self.repository.get_population(generation_id).await?;
            let generation_number = self.repository.count_generations(self.experiment_id).await?;
            Ok::<_, RepositoryError>((population, generation_number))
        }
        .await;
        let (population, generation_number) = match staged {
            Ok(staged) => staged,
            Err(e) => {
                self.abort_staging(state);
                return Err(e);
            }
        };

        self.population_evaluated_listeners.emit(&GenerationSample {
            generation_id,
            individuals: population.clone(),
        });
        info!(
            generation_id = %generation_id,
            generation_number,
            population = population.len(),
            "Population evaluated, applying genetic operations"
        );

        let values = population.into_iter().map(IndividualValue::from).collect();
        self.spawn_evolution(generation_number, values);
        Ok(())
    }

    fn abort_staging(&self, state: &mut State) {
        if state.phase == Phase::Terminated {
            return;
        }
        warn!(
            experiment_id = %self.experiment_id,
            generation_id = %state.generation_id,
            "Staging failed, coordinator is idle until the generation is recovered"
        );
        state.phase = Phase::Idle;
        self.is_busy.set(false);
    }

    /// Run the genetic operator off the coordination path.
    fn spawn_evolution(self: &Arc<Self>, generation_number: u64, population: Vec<IndividualValue<G>>) {
        let coordinator = Arc::clone(self);
        tokio::spawn(async move {
            let evolution = coordinator
                .operator
                .apply_genetic_operations(generation_number, population)
                .await;
            match evolution {
                Evolution::Next(individuals) => {
                    if let Err(e) = coordinator.start_new_generation(individuals).await {
                        error!(
                            experiment_id = %coordinator.experiment_id,
                            error = %e,
                            "Failed to start new generation"
                        );
                    }
                }
                Evolution::Stop => coordinator.stop().await,
            }
        });
    }

    async fn sync_untested_individuals(
        &self,
        state: &mut State,
    ) -> Result<Vec<Individual<G>>, RepositoryError> {
        let untested = self
            .repository
            .get_non_evaluated_individuals(state.generation_id)
            .await?;
        state.pending.clear();
        state.pending.extend(untested.iter().map(|individual| individual.id));
        metrics::gauge!("darwin_pending_individuals").set(state.pending.len() as f64);
        Ok(untested)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::repositories::InMemoryExperimentRepository;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::sync::mpsc;

    type TestGenome = Vec<u8>;

    /// Returns a fresh population of `size` on every call, or stops after
    /// `stop_after` calls.
    struct CountingOperator {
        calls: AtomicUsize,
        size: usize,
        stop_after: usize,
    }

    impl CountingOperator {
        fn new(size: usize, stop_after: usize) -> Arc<Self> {
            Arc::new(Self {
                calls: AtomicUsize::new(0),
                size,
                stop_after,
            })
        }
    }

    #[async_trait]
    impl GeneticOperator<TestGenome> for CountingOperator {
        async fn apply_genetic_operations(
            &self,
            _generation_number: u64,
            _population: Vec<IndividualValue<TestGenome>>,
        ) -> Evolution<TestGenome> {
            let calls = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            if calls >= self.stop_after {
                return Evolution::Stop;
            }
            Evolution::Next((0..self.size).map(|i| IndividualValue::new(vec![i as u8])).collect())
        }
    }

    async fn setup(
        population: usize,
        operator: Arc<CountingOperator>,
        max_time: Duration,
    ) -> (
        Arc<ExperimentCoordinator<TestGenome>>,
        Arc<InMemoryExperimentRepository<TestGenome>>,
        Vec<IndividualId>,
    ) {
        let repository = Arc::new(InMemoryExperimentRepository::<TestGenome>::new());
        let (experiment_id, _) = repository.create_experiment("test").await.unwrap();
        let generation_id = repository.create_generation(experiment_id).await.unwrap();
        let values: Vec<_> = (0..population).map(|i| IndividualValue::new(vec![i as u8])).collect();
        let ids = repository.store_population(generation_id, &values).await.unwrap();

        let coordinator = ExperimentCoordinator::new(
            experiment_id,
            repository.clone(),
            operator,
            max_time,
        )
        .await
        .unwrap();
        (coordinator, repository, ids)
    }

    /// In-memory storage that fails the next `get_population` or
    /// `store_population` calls on demand.
    struct FlakyRepository {
        inner: InMemoryExperimentRepository<TestGenome>,
        population_failures: AtomicUsize,
        store_failures: AtomicUsize,
    }

    impl FlakyRepository {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                inner: InMemoryExperimentRepository::new(),
                population_failures: AtomicUsize::new(0),
                store_failures: AtomicUsize::new(0),
            })
        }

        fn take_failure(counter: &AtomicUsize) -> Result<(), RepositoryError> {
            let failed = counter
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok();
            if failed {
                return Err(RepositoryError::Database("transient".to_string()));
            }
            Ok(())
        }
    }

    #[async_trait]
    impl ExperimentRepository<TestGenome> for FlakyRepository {
        async fn create_experiment(&self, name: &str) -> Result<(ExperimentId, bool), RepositoryError> {
            self.inner.create_experiment(name).await
        }

        async fn experiment_exists(&self, id: ExperimentId) -> Result<bool, RepositoryError> {
            self.inner.experiment_exists(id).await
        }

        async fn get_experiment_id(&self, name: &str) -> Result<Option<ExperimentId>, RepositoryError> {
            self.inner.get_experiment_id(name).await
        }

        async fn create_generation(&self, experiment_id: ExperimentId) -> Result<GenerationId, RepositoryError> {
            self.inner.create_generation(experiment_id).await
        }

        async fn get_latest_generation_id(
            &self,
            experiment_id: ExperimentId,
        ) -> Result<Option<GenerationId>, RepositoryError> {
            self.inner.get_latest_generation_id(experiment_id).await
        }

        async fn store_population(
            &self,
            generation_id: GenerationId,
            individuals: &[IndividualValue<TestGenome>],
        ) -> Result<Vec<IndividualId>, RepositoryError> {
            Self::take_failure(&self.store_failures)?;
            self.inner.store_population(generation_id, individuals).await
        }

        async fn store_individual_fitness(
            &self,
            individual_id: IndividualId,
            fitness: FitnessScore,
        ) -> Result<(), RepositoryError> {
            self.inner.store_individual_fitness(individual_id, fitness).await
        }

        async fn get_individual(&self, id: IndividualId) -> Result<Option<Individual<TestGenome>>, RepositoryError> {
            self.inner.get_individual(id).await
        }

        async fn get_population(
            &self,
            generation_id: GenerationId,
        ) -> Result<Vec<Individual<TestGenome>>, RepositoryError> {
            Self::take_failure(&self.population_failures)?;
            self.inner.get_population(generation_id).await
        }

        async fn get_non_evaluated_individuals(
            &self,
            generation_id: GenerationId,
        ) -> Result<Vec<Individual<TestGenome>>, RepositoryError> {
            self.inner.get_non_evaluated_individuals(generation_id).await
        }

        async fn count_generations(&self, experiment_id: ExperimentId) -> Result<u64, RepositoryError> {
            self.inner.count_generations(experiment_id).await
        }
    }

    async fn flaky_setup(
        operator: Arc<CountingOperator>,
    ) -> (
        Arc<ExperimentCoordinator<TestGenome>>,
        Arc<FlakyRepository>,
        Vec<IndividualId>,
    ) {
        let repository = FlakyRepository::new();
        let (experiment_id, _) = repository.create_experiment("flaky").await.unwrap();
        let generation_id = repository.create_generation(experiment_id).await.unwrap();
        let ids = repository
            .store_population(generation_id, &[IndividualValue::new(vec![7])])
            .await
            .unwrap();

        let coordinator =
            ExperimentCoordinator::new(experiment_id, repository.clone(), operator, Duration::from_secs(60))
                .await
                .unwrap();
        (coordinator, repository, ids)
    }

    #[tokio::test]
    async fn test_unknown_individual_is_ignored() {
        let (coordinator, repository, ids) =
            setup(2, CountingOperator::new(2, 10), Duration::from_secs(60)).await;

        let outcome = coordinator
            .add_individual_fitness(IndividualId::new(), 1.0)
            .await
            .unwrap();

        assert_eq!(outcome, FitnessOutcome::Ignored);
        assert_eq!(coordinator.pending_count().await, 2);
        for id in ids {
            let stored = repository.get_individual(id).await.unwrap().unwrap();
            assert_eq!(stored.fitness, None);
        }
    }

    #[tokio::test]
    async fn test_duplicate_report_does_not_overwrite_fitness() {
        let (coordinator, repository, ids) =
            setup(2, CountingOperator::new(2, 10), Duration::from_secs(60)).await;

        let first = coordinator.add_individual_fitness(ids[0], 1.0).await.unwrap();
        let second = coordinator.add_individual_fitness(ids[0], 9.0).await.unwrap();

        assert_eq!(first, FitnessOutcome::Recorded { remaining: 1 });
        assert_eq!(second, FitnessOutcome::Ignored);
        let stored = repository.get_individual(ids[0]).await.unwrap().unwrap();
        assert_eq!(stored.fitness, Some(1.0));
    }

    #[tokio::test]
    async fn test_completed_generation_is_staged_exactly_once() {
        let operator = CountingOperator::new(3, 10);
        let (coordinator, _repository, ids) =
            setup(2, operator.clone(), Duration::from_secs(60)).await;
        let first_generation = coordinator.generation_id().await;

        let (tx, mut rx) = mpsc::unbounded_channel();
        coordinator.add_on_testing_sample_selected_listener(move |sample| {
            let _ = tx.send(sample.clone());
        });
        let evaluated = Arc::new(AtomicUsize::new(0));
        let counter = evaluated.clone();
        coordinator.add_on_population_evaluated_listener(move |sample| {
            counter.fetch_add(sample.individuals.len(), Ordering::SeqCst);
        });

        coordinator.add_individual_fitness(ids[0], 1.0).await.unwrap();
        let outcome = coordinator.add_individual_fitness(ids[1], 2.0).await.unwrap();
        assert_eq!(outcome, FitnessOutcome::GenerationCompleted);

        // late duplicates while staging or after must not stage again
        coordinator.add_individual_fitness(ids[1], 2.0).await.unwrap();

        let sample = rx.recv().await.unwrap();
        assert_eq!(sample.individuals.len(), 3);
        assert_ne!(sample.generation_id, first_generation);
        assert_eq!(coordinator.generation_id().await, sample.generation_id);
        assert_eq!(coordinator.pending_count().await, 3);
        assert!(!coordinator.is_busy().get());
        assert_eq!(operator.calls.load(Ordering::SeqCst), 1);
        assert_eq!(evaluated.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_operator_stop_terminates_coordinator() {
        let (coordinator, _repository, ids) =
            setup(1, CountingOperator::new(1, 1), Duration::from_secs(60)).await;

        let (tx, mut rx) = mpsc::unbounded_channel();
        coordinator.is_terminated().observe(
            move |terminated, _| {
                if *terminated {
                    let _ = tx.send(());
                }
            },
            false,
        );

        coordinator.add_individual_fitness(ids[0], 1.0).await.unwrap();
        rx.recv().await.unwrap();

        assert!(coordinator.is_terminated().get());
        assert!(!coordinator.is_busy().get());
        assert_eq!(coordinator.pending_count().await, 0);
        assert!(!coordinator.timeout(0).await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_requires_grace_elapsed_delay_and_drained_queue() {
        let max_time = Duration::from_secs(30);
        let (coordinator, _repository, ids) =
            setup(2, CountingOperator::new(2, 10), max_time).await;

        // first check only arms the timer
        assert!(!coordinator.timeout(0).await);

        tokio::time::advance(max_time - Duration::from_secs(1)).await;
        assert!(!coordinator.timeout(0).await);

        tokio::time::advance(Duration::from_secs(1)).await;
        assert!(!coordinator.timeout(1).await);
        assert!(coordinator.timeout(0).await);

        // a new result refreshes the timer
        coordinator.add_individual_fitness(ids[0], 1.0).await.unwrap();
        assert!(!coordinator.timeout(0).await);
    }

    #[tokio::test]
    async fn test_untested_individuals_resyncs_from_storage() {
        let (coordinator, repository, ids) =
            setup(3, CountingOperator::new(3, 10), Duration::from_secs(60)).await;

        // fitness written behind the coordinator's back
        repository.store_individual_fitness(ids[0], 4.0).await.unwrap();

        let sample = coordinator.untested_individuals().await.unwrap();
        assert_eq!(sample.individuals.len(), 2);
        assert_eq!(coordinator.pending_count().await, 2);
        assert!(sample.individuals.iter().all(|i| i.id != ids[0]));
    }

    #[tokio::test]
    async fn test_failed_staging_is_recovered() {
        let (coordinator, repository, ids) = flaky_setup(CountingOperator::new(2, 10)).await;
        let first_generation = coordinator.generation_id().await;
        let (tx, mut rx) = mpsc::unbounded_channel();
        coordinator.add_on_testing_sample_selected_listener(move |sample| {
            let _ = tx.send(sample.clone());
        });

        repository.population_failures.store(1, Ordering::SeqCst);
        let result = coordinator.add_individual_fitness(ids[0], 1.0).await;
        assert!(matches!(result, Err(RepositoryError::Database(_))));

        // back to idle with nothing pending, so results and timeouts do nothing
        assert!(!coordinator.is_busy().get());
        assert_eq!(coordinator.pending_count().await, 0);
        assert!(!coordinator.timeout(0).await);
        assert_eq!(
            coordinator.add_individual_fitness(ids[0], 1.0).await.unwrap(),
            FitnessOutcome::Ignored
        );

        assert!(coordinator.recover_stalled_generation().await.unwrap());

        let sample = tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_ne!(sample.generation_id, first_generation);
        assert_eq!(sample.individuals.len(), 2);
        assert_eq!(coordinator.pending_count().await, 2);
        assert!(!coordinator.recover_stalled_generation().await.unwrap());
    }

    #[tokio::test]
    async fn test_failed_generation_start_is_recovered() {
        let operator = CountingOperator::new(3, 10);
        let (coordinator, repository, ids) = flaky_setup(operator.clone()).await;
        let (tx, mut rx) = mpsc::unbounded_channel();
        coordinator.add_on_testing_sample_selected_listener(move |sample| {
            let _ = tx.send(sample.clone());
        });

        repository.store_failures.store(1, Ordering::SeqCst);
        let outcome = coordinator.add_individual_fitness(ids[0], 1.0).await.unwrap();
        assert_eq!(outcome, FitnessOutcome::GenerationCompleted);

        // the spawned generation start fails and leaves the coordinator idle
        tokio::time::timeout(Duration::from_secs(5), async {
            while coordinator.is_busy().get() {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();
        assert_eq!(operator.calls.load(Ordering::SeqCst), 1);
        assert!(rx.try_recv().is_err());

        assert!(coordinator.recover_stalled_generation().await.unwrap());

        let sample = tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(sample.individuals.len(), 3);
        assert_eq!(operator.calls.load(Ordering::SeqCst), 2);
        assert!(!coordinator.is_busy().get());
    }

    #[tokio::test]
    async fn test_active_generation_is_not_recovered() {
        let (coordinator, _repository, _ids) =
            setup(2, CountingOperator::new(2, 10), Duration::from_secs(60)).await;

        assert!(!coordinator.recover_stalled_generation().await.unwrap());
        assert_eq!(coordinator.pending_count().await, 2);
    }
}
