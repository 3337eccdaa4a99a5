// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Local Experiment Coordinator
//!
//! Worker-side state machine. Accumulates incoming individuals into a local
//! sample of at most `sample_size` entries and hands the sample to the
//! evaluator once it is full, or once the monitor reports that a partial
//! sample has waited longer than `execution_delay`.
//!
//! While a sample is under evaluation the coordinator is busy and admits no
//! new individuals. The runner pauses the inbound queue for that period.

use crate::domain::experiment::Evaluator;
use crate::domain::individual::{Genome, Individual};
use crate::reactive::{EventListener, ObservableScalar};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info};

struct LocalSample<G> {
    individuals: Vec<Individual<G>>,
    iteration_started_at: Option<Instant>,
    busy: bool,
    terminated: bool,
}

impl<G> LocalSample<G> {
    fn is_ready(&self) -> bool {
        !self.busy && !self.individuals.is_empty() && self.iteration_started_at.is_some()
    }

    fn reset(&mut self) {
        self.individuals.clear();
        self.iteration_started_at = None;
    }
}

pub struct LocalExperimentCoordinator<G: Genome> {
    sample_size: usize,
    execution_delay: Duration,
    evaluator: Arc<dyn Evaluator<G>>,
    sample: Mutex<LocalSample<G>>,
    is_busy: ObservableScalar<bool>,
    is_terminated: ObservableScalar<bool>,
    evaluation_complete_listeners: EventListener<Vec<Individual<G>>>,
}

impl<G: Genome> LocalExperimentCoordinator<G> {
    pub fn new(
        sample_size: usize,
        evaluator: Arc<dyn Evaluator<G>>,
        execution_delay: Duration,
    ) -> Arc<Self> {
        Arc::new(Self {
            sample_size,
            execution_delay,
            evaluator,
            sample: Mutex::new(LocalSample {
                individuals: Vec::with_capacity(sample_size),
                iteration_started_at: None,
                busy: false,
                terminated: false,
            }),
            is_busy: ObservableScalar::new(false),
            is_terminated: ObservableScalar::new(false),
            evaluation_complete_listeners: EventListener::new("evaluation_complete"),
        })
    }

    pub fn sample_size(&self) -> usize {
        self.sample_size
    }

    pub fn is_busy(&self) -> &ObservableScalar<bool> {
        &self.is_busy
    }

    pub fn is_terminated(&self) -> &ObservableScalar<bool> {
        &self.is_terminated
    }

    /// Number of individuals in the current local sample.
    pub fn sample_len(&self) -> usize {
        self.sample.lock().individuals.len()
    }

    pub fn add_on_evaluation_complete_listener<F>(&self, listener: F) -> &Self
    where
        F: Fn(&Vec<Individual<G>>) + Send + Sync + 'static,
    {
        self.evaluation_complete_listeners.add_listener(listener);
        self
    }

    /// Admit `individual` into the local sample.
    ///
    /// Returns `false` when the individual was dropped because the
    /// coordinator is busy, terminated or the sample is already full.
    pub fn add_untested_individual(self: &Arc<Self>, individual: Individual<G>) -> bool {
        let full = {
            let mut sample = self.sample.lock();
            if sample.busy || sample.terminated {
                debug!(individual_id = %individual.id, "Dropping individual while busy");
                return false;
            }
            if sample.individuals.len() >= self.sample_size {
                return false;
            }
            sample.individuals.push(individual);
            if sample.iteration_started_at.is_none() {
                sample.iteration_started_at = Some(Instant::now());
            }
            sample.individuals.len() >= self.sample_size
        };
        if full {
            self.execute();
        }
        true
    }

    /// Hand the current sample to the evaluator. No-op unless a non-empty
    /// sample is waiting and the coordinator is idle.
    pub fn execute(self: &Arc<Self>) {
        let batch = {
            let mut sample = self.sample.lock();
            if !sample.is_ready() {
                return;
            }
            sample.busy = true;
            sample.individuals.clone()
        };
        self.is_busy.set(true);
        info!(sample_size = batch.len(), "Evaluating sample");

        let coordinator = Arc::clone(self);
        tokio::spawn(async move {
            let evaluated = coordinator.evaluator.evaluate_sample(batch).await;
            coordinator.complete_evaluation(evaluated);
        });
    }

    /// Whether a partial sample has waited at least `execution_delay`.
    pub fn timeout(&self) -> bool {
        let sample = self.sample.lock();
        if !sample.is_ready() {
            return false;
        }
        sample
            .iteration_started_at
            .is_some_and(|started| started.elapsed() >= self.execution_delay)
    }

    /// Discard the local sample and its timer.
    pub fn reset(&self) {
        self.sample.lock().reset();
    }

    pub fn stop(&self) {
        {
            let mut sample = self.sample.lock();
            sample.terminated = true;
            sample.reset();
        }
        self.is_terminated.set(true);
    }

    fn complete_evaluation(&self, evaluated: Vec<Individual<G>>) {
        {
            let mut sample = self.sample.lock();
            sample.reset();
            sample.busy = false;
        }
        metrics::counter!("darwin_samples_evaluated_total").increment(1);
        debug!(sample_size = evaluated.len(), "Sample evaluated");
        self.is_busy.set(false);
        self.evaluation_complete_listeners.emit(&evaluated);
    }
}
