// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Experiment
//!
//! Experiment and generation records plus the two user-supplied plug-in
//! seams: the genetic operator (coordinator side) and the evaluator (worker
//! side). Both run on their own tokio task and may be arbitrarily slow.

use super::individual::{ExperimentId, GenerationId, Genome, Individual, IndividualValue};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Experiment {
    pub id: ExperimentId,
    pub name: String,
    pub created_at: DateTime<Utc>,
}

impl Experiment {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: ExperimentId::new(),
            name: name.into(),
            created_at: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Generation {
    pub id: GenerationId,
    pub experiment_id: ExperimentId,
    pub created_at: DateTime<Utc>,
}

impl Generation {
    pub fn new(experiment_id: ExperimentId) -> Self {
        Self {
            id: GenerationId::new(),
            experiment_id,
            created_at: Utc::now(),
        }
    }
}

/// Outcome of one genetic-operator invocation.
#[derive(Debug, Clone, PartialEq)]
pub enum Evolution<G> {
    /// Continue with this population as the next generation.
    Next(Vec<IndividualValue<G>>),
    /// End the experiment.
    Stop,
}

/// Produces the next generation from a fully evaluated one.
#[async_trait]
pub trait GeneticOperator<G: Genome>: Send + Sync {
    /// `generation_number` is the number of generations stored so far,
    /// including the one in `population`.
    async fn apply_genetic_operations(
        &self,
        generation_number: u64,
        population: Vec<IndividualValue<G>>,
    ) -> Evolution<G>;
}

/// Assigns fitness to a batch of individuals.
#[async_trait]
pub trait Evaluator<G: Genome>: Send + Sync {
    /// Return the same individuals with `fitness` filled in. Individuals left
    /// without fitness are not reported upstream.
    async fn evaluate_sample(&self, sample: Vec<Individual<G>>) -> Vec<Individual<G>>;
}
