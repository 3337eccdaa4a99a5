// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Individual
//!
//! One candidate solution: an opaque genome encoding plus an optional fitness
//! score. The coordinator creates individuals without fitness when it stages a
//! generation; workers rebuild them from wire messages.
//!
//! The genome is opaque to the orchestration layer. Any serde-serializable
//! type works, since encodings travel as JSON on the wire and in storage.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

pub type FitnessScore = f64;

/// Marker for genome encodings the orchestrator can carry around.
pub trait Genome: Clone + fmt::Debug + Send + Sync + Serialize + DeserializeOwned + 'static {}

impl<T> Genome for T where T: Clone + fmt::Debug + Send + Sync + Serialize + DeserializeOwned + 'static {}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct IndividualId(pub Uuid);

impl IndividualId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn from_string(s: &str) -> Result<Self, uuid::Error> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

impl Default for IndividualId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for IndividualId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct GenerationId(pub Uuid);

impl GenerationId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn from_string(s: &str) -> Result<Self, uuid::Error> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

impl Default for GenerationId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for GenerationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ExperimentId(pub Uuid);

impl ExperimentId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn from_string(s: &str) -> Result<Self, uuid::Error> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

impl Default for ExperimentId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ExperimentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A stored individual, identified within its generation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Individual<G> {
    pub id: IndividualId,
    pub encoding: G,
    pub fitness: Option<FitnessScore>,
}

impl<G> Individual<G> {
    pub fn new(id: IndividualId, encoding: G) -> Self {
        Self {
            id,
            encoding,
            fitness: None,
        }
    }

    pub fn is_evaluated(&self) -> bool {
        self.fitness.is_some()
    }

    pub fn with_fitness(mut self, fitness: FitnessScore) -> Self {
        self.fitness = Some(fitness);
        self
    }
}

/// Identity-free individual, as produced by genetic operators before storage
/// assigns ids.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndividualValue<G> {
    pub encoding: G,
    pub fitness: Option<FitnessScore>,
}

impl<G> IndividualValue<G> {
    pub fn new(encoding: G) -> Self {
        Self {
            encoding,
            fitness: None,
        }
    }
}

impl<G> From<Individual<G>> for IndividualValue<G> {
    fn from(individual: Individual<G>) -> Self {
        Self {
            encoding: individual.encoding,
            fitness: individual.fitness,
        }
    }
}
