// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

use crate::domain::individual::{ExperimentId, FitnessScore, GenerationId, IndividualId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Progress events published by the coordinator and worker runners.
///
/// `PopulationEvaluated` carries the outgoing generation right before the
/// genetic operator runs, for external snapshotting.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ExperimentEvent {
    SampleDispatched {
        experiment_id: ExperimentId,
        generation_id: GenerationId,
        sample_size: usize,
        dispatched_at: DateTime<Utc>,
    },
    FitnessRecorded {
        experiment_id: ExperimentId,
        individual_id: IndividualId,
        fitness: FitnessScore,
        remaining: usize,
        recorded_at: DateTime<Utc>,
    },
    PopulationEvaluated {
        experiment_id: ExperimentId,
        generation_id: GenerationId,
        population_size: usize,
        best_fitness: Option<FitnessScore>,
        evaluated_at: DateTime<Utc>,
    },
    GenerationStaged {
        experiment_id: ExperimentId,
        generation_id: GenerationId,
        generation_number: u64,
        population_size: usize,
        staged_at: DateTime<Utc>,
    },
    SampleResent {
        experiment_id: ExperimentId,
        generation_id: GenerationId,
        sample_size: usize,
        resent_at: DateTime<Utc>,
    },
    SampleEvaluated {
        experiment_id: ExperimentId,
        worker: String,
        sample_size: usize,
        evaluated_at: DateTime<Utc>,
    },
    ExperimentTerminated {
        experiment_id: ExperimentId,
        terminated_at: DateTime<Utc>,
    },
}

impl ExperimentEvent {
    pub fn experiment_id(&self) -> ExperimentId {
        match self {
            ExperimentEvent::SampleDispatched { experiment_id, .. }
            | ExperimentEvent::FitnessRecorded { experiment_id, .. }
            | ExperimentEvent::PopulationEvaluated { experiment_id, .. }
            | ExperimentEvent::GenerationStaged { experiment_id, .. }
            | ExperimentEvent::SampleResent { experiment_id, .. }
            | ExperimentEvent::SampleEvaluated { experiment_id, .. }
            | ExperimentEvent::ExperimentTerminated { experiment_id, .. } => *experiment_id,
        }
    }
}
