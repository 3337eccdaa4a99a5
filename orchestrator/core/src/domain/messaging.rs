// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Messaging Contracts
//!
//! Transport interfaces between the coordinator and its workers, split by
//! role instead of one monolithic transport:
//!
//! | Trait | Side | Purpose |
//! |-------|------|---------|
//! | [`MessagingControls`] | both | start/stop the underlying consumers |
//! | [`CoordinatorMessageBus`] | coordinator | send individuals, receive results |
//! | [`WorkerMessageBus`] | worker | receive individuals, send results |
//! | [`PubSubPublisher`] | coordinator | broadcast fan-out signals |
//! | [`PubSubSubscriber`] | worker | receive fan-out signals |
//!
//! Point-to-point queues carry one JSON object per individual
//! (`{"id", "encoding"}`) or result (`{"id", "fitness"}`). Messages missing a
//! field are negatively acknowledged and left to the broker's dead-letter
//! policy.

use crate::domain::individual::{ExperimentId, FitnessScore, Genome, Individual, IndividualId};
use crate::reactive::{Listener, Promise};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Coordinator to worker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndividualMessage<G> {
    pub id: IndividualId,
    pub encoding: G,
}

impl<G> From<IndividualMessage<G>> for Individual<G> {
    fn from(message: IndividualMessage<G>) -> Self {
        Individual::new(message.id, message.encoding)
    }
}

/// Worker to coordinator.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FitnessReport {
    pub id: IndividualId,
    pub fitness: FitnessScore,
}

/// Per-experiment broker resource names.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueNames {
    pub individuals: String,
    pub results: String,
    pub new_generation_exchange: String,
    pub termination_exchange: String,
}

impl QueueNames {
    pub fn for_experiment(experiment_id: ExperimentId) -> Self {
        let prefix = format!("ex-{}", experiment_id);
        Self {
            individuals: format!("{prefix}-individuals"),
            results: format!("{prefix}-results"),
            new_generation_exchange: format!("{prefix}-new-generation-signal"),
            termination_exchange: format!("{prefix}-termination-signal"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum MessagingError {
    #[error("Broker error: {0}")]
    Broker(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Transport is not listening")]
    NotListening,

    #[error("Transport stopped")]
    Stopped,
}

impl From<serde_json::Error> for MessagingError {
    fn from(err: serde_json::Error) -> Self {
        MessagingError::Serialization(err.to_string())
    }
}

#[async_trait]
pub trait MessagingControls: Send + Sync {
    /// Declare resources and start consuming. Calling it again while
    /// listening is a no-op.
    async fn listen(&self) -> Result<(), MessagingError>;

    /// Stop consuming and release resources. Idempotent.
    async fn stop(&self);

    fn is_listening(&self) -> bool;

    fn is_stopped(&self) -> bool;
}

#[async_trait]
pub trait CoordinatorMessageBus<G: Genome>: MessagingControls {
    async fn send_individual(&self, individual: &Individual<G>) -> Result<(), MessagingError>;

    /// Number of individuals still waiting in the broker queue.
    fn pending_deliveries_count(&self) -> Promise<usize, MessagingError>;

    /// Purge the individuals queue, used when a generation is superseded.
    async fn clear_individuals_queue(&self) -> Result<(), MessagingError>;

    fn add_on_result_received_listener(&self, listener: Listener<FitnessReport>);
}

#[async_trait]
pub trait WorkerMessageBus<G: Genome>: MessagingControls {
    async fn send_result(&self, report: &FitnessReport) -> Result<(), MessagingError>;

    /// Stop taking deliveries until [`WorkerMessageBus::resume`].
    fn pause(&self);

    fn resume(&self);

    fn add_on_individual_received_listener(&self, listener: Listener<Individual<G>>);
}

#[async_trait]
pub trait PubSubPublisher: MessagingControls {
    async fn broadcast_new_generation_signal(&self) -> Result<(), MessagingError>;

    async fn broadcast_experiment_termination_signal(&self) -> Result<(), MessagingError>;
}

pub trait PubSubSubscriber: MessagingControls {
    fn add_on_new_generation_listener(&self, listener: Listener<()>);

    fn add_on_experiment_termination_listener(&self, listener: Listener<()>);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_queue_names_are_scoped_by_experiment() {
        let id = ExperimentId::new();
        let names = QueueNames::for_experiment(id);

        assert_eq!(names.individuals, format!("ex-{id}-individuals"));
        assert_eq!(names.results, format!("ex-{id}-results"));
        assert_eq!(names.new_generation_exchange, format!("ex-{id}-new-generation-signal"));
        assert_eq!(names.termination_exchange, format!("ex-{id}-termination-signal"));
    }

    #[test]
    fn test_fitness_report_without_fitness_is_rejected() {
        let id = IndividualId::new();
        let body = format!("{{\"id\":\"{id}\"}}");
        assert!(serde_json::from_str::<FitnessReport>(&body).is_err());

        let body = format!("{{\"id\":\"{id}\",\"fitness\":1.5}}");
        let report: FitnessReport = serde_json::from_str(&body).unwrap();
        assert_eq!(report.fitness, 1.5);
    }
}
