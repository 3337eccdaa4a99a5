// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Coordinator-side transports: the individuals/results bus and the signal
//! publisher.

use super::{consume, Consumers, InMemoryBroker};
use crate::domain::individual::{ExperimentId, Genome, Individual};
use crate::domain::messaging::{
    CoordinatorMessageBus, FitnessReport, IndividualMessage, MessagingControls, MessagingError,
    PubSubPublisher, QueueNames,
};
use crate::reactive::{EventListener, Listener, Promise};
use async_trait::async_trait;
use bytes::Bytes;
use chrono::Utc;
use std::marker::PhantomData;
use std::sync::Arc;
use tracing::{debug, info, warn};

pub struct BrokerCoordinatorBus<G> {
    broker: InMemoryBroker,
    queues: QueueNames,
    consumers: Consumers,
    result_listeners: Arc<EventListener<FitnessReport>>,
    _genome: PhantomData<fn() -> G>,
}

impl<G: Genome> BrokerCoordinatorBus<G> {
    pub fn new(broker: InMemoryBroker, experiment_id: ExperimentId) -> Self {
        Self {
            broker,
            queues: QueueNames::for_experiment(experiment_id),
            consumers: Consumers::new(),
            result_listeners: Arc::new(EventListener::new("result_received")),
            _genome: PhantomData,
        }
    }

    pub fn queue_names(&self) -> &QueueNames {
        &self.queues
    }
}

#[async_trait]
impl<G: Genome> MessagingControls for BrokerCoordinatorBus<G> {
    async fn listen(&self) -> Result<(), MessagingError> {
        if !self.consumers.begin()? {
            return Ok(());
        }
        self.broker.declare_queue(&self.queues.individuals);
        self.broker.declare_queue(&self.queues.results);

        let listeners = self.result_listeners.clone();
        self.consumers.spawn(consume(
            self.broker.clone(),
            self.queues.results.clone(),
            self.consumers.token(),
            move |delivery| match serde_json::from_slice::<FitnessReport>(delivery.body()) {
                Ok(report) => {
                    listeners.emit(&report);
                    delivery.ack();
                }
                Err(e) => {
                    warn!(queue = delivery.queue(), error = %e, "Malformed result message rejected");
                    delivery.nack();
                }
            },
        ));
        info!(queue = %self.queues.results, "Coordinator bus listening");
        Ok(())
    }

    async fn stop(&self) {
        if self.consumers.stop().await {
            debug!(queue = %self.queues.results, "Coordinator bus stopped");
        }
    }

    fn is_listening(&self) -> bool {
        self.consumers.is_listening()
    }

    fn is_stopped(&self) -> bool {
        self.consumers.is_stopped()
    }
}

#[async_trait]
impl<G: Genome> CoordinatorMessageBus<G> for BrokerCoordinatorBus<G> {
    async fn send_individual(&self, individual: &Individual<G>) -> Result<(), MessagingError> {
        self.consumers.ensure_open()?;
        let message = IndividualMessage {
            id: individual.id,
            encoding: individual.encoding.clone(),
        };
        let body = serde_json::to_vec(&message)?;
        self.broker
            .publish(&self.queues.individuals, Bytes::from(body))?;
        Ok(())
    }

    fn pending_deliveries_count(&self) -> Promise<usize, MessagingError> {
        if !self.consumers.is_listening() {
            return Promise::rejected(MessagingError::NotListening);
        }
        let (promise, resolver) = Promise::new();
        let broker = self.broker.clone();
        let queue = self.queues.individuals.clone();
        tokio::spawn(async move {
            match broker.message_count(&queue) {
                Ok(count) => resolver.resolve(count),
                Err(e) => resolver.reject(e.into()),
            }
        });
        promise
    }

    async fn clear_individuals_queue(&self) -> Result<(), MessagingError> {
        self.consumers.ensure_open()?;
        let purged = self.broker.purge(&self.queues.individuals)?;
        debug!(queue = %self.queues.individuals, purged, "Individuals queue purged");
        Ok(())
    }

    fn add_on_result_received_listener(&self, listener: Listener<FitnessReport>) {
        self.result_listeners.add_shared_listener(listener);
    }
}

/// Fan-out publisher for the new-generation and termination signals.
pub struct BrokerSignalPublisher {
    broker: InMemoryBroker,
    experiment_id: ExperimentId,
    queues: QueueNames,
    consumers: Consumers,
}

impl BrokerSignalPublisher {
    pub fn new(broker: InMemoryBroker, experiment_id: ExperimentId) -> Self {
        Self {
            broker,
            experiment_id,
            queues: QueueNames::for_experiment(experiment_id),
            consumers: Consumers::new(),
        }
    }

    fn broadcast(&self, exchange: &str, signal: &str) -> Result<(), MessagingError> {
        self.consumers.ensure_open()?;
        let body = serde_json::to_vec(&serde_json::json!({
            "experiment_id": self.experiment_id,
            "signal": signal,
            "sent_at": Utc::now(),
        }))?;
        let reached = self.broker.publish_to_exchange(exchange, Bytes::from(body))?;
        debug!(exchange, signal, subscribers = reached, "Signal broadcast");
        Ok(())
    }
}

#[async_trait]
impl MessagingControls for BrokerSignalPublisher {
    async fn listen(&self) -> Result<(), MessagingError> {
        if self.consumers.begin()? {
            self.broker.declare_exchange(&self.queues.new_generation_exchange);
            self.broker.declare_exchange(&self.queues.termination_exchange);
        }
        Ok(())
    }

    async fn stop(&self) {
        self.consumers.stop().await;
    }

    fn is_listening(&self) -> bool {
        self.consumers.is_listening()
    }

    fn is_stopped(&self) -> bool {
        self.consumers.is_stopped()
    }
}

#[async_trait]
impl PubSubPublisher for BrokerSignalPublisher {
    async fn broadcast_new_generation_signal(&self) -> Result<(), MessagingError> {
        self.broadcast(&self.queues.new_generation_exchange, "new_generation")
    }

    async fn broadcast_experiment_termination_signal(&self) -> Result<(), MessagingError> {
        self.broadcast(&self.queues.termination_exchange, "experiment_termination")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::individual::IndividualId;
    use crate::reactive::PromiseStatus;
    use tokio::sync::mpsc;

    #[tokio::test]
    async fn test_send_individual_and_count_pending() {
        let broker = InMemoryBroker::new();
        let experiment_id = ExperimentId::new();
        let bus = BrokerCoordinatorBus::<Vec<u8>>::new(broker.clone(), experiment_id);
        bus.listen().await.unwrap();

        let individual = Individual::new(IndividualId::new(), vec![1, 2]);
        bus.send_individual(&individual).await.unwrap();

        let count = bus.pending_deliveries_count().settled().await;
        assert_eq!(count, Some(Ok(1)));

        let delivery = broker
            .next_delivery(&bus.queue_names().individuals)
            .await
            .unwrap();
        let message: IndividualMessage<Vec<u8>> = serde_json::from_slice(delivery.body()).unwrap();
        assert_eq!(message.id, individual.id);
        assert_eq!(message.encoding, vec![1, 2]);
        delivery.ack();

        bus.send_individual(&individual).await.unwrap();
        bus.clear_individuals_queue().await.unwrap();
        assert_eq!(bus.pending_deliveries_count().settled().await, Some(Ok(0)));

        bus.stop().await;
    }

    #[tokio::test]
    async fn test_count_is_rejected_when_not_listening() {
        let bus = BrokerCoordinatorBus::<Vec<u8>>::new(InMemoryBroker::new(), ExperimentId::new());

        let promise = bus.pending_deliveries_count();

        assert_eq!(promise.status(), PromiseStatus::Rejected);
        assert_eq!(promise.settled().await, Some(Err(MessagingError::NotListening)));
    }

    #[tokio::test]
    async fn test_results_are_emitted_and_malformed_ones_dead_lettered() {
        let broker = InMemoryBroker::new();
        let bus = BrokerCoordinatorBus::<Vec<u8>>::new(broker.clone(), ExperimentId::new());
        let (tx, mut rx) = mpsc::unbounded_channel();
        bus.add_on_result_received_listener(Arc::new(move |report: &FitnessReport| {
            let _ = tx.send(*report);
        }));
        bus.listen().await.unwrap();
        let results = bus.queue_names().results.clone();

        broker
            .publish(&results, Bytes::from_static(br#"{"fitness": 1.0}"#))
            .unwrap();
        let id = IndividualId::new();
        let good = serde_json::to_vec(&FitnessReport { id, fitness: 2.5 }).unwrap();
        broker.publish(&results, Bytes::from(good)).unwrap();

        let report = rx.recv().await.unwrap();
        assert_eq!(report, FitnessReport { id, fitness: 2.5 });
        assert_eq!(broker.dead_letters(&results).unwrap().len(), 1);

        bus.stop().await;
        assert!(bus.is_stopped());
        assert!(matches!(
            bus.send_individual(&Individual::new(id, vec![])).await,
            Err(MessagingError::Stopped)
        ));
    }

    #[tokio::test]
    async fn test_listen_is_idempotent_until_stopped() {
        let bus = BrokerCoordinatorBus::<Vec<u8>>::new(InMemoryBroker::new(), ExperimentId::new());

        bus.listen().await.unwrap();
        bus.listen().await.unwrap();
        assert!(bus.is_listening());

        bus.stop().await;
        bus.stop().await;
        assert!(!bus.is_listening());
        assert_eq!(bus.listen().await, Err(MessagingError::Stopped));
    }

    #[tokio::test]
    async fn test_publisher_reaches_bound_subscribers() {
        let broker = InMemoryBroker::new();
        let experiment_id = ExperimentId::new();
        let publisher = BrokerSignalPublisher::new(broker.clone(), experiment_id);
        publisher.listen().await.unwrap();

        let names = QueueNames::for_experiment(experiment_id);
        let queue = broker.declare_exclusive_queue();
        broker.bind_queue(&queue, &names.termination_exchange).unwrap();

        publisher.broadcast_experiment_termination_signal().await.unwrap();
        publisher.broadcast_new_generation_signal().await.unwrap();

        assert_eq!(broker.message_count(&queue).unwrap(), 1);

        publisher.stop().await;
        assert!(publisher.broadcast_new_generation_signal().await.is_err());
    }
}
