// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Worker-side transports: the individuals/results bus and the signal
//! subscriber.
//!
//! The individuals consumer takes one delivery at a time and acknowledges it
//! after the listeners ran, so a pause requested by a listener takes effect
//! before the next delivery.

use super::{consume, Consumers, Delivery, InMemoryBroker};
use crate::domain::individual::{ExperimentId, Genome, Individual};
use crate::domain::messaging::{
    FitnessReport, IndividualMessage, MessagingControls, MessagingError, PubSubSubscriber,
    QueueNames, WorkerMessageBus,
};
use crate::reactive::{EventListener, Listener};
use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use std::marker::PhantomData;
use std::sync::Arc;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

pub struct BrokerWorkerBus<G> {
    broker: InMemoryBroker,
    queues: QueueNames,
    consumers: Consumers,
    paused: watch::Sender<bool>,
    individual_listeners: Arc<EventListener<Individual<G>>>,
    _genome: PhantomData<fn() -> G>,
}

impl<G: Genome> BrokerWorkerBus<G> {
    pub fn new(broker: InMemoryBroker, experiment_id: ExperimentId) -> Self {
        let (paused, _) = watch::channel(false);
        Self {
            broker,
            queues: QueueNames::for_experiment(experiment_id),
            consumers: Consumers::new(),
            paused,
            individual_listeners: Arc::new(EventListener::new("individual_received")),
            _genome: PhantomData,
        }
    }

    pub fn is_paused(&self) -> bool {
        *self.paused.borrow()
    }
}

fn handle_individual<G: Genome>(listeners: &EventListener<Individual<G>>, delivery: Delivery) {
    match serde_json::from_slice::<IndividualMessage<G>>(delivery.body()) {
        Ok(message) => {
            listeners.emit(&Individual::from(message));
            delivery.ack();
        }
        Err(e) => {
            warn!(queue = delivery.queue(), error = %e, "Malformed individual message rejected");
            delivery.nack();
        }
    }
}

async fn consume_individuals<G: Genome>(
    broker: InMemoryBroker,
    queue: String,
    cancel: CancellationToken,
    mut paused: watch::Receiver<bool>,
    listeners: Arc<EventListener<Individual<G>>>,
) {
    loop {
        if *paused.borrow_and_update() {
            tokio::select! {
                _ = cancel.cancelled() => break,
                changed = paused.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    continue;
                }
            }
        }

        let delivery = tokio::select! {
            _ = cancel.cancelled() => break,
            changed = paused.changed() => {
                if changed.is_err() {
                    break;
                }
                continue;
            }
            delivery = broker.next_delivery(&queue) => delivery,
        };
        match delivery {
            Ok(delivery) => handle_individual(&listeners, delivery),
            Err(e) => {
                debug!(queue = %queue, error = %e, "Individuals consumer stopped");
                break;
            }
        }
    }
}

#[async_trait]
impl<G: Genome> MessagingControls for BrokerWorkerBus<G> {
    async fn listen(&self) -> Result<(), MessagingError> {
        if !self.consumers.begin()? {
            return Ok(());
        }
        self.broker.declare_queue(&self.queues.individuals);
        self.broker.declare_queue(&self.queues.results);

        self.consumers.spawn(consume_individuals(
            self.broker.clone(),
            self.queues.individuals.clone(),
            self.consumers.token(),
            self.paused.subscribe(),
            self.individual_listeners.clone(),
        ));
        info!(queue = %self.queues.individuals, "Worker bus listening");
        Ok(())
    }

    async fn stop(&self) {
        if self.consumers.stop().await {
            debug!(queue = %self.queues.individuals, "Worker bus stopped");
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
impl<G: Genome> WorkerMessageBus<G> for BrokerWorkerBus<G> {
    async fn send_result(&self, report: &FitnessReport) -> Result<(), MessagingError> {
        self.consumers.ensure_open()?;
        let body = serde_json::to_vec(report)?;
        self.broker.publish(&self.queues.results, Bytes::from(body))?;
        Ok(())
    }

    fn pause(&self) {
        if !self.paused.send_replace(true) {
            debug!(queue = %self.queues.individuals, "Individuals consumer paused");
        }
    }

    fn resume(&self) {
        if self.paused.send_replace(false) {
            debug!(queue = %self.queues.individuals, "Individuals consumer resumed");
        }
    }

    fn add_on_individual_received_listener(&self, listener: Listener<Individual<G>>) {
        self.individual_listeners.add_shared_listener(listener);
    }
}

/// Subscribes to the new-generation and termination fan-out signals through
/// private exclusive queues, deleted again on stop.
pub struct BrokerSignalSubscriber {
    broker: InMemoryBroker,
    queues: QueueNames,
    consumers: Consumers,
    exclusive_queues: Mutex<Vec<String>>,
    new_generation_listeners: Arc<EventListener<()>>,
    termination_listeners: Arc<EventListener<()>>,
}

impl BrokerSignalSubscriber {
    pub fn new(broker: InMemoryBroker, experiment_id: ExperimentId) -> Self {
        Self {
            broker,
            queues: QueueNames::for_experiment(experiment_id),
            consumers: Consumers::new(),
            exclusive_queues: Mutex::new(Vec::new()),
            new_generation_listeners: Arc::new(EventListener::new("new_generation")),
            termination_listeners: Arc::new(EventListener::new("experiment_termination")),
        }
    }

    fn subscribe(&self, exchange: &str) -> Result<String, MessagingError> {
        self.broker.declare_exchange(exchange);
        let queue = self.broker.declare_exclusive_queue();
        self.broker.bind_queue(&queue, exchange)?;
        self.exclusive_queues.lock().push(queue.clone());
        Ok(queue)
    }
}

#[async_trait]
impl MessagingControls for BrokerSignalSubscriber {
    async fn listen(&self) -> Result<(), MessagingError> {
        if !self.consumers.begin()? {
            return Ok(());
        }

        let new_generation_queue = self.subscribe(&self.queues.new_generation_exchange)?;
        let listeners = self.new_generation_listeners.clone();
        self.consumers.spawn(consume(
            self.broker.clone(),
            new_generation_queue,
            self.consumers.token(),
            move |delivery| {
                listeners.emit(&());
                delivery.ack();
            },
        ));

        let termination_queue = self.subscribe(&self.queues.termination_exchange)?;
        let listeners = self.termination_listeners.clone();
        self.consumers.spawn(consume(
            self.broker.clone(),
            termination_queue,
            self.consumers.token(),
            move |delivery| {
                listeners.emit(&());
                delivery.ack();
            },
        ));

        info!(
            exchange = %self.queues.termination_exchange,
            "Signal subscriber listening"
        );
        Ok(())
    }

    async fn stop(&self) {
        if self.consumers.stop().await {
            let queues: Vec<String> = std::mem::take(&mut *self.exclusive_queues.lock());
            for queue in queues {
                self.broker.delete_queue(&queue);
            }
            debug!("Signal subscriber stopped");
        }
    }

    fn is_listening(&self) -> bool {
        self.consumers.is_listening()
    }

    fn is_stopped(&self) -> bool {
        self.consumers.is_stopped()
    }
}

impl PubSubSubscriber for BrokerSignalSubscriber {
    fn add_on_new_generation_listener(&self, listener: Listener<()>) {
        self.new_generation_listeners.add_shared_listener(listener);
    }

    fn add_on_experiment_termination_listener(&self, listener: Listener<()>) {
        self.termination_listeners.add_shared_listener(listener);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::individual::IndividualId;
    use crate::domain::messaging::PubSubPublisher;
    use crate::infrastructure::messaging::BrokerSignalPublisher;
    use std::time::Duration;
    use tokio::sync::mpsc;

    fn individual_body(id: IndividualId, encoding: u32) -> Bytes {
        Bytes::from(serde_json::to_vec(&IndividualMessage { id, encoding }).unwrap())
    }

    #[tokio::test]
    async fn test_individuals_are_emitted_and_malformed_ones_rejected() {
        let broker = InMemoryBroker::new();
        let bus = BrokerWorkerBus::<u32>::new(broker.clone(), ExperimentId::new());
        let (tx, mut rx) = mpsc::unbounded_channel();
        bus.add_on_individual_received_listener(Arc::new(move |individual: &Individual<u32>| {
            let _ = tx.send(individual.clone());
        }));
        bus.listen().await.unwrap();
        let queue = bus.queues.individuals.clone();

        broker
            .publish(&queue, Bytes::from_static(br#"{"encoding": 4}"#))
            .unwrap();
        let id = IndividualId::new();
        broker.publish(&queue, individual_body(id, 7)).unwrap();

        let individual = rx.recv().await.unwrap();
        assert_eq!(individual.id, id);
        assert_eq!(individual.encoding, 7);
        assert_eq!(individual.fitness, None);
        assert_eq!(broker.dead_letters(&queue).unwrap().len(), 1);

        bus.stop().await;
    }

    #[tokio::test]
    async fn test_paused_bus_leaves_messages_queued() {
        let broker = InMemoryBroker::new();
        let bus = BrokerWorkerBus::<u32>::new(broker.clone(), ExperimentId::new());
        let (tx, mut rx) = mpsc::unbounded_channel();
        bus.add_on_individual_received_listener(Arc::new(move |individual: &Individual<u32>| {
            let _ = tx.send(individual.id);
        }));
        bus.listen().await.unwrap();
        let queue = bus.queues.individuals.clone();

        bus.pause();
        assert!(bus.is_paused());
        tokio::time::sleep(Duration::from_millis(10)).await;
        broker.publish(&queue, individual_body(IndividualId::new(), 1)).unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;

        assert!(rx.try_recv().is_err());
        assert_eq!(broker.message_count(&queue).unwrap(), 1);

        bus.resume();
        rx.recv().await.unwrap();
        assert_eq!(broker.message_count(&queue).unwrap(), 0);

        bus.stop().await;
    }

    #[tokio::test]
    async fn test_results_are_published_to_results_queue() {
        let broker = InMemoryBroker::new();
        let bus = BrokerWorkerBus::<u32>::new(broker.clone(), ExperimentId::new());
        bus.listen().await.unwrap();

        let report = FitnessReport {
            id: IndividualId::new(),
            fitness: 0.5,
        };
        bus.send_result(&report).await.unwrap();

        let delivery = broker.next_delivery(&bus.queues.results).await.unwrap();
        let received: FitnessReport = serde_json::from_slice(delivery.body()).unwrap();
        assert_eq!(received, report);
        delivery.ack();

        bus.stop().await;
    }

    #[tokio::test]
    async fn test_subscriber_receives_both_signals_and_cleans_up() {
        let broker = InMemoryBroker::new();
        let experiment_id = ExperimentId::new();
        let publisher = BrokerSignalPublisher::new(broker.clone(), experiment_id);
        let subscriber = BrokerSignalSubscriber::new(broker.clone(), experiment_id);

        let (tx, mut rx) = mpsc::unbounded_channel();
        let new_generation = tx.clone();
        subscriber.add_on_new_generation_listener(Arc::new(move |_: &()| {
            let _ = new_generation.send("new_generation");
        }));
        subscriber.add_on_experiment_termination_listener(Arc::new(move |_: &()| {
            let _ = tx.send("termination");
        }));

        publisher.listen().await.unwrap();
        subscriber.listen().await.unwrap();

        publisher.broadcast_new_generation_signal().await.unwrap();
        assert_eq!(rx.recv().await, Some("new_generation"));
        publisher.broadcast_experiment_termination_signal().await.unwrap();
        assert_eq!(rx.recv().await, Some("termination"));

        let exclusive = subscriber.exclusive_queues.lock().clone();
        assert_eq!(exclusive.len(), 2);
        subscriber.stop().await;
        for queue in exclusive {
            assert!(broker.message_count(&queue).is_err());
        }
    }

    #[tokio::test]
    async fn test_signals_are_acknowledged_after_listeners_ran() {
        let broker = InMemoryBroker::new();
        let experiment_id = ExperimentId::new();
        let publisher = BrokerSignalPublisher::new(broker.clone(), experiment_id);
        let subscriber = BrokerSignalSubscriber::new(broker.clone(), experiment_id);
        let watched: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));

        let (tx, mut rx) = mpsc::unbounded_channel();
        for signal in ["new_generation", "termination"] {
            let broker = broker.clone();
            let watched = watched.clone();
            let tx = tx.clone();
            let listener: Listener<()> = Arc::new(move |_: &()| {
                let unacked: usize = watched
                    .lock()
                    .iter()
                    .map(|queue| broker.unacked_count(queue).unwrap_or(0))
                    .sum();
                let _ = tx.send((signal, unacked));
            });
            match signal {
                "new_generation" => subscriber.add_on_new_generation_listener(listener),
                _ => subscriber.add_on_experiment_termination_listener(listener),
            }
        }

        publisher.listen().await.unwrap();
        subscriber.listen().await.unwrap();
        *watched.lock() = subscriber.exclusive_queues.lock().clone();

        publisher.broadcast_new_generation_signal().await.unwrap();
        assert_eq!(rx.recv().await, Some(("new_generation", 1)));
        publisher.broadcast_experiment_termination_signal().await.unwrap();
        assert_eq!(rx.recv().await, Some(("termination", 1)));

        subscriber.stop().await;
    }
}
