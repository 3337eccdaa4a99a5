// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
// Event Bus Implementation - Pub/Sub for Experiment Events
//
// In-memory event streaming over a tokio broadcast channel. The CLI uses it
// for progress output and tests use it to wait for state transitions.
// Events are lost when no subscriber is listening.

use crate::domain::events::ExperimentEvent;
use crate::domain::individual::ExperimentId;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, warn};

/// Event bus for publishing and subscribing to experiment events
#[derive(Clone)]
pub struct EventBus {
    sender: Arc<broadcast::Sender<ExperimentEvent>>,
}

impl EventBus {
    /// Capacity is the number of events buffered per subscriber before the
    /// oldest are dropped.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self {
            sender: Arc::new(sender),
        }
    }

    pub fn with_default_capacity() -> Self {
        Self::new(1000)
    }

    pub fn publish(&self, event: ExperimentEvent) {
        debug!("Publishing event: {:?}", event);

        let receiver_count = self.sender.send(event).unwrap_or(0);
        if receiver_count == 0 {
            debug!("No subscribers listening to event");
        }
    }

    pub fn subscribe(&self) -> EventReceiver {
        EventReceiver {
            receiver: self.sender.subscribe(),
        }
    }

    /// Subscribe and filter for one experiment
    pub fn subscribe_experiment(&self, experiment_id: ExperimentId) -> ExperimentEventReceiver {
        ExperimentEventReceiver {
            receiver: self.sender.subscribe(),
            experiment_id,
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::with_default_capacity()
    }
}

fn map_recv_error(e: broadcast::error::RecvError) -> EventBusError {
    match e {
        broadcast::error::RecvError::Closed => EventBusError::Closed,
        broadcast::error::RecvError::Lagged(n) => {
            warn!("Event receiver lagged by {} events", n);
            EventBusError::Lagged(n)
        }
    }
}

/// Receiver for all experiment events
pub struct EventReceiver {
    receiver: broadcast::Receiver<ExperimentEvent>,
}

impl EventReceiver {
    pub async fn recv(&mut self) -> Result<ExperimentEvent, EventBusError> {
        self.receiver.recv().await.map_err(map_recv_error)
    }

    pub fn try_recv(&mut self) -> Result<ExperimentEvent, EventBusError> {
        self.receiver.try_recv().map_err(|e| match e {
            broadcast::error::TryRecvError::Empty => EventBusError::Empty,
            broadcast::error::TryRecvError::Closed => EventBusError::Closed,
            broadcast::error::TryRecvError::Lagged(n) => {
                warn!("Event receiver lagged by {} events", n);
                EventBusError::Lagged(n)
            }
        })
    }
}

/// Receiver for the events of a single experiment
pub struct ExperimentEventReceiver {
    receiver: broadcast::Receiver<ExperimentEvent>,
    experiment_id: ExperimentId,
}

impl ExperimentEventReceiver {
    pub async fn recv(&mut self) -> Result<ExperimentEvent, EventBusError> {
        loop {
            let event = self.receiver.recv().await.map_err(map_recv_error)?;
            if event.experiment_id() == self.experiment_id {
                return Ok(event);
            }
        }
    }
}

/// Errors that can occur when receiving events
#[derive(Debug, thiserror::Error)]
pub enum EventBusError {
    #[error("Event bus is closed")]
    Closed,

    #[error("No events available")]
    Empty,

    #[error("Receiver lagged by {0} events (events were dropped)")]
    Lagged(u64),
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn terminated(experiment_id: ExperimentId) -> ExperimentEvent {
        ExperimentEvent::ExperimentTerminated {
            experiment_id,
            terminated_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_event_bus_publish_subscribe() {
        let event_bus = EventBus::new(10);
        let mut receiver = event_bus.subscribe();
        let experiment_id = ExperimentId::new();

        event_bus.publish(terminated(experiment_id));

        let received = receiver.recv().await.unwrap();
        assert!(matches!(
            received,
            ExperimentEvent::ExperimentTerminated { experiment_id: id, .. } if id == experiment_id
        ));
    }

    #[tokio::test]
    async fn test_experiment_event_filtering() {
        let event_bus = EventBus::new(10);
        let experiment_id = ExperimentId::new();
        let mut receiver = event_bus.subscribe_experiment(experiment_id);

        event_bus.publish(terminated(ExperimentId::new()));
        event_bus.publish(terminated(experiment_id));

        let received = receiver.recv().await.unwrap();
        assert_eq!(received.experiment_id(), experiment_id);
    }

    #[tokio::test]
    async fn test_multiple_subscribers() {
        let event_bus = EventBus::new(10);
        let mut receiver1 = event_bus.subscribe();
        let mut receiver2 = event_bus.subscribe();
        assert_eq!(event_bus.subscriber_count(), 2);

        event_bus.publish(terminated(ExperimentId::new()));

        let _ = receiver1.recv().await.unwrap();
        let _ = receiver2.recv().await.unwrap();
        assert!(matches!(receiver1.try_recv(), Err(EventBusError::Empty)));
    }
}
