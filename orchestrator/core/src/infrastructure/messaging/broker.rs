// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! In-Process Broker
//!
//! A small AMQP-shaped broker for running a coordinator and its workers in
//! one process:
//!
//! - durable named queues shared by competing consumers
//! - server-named exclusive queues bound to fan-out exchanges
//! - explicit acknowledgement: `ack` removes, `nack` dead-letters, and a
//!   delivery dropped without either is requeued at the front
//! - dead letters are kept per queue up to [`DEAD_LETTER_CAPACITY`], oldest
//!   evicted first
//! - passive ready-message count and purge
//!
//! Message bodies are opaque [`Bytes`].

use bytes::Bytes;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use tokio::sync::Notify;
use tracing::{debug, trace};
use uuid::Uuid;

/// Rejected messages kept per queue.
pub const DEAD_LETTER_CAPACITY: usize = 256;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BrokerError {
    #[error("Queue not found: {0}")]
    QueueNotFound(String),

    #[error("Exchange not found: {0}")]
    ExchangeNotFound(String),
}

struct Queue {
    ready: VecDeque<Bytes>,
    unacked: usize,
    dead_letters: VecDeque<Bytes>,
    exclusive: bool,
    notify: Arc<Notify>,
}

impl Queue {
    fn new(exclusive: bool) -> Self {
        Self {
            ready: VecDeque::new(),
            unacked: 0,
            dead_letters: VecDeque::new(),
            exclusive,
            notify: Arc::new(Notify::new()),
        }
    }
}

#[derive(Default)]
struct BrokerState {
    queues: HashMap<String, Queue>,
    /// Fan-out exchange name to bound queue names.
    exchanges: HashMap<String, HashSet<String>>,
}

#[derive(Clone, Default)]
pub struct InMemoryBroker {
    state: Arc<Mutex<BrokerState>>,
}

impl InMemoryBroker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare a durable queue. Declaring an existing queue is a no-op.
    pub fn declare_queue(&self, name: &str) {
        self.state
            .lock()
            .queues
            .entry(name.to_string())
            .or_insert_with(|| Queue::new(false));
    }

    /// Declare a server-named exclusive queue and return its name.
    pub fn declare_exclusive_queue(&self) -> String {
        let name = format!("amq.gen-{}", Uuid::new_v4());
        self.state
            .lock()
            .queues
            .insert(name.clone(), Queue::new(true));
        name
    }

    pub fn declare_exchange(&self, name: &str) {
        self.state
            .lock()
            .exchanges
            .entry(name.to_string())
            .or_default();
    }

    pub fn bind_queue(&self, queue: &str, exchange: &str) -> Result<(), BrokerError> {
        let mut state = self.state.lock();
        if !state.queues.contains_key(queue) {
            return Err(BrokerError::QueueNotFound(queue.to_string()));
        }
        let bound = state
            .exchanges
            .get_mut(exchange)
            .ok_or_else(|| BrokerError::ExchangeNotFound(exchange.to_string()))?;
        bound.insert(queue.to_string());
        Ok(())
    }

    /// Delete a queue, waking any consumer blocked on it.
    pub fn delete_queue(&self, name: &str) {
        let removed = {
            let mut state = self.state.lock();
            for bound in state.exchanges.values_mut() {
                bound.remove(name);
            }
            state.queues.remove(name)
        };
        if let Some(queue) = removed {
            debug!(queue = name, exclusive = queue.exclusive, "Queue deleted");
            queue.notify.notify_waiters();
        }
    }

    pub fn publish(&self, queue: &str, body: Bytes) -> Result<(), BrokerError> {
        let notify = {
            let mut state = self.state.lock();
            let target = state
                .queues
                .get_mut(queue)
                .ok_or_else(|| BrokerError::QueueNotFound(queue.to_string()))?;
            target.ready.push_back(body);
            target.notify.clone()
        };
        trace!(queue, "Message published");
        notify.notify_waiters();
        Ok(())
    }

    /// Copy `body` into every queue bound to `exchange`. Returns the number
    /// of queues reached.
    pub fn publish_to_exchange(&self, exchange: &str, body: Bytes) -> Result<usize, BrokerError> {
        let notifies: Vec<Arc<Notify>> = {
            let mut state = self.state.lock();
            let bound: Vec<String> = state
                .exchanges
                .get(exchange)
                .ok_or_else(|| BrokerError::ExchangeNotFound(exchange.to_string()))?
                .iter()
                .cloned()
                .collect();
            let mut notifies = Vec::with_capacity(bound.len());
            for name in &bound {
                if let Some(queue) = state.queues.get_mut(name) {
                    queue.ready.push_back(body.clone());
                    notifies.push(queue.notify.clone());
                }
            }
            notifies
        };
        for notify in &notifies {
            notify.notify_waiters();
        }
        Ok(notifies.len())
    }

    /// Ready (not yet delivered) message count.
    pub fn message_count(&self, queue: &str) -> Result<usize, BrokerError> {
        self.state
            .lock()
            .queues
            .get(queue)
            .map(|q| q.ready.len())
            .ok_or_else(|| BrokerError::QueueNotFound(queue.to_string()))
    }

    /// Delivered but not yet acknowledged message count.
    pub fn unacked_count(&self, queue: &str) -> Result<usize, BrokerError> {
        self.state
            .lock()
            .queues
            .get(queue)
            .map(|q| q.unacked)
            .ok_or_else(|| BrokerError::QueueNotFound(queue.to_string()))
    }

    /// Drop every ready message. Returns the number purged.
    pub fn purge(&self, queue: &str) -> Result<usize, BrokerError> {
        let mut state = self.state.lock();
        let target = state
            .queues
            .get_mut(queue)
            .ok_or_else(|| BrokerError::QueueNotFound(queue.to_string()))?;
        let purged = target.ready.len();
        target.ready.clear();
        Ok(purged)
    }

    /// Most recently rejected messages, oldest first.
    pub fn dead_letters(&self, queue: &str) -> Result<Vec<Bytes>, BrokerError> {
        self.state
            .lock()
            .queues
            .get(queue)
            .map(|q| q.dead_letters.iter().cloned().collect())
            .ok_or_else(|| BrokerError::QueueNotFound(queue.to_string()))
    }

    fn try_take(&self, queue: &str) -> Result<Result<Bytes, Arc<Notify>>, BrokerError> {
        let mut state = self.state.lock();
        let target = state
            .queues
            .get_mut(queue)
            .ok_or_else(|| BrokerError::QueueNotFound(queue.to_string()))?;
        match target.ready.pop_front() {
            Some(body) => {
                target.unacked += 1;
                Ok(Ok(body))
            }
            None => Ok(Err(target.notify.clone())),
        }
    }

    /// Wait for the next message on `queue`.
    ///
    /// Cancel-safe: a message is only taken off the queue in the same poll
    /// that returns it. Fails once the queue is deleted.
    pub async fn next_delivery(&self, queue: &str) -> Result<Delivery, BrokerError> {
        loop {
            let notify = match self.try_take(queue)? {
                Ok(body) => {
                    return Ok(Delivery {
                        broker: self.clone(),
                        queue: queue.to_string(),
                        body,
                        settled: false,
                    })
                }
                Err(notify) => notify,
            };

            let notified = notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            match self.try_take(queue)? {
                Ok(body) => {
                    return Ok(Delivery {
                        broker: self.clone(),
                        queue: queue.to_string(),
                        body,
                        settled: false,
                    })
                }
                Err(_) => notified.await,
            }
        }
    }

    fn settle(&self, queue: &str, body: Option<Bytes>, requeue: bool) {
        let notify = {
            let mut state = self.state.lock();
            let Some(target) = state.queues.get_mut(queue) else {
                return;
            };
            target.unacked = target.unacked.saturating_sub(1);
            match body {
                Some(body) if requeue => {
                    target.ready.push_front(body);
                    Some(target.notify.clone())
                }
                Some(body) => {
                    if target.dead_letters.len() >= DEAD_LETTER_CAPACITY {
                        target.dead_letters.pop_front();
                        debug!(queue, "Dead letter capacity reached, evicting oldest");
                    }
                    target.dead_letters.push_back(body);
                    None
                }
                None => None,
            }
        };
        if let Some(notify) = notify {
            notify.notify_waiters();
        }
    }
}

/// One message taken off a queue, pending acknowledgement.
pub struct Delivery {
    broker: InMemoryBroker,
    queue: String,
    body: Bytes,
    settled: bool,
}

impl Delivery {
    pub fn body(&self) -> &[u8] {
        &self.body
    }

    pub fn queue(&self) -> &str {
        &self.queue
    }

    pub fn ack(mut self) {
        self.settled = true;
        self.broker.settle(&self.queue, None, false);
    }

    /// Reject without requeue: the message moves to the queue's dead letters.
    pub fn nack(mut self) {
        self.settled = true;
        let body = std::mem::take(&mut self.body);
        self.broker.settle(&self.queue, Some(body), false);
    }
}

impl Drop for Delivery {
    fn drop(&mut self) {
        if !self.settled {
            let body = std::mem::take(&mut self.body);
            self.broker.settle(&self.queue, Some(body), true);
        }
    }
}
