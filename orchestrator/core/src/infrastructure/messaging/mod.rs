// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Messaging Infrastructure
//!
//! Broker-backed implementations of the messaging contracts in
//! [`crate::domain::messaging`]. Each role gets its own transport:
//!
//! | Transport | Implements |
//! |-----------|------------|
//! | [`BrokerCoordinatorBus`] | `CoordinatorMessageBus` |
//! | [`BrokerSignalPublisher`] | `PubSubPublisher` |
//! | [`BrokerWorkerBus`] | `WorkerMessageBus` |
//! | [`BrokerSignalSubscriber`] | `PubSubSubscriber` |
//!
//! # Architecture
//!
//! - **Layer:** Infrastructure Layer
//! - **Purpose:** Move individuals, results and signals between processes

pub mod broker;
pub mod coordinator;
pub mod worker;

pub use broker::{BrokerError, Delivery, InMemoryBroker};
pub use coordinator::{BrokerCoordinatorBus, BrokerSignalPublisher};
pub use worker::{BrokerSignalSubscriber, BrokerWorkerBus};

use crate::domain::messaging::MessagingError;
use parking_lot::Mutex;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::debug;

impl From<BrokerError> for MessagingError {
    fn from(err: BrokerError) -> Self {
        MessagingError::Broker(err.to_string())
    }
}

/// Lifecycle shared by every transport: a set of consumer tasks started by
/// `listen` and cancelled and joined by `stop`.
pub(crate) struct Consumers {
    cancel: CancellationToken,
    handles: Mutex<Vec<JoinHandle<()>>>,
    listening: AtomicBool,
    stopped: AtomicBool,
}

impl Consumers {
    pub(crate) fn new() -> Self {
        Self {
            cancel: CancellationToken::new(),
            handles: Mutex::new(Vec::new()),
            listening: AtomicBool::new(false),
            stopped: AtomicBool::new(false),
        }
    }

    /// Returns `Ok(true)` for the call that should start consuming,
    /// `Ok(false)` if already listening.
    pub(crate) fn begin(&self) -> Result<bool, MessagingError> {
        if self.stopped.load(Ordering::SeqCst) {
            return Err(MessagingError::Stopped);
        }
        Ok(!self.listening.swap(true, Ordering::SeqCst))
    }

    pub(crate) fn token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub(crate) fn spawn<F>(&self, consumer: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.handles.lock().push(tokio::spawn(consumer));
    }

    /// Cancel and join every consumer. Only the first call does any work.
    pub(crate) async fn stop(&self) -> bool {
        if self.stopped.swap(true, Ordering::SeqCst) {
            return false;
        }
        self.cancel.cancel();
        let handles: Vec<_> = std::mem::take(&mut *self.handles.lock());
        for handle in handles {
            let _ = handle.await;
        }
        self.listening.store(false, Ordering::SeqCst);
        true
    }

    pub(crate) fn ensure_open(&self) -> Result<(), MessagingError> {
        if self.stopped.load(Ordering::SeqCst) {
            Err(MessagingError::Stopped)
        } else {
            Ok(())
        }
    }

    pub(crate) fn is_listening(&self) -> bool {
        self.listening.load(Ordering::SeqCst)
    }

    pub(crate) fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }
}

/// Hand every delivery on `queue` to `handle` until cancelled or the queue
/// disappears.
pub(crate) async fn consume<F>(
    broker: InMemoryBroker,
    queue: String,
    cancel: CancellationToken,
    mut handle: F,
) where
    F: FnMut(Delivery) + Send,
{
    loop {
        let delivery = tokio::select! {
            _ = cancel.cancelled() => break,
            delivery = broker.next_delivery(&queue) => delivery,
        };
        match delivery {
            Ok(delivery) => handle(delivery),
            Err(e) => {
                debug!(queue = %queue, error = %e, "Consumer stopped");
                break;
            }
        }
    }
}
