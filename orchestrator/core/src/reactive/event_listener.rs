// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Event Listener
//!
//! Ordered multicast registry of callbacks. Emitting calls every registered
//! listener, in registration order, with the same argument.
//!
//! A listener that panics is isolated: the panic is caught and logged, and the
//! remaining listeners still run.

use parking_lot::RwLock;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use tracing::error;

/// Shared callback stored by an [`EventListener`].
pub type Listener<A> = Arc<dyn Fn(&A) + Send + Sync>;

pub struct EventListener<A> {
    name: &'static str,
    listeners: RwLock<Vec<Listener<A>>>,
}

impl<A> EventListener<A> {
    /// `name` only appears in log output.
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            listeners: RwLock::new(Vec::new()),
        }
    }

    pub fn add_listener<F>(&self, listener: F)
    where
        F: Fn(&A) + Send + Sync + 'static,
    {
        self.listeners.write().push(Arc::new(listener));
    }

    pub fn add_shared_listener(&self, listener: Listener<A>) {
        self.listeners.write().push(listener);
    }

    /// Notify every listener with `args`.
    ///
    /// The listener list is snapshotted first, so a listener may register
    /// further listeners without deadlocking; those only see later emissions.
    pub fn emit(&self, args: &A) {
        let listeners = self.listeners.read().clone();
        for (index, listener) in listeners.iter().enumerate() {
            if catch_unwind(AssertUnwindSafe(|| listener(args))).is_err() {
                error!(
                    registry = self.name,
                    listener_index = index,
                    "Listener panicked, continuing with remaining listeners"
                );
            }
        }
    }

    pub fn remove_listeners(&self) {
        self.listeners.write().clear();
    }

    pub fn len(&self) -> usize {
        self.listeners.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.listeners.read().is_empty()
    }
}

impl<A> Default for EventListener<A> {
    fn default() -> Self {
        Self::new("anonymous")
    }
}
