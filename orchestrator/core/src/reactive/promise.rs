// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Promise
//!
//! Single-resolution future bridging callback-style transport queries into
//! values usable by synchronous coordination code.
//!
//! A [`Promise`] starts pending and transitions exactly once to fulfilled or
//! rejected. The transition is owned by the [`Resolver`] half, which is
//! consumed by `resolve` / `reject`, so a second transition cannot be
//! expressed. Callbacks always run outside the internal lock.

use parking_lot::Mutex;
use std::fmt;
use std::sync::Arc;
use tokio::sync::oneshot;

type Callback<V> = Box<dyn FnOnce(V) + Send>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PromiseStatus {
    Pending,
    Fulfilled,
    Rejected,
    /// The resolver was dropped without settling; the promise never will.
    Abandoned,
}

enum State<T, E> {
    Pending,
    Fulfilled(T),
    Rejected(E),
}

struct Inner<T, E> {
    state: State<T, E>,
    on_fulfilled: Vec<Callback<T>>,
    on_rejected: Vec<Callback<E>>,
    abandoned: bool,
}

impl<T, E> Inner<T, E> {
    fn accepts_callbacks(&self) -> bool {
        matches!(self.state, State::Pending) && !self.abandoned
    }

    fn status(&self) -> PromiseStatus {
        match self.state {
            State::Pending if self.abandoned => PromiseStatus::Abandoned,
            State::Pending => PromiseStatus::Pending,
            State::Fulfilled(_) => PromiseStatus::Fulfilled,
            State::Rejected(_) => PromiseStatus::Rejected,
        }
    }
}

pub struct Promise<T, E> {
    inner: Arc<Mutex<Inner<T, E>>>,
}

/// Producer half of a [`Promise`].
///
/// Dropping it without settling marks the promise
/// [`Abandoned`](PromiseStatus::Abandoned) and discards every queued
/// callback, including ones registered afterwards.
pub struct Resolver<T, E> {
    inner: Arc<Mutex<Inner<T, E>>>,
}

impl<T, E> Clone for Promise<T, E> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<T, E> Promise<T, E>
where
    T: Clone + Send + 'static,
    E: Clone + Send + 'static,
{
    pub fn new() -> (Self, Resolver<T, E>) {
        let inner = Arc::new(Mutex::new(Inner {
            state: State::Pending,
            on_fulfilled: Vec::new(),
            on_rejected: Vec::new(),
            abandoned: false,
        }));
        (
            Self {
                inner: inner.clone(),
            },
            Resolver { inner },
        )
    }

    pub fn resolved(value: T) -> Self {
        let (promise, resolver) = Self::new();
        resolver.resolve(value);
        promise
    }

    pub fn rejected(error: E) -> Self {
        let (promise, resolver) = Self::new();
        resolver.reject(error);
        promise
    }

    pub fn status(&self) -> PromiseStatus {
        self.inner.lock().status()
    }

    /// Whether the promise can still settle. An abandoned promise is not
    /// pending.
    pub fn is_pending(&self) -> bool {
        self.status() == PromiseStatus::Pending
    }

    /// Run `callback` with the fulfilled value.
    ///
    /// Fires immediately if the promise is already fulfilled, otherwise once
    /// fulfilment happens. Never fires for a rejected promise.
    pub fn then<F>(&self, callback: F) -> &Self
    where
        F: FnOnce(T) + Send + 'static,
    {
        let mut inner = self.inner.lock();
        let value = match &inner.state {
            State::Fulfilled(value) => Some(value.clone()),
            _ => None,
        };
        match value {
            Some(value) => {
                inner.on_fulfilled.clear();
                drop(inner);
                callback(value);
            }
            None if inner.accepts_callbacks() => inner.on_fulfilled.push(Box::new(callback)),
            None => {}
        }
        self
    }

    /// Mirror of [`Promise::then`] for rejection.
    pub fn catch<F>(&self, callback: F) -> &Self
    where
        F: FnOnce(E) + Send + 'static,
    {
        let mut inner = self.inner.lock();
        let error = match &inner.state {
            State::Rejected(error) => Some(error.clone()),
            _ => None,
        };
        match error {
            Some(error) => {
                inner.on_rejected.clear();
                drop(inner);
                callback(error);
            }
            None if inner.accepts_callbacks() => inner.on_rejected.push(Box::new(callback)),
            None => {}
        }
        self
    }

    /// Wait for the promise to settle.
    ///
    /// Returns `None` when the resolver was dropped without settling.
    pub async fn settled(&self) -> Option<Result<T, E>> {
        let (tx, rx) = oneshot::channel();
        let tx = Arc::new(Mutex::new(Some(tx)));

        let on_value = tx.clone();
        self.then(move |value| {
            if let Some(tx) = on_value.lock().take() {
                let _ = tx.send(Ok(value));
            }
        });
        self.catch(move |error| {
            if let Some(tx) = tx.lock().take() {
                let _ = tx.send(Err(error));
            }
        });

        rx.await.ok()
    }
}

impl<T, E> Resolver<T, E>
where
    T: Clone + Send + 'static,
    E: Clone + Send + 'static,
{
    pub fn resolve(self, value: T) {
        let callbacks = {
            let mut inner = self.inner.lock();
            if !matches!(inner.state, State::Pending) {
                return;
            }
            inner.state = State::Fulfilled(value.clone());
            inner.on_rejected.clear();
            std::mem::take(&mut inner.on_fulfilled)
        };
        for callback in callbacks {
            callback(value.clone());
        }
    }

    pub fn reject(self, error: E) {
        let callbacks = {
            let mut inner = self.inner.lock();
            if !matches!(inner.state, State::Pending) {
                return;
            }
            inner.state = State::Rejected(error.clone());
            inner.on_fulfilled.clear();
            std::mem::take(&mut inner.on_rejected)
        };
        for callback in callbacks {
            callback(error.clone());
        }
    }
}

impl<T, E> Drop for Resolver<T, E> {
    fn drop(&mut self) {
        let mut inner = self.inner.lock();
        if matches!(inner.state, State::Pending) {
            inner.abandoned = true;
            inner.on_fulfilled.clear();
            inner.on_rejected.clear();
        }
    }
}

impl<T, E> fmt::Debug for Promise<T, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let status = self.inner.lock().status();
        f.debug_struct("Promise").field("status", &status).finish()
    }
}
