// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Observable Scalar
//!
//! A mutable value that notifies observers with `(new, previous)` whenever a
//! write actually changes it. Writing an equal value is a no-op.
//!
//! Observers run synchronously on the caller of [`ObservableScalar::set`]. The
//! value lock is released before the fan-out, so an observer may read the
//! scalar (or write it again) without deadlocking.

use super::event_listener::EventListener;
use parking_lot::Mutex;
use std::fmt;

struct Slot<T> {
    value: T,
    previous: T,
}

pub struct ObservableScalar<T> {
    slot: Mutex<Slot<T>>,
    observers: EventListener<(T, T)>,
}

impl<T> ObservableScalar<T>
where
    T: Clone + PartialEq + Send + Sync + 'static,
{
    pub fn new(initial: T) -> Self {
        Self {
            slot: Mutex::new(Slot {
                previous: initial.clone(),
                value: initial,
            }),
            observers: EventListener::new("observable_scalar"),
        }
    }

    pub fn get(&self) -> T {
        self.slot.lock().value.clone()
    }

    /// Store `value`, notifying observers if it differs from the current one.
    ///
    /// Returns `true` when the value changed.
    pub fn set(&self, value: T) -> bool {
        let change = {
            let mut slot = self.slot.lock();
            if slot.value == value {
                return false;
            }
            let previous = std::mem::replace(&mut slot.value, value.clone());
            slot.previous = previous.clone();
            (value, previous)
        };
        self.observers.emit(&change);
        true
    }

    /// Register `callback`, called with `(new, previous)` on every change.
    ///
    /// With `trigger_now` the callback also runs immediately with the current
    /// value and the cached previous value.
    pub fn observe<F>(&self, callback: F, trigger_now: bool)
    where
        F: Fn(&T, &T) + Send + Sync + 'static,
    {
        if trigger_now {
            let (current, previous) = {
                let slot = self.slot.lock();
                (slot.value.clone(), slot.previous.clone())
            };
            callback(&current, &previous);
        }
        self.observers
            .add_listener(move |(new, previous): &(T, T)| callback(new, previous));
    }

    pub fn remove_observers(&self) {
        self.observers.remove_listeners();
    }
}

impl<T: fmt::Debug> fmt::Debug for ObservableScalar<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let slot = self.slot.lock();
        f.debug_struct("ObservableScalar")
            .field("value", &slot.value)
            .field("previous", &slot.previous)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn recorder() -> (Arc<Mutex<Vec<(i32, i32)>>>, impl Fn(&i32, &i32) + Send + Sync) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        (seen, move |new: &i32, previous: &i32| {
            sink.lock().push((*new, *previous))
        })
    }

    #[test]
    fn test_set_equal_value_never_notifies() {
        let scalar = ObservableScalar::new(3);
        let (seen, callback) = recorder();
        scalar.observe(callback, false);

        assert!(!scalar.set(3));
        assert!(seen.lock().is_empty());
    }

    #[test]
    fn test_set_different_value_notifies_once_with_previous() {
        let scalar = ObservableScalar::new(1);
        let (seen, callback) = recorder();
        scalar.observe(callback, false);

        assert!(scalar.set(2));
        assert!(!scalar.set(2));
        assert!(scalar.set(5));

        assert_eq!(*seen.lock(), vec![(2, 1), (5, 2)]);
        assert_eq!(scalar.get(), 5);
    }

    #[test]
    fn test_observe_trigger_now_uses_cached_previous() {
        let scalar = ObservableScalar::new(10);
        scalar.set(11);

        let (seen, callback) = recorder();
        scalar.observe(callback, true);

        assert_eq!(*seen.lock(), vec![(11, 10)]);
    }

    #[test]
    fn test_observer_may_read_scalar_during_notification() {
        let scalar = Arc::new(ObservableScalar::new(false));
        let observed = Arc::new(Mutex::new(None));

        let reader = scalar.clone();
        let sink = observed.clone();
        scalar.observe(move |_, _| *sink.lock() = Some(reader.get()), false);

        scalar.set(true);

        assert_eq!(*observed.lock(), Some(true));
    }

    #[test]
    fn test_remove_observers_stops_notifications() {
        let scalar = ObservableScalar::new(0);
        let (seen, callback) = recorder();
        scalar.observe(callback, false);
        scalar.remove_observers();

        scalar.set(1);

        assert!(seen.lock().is_empty());
    }
}
