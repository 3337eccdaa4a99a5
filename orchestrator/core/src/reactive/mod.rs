// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Reactive Primitives
//!
//! Small concurrency building blocks that glue asynchronous message delivery
//! to the synchronous state transitions of the coordination state machines.
//!
//! | Module | Key Types |
//! |--------|-----------|
//! | [`event_listener`] | `EventListener`, `Listener` |
//! | [`observable`] | `ObservableScalar` |
//! | [`promise`] | `Promise`, `Resolver`, `PromiseStatus` |
//!
//! All callbacks run on the thread or task that triggers them. None of these
//! types spawn work of their own.

pub mod event_listener;
pub mod observable;
pub mod promise;

pub use event_listener::{EventListener, Listener};
pub use observable::ObservableScalar;
pub use promise::{Promise, PromiseStatus, Resolver};
