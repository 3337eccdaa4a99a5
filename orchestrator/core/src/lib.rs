// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Darwin Core
//!
//! Distributed, generation-based coordination of a genetic algorithm: a
//! coordinator dispatches untested individuals to workers over a broker and
//! advances the experiment once every result is in.
//!
//! # Architecture
//!
//! - **Layer:** Core System
//! - **Purpose:** Domain state machines, reactive primitives, infrastructure adapters and runners

pub mod application;
pub mod domain;
pub mod infrastructure;
pub mod reactive;

pub use domain::*;
