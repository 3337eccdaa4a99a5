// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Domain Layer
//!
//! Individuals, experiments, the two coordination state machines and the
//! contracts they depend on (storage, messaging, plug-ins).
//!
//! # Architecture
//!
//! - **Layer:** Domain Layer
//! - **Purpose:** Generation progression and batching rules, free of transport details

pub mod config;
pub mod coordinator;
pub mod events;
pub mod experiment;
pub mod individual;
pub mod local_coordinator;
pub mod messaging;
pub mod repository;
