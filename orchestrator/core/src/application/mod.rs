// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

pub mod coordinator_runner;
pub mod experiment_setup;
pub mod monitor;
pub mod repository_factory;
pub mod worker_runner;

pub use coordinator_runner::ExperimentCoordinatorRunner;
pub use experiment_setup::{ExperimentSetup, IntegrityViolation};
pub use monitor::Monitor;
pub use repository_factory::create_experiment_repository;
pub use worker_runner::LocalCoordinatorRunner;
