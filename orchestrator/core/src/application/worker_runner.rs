// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Local Coordinator Runner
//!
//! Worker-side counterpart of the coordinator runner. Wiring:
//!
//! - busy → pause the individuals consumer, idle → resume it
//! - individual received → `add_untested_individual`
//! - evaluation complete → send one result per evaluated individual
//! - new-generation signal → `reset`
//! - termination signal or local stop → `terminate`
//! - monitor tick → `execute` once a partial sample has waited long enough
//!
//! # Architecture
//!
//! - **Layer:** Application Layer
//! - **Purpose:** Process-boundary lifecycle for one worker

use crate::application::monitor::Monitor;
use crate::domain::config::WorkerSettings;
use crate::domain::events::ExperimentEvent;
use crate::domain::individual::{ExperimentId, Genome, Individual};
use crate::domain::local_coordinator::LocalExperimentCoordinator;
use crate::domain::messaging::{FitnessReport, PubSubSubscriber, WorkerMessageBus};
use crate::infrastructure::event_bus::EventBus;
use crate::reactive::ObservableScalar;
use anyhow::{Context, Result};
use chrono::Utc;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

pub struct LocalCoordinatorRunner<G: Genome> {
    name: String,
    experiment_id: ExperimentId,
    coordinator: Arc<LocalExperimentCoordinator<G>>,
    bus: Arc<dyn WorkerMessageBus<G>>,
    subscriber: Arc<dyn PubSubSubscriber>,
    event_bus: EventBus,
    settings: WorkerSettings,
    monitor: Mutex<Option<Monitor>>,
    started: AtomicBool,
    terminating: AtomicBool,
    is_terminated: ObservableScalar<bool>,
    shutdown: CancellationToken,
}

impl<G: Genome> LocalCoordinatorRunner<G> {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        name: impl Into<String>,
        experiment_id: ExperimentId,
        coordinator: Arc<LocalExperimentCoordinator<G>>,
        bus: Arc<dyn WorkerMessageBus<G>>,
        subscriber: Arc<dyn PubSubSubscriber>,
        event_bus: EventBus,
        settings: WorkerSettings,
    ) -> Arc<Self> {
        Arc::new(Self {
            name: name.into(),
            experiment_id,
            coordinator,
            bus,
            subscriber,
            event_bus,
            settings,
            monitor: Mutex::new(None),
            started: AtomicBool::new(false),
            terminating: AtomicBool::new(false),
            is_terminated: ObservableScalar::new(false),
            shutdown: CancellationToken::new(),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn coordinator(&self) -> &Arc<LocalExperimentCoordinator<G>> {
        &self.coordinator
    }

    pub fn is_terminated(&self) -> &ObservableScalar<bool> {
        &self.is_terminated
    }

    pub async fn terminated(&self) {
        self.shutdown.cancelled().await;
    }

    pub async fn run(self: &Arc<Self>) -> Result<()> {
        if self.started.swap(true, Ordering::SeqCst) {
            debug!(worker = %self.name, "Worker runner already started");
            return Ok(());
        }

        self.register_listeners();
        self.subscriber
            .listen()
            .await
            .context("Failed to start signal subscriber")?;
        self.bus
            .listen()
            .await
            .context("Failed to start worker message bus")?;

        let coordinator = Arc::clone(&self.coordinator);
        *self.monitor.lock() = Some(Monitor::start(
            "local_coordinator",
            self.settings.monitor_interval,
            move || {
                if coordinator.timeout() {
                    debug!(
                        sample = coordinator.sample_len(),
                        "Execution delay elapsed, evaluating partial sample"
                    );
                    coordinator.execute();
                }
                async {}
            },
        ));

        info!(
            worker = %self.name,
            experiment_id = %self.experiment_id,
            sample_size = self.coordinator.sample_size(),
            "Worker runner started"
        );
        Ok(())
    }

    /// Stop the monitor and the local coordinator and disconnect.
    pub async fn terminate(&self) {
        if self.terminating.swap(true, Ordering::SeqCst) {
            return;
        }
        info!(worker = %self.name, "Terminating worker runner");

        let monitor = self.monitor.lock().take();
        if let Some(monitor) = monitor {
            monitor.stop().await;
        }
        self.coordinator.stop();
        self.bus.stop().await;
        self.subscriber.stop().await;

        self.is_terminated.set(true);
        self.shutdown.cancel();
        info!(worker = %self.name, "Worker runner terminated");
    }

    fn register_listeners(self: &Arc<Self>) {
        let bus = Arc::clone(&self.bus);
        self.coordinator.is_busy().observe(
            move |busy, _| {
                if *busy {
                    bus.pause();
                } else {
                    bus.resume();
                }
            },
            false,
        );

        let runner = Arc::downgrade(self);
        self.coordinator
            .add_on_evaluation_complete_listener(move |evaluated| {
                if let Some(runner) = runner.upgrade() {
                    let evaluated = evaluated.clone();
                    tokio::spawn(async move { runner.send_results(evaluated).await });
                }
            });

        let runner = Arc::downgrade(self);
        self.coordinator.is_terminated().observe(
            move |terminated, _| {
                if *terminated {
                    spawn_terminate(&runner);
                }
            },
            false,
        );

        let coordinator = Arc::clone(&self.coordinator);
        self.bus
            .add_on_individual_received_listener(Arc::new(move |individual: &Individual<G>| {
                coordinator.add_untested_individual(individual.clone());
            }));

        let coordinator = Arc::clone(&self.coordinator);
        self.subscriber.add_on_new_generation_listener(Arc::new(move |_: &()| {
            debug!("New generation signalled, discarding local sample");
            coordinator.reset();
        }));

        let runner = Arc::downgrade(self);
        self.subscriber
            .add_on_experiment_termination_listener(Arc::new(move |_: &()| {
                info!("Experiment termination signalled");
                spawn_terminate(&runner);
            }));
    }

    async fn send_results(&self, evaluated: Vec<Individual<G>>) {
        let mut sent = 0;
        for individual in &evaluated {
            let Some(fitness) = individual.fitness else {
                warn!(individual_id = %individual.id, "Evaluator returned no fitness, skipping");
                continue;
            };
            let report = FitnessReport {
                id: individual.id,
                fitness,
            };
            match self.bus.send_result(&report).await {
                Ok(()) => sent += 1,
                Err(e) => warn!(individual_id = %individual.id, error = %e, "Failed to send result"),
            }
        }
        self.event_bus.publish(ExperimentEvent::SampleEvaluated {
            experiment_id: self.experiment_id,
            worker: self.name.clone(),
            sample_size: sent,
            evaluated_at: Utc::now(),
        });
    }
}

/// Termination is requested from transport and coordinator callbacks, which
/// `terminate` joins; it has to run on its own task.
fn spawn_terminate<G: Genome>(runner: &Weak<LocalCoordinatorRunner<G>>) {
    if let Some(runner) = runner.upgrade() {
        tokio::spawn(async move { runner.terminate().await });
    }
}
