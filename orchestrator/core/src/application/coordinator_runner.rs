// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Experiment Coordinator Runner
//!
//! Wires an [`ExperimentCoordinator`] to its transports and drives it:
//!
//! - "testing sample selected" → purge the individuals queue, broadcast the
//!   new-generation signal, send the sample
//! - result received → `add_individual_fitness`
//! - monitor tick → ask the broker for the queued count, restart a generation
//!   whose staging failed, otherwise `timeout(count)`, resending the pending
//!   sample when it fires
//! - coordinator terminated → `terminate()`
//!
//! Every coordinator call made by the runner goes through one event loop, so
//! a timeout check never runs concurrently with a result being applied.
//!
//! # Architecture
//!
//! - **Layer:** Application Layer
//! - **Purpose:** Process-boundary lifecycle for the coordinator side

use crate::application::monitor::Monitor;
use crate::domain::config::CoordinatorSettings;
use crate::domain::coordinator::{ExperimentCoordinator, FitnessOutcome, GenerationSample};
use crate::domain::events::ExperimentEvent;
use crate::domain::individual::{ExperimentId, Genome};
use crate::domain::messaging::{CoordinatorMessageBus, FitnessReport, MessagingError, PubSubPublisher};
use crate::infrastructure::event_bus::EventBus;
use crate::reactive::{ObservableScalar, Promise};
use anyhow::{Context, Result};
use chrono::Utc;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

enum RunnerEvent<G> {
    SampleSelected(GenerationSample<G>),
    PopulationEvaluated(GenerationSample<G>),
    ResultReceived(FitnessReport),
    UndeliveredCount(usize),
    CoordinatorStopped,
}

pub struct ExperimentCoordinatorRunner<G: Genome> {
    coordinator: Arc<ExperimentCoordinator<G>>,
    bus: Arc<dyn CoordinatorMessageBus<G>>,
    publisher: Arc<dyn PubSubPublisher>,
    event_bus: EventBus,
    settings: CoordinatorSettings,
    dispatch_on_start: bool,
    sender: mpsc::UnboundedSender<RunnerEvent<G>>,
    receiver: Mutex<Option<mpsc::UnboundedReceiver<RunnerEvent<G>>>>,
    monitor: Mutex<Option<Monitor>>,
    delivery_probe: Mutex<Option<Promise<usize, MessagingError>>>,
    started: AtomicBool,
    terminating: AtomicBool,
    is_terminated: ObservableScalar<bool>,
    shutdown: CancellationToken,
}

impl<G: Genome> ExperimentCoordinatorRunner<G> {
    /// `dispatch_on_start` sends the pending sample as soon as the runner
    /// starts. A resumed experiment leaves it off and lets the timeout path
    /// resend whatever is still pending.
    pub fn new(
        coordinator: Arc<ExperimentCoordinator<G>>,
        bus: Arc<dyn CoordinatorMessageBus<G>>,
        publisher: Arc<dyn PubSubPublisher>,
        event_bus: EventBus,
        settings: CoordinatorSettings,
        dispatch_on_start: bool,
    ) -> Arc<Self> {
        let (sender, receiver) = mpsc::unbounded_channel();
        Arc::new(Self {
            coordinator,
            bus,
            publisher,
            event_bus,
            settings,
            dispatch_on_start,
            sender,
            receiver: Mutex::new(Some(receiver)),
            monitor: Mutex::new(None),
            delivery_probe: Mutex::new(None),
            started: AtomicBool::new(false),
            terminating: AtomicBool::new(false),
            is_terminated: ObservableScalar::new(false),
            shutdown: CancellationToken::new(),
        })
    }

    pub fn experiment_id(&self) -> ExperimentId {
        self.coordinator.experiment_id()
    }

    pub fn coordinator(&self) -> &Arc<ExperimentCoordinator<G>> {
        &self.coordinator
    }

    pub fn is_terminated(&self) -> &ObservableScalar<bool> {
        &self.is_terminated
    }

    /// Resolves once `terminate` has completed.
    pub async fn terminated(&self) {
        self.shutdown.cancelled().await;
    }

    /// Start listening, the event loop and the monitor. Calling `run` again
    /// is a no-op.
    pub async fn run(self: &Arc<Self>) -> Result<()> {
        if self.started.swap(true, Ordering::SeqCst) {
            debug!(experiment_id = %self.experiment_id(), "Coordinator runner already started");
            return Ok(());
        }
        let Some(receiver) = self.receiver.lock().take() else {
            return Ok(());
        };

        self.register_listeners();
        self.bus
            .listen()
            .await
            .context("Failed to start coordinator message bus")?;
        self.publisher
            .listen()
            .await
            .context("Failed to start signal publisher")?;

        tokio::spawn(Arc::clone(self).process_events(receiver));
        *self.monitor.lock() = Some(self.start_monitor());

        info!(
            experiment_id = %self.experiment_id(),
            dispatch_on_start = self.dispatch_on_start,
            "Coordinator runner started"
        );

        if self.dispatch_on_start {
            let sample = self
                .coordinator
                .untested_individuals()
                .await
                .context("Failed to load the untested sample")?;
            self.dispatch_sample(sample).await;
        }
        Ok(())
    }

    /// Shut down: stop the monitor, stop the coordinator, broadcast
    /// termination, wait the grace period and disconnect. Failures along the
    /// way are logged and the sequence carries on.
    pub async fn terminate(&self) {
        if self.terminating.swap(true, Ordering::SeqCst) {
            return;
        }
        info!(experiment_id = %self.experiment_id(), "Terminating coordinator runner");

        let monitor = self.monitor.lock().take();
        if let Some(monitor) = monitor {
            monitor.stop().await;
        }
        if !self.coordinator.is_terminated().get() {
            self.coordinator.stop().await;
        }

        if let Err(e) = self.publisher.broadcast_experiment_termination_signal().await {
            warn!(error = %e, "Failed to broadcast experiment termination");
        }
        self.event_bus.publish(ExperimentEvent::ExperimentTerminated {
            experiment_id: self.experiment_id(),
            terminated_at: Utc::now(),
        });

        tokio::time::sleep(self.settings.termination_grace).await;

        self.bus.stop().await;
        self.publisher.stop().await;
        self.is_terminated.set(true);
        self.shutdown.cancel();
        info!(experiment_id = %self.experiment_id(), "Coordinator runner terminated");
    }

    fn register_listeners(&self) {
        let sender = self.sender.clone();
        self.coordinator
            .add_on_testing_sample_selected_listener(move |sample| {
                let _ = sender.send(RunnerEvent::SampleSelected(sample.clone()));
            });

        let sender = self.sender.clone();
        self.coordinator
            .add_on_population_evaluated_listener(move |population| {
                let _ = sender.send(RunnerEvent::PopulationEvaluated(population.clone()));
            });

        let sender = self.sender.clone();
        self.coordinator.is_terminated().observe(
            move |terminated, _| {
                if *terminated {
                    let _ = sender.send(RunnerEvent::CoordinatorStopped);
                }
            },
            false,
        );

        let sender = self.sender.clone();
        self.bus
            .add_on_result_received_listener(Arc::new(move |report: &FitnessReport| {
                let _ = sender.send(RunnerEvent::ResultReceived(*report));
            }));
    }

    fn start_monitor(self: &Arc<Self>) -> Monitor {
        let runner: Weak<Self> = Arc::downgrade(self);
        Monitor::start(
            "experiment_coordinator",
            self.settings.monitor_interval,
            move || {
                if let Some(runner) = runner.upgrade() {
                    runner.probe_undelivered();
                }
                async {}
            },
        )
    }

    /// Ask the broker how many individuals are still queued. The answer comes
    /// back through the event loop. While a previous query is unanswered the
    /// tick is skipped; a rejected query skips the tick too. An abandoned
    /// query is not pending, so the next tick asks again.
    fn probe_undelivered(&self) {
        let mut probe = self.delivery_probe.lock();
        if probe.as_ref().is_some_and(Promise::is_pending) {
            debug!("Previous delivery count still pending, skipping tick");
            return;
        }

        let promise = self.bus.pending_deliveries_count();
        let sender = self.sender.clone();
        promise
            .then(move |count| {
                let _ = sender.send(RunnerEvent::UndeliveredCount(count));
            })
            .catch(|e| debug!(error = %e, "Delivery count unavailable, skipping tick"));
        *probe = Some(promise);
    }

    async fn process_events(self: Arc<Self>, mut receiver: mpsc::UnboundedReceiver<RunnerEvent<G>>) {
        loop {
            let event = tokio::select! {
                _ = self.shutdown.cancelled() => break,
                event = receiver.recv() => match event {
                    Some(event) => event,
                    None => break,
                },
            };

            match event {
                RunnerEvent::SampleSelected(sample) => self.dispatch_sample(sample).await,
                RunnerEvent::PopulationEvaluated(population) => {
                    self.publish_population_evaluated(&population)
                }
                RunnerEvent::ResultReceived(report) => self.apply_result(report).await,
                RunnerEvent::UndeliveredCount(count) => self.check_timeout(count).await,
                RunnerEvent::CoordinatorStopped => {
                    self.terminate().await;
                    break;
                }
            }
        }
        debug!(experiment_id = %self.experiment_id(), "Coordinator event loop exited");
    }

    /// Send a newly staged sample: the previous generation's leftovers are
    /// purged and workers are told to drop their partial batches first.
    async fn dispatch_sample(&self, sample: GenerationSample<G>) {
        if let Err(e) = self.bus.clear_individuals_queue().await {
            warn!(error = %e, "Failed to purge the individuals queue");
        }
        if let Err(e) = self.publisher.broadcast_new_generation_signal().await {
            warn!(error = %e, "Failed to broadcast new generation signal");
        }

        match self.coordinator.generation_number().await {
            Ok(generation_number) => self.event_bus.publish(ExperimentEvent::GenerationStaged {
                experiment_id: self.experiment_id(),
                generation_id: sample.generation_id,
                generation_number,
                population_size: sample.individuals.len(),
                staged_at: Utc::now(),
            }),
            Err(e) => warn!(error = %e, "Failed to count generations"),
        }

        let sent = self.send_sample(&sample).await;
        self.event_bus.publish(ExperimentEvent::SampleDispatched {
            experiment_id: self.experiment_id(),
            generation_id: sample.generation_id,
            sample_size: sent,
            dispatched_at: Utc::now(),
        });
    }

    async fn send_sample(&self, sample: &GenerationSample<G>) -> usize {
        let mut sent = 0;
        for individual in &sample.individuals {
            match self.bus.send_individual(individual).await {
                Ok(()) => sent += 1,
                Err(e) => {
                    error!(individual_id = %individual.id, error = %e, "Failed to send individual");
                }
            }
        }
        sent
    }

    async fn apply_result(&self, report: FitnessReport) {
        match self
            .coordinator
            .add_individual_fitness(report.id, report.fitness)
            .await
        {
            Ok(FitnessOutcome::Ignored) => {}
            Ok(FitnessOutcome::Recorded { remaining }) => self.publish_fitness(report, remaining),
            Ok(FitnessOutcome::GenerationCompleted) => self.publish_fitness(report, 0),
            Err(e) => error!(individual_id = %report.id, error = %e, "Failed to record fitness"),
        }
    }

    async fn check_timeout(&self, undelivered: usize) {
        match self.coordinator.recover_stalled_generation().await {
            Ok(true) => return,
            Ok(false) => {}
            Err(e) => {
                error!(error = %e, "Failed to recover stalled generation");
                return;
            }
        }
        if !self.coordinator.timeout(undelivered).await {
            return;
        }
        let sample = match self.coordinator.untested_individuals().await {
            Ok(sample) => sample,
            Err(e) => {
                error!(error = %e, "Failed to load the pending sample for resend");
                return;
            }
        };
        warn!(
            generation_id = %sample.generation_id,
            pending = sample.individuals.len(),
            "No results within the allowed time, resending pending sample"
        );

        let sent = self.send_sample(&sample).await;
        metrics::counter!("darwin_samples_resent_total").increment(1);
        self.event_bus.publish(ExperimentEvent::SampleResent {
            experiment_id: self.experiment_id(),
            generation_id: sample.generation_id,
            sample_size: sent,
            resent_at: Utc::now(),
        });
    }

    fn publish_fitness(&self, report: FitnessReport, remaining: usize) {
        self.event_bus.publish(ExperimentEvent::FitnessRecorded {
            experiment_id: self.experiment_id(),
            individual_id: report.id,
            fitness: report.fitness,
            remaining,
            recorded_at: Utc::now(),
        });
    }

    fn publish_population_evaluated(&self, population: &GenerationSample<G>) {
        let best_fitness = population
            .individuals
            .iter()
            .filter_map(|individual| individual.fitness)
            .fold(None, |best: Option<f64>, fitness| {
                Some(best.map_or(fitness, |best| best.max(fitness)))
            });
        self.event_bus.publish(ExperimentEvent::PopulationEvaluated {
            experiment_id: self.experiment_id(),
            generation_id: population.generation_id,
            population_size: population.individuals.len(),
            best_fitness,
            evaluated_at: Utc::now(),
        });
    }
}
