// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! `darwin run`: host a coordinator and a pool of workers in one process,
//! connected through the in-process broker, and evolve the demo experiment
//! until the operator stops it or Ctrl-C is pressed.

use anyhow::{Context, Result};
use clap::Args;
use colored::Colorize;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use crate::demo::{self, BitString, ElitistOperator, GeneSumEvaluator};
use darwin_core::application::{
    create_experiment_repository, ExperimentCoordinatorRunner, ExperimentSetup,
    LocalCoordinatorRunner,
};
use darwin_core::config::DarwinConfig;
use darwin_core::coordinator::ExperimentCoordinator;
use darwin_core::events::ExperimentEvent;
use darwin_core::individual::ExperimentId;
use darwin_core::infrastructure::event_bus::{EventBus, EventBusError};
use darwin_core::infrastructure::messaging::{
    BrokerCoordinatorBus, BrokerSignalPublisher, BrokerSignalSubscriber, BrokerWorkerBus,
    InMemoryBroker,
};
use darwin_core::local_coordinator::LocalExperimentCoordinator;

/// Workers get this long after the coordinator terminated to receive the
/// termination signal before they are stopped directly.
const WORKER_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Args)]
pub struct RunArgs {
    /// Number of workers to simulate
    #[arg(short, long, default_value_t = 2)]
    pub workers: usize,

    /// Stop after this many generations
    #[arg(short, long, default_value_t = 50)]
    pub generations: u64,

    /// Genes per individual
    #[arg(long, default_value_t = 32)]
    pub genome_length: usize,

    /// Per-gene mutation probability
    #[arg(long, default_value_t = 0.02)]
    pub mutation_rate: f64,

    /// Simulated evaluation time per sample, in milliseconds
    #[arg(long, default_value_t = 20)]
    pub eval_delay_ms: u64,

    /// Expose Prometheus metrics on this port
    #[arg(long, env = "DARWIN_METRICS_PORT")]
    pub metrics_port: Option<u16>,
}

pub async fn execute(args: RunArgs, config_override: Option<PathBuf>) -> Result<()> {
    if args.workers == 0 {
        anyhow::bail!("At least one worker is required");
    }
    if !(0.0..=1.0).contains(&args.mutation_rate) {
        anyhow::bail!("--mutation-rate must be between 0 and 1");
    }

    let config = DarwinConfig::load_or_default(config_override)
        .context("Failed to load configuration")?;
    config
        .validate()
        .context("Configuration validation failed")?;

    if let Some(port) = args.metrics_port {
        metrics_exporter_prometheus::PrometheusBuilder::new()
            .with_http_listener(([0, 0, 0, 0], port))
            .install()
            .context("Failed to install Prometheus exporter")?;
        info!(port, "Prometheus metrics exporter listening");
    }

    let repository = create_experiment_repository::<BitString>(&config.storage.to_backend())
        .await
        .context("Failed to open experiment storage")?;
    let initial = demo::random_population(config.experiment.population_size, args.genome_length);
    let (experiment_id, fresh) =
        ExperimentSetup::setup(&config.experiment.name, repository.as_ref(), &initial)
            .await
            .context("Failed to set up experiment")?;

    if fresh {
        println!(
            "{} {} ({})",
            "Starting experiment".green().bold(),
            config.experiment.name.bold(),
            experiment_id
        );
    } else {
        println!(
            "{} {} ({})",
            "Resuming experiment".yellow().bold(),
            config.experiment.name.bold(),
            experiment_id
        );
    }

    let coordinator = ExperimentCoordinator::new(
        experiment_id,
        repository,
        Arc::new(ElitistOperator::new(args.generations, args.mutation_rate)),
        config.coordinator.max_time_between_results,
    )
    .await
    .context("Failed to attach coordinator")?;

    let broker = InMemoryBroker::new();
    let event_bus = EventBus::with_default_capacity();
    let progress = tokio::spawn(print_progress(event_bus.clone(), experiment_id));

    let mut workers = Vec::with_capacity(args.workers);
    for index in 0..args.workers {
        let local = LocalExperimentCoordinator::new(
            config.worker.sample_size,
            Arc::new(GeneSumEvaluator::new(Duration::from_millis(args.eval_delay_ms))),
            config.worker.execution_delay,
        );
        let worker = LocalCoordinatorRunner::new(
            format!("worker-{index}"),
            experiment_id,
            local,
            Arc::new(BrokerWorkerBus::<BitString>::new(broker.clone(), experiment_id)),
            Arc::new(BrokerSignalSubscriber::new(broker.clone(), experiment_id)),
            event_bus.clone(),
            config.worker.clone(),
        );
        worker.run().await.context("Failed to start worker")?;
        workers.push(worker);
    }

    let runner = ExperimentCoordinatorRunner::new(
        coordinator,
        Arc::new(BrokerCoordinatorBus::<BitString>::new(broker.clone(), experiment_id)),
        Arc::new(BrokerSignalPublisher::new(broker.clone(), experiment_id)),
        event_bus.clone(),
        config.coordinator.clone(),
        fresh,
    );
    runner.run().await.context("Failed to start coordinator")?;

    tokio::select! {
        _ = runner.terminated() => {}
        signal = tokio::signal::ctrl_c() => {
            signal.context("Failed to listen for Ctrl-C")?;
            println!("{}", "Interrupted, terminating experiment...".yellow());
            runner.terminate().await;
        }
    }

    for worker in &workers {
        if tokio::time::timeout(WORKER_SHUTDOWN_TIMEOUT, worker.terminated())
            .await
            .is_err()
        {
            warn!(worker = worker.name(), "Worker missed the termination signal, stopping it");
            worker.terminate().await;
        }
    }

    progress.abort();
    println!("{}", "✓ Experiment finished".green());
    Ok(())
}

async fn print_progress(event_bus: EventBus, experiment_id: ExperimentId) {
    let mut events = event_bus.subscribe_experiment(experiment_id);
    loop {
        match events.recv().await {
            Ok(ExperimentEvent::PopulationEvaluated {
                population_size,
                best_fitness,
                ..
            }) => {
                let best = best_fitness.map_or_else(|| "-".to_string(), |best| format!("{best:.1}"));
                println!(
                    "  {} population {:>4}  best {}",
                    "evaluated".cyan(),
                    population_size,
                    best.bold()
                );
            }
            Ok(ExperimentEvent::GenerationStaged {
                generation_number,
                population_size,
                ..
            }) => {
                println!(
                    "{} {:>4}  untested {:>4}",
                    "generation".blue().bold(),
                    generation_number,
                    population_size
                );
            }
            Ok(ExperimentEvent::SampleResent { sample_size, .. }) => {
                println!("  {} {} pending individuals", "resent".yellow(), sample_size);
            }
            Ok(ExperimentEvent::ExperimentTerminated { .. }) => {
                println!("{}", "Experiment terminated".bold());
                break;
            }
            Ok(_) => {}
            Err(EventBusError::Lagged(_)) | Err(EventBusError::Empty) => {}
            Err(EventBusError::Closed) => break,
        }
    }
}
