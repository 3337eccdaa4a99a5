// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Configuration management commands
//!
//! Commands: show, validate, generate

use anyhow::{Context, Result};
use clap::Subcommand;
use colored::Colorize;
use std::path::{Path, PathBuf};

use darwin_core::config::{DarwinConfig, StorageSettings};

#[derive(Subcommand)]
pub enum ConfigCommand {
    /// Show current configuration
    Show {
        /// Show config file paths checked
        #[arg(long)]
        paths: bool,
    },

    /// Validate configuration file
    Validate {
        /// Path to config file (default: discover)
        #[arg(value_name = "FILE")]
        file: Option<PathBuf>,
    },

    /// Generate sample configuration
    Generate {
        /// Output path (default: ./darwin-config.yaml)
        #[arg(short, long, default_value = "./darwin-config.yaml")]
        output: PathBuf,

        /// Include comments explaining every field
        #[arg(long)]
        examples: bool,
    },
}

pub async fn handle_command(
    command: ConfigCommand,
    config_override: Option<PathBuf>,
) -> Result<()> {
    match command {
        ConfigCommand::Show { paths } => show(config_override, paths).await,
        ConfigCommand::Validate { file } => validate(file.or(config_override)).await,
        ConfigCommand::Generate { output, examples } => generate(&output, examples).await,
    }
}

async fn show(config_override: Option<PathBuf>, show_paths: bool) -> Result<()> {
    let config = DarwinConfig::load_or_default(config_override.clone())
        .context("Failed to load configuration")?;

    if show_paths {
        println!("{}", "Configuration discovery paths:".bold());
        if let Some(path) = &config_override {
            println!("  1. --config flag: {}", path.display());
        } else {
            println!("  1. --config flag: {}", "(not set)".dimmed());
        }
        println!(
            "  2. DARWIN_CONFIG_PATH: {}",
            std::env::var("DARWIN_CONFIG_PATH")
                .unwrap_or_else(|_| "(not set)".to_string())
                .dimmed()
        );
        println!("  3. ./darwin-config.yaml");
        println!("  4. ~/.darwin/config.yaml");
        println!("  5. /etc/darwin/config.yaml");
        println!();
    }

    println!("{}", "Current configuration:".bold());
    println!();

    println!("{}", "Experiment:".bold());
    println!("  Name: {}", config.experiment.name);
    println!("  Population size: {}", config.experiment.population_size);
    println!();

    println!("{}", "Coordinator:".bold());
    println!(
        "  Max time between results: {:?}",
        config.coordinator.max_time_between_results
    );
    println!("  Monitor interval: {:?}", config.coordinator.monitor_interval);
    println!("  Termination grace: {:?}", config.coordinator.termination_grace);
    println!();

    println!("{}", "Worker:".bold());
    println!("  Sample size: {}", config.worker.sample_size);
    println!("  Execution delay: {:?}", config.worker.execution_delay);
    println!("  Monitor interval: {:?}", config.worker.monitor_interval);
    println!();

    println!("{}", "Storage:".bold());
    match &config.storage {
        StorageSettings::Memory => println!("  Backend: memory"),
        StorageSettings::Sqlite { path } => {
            println!("  Backend: sqlite");
            println!("  Path: {}", path.display());
        }
    }
    println!();

    Ok(())
}

async fn validate(config_path: Option<PathBuf>) -> Result<()> {
    println!("Validating configuration...");

    let config = DarwinConfig::load_or_default(config_path)
        .context("Failed to load configuration")?;

    config
        .validate()
        .context("Configuration validation failed")?;

    println!("{}", "✓ Configuration is valid".green());

    Ok(())
}

fn sample_config(with_examples: bool) -> Result<String> {
    if with_examples {
        return Ok(include_str!("../../templates/darwin-config.yaml").to_string());
    }
    DarwinConfig::default()
        .to_yaml_string()
        .context("Failed to render default configuration")
}

async fn generate(output: &Path, with_examples: bool) -> Result<()> {
    let sample = sample_config(with_examples)?;

    std::fs::write(output, sample)
        .with_context(|| format!("Failed to write config to {:?}", output))?;

    println!(
        "{}",
        format!("✓ Configuration generated: {}", output.display()).green()
    );

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_both_samples_parse_and_validate() {
        for with_examples in [false, true] {
            let yaml = sample_config(with_examples).unwrap();
            let config = DarwinConfig::from_yaml_str(&yaml).unwrap();
            config.validate().unwrap();
        }
    }

    #[tokio::test]
    async fn test_generate_writes_loadable_file() {
        let dir = tempfile::tempdir().unwrap();
        let output = dir.path().join("darwin-config.yaml");

        generate(&output, true).await.unwrap();

        let config = DarwinConfig::from_yaml_file(&output).unwrap();
        assert_eq!(config.experiment.name, "ex-1");
        assert_eq!(config.worker.sample_size, 4);
    }
}
