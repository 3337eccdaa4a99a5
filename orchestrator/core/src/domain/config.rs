// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Darwin Configuration
//!
//! YAML configuration for one experiment host, every field defaulted:
//!
//! ```yaml
//! experiment:
//!   name: ex-1
//!   population_size: 10
//! coordinator:
//!   max_time_between_results: 5m
//!   monitor_interval: 5s
//!   termination_grace: 5s
//! worker:
//!   sample_size: 8            # defaults to the CPU count
//!   execution_delay: 10s
//!   monitor_interval: 5s
//! storage:
//!   backend: sqlite           # or memory
//!   path: darwin.db
//! ```
//!
//! ## Discovery Order
//!
//! 1. Explicit path (fails if missing or invalid)
//! 2. `DARWIN_CONFIG_PATH`
//! 3. `./darwin-config.yaml`
//! 4. `~/.darwin/config.yaml`
//! 5. `/etc/darwin/config.yaml`
//! 6. Built-in defaults

use crate::domain::repository::{SqliteConfig, StorageBackend};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DarwinConfig {
    pub experiment: ExperimentSettings,
    pub coordinator: CoordinatorSettings,
    pub worker: WorkerSettings,
    pub storage: StorageSettings,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExperimentSettings {
    pub name: String,
    pub population_size: usize,
}

impl Default for ExperimentSettings {
    fn default() -> Self {
        Self {
            name: "ex-1".to_string(),
            population_size: 10,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CoordinatorSettings {
    /// Silence after which still-pending individuals are resent
    #[serde(with = "humantime_serde")]
    pub max_time_between_results: Duration,
    #[serde(with = "humantime_serde")]
    pub monitor_interval: Duration,
    /// Wait after broadcasting termination before disconnecting
    #[serde(with = "humantime_serde")]
    pub termination_grace: Duration,
}

impl Default for CoordinatorSettings {
    fn default() -> Self {
        Self {
            max_time_between_results: Duration::from_secs(5 * 60),
            monitor_interval: Duration::from_secs(5),
            termination_grace: Duration::from_secs(5),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerSettings {
    pub sample_size: usize,
    /// Wait before a partial batch is evaluated anyway
    #[serde(with = "humantime_serde")]
    pub execution_delay: Duration,
    #[serde(with = "humantime_serde")]
    pub monitor_interval: Duration,
}

impl Default for WorkerSettings {
    fn default() -> Self {
        Self {
            sample_size: default_sample_size(),
            execution_delay: Duration::from_secs(10),
            monitor_interval: Duration::from_secs(5),
        }
    }
}

fn default_sample_size() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "backend", rename_all = "lowercase")]
pub enum StorageSettings {
    #[default]
    Memory,
    Sqlite { path: PathBuf },
}

impl StorageSettings {
    pub fn to_backend(&self) -> StorageBackend {
        match self {
            StorageSettings::Memory => StorageBackend::InMemory,
            StorageSettings::Sqlite { path } => StorageBackend::Sqlite(SqliteConfig {
                url: format!("sqlite://{}?mode=rwc", path.display()),
            }),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config at {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config: {0}")]
    Parse(#[from] serde_yaml::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

impl DarwinConfig {
    pub fn from_yaml_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_yaml_str(&content)
    }

    pub fn from_yaml_str(yaml: &str) -> Result<Self, ConfigError> {
        Ok(serde_yaml::from_str(yaml)?)
    }

    pub fn to_yaml_string(&self) -> Result<String, ConfigError> {
        Ok(serde_yaml::to_string(self)?)
    }

    pub fn discover_config() -> Option<PathBuf> {
        if let Ok(path) = std::env::var("DARWIN_CONFIG_PATH") {
            let path = PathBuf::from(path);
            if path.exists() {
                return Some(path);
            }
        }

        let cwd = PathBuf::from("./darwin-config.yaml");
        if cwd.exists() {
            return Some(cwd);
        }

        if let Some(home) = dirs::home_dir() {
            let user_config = home.join(".darwin").join("config.yaml");
            if user_config.exists() {
                return Some(user_config);
            }
        }

        let system_config = PathBuf::from("/etc/darwin/config.yaml");
        if system_config.exists() {
            return Some(system_config);
        }

        None
    }

    /// Load configuration with discovery, fallback to default
    pub fn load_or_default(cli_path: Option<PathBuf>) -> Result<Self, ConfigError> {
        let mut config = if let Some(path) = cli_path {
            tracing::info!("Loading configuration from explicit path: {:?}", path);
            Self::from_yaml_file(&path)?
        } else if let Some(path) = Self::discover_config() {
            tracing::info!("Loading configuration from discovered path: {:?}", path);
            Self::from_yaml_file(&path)?
        } else {
            tracing::debug!("No configuration file found in standard locations, using defaults");
            Self::default()
        };
        config.apply_env_overrides();
        Ok(config)
    }

    pub fn apply_env_overrides(&mut self) {
        if let Ok(name) = std::env::var("DARWIN_EXPERIMENT_NAME") {
            tracing::info!("Environment override: DARWIN_EXPERIMENT_NAME={}", name);
            self.experiment.name = name;
        }

        if let Ok(val) = std::env::var("DARWIN_SAMPLE_SIZE") {
            match val.parse::<usize>() {
                Ok(size) => {
                    tracing::info!("Environment override: DARWIN_SAMPLE_SIZE={}", size);
                    self.worker.sample_size = size;
                }
                Err(_) => tracing::warn!(
                    "Invalid value for DARWIN_SAMPLE_SIZE: '{}'. Expected a positive integer. Ignoring.",
                    val
                ),
            }
        }

        if let Ok(path) = std::env::var("DARWIN_STORAGE_PATH") {
            tracing::info!("Environment override: DARWIN_STORAGE_PATH={}", path);
            self.storage = StorageSettings::Sqlite {
                path: PathBuf::from(path),
            };
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.experiment.name.trim().is_empty() {
            return Err(ConfigError::Invalid("experiment.name cannot be empty".into()));
        }
        if self.experiment.population_size == 0 {
            return Err(ConfigError::Invalid(
                "experiment.population_size must be greater than 0".into(),
            ));
        }
        if self.worker.sample_size == 0 {
            return Err(ConfigError::Invalid(
                "worker.sample_size must be greater than 0".into(),
            ));
        }

        let durations = [
            ("coordinator.max_time_between_results", self.coordinator.max_time_between_results),
            ("coordinator.monitor_interval", self.coordinator.monitor_interval),
            ("worker.execution_delay", self.worker.execution_delay),
            ("worker.monitor_interval", self.worker.monitor_interval),
        ];
        for (field, value) in durations {
            if value.is_zero() {
                return Err(ConfigError::Invalid(format!("{field} must be non-zero")));
            }
        }

        if let StorageSettings::Sqlite { path } = &self.storage {
            if path.as_os_str().is_empty() {
                return Err(ConfigError::Invalid("storage.path cannot be empty".into()));
            }
        }

        Ok(())
    }
}
