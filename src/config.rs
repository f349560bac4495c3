//! Application configuration.
//!
//! Aggregates per-module configuration into a single Config struct that can
//! be loaded from YAML files or environment variables.

use std::time::Duration;

use serde::Deserialize;

use crate::logging::LogConfig;
use crate::queue::QueueConfig;
use crate::socket::SocketConfig;

/// Default configuration file name.
pub const DEFAULT_CONFIG_FILE: &str = "config.yaml";
/// Environment variable for configuration file path.
pub const CONFIG_ENV_VAR: &str = "MTA2AMQP_CONFIG";
/// Prefix for configuration environment variables.
pub const CONFIG_ENV_PREFIX: &str = "MTA2AMQP";
/// Environment variable for logging filter overrides.
pub const LOG_ENV_VAR: &str = "MTA2AMQP_LOG";

/// Configuration errors. All of these are fatal at startup.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to load configuration: {0}")]
    Load(#[from] ::config::ConfigError),

    #[error("Required configuration value '{0}' is empty")]
    MissingField(&'static str),
}

/// Main application configuration.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Broker connection parameters.
    pub queue: QueueConfig,
    /// Local socket the MTA writes bounce reports to.
    pub input: SocketConfig,
    /// Logging configuration.
    pub log: LogConfig,
    /// Shutdown behavior.
    pub shutdown: ShutdownConfig,
}

/// Shutdown behavior configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ShutdownConfig {
    /// Bounded wait for in-flight connection handlers, in seconds.
    pub grace_secs: u64,
}

impl Default for ShutdownConfig {
    fn default() -> Self {
        Self { grace_secs: 2 }
    }
}

impl ShutdownConfig {
    pub fn grace(&self) -> Duration {
        Duration::from_secs(self.grace_secs)
    }
}

impl Config {
    /// Load configuration from file and environment.
    ///
    /// Sources (in order of priority, later overrides earlier):
    /// 1. `config.yaml` in the current directory (if it exists)
    /// 2. File specified by the `path` argument (if provided)
    /// 3. File named by `MTA2AMQP_CONFIG` (if set)
    /// 4. Environment variables with the `MTA2AMQP` prefix
    pub fn load(path: Option<&str>) -> Result<Self, ConfigError> {
        use ::config::{Config as ConfigLib, Environment, File, FileFormat};

        let mut builder = ConfigLib::builder()
            .add_source(File::new(DEFAULT_CONFIG_FILE, FileFormat::Yaml).required(false));

        if let Some(config_path) = path {
            builder = builder.add_source(File::new(config_path, FileFormat::Yaml).required(true));
        }

        if let Ok(config_path) = std::env::var(CONFIG_ENV_VAR) {
            builder = builder.add_source(File::new(&config_path, FileFormat::Yaml).required(true));
        }

        let config = builder
            .add_source(
                Environment::with_prefix(CONFIG_ENV_PREFIX)
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        Ok(config.try_deserialize()?)
    }

    /// Check all required connection parameters once, before use.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.queue.validate()?;
        self.input.validate()?;
        Ok(())
    }
}
