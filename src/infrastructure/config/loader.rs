use anyhow::{Context, Result};
use figment::providers::{Env, Format, Serialized, Yaml};
use figment::Figment;
use std::path::Path;
use thiserror::Error;

use crate::domain::models::config::Config;

/// Project-local configuration directory.
pub const CONFIG_DIR: &str = ".faultline";

/// Environment variable prefix; nested keys are split on `__`.
pub const ENV_PREFIX: &str = "FAULTLINE_";

/// Configuration error types
#[derive(Error, Debug, PartialEq)]
pub enum ConfigError {
    #[error("Invalid {name}: {value}. Must be greater than 0")]
    ZeroInterval { name: &'static str, value: u64 },

    #[error(
        "Invalid liveness TTLs: critical_ttl_secs ({critical}) must be greater than heartbeat_ttl_secs ({ttl})"
    )]
    InvalidTtl { ttl: u64, critical: u64 },

    #[error("Invalid mailbox_capacity: {0}. Must be at least 1")]
    InvalidMailboxCapacity(usize),

    #[error("Invalid max_assignments_per_pass: {0}. Must be at least 1")]
    InvalidAssignmentsPerPass(usize),

    #[error("Invalid max_concurrent_tasks: {0}. Must be at least 1")]
    InvalidMaxConcurrentTasks(usize),

    #[error("Invalid default_priority: {0}. Cannot be negative")]
    InvalidDefaultPriority(i32),

    #[error("Invalid {name}: {value}. Must be within (0, 100]")]
    InvalidThreshold { name: &'static str, value: f64 },

    #[error("Invalid fleet entry for {capability}: {reason}")]
    InvalidFleetEntry { capability: String, reason: String },

    #[error("Invalid simulation settings: {0}")]
    InvalidSimulation(String),

    #[error("Invalid log level: {0}. Must be one of: trace, debug, info, warn, error")]
    InvalidLogLevel(String),

    #[error("Invalid log format: {0}. Must be one of: json, pretty")]
    InvalidLogFormat(String),

    #[error("Invalid log rotation: {0}. Must be one of: daily, hourly, never")]
    InvalidRotation(String),
}

/// Configuration loader with hierarchical merging
pub struct ConfigLoader;

impl ConfigLoader {
    /// Load configuration with hierarchical merging
    ///
    /// Precedence (lowest to highest):
    /// 1. Programmatic defaults (Serialized)
    /// 2. .faultline/config.yaml (project config)
    /// 3. .faultline/local.yaml (project local overrides, optional)
    /// 4. Environment variables (FAULTLINE_* prefix, highest priority)
    pub fn load() -> Result<Config> {
        let figment = Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Yaml::file(format!("{CONFIG_DIR}/config.yaml")))
            .merge(Yaml::file(format!("{CONFIG_DIR}/local.yaml")))
            .merge(Env::prefixed(ENV_PREFIX).split("__"));
        Self::extract(&figment).context("Failed to extract configuration from figment")
    }

    /// Load configuration from a specific file. Environment variables still
    /// override the file.
    pub fn load_from_file(path: impl AsRef<Path>) -> Result<Config> {
        let path = path.as_ref();
        if !path.exists() {
            anyhow::bail!("Config file {} does not exist", path.display());
        }
        let figment = Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Yaml::file(path))
            .merge(Env::prefixed(ENV_PREFIX).split("__"));
        Self::extract(&figment).with_context(|| format!("Failed to load config from {}", path.display()))
    }

    /// `--config PATH` when given, the project hierarchy otherwise.
    pub fn load_from(path: Option<&Path>) -> Result<Config> {
        match path {
            Some(path) => Self::load_from_file(path),
            None => Self::load(),
        }
    }

    fn extract(figment: &Figment) -> Result<Config> {
        let config: Config = figment.extract()?;
        Self::validate(&config)?;
        Ok(config)
    }

    /// Validate configuration after loading
    pub fn validate(config: &Config) -> Result<(), ConfigError> {
        let intervals = [
            ("scheduler.interval_ms", config.scheduler.interval_ms),
            ("liveness.sweep_interval_ms", config.liveness.sweep_interval_ms),
            ("liveness.heartbeat_ttl_secs", config.liveness.heartbeat_ttl_secs),
            ("message_bus.receive_timeout_ms", config.message_bus.receive_timeout_ms),
            ("simulation.heartbeat_interval_ms", config.simulation.heartbeat_interval_ms),
        ];
        if let Some((name, value)) = intervals.into_iter().find(|(_, v)| *v == 0) {
            return Err(ConfigError::ZeroInterval { name, value });
        }

        if config.liveness.critical_ttl_secs <= config.liveness.heartbeat_ttl_secs {
            return Err(ConfigError::InvalidTtl {
                ttl: config.liveness.heartbeat_ttl_secs,
                critical: config.liveness.critical_ttl_secs,
            });
        }

        if config.scheduler.max_assignments_per_pass == 0 {
            return Err(ConfigError::InvalidAssignmentsPerPass(0));
        }

        if config.message_bus.mailbox_capacity == 0 {
            return Err(ConfigError::InvalidMailboxCapacity(0));
        }

        if config.tasks.default_priority < 0 {
            return Err(ConfigError::InvalidDefaultPriority(config.tasks.default_priority));
        }

        if config.agents.max_concurrent_tasks == 0 {
            return Err(ConfigError::InvalidMaxConcurrentTasks(0));
        }
        for (name, value) in [
            ("agents.warning_cpu_percent", config.agents.warning_cpu_percent),
            ("agents.warning_memory_percent", config.agents.warning_memory_percent),
        ] {
            if !(value > 0.0 && value <= 100.0) {
                return Err(ConfigError::InvalidThreshold { name, value });
            }
        }

        for entry in &config.fleet {
            let reason = if entry.count == 0 {
                Some("count must be at least 1")
            } else if entry.max_concurrent_tasks == Some(0) {
                Some("max_concurrent_tasks must be at least 1")
            } else {
                None
            };
            if let Some(reason) = reason {
                return Err(ConfigError::InvalidFleetEntry {
                    capability: entry.capability.to_string(),
                    reason: reason.to_string(),
                });
            }
        }

        let simulation = &config.simulation;
        if !(simulation.time_scale.is_finite() && simulation.time_scale > 0.0) {
            return Err(ConfigError::InvalidSimulation(format!(
                "time_scale must be positive, got {}",
                simulation.time_scale
            )));
        }
        if !(0.0..=1.0).contains(&simulation.failure_rate) {
            return Err(ConfigError::InvalidSimulation(format!(
                "failure_rate must be within 0-1, got {}",
                simulation.failure_rate
            )));
        }

        let valid_log_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_log_levels.contains(&config.logging.level.as_str()) {
            return Err(ConfigError::InvalidLogLevel(config.logging.level.clone()));
        }

        let valid_log_formats = ["json", "pretty"];
        if !valid_log_formats.contains(&config.logging.format.as_str()) {
            return Err(ConfigError::InvalidLogFormat(config.logging.format.clone()));
        }

        let valid_rotations = ["daily", "hourly", "never"];
        if !valid_rotations.contains(&config.logging.rotation.as_str()) {
            return Err(ConfigError::InvalidRotation(config.logging.rotation.clone()));
        }

        Ok(())
    }
}
