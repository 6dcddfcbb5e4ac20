//! Configuration loading and typed config structures for the Cadence server.
//!
//! The configuration lives in `cadence.yaml` next to the server binary.
//! This module defines strongly-typed structs that mirror the YAML
//! structure, and provides a loader that reads and validates the file.
//! Every field has a default, so a missing file or a partial file is fine.

use std::path::Path;
use std::time::Duration;

use cadence_types::ShutdownMode;
use serde::Deserialize;

/// Default configuration file name.
pub const DEFAULT_CONFIG_PATH: &str = "cadence.yaml";

/// Errors that can occur when loading configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Failed to read the configuration file from disk.
    #[error("failed to read config file: {source}")]
    Io {
        /// The underlying I/O error.
        #[from]
        source: std::io::Error,
    },

    /// Failed to parse YAML content.
    #[error("failed to parse config YAML: {source}")]
    Yaml {
        /// The underlying YAML parse error.
        source: serde_yml::Error,
    },

    /// The values parsed but are not usable.
    #[error("invalid configuration: {reason}")]
    Invalid {
        /// Explanation of what is wrong with the configuration.
        reason: String,
    },
}

impl From<serde_yml::Error> for ConfigError {
    fn from(source: serde_yml::Error) -> Self {
        Self::Yaml { source }
    }
}

/// Top-level server configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct ServerConfig {
    /// World identity and optional features.
    #[serde(default)]
    pub world: WorldConfig,

    /// Tick cadence and executor sizing.
    #[serde(default)]
    pub scheduler: SchedulerConfig,

    /// Locations of external stores.
    #[serde(default)]
    pub infrastructure: InfrastructureConfig,

    /// Logging output.
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl ServerConfig {
    /// Load configuration from a YAML file at the given path.
    ///
    /// Environment variables override YAML values for infrastructure paths:
    /// - `DATABASE_URL` overrides `infrastructure.database_url`
    /// - `STORE_PATH` overrides `infrastructure.store_path`
    /// - `CACHE_PATH` overrides `infrastructure.cache_path`
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Io`] if the file cannot be read,
    /// [`ConfigError::Yaml`] if it is not valid YAML, or
    /// [`ConfigError::Invalid`] if a value is out of range.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        Self::parse(&contents)
    }

    /// Load from `path` if it exists, otherwise use defaults (still with
    /// environment overrides applied).
    ///
    /// # Errors
    ///
    /// Same as [`ServerConfig::from_file`].
    pub fn load_or_default(path: &Path) -> Result<Self, ConfigError> {
        if path.exists() {
            Self::from_file(path)
        } else {
            let mut config = Self::default();
            config.infrastructure.apply_env_overrides();
            config.validate()?;
            Ok(config)
        }
    }

    /// Parse configuration from a YAML string.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Yaml`] if the string is not valid YAML, or
    /// [`ConfigError::Invalid`] if a value is out of range.
    pub fn parse(yaml: &str) -> Result<Self, ConfigError> {
        let mut config: Self = serde_yml::from_str(yaml)?;
        config.infrastructure.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Check value ranges.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] describing the first bad value.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let scheduler = &self.scheduler;
        if scheduler.tick_interval_ms == 0 {
            return Err(invalid("scheduler.tick_interval_ms must be at least 1"));
        }
        if scheduler.maintenance_interval_ticks == 0 {
            return Err(invalid(
                "scheduler.maintenance_interval_ticks must be at least 1",
            ));
        }
        if scheduler.executor_workers == 0 {
            return Err(invalid("scheduler.executor_workers must be at least 1"));
        }
        Ok(())
    }
}

fn invalid(reason: &str) -> ConfigError {
    ConfigError::Invalid {
        reason: reason.to_owned(),
    }
}

/// World-level configuration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct WorldConfig {
    /// Human-readable world name.
    #[serde(default = "default_world_name")]
    pub name: String,

    /// Whether the simulated population starts with the world.
    #[serde(default)]
    pub simulated_population: bool,

    /// Number of simulated characters to place when enabled.
    #[serde(default = "default_population_size")]
    pub population_size: u32,
}

impl Default for WorldConfig {
    fn default() -> Self {
        Self {
            name: default_world_name(),
            simulated_population: false,
            population_size: default_population_size(),
        }
    }
}

fn default_world_name() -> String {
    String::from("Cadence")
}

const fn default_population_size() -> u32 {
    25
}

/// Tick cadence and executor configuration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct SchedulerConfig {
    /// Milliseconds between ticks. Read once at startup.
    #[serde(default = "default_tick_interval_ms")]
    pub tick_interval_ms: u64,

    /// Ticks between periodic maintenance submissions (K).
    #[serde(default = "default_maintenance_interval_ticks")]
    pub maintenance_interval_ticks: u64,

    /// Number of executor workers.
    #[serde(default = "default_executor_workers")]
    pub executor_workers: usize,

    /// What to do with executor work on shutdown.
    #[serde(default)]
    pub shutdown_mode: ShutdownMode,
}

impl SchedulerConfig {
    /// Tick period as a [`Duration`].
    pub const fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            tick_interval_ms: default_tick_interval_ms(),
            maintenance_interval_ticks: default_maintenance_interval_ticks(),
            executor_workers: default_executor_workers(),
            shutdown_mode: ShutdownMode::default(),
        }
    }
}

const fn default_tick_interval_ms() -> u64 {
    600
}

const fn default_maintenance_interval_ticks() -> u64 {
    50
}

const fn default_executor_workers() -> usize {
    4
}

/// Locations of the external stores consumed by startup subsystems.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct InfrastructureConfig {
    /// Directory holding the content cache.
    #[serde(default = "default_cache_path")]
    pub cache_path: String,

    /// Directory holding the server store.
    #[serde(default = "default_store_path")]
    pub store_path: String,

    /// Primary database connection string.
    #[serde(default = "default_database_url")]
    pub database_url: String,
}

impl InfrastructureConfig {
    /// Apply environment variable overrides for infrastructure settings.
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    /// Apply overrides from an arbitrary lookup (the environment in
    /// production, a map in tests).
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(url) = lookup("DATABASE_URL") {
            self.database_url = url;
        }
        if let Some(path) = lookup("STORE_PATH") {
            self.store_path = path;
        }
        if let Some(path) = lookup("CACHE_PATH") {
            self.cache_path = path;
        }
    }
}

impl Default for InfrastructureConfig {
    fn default() -> Self {
        Self {
            cache_path: default_cache_path(),
            store_path: default_store_path(),
            database_url: default_database_url(),
        }
    }
}

fn default_cache_path() -> String {
    String::from("data/cache")
}

fn default_store_path() -> String {
    String::from("data/store")
}

fn default_database_url() -> String {
    String::from("postgres://localhost:5432/cadence")
}

/// Logging configuration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct LoggingConfig {
    /// Default filter directive when `RUST_LOG` is unset.
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Output format: `pretty` or `json`.
    #[serde(default = "default_log_format")]
    pub format: String,
}

impl LoggingConfig {
    /// Whether JSON output was requested.
    pub fn is_json(&self) -> bool {
        self.format.eq_ignore_ascii_case("json")
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

fn default_log_level() -> String {
    String::from("info")
}

fn default_log_format() -> String {
    String::from("pretty")
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::collections::BTreeMap;

    use super::*;

    #[test]
    fn defaults_match_nominal_cadence() {
        let config = ServerConfig::default();
        assert_eq!(config.scheduler.tick_interval_ms, 600);
        assert_eq!(config.scheduler.tick_interval(), Duration::from_millis(600));
        assert_eq!(config.scheduler.maintenance_interval_ticks, 50);
        assert_eq!(config.scheduler.executor_workers, 4);
        assert_eq!(config.scheduler.shutdown_mode, ShutdownMode::Drain);
        assert!(!config.world.simulated_population);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn parses_partial_yaml() {
        let yaml = r"
world:
  name: Test World
  simulated_population: true
scheduler:
  tick_interval_ms: 100
  shutdown_mode: abandon
logging:
  format: json
";
        let config = ServerConfig::parse(yaml).unwrap();
        assert_eq!(config.world.name, "Test World");
        assert!(config.world.simulated_population);
        assert_eq!(config.world.population_size, 25);
        assert_eq!(config.scheduler.tick_interval_ms, 100);
        assert_eq!(config.scheduler.maintenance_interval_ticks, 50);
        assert_eq!(config.scheduler.shutdown_mode, ShutdownMode::Abandon);
        assert!(config.logging.is_json());
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn empty_document_uses_defaults() {
        let config = ServerConfig::parse("{}").unwrap();
        assert_eq!(config.scheduler, SchedulerConfig::default());
        assert_eq!(config.world, WorldConfig::default());
    }

    #[test]
    fn zero_values_are_rejected() {
        for yaml in [
            "scheduler: { tick_interval_ms: 0 }",
            "scheduler: { maintenance_interval_ticks: 0 }",
            "scheduler: { executor_workers: 0 }",
        ] {
            assert!(matches!(
                ServerConfig::parse(yaml),
                Err(ConfigError::Invalid { .. })
            ));
        }
    }

    #[test]
    fn malformed_yaml_is_an_error() {
        assert!(matches!(
            ServerConfig::parse("scheduler: [unclosed"),
            Err(ConfigError::Yaml { .. })
        ));
    }

    #[test]
    fn overrides_replace_infrastructure_values() {
        let vars: BTreeMap<&str, &str> = [
            ("DATABASE_URL", "postgres://db:5432/live"),
            ("STORE_PATH", "/srv/store"),
        ]
        .into_iter()
        .collect();

        let mut infra = InfrastructureConfig::default();
        infra.apply_overrides(|key| vars.get(key).map(|value| (*value).to_owned()));

        assert_eq!(infra.database_url, "postgres://db:5432/live");
        assert_eq!(infra.store_path, "/srv/store");
        assert_eq!(infra.cache_path, "data/cache");
    }

    #[test]
    fn missing_file_falls_back_to_defaults() {
        let config =
            ServerConfig::load_or_default(Path::new("definitely/not/here/cadence.yaml")).unwrap();
        assert_eq!(config.scheduler, SchedulerConfig::default());
    }
}
