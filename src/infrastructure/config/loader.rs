use anyhow::{Context, Result};
use figment::providers::{Env, Format, Serialized, Yaml};
use figment::Figment;
use thiserror::Error;

use crate::domain::models::config::Config;

/// Configuration error types
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Invalid log level: {0}. Must be one of: trace, debug, info, warn, error")]
    InvalidLogLevel(String),

    #[error("Invalid log format: {0}. Must be one of: json, pretty")]
    InvalidLogFormat(String),

    #[error("Database path cannot be empty")]
    EmptyDatabasePath,

    #[error("Invalid max_connections: {0}. Must be at least 1")]
    InvalidMaxConnections(u32),

    #[error("Invalid queue concurrency: {0}. Must be between 1 and 64")]
    InvalidConcurrency(usize),

    #[error("Invalid max_queue_size: {0}. Must be at least 1")]
    InvalidQueueSize(usize),

    #[error("Invalid scheduler tick interval: {0} ms. Must be at least 100")]
    InvalidTickInterval(u64),

    #[error("Invalid monitor history length: {0}. Must be at least 2")]
    InvalidHistoryLen(usize),

    #[error("Agent token secret cannot be empty")]
    EmptyTokenSecret,
}

/// Configuration loader with hierarchical merging
pub struct ConfigLoader;

impl ConfigLoader {
    /// Load configuration with hierarchical merging
    ///
    /// Precedence (lowest to highest):
    /// 1. Programmatic defaults (Serialized)
    /// 2. sentinel.yaml (deployment config)
    /// 3. Environment variables (SENTINEL_* prefix, highest priority)
    pub fn load() -> Result<Config> {
        let config: Config = Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Yaml::file("sentinel.yaml"))
            .merge(Env::prefixed("SENTINEL_").split("__"))
            .extract()
            .context("Failed to extract configuration from figment")?;

        Self::validate(&config)?;
        Ok(config)
    }

    /// Load configuration from a specific file
    pub fn load_from_file(path: impl AsRef<std::path::Path>) -> Result<Config> {
        let config: Config = Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Yaml::file(path.as_ref()))
            .merge(Env::prefixed("SENTINEL_").split("__"))
            .extract()
            .context(format!(
                "Failed to load config from {}",
                path.as_ref().display()
            ))?;

        Self::validate(&config)?;
        Ok(config)
    }

    /// Validate configuration after loading
    pub fn validate(config: &Config) -> Result<(), ConfigError> {
        if config.database.path.is_empty() {
            return Err(ConfigError::EmptyDatabasePath);
        }
        if config.database.max_connections == 0 {
            return Err(ConfigError::InvalidMaxConnections(
                config.database.max_connections,
            ));
        }

        let valid_log_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_log_levels.contains(&config.logging.level.as_str()) {
            return Err(ConfigError::InvalidLogLevel(config.logging.level.clone()));
        }
        let valid_log_formats = ["json", "pretty"];
        if !valid_log_formats.contains(&config.logging.format.as_str()) {
            return Err(ConfigError::InvalidLogFormat(config.logging.format.clone()));
        }

        if config.queue.concurrency == 0 || config.queue.concurrency > 64 {
            return Err(ConfigError::InvalidConcurrency(config.queue.concurrency));
        }
        if config.queue.max_queue_size == 0 {
            return Err(ConfigError::InvalidQueueSize(config.queue.max_queue_size));
        }

        if config.scheduler.tick_interval_ms < 100 {
            return Err(ConfigError::InvalidTickInterval(
                config.scheduler.tick_interval_ms,
            ));
        }

        if config.monitor.history_len < 2 {
            return Err(ConfigError::InvalidHistoryLen(config.monitor.history_len));
        }

        if config.auth.agent_token_secret.is_empty() {
            return Err(ConfigError::EmptyTokenSecret);
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = Config::default();
        assert!(ConfigLoader::validate(&config).is_ok());
    }

    #[test]
    fn test_rejects_zero_concurrency() {
        let mut config = Config::default();
        config.queue.concurrency = 0;
        assert!(matches!(
            ConfigLoader::validate(&config),
            Err(ConfigError::InvalidConcurrency(0))
        ));
    }

    #[test]
    fn test_rejects_bad_log_level() {
        let mut config = Config::default();
        config.logging.level = "verbose".to_string();
        assert!(matches!(
            ConfigLoader::validate(&config),
            Err(ConfigError::InvalidLogLevel(_))
        ));
    }

    #[test]
    fn test_rejects_tiny_tick_interval() {
        let mut config = Config::default();
        config.scheduler.tick_interval_ms = 10;
        assert!(matches!(
            ConfigLoader::validate(&config),
            Err(ConfigError::InvalidTickInterval(10))
        ));
    }
}
