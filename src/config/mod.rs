//! Configuration management for the DDoS mitigation service.
//!
//! This module handles loading and managing application configuration
//! from configuration files and environment variables.

use std::env;
use config::{Config as ConfigBuilder, Environment, File};
use thiserror::Error;
use crate::models::Config;
use crate::utils::seconds_duration;

/// Errors that can occur while loading or validating configuration
#[derive(Error, Debug)]
pub enum ConfigurationError {
    #[error("Config error: {0}")]
    Load(#[from] config::ConfigError),
    #[error("Invalid value for {field}: {reason}")]
    OutOfRange { field: &'static str, reason: String },
}

/// Load configuration from the config file and `DDOS__`-prefixed environment variables
pub fn load_config() -> Result<Config, ConfigurationError> {
    let config_file = env::var("CONFIG_FILE").unwrap_or_else(|_| "config/default.toml".to_string());

    let config = ConfigBuilder::builder()
        .add_source(File::with_name(&config_file).required(false))
        .add_source(Environment::with_prefix("DDOS").separator("__"))
        .set_default("server.host", "127.0.0.1")?
        .set_default("server.port", 8080)?
        .set_default("server.ingest_queue_size", 10_000)?
        .set_default("redis.url", "redis://127.0.0.1:6379")?
        .set_default("monitoring.enabled", true)?
        .set_default("monitoring.interval_seconds", 60)?
        .set_default("monitoring.report_window_seconds", 3600)?
        .set_default("storage.backend", "redis")?
        .set_default("storage.report_capacity", 100)?
        .set_default("storage.retention_days", 30)?
        .build()?;

    let config: Config = config.try_deserialize()?;
    config.detection.validate()?;
    if seconds_duration(config.monitoring.report_window_seconds).is_none() {
        return Err(ConfigurationError::OutOfRange {
            field: "monitoring.report_window_seconds",
            reason: format!("{} seconds is not representable", config.monitoring.report_window_seconds),
        });
    }
    Ok(config)
}
